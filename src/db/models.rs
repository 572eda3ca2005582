use serde::{Deserialize, Serialize};

// ============================================================================
// Fix history
// ============================================================================

/// One stored history row. `payload` is the full serialized `FixResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixHistoryRow {
    pub seq: i64,
    pub id: String,
    pub issue_id: String,
    pub issue_type: String,
    pub status: String,
    pub success: bool,
    pub payload: String,
    pub recorded_at: String,
}

// ============================================================================
// Monitoring
// ============================================================================

/// Lifetime counters behind `MonitoringState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringCounters {
    pub issues_detected: u64,
    /// Terminal outcomes (applied, failed, rolled back).
    pub fixes_attempted: u64,
    pub fixes_applied: u64,
    pub total_fix_time_ms: u64,
    pub last_success_at: Option<String>,
}

impl MonitoringCounters {
    pub fn success_rate(&self) -> f64 {
        if self.fixes_attempted == 0 {
            0.0
        } else {
            self.fixes_applied as f64 / self.fixes_attempted as f64
        }
    }

    pub fn average_fix_time_ms(&self) -> f64 {
        if self.fixes_attempted == 0 {
            0.0
        } else {
            self.total_fix_time_ms as f64 / self.fixes_attempted as f64
        }
    }
}

// ============================================================================
// Prediction accuracy
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionAccuracyRow {
    pub issue_type: String,
    pub accuracy: f64,
    pub updated_at: String,
}
