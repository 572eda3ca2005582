//! Explicit configuration object handed to every component at construction.
//!
//! There is no ambient/global configuration: the manager owns the current
//! `Arc<AutoFixConfig>` and swaps it atomically on a validated update.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::types::{IssueType, RiskLevel};
use crate::error::AppError;
use crate::validation::{check_at_least, check_unit_interval};

/// Per-phase timeouts in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    pub detection_ms: u64,
    pub analysis_ms: u64,
    pub fixing_ms: u64,
    pub validation_ms: u64,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            detection_ms: 30_000,
            analysis_ms: 10_000,
            fixing_ms: 300_000,
            validation_ms: 600_000,
        }
    }
}

impl PhaseTimeouts {
    pub fn detection(&self) -> Duration {
        Duration::from_millis(self.detection_ms)
    }

    pub fn analysis(&self) -> Duration {
        Duration::from_millis(self.analysis_ms)
    }

    pub fn fixing(&self) -> Duration {
        Duration::from_millis(self.fixing_ms)
    }

    pub fn validation(&self) -> Duration {
        Duration::from_millis(self.validation_ms)
    }
}

/// Overrides applied to a single issue type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueTypeOverride {
    pub auto_fix_enabled: bool,
    pub confidence_threshold: Option<f64>,
    pub max_retries: Option<u32>,
    /// Higher runs first when several issues arrive in one detection batch.
    pub priority: i32,
}

impl Default for IssueTypeOverride {
    fn default() -> Self {
        Self {
            auto_fix_enabled: true,
            confidence_threshold: None,
            max_retries: None,
            priority: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFixConfig {
    pub enabled: bool,
    pub auto_apply_threshold: f64,
    /// Highest strategy risk level that may be applied without a human.
    pub risk_tolerance: RiskLevel,
    pub enabled_issue_types: BTreeSet<IssueType>,
    pub test_validation_required: bool,
    pub rollback_on_failure: bool,
    pub max_concurrent_fixes: usize,
    pub retry_attempts: u32,
    pub timeouts: PhaseTimeouts,
    /// Keyed by issue type name (`compilation`, `test`, ...).
    pub issue_types: BTreeMap<String, IssueTypeOverride>,

    pub history_cap: usize,
    pub max_strategies: usize,
    pub max_evidence: usize,
    pub max_predictions: usize,
    pub prediction_confidence_threshold: f64,
    pub monitor_interval_ms: u64,
    pub prediction_interval_ms: u64,

    /// Directory holding `autofix.db`. `None` uses the platform data dir.
    pub database_path: Option<PathBuf>,
    /// JSON / JSON-lines report files polled by the detection loop.
    pub report_files: Vec<PathBuf>,
    /// Shell command used to validate fixes (e.g. `cargo test`).
    pub test_command: Option<String>,
    /// Record fix steps without touching the workspace.
    pub dry_run: bool,
}

impl Default for AutoFixConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_apply_threshold: 0.8,
            risk_tolerance: RiskLevel::Medium,
            enabled_issue_types: IssueType::ALL.into_iter().collect(),
            test_validation_required: true,
            rollback_on_failure: true,
            max_concurrent_fixes: 3,
            retry_attempts: 1,
            timeouts: PhaseTimeouts::default(),
            issue_types: BTreeMap::new(),
            history_cap: 500,
            max_strategies: 3,
            max_evidence: 5,
            max_predictions: 10,
            prediction_confidence_threshold: 0.5,
            monitor_interval_ms: 5_000,
            prediction_interval_ms: 60_000,
            database_path: None,
            report_files: Vec::new(),
            test_command: None,
            dry_run: false,
        }
    }
}

impl AutoFixConfig {
    /// Parse and validate a TOML document. Missing keys fall back to defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, AppError> {
        let config: AutoFixConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every option and report all problems at once.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();

        check_unit_interval("auto_apply_threshold", self.auto_apply_threshold, &mut errors);
        check_unit_interval(
            "prediction_confidence_threshold",
            self.prediction_confidence_threshold,
            &mut errors,
        );
        check_at_least("max_concurrent_fixes", self.max_concurrent_fixes as u64, 1, &mut errors);
        check_at_least("history_cap", self.history_cap as u64, 1, &mut errors);
        check_at_least("max_strategies", self.max_strategies as u64, 1, &mut errors);
        check_at_least("max_evidence", self.max_evidence as u64, 1, &mut errors);
        check_at_least("max_predictions", self.max_predictions as u64, 1, &mut errors);
        check_at_least("timeouts.detection_ms", self.timeouts.detection_ms, 1, &mut errors);
        check_at_least("timeouts.analysis_ms", self.timeouts.analysis_ms, 1, &mut errors);
        check_at_least("timeouts.fixing_ms", self.timeouts.fixing_ms, 1, &mut errors);
        check_at_least("timeouts.validation_ms", self.timeouts.validation_ms, 1, &mut errors);
        check_at_least("monitor_interval_ms", self.monitor_interval_ms, 10, &mut errors);
        check_at_least("prediction_interval_ms", self.prediction_interval_ms, 10, &mut errors);

        for (name, ov) in &self.issue_types {
            if IssueType::parse(name).is_none() {
                errors.push(format!("issue_types.{name}: unknown issue type"));
            }
            if let Some(threshold) = ov.confidence_threshold {
                check_unit_interval(
                    &format!("issue_types.{name}.confidence_threshold"),
                    threshold,
                    &mut errors,
                );
            }
        }

        if let Some(cmd) = &self.test_command {
            if cmd.trim().is_empty() {
                errors.push("test_command cannot be empty when set".into());
            }
        }
        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                errors.push("database_path cannot be empty when set".into());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Configuration(errors))
        }
    }

    fn override_for(&self, issue_type: IssueType) -> Option<&IssueTypeOverride> {
        self.issue_types.get(issue_type.as_str())
    }

    pub fn is_type_enabled(&self, issue_type: IssueType) -> bool {
        self.enabled_issue_types.contains(&issue_type)
    }

    pub fn auto_fix_enabled(&self, issue_type: IssueType) -> bool {
        self.override_for(issue_type)
            .map_or(true, |o| o.auto_fix_enabled)
    }

    /// Per-type confidence threshold, falling back to `auto_apply_threshold`.
    pub fn effective_threshold(&self, issue_type: IssueType) -> f64 {
        self.override_for(issue_type)
            .and_then(|o| o.confidence_threshold)
            .unwrap_or(self.auto_apply_threshold)
    }

    pub fn max_retries(&self, issue_type: IssueType) -> u32 {
        self.override_for(issue_type)
            .and_then(|o| o.max_retries)
            .unwrap_or(self.retry_attempts)
    }

    pub fn priority(&self, issue_type: IssueType) -> i32 {
        self.override_for(issue_type).map_or(0, |o| o.priority)
    }

    /// Directory for the sqlite store and crash logs.
    pub fn data_dir(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("autofix-engine")
        })
    }
}
