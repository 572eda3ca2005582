use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::validation::clamp_unit;

// =============================================================================
// Issues
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Compilation,
    Test,
    Dependency,
    Lint,
    Performance,
    Security,
    Runtime,
    Configuration,
}

impl IssueType {
    pub const ALL: [IssueType; 8] = [
        IssueType::Compilation,
        IssueType::Test,
        IssueType::Dependency,
        IssueType::Lint,
        IssueType::Performance,
        IssueType::Security,
        IssueType::Runtime,
        IssueType::Configuration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Compilation => "compilation",
            IssueType::Test => "test",
            IssueType::Dependency => "dependency",
            IssueType::Lint => "lint",
            IssueType::Performance => "performance",
            IssueType::Security => "security",
            IssueType::Runtime => "runtime",
            IssueType::Configuration => "configuration",
        }
    }

    /// Lenient parse used on external reports (`build` and `compile` map to compilation, etc).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "compilation" | "compile" | "build" => Some(IssueType::Compilation),
            "test" | "tests" => Some(IssueType::Test),
            "dependency" | "dependencies" | "audit" => Some(IssueType::Dependency),
            "lint" => Some(IssueType::Lint),
            "performance" | "perf" => Some(IssueType::Performance),
            "security" => Some(IssueType::Security),
            "runtime" => Some(IssueType::Runtime),
            "configuration" | "config" => Some(IssueType::Configuration),
            _ => None,
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" | "info" | "note" => Some(Severity::Low),
            "medium" | "moderate" | "warning" | "warn" => Some(Severity::Medium),
            "high" | "error" => Some(Severity::High),
            "critical" | "fatal" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub function: Option<String>,
}

/// A normalized development-time problem. Ids are stable across re-detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub location: IssueLocation,
    pub context: BTreeMap<String, serde_json::Value>,
    pub detected_at: DateTime<Utc>,
    pub confidence: f64,
    pub tags: BTreeSet<String>,
    /// Name of the detection source that reported it, if any.
    pub source: Option<String>,
}

impl Issue {
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }

    pub fn context_bool(&self, key: &str) -> bool {
        self.context.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn context_f64(&self, key: &str) -> Option<f64> {
        self.context.get(key).and_then(|v| v.as_f64())
    }

    /// A context key counts as present when it is non-null and non-empty.
    pub fn has_context(&self, key: &str) -> bool {
        match self.context.get(key) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(serde_json::Value::Object(o)) => !o.is_empty(),
            Some(_) => true,
        }
    }
}

// =============================================================================
// Root cause analysis
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCauseCategory {
    SyntaxError,
    TypeError,
    MissingDependency,
    VersionConflict,
    ConfigurationError,
    LogicError,
    PerformanceBottleneck,
    SecurityVulnerability,
}

impl RootCauseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootCauseCategory::SyntaxError => "syntax_error",
            RootCauseCategory::TypeError => "type_error",
            RootCauseCategory::MissingDependency => "missing_dependency",
            RootCauseCategory::VersionConflict => "version_conflict",
            RootCauseCategory::ConfigurationError => "configuration_error",
            RootCauseCategory::LogicError => "logic_error",
            RootCauseCategory::PerformanceBottleneck => "performance_bottleneck",
            RootCauseCategory::SecurityVulnerability => "security_vulnerability",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn bump(self) -> Self {
        match self {
            Complexity::Simple => Complexity::Moderate,
            _ => Complexity::Complex,
        }
    }
}

/// The four independent places evidence is gathered from, in ranking tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    PatternMatch,
    StructuralHeuristic,
    DependencyGraph,
    HistoricalOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_type: String,
    pub description: String,
    pub weight: f64,
    pub source: EvidenceSource,
    /// Category this evidence points at, if it points anywhere.
    pub implies: Option<RootCauseCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseAnalysisResult {
    pub issue_id: String,
    pub root_cause: String,
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
    pub category: RootCauseCategory,
    pub complexity: Complexity,
    /// Set when the analysis timed out or found no evidence.
    pub degraded: bool,
}

// =============================================================================
// Fix strategies
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Run `parameters.command` through the shell.
    RunCommand,
    /// Replace `parameters.find` with `parameters.replace`, or insert `parameters.prepend`.
    EditFile,
    /// Set top-level `parameters.key` to `parameters.value` in a JSON config file.
    UpdateConfig,
    /// Restore the backup written before the file was first modified.
    RestoreFile,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::RunCommand => "run_command",
            StepAction::EditFile => "edit_file",
            StepAction::UpdateConfig => "update_config",
            StepAction::RestoreFile => "restore_file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixStep {
    pub action: StepAction,
    pub target: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl FixStep {
    pub fn new(action: StepAction, target: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn command(cmd: impl Into<String>) -> Self {
        let cmd = cmd.into();
        FixStep::new(StepAction::RunCommand, cmd.clone()).with("command", cmd)
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixStrategy {
    pub id: String,
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub applicable_types: Vec<IssueType>,
    pub steps: Vec<FixStep>,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub estimated_time_ms: u64,
    pub prerequisites: Vec<String>,
    pub rollback_steps: Vec<FixStep>,
    pub success_criteria: Vec<String>,
    pub tags: BTreeSet<String>,
}

// =============================================================================
// Fix results
// =============================================================================

/// Fix lifecycle. `Pending` is terminal for the automated path when the gate refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Pending,
    Applying,
    Applied,
    Failed,
    RolledBack,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixStatus::Pending => "pending",
            FixStatus::Applying => "applying",
            FixStatus::Applied => "applied",
            FixStatus::Failed => "failed",
            FixStatus::RolledBack => "rolled_back",
        }
    }

    /// Whether the outcome of an attempt is known (the fix actually ran).
    pub fn is_outcome(&self) -> bool {
        matches!(self, FixStatus::Applied | FixStatus::Failed | FixStatus::RolledBack)
    }

    pub fn can_transition_to(&self, next: FixStatus) -> bool {
        matches!(
            (self, next),
            (FixStatus::Pending, FixStatus::Applying)
                | (FixStatus::Applying, FixStatus::Applied)
                | (FixStatus::Applying, FixStatus::Failed)
                | (FixStatus::Applying, FixStatus::RolledBack)
        )
    }
}

/// Structured error kept on results for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct FixError {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

impl FixError {
    pub fn new(code: &str, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            recoverable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub step_index: usize,
    pub action: StepAction,
    pub target: String,
    pub summary: String,
    /// File backed up before this step modified it.
    #[serde(default)]
    pub backup: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixResult {
    pub id: String,
    pub issue_id: String,
    pub issue_type: IssueType,
    pub strategy_id: String,
    pub template_id: String,
    pub strategy_name: String,
    pub root_cause: Option<RootCauseCategory>,
    pub status: FixStatus,
    pub applied: bool,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub execution_time_ms: u64,
    pub changes: Vec<AppliedChange>,
    pub tests_run: Vec<TestRun>,
    pub rollback_required: bool,
    pub error: Option<FixError>,
    pub metrics: BTreeMap<String, f64>,
    pub attempt: u32,
}

impl FixResult {
    pub fn pending(
        issue: &Issue,
        strategy: &FixStrategy,
        root_cause: Option<RootCauseCategory>,
        attempt: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            issue_id: issue.id.clone(),
            issue_type: issue.issue_type,
            strategy_id: strategy.id.clone(),
            template_id: strategy.template_id.clone(),
            strategy_name: strategy.name.clone(),
            root_cause,
            status: FixStatus::Pending,
            applied: false,
            success: false,
            started_at: Utc::now(),
            ended_at: None,
            execution_time_ms: 0,
            changes: Vec::new(),
            tests_run: Vec::new(),
            rollback_required: false,
            error: None,
            metrics: BTreeMap::new(),
            attempt,
        }
    }

    /// Move along the lifecycle; anything off the state machine is rejected.
    pub fn transition(&mut self, next: FixStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "illegal fix transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Stamp the end time and elapsed duration.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.execution_time_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.ended_at = Some(now);
    }
}

// =============================================================================
// Predictions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1-6h")]
    Hours1To6,
    #[serde(rename = "6-24h")]
    Hours6To24,
    #[serde(rename = "1-3d")]
    Days1To3,
    #[serde(rename = "3-7d")]
    Days3To7,
}

impl Timeframe {
    /// Upper bound of the bucket; insights expire after it.
    pub fn upper_bound(&self) -> Duration {
        const HOUR: u64 = 3600;
        match self {
            Timeframe::Hours1To6 => Duration::from_secs(6 * HOUR),
            Timeframe::Hours6To24 => Duration::from_secs(24 * HOUR),
            Timeframe::Days1To3 => Duration::from_secs(72 * HOUR),
            Timeframe::Days3To7 => Duration::from_secs(168 * HOUR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub source: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub severity: Severity,
    pub affected_components: Vec<String>,
    pub business_impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveInsight {
    pub id: String,
    pub issue_type: IssueType,
    pub pattern_id: String,
    pub probability: f64,
    pub confidence: f64,
    pub timeframe: Timeframe,
    pub triggers: Vec<Trigger>,
    pub prevention_suggestions: Vec<String>,
    pub impact: ImpactAssessment,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PredictiveInsight {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// =============================================================================
// Monitoring
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringState {
    pub enabled: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub issues_detected: u64,
    pub fixes_applied: u64,
    pub success_rate: f64,
    pub average_fix_time_ms: f64,
    pub active_monitors: Vec<String>,
    pub health_status: HealthStatus,
    /// Issues with a fix attempt running or queued behind one.
    #[serde(default)]
    pub fixes_in_flight: usize,
    #[serde(default)]
    pub fixes_applying: usize,
    #[serde(default)]
    pub history_len: usize,
    #[serde(default)]
    pub history_cap: usize,
}

impl Default for MonitoringState {
    fn default() -> Self {
        Self {
            enabled: false,
            last_check: None,
            issues_detected: 0,
            fixes_applied: 0,
            success_rate: 0.0,
            average_fix_time_ms: 0.0,
            active_monitors: Vec::new(),
            health_status: HealthStatus::Offline,
            fixes_in_flight: 0,
            fixes_applying: 0,
            history_len: 0,
            history_cap: 0,
        }
    }
}

/// Clamp every score on a strategy into `[0, 1]`.
pub(crate) fn clamp_strategy(mut strategy: FixStrategy) -> FixStrategy {
    strategy.confidence = clamp_unit(strategy.confidence);
    strategy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_type_lenient_parse() {
        assert_eq!(IssueType::parse("Build"), Some(IssueType::Compilation));
        assert_eq!(IssueType::parse(" tests "), Some(IssueType::Test));
        assert_eq!(IssueType::parse("audit"), Some(IssueType::Dependency));
        assert_eq!(IssueType::parse("weather"), None);
    }

    #[test]
    fn test_severity_and_risk_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low < Severity::Medium);
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High > RiskLevel::Medium);
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(FixStatus::Pending.can_transition_to(FixStatus::Applying));
        assert!(FixStatus::Applying.can_transition_to(FixStatus::RolledBack));
        assert!(!FixStatus::Pending.can_transition_to(FixStatus::Applied));
        assert!(!FixStatus::Applied.can_transition_to(FixStatus::Applying));
        assert!(!FixStatus::RolledBack.can_transition_to(FixStatus::Failed));
    }

    #[test]
    fn test_timeframe_serde_names() {
        let json = serde_json::to_string(&Timeframe::Hours6To24).unwrap();
        assert_eq!(json, "\"6-24h\"");
        assert!(Timeframe::Days3To7.upper_bound() > Timeframe::Days1To3.upper_bound());
    }

    #[test]
    fn test_has_context_ignores_empty_values() {
        let mut ctx = BTreeMap::new();
        ctx.insert("a".to_string(), serde_json::json!(""));
        ctx.insert("b".to_string(), serde_json::json!([]));
        ctx.insert("c".to_string(), serde_json::json!(null));
        ctx.insert("d".to_string(), serde_json::json!(false));
        let issue = Issue {
            id: "iss-1".into(),
            issue_type: IssueType::Lint,
            severity: Severity::Low,
            title: "t".into(),
            description: "d".into(),
            location: IssueLocation::default(),
            context: ctx,
            detected_at: Utc::now(),
            confidence: 1.0,
            tags: BTreeSet::new(),
            source: None,
        };
        assert!(!issue.has_context("a"));
        assert!(!issue.has_context("b"));
        assert!(!issue.has_context("c"));
        assert!(issue.has_context("d"));
        assert!(!issue.has_context("missing"));
    }
}
