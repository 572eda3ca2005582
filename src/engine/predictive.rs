//! Forecasting of likely upcoming issues from deterministic signal conditions.
//!
//! The engine is the only writer of its model table: accuracy moves by EMA
//! when an insight is realized (an issue of that type shows up) or expires.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::process::Command;

use super::bus::{AutoFixEvent, EventBus};
use super::learner::ema;
use super::types::{ImpactAssessment, IssueType, PredictiveInsight, Severity, Timeframe, Trigger};
use crate::config::AutoFixConfig;
use crate::error::AppError;
use crate::validation::clamp_unit;

pub const INITIAL_ACCURACY: f64 = 0.7;

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub upgraded: Vec<String>,
    /// Upgrades that cross a major version.
    pub major_bumps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionSignals {
    pub changed_files: Vec<String>,
    pub dependency_diff: DependencyDiff,
    pub hours_since_last_success: Option<f64>,
    pub recent_issue_counts: BTreeMap<IssueType, u32>,
    pub failure_rates: BTreeMap<IssueType, f64>,
    pub metrics: BTreeMap<String, f64>,
}

/// Collaborator seam for anything that contributes signals.
#[async_trait::async_trait]
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &str;
    async fn collect(&self, signals: &mut PredictionSignals) -> Result<(), AppError>;
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    ChangedFilesAtLeast(usize),
    /// Any changed file ends with this extension (`.ts`, `.env`).
    ChangedExtension(String),
    /// Any changed path starts with this prefix. Trailing `*` are ignored.
    ChangedPath(String),
    DependenciesAddedAtLeast(usize),
    DependenciesUpgradedAtLeast(usize),
    MajorVersionBump,
    HoursSinceSuccessAbove(f64),
    RecentIssuesAtLeast(IssueType, u32),
    FailureRateAbove(IssueType, f64),
    MetricAbove(String, f64),
}

impl Condition {
    pub fn evaluate(&self, signals: &PredictionSignals) -> bool {
        match self {
            Condition::ChangedFilesAtLeast(n) => signals.changed_files.len() >= *n,
            Condition::ChangedExtension(ext) => signals.changed_files.iter().any(|f| f.ends_with(ext.as_str())),
            Condition::ChangedPath(pattern) => {
                let prefix = pattern.trim_end_matches('*');
                signals.changed_files.iter().any(|f| f.starts_with(prefix))
            }
            Condition::DependenciesAddedAtLeast(n) => signals.dependency_diff.added.len() >= *n,
            Condition::DependenciesUpgradedAtLeast(n) => signals.dependency_diff.upgraded.len() >= *n,
            Condition::MajorVersionBump => !signals.dependency_diff.major_bumps.is_empty(),
            Condition::HoursSinceSuccessAbove(h) => signals.hours_since_last_success.is_some_and(|v| v > *h),
            Condition::RecentIssuesAtLeast(t, n) => {
                signals.recent_issue_counts.get(t).copied().unwrap_or(0) >= *n
            }
            Condition::FailureRateAbove(t, rate) => signals.failure_rates.get(t).is_some_and(|v| v > rate),
            Condition::MetricAbove(name, threshold) => signals.metrics.get(name).is_some_and(|v| v > threshold),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Condition::ChangedFilesAtLeast(n) => format!("changed_files>={n}"),
            Condition::ChangedExtension(ext) => format!("changed:*{ext}"),
            Condition::ChangedPath(p) => format!("changed:{p}"),
            Condition::DependenciesAddedAtLeast(n) => format!("dependencies_added>={n}"),
            Condition::DependenciesUpgradedAtLeast(n) => format!("dependencies_upgraded>={n}"),
            Condition::MajorVersionBump => "major_version_bump".into(),
            Condition::HoursSinceSuccessAbove(h) => format!("hours_since_success>{h}"),
            Condition::RecentIssuesAtLeast(t, n) => format!("recent_{t}_issues>={n}"),
            Condition::FailureRateAbove(t, r) => format!("{t}_failure_rate>{r}"),
            Condition::MetricAbove(name, v) => format!("{name}>{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionPattern {
    pub id: String,
    pub conditions: Vec<Condition>,
    pub base_probability: f64,
    pub timeframe: Timeframe,
    pub prevention: Vec<String>,
    pub impact: ImpactAssessment,
}

impl PredictionPattern {
    /// Satisfied conditions and the match ratio.
    pub fn evaluate(&self, signals: &PredictionSignals) -> (Vec<&Condition>, f64) {
        if self.conditions.is_empty() {
            return (Vec::new(), 0.0);
        }
        let satisfied: Vec<&Condition> = self.conditions.iter().filter(|c| c.evaluate(signals)).collect();
        let ratio = satisfied.len() as f64 / self.conditions.len() as f64;
        (satisfied, ratio)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionModel {
    pub issue_type: IssueType,
    pub patterns: Vec<PredictionPattern>,
    pub accuracy: f64,
}

#[allow(clippy::too_many_arguments)]
fn pattern(
    id: &str,
    conditions: Vec<Condition>,
    base_probability: f64,
    timeframe: Timeframe,
    prevention: &[&str],
    severity: Severity,
    components: &[&str],
    business_impact: &str,
) -> PredictionPattern {
    PredictionPattern {
        id: id.into(),
        conditions,
        base_probability,
        timeframe,
        prevention: prevention.iter().map(|s| s.to_string()).collect(),
        impact: ImpactAssessment {
            severity,
            affected_components: components.iter().map(|s| s.to_string()).collect(),
            business_impact: business_impact.into(),
        },
    }
}

pub fn default_models() -> Vec<PredictionModel> {
    use Condition as C;
    use IssueType as T;
    use Timeframe as F;

    let model = |issue_type, patterns| PredictionModel {
        issue_type,
        patterns,
        accuracy: INITIAL_ACCURACY,
    };

    vec![
        model(
            T::Compilation,
            vec![
                pattern(
                    "wide-change-after-upgrade",
                    vec![C::ChangedFilesAtLeast(8), C::DependenciesUpgradedAtLeast(1)],
                    0.6,
                    F::Hours1To6,
                    &["Run the type checker before committing", "Upgrade dependencies in a separate change"],
                    Severity::High,
                    &["build"],
                    "Broken build blocks every developer",
                ),
                pattern(
                    "shared-types-churn",
                    vec![C::ChangedPath("src/types*".into()), C::ChangedExtension(".d.ts".into())],
                    0.5,
                    F::Hours1To6,
                    &["Check downstream usages of changed type definitions"],
                    Severity::Medium,
                    &["build"],
                    "Type errors surface across modules",
                ),
            ],
        ),
        model(
            T::Dependency,
            vec![pattern(
                "major-bump",
                vec![C::MajorVersionBump, C::DependenciesUpgradedAtLeast(1)],
                0.7,
                F::Hours6To24,
                &["Read the changelog for breaking changes", "Pin the previous major until migration is done"],
                Severity::High,
                &["dependencies"],
                "Install or runtime failures after upgrade",
            )],
        ),
        model(
            T::Test,
            vec![
                pattern(
                    "flaky-suite-under-change",
                    vec![C::ChangedFilesAtLeast(5), C::FailureRateAbove(T::Test, 0.3)],
                    0.55,
                    F::Hours1To6,
                    &["Run the affected test suites locally"],
                    Severity::Medium,
                    &["tests"],
                    "Red CI delays merges",
                ),
                pattern(
                    "stale-green",
                    vec![C::HoursSinceSuccessAbove(24.0), C::ChangedFilesAtLeast(1)],
                    0.5,
                    F::Hours6To24,
                    &["Trigger a full test run"],
                    Severity::Medium,
                    &["tests"],
                    "Regressions accumulate unnoticed",
                ),
            ],
        ),
        model(
            T::Lint,
            vec![pattern(
                "lint-burst",
                vec![C::ChangedFilesAtLeast(3), C::RecentIssuesAtLeast(T::Lint, 3)],
                0.5,
                F::Hours1To6,
                &["Enable format-on-save", "Run the linter in a pre-commit hook"],
                Severity::Low,
                &["code quality"],
                "Review noise",
            )],
        ),
        model(
            T::Performance,
            vec![pattern(
                "bundle-growth",
                vec![C::MetricAbove("bundleSizeGrowth".into(), 0.1), C::DependenciesAddedAtLeast(1)],
                0.6,
                F::Days1To3,
                &["Check the size of newly added dependencies", "Lazy-load heavy modules"],
                Severity::Medium,
                &["frontend"],
                "Slower page loads",
            )],
        ),
        model(
            T::Security,
            vec![pattern(
                "new-dependency-surface",
                vec![C::DependenciesAddedAtLeast(1), C::RecentIssuesAtLeast(T::Security, 1)],
                0.5,
                F::Days3To7,
                &["Run a dependency audit", "Prefer maintained packages"],
                Severity::High,
                &["dependencies"],
                "Exposure to known vulnerabilities",
            )],
        ),
        model(
            T::Runtime,
            vec![pattern(
                "error-rate-with-config-change",
                vec![C::ChangedPath("config/".into()), C::MetricAbove("errorRate".into(), 0.01)],
                0.55,
                F::Hours6To24,
                &["Roll out configuration changes gradually"],
                Severity::High,
                &["service"],
                "User-facing errors",
            )],
        ),
        model(
            T::Configuration,
            vec![pattern(
                "env-change",
                vec![C::ChangedPath(".env*".into()), C::ChangedFilesAtLeast(1)],
                0.45,
                F::Hours1To6,
                &["Update .env.example alongside .env changes"],
                Severity::Medium,
                &["configuration"],
                "Environments drift apart",
            )],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct PredictiveState {
    models: BTreeMap<IssueType, PredictionModel>,
    insights: Vec<PredictiveInsight>,
}

pub struct PredictiveEngine {
    state: Mutex<PredictiveState>,
    bus: EventBus,
}

impl PredictiveEngine {
    pub fn new(bus: EventBus) -> Self {
        Self::with_models(bus, default_models())
    }

    pub fn with_models(bus: EventBus, models: Vec<PredictionModel>) -> Self {
        Self {
            state: Mutex::new(PredictiveState {
                models: models.into_iter().map(|m| (m.issue_type, m)).collect(),
                insights: Vec::new(),
            }),
            bus,
        }
    }

    pub fn accuracy(&self, issue_type: IssueType) -> f64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .models
            .get(&issue_type)
            .map_or(INITIAL_ACCURACY, |m| m.accuracy)
    }

    pub fn accuracies(&self) -> Vec<(IssueType, f64)> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .models
            .values()
            .map(|m| (m.issue_type, m.accuracy))
            .collect()
    }

    pub fn restore_accuracy(&self, issue_type: IssueType, accuracy: f64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(model) = state.models.get_mut(&issue_type) {
            model.accuracy = clamp_unit(accuracy);
        }
    }

    /// Feed a known outcome of a prediction for `issue_type`.
    pub fn record_outcome(&self, issue_type: IssueType, occurred: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        record_outcome_locked(&mut state, issue_type, occurred);
    }

    /// An issue of this type was detected: live insights for it came true.
    pub fn realize(&self, issue_type: IssueType) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let before = state.insights.len();
        state.insights.retain(|i| i.issue_type != issue_type);
        let realized = before - state.insights.len();
        for _ in 0..realized {
            record_outcome_locked(&mut state, issue_type, true);
        }
        if realized > 0 {
            tracing::info!(issue_type = %issue_type, realized, "Predictions realized");
        }
        realized
    }

    /// Live insights, most probable first.
    pub fn insights(&self, now: DateTime<Utc>) -> Vec<PredictiveInsight> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.insights.iter().filter(|i| !i.is_expired(now)).cloned().collect()
    }

    pub fn generate_insights(&self, signals: &PredictionSignals, config: &AutoFixConfig) -> Vec<PredictiveInsight> {
        self.generate_insights_at(signals, config, Utc::now())
    }

    /// One prediction cycle. Returns the insights that are new this cycle.
    pub fn generate_insights_at(
        &self,
        signals: &PredictionSignals,
        config: &AutoFixConfig,
        now: DateTime<Utc>,
    ) -> Vec<PredictiveInsight> {
        let fresh = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            let (expired, live): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.insights).into_iter().partition(|i| i.is_expired(now));
            state.insights = live;
            for insight in &expired {
                record_outcome_locked(&mut state, insight.issue_type, false);
            }

            let live_patterns: BTreeSet<(IssueType, String)> = state
                .insights
                .iter()
                .map(|i| (i.issue_type, i.pattern_id.clone()))
                .collect();

            let mut candidates = Vec::new();
            for model in state.models.values() {
                if !config.is_type_enabled(model.issue_type) {
                    continue;
                }
                for pattern in &model.patterns {
                    if live_patterns.contains(&(model.issue_type, pattern.id.clone())) {
                        continue;
                    }
                    let (satisfied, ratio) = pattern.evaluate(signals);
                    if ratio <= 0.0 {
                        continue;
                    }
                    let confidence = clamp_unit(model.accuracy * ratio);
                    if confidence < config.prediction_confidence_threshold {
                        continue;
                    }
                    let weight = 1.0 / pattern.conditions.len() as f64;
                    let expires_at = now
                        + chrono::Duration::from_std(pattern.timeframe.upper_bound())
                            .unwrap_or_else(|_| chrono::Duration::days(7));
                    candidates.push(PredictiveInsight {
                        id: uuid::Uuid::new_v4().to_string(),
                        issue_type: model.issue_type,
                        pattern_id: pattern.id.clone(),
                        probability: clamp_unit(pattern.base_probability * ratio),
                        confidence,
                        timeframe: pattern.timeframe,
                        triggers: satisfied
                            .iter()
                            .map(|c| Trigger {
                                source: c.describe(),
                                weight,
                            })
                            .collect(),
                        prevention_suggestions: pattern.prevention.clone(),
                        impact: pattern.impact.clone(),
                        created_at: now,
                        expires_at,
                    });
                }
            }

            let new_ids: BTreeSet<String> = candidates.iter().map(|i| i.id.clone()).collect();
            state.insights.extend(candidates);
            state.insights.sort_by(|a, b| {
                b.probability
                    .total_cmp(&a.probability)
                    .then(b.confidence.total_cmp(&a.confidence))
                    .then(a.issue_type.cmp(&b.issue_type))
                    .then(a.pattern_id.cmp(&b.pattern_id))
            });
            state.insights.truncate(config.max_predictions);

            if !expired.is_empty() {
                tracing::debug!(expired = expired.len(), "Purged expired predictions");
            }
            state
                .insights
                .iter()
                .filter(|i| new_ids.contains(&i.id))
                .cloned()
                .collect::<Vec<_>>()
        };

        for insight in &fresh {
            tracing::info!(
                issue_type = %insight.issue_type,
                pattern = %insight.pattern_id,
                probability = insight.probability,
                confidence = insight.confidence,
                "Prediction generated"
            );
            self.bus.publish(AutoFixEvent::PredictionGenerated(insight.clone()));
        }
        fresh
    }
}

fn record_outcome_locked(state: &mut PredictiveState, issue_type: IssueType, occurred: bool) {
    if let Some(model) = state.models.get_mut(&issue_type) {
        model.accuracy = clamp_unit(ema(model.accuracy, if occurred { 1.0 } else { 0.0 }));
    }
}

// ---------------------------------------------------------------------------
// Git signals
// ---------------------------------------------------------------------------

/// `git status --porcelain` output -> changed paths (rename targets included).
pub fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.len() > 3)
        .map(|l| {
            let path = &l[3..];
            match path.split_once(" -> ") {
                Some((_, to)) => to.trim().to_string(),
                None => path.trim().to_string(),
            }
        })
        .collect()
}

fn leading_major(version: &str) -> Option<u64> {
    let digits: String = version
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Parse `"name": "^1.2.3"` (package.json) and `name = "1.2"` (Cargo.toml) lines.
fn manifest_entry(line: &str) -> Option<(String, String)> {
    let line = line.trim().trim_end_matches(',');
    let (name, version) = line.split_once(':').or_else(|| line.split_once('='))?;
    let name = name.trim().trim_matches('"').to_string();
    let version = version.trim().trim_matches('"').to_string();
    if name.is_empty() || name == "version" || leading_major(&version).is_none() {
        return None;
    }
    Some((name, version))
}

/// Derive a dependency diff from a unified diff of manifest files.
pub fn parse_manifest_diff(diff: &str) -> DependencyDiff {
    let mut removed: BTreeMap<String, String> = BTreeMap::new();
    let mut added: BTreeMap<String, String> = BTreeMap::new();
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if let Some(rest) = line.strip_prefix('+') {
            if let Some((name, version)) = manifest_entry(rest) {
                added.insert(name, version);
            }
        } else if let Some(rest) = line.strip_prefix('-') {
            if let Some((name, version)) = manifest_entry(rest) {
                removed.insert(name, version);
            }
        }
    }

    let mut out = DependencyDiff::default();
    for (name, version) in &added {
        match removed.get(name) {
            Some(old) => {
                out.upgraded.push(name.clone());
                if leading_major(version) > leading_major(old) {
                    out.major_bumps.push(name.clone());
                }
            }
            None => out.added.push(name.clone()),
        }
    }
    out.removed = removed.keys().filter(|n| !added.contains_key(*n)).cloned().collect();
    out
}

/// Working-tree changes and manifest diffs from git.
pub struct GitChangeSource {
    workdir: PathBuf,
}

impl GitChangeSource {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, AppError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(AppError::Execution(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl SignalSource for GitChangeSource {
    fn name(&self) -> &str {
        "git"
    }

    async fn collect(&self, signals: &mut PredictionSignals) -> Result<(), AppError> {
        let status = self.git(&["status", "--porcelain"]).await?;
        signals.changed_files = parse_porcelain(&status);

        let manifests = ["package.json", "Cargo.toml"];
        if signals.changed_files.iter().any(|f| manifests.iter().any(|m| f.ends_with(m))) {
            let diff = self
                .git(&["diff", "-U0", "HEAD", "--", "package.json", "Cargo.toml"])
                .await?;
            signals.dependency_diff = parse_manifest_diff(&diff);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AutoFixConfig {
        AutoFixConfig::default()
    }

    fn upgrade_signals() -> PredictionSignals {
        PredictionSignals {
            dependency_diff: DependencyDiff {
                upgraded: vec!["react".into()],
                major_bumps: vec!["react".into()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_conditions_are_deterministic() {
        let signals = PredictionSignals {
            changed_files: vec!["src/types/user.d.ts".into(), ".env.local".into()],
            metrics: BTreeMap::from([("errorRate".to_string(), 0.05)]),
            ..Default::default()
        };
        assert!(Condition::ChangedPath("src/types*".into()).evaluate(&signals));
        assert!(Condition::ChangedExtension(".d.ts".into()).evaluate(&signals));
        assert!(Condition::ChangedPath(".env*".into()).evaluate(&signals));
        assert!(!Condition::ChangedFilesAtLeast(3).evaluate(&signals));
        assert!(Condition::MetricAbove("errorRate".into(), 0.01).evaluate(&signals));
        assert!(!Condition::MetricAbove("missing".into(), 0.0).evaluate(&signals));
        assert!(!Condition::HoursSinceSuccessAbove(1.0).evaluate(&signals));
    }

    #[test]
    fn test_full_match_emits_insight() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let engine = PredictiveEngine::new(bus);
        let now = Utc::now();
        let insights = engine.generate_insights_at(&upgrade_signals(), &config(), now);

        assert_eq!(insights.len(), 1);
        let insight = &insights[0];
        assert_eq!(insight.issue_type, IssueType::Dependency);
        assert!((insight.probability - 0.7).abs() < 1e-9);
        assert!((insight.confidence - INITIAL_ACCURACY).abs() < 1e-9);
        assert_eq!(insight.expires_at - now, chrono::Duration::hours(24));
        assert_eq!(insight.triggers.len(), 2);
        assert!(matches!(sub.try_recv(), Some(AutoFixEvent::PredictionGenerated(_))));
    }

    #[test]
    fn test_partial_match_below_threshold_is_discarded() {
        let engine = PredictiveEngine::new(EventBus::new());
        let signals = PredictionSignals {
            dependency_diff: DependencyDiff {
                upgraded: vec!["react".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        // ratio 0.5 -> confidence 0.35 < 0.5
        assert!(engine.generate_insights_at(&signals, &config(), Utc::now()).is_empty());

        let lenient = AutoFixConfig {
            prediction_confidence_threshold: 0.3,
            ..Default::default()
        };
        let insights = engine.generate_insights_at(&signals, &lenient, Utc::now());
        assert!(!insights.is_empty());
        assert!(insights.iter().all(|i| i.confidence >= 0.3));
    }

    #[test]
    fn test_live_insight_not_duplicated() {
        let engine = PredictiveEngine::new(EventBus::new());
        let now = Utc::now();
        assert_eq!(engine.generate_insights_at(&upgrade_signals(), &config(), now).len(), 1);
        assert!(engine.generate_insights_at(&upgrade_signals(), &config(), now).is_empty());
        assert_eq!(engine.insights(now).len(), 1);
    }

    #[test]
    fn test_expiry_lowers_accuracy_and_realization_raises_it() {
        let engine = PredictiveEngine::new(EventBus::new());
        let now = Utc::now();
        engine.generate_insights_at(&upgrade_signals(), &config(), now);

        let later = now + chrono::Duration::hours(25);
        engine.generate_insights_at(&PredictionSignals::default(), &config(), later);
        assert!(engine.insights(later).is_empty());
        let after_miss = engine.accuracy(IssueType::Dependency);
        assert!(after_miss < INITIAL_ACCURACY);

        engine.generate_insights_at(&upgrade_signals(), &AutoFixConfig {
            prediction_confidence_threshold: 0.1,
            ..Default::default()
        }, later);
        assert_eq!(engine.realize(IssueType::Dependency), 1);
        assert!(engine.accuracy(IssueType::Dependency) > after_miss);
    }

    #[test]
    fn test_cap_and_ordering() {
        let engine = PredictiveEngine::new(EventBus::new());
        let signals = PredictionSignals {
            changed_files: (0..10).map(|i| format!("config/{i}.json")).collect(),
            dependency_diff: DependencyDiff {
                added: vec!["left-pad".into()],
                upgraded: vec!["react".into()],
                major_bumps: vec!["react".into()],
                ..Default::default()
            },
            metrics: BTreeMap::from([("errorRate".to_string(), 0.5), ("bundleSizeGrowth".to_string(), 0.4)]),
            ..Default::default()
        };
        let capped = AutoFixConfig {
            max_predictions: 2,
            ..Default::default()
        };
        let insights = engine.generate_insights_at(&signals, &capped, Utc::now());
        assert_eq!(insights.len(), 2);
        assert!(insights[0].probability >= insights[1].probability);
    }

    #[test]
    fn test_parse_porcelain() {
        let files = parse_porcelain(" M src/a.ts\n?? new.rs\nR  old.rs -> renamed.rs\n");
        assert_eq!(files, vec!["src/a.ts", "new.rs", "renamed.rs"]);
    }

    #[test]
    fn test_parse_manifest_diff() {
        let diff = r#"--- a/package.json
+++ b/package.json
@@ -5,2 +5,3 @@
-    "react": "^17.0.2",
+    "react": "^18.2.0",
-    "lodash": "4.17.20",
+    "lodash": "4.17.21",
+    "zod": "^3.22.0",
-    "moment": "2.29.0"
"#;
        let d = parse_manifest_diff(diff);
        assert_eq!(d.added, vec!["zod"]);
        assert_eq!(d.removed, vec!["moment"]);
        assert_eq!(d.upgraded, vec!["lodash", "react"]);
        assert_eq!(d.major_bumps, vec!["react"]);
    }
}
