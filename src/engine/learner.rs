//! Bounded reinforcement from fix outcomes.
//!
//! Nothing here is a trained model: every statistic is an exponential moving
//! average over success/failure samples, read back as a confidence multiplier
//! (generator), an accuracy scalar (analyzer) or a failure rate (predictor).

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::types::{FixResult, IssueType, RootCauseCategory};

pub const EMA_ALPHA: f64 = 0.2;
pub const EMA_SEED: f64 = 0.5;

pub const MIN_STRATEGY_FACTOR: f64 = 0.5;
pub const MAX_STRATEGY_FACTOR: f64 = 1.2;

pub fn ema(previous: f64, sample: f64) -> f64 {
    previous + EMA_ALPHA * (sample - previous)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub attempts: u64,
    pub successes: u64,
    pub success_ema: f64,
}

impl Default for OutcomeStats {
    fn default() -> Self {
        Self {
            attempts: 0,
            successes: 0,
            success_ema: EMA_SEED,
        }
    }
}

impl OutcomeStats {
    fn record(&mut self, success: bool) {
        self.attempts += 1;
        if success {
            self.successes += 1;
        }
        self.success_ema = ema(self.success_ema, if success { 1.0 } else { 0.0 });
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeStats {
    pub outcomes: OutcomeStats,
    /// Root-cause categories behind successful fixes.
    pub confirmed_categories: BTreeMap<RootCauseCategory, u64>,
}

/// What the analyzer may learn from history about one issue type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeOutlook {
    pub samples: u64,
    pub accuracy: f64,
    pub dominant_category: Option<RootCauseCategory>,
}

impl Default for TypeOutlook {
    fn default() -> Self {
        Self {
            samples: 0,
            accuracy: EMA_SEED,
            dominant_category: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub template_id: String,
    pub issue_type: IssueType,
    pub stats: OutcomeStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRecord {
    pub issue_type: IssueType,
    pub stats: TypeStats,
}

/// Serializable copy of everything learned so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnerSnapshot {
    pub strategies: Vec<StrategyRecord>,
    pub types: Vec<TypeRecord>,
}

#[derive(Default)]
struct LearnerState {
    strategies: HashMap<(String, IssueType), OutcomeStats>,
    types: HashMap<IssueType, TypeStats>,
}

#[derive(Default)]
pub struct FixLearner {
    state: Mutex<LearnerState>,
}

impl FixLearner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a terminal result. Results that never ran (gate refusals) teach nothing.
    pub fn record_fix_result(&self, result: &FixResult) {
        if !result.status.is_outcome() {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .strategies
            .entry((result.template_id.clone(), result.issue_type))
            .or_default()
            .record(result.success);

        let type_stats = state.types.entry(result.issue_type).or_default();
        type_stats.outcomes.record(result.success);
        if result.success {
            if let Some(category) = result.root_cause {
                *type_stats.confirmed_categories.entry(category).or_insert(0) += 1;
            }
        }
        tracing::debug!(
            template = %result.template_id,
            issue_type = %result.issue_type,
            success = result.success,
            "Recorded fix outcome"
        );
    }

    /// Confidence multiplier in `[0.5, 1.2]`; exactly 1.0 until a sample exists.
    /// The seed EMA (0.5) maps to 1.0, a perfect record to 1.2, a hopeless one to 0.5.
    pub fn strategy_factor(&self, template_id: &str, issue_type: IssueType) -> f64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.strategies.get(&(template_id.to_string(), issue_type)) {
            Some(stats) if stats.attempts > 0 => {
                let e = stats.success_ema;
                let factor = if e >= EMA_SEED {
                    1.0 + 0.4 * (e - EMA_SEED)
                } else {
                    MIN_STRATEGY_FACTOR + e
                };
                factor.clamp(MIN_STRATEGY_FACTOR, MAX_STRATEGY_FACTOR)
            }
            _ => 1.0,
        }
    }

    pub fn analysis_accuracy(&self, issue_type: IssueType) -> f64 {
        self.outlook(issue_type).accuracy
    }

    pub fn outlook(&self, issue_type: IssueType) -> TypeOutlook {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.types.get(&issue_type) {
            Some(stats) => TypeOutlook {
                samples: stats.outcomes.attempts,
                accuracy: stats.outcomes.success_ema,
                dominant_category: stats
                    .confirmed_categories
                    .iter()
                    // ties resolve to the lowest category for determinism
                    .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                    .map(|(c, _)| *c),
            },
            None => TypeOutlook::default(),
        }
    }

    /// Recent failure rate for a type; 0.0 with no samples.
    pub fn failure_rate(&self, issue_type: IssueType) -> f64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .types
            .get(&issue_type)
            .filter(|s| s.outcomes.attempts > 0)
            .map_or(0.0, |s| 1.0 - s.outcomes.success_ema)
    }

    pub fn snapshot(&self) -> LearnerSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut strategies: Vec<StrategyRecord> = state
            .strategies
            .iter()
            .map(|((template_id, issue_type), stats)| StrategyRecord {
                template_id: template_id.clone(),
                issue_type: *issue_type,
                stats: stats.clone(),
            })
            .collect();
        strategies.sort_by(|a, b| {
            a.template_id
                .cmp(&b.template_id)
                .then(a.issue_type.cmp(&b.issue_type))
        });
        let mut types: Vec<TypeRecord> = state
            .types
            .iter()
            .map(|(issue_type, stats)| TypeRecord {
                issue_type: *issue_type,
                stats: stats.clone(),
            })
            .collect();
        types.sort_by_key(|r| r.issue_type);
        LearnerSnapshot { strategies, types }
    }

    /// Replace all state with a previously taken snapshot.
    pub fn restore(&self, snapshot: LearnerSnapshot) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.strategies = snapshot
            .strategies
            .into_iter()
            .map(|r| ((r.template_id, r.issue_type), r.stats))
            .collect();
        state.types = snapshot
            .types
            .into_iter()
            .map(|r| (r.issue_type, r.stats))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::FixStatus;

    fn result(template: &str, issue_type: IssueType, status: FixStatus) -> FixResult {
        FixResult {
            id: uuid::Uuid::new_v4().to_string(),
            issue_id: "iss-1".into(),
            issue_type,
            strategy_id: format!("{template}:iss-1"),
            template_id: template.into(),
            strategy_name: template.into(),
            root_cause: Some(RootCauseCategory::MissingDependency),
            status,
            applied: status == FixStatus::Applied,
            success: status == FixStatus::Applied,
            started_at: chrono::Utc::now(),
            ended_at: None,
            execution_time_ms: 0,
            changes: vec![],
            tests_run: vec![],
            rollback_required: false,
            error: None,
            metrics: Default::default(),
            attempt: 1,
        }
    }

    #[test]
    fn test_ema_moves_towards_sample() {
        assert!((ema(0.5, 1.0) - 0.6).abs() < 1e-9);
        assert!((ema(0.5, 0.0) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_factor_is_neutral_without_samples() {
        let learner = FixLearner::new();
        assert_eq!(learner.strategy_factor("install-dependency", IssueType::Dependency), 1.0);
        assert_eq!(learner.failure_rate(IssueType::Dependency), 0.0);
    }

    #[test]
    fn test_factor_stays_bounded() {
        let learner = FixLearner::new();
        for _ in 0..50 {
            learner.record_fix_result(&result("a", IssueType::Lint, FixStatus::Applied));
            learner.record_fix_result(&result("b", IssueType::Lint, FixStatus::Failed));
        }
        let good = learner.strategy_factor("a", IssueType::Lint);
        let bad = learner.strategy_factor("b", IssueType::Lint);
        assert!(good > 1.0 && good <= MAX_STRATEGY_FACTOR);
        assert!(bad < 1.0 && bad >= MIN_STRATEGY_FACTOR);
        // Stats are per issue type
        assert_eq!(learner.strategy_factor("a", IssueType::Test), 1.0);
    }

    #[test]
    fn test_pending_results_are_ignored() {
        let learner = FixLearner::new();
        learner.record_fix_result(&result("a", IssueType::Lint, FixStatus::Pending));
        assert_eq!(learner.outlook(IssueType::Lint).samples, 0);
    }

    #[test]
    fn test_outlook_tracks_confirmed_category() {
        let learner = FixLearner::new();
        learner.record_fix_result(&result("a", IssueType::Dependency, FixStatus::Applied));
        learner.record_fix_result(&result("a", IssueType::Dependency, FixStatus::RolledBack));
        let outlook = learner.outlook(IssueType::Dependency);
        assert_eq!(outlook.samples, 2);
        assert_eq!(outlook.dominant_category, Some(RootCauseCategory::MissingDependency));
        assert!(learner.failure_rate(IssueType::Dependency) > 0.0);
    }

    #[test]
    fn test_snapshot_restore() {
        let learner = FixLearner::new();
        learner.record_fix_result(&result("a", IssueType::Lint, FixStatus::Applied));
        let snap = learner.snapshot();
        let fresh = FixLearner::new();
        fresh.restore(snap.clone());
        assert_eq!(fresh.snapshot(), snap);
        assert_eq!(
            fresh.strategy_factor("a", IssueType::Lint),
            learner.strategy_factor("a", IssueType::Lint)
        );
    }
}
