pub mod analyzer;
pub mod background;
pub mod bus;
pub mod detector;
pub mod executor;
pub mod gate;
pub mod generator;
pub mod history;
pub mod inflight;
pub mod learner;
pub mod predictive;
pub mod rate_limiter;
pub mod subscription;
pub mod types;
pub mod validator;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::task::TaskTracker;

use crate::config::AutoFixConfig;
use crate::db::models::MonitoringCounters;
use crate::db::repos::{fix_history as history_repo, learning as learning_repo};
use crate::db::repos::{monitoring as monitoring_repo, predictions as prediction_repo};
use crate::db::DbPool;
use crate::error::AppError;

use self::analyzer::RootCauseAnalyzer;
use self::background::LoopState;
use self::bus::{AutoFixEvent, EventBus, EventSubscription};
use self::detector::{DetectionSource, Ingested, IssueDetector, IssueReport};
use self::executor::{ExecutionError, RecordingExecutor, StepExecutor};
use self::gate::GateViolation;
use self::generator::{FixGenerator, StrategyTemplate};
use self::history::FixHistory;
use self::inflight::{InFlightArena, IssueToken};
use self::learner::FixLearner;
use self::predictive::{PredictionModel, PredictionSignals, PredictiveEngine, SignalSource};
use self::types::{
    AppliedChange, FixError, FixResult, FixStatus, FixStep, FixStrategy, HealthStatus, Issue,
    IssueType, MonitoringState, PredictiveInsight, RootCauseAnalysisResult, Severity,
};
use self::validator::{CommandTestRunner, FixValidator, Redetector, TestRunner, ValidationOutcome};

/// Initial retry backoff (doubles each retry: 200ms → 400ms → 800ms).
const RETRY_INITIAL_BACKOFF_MS: u64 = 200;
/// Window for the per-type recent issue counts fed to the predictive engine.
const RECENT_WINDOW_HOURS: i64 = 24;
/// Terminal fixes needed before a low success rate makes the system critical.
const CRITICAL_MIN_SAMPLES: u64 = 4;

pub const REQUIRES_APPROVAL: &str = "requires_approval";

// =============================================================================
// Health
// =============================================================================

/// Health from the current counters and issue set.
pub fn derive_health(
    monitoring: bool,
    enabled: bool,
    counters: &MonitoringCounters,
    active: &[Issue],
    high_awaiting_approval: bool,
) -> HealthStatus {
    if !monitoring || !enabled {
        return HealthStatus::Offline;
    }
    let rate = counters.success_rate();
    if (counters.fixes_attempted >= CRITICAL_MIN_SAMPLES && rate < 0.5)
        || active.iter().any(|i| i.severity == Severity::Critical)
    {
        return HealthStatus::Critical;
    }
    if (counters.fixes_attempted > 0 && rate < 0.8) || high_awaiting_approval {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

struct MonitorState {
    counters: MonitoringCounters,
    health: HealthStatus,
    last_check: Option<DateTime<Utc>>,
    /// issue_id -> severity for issues whose best strategy was escalated.
    awaiting_approval: HashMap<String, Severity>,
}

// =============================================================================
// AutoFixManager
// =============================================================================

/// Root of the pipeline and the only writer of history and monitoring state.
pub struct AutoFixManager {
    config: RwLock<Arc<AutoFixConfig>>,
    bus: EventBus,
    detector: Arc<IssueDetector>,
    analyzer: RootCauseAnalyzer,
    generator: FixGenerator,
    executor: Arc<dyn StepExecutor>,
    validator: FixValidator,
    learner: Arc<FixLearner>,
    predictive: Arc<PredictiveEngine>,
    arena: Arc<InFlightArena>,
    history: Mutex<FixHistory>,
    monitor: Mutex<MonitorState>,
    signal_sources: Vec<Arc<dyn SignalSource>>,
    pool: Option<DbPool>,
    tracker: TaskTracker,
    loops: LoopState,
    accepting: AtomicBool,
}

impl AutoFixManager {
    pub fn builder(config: AutoFixConfig) -> AutoFixManagerBuilder {
        AutoFixManagerBuilder::new(config)
    }

    pub fn config(&self) -> Arc<AutoFixConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self, filters: &[&str]) -> EventSubscription {
        self.bus
            .subscribe_filtered(filters.iter().map(|f| f.to_string()).collect())
    }

    pub fn detector(&self) -> &Arc<IssueDetector> {
        &self.detector
    }

    pub fn learner(&self) -> &Arc<FixLearner> {
        &self.learner
    }

    pub fn predictive(&self) -> &Arc<PredictiveEngine> {
        &self.predictive
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Intake
    // -------------------------------------------------------------------------

    /// Ingest one report; a newly seen issue is handled in the background.
    pub fn submit_report(self: &Arc<Self>, report: IssueReport) -> Option<Issue> {
        if !self.is_accepting() {
            tracing::warn!("Manager is shutting down, report ignored");
            return None;
        }
        let ingested = self.detector.ingest(report);
        self.admit(ingested)
    }

    /// Same as [`Self::submit_report`] for one raw JSON line.
    pub fn submit_json(self: &Arc<Self>, raw: &str) -> Option<Issue> {
        if !self.is_accepting() {
            tracing::warn!("Manager is shutting down, report ignored");
            return None;
        }
        let ingested = self.detector.ingest_json(raw);
        self.admit(ingested)
    }

    fn admit(self: &Arc<Self>, ingested: Option<Ingested>) -> Option<Issue> {
        match ingested? {
            Ingested::New(issue) => {
                self.note_detected(std::slice::from_ref(&issue));
                self.spawn_handle(issue.clone());
                Some(issue)
            }
            Ingested::Refreshed(issue) => Some(issue),
        }
    }

    pub(crate) fn note_detected(&self, issues: &[Issue]) {
        if issues.is_empty() {
            return;
        }
        {
            let mut monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
            monitor.counters.issues_detected += issues.len() as u64;
        }
        for issue in issues {
            self.predictive.realize(issue.issue_type);
        }
    }

    pub(crate) fn note_check(&self) {
        let mut monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        monitor.last_check = Some(Utc::now());
    }

    pub(crate) fn spawn_handle(self: &Arc<Self>, issue: Issue) {
        if !self.is_accepting() {
            return;
        }
        let manager = Arc::clone(self);
        self.tracker.spawn(async move {
            manager.handle_issue(issue).await;
        });
    }

    /// Wait until every fix task spawned so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        if self.is_accepting() {
            self.tracker.reopen();
        }
    }

    // -------------------------------------------------------------------------
    // Fix pipeline
    // -------------------------------------------------------------------------

    /// Analyze, generate, then attempt strategies in rank order until one
    /// reaches a final state that is not worth retrying.
    /// `None` when nothing was attempted (issue gone or no strategy).
    pub async fn handle_issue(&self, issue: Issue) -> Option<FixResult> {
        let token = self.arena.acquire(&issue.id).await;

        // Resolved while we waited for the previous attempt
        if !self.detector.is_active(&issue.id) {
            tracing::debug!(issue_id = %issue.id, "Issue no longer active, skipping");
            return None;
        }
        let issue = self.detector.get(&issue.id).unwrap_or(issue);
        let config = self.config();

        let analysis = self.analyzer.analyze(&issue, &config).await;
        let strategies = self
            .generator
            .generate_strategies(&issue, &analysis, config.max_strategies);
        if strategies.is_empty() {
            return None;
        }

        let max_retries = config.max_retries(issue.issue_type);
        let mut backoff_ms = RETRY_INITIAL_BACKOFF_MS;
        let mut attempt: u32 = 0;
        loop {
            let strategy = &strategies[(attempt as usize).min(strategies.len() - 1)];
            attempt += 1;
            let result = self
                .run_attempt(&token, &issue, strategy, &analysis, &config, attempt)
                .await;

            let retryable = !result.success
                && result.status.is_outcome()
                && result.error.as_ref().is_some_and(|e| e.recoverable);
            if !retryable || attempt > max_retries {
                return Some(result);
            }

            tracing::warn!(
                issue_id = %issue.id,
                attempt,
                max_attempts = max_retries + 1,
                backoff_ms,
                "Fix attempt failed, retrying",
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2;
        }
    }

    async fn run_attempt(
        &self,
        token: &IssueToken,
        issue: &Issue,
        strategy: &FixStrategy,
        analysis: &RootCauseAnalysisResult,
        config: &AutoFixConfig,
        attempt: u32,
    ) -> FixResult {
        let mut result = FixResult::pending(issue, strategy, Some(analysis.category), attempt);
        result
            .metrics
            .insert("strategy_confidence".into(), strategy.confidence);
        result
            .metrics
            .insert("analysis_confidence".into(), analysis.confidence);
        result.metrics.insert(
            "analysis_accuracy".into(),
            self.learner.analysis_accuracy(issue.issue_type),
        );

        let mut violations =
            gate::admission_check(issue, strategy, config, self.arena.applying_count());
        let mut permit = None;
        if violations.is_empty() {
            // The arena is the authority on the applying bound
            match self
                .arena
                .try_begin_applying(token, &result.id, config.max_concurrent_fixes)
            {
                Ok(p) => permit = Some(p),
                Err(applying) => violations.push(GateViolation::ConcurrencyLimit {
                    applying,
                    max: config.max_concurrent_fixes,
                }),
            }
        }
        let Some(_permit) = permit else {
            return self.escalate(issue, strategy, result, &violations, config);
        };

        advance(&mut result, FixStatus::Applying);
        tracing::info!(
            issue_id = %issue.id,
            fix_id = %result.id,
            strategy = %strategy.template_id,
            confidence = strategy.confidence,
            attempt,
            "Applying fix",
        );
        self.bus.publish(AutoFixEvent::FixStarted {
            issue: issue.clone(),
            strategy: strategy.clone(),
        });

        let fixing = config.timeouts.fixing();
        let executed =
            match tokio::time::timeout(fixing, self.execute_steps(&strategy.steps, &mut result.changes))
                .await
            {
                Ok(r) => r,
                Err(_) => Err(ExecutionError::Timeout(fixing.as_millis() as u64)),
            };
        result.applied = !result.changes.is_empty();

        match executed {
            Err(e) => {
                tracing::warn!(issue_id = %issue.id, fix_id = %result.id, error = %e, "Fix execution failed");
                let error = FixError::new(e.code(), e.to_string(), e.recoverable());
                self.fail(strategy, &mut result, error, config).await;
            }
            Ok(()) => {
                let validation = config.timeouts.validation();
                let outcome = tokio::time::timeout(
                    validation,
                    self.validator.validate_fix(&result, strategy, issue, config),
                )
                .await
                .unwrap_or_else(|_| ValidationOutcome::timed_out(validation));
                result.tests_run = outcome.tests_run;

                match outcome.error {
                    None if outcome.success => {
                        advance(&mut result, FixStatus::Applied);
                        result.success = true;
                        self.executor.commit(&result.changes).await;
                        self.detector.resolve(&issue.id);
                    }
                    error => {
                        let error = error.unwrap_or_else(|| {
                            FixError::new("validation_failed", "validator reported failure", true)
                        });
                        tracing::warn!(issue_id = %issue.id, fix_id = %result.id, error = %error, "Fix validation failed");
                        self.fail(strategy, &mut result, error, config).await;
                    }
                }
            }
        }

        result.finish();
        self.record_terminal(issue, &result, config);
        if result.success {
            tracing::info!(issue_id = %issue.id, fix_id = %result.id, elapsed_ms = result.execution_time_ms, "Fix applied");
            self.bus.publish(AutoFixEvent::FixCompleted(result.clone()));
        } else {
            self.bus.publish(AutoFixEvent::FixFailed(result.clone()));
        }
        result
    }

    /// Gate refused: the result stays pending and a human is asked.
    fn escalate(
        &self,
        issue: &Issue,
        strategy: &FixStrategy,
        mut result: FixResult,
        violations: &[GateViolation],
        config: &AutoFixConfig,
    ) -> FixResult {
        let reasons: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
        tracing::info!(
            issue_id = %issue.id,
            strategy = %strategy.template_id,
            reasons = ?reasons,
            "Fix requires approval",
        );
        result.error = Some(FixError::new(REQUIRES_APPROVAL, reasons.join("; "), false));
        result.finish();
        self.record_terminal(issue, &result, config);
        self.bus.publish(AutoFixEvent::FixRequiresApproval {
            issue: issue.clone(),
            strategy: strategy.clone(),
            reasons,
        });
        result
    }

    async fn execute_steps(
        &self,
        steps: &[FixStep],
        changes: &mut Vec<AppliedChange>,
    ) -> Result<(), ExecutionError> {
        for (index, step) in steps.iter().enumerate() {
            let change = self.executor.execute(step, index).await?;
            tracing::debug!(step = index, action = step.action.as_str(), target = %step.target, "Step applied");
            changes.push(change);
        }
        Ok(())
    }

    /// Rollback-or-fail path shared by execution and validation failures.
    async fn fail(
        &self,
        strategy: &FixStrategy,
        result: &mut FixResult,
        error: FixError,
        config: &AutoFixConfig,
    ) {
        result.error = Some(error);
        if !config.rollback_on_failure {
            advance(result, FixStatus::Failed);
            self.executor.discard(&strategy.steps).await;
            return;
        }

        let mut failed_steps = 0usize;
        let steps = &strategy.rollback_steps;
        let rollback = async {
            for (index, step) in steps.iter().enumerate() {
                if let Err(e) = self.executor.execute(step, index).await {
                    failed_steps += 1;
                    tracing::warn!(fix_id = %result.id, step = index, error = %e, "Rollback step failed");
                }
            }
        };
        if tokio::time::timeout(config.timeouts.fixing(), rollback).await.is_err() {
            tracing::error!(fix_id = %result.id, "Rollback timed out");
            result.metrics.insert("rollback_timed_out".into(), 1.0);
        }
        result
            .metrics
            .insert("rollback_steps_failed".into(), failed_steps as f64);
        result.rollback_required = true;
        advance(result, FixStatus::RolledBack);
        self.executor.discard(&strategy.steps).await;
    }

    fn record_terminal(&self, issue: &Issue, result: &FixResult, config: &AutoFixConfig) {
        let evicted = self
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(result.clone());
        if !evicted.is_empty() {
            tracing::debug!(evicted = evicted.len(), "Fix history at capacity");
        }
        self.learner.record_fix_result(result);

        let counters = {
            let mut monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
            if result.status.is_outcome() {
                monitor.counters.fixes_attempted += 1;
                monitor.counters.total_fix_time_ms += result.execution_time_ms;
                if result.success {
                    monitor.counters.fixes_applied += 1;
                    monitor.counters.last_success_at = Some(Utc::now().to_rfc3339());
                }
                monitor.awaiting_approval.remove(&issue.id);
            } else {
                monitor
                    .awaiting_approval
                    .insert(issue.id.clone(), issue.severity);
            }
            monitor.counters.clone()
        };

        if let Some(pool) = &self.pool {
            if let Err(e) = history_repo::append(pool, result, config.history_cap) {
                tracing::error!(fix_id = %result.id, error = %e, "Failed to persist fix result");
            }
            if let Err(e) = monitoring_repo::save(pool, &counters) {
                tracing::error!(error = %e, "Failed to persist monitoring counters");
            }
            if result.status.is_outcome() {
                if let Err(e) = learning_repo::save_snapshot(pool, &self.learner.snapshot()) {
                    tracing::error!(error = %e, "Failed to persist learner statistics");
                }
            }
        }
        self.refresh_health();
    }

    // -------------------------------------------------------------------------
    // Monitoring
    // -------------------------------------------------------------------------

    /// Start the detection and prediction loops. No-op if already running.
    pub fn start_monitoring(self: &Arc<Self>) {
        if background::start_loops(self) {
            self.refresh_health();
        }
    }

    pub async fn stop_monitoring(&self) {
        self.loops.stop().await;
        self.refresh_health();
    }

    /// Recompute health; a change emits `status:changed`.
    pub(crate) fn refresh_health(&self) {
        let config = self.config();
        let active = self.detector.active_issues();
        let active_ids: HashSet<&str> = active.iter().map(|i| i.id.as_str()).collect();
        let running = self.loops.is_running();

        let (previous, current) = {
            let mut monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
            monitor
                .awaiting_approval
                .retain(|id, _| active_ids.contains(id.as_str()));
            let high_waiting = monitor
                .awaiting_approval
                .values()
                .any(|s| *s >= Severity::High);
            let current = derive_health(running, config.enabled, &monitor.counters, &active, high_waiting);
            (std::mem::replace(&mut monitor.health, current), current)
        };

        if previous != current {
            tracing::info!(previous = ?previous, current = ?current, "Health status changed");
            self.bus
                .publish(AutoFixEvent::StatusChanged { previous, current });
        }
    }

    /// Signals derived from our own history and learner.
    pub(crate) fn history_signals(&self) -> PredictionSignals {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::hours(RECENT_WINDOW_HOURS);

        let mut recent_issue_counts: BTreeMap<IssueType, u32> = BTreeMap::new();
        {
            let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            for entry in history.iter().filter(|r| r.started_at >= cutoff) {
                *recent_issue_counts.entry(entry.issue_type).or_insert(0) += 1;
            }
        }
        let failure_rates = IssueType::ALL
            .into_iter()
            .map(|t| (t, self.learner.failure_rate(t)))
            .collect();

        let hours_since_last_success = {
            let monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
            monitor
                .counters
                .last_success_at
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| (now - ts.with_timezone(&Utc)).num_minutes().max(0) as f64 / 60.0)
        };

        PredictionSignals {
            recent_issue_counts,
            failure_rates,
            hours_since_last_success,
            ..Default::default()
        }
    }

    pub(crate) fn signal_sources(&self) -> &[Arc<dyn SignalSource>] {
        &self.signal_sources
    }

    pub(crate) fn persist_prediction_accuracy(&self) {
        let Some(pool) = &self.pool else { return };
        for (issue_type, accuracy) in self.predictive.accuracies() {
            if let Err(e) = prediction_repo::upsert_accuracy(pool, issue_type.as_str(), accuracy) {
                tracing::error!(issue_type = %issue_type, error = %e, "Failed to persist prediction accuracy");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries & configuration
    // -------------------------------------------------------------------------

    pub fn get_status(&self) -> MonitoringState {
        let running = self.loops.is_running();
        let mut active_monitors = self.loops.active_names();
        if running {
            active_monitors.extend(self.detector.source_names());
        }
        let (history_len, history_cap) = {
            let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            (history.len(), history.cap())
        };
        let monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        MonitoringState {
            enabled: running && self.config().enabled,
            last_check: monitor.last_check,
            issues_detected: monitor.counters.issues_detected,
            fixes_applied: monitor.counters.fixes_applied,
            success_rate: monitor.counters.success_rate(),
            average_fix_time_ms: monitor.counters.average_fix_time_ms(),
            active_monitors,
            health_status: monitor.health,
            fixes_in_flight: self.arena.in_flight_count(),
            fixes_applying: self.arena.applying_count(),
            history_len,
            history_cap,
        }
    }

    pub fn get_active_issues(&self) -> Vec<Issue> {
        self.detector.active_issues()
    }

    /// Newest first.
    pub fn get_fix_history(&self, limit: Option<usize>) -> Vec<FixResult> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recent(limit)
    }

    pub fn get_predictive_insights(&self) -> Vec<PredictiveInsight> {
        self.predictive.insights(Utc::now())
    }

    /// Validate and swap. On error the previous configuration stays in force.
    pub fn update_config(&self, next: AutoFixConfig) -> Result<(), AppError> {
        if let Err(e) = next.validate() {
            tracing::warn!(error = %e, "Rejected configuration update");
            return Err(e);
        }
        let evicted = self
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_cap(next.history_cap);
        if !evicted.is_empty() {
            tracing::info!(evicted = evicted.len(), cap = next.history_cap, "History cap lowered");
        }

        let next = Arc::new(next);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&next);
        tracing::info!("Configuration updated");
        self.bus
            .publish(AutoFixEvent::ConfigUpdated(Box::new((*next).clone())));
        self.refresh_health();
        Ok(())
    }

    /// Stop accepting work, drain in-flight fixes, stop the loops, persist.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::Relaxed);
        tracing::info!("Shutting down, draining in-flight fixes");
        self.tracker.close();
        self.tracker.wait().await;
        self.loops.stop().await;
        self.persist_state();
        self.refresh_health();
        tracing::info!("Shutdown complete");
    }

    fn persist_state(&self) {
        let Some(pool) = &self.pool else { return };
        let counters = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .counters
            .clone();
        if let Err(e) = monitoring_repo::save(pool, &counters) {
            tracing::error!(error = %e, "Failed to persist monitoring counters");
        }
        if let Err(e) = learning_repo::save_snapshot(pool, &self.learner.snapshot()) {
            tracing::error!(error = %e, "Failed to persist learner statistics");
        }
        self.persist_prediction_accuracy();
    }
}

/// Lifecycle moves are checked; an illegal one is a bug, logged not panicked.
fn advance(result: &mut FixResult, next: FixStatus) {
    if let Err(e) = result.transition(next) {
        tracing::error!(fix_id = %result.id, error = %e, "Lifecycle violation");
    }
}

// =============================================================================
// Builder
// =============================================================================

pub struct AutoFixManagerBuilder {
    config: AutoFixConfig,
    bus: EventBus,
    executor: Option<Arc<dyn StepExecutor>>,
    test_runner: Option<Arc<dyn TestRunner>>,
    redetector: Option<Arc<dyn Redetector>>,
    sources: Vec<Arc<dyn DetectionSource>>,
    signal_sources: Vec<Arc<dyn SignalSource>>,
    templates: Option<Vec<StrategyTemplate>>,
    models: Option<Vec<PredictionModel>>,
    pool: Option<DbPool>,
    workdir: PathBuf,
}

impl AutoFixManagerBuilder {
    pub fn new(config: AutoFixConfig) -> Self {
        Self {
            config,
            bus: EventBus::new(),
            executor: None,
            test_runner: None,
            redetector: None,
            sources: Vec::new(),
            signal_sources: Vec::new(),
            templates: None,
            models: None,
            pool: None,
            workdir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Defaults to a dry-run [`RecordingExecutor`].
    pub fn executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Defaults to `config.test_command` run in the working directory, if set.
    pub fn test_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.test_runner = Some(runner);
        self
    }

    /// Defaults to re-polling the issue's detection source.
    pub fn redetector(mut self, redetector: Arc<dyn Redetector>) -> Self {
        self.redetector = Some(redetector);
        self
    }

    pub fn source(mut self, source: Arc<dyn DetectionSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn signal_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.signal_sources.push(source);
        self
    }

    /// Replace the built-in strategy templates.
    pub fn templates(mut self, templates: Vec<StrategyTemplate>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Replace the built-in prediction models.
    pub fn models(mut self, models: Vec<PredictionModel>) -> Self {
        self.models = Some(models);
        self
    }

    /// Persist history and learning to this pool and restore from it now.
    pub fn pool(mut self, pool: DbPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn build(self) -> Result<Arc<AutoFixManager>, AppError> {
        self.config.validate()?;
        let config = self.config;

        let learner = Arc::new(FixLearner::new());
        let detector = Arc::new(IssueDetector::new(self.bus.clone()));
        for source in self.sources {
            detector.add_source(source);
        }
        let generator = match self.templates {
            Some(templates) => FixGenerator::with_templates(Arc::clone(&learner), templates),
            None => FixGenerator::new(Arc::clone(&learner)),
        };
        let predictive = Arc::new(match self.models {
            Some(models) => PredictiveEngine::with_models(self.bus.clone(), models),
            None => PredictiveEngine::new(self.bus.clone()),
        });

        let test_runner = self.test_runner.or_else(|| {
            config.test_command.as_ref().map(|cmd| {
                Arc::new(CommandTestRunner::new(cmd.clone(), self.workdir.clone())) as Arc<dyn TestRunner>
            })
        });
        let redetector = self
            .redetector
            .unwrap_or_else(|| Arc::clone(&detector) as Arc<dyn Redetector>);
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(RecordingExecutor::new()));

        let mut history = FixHistory::new(config.history_cap);
        let mut counters = MonitoringCounters::default();
        if let Some(pool) = &self.pool {
            for result in history_repo::load(pool, config.history_cap)? {
                history.push(result);
            }
            if let Some(saved) = monitoring_repo::load(pool)? {
                counters = saved;
            }
            learner.restore(learning_repo::load_snapshot(pool)?);
            for row in prediction_repo::get_all(pool)? {
                if let Some(issue_type) = IssueType::parse(&row.issue_type) {
                    predictive.restore_accuracy(issue_type, row.accuracy);
                }
            }
            tracing::info!(history = history.len(), "Restored persisted state");
        }

        Ok(Arc::new(AutoFixManager {
            config: RwLock::new(Arc::new(config)),
            bus: self.bus,
            analyzer: RootCauseAnalyzer::new(Arc::clone(&learner)),
            generator,
            executor,
            validator: FixValidator::new(test_runner, Some(redetector)),
            learner,
            predictive,
            detector,
            arena: InFlightArena::new(),
            history: Mutex::new(history),
            monitor: Mutex::new(MonitorState {
                counters,
                health: HealthStatus::Offline,
                last_check: None,
                awaiting_approval: HashMap::new(),
            }),
            signal_sources: self.signal_sources,
            pool: self.pool,
            tracker: TaskTracker::new(),
            loops: LoopState::new(),
            accepting: AtomicBool::new(true),
        }))
    }
}
