use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::subscription::{
    spawn_subscriptions, DetectionSubscription, PredictionSubscription, ReactiveSubscription,
};
use super::AutoFixManager;

struct LoopHandle {
    token: CancellationToken,
    tracker: TaskTracker,
}

/// Runtime state of the background loops, owned by the manager.
pub struct LoopState {
    running: AtomicBool,
    handle: Mutex<Option<LoopHandle>>,
    names: Mutex<Vec<&'static str>>,
    detection_ticks: AtomicU64,
    prediction_ticks: AtomicU64,
    insights_generated: AtomicU64,
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
            names: Mutex::new(Vec::new()),
            detection_ticks: AtomicU64::new(0),
            prediction_ticks: AtomicU64::new(0),
            insights_generated: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Names of the running loops, empty when stopped.
    pub fn active_names(&self) -> Vec<String> {
        if !self.is_running() {
            return Vec::new();
        }
        self.names
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|n| n.to_string())
            .collect()
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            running: self.is_running(),
            detection_ticks: self.detection_ticks.load(Ordering::Relaxed),
            prediction_ticks: self.prediction_ticks.load(Ordering::Relaxed),
            insights_generated: self.insights_generated.load(Ordering::Relaxed),
        }
    }

    /// Cancel the loops and wait for them to exit. No-op when stopped.
    pub async fn stop(&self) {
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(handle) = handle else { return };
        handle.token.cancel();
        handle.tracker.close();
        handle.tracker.wait().await;
        self.running.store(false, Ordering::Relaxed);
        tracing::info!("Background loops stopped");
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopStats {
    pub running: bool,
    pub detection_ticks: u64,
    pub prediction_ticks: u64,
    pub insights_generated: u64,
}

/// Start the detection and prediction loops. Returns false if already running.
pub fn start_loops(manager: &Arc<AutoFixManager>) -> bool {
    let state = &manager.loops;
    let mut handle = state.handle.lock().unwrap_or_else(|e| e.into_inner());
    if handle.is_some() {
        return false;
    }

    let subscriptions: Vec<Box<dyn ReactiveSubscription>> = vec![
        Box::new(DetectionSubscription {
            manager: Arc::clone(manager),
        }),
        Box::new(PredictionSubscription {
            manager: Arc::clone(manager),
        }),
    ];
    *state.names.lock().unwrap_or_else(|e| e.into_inner()) =
        subscriptions.iter().map(|s| s.name()).collect();

    let config = manager.config();
    tracing::info!(
        monitor_interval_ms = config.monitor_interval_ms,
        prediction_interval_ms = config.prediction_interval_ms,
        sources = manager.detector.source_names().len(),
        "Background loops starting"
    );

    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    spawn_subscriptions(subscriptions, &tracker, &token);
    *handle = Some(LoopHandle { token, tracker });
    state.running.store(true, Ordering::Relaxed);
    true
}

/// Poll every source, then hand new issues to the pipeline, highest
/// configured priority first.
pub(crate) async fn detection_tick(manager: &Arc<AutoFixManager>) {
    if !manager.is_accepting() {
        return;
    }
    manager.loops.detection_ticks.fetch_add(1, Ordering::Relaxed);
    let config = manager.config();

    let mut fresh = manager
        .detector
        .poll_sources(config.timeouts.detection())
        .await;
    manager.note_check();
    manager.note_detected(&fresh);

    fresh.sort_by(|a, b| {
        config
            .priority(b.issue_type)
            .cmp(&config.priority(a.issue_type))
            .then(b.severity.cmp(&a.severity))
            .then(a.detected_at.cmp(&b.detected_at))
    });
    if !fresh.is_empty() {
        tracing::info!(count = fresh.len(), "New issues detected");
    }
    for issue in fresh {
        manager.spawn_handle(issue);
    }
    manager.refresh_health();
}

/// Collect signals from history and every signal source, then run one
/// prediction cycle.
pub(crate) async fn prediction_tick(manager: &Arc<AutoFixManager>) {
    manager.loops.prediction_ticks.fetch_add(1, Ordering::Relaxed);
    let config = manager.config();
    let mut signals = manager.history_signals();

    for source in manager.signal_sources() {
        match tokio::time::timeout(config.timeouts.detection(), source.collect(&mut signals)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(source = source.name(), error = %e, "Signal source failed");
            }
            Err(_) => {
                tracing::warn!(source = source.name(), "Signal source timed out");
            }
        }
    }

    let fresh = manager.predictive.generate_insights(&signals, &config);
    manager
        .loops
        .insights_generated
        .fetch_add(fresh.len() as u64, Ordering::Relaxed);
    tracing::debug!(new_insights = fresh.len(), "Prediction cycle complete");
    manager.persist_prediction_accuracy();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoFixConfig;
    use crate::engine::bus::AutoFixEvent;
    use crate::engine::detector::tests::{report, StaticSource};
    use crate::engine::executor::RecordingExecutor;
    use crate::engine::predictive::{PredictionSignals, SignalSource};
    use crate::engine::types::{HealthStatus, IssueType};
    use crate::error::AppError;
    use std::time::Duration;

    struct MajorBump;

    #[async_trait::async_trait]
    impl SignalSource for MajorBump {
        fn name(&self) -> &str {
            "major-bump"
        }

        async fn collect(&self, signals: &mut PredictionSignals) -> Result<(), AppError> {
            signals.changed_files.push("package.json".into());
            signals.dependency_diff.upgraded.push("react".into());
            signals.dependency_diff.major_bumps.push("react".into());
            Ok(())
        }
    }

    fn fast_config() -> AutoFixConfig {
        AutoFixConfig {
            monitor_interval_ms: 20,
            prediction_interval_ms: 20,
            test_validation_required: false,
            retry_attempts: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_loops_detect_and_stop() {
        let source = Arc::new(StaticSource::new("lint", vec![report("lint", "Missing semicolon")]));
        let manager = AutoFixManager::builder(fast_config())
            .executor(Arc::new(RecordingExecutor::new()))
            .source(source.clone())
            .build()
            .unwrap();
        let mut detected = manager.subscribe(&["issue:detected"]);

        manager.start_monitoring();
        assert!(!super::start_loops(&manager));
        let event = tokio::time::timeout(Duration::from_secs(2), detected.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(AutoFixEvent::IssueDetected(_))));

        let status = manager.get_status();
        assert!(status.enabled);
        assert!(status.active_monitors.contains(&"detection".to_string()));
        assert!(status.active_monitors.contains(&"lint".to_string()));

        manager.shutdown().await;
        let stats = manager.loops.stats();
        assert!(!stats.running);
        assert!(stats.detection_ticks >= 1);
        assert_eq!(manager.get_status().health_status, HealthStatus::Offline);
        assert!(manager.get_status().active_monitors.is_empty());
    }

    #[tokio::test]
    async fn test_prediction_tick_uses_signal_sources() {
        let manager = AutoFixManager::builder(fast_config())
            .signal_source(Arc::new(MajorBump))
            .build()
            .unwrap();
        let mut predictions = manager.subscribe(&["prediction:*"]);

        prediction_tick(&manager).await;
        let insights = manager.get_predictive_insights();
        assert!(insights.iter().any(|i| i.issue_type == IssueType::Dependency));
        assert!(insights
            .iter()
            .all(|i| i.confidence >= manager.config().prediction_confidence_threshold));
        assert!(predictions.try_recv().is_some());
        assert_eq!(manager.loops.stats().prediction_ticks, 1);
    }

    #[tokio::test]
    async fn test_monitoring_reports_health() {
        let manager = AutoFixManager::builder(fast_config()).build().unwrap();
        let mut status = manager.subscribe(&["status:changed"]);
        assert_eq!(manager.get_status().health_status, HealthStatus::Offline);

        manager.start_monitoring();
        match status.try_recv() {
            Some(AutoFixEvent::StatusChanged { previous, current }) => {
                assert_eq!(previous, HealthStatus::Offline);
                assert_eq!(current, HealthStatus::Healthy);
            }
            other => panic!("expected status change, got {other:?}"),
        }
        manager.stop_monitoring().await;
        assert_eq!(manager.get_status().health_status, HealthStatus::Offline);
    }
}
