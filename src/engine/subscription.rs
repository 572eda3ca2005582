//! Reactive subscription model for the background loops.
//!
//! Every loop follows the same pattern: poll a source, decide, act. The
//! [`ReactiveSubscription`] trait captures one such cycle; [`spawn_subscriptions`]
//! runs each one in its own tracked task until the shared token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::AutoFixManager;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A periodic cycle driven by the subscription loop.
#[async_trait::async_trait]
pub trait ReactiveSubscription: Send + Sync + 'static {
    /// Human-readable name for logging.
    fn name(&self) -> &'static str;

    /// Pause between the end of one tick and the start of the next.
    /// Read before every sleep, so configuration changes apply on the next cycle.
    fn interval(&self) -> Duration;

    /// Optional delay before the first tick.
    fn initial_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// One cycle. Errors are logged internally; the loop continues regardless.
    async fn tick(&self);
}

// ---------------------------------------------------------------------------
// Concrete subscriptions
// ---------------------------------------------------------------------------

/// Polls detection sources and hands new issues to the fix pipeline.
pub struct DetectionSubscription {
    pub manager: Arc<AutoFixManager>,
}

/// Gathers prediction signals and runs one prediction cycle.
pub struct PredictionSubscription {
    pub manager: Arc<AutoFixManager>,
}

#[async_trait::async_trait]
impl ReactiveSubscription for DetectionSubscription {
    fn name(&self) -> &'static str {
        "detection"
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.manager.config().monitor_interval_ms)
    }

    async fn tick(&self) {
        super::background::detection_tick(&self.manager).await;
    }
}

#[async_trait::async_trait]
impl ReactiveSubscription for PredictionSubscription {
    fn name(&self) -> &'static str {
        "prediction"
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.manager.config().prediction_interval_ms)
    }

    fn initial_delay(&self) -> Duration {
        // Let the first detection pass populate history-derived signals
        Duration::from_millis(self.manager.config().monitor_interval_ms)
    }

    async fn tick(&self) {
        super::background::prediction_tick(&self.manager).await;
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

async fn run_single(sub: Box<dyn ReactiveSubscription>, token: CancellationToken) {
    let name = sub.name();
    let delay = sub.initial_delay();
    if !delay.is_zero() {
        tracing::debug!(subscription = name, delay_ms = delay.as_millis() as u64, "Delaying initial tick");
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = sub.tick() => {}
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(sub.interval()) => {}
        }
    }
    tracing::info!(subscription = name, "Subscription loop exited");
}

/// Spawn every subscription as its own task on `tracker`.
pub fn spawn_subscriptions(
    subscriptions: Vec<Box<dyn ReactiveSubscription>>,
    tracker: &TaskTracker,
    token: &CancellationToken,
) {
    for sub in subscriptions {
        tracker.spawn(run_single(sub, token.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct TestSubscription {
        tick_count: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl ReactiveSubscription for TestSubscription {
        fn name(&self) -> &'static str {
            "test"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn tick(&self) {
            self.tick_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_subscription_defaults() {
        let sub = TestSubscription {
            tick_count: Arc::new(AtomicU32::new(0)),
        };
        assert_eq!(sub.name(), "test");
        assert_eq!(sub.initial_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_loop_ticks_until_cancelled() {
        let count = Arc::new(AtomicU32::new(0));
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        spawn_subscriptions(
            vec![Box::new(TestSubscription {
                tick_count: count.clone(),
            })],
            &tracker,
            &token,
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
        tracker.close();
        tracker.wait().await;

        let ticks = count.load(Ordering::Relaxed);
        assert!(ticks >= 2, "only {ticks} ticks");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::Relaxed), ticks);
    }
}
