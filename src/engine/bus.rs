use serde::Serialize;
use tokio::sync::broadcast;

use super::types::{FixResult, FixStrategy, HealthStatus, Issue, PredictiveInsight};
use crate::config::AutoFixConfig;

/// Broadcast buffer per subscriber. Slow subscribers skip ahead rather than block publishers.
const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    IssueDetected,
    IssueResolved,
    FixStarted,
    FixRequiresApproval,
    FixCompleted,
    FixFailed,
    PredictionGenerated,
    StatusChanged,
    ConfigUpdated,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::IssueDetected => "issue:detected",
            EventKind::IssueResolved => "issue:resolved",
            EventKind::FixStarted => "fix:started",
            EventKind::FixRequiresApproval => "fix:requires_approval",
            EventKind::FixCompleted => "fix:completed",
            EventKind::FixFailed => "fix:failed",
            EventKind::PredictionGenerated => "prediction:generated",
            EventKind::StatusChanged => "status:changed",
            EventKind::ConfigUpdated => "config:updated",
        }
    }
}

/// Everything the engine tells the outside world. Payloads are snapshots.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum AutoFixEvent {
    #[serde(rename = "issue:detected")]
    IssueDetected(Issue),
    #[serde(rename = "issue:resolved")]
    IssueResolved { issue_id: String },
    #[serde(rename = "fix:started")]
    FixStarted { issue: Issue, strategy: FixStrategy },
    #[serde(rename = "fix:requires_approval")]
    FixRequiresApproval {
        issue: Issue,
        strategy: FixStrategy,
        reasons: Vec<String>,
    },
    #[serde(rename = "fix:completed")]
    FixCompleted(FixResult),
    #[serde(rename = "fix:failed")]
    FixFailed(FixResult),
    #[serde(rename = "prediction:generated")]
    PredictionGenerated(PredictiveInsight),
    #[serde(rename = "status:changed")]
    StatusChanged {
        previous: HealthStatus,
        current: HealthStatus,
    },
    #[serde(rename = "config:updated")]
    ConfigUpdated(Box<AutoFixConfig>),
}

impl AutoFixEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AutoFixEvent::IssueDetected(_) => EventKind::IssueDetected,
            AutoFixEvent::IssueResolved { .. } => EventKind::IssueResolved,
            AutoFixEvent::FixStarted { .. } => EventKind::FixStarted,
            AutoFixEvent::FixRequiresApproval { .. } => EventKind::FixRequiresApproval,
            AutoFixEvent::FixCompleted(_) => EventKind::FixCompleted,
            AutoFixEvent::FixFailed(_) => EventKind::FixFailed,
            AutoFixEvent::PredictionGenerated(_) => EventKind::PredictionGenerated,
            AutoFixEvent::StatusChanged { .. } => EventKind::StatusChanged,
            AutoFixEvent::ConfigUpdated(_) => EventKind::ConfigUpdated,
        }
    }
}

/// Filter for a subscription: exact event names or prefix wildcards (`fix:*`).
/// An empty filter matches everything.
pub fn event_matches(filters: &[String], kind: EventKind) -> bool {
    if filters.is_empty() {
        return true;
    }
    let name = kind.name();
    filters.iter().any(|filter| match filter.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == filter,
    })
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AutoFixEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Fire and forget. No subscribers is not an error.
    pub fn publish(&self, event: AutoFixEvent) {
        tracing::debug!(event = event.kind().name(), "Publishing event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.subscribe_filtered(Vec::new())
    }

    /// Subscribe to a set of event names, e.g. `["fix:*", "issue:detected"]`.
    pub fn subscribe_filtered(&self, filters: Vec<String>) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            filters,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct EventSubscription {
    rx: broadcast::Receiver<AutoFixEvent>,
    filters: Vec<String>,
}

impl EventSubscription {
    /// Next matching event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<AutoFixEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event_matches(&self.filters, event.kind()) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<AutoFixEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event_matches(&self.filters, event.kind()) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(event_matches(&[], EventKind::ConfigUpdated));
    }

    #[test]
    fn test_exact_filter() {
        let f = filters(&["issue:detected"]);
        assert!(event_matches(&f, EventKind::IssueDetected));
        assert!(!event_matches(&f, EventKind::IssueResolved));
    }

    #[test]
    fn test_wildcard_filter() {
        let f = filters(&["fix:*"]);
        assert!(event_matches(&f, EventKind::FixStarted));
        assert!(event_matches(&f, EventKind::FixRequiresApproval));
        assert!(!event_matches(&f, EventKind::StatusChanged));
    }

    #[tokio::test]
    async fn test_subscription_skips_unmatched_events() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_filtered(filters(&["issue:resolved"]));
        bus.publish(AutoFixEvent::StatusChanged {
            previous: HealthStatus::Offline,
            current: HealthStatus::Healthy,
        });
        bus.publish(AutoFixEvent::IssueResolved {
            issue_id: "iss-1".into(),
        });
        match sub.recv().await {
            Some(AutoFixEvent::IssueResolved { issue_id }) => assert_eq!(issue_id, "iss-1"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(AutoFixEvent::IssueResolved {
            issue_id: "x".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_name() {
        let json = serde_json::to_value(AutoFixEvent::IssueResolved {
            issue_id: "iss-9".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "issue:resolved");
        assert_eq!(json["data"]["issue_id"], "iss-9");
    }
}
