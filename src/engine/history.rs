use std::collections::VecDeque;

use super::types::FixResult;

/// Append-only, capped log of terminal fix results. Oldest entries go first.
pub struct FixHistory {
    entries: VecDeque<FixResult>,
    cap: usize,
}

impl FixHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap.min(1024)),
            cap: cap.max(1),
        }
    }

    /// Append and return whatever fell off the front.
    pub fn push(&mut self, result: FixResult) -> Vec<FixResult> {
        self.entries.push_back(result);
        self.evict()
    }

    /// Shrinking the cap evicts immediately.
    pub fn set_cap(&mut self, cap: usize) -> Vec<FixResult> {
        self.cap = cap.max(1);
        self.evict()
    }

    fn evict(&mut self) -> Vec<FixResult> {
        let excess = self.entries.len().saturating_sub(self.cap);
        self.entries.drain(..excess).collect()
    }

    /// Newest first. `limit = None` returns everything.
    pub fn recent(&self, limit: Option<usize>) -> Vec<FixResult> {
        self.entries
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &FixResult> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{FixStatus, IssueType};

    pub(crate) fn entry(n: usize) -> FixResult {
        FixResult {
            id: format!("fix-{n}"),
            issue_id: format!("iss-{n}"),
            issue_type: IssueType::Lint,
            strategy_id: "s".into(),
            template_id: "t".into(),
            strategy_name: "t".into(),
            root_cause: None,
            status: FixStatus::Applied,
            applied: true,
            success: true,
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
    fn test_evicts_oldest_first() {
        let mut history = FixHistory::new(3);
        for n in 0..3 {
            assert!(history.push(entry(n)).is_empty());
        }
        let evicted = history.push(entry(3));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, "fix-0");
        assert_eq!(history.len(), 3);
        let ids: Vec<String> = history.recent(None).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["fix-3", "fix-2", "fix-1"]);
    }

    #[test]
    fn test_recent_limit_and_shrink() {
        let mut history = FixHistory::new(10);
        for n in 0..6 {
            history.push(entry(n));
        }
        assert_eq!(history.recent(Some(2))[0].id, "fix-5");
        let evicted = history.set_cap(4);
        assert_eq!(evicted.len(), 2);
        assert_eq!(history.len(), 4);
        assert_eq!(history.iter().next().map(|r| r.id.as_str()), Some("fix-2"));
    }
}
