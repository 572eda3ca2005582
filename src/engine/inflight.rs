use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

// =============================================================================
// InFlightArena
// =============================================================================

/// Explicit issue-id -> in-flight token arena plus the global applying count.
///
/// Two guarantees live here and nowhere else:
/// - at most one attempt per issue id runs at a time ([`InFlightArena::acquire`]),
/// - at most `max` results are `applying` at once ([`InFlightArena::try_begin_applying`]).
#[derive(Default)]
pub struct InFlightArena {
    /// issue_id -> token lock. Entries disappear when the last holder/waiter leaves.
    tokens: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// issue_id -> fix_id currently in `applying`.
    applying: Mutex<HashMap<String, String>>,
}

impl InFlightArena {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait for exclusive ownership of `issue_id`.
    pub async fn acquire(self: &Arc<Self>, issue_id: &str) -> IssueToken {
        let lock = {
            let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            tokens
                .entry(issue_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        IssueToken {
            issue_id: issue_id.to_string(),
            arena: Arc::clone(self),
            guard: Some(guard),
        }
    }

    /// Non-blocking variant: `None` if another attempt holds the issue.
    pub fn try_acquire(self: &Arc<Self>, issue_id: &str) -> Option<IssueToken> {
        let lock = {
            let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            tokens
                .entry(issue_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        match lock.try_lock_owned() {
            Ok(guard) => Some(IssueToken {
                issue_id: issue_id.to_string(),
                arena: Arc::clone(self),
                guard: Some(guard),
            }),
            Err(_) => {
                self.release_if_idle(issue_id);
                None
            }
        }
    }

    /// Move an issue into `applying` if the global bound allows it.
    /// `Err` carries the number of results applying right now.
    pub fn try_begin_applying(
        self: &Arc<Self>,
        token: &IssueToken,
        fix_id: &str,
        max: usize,
    ) -> Result<ApplyingPermit, usize> {
        let issue_id = token.issue_id.clone();
        let mut applying = self.applying.lock().unwrap_or_else(|e| e.into_inner());
        if applying.len() >= max || applying.contains_key(&issue_id) {
            return Err(applying.len());
        }
        applying.insert(issue_id.clone(), fix_id.to_string());
        Ok(ApplyingPermit {
            issue_id,
            arena: Arc::clone(self),
        })
    }

    pub fn applying_count(&self) -> usize {
        self.applying.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Issues with a holder or a waiter.
    pub fn in_flight_count(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn release_if_idle(&self, issue_id: &str) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map's own reference left: nobody holds or waits
        if tokens.get(issue_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            tokens.remove(issue_id);
        }
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// Exclusive right to work on one issue. Released on drop.
pub struct IssueToken {
    issue_id: String,
    arena: Arc<InFlightArena>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl IssueToken {
    pub fn issue_id(&self) -> &str {
        &self.issue_id
    }
}

impl Drop for IssueToken {
    fn drop(&mut self) {
        // Guard holds an Arc to the lock; drop it before checking for idleness
        self.guard.take();
        self.arena.release_if_idle(&self.issue_id);
    }
}

/// One slot of the global applying bound. Released on drop.
pub struct ApplyingPermit {
    issue_id: String,
    arena: Arc<InFlightArena>,
}

impl Drop for ApplyingPermit {
    fn drop(&mut self) {
        self.arena
            .applying
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.issue_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_issue_is_exclusive() {
        let arena = InFlightArena::new();
        let first = arena.acquire("iss-1").await;
        assert!(arena.try_acquire("iss-1").is_none());
        assert!(arena.try_acquire("iss-2").is_some());
        drop(first);
        assert!(arena.try_acquire("iss-1").is_some());
    }

    #[tokio::test]
    async fn test_waiter_runs_after_holder() {
        let arena = InFlightArena::new();
        let first = arena.acquire("iss-1").await;

        let waiter_arena = arena.clone();
        let waiter = tokio::spawn(async move {
            let _token = waiter_arena.acquire("iss-1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(arena.in_flight_count(), 1);

        drop(first);
        waiter.await.unwrap();
        assert_eq!(arena.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_applying_bound() {
        let arena = InFlightArena::new();
        let a = arena.acquire("a").await;
        let b = arena.acquire("b").await;
        let c = arena.acquire("c").await;

        let pa = arena.try_begin_applying(&a, "fix-a", 2).unwrap();
        let _pb = arena.try_begin_applying(&b, "fix-b", 2).unwrap();
        assert_eq!(arena.try_begin_applying(&c, "fix-c", 2).err(), Some(2));
        assert_eq!(arena.applying_count(), 2);

        drop(pa);
        assert_eq!(arena.applying_count(), 1);
        assert!(arena.try_begin_applying(&c, "fix-c", 2).is_ok());
    }

    #[tokio::test]
    async fn test_one_applying_per_issue() {
        let arena = InFlightArena::new();
        let a = arena.acquire("a").await;
        let _p = arena.try_begin_applying(&a, "fix-1", 5).unwrap();
        assert!(arena.try_begin_applying(&a, "fix-2", 5).is_err());
    }
}
