use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window limiter keyed by detection source name.
///
/// A chatty source (a watcher stuck in a loop, a report file rewritten every
/// few milliseconds) cannot flood the detector; excess reports are dropped.
pub struct RateLimiter {
    max_events: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            max_events,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one slot for `key`. `Err` carries the wait until a slot frees up.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let stamps = buckets.entry(key.to_string()).or_default();

        stamps.retain(|t| now.duration_since(*t) < self.window);

        if stamps.len() >= self.max_events {
            let retry_after = self
                .window
                .checked_sub(now.duration_since(stamps[0]))
                .unwrap_or(Duration::ZERO);
            return Err(retry_after);
        }

        stamps.push(now);
        Ok(())
    }

    /// Drop buckets with nothing left in the window.
    pub fn prune(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.retain(|_, stamps| {
            stamps.retain(|t| now.duration_since(*t) < self.window);
            !stamps.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Reports accepted per source per window.
pub const SOURCE_MAX_REPORTS: usize = 500;
pub const SOURCE_WINDOW: Duration = Duration::from_secs(60);

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(SOURCE_MAX_REPORTS, SOURCE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rejects_over_limit() {
        let rl = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(rl.check("tsc").is_ok());
        }
        assert!(rl.check("tsc").is_err());
        // Other sources keep their own budget
        assert!(rl.check("eslint").is_ok());
    }

    #[test]
    fn test_window_expiry_and_prune() {
        let rl = RateLimiter::new(2, Duration::from_millis(40));
        rl.check("a").unwrap();
        rl.check("a").unwrap();
        assert!(rl.check("a").is_err());
        thread::sleep(Duration::from_millis(60));
        rl.prune();
        assert_eq!(rl.tracked_keys(), 0);
        assert!(rl.check("a").is_ok());
    }
}
