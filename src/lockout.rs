//! Address-keyed lockout after repeated authentication failures.
//!
//! Flow:
//! 1) Each failed attempt from an address bumps its counter and stamps `last_attempt_at`.
//! 2) Once the counter reaches the threshold the address is locked.
//! 3) When a full window passes without a new failure the record is dropped; the
//!    counter restarts from zero rather than decaying.
//!
//! State is process-local. With several instances behind a balancer each one keeps its
//! own counters, so the effective threshold is per instance.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

pub const DEFAULT_THRESHOLD: u32 = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy)]
struct FailedAttempts {
    count: u32,
    last_attempt_at: Instant,
}

#[derive(Debug)]
pub struct LockoutTracker {
    attempts: DashMap<String, FailedAttempts>,
    threshold: u32,
    window: Duration,
}

impl Default for LockoutTracker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_WINDOW)
    }
}

impl LockoutTracker {
    /// `threshold` is clamped to at least 1.
    #[must_use]
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            threshold: threshold.max(1),
            window,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record one failed attempt. Returns the failure count inside the current window.
    pub fn record_failure(&self, address: &str) -> u32 {
        let now = Instant::now();
        let mut entry = self
            .attempts
            .entry(address.to_owned())
            .or_insert(FailedAttempts {
                count: 0,
                last_attempt_at: now,
            });

        if now.duration_since(entry.last_attempt_at) >= self.window {
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        entry.last_attempt_at = now;

        let count = entry.count;
        drop(entry);

        if count == self.threshold {
            tracing::warn!(address = %address, failures = count, "Address locked out");
        }
        count
    }

    /// Remaining lockout for `address`, if it is locked.
    #[must_use]
    pub fn retry_after(&self, address: &str) -> Option<Duration> {
        let now = Instant::now();
        let record = *self.attempts.get(address)?;
        let elapsed = now.duration_since(record.last_attempt_at);

        if elapsed >= self.window {
            self.attempts
                .remove_if(address, |_, r| now.duration_since(r.last_attempt_at) >= self.window);
            return None;
        }
        (record.count >= self.threshold).then(|| self.window - elapsed)
    }

    #[must_use]
    pub fn is_locked(&self, address: &str) -> bool {
        self.retry_after(address).is_some()
    }

    /// Failures counted for `address` in the current window.
    #[must_use]
    pub fn failure_count(&self, address: &str) -> u32 {
        let now = Instant::now();
        self.attempts
            .get(address)
            .filter(|r| now.duration_since(r.last_attempt_at) < self.window)
            .map_or(0, |r| r.count)
    }

    /// Forget all failures for `address` (after a successful login).
    pub fn clear(&self, address: &str) {
        self.attempts.remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "203.0.113.7";

    #[tokio::test(start_paused = true)]
    async fn locks_at_threshold() {
        let tracker = LockoutTracker::new(5, Duration::from_secs(900));
        for n in 1..5 {
            assert_eq!(tracker.record_failure(ADDR), n);
            assert!(!tracker.is_locked(ADDR), "locked after {n} failures");
        }
        assert_eq!(tracker.record_failure(ADDR), 5);
        assert!(tracker.is_locked(ADDR));
        assert!(!tracker.is_locked("198.51.100.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn resets_to_zero_after_window() {
        let tracker = LockoutTracker::new(5, Duration::from_secs(900));
        for _ in 0..5 {
            tracker.record_failure(ADDR);
        }
        assert!(tracker.is_locked(ADDR));

        tokio::time::advance(Duration::from_secs(900)).await;
        assert!(!tracker.is_locked(ADDR));
        assert_eq!(tracker.failure_count(ADDR), 0);

        // Counter restarts at one, not at threshold - 1.
        assert_eq!(tracker.record_failure(ADDR), 1);
        assert!(!tracker.is_locked(ADDR));
    }

    #[tokio::test(start_paused = true)]
    async fn window_rolls_with_each_failure() {
        let tracker = LockoutTracker::new(3, Duration::from_secs(60));
        tracker.record_failure(ADDR);
        tokio::time::advance(Duration::from_secs(50)).await;
        tracker.record_failure(ADDR);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(tracker.record_failure(ADDR), 3);
        assert!(tracker.is_locked(ADDR));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_counts_down() {
        let tracker = LockoutTracker::new(1, Duration::from_secs(100));
        tracker.record_failure(ADDR);
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(tracker.retry_after(ADDR), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn clear_forgets_failures() {
        let tracker = LockoutTracker::default();
        for _ in 0..DEFAULT_THRESHOLD {
            tracker.record_failure(ADDR);
        }
        assert!(tracker.is_locked(ADDR));
        tracker.clear(ADDR);
        assert!(!tracker.is_locked(ADDR));
        assert_eq!(tracker.failure_count(ADDR), 0);
    }
}
