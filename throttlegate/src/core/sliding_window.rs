//! Sliding window rate limiter
//!
//! This module provides [`SlidingWindowLimiter`], which governs the sustained
//! request rate of each identifier over a rolling horizon made of
//! `sliding_window_count` contiguous buckets of width `window_size`.
//!
//! Exceeding the limit does not merely deny the request: the identifier is
//! blocked for `block_duration`, and every check during the block is denied
//! without touching the bucket counts.

use super::{GateError, HashMap, deadline_after, elapsed, remaining};
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

// Configuration constants
const DEFAULT_WINDOW_SIZE_MS: u64 = 60_000;
const DEFAULT_MAX_REQUESTS: u64 = 10;
const DEFAULT_SLIDING_WINDOW_COUNT: u32 = 5;
const DEFAULT_BLOCK_DURATION_MS: u64 = 60_000;
const DEFAULT_MAX_MEMORY_ENTRIES: usize = 10_000;

/// Configuration for a [`SlidingWindowLimiter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindowConfig {
    /// Width of a single bucket
    pub window_size: Duration,
    /// Requests allowed across the whole horizon before the identifier is blocked
    pub max_requests: u64,
    /// Number of buckets that make up the horizon (`window_size * sliding_window_count`)
    pub sliding_window_count: u32,
    /// How long an identifier stays blocked after exceeding the limit
    pub block_duration: Duration,
    /// Upper bound on tracked identifiers, enforced by [`SlidingWindowLimiter::cleanup`]
    pub max_memory_entries: usize,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window_size: Duration::from_millis(DEFAULT_WINDOW_SIZE_MS),
            max_requests: DEFAULT_MAX_REQUESTS,
            sliding_window_count: DEFAULT_SLIDING_WINDOW_COUNT,
            block_duration: Duration::from_millis(DEFAULT_BLOCK_DURATION_MS),
            max_memory_entries: DEFAULT_MAX_MEMORY_ENTRIES,
        }
    }
}

impl SlidingWindowConfig {
    /// Reject zero-valued settings
    pub fn validate(&self) -> Result<(), GateError> {
        if self.window_size.is_zero() {
            return Err(GateError::InvalidConfig(
                "window_size must be greater than zero".into(),
            ));
        }
        if self.max_requests == 0 {
            return Err(GateError::InvalidConfig(
                "max_requests must be greater than zero".into(),
            ));
        }
        if self.sliding_window_count == 0 {
            return Err(GateError::InvalidConfig(
                "sliding_window_count must be greater than zero".into(),
            ));
        }
        if self.max_memory_entries == 0 {
            return Err(GateError::InvalidConfig(
                "max_memory_entries must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Length of the rolling horizon covered by all buckets
    pub fn horizon(&self) -> Duration {
        self.window_size.saturating_mul(self.sliding_window_count)
    }
}

/// Outcome of a rate limit check
///
/// A denial is a normal value, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests allowed per horizon
    pub limit: u64,
    /// Requests still available in the current horizon after this one
    pub remaining: u64,
    /// Time until the oldest counted bucket leaves the horizon (or the block ends)
    pub reset_after: Duration,
    /// Time to wait before retrying (zero if allowed)
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct WindowBucket {
    count: u64,
    started_at: SystemTime,
}

#[derive(Debug)]
struct RateWindowEntry {
    windows: VecDeque<WindowBucket>,
    blocked_until: Option<SystemTime>,
    last_activity: SystemTime,
}

impl RateWindowEntry {
    fn first_request(now: SystemTime) -> Self {
        let mut windows = VecDeque::with_capacity(1);
        windows.push_back(WindowBucket {
            count: 1,
            started_at: now,
        });
        RateWindowEntry {
            windows,
            blocked_until: None,
            last_activity: now,
        }
    }

    fn is_blocked(&self, now: SystemTime) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    fn prune(&mut self, now: SystemTime, horizon: Duration) {
        // Buckets are ordered oldest first
        while let Some(oldest) = self.windows.front() {
            if elapsed(now, oldest.started_at) >= horizon {
                self.windows.pop_front();
            } else {
                break;
            }
        }
    }

    fn used(&self) -> u64 {
        self.windows.iter().map(|bucket| bucket.count).sum()
    }

    fn record(&mut self, now: SystemTime, window_size: Duration) {
        match self.windows.back_mut() {
            Some(newest) if elapsed(now, newest.started_at) < window_size => newest.count += 1,
            _ => self.windows.push_back(WindowBucket {
                count: 1,
                started_at: now,
            }),
        }
    }

    fn reset_after(&self, now: SystemTime, horizon: Duration) -> Duration {
        match self.windows.front() {
            Some(oldest) => remaining(deadline_after(oldest.started_at, horizon), now),
            None => horizon,
        }
    }
}

/// Per-identifier sustained rate limiter over a rolling multi-bucket horizon
///
/// The limiter is not thread-safe by itself. For concurrent access wrap it in
/// a mutex; every check is a short, non-blocking read-modify-write of one entry.
///
/// # Example
///
/// ```
/// use throttlegate::SlidingWindowLimiter;
/// use std::time::{Duration, SystemTime};
///
/// // 10 requests per 5 minutes (5 buckets of 60 seconds)
/// let mut limiter = SlidingWindowLimiter::builder()
///     .window_size(Duration::from_secs(60))
///     .max_requests(10)
///     .sliding_window_count(5)
///     .build()
///     .unwrap();
///
/// let decision = limiter.check("203.0.113.7:generate", SystemTime::now());
/// assert!(decision.allowed);
/// assert_eq!(decision.remaining, 9);
/// ```
pub struct SlidingWindowLimiter {
    entries: HashMap<String, RateWindowEntry>,
    config: SlidingWindowConfig,
}

impl SlidingWindowLimiter {
    /// Create a limiter from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidConfig`] if any limit is zero.
    pub fn new(config: SlidingWindowConfig) -> Result<Self, GateError> {
        config.validate()?;
        Ok(SlidingWindowLimiter {
            entries: HashMap::new(),
            config,
        })
    }

    /// Create a new builder starting from the default configuration
    pub fn builder() -> SlidingWindowBuilder {
        SlidingWindowBuilder::default()
    }

    /// The configuration this limiter was built with
    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }

    /// Check whether `identifier` may make another request at `now`
    ///
    /// An allowed check counts the request. A check that finds the horizon
    /// full blocks the identifier for `block_duration` and reports that
    /// duration as `retry_after`.
    pub fn check(&mut self, identifier: &str, now: SystemTime) -> RateLimitDecision {
        let limit = self.config.max_requests;
        let horizon = self.config.horizon();

        let entry = match self.entries.get_mut(identifier) {
            Some(entry) => entry,
            None => {
                self.entries
                    .insert(identifier.to_string(), RateWindowEntry::first_request(now));
                return RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit - 1,
                    reset_after: horizon,
                    retry_after: Duration::ZERO,
                };
            }
        };
        entry.last_activity = now;

        if let Some(until) = entry.blocked_until {
            if now < until {
                let wait = remaining(until, now);
                return RateLimitDecision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    reset_after: wait,
                    retry_after: wait,
                };
            }
            // Block expired: start over with a clean horizon
            entry.blocked_until = None;
            entry.windows.clear();
        }

        entry.prune(now, horizon);
        let used = entry.used();

        if used >= limit {
            let block = self.config.block_duration;
            entry.blocked_until = Some(deadline_after(now, block));
            return RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_after: block,
                retry_after: block,
            };
        }

        entry.record(now, self.config.window_size);
        RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit - used - 1,
            reset_after: entry.reset_after(now, horizon),
            retry_after: Duration::ZERO,
        }
    }

    /// Block `identifier` for `duration` starting at `now`, regardless of its usage
    pub fn block(&mut self, identifier: &str, duration: Duration, now: SystemTime) {
        let entry = self
            .entries
            .entry(identifier.to_string())
            .or_insert_with(|| RateWindowEntry {
                windows: VecDeque::new(),
                blocked_until: None,
                last_activity: now,
            });
        entry.blocked_until = Some(deadline_after(now, duration));
        entry.last_activity = now;
    }

    /// Lift a block and forget the identifier's counted requests
    ///
    /// Returns `true` if the identifier was tracked.
    pub fn unblock(&mut self, identifier: &str) -> bool {
        match self.entries.get_mut(identifier) {
            Some(entry) => {
                entry.blocked_until = None;
                entry.windows.clear();
                true
            }
            None => false,
        }
    }

    /// Whether `identifier` is currently serving a block
    pub fn is_blocked(&self, identifier: &str, now: SystemTime) -> bool {
        self.entries
            .get(identifier)
            .is_some_and(|entry| entry.is_blocked(now))
    }

    /// Remove idle identifiers and trim the map to `max_memory_entries`
    ///
    /// Identifiers with no activity inside the horizon that are not blocked
    /// are dropped first. If the map is still over capacity, the least
    /// recently active identifiers are evicted. Returns the number removed.
    pub fn cleanup(&mut self, now: SystemTime) -> usize {
        let before = self.entries.len();
        let horizon = self.config.horizon();

        self.entries.retain(|_, entry| {
            entry.is_blocked(now) || elapsed(now, entry.last_activity) < horizon
        });

        let over = self
            .entries
            .len()
            .saturating_sub(self.config.max_memory_entries);
        if over > 0 {
            let mut by_activity: Vec<(SystemTime, String)> = self
                .entries
                .iter()
                .map(|(key, entry)| (entry.last_activity, key.clone()))
                .collect();
            by_activity.sort_unstable();
            for (_, key) in by_activity.into_iter().take(over) {
                self.entries.remove(&key);
            }
        }

        before - self.entries.len()
    }

    /// Number of tracked identifiers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for configuring a [`SlidingWindowLimiter`]
///
/// # Example
///
/// ```
/// use throttlegate::SlidingWindowLimiter;
/// use std::time::Duration;
///
/// let limiter = SlidingWindowLimiter::builder()
///     .max_requests(100)
///     .block_duration(Duration::from_secs(300))
///     .max_memory_entries(50_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Default)]
pub struct SlidingWindowBuilder {
    config: SlidingWindowConfig,
}

impl SlidingWindowBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the width of one bucket
    pub fn window_size(mut self, window_size: Duration) -> Self {
        self.config.window_size = window_size;
        self
    }

    /// Set the number of requests allowed across the horizon
    pub fn max_requests(mut self, max_requests: u64) -> Self {
        self.config.max_requests = max_requests;
        self
    }

    /// Set how many buckets make up the horizon
    pub fn sliding_window_count(mut self, count: u32) -> Self {
        self.config.sliding_window_count = count;
        self
    }

    /// Set how long an identifier stays blocked after exceeding the limit
    pub fn block_duration(mut self, duration: Duration) -> Self {
        self.config.block_duration = duration;
        self
    }

    /// Set the maximum number of identifiers kept after a cleanup
    pub fn max_memory_entries(mut self, entries: usize) -> Self {
        self.config.max_memory_entries = entries;
        self
    }

    /// Build the limiter
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidConfig`] if any limit is zero.
    pub fn build(self) -> Result<SlidingWindowLimiter, GateError> {
        SlidingWindowLimiter::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::builder()
            .window_size(Duration::from_secs(60))
            .max_requests(max_requests)
            .sliding_window_count(5)
            .block_duration(Duration::from_secs(120))
            .build()
            .unwrap()
    }

    #[test]
    fn test_first_request_creates_entry() {
        let mut limiter = limiter(3);
        let now = SystemTime::now();

        let decision = limiter.check("a", now);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.reset_after, Duration::from_secs(300));
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_blocked_checks_do_not_touch_windows() {
        let mut limiter = limiter(2);
        let now = SystemTime::now();

        assert!(limiter.check("a", now).allowed);
        assert!(limiter.check("a", now).allowed);
        let denied = limiter.check("a", now);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(120));

        // Half way through the block the wait shrinks accordingly
        let later = now + Duration::from_secs(60);
        let denied = limiter.check("a", later);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(60));
        assert_eq!(
            limiter.entries.get("a").unwrap().used(),
            2,
            "blocked checks must not count"
        );
    }

    #[test]
    fn test_expired_block_clears_history() {
        let mut limiter = limiter(2);
        let now = SystemTime::now();

        limiter.check("a", now);
        limiter.check("a", now);
        assert!(!limiter.check("a", now).allowed);

        // Block is over but the old requests are still inside the horizon;
        // they must be forgotten anyway
        let after_block = now + Duration::from_secs(121);
        let decision = limiter.check("a", after_block);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn test_buckets_roll_off_the_horizon() {
        let mut limiter = SlidingWindowLimiter::builder()
            .window_size(Duration::from_secs(10))
            .max_requests(3)
            .sliding_window_count(2)
            .build()
            .unwrap();
        let now = SystemTime::now();

        limiter.check("a", now);
        limiter.check("a", now + Duration::from_secs(11));
        let third = limiter.check("a", now + Duration::from_secs(12));
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);
        // The oldest bucket leaves the 20s horizon at t=20
        assert_eq!(third.reset_after, Duration::from_secs(8));

        // At t=20 the first bucket has been pruned, leaving two counted requests
        let fourth = limiter.check("a", now + Duration::from_secs(20));
        assert!(fourth.allowed);
        assert_eq!(fourth.remaining, 0);
    }

    #[test]
    fn test_unbounded_block_saturates() {
        let mut limiter = limiter(10);
        let now = SystemTime::now();

        limiter.block("abuser", Duration::MAX, now);
        let decade = Duration::from_secs(10 * 365 * 24 * 60 * 60);
        assert!(limiter.is_blocked("abuser", now + decade));
        let decision = limiter.check("abuser", now);
        assert!(!decision.allowed);
        assert!(decision.retry_after > decade);
    }

    #[test]
    fn test_huge_block_duration_config_saturates() {
        let mut limiter = SlidingWindowLimiter::builder()
            .max_requests(1)
            .block_duration(Duration::MAX)
            .build()
            .unwrap();
        let now = SystemTime::now();

        assert!(limiter.check("a", now).allowed);
        assert!(!limiter.check("a", now).allowed);
        assert!(limiter.is_blocked("a", now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_manual_block_and_unblock() {
        let mut limiter = limiter(10);
        let now = SystemTime::now();

        limiter.block("abuser", Duration::from_secs(30), now);
        assert!(limiter.is_blocked("abuser", now));
        let decision = limiter.check("abuser", now + Duration::from_secs(10));
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Duration::from_secs(20));

        assert!(limiter.unblock("abuser"));
        assert!(!limiter.is_blocked("abuser", now));
        assert!(limiter.check("abuser", now).allowed);
        assert!(!limiter.unblock("unknown"));
    }

    #[test]
    fn test_cleanup_removes_idle_identifiers() {
        let mut limiter = limiter(1);
        let now = SystemTime::now();

        limiter.check("idle", now);
        limiter.check("blocked", now);
        limiter.check("blocked", now);
        assert!(limiter.is_blocked("blocked", now));

        // Past the 300s horizon "idle" goes; "blocked" checked again so it stays active
        let later = now + Duration::from_secs(301);
        limiter.block("blocked", Duration::from_secs(60), later);
        let removed = limiter.cleanup(later);
        assert_eq!(removed, 1);
        assert!(limiter.entries.contains_key("blocked"));
        assert!(!limiter.entries.contains_key("idle"));
    }

    #[test]
    fn test_cleanup_trims_least_recently_active() {
        let mut limiter = SlidingWindowLimiter::builder()
            .max_memory_entries(2)
            .build()
            .unwrap();
        let now = SystemTime::now();

        limiter.check("oldest", now);
        limiter.check("middle", now + Duration::from_secs(1));
        limiter.check("newest", now + Duration::from_secs(2));

        let removed = limiter.cleanup(now + Duration::from_secs(3));
        assert_eq!(removed, 1);
        assert_eq!(limiter.len(), 2);
        assert!(!limiter.entries.contains_key("oldest"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(SlidingWindowLimiter::builder().max_requests(0).build().is_err());
        assert!(
            SlidingWindowLimiter::builder()
                .sliding_window_count(0)
                .build()
                .is_err()
        );
        assert!(
            SlidingWindowLimiter::builder()
                .window_size(Duration::ZERO)
                .build()
                .is_err()
        );
    }
}
