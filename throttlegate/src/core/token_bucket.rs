//! Token bucket burst limiter
//!
//! [`TokenBucketLimiter`] keeps one bucket per identifier. Buckets start full,
//! refill lazily by whole tokens on every [`consume`](TokenBucketLimiter::consume)
//! call, and never exceed `max_tokens`. It is meant for short-horizon burst
//! protection layered in front of the sliding window limiter, which governs
//! the sustained rate.

use super::{GateError, HashMap, elapsed};
use std::time::{Duration, SystemTime};

// Configuration constants
const DEFAULT_MAX_TOKENS: u64 = 20;
const DEFAULT_REFILL_RATE: f64 = 2.0;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Configuration for a [`TokenBucketLimiter`]
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucketConfig {
    /// Bucket capacity; also the size of the largest allowed burst
    pub max_tokens: u64,
    /// Tokens added per second
    pub refill_rate: f64,
    /// Buckets untouched for this long are dropped by [`TokenBucketLimiter::cleanup`]
    pub idle_timeout: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            refill_rate: DEFAULT_REFILL_RATE,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

/// Result of a consume attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeResult {
    /// Whether the tokens were taken
    pub allowed: bool,
    /// Whole tokens left in the bucket after this call
    pub remaining: u64,
    /// Time until enough tokens will have refilled (zero if allowed)
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: SystemTime,
    last_used: SystemTime,
}

/// Per-identifier token bucket limiter
///
/// # Example
///
/// ```
/// use throttlegate::{TokenBucketConfig, TokenBucketLimiter};
/// use std::time::{Duration, SystemTime};
///
/// // Burst of 20, refilling 2 tokens per second
/// let mut limiter = TokenBucketLimiter::new(TokenBucketConfig {
///     max_tokens: 20,
///     refill_rate: 2.0,
///     ..TokenBucketConfig::default()
/// })
/// .unwrap();
///
/// let now = SystemTime::now();
/// for _ in 0..20 {
///     assert!(limiter.consume("client", 1, now).allowed);
/// }
///
/// let result = limiter.consume("client", 1, now);
/// assert!(!result.allowed);
/// assert_eq!(result.retry_after, Duration::from_millis(500));
/// ```
pub struct TokenBucketLimiter {
    buckets: HashMap<String, TokenBucket>,
    config: TokenBucketConfig,
    refill_interval: Duration,
}

impl TokenBucketLimiter {
    /// Create a limiter from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidConfig`] if `max_tokens` is zero or
    /// `refill_rate` is not a positive finite number.
    pub fn new(config: TokenBucketConfig) -> Result<Self, GateError> {
        if config.max_tokens == 0 {
            return Err(GateError::InvalidConfig(
                "max_tokens must be greater than zero".into(),
            ));
        }
        if !config.refill_rate.is_finite() || config.refill_rate <= 0.0 {
            return Err(GateError::InvalidConfig(format!(
                "refill_rate must be a positive number, got {}",
                config.refill_rate
            )));
        }

        let interval_ns = (1_000_000_000.0 / config.refill_rate).max(1.0) as u64;
        Ok(TokenBucketLimiter {
            buckets: HashMap::new(),
            refill_interval: Duration::from_nanos(interval_ns),
            config,
        })
    }

    /// The configuration this limiter was built with
    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Time it takes to refill a single token
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Try to take `tokens` from the bucket of `identifier`
    ///
    /// On denial the token count is left as it was and `retry_after` reports
    /// how long the missing tokens take to refill.
    pub fn consume(&mut self, identifier: &str, tokens: u64, now: SystemTime) -> ConsumeResult {
        let max_tokens = self.config.max_tokens as f64;
        let interval = self.refill_interval;

        let bucket = self
            .buckets
            .entry(identifier.to_string())
            .or_insert(TokenBucket {
                tokens: max_tokens,
                last_refill: now,
                last_used: now,
            });
        bucket.last_used = now;

        let intervals = elapsed(now, bucket.last_refill).as_nanos() / interval.as_nanos();
        if intervals > 0 {
            bucket.tokens = (bucket.tokens + intervals as f64).min(max_tokens);
            if bucket.tokens >= max_tokens {
                bucket.last_refill = now;
            } else {
                // Keep the partial interval so slow callers are not penalised
                let advanced = interval.as_nanos().saturating_mul(intervals);
                bucket.last_refill += Duration::from_nanos(advanced.min(u64::MAX as u128) as u64);
            }
        }

        let requested = tokens as f64;
        if bucket.tokens >= requested {
            bucket.tokens -= requested;
            return ConsumeResult {
                allowed: true,
                remaining: bucket.tokens.floor() as u64,
                retry_after: Duration::ZERO,
            };
        }

        let needed = requested - bucket.tokens;
        let wait_ms = (needed * interval.as_secs_f64() * 1000.0).ceil();
        ConsumeResult {
            allowed: false,
            remaining: bucket.tokens.floor() as u64,
            retry_after: Duration::from_millis(wait_ms as u64),
        }
    }

    /// Drop buckets that have been idle for at least `idle_timeout`
    ///
    /// Returns the number of buckets removed.
    pub fn cleanup(&mut self, now: SystemTime) -> usize {
        let before = self.buckets.len();
        let idle_timeout = self.config.idle_timeout;
        self.buckets
            .retain(|_, bucket| elapsed(now, bucket.last_used) < idle_timeout);
        before - self.buckets.len()
    }

    /// Number of tracked buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
