//! Core components of the throttlegate admission control library
//!
//! This module contains the fundamental building blocks:
//! - [`sliding_window`]: Sustained-rate limiting over a rolling multi-bucket horizon
//! - [`token_bucket`]: Short-horizon burst limiting with lazy refill
//! - [`ttl_cache`]: Bounded key/value cache with per-entry TTL and LRU eviction
//! - [`circuit_breaker`]: Closed/Open/HalfOpen state machine guarding one dependency

pub mod circuit_breaker;
pub mod sliding_window;
pub mod token_bucket;
pub mod ttl_cache;

pub use circuit_breaker::{
    BreakerRejection, BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerConfig,
    CircuitState,
};
pub use sliding_window::{
    RateLimitDecision, SlidingWindowBuilder, SlidingWindowConfig, SlidingWindowLimiter,
};
pub use token_bucket::{ConsumeResult, TokenBucketConfig, TokenBucketLimiter};
pub use ttl_cache::{CacheConfig, CacheStats, TtlCache};

use std::error::Error;
use std::fmt;
use std::time::{Duration, SystemTime};

#[cfg(feature = "ahash")]
pub(crate) use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
pub(crate) use std::collections::HashMap;

/// Errors that can occur while constructing admission control components
///
/// Runtime operations (`check`, `consume`, `get`, `try_acquire`) never fail:
/// a denial is a normal return value. Only invalid configuration is an error.
///
/// # Example
///
/// ```
/// use throttlegate::{GateError, SlidingWindowConfig, SlidingWindowLimiter};
///
/// let config = SlidingWindowConfig {
///     max_requests: 0,
///     ..SlidingWindowConfig::default()
/// };
///
/// match SlidingWindowLimiter::new(config) {
///     Err(GateError::InvalidConfig(msg)) => println!("rejected: {msg}"),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// A configuration value is out of range
    InvalidConfig(String),
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl Error for GateError {}

/// Time elapsed between `earlier` and `now`, clamped to zero if the clock went backwards
pub(crate) fn elapsed(now: SystemTime, earlier: SystemTime) -> Duration {
    now.duration_since(earlier).unwrap_or(Duration::ZERO)
}

// Roughly a century; stands in for "never" when `now + duration` overflows
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + duration`, saturating to a far-future instant instead of overflowing
pub(crate) fn deadline_after(now: SystemTime, duration: Duration) -> SystemTime {
    now.checked_add(duration)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Time remaining from `now` until `deadline`, zero once the deadline has passed
pub(crate) fn remaining(deadline: SystemTime, now: SystemTime) -> Duration {
    deadline.duration_since(now).unwrap_or(Duration::ZERO)
}
