//! # ThrottleGate
//!
//! Admission control primitives for protecting an expensive backend from overload.
//!
//! ## Overview
//!
//! ThrottleGate answers four questions about every unit of work before it
//! reaches a downstream dependency:
//! - **Should it be admitted?** [`SlidingWindowLimiter`] governs the sustained rate,
//!   [`TokenBucketLimiter`] absorbs short bursts
//! - **Have we already computed it?** [`TtlCache`] keeps recent results with a TTL
//!   and LRU eviction
//! - **Is the downstream healthy?** [`CircuitBreaker`] fails fast while a dependency
//!   is presumed broken and probes it with one trial call at a time
//!
//! This crate is synchronous and performs no I/O. Every time-dependent
//! operation takes an explicit `now`, which makes behaviour deterministic and
//! trivially testable. The async pieces (request de-duplication, the bounded
//! priority queue and the composed pipeline) live in `throttlegate-server`.
//!
//! ## Quick Start
//!
//! ```
//! use throttlegate::{SlidingWindowLimiter, TokenBucketConfig, TokenBucketLimiter};
//! use std::time::{Duration, SystemTime};
//!
//! // 10 requests per 5 minutes, blocked for a minute on violation
//! let mut sustained = SlidingWindowLimiter::builder()
//!     .window_size(Duration::from_secs(60))
//!     .max_requests(10)
//!     .sliding_window_count(5)
//!     .block_duration(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//!
//! // Bursts of up to 20, refilling 2 per second
//! let mut burst = TokenBucketLimiter::new(TokenBucketConfig::default()).unwrap();
//!
//! let now = SystemTime::now();
//! let decision = sustained.check("203.0.113.9:generate", now);
//! if !decision.allowed {
//!     println!("Rate limited! Retry after: {} seconds", decision.retry_after.as_secs());
//! } else if !burst.consume("203.0.113.9:generate", 1, now).allowed {
//!     println!("Slow down");
//! }
//! ```
//!
//! ## Caching
//!
//! ```
//! use throttlegate::{CacheConfig, TtlCache};
//! use std::time::{Duration, SystemTime};
//!
//! // One cache per class of data, each with its own TTL and size
//! let mut summaries: TtlCache<String, String> = TtlCache::new(CacheConfig {
//!     default_ttl: Duration::from_secs(600),
//!     max_entries: 500,
//! })
//! .unwrap();
//!
//! let now = SystemTime::now();
//! summaries.set_default("doc:42".to_string(), "cached summary".to_string(), now);
//! assert!(summaries.get("doc:42", now).is_some());
//! ```
//!
//! ## Failure Isolation
//!
//! ```
//! use throttlegate::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::SystemTime;
//!
//! let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//! let now = SystemTime::now();
//!
//! match breaker.try_acquire(now) {
//!     Ok(permit) => {
//!         // ... call the dependency ...
//!         breaker.record_success(permit, now);
//!     }
//!     Err(rejection) => println!("circuit open, retry in {:?}", rejection.retry_after),
//! }
//! ```
//!
//! ## Thread Safety
//!
//! None of the components are thread-safe by themselves. Every operation is a
//! short, non-blocking read-modify-write, so for concurrent access wrap each
//! one in a mutex:
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use throttlegate::{SlidingWindowConfig, SlidingWindowLimiter};
//!
//! let limiter = Arc::new(Mutex::new(
//!     SlidingWindowLimiter::new(SlidingWindowConfig::default()).unwrap(),
//! ));
//! ```
//!
//! ## Features
//!
//! - `ahash` (default): Use AHash for faster hashing

pub mod core;

pub use core::{
    BreakerRejection, BreakerSnapshot, CacheConfig, CacheStats, CallPermit, CircuitBreaker,
    CircuitBreakerConfig, CircuitState, ConsumeResult, GateError, RateLimitDecision,
    SlidingWindowBuilder, SlidingWindowConfig, SlidingWindowLimiter, TokenBucketConfig,
    TokenBucketLimiter, TtlCache,
};
