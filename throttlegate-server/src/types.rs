//! Common types used across the server
//!
//! Request descriptors for the [`Governor`](crate::governor::Governor)
//! pipeline and the wire types returned by the HTTP transport.

use crate::admission::Admission;
use crate::error::GovernanceError;
use crate::queue::EnqueueOptions;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use throttlegate::BreakerSnapshot;

/// One unit of work submitted to a governor
///
/// The `identifier` is derived by the caller (client address plus operation
/// class, for example) and is opaque here. Without a `fingerprint` the
/// request bypasses caching and de-duplication.
///
/// # Example
///
/// ```
/// use throttlegate_server::types::GovernedRequest;
/// use std::time::Duration;
///
/// let request = GovernedRequest::new("203.0.113.9:summarize")
///     .fingerprint("summary:doc-42")
///     .priority(10)
///     .timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct GovernedRequest {
    pub identifier: String,
    pub fingerprint: Option<String>,
    /// Burst tokens consumed by this request
    pub tokens: u64,
    pub priority: i32,
    /// Overrides the queue's default timeout
    pub timeout: Option<Duration>,
    /// Overrides the cache's default TTL
    pub cache_ttl: Option<Duration>,
}

impl GovernedRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            fingerprint: None,
            tokens: 1,
            priority: 0,
            timeout: None,
            cache_ttl: None,
        }
    }

    /// Cache and de-duplication key
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub(crate) fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions {
            priority: self.priority,
            timeout: self.timeout,
        }
    }
}

/// Where a governed result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Served from the response cache
    Cache,
    /// Produced by this caller's own downstream call
    Fresh,
    /// Produced by an identical in-flight call this caller joined
    Shared,
    /// Caller-supplied fallback after a failure
    Fallback,
}

/// Successful outcome of a governed request
#[derive(Debug, Clone)]
pub struct Governed<T> {
    pub value: T,
    pub admission: Admission,
    pub source: ResultSource,
}

/// HTTP request body for `POST /admit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmitRequest {
    pub identifier: String,
    /// Burst tokens to consume (defaults to 1)
    pub tokens: Option<u64>,
}

/// Response body for an admitted request
///
/// ```json
/// {
///   "allowed": true,
///   "limit": 10,
///   "remaining": 9,
///   "reset_after": 300,
///   "burst_remaining": 19
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmitResponse {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the oldest counted request leaves the horizon
    pub reset_after: u64,
    pub burst_remaining: u64,
}

impl From<Admission> for AdmitResponse {
    fn from(admission: Admission) -> Self {
        Self {
            allowed: true,
            limit: admission.limit,
            remaining: admission.remaining,
            reset_after: admission.reset_after_secs(),
            burst_remaining: admission.burst_remaining,
        }
    }
}

/// Error body returned for every refused or failed request
///
/// ```json
/// { "error": "rate limit exceeded (sustained), retry after 60s", "reason": "rate_limited", "retry_after": 60 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    pub reason: String,
    /// Seconds to wait before retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<&GovernanceError> for ErrorPayload {
    fn from(err: &GovernanceError) -> Self {
        Self {
            error: err.to_string(),
            reason: err.reason().to_string(),
            retry_after: err.retry_after_secs(),
        }
    }
}

/// Breaker state as reported by `GET /breaker`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: String,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the Unix epoch
    pub opened_at: Option<u64>,
    pub trial_in_flight: bool,
}

impl BreakerStatus {
    pub fn new(name: &str, snapshot: BreakerSnapshot) -> Self {
        Self {
            name: name.to_string(),
            state: snapshot.state.as_str().to_string(),
            consecutive_failures: snapshot.consecutive_failures,
            consecutive_successes: snapshot.consecutive_successes,
            opened_at: snapshot.opened_at.map(epoch_millis),
            trial_in_flight: snapshot.trial_in_flight,
        }
    }
}

fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis() as u64)
        .unwrap_or(0)
}
