//! Error taxonomy of the governance layer
//!
//! Every failure a caller can observe is a [`GovernanceError`]. The type is
//! `Clone` because a de-duplicated call hands the very same settled error to
//! every subscriber.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Which limiter refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    /// Sliding window: sustained rate over the rolling horizon
    Sustained,
    /// Token bucket: short-horizon burst
    Burst,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitScope::Sustained => write!(f, "sustained"),
            LimitScope::Burst => write!(f, "burst"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum GovernanceError {
    #[error("rate limit exceeded ({scope}), retry after {retry_after:?}")]
    RateLimited {
        scope: LimitScope,
        retry_after: Duration,
    },

    #[error("circuit breaker '{breaker}' is open, retry after {retry_after:?}")]
    CircuitOpen {
        breaker: Arc<str>,
        retry_after: Duration,
    },

    #[error("task did not complete within {timeout:?}")]
    QueueTimeout { timeout: Duration },

    #[error("request queue is closed")]
    QueueClosed,

    #[error("upstream error: {0}")]
    Upstream(Arc<anyhow::Error>),

    #[error("internal error: {0}")]
    Internal(String),
}

// Queue timeouts are transient; suggest a short backoff
const QUEUE_TIMEOUT_RETRY_HINT: Duration = Duration::from_secs(1);

impl GovernanceError {
    /// Wrap a failure of the downstream call
    pub fn upstream(err: impl Into<anyhow::Error>) -> Self {
        GovernanceError::Upstream(Arc::new(err.into()))
    }

    /// Machine-readable reason surfaced to callers
    pub fn reason(&self) -> &'static str {
        match self {
            GovernanceError::RateLimited { .. } => "rate_limited",
            GovernanceError::CircuitOpen { .. } => "circuit_open",
            GovernanceError::QueueTimeout { .. } => "queue_timeout",
            GovernanceError::QueueClosed => "queue_closed",
            GovernanceError::Upstream(_) => "upstream_error",
            GovernanceError::Internal(_) => "internal_error",
        }
    }

    /// How long the caller should wait before retrying, if a retry makes sense
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GovernanceError::RateLimited { retry_after, .. }
            | GovernanceError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            GovernanceError::QueueTimeout { .. } => Some(QUEUE_TIMEOUT_RETRY_HINT),
            _ => None,
        }
    }

    /// Retry hint in whole seconds, rounded up and never below one
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after().map(|wait| {
            let secs = wait.as_secs().saturating_add(u64::from(wait.subsec_nanos() > 0));
            secs.max(1)
        })
    }

    /// Whether a caller-supplied fallback may stand in for the result
    ///
    /// Rate-limit denials are never masked: the caller asked too often and
    /// must see the backpressure signal.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            GovernanceError::Upstream(_)
                | GovernanceError::CircuitOpen { .. }
                | GovernanceError::QueueTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons() {
        let limited = GovernanceError::RateLimited {
            scope: LimitScope::Burst,
            retry_after: Duration::from_millis(500),
        };
        assert_eq!(limited.reason(), "rate_limited");
        assert_eq!(
            GovernanceError::CircuitOpen {
                breaker: "llm".into(),
                retry_after: Duration::ZERO,
            }
            .reason(),
            "circuit_open"
        );
        assert_eq!(
            GovernanceError::QueueTimeout {
                timeout: Duration::from_secs(30)
            }
            .reason(),
            "queue_timeout"
        );
        assert_eq!(
            GovernanceError::upstream(anyhow::anyhow!("boom")).reason(),
            "upstream_error"
        );
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        let half_second = GovernanceError::RateLimited {
            scope: LimitScope::Burst,
            retry_after: Duration::from_millis(500),
        };
        assert_eq!(half_second.retry_after_secs(), Some(1));

        let blocked = GovernanceError::RateLimited {
            scope: LimitScope::Sustained,
            retry_after: Duration::from_millis(60_001),
        };
        assert_eq!(blocked.retry_after_secs(), Some(61));

        let trial_running = GovernanceError::CircuitOpen {
            breaker: "llm".into(),
            retry_after: Duration::ZERO,
        };
        assert_eq!(trial_running.retry_after_secs(), Some(1));

        assert_eq!(
            GovernanceError::upstream(anyhow::anyhow!("boom")).retry_after_secs(),
            None
        );
    }

    #[test]
    fn test_fallback_never_masks_rate_limits() {
        let limited = GovernanceError::RateLimited {
            scope: LimitScope::Sustained,
            retry_after: Duration::from_secs(60),
        };
        assert!(!limited.allows_fallback());
        assert!(GovernanceError::upstream(anyhow::anyhow!("boom")).allows_fallback());
        assert!(!GovernanceError::QueueClosed.allows_fallback());
    }

    #[test]
    fn test_upstream_display_passes_message_through() {
        let err = GovernanceError::upstream(anyhow::anyhow!("provider returned 500"));
        assert_eq!(err.to_string(), "upstream error: provider returned 500");
    }
}
