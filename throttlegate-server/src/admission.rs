//! Admission control: sustained rate first, then burst
//!
//! [`AdmissionControl`] runs the sliding window and then the token bucket
//! for one identifier. Both limiters live behind their own mutex; each check
//! is a short synchronous read-modify-write, so per-identifier state is never
//! interleaved and no lock is held across an `.await`.
//!
//! A request refused by the token bucket has already been counted by the
//! sliding window. Sustained-rate accounting therefore includes requests the
//! burst limiter turned away.

use crate::error::{GovernanceError, LimitScope, Result};
use crate::sweeper::Sweep;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime};
use throttlegate::{SlidingWindowLimiter, TokenBucketLimiter};

/// Quota information for an admitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Requests allowed per sliding-window horizon
    pub limit: u64,
    /// Requests left in the current horizon
    pub remaining: u64,
    /// Time until the oldest counted bucket leaves the horizon
    pub reset_after: Duration,
    /// Burst tokens left
    pub burst_remaining: u64,
}

impl Admission {
    /// `reset_after` in whole seconds, rounded up
    pub fn reset_after_secs(&self) -> u64 {
        self.reset_after
            .as_secs()
            .saturating_add(u64::from(self.reset_after.subsec_nanos() > 0))
    }
}

pub struct AdmissionControl {
    sustained: Mutex<SlidingWindowLimiter>,
    burst: Mutex<TokenBucketLimiter>,
}

impl AdmissionControl {
    pub fn new(sustained: SlidingWindowLimiter, burst: TokenBucketLimiter) -> Self {
        Self {
            sustained: Mutex::new(sustained),
            burst: Mutex::new(burst),
        }
    }

    /// Admit `tokens` units of work for `identifier` right now
    pub fn check(&self, identifier: &str, tokens: u64) -> Result<Admission> {
        self.check_at(identifier, tokens, SystemTime::now())
    }

    /// Admit `tokens` units of work for `identifier` at `now`
    pub fn check_at(&self, identifier: &str, tokens: u64, now: SystemTime) -> Result<Admission> {
        let decision = self.sustained.lock().check(identifier, now);
        if !decision.allowed {
            tracing::debug!(
                identifier,
                retry_after_ms = decision.retry_after.as_millis() as u64,
                "sustained rate limit exceeded"
            );
            return Err(GovernanceError::RateLimited {
                scope: LimitScope::Sustained,
                retry_after: decision.retry_after,
            });
        }

        let consumed = self.burst.lock().consume(identifier, tokens, now);
        if !consumed.allowed {
            tracing::debug!(
                identifier,
                tokens,
                retry_after_ms = consumed.retry_after.as_millis() as u64,
                "burst limit exceeded"
            );
            return Err(GovernanceError::RateLimited {
                scope: LimitScope::Burst,
                retry_after: consumed.retry_after,
            });
        }

        Ok(Admission {
            limit: decision.limit,
            remaining: decision.remaining,
            reset_after: decision.reset_after,
            burst_remaining: consumed.remaining,
        })
    }

    /// Block `identifier` on the sustained limiter for `duration`
    pub fn block(&self, identifier: &str, duration: Duration) {
        self.sustained
            .lock()
            .block(identifier, duration, SystemTime::now());
        tracing::info!(identifier, duration_ms = duration.as_millis() as u64, "identifier blocked");
    }

    pub fn unblock(&self, identifier: &str) -> bool {
        self.sustained.lock().unblock(identifier)
    }

    pub fn is_blocked(&self, identifier: &str) -> bool {
        self.sustained
            .lock()
            .is_blocked(identifier, SystemTime::now())
    }

    pub fn limit(&self) -> u64 {
        self.sustained.lock().config().max_requests
    }

    /// Identifiers currently tracked by the sliding window
    pub fn tracked(&self) -> usize {
        self.sustained.lock().len()
    }
}

impl Sweep for AdmissionControl {
    fn name(&self) -> &str {
        "admission"
    }

    fn sweep(&self, now: SystemTime) -> usize {
        let windows = self.sustained.lock().cleanup(now);
        let buckets = self.burst.lock().cleanup(now);
        windows + buckets
    }
}
