//! Circuit breaker state machine
//!
//! [`CircuitBreaker`] guards exactly one downstream dependency. It decides
//! whether a call may run and learns from the outcome of the calls it let
//! through:
//!
//! ```text
//!            failure_threshold consecutive failures
//!   Closed ─────────────────────────────────────────► Open
//!     ▲                                                │
//!     │ success_threshold                              │ cooldown elapsed
//!     │ consecutive trial successes                    │ (checked lazily on the next call)
//!     │                                                ▼
//!     └──────────────────────────────────────────── HalfOpen
//!                      trial failure ──► Open (fresh opened_at)
//! ```
//!
//! In `HalfOpen` only one trial call may be outstanding at a time; every
//! other call fails fast as if the breaker were open.
//!
//! The state machine is synchronous and never sleeps. Every admitted call
//! receives a [`CallPermit`] that must be handed back through
//! [`record_success`](CircuitBreaker::record_success),
//! [`record_failure`](CircuitBreaker::record_failure) or
//! [`release`](CircuitBreaker::release). Permits remember the generation they
//! were issued in; outcomes reported after a state transition are ignored.

use super::{deadline_after, elapsed, remaining};
use std::time::{Duration, SystemTime};

// Configuration constants
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 3;
const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls flow through normally
    Closed,
    /// The dependency is presumed unhealthy; calls fail fast
    Open,
    /// Cooldown elapsed; a single trial call probes the dependency
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Configuration for a [`CircuitBreaker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` that open the breaker
    pub failure_threshold: u32,
    /// Consecutive trial successes in `HalfOpen` that close the breaker
    pub success_threshold: u32,
    /// Time spent `Open` before the next call becomes a trial
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        }
    }
}

/// Proof that a call was admitted
#[derive(Debug)]
#[must_use = "a permit must be returned through record_success, record_failure or release"]
pub struct CallPermit {
    generation: u64,
    trial: bool,
}

impl CallPermit {
    /// Whether this call is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

/// A call refused by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerRejection {
    /// Time left until the breaker will admit a trial, zero if a trial is already running
    pub retry_after: Duration,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_at: Option<SystemTime>,
    pub trial_in_flight: bool,
}

/// Closed/Open/HalfOpen circuit breaker for one dependency
///
/// # Example
///
/// ```
/// use throttlegate::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
/// use std::time::{Duration, SystemTime};
///
/// let mut breaker = CircuitBreaker::new(CircuitBreakerConfig {
///     failure_threshold: 2,
///     success_threshold: 1,
///     cooldown: Duration::from_secs(30),
/// });
/// let now = SystemTime::now();
///
/// for _ in 0..2 {
///     let permit = breaker.try_acquire(now).unwrap();
///     breaker.record_failure(permit, now);
/// }
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(breaker.try_acquire(now).is_err());
///
/// let later = now + Duration::from_secs(30);
/// let trial = breaker.try_acquire(later).unwrap();
/// assert!(trial.is_trial());
/// breaker.record_success(trial, later);
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<SystemTime>,
    trial_in_flight: bool,
    generation: u64,
}

impl CircuitBreaker {
    /// Create a closed breaker
    ///
    /// Thresholds of zero are treated as one.
    pub fn new(mut config: CircuitBreakerConfig) -> Self {
        config.failure_threshold = config.failure_threshold.max(1);
        config.success_threshold = config.success_threshold.max(1);
        CircuitBreaker {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            trial_in_flight: false,
            generation: 0,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, without applying the lazy Open → HalfOpen transition
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            opened_at: self.opened_at,
            trial_in_flight: self.trial_in_flight,
        }
    }

    /// Ask to run one call at `now`
    ///
    /// An open breaker whose cooldown has elapsed moves to `HalfOpen` here
    /// and admits the caller as the trial.
    pub fn try_acquire(&mut self, now: SystemTime) -> Result<CallPermit, BreakerRejection> {
        match self.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let ready_at = deadline_after(opened_at, self.config.cooldown);
                if elapsed(now, opened_at) < self.config.cooldown {
                    return Err(BreakerRejection {
                        retry_after: remaining(ready_at, now),
                    });
                }
                self.transition(CircuitState::HalfOpen, now);
                self.trial_in_flight = true;
                Ok(self.permit(true))
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    return Err(BreakerRejection {
                        retry_after: Duration::ZERO,
                    });
                }
                self.trial_in_flight = true;
                Ok(self.permit(true))
            }
        }
    }

    /// Report that an admitted call succeeded
    ///
    /// Returns the new state if this outcome caused a transition.
    pub fn record_success(&mut self, permit: CallPermit, now: SystemTime) -> Option<CircuitState> {
        if permit.generation != self.generation {
            return None;
        }
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.trial_in_flight = false;
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.config.success_threshold {
                    self.transition(CircuitState::Closed, now);
                    Some(CircuitState::Closed)
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    /// Report that an admitted call failed
    ///
    /// Returns the new state if this outcome caused a transition.
    pub fn record_failure(&mut self, permit: CallPermit, now: SystemTime) -> Option<CircuitState> {
        if permit.generation != self.generation {
            return None;
        }
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.transition(CircuitState::Open, now);
                    Some(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures += 1;
                self.transition(CircuitState::Open, now);
                Some(CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    /// Hand back a permit whose call was abandoned before producing an outcome
    ///
    /// Nothing is counted; a half-open trial slot is freed for the next caller.
    pub fn release(&mut self, permit: CallPermit) {
        if permit.trial && permit.generation == self.generation {
            self.trial_in_flight = false;
        }
    }

    /// Force the breaker closed and clear all counters
    pub fn reset(&mut self, now: SystemTime) {
        self.transition(CircuitState::Closed, now);
    }

    /// Force the breaker open starting at `now`
    pub fn trip(&mut self, now: SystemTime) {
        self.transition(CircuitState::Open, now);
    }

    fn permit(&self, trial: bool) -> CallPermit {
        CallPermit {
            generation: self.generation,
            trial,
        }
    }

    fn transition(&mut self, to: CircuitState, now: SystemTime) {
        self.state = to;
        self.generation += 1;
        self.trial_in_flight = false;
        self.consecutive_successes = 0;
        match to {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.opened_at = None;
            }
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::HalfOpen => {}
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
