//! Async circuit breaker for one downstream dependency
//!
//! Wraps the synchronous [`CircuitBreaker`] state machine behind a mutex.
//! The lock is only ever held for a state update, never across an `.await`,
//! so a slow downstream call cannot stall other callers.

use crate::error::{GovernanceError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;
use throttlegate::{
    BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};

/// Named circuit breaker shared between concurrent callers
pub struct AsyncCircuitBreaker {
    name: Arc<str>,
    inner: Mutex<CircuitBreaker>,
}

impl AsyncCircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(CircuitBreaker::new(config)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.inner.lock().snapshot()
    }

    /// Run `call` if the breaker admits it, recording the outcome
    ///
    /// Fails fast with [`GovernanceError::CircuitOpen`] without invoking
    /// `call`. A failure of `call` is returned as
    /// [`GovernanceError::Upstream`] after being counted.
    ///
    /// If the returned future is dropped before `call` settles, the permit is
    /// released without counting an outcome, so an abandoned half-open trial
    /// does not wedge the breaker.
    pub async fn execute<F, Fut, T>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut guard = self.acquire()?;
        match call().await {
            Ok(value) => {
                guard.succeed();
                Ok(value)
            }
            Err(err) => {
                guard.fail();
                Err(GovernanceError::upstream(err))
            }
        }
    }

    /// Force the breaker closed
    pub fn reset(&self) {
        self.inner.lock().reset(SystemTime::now());
        tracing::info!(breaker = %self.name, "circuit breaker reset");
    }

    /// Force the breaker open, starting a fresh cooldown
    pub fn trip(&self) {
        self.inner.lock().trip(SystemTime::now());
        tracing::warn!(breaker = %self.name, "circuit breaker tripped manually");
    }

    fn acquire(&self) -> Result<PermitGuard<'_>> {
        let (admitted, state) = {
            let mut inner = self.inner.lock();
            let admitted = inner.try_acquire(SystemTime::now());
            (admitted, inner.state())
        };

        match admitted {
            Ok(permit) => {
                if permit.is_trial() {
                    tracing::info!(breaker = %self.name, "circuit breaker half-open, sending trial call");
                }
                Ok(PermitGuard {
                    breaker: self,
                    permit: Some(permit),
                })
            }
            Err(rejection) => {
                tracing::debug!(
                    breaker = %self.name,
                    state = state.as_str(),
                    retry_after_ms = rejection.retry_after.as_millis() as u64,
                    "call rejected by circuit breaker"
                );
                Err(GovernanceError::CircuitOpen {
                    breaker: Arc::clone(&self.name),
                    retry_after: rejection.retry_after,
                })
            }
        }
    }

    fn log_transition(&self, to: Option<CircuitState>) {
        match to {
            Some(CircuitState::Open) => {
                let failures = self.inner.lock().snapshot().consecutive_failures;
                tracing::warn!(
                    breaker = %self.name,
                    consecutive_failures = failures,
                    "circuit breaker opened"
                );
            }
            Some(CircuitState::Closed) => {
                tracing::info!(breaker = %self.name, "circuit breaker closed, dependency recovered");
            }
            Some(CircuitState::HalfOpen) | None => {}
        }
    }
}

/// Holds an admitted call's permit until an outcome is recorded
struct PermitGuard<'a> {
    breaker: &'a AsyncCircuitBreaker,
    permit: Option<CallPermit>,
}

impl PermitGuard<'_> {
    fn succeed(&mut self) {
        if let Some(permit) = self.permit.take() {
            let transition = self
                .breaker
                .inner
                .lock()
                .record_success(permit, SystemTime::now());
            self.breaker.log_transition(transition);
        }
    }

    fn fail(&mut self) {
        if let Some(permit) = self.permit.take() {
            let transition = self
                .breaker
                .inner
                .lock()
                .record_failure(permit, SystemTime::now());
            self.breaker.log_transition(transition);
        }
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.inner.lock().release(permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn breaker(cooldown: Duration) -> Arc<AsyncCircuitBreaker> {
        Arc::new(AsyncCircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                cooldown,
            },
        ))
    }

    async fn fail_once(breaker: &AsyncCircuitBreaker) {
        let result: Result<()> = breaker
            .execute(|| async { Err(anyhow::anyhow!("downstream unavailable")) })
            .await;
        assert!(matches!(result, Err(GovernanceError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_open_breaker_does_not_invoke_call() {
        let breaker = breaker(Duration::from_secs(60));
        fail_once(&breaker).await;
        fail_once(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicUsize::new(0);
        let result = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        match result {
            Err(GovernanceError::CircuitOpen {
                breaker: name,
                retry_after,
            }) => {
                assert_eq!(&*name, "test");
                assert!(retry_after > Duration::from_secs(59));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recovers_after_cooldown() {
        let breaker = breaker(Duration::from_millis(20));
        fail_once(&breaker).await;
        fail_once(&breaker).await;

        tokio::time::sleep(Duration::from_millis(40)).await;

        let value = breaker.execute(|| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_admits_single_trial() {
        let breaker = breaker(Duration::from_millis(20));
        fail_once(&breaker).await;
        fail_once(&breaker).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let trial = tokio::spawn({
            let breaker = Arc::clone(&breaker);
            async move {
                breaker
                    .execute(|| async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            }
        });

        while !breaker.snapshot().trial_in_flight {
            tokio::task::yield_now().await;
        }

        // Concurrent caller fails fast while the trial runs
        let rejected: Result<()> = breaker.execute(|| async { Ok(()) }).await;
        match rejected {
            Err(GovernanceError::CircuitOpen { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::ZERO)
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_trial_frees_slot() {
        let breaker = breaker(Duration::from_millis(20));
        fail_once(&breaker).await;
        fail_once(&breaker).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let stuck = tokio::spawn({
            let breaker = Arc::clone(&breaker);
            async move {
                breaker
                    .execute(|| futures::future::pending::<anyhow::Result<()>>())
                    .await
            }
        });
        while !breaker.snapshot().trial_in_flight {
            tokio::task::yield_now().await;
        }

        stuck.abort();
        let _ = stuck.await;

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::HalfOpen);
        assert!(!snapshot.trial_in_flight);
        assert!(breaker.execute(|| async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_manual_trip_and_reset() {
        let breaker = breaker(Duration::from_secs(60));
        breaker.trip();
        assert!(breaker.execute(|| async { Ok(()) }).await.is_err());
        breaker.reset();
        assert!(breaker.execute(|| async { Ok(()) }).await.is_ok());
    }
}
