//! The full governance pipeline
//!
//! For one unit of work a [`Governor`] runs, in order:
//!
//! 1. admission control (sliding window, then token bucket)
//! 2. cache lookup, returning immediately on a hit
//! 3. de-duplication against identical in-flight work
//! 4. the priority queue, waiting for a concurrency slot
//! 5. the circuit breaker, wrapping only the downstream call
//! 6. cache population on success
//!
//! Steps 4 to 6 run inside the de-duplicated producer, so N identical
//! concurrent requests cost one queue slot, one breaker decision and one
//! cache write. Cache hits never reach the breaker.
//!
//! Limiters, the queue and the breaker are shared through `Arc`s, so several
//! governors caching different classes of data can share one admission
//! policy and one downstream breaker.

use crate::admission::{Admission, AdmissionControl};
use crate::breaker::AsyncCircuitBreaker;
use crate::cache::ResponseCache;
use crate::dedup::RequestDeduplicator;
use crate::error::{GovernanceError, Result};
use crate::metrics::Metrics;
use crate::queue::{EnqueueOptions, PriorityRequestQueue};
use crate::types::{Governed, GovernedRequest, ResultSource};
use anyhow::anyhow;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

pub struct Governor<T> {
    admission: Arc<AdmissionControl>,
    cache: Arc<ResponseCache<T>>,
    dedup: RequestDeduplicator<T>,
    queue: PriorityRequestQueue,
    breaker: Arc<AsyncCircuitBreaker>,
    metrics: Arc<Metrics>,
}

impl<T> Governor<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn builder() -> GovernorBuilder<T> {
        GovernorBuilder::new()
    }

    /// Run `work` under every governance control
    ///
    /// `work` is only invoked if the request is admitted, misses the cache,
    /// is not already in flight, obtains a queue slot in time and the
    /// breaker lets it through.
    pub async fn execute<F, Fut>(&self, request: GovernedRequest, work: F) -> Result<Governed<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let started = Instant::now();
        let outcome = match self.admit(&request) {
            Ok(admission) => self.run_admitted(admission, request, work).await,
            Err(denied) => Err(denied),
        };
        self.metrics
            .record_latency(started.elapsed().as_micros() as u64);
        outcome
    }

    /// Like [`execute`](Self::execute), answering with `fallback` when the
    /// downstream fails, the breaker is open or the queue timed out
    ///
    /// Rate-limit denials are returned unchanged.
    pub async fn execute_with_fallback<F, Fut, FB>(
        &self,
        request: GovernedRequest,
        work: F,
        fallback: FB,
    ) -> Result<Governed<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        FB: FnOnce(&GovernanceError) -> T,
    {
        let started = Instant::now();
        let admission = match self.admit(&request) {
            Ok(admission) => admission,
            Err(denied) => {
                self.metrics
                    .record_latency(started.elapsed().as_micros() as u64);
                return Err(denied);
            }
        };
        let identifier = request.identifier.clone();
        let outcome = match self.run_admitted(admission, request, work).await {
            Err(err) if err.allows_fallback() => {
                tracing::warn!(
                    identifier = %identifier,
                    reason = err.reason(),
                    error = %err,
                    "serving fallback"
                );
                self.metrics.record_fallback();
                Ok(Governed {
                    value: fallback(&err),
                    admission,
                    source: ResultSource::Fallback,
                })
            }
            other => other,
        };
        self.metrics
            .record_latency(started.elapsed().as_micros() as u64);
        outcome
    }

    fn admit(&self, request: &GovernedRequest) -> Result<Admission> {
        match self.admission.check(&request.identifier, request.tokens) {
            Ok(admission) => {
                self.metrics.record_admitted();
                Ok(admission)
            }
            Err(err) => {
                self.metrics.record_error(&err);
                Err(err)
            }
        }
    }

    async fn run_admitted<F, Fut>(
        &self,
        admission: Admission,
        request: GovernedRequest,
        work: F,
    ) -> Result<Governed<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let options = request.enqueue_options();
        let queue = self.queue.clone();
        let breaker = Arc::clone(&self.breaker);

        let Some(fingerprint) = request.fingerprint else {
            return match dispatch(queue, breaker, options, work).await {
                Ok(value) => Ok(Governed {
                    value,
                    admission,
                    source: ResultSource::Fresh,
                }),
                Err(err) => {
                    self.metrics.record_error(&err);
                    Err(err)
                }
            };
        };

        if let Some(value) = self.cache.get(&fingerprint) {
            self.metrics.record_cache(true);
            tracing::trace!(fingerprint = %fingerprint, cache = self.cache.name(), "cache hit");
            return Ok(Governed {
                value,
                admission,
                source: ResultSource::Cache,
            });
        }
        self.metrics.record_cache(false);

        let cache = Arc::clone(&self.cache);
        let key = fingerprint.clone();
        let ttl = request.cache_ttl;
        let outcome = self
            .dedup
            .execute_detailed(&fingerprint, move || async move {
                let value = dispatch(queue, breaker, options, work).await?;
                cache.set(&key, value.clone(), ttl);
                Ok(value)
            })
            .await;

        if outcome.joined {
            self.metrics.record_dedup_join();
        }
        match outcome.result {
            Ok(value) => Ok(Governed {
                value,
                admission,
                source: if outcome.joined {
                    ResultSource::Shared
                } else {
                    ResultSource::Fresh
                },
            }),
            Err(err) => {
                // Count a shared failure once, for the caller that ran it
                if !outcome.joined {
                    self.metrics.record_error(&err);
                }
                Err(err)
            }
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }

    pub fn cache(&self) -> &Arc<ResponseCache<T>> {
        &self.cache
    }

    pub fn queue(&self) -> &PriorityRequestQueue {
        &self.queue
    }

    pub fn breaker(&self) -> &Arc<AsyncCircuitBreaker> {
        &self.breaker
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Distinct fingerprints currently executing
    pub fn in_flight(&self) -> usize {
        self.dedup.in_flight()
    }
}

/// Queue the downstream call and run it through the breaker
async fn dispatch<T, F, Fut>(
    queue: PriorityRequestQueue,
    breaker: Arc<AsyncCircuitBreaker>,
    options: EnqueueOptions,
    work: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    queue
        .enqueue(
            move || async move { breaker.execute(work).await },
            options,
        )
        .await
}

/// Builder for a [`Governor`]
///
/// Admission, cache, queue and breaker are required; metrics default to a
/// fresh private [`Metrics`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use throttlegate::{
///     CacheConfig, CircuitBreakerConfig, SlidingWindowLimiter, TokenBucketConfig,
///     TokenBucketLimiter,
/// };
/// use throttlegate_server::admission::AdmissionControl;
/// use throttlegate_server::breaker::AsyncCircuitBreaker;
/// use throttlegate_server::cache::ResponseCache;
/// use throttlegate_server::governor::Governor;
/// use throttlegate_server::queue::{PriorityRequestQueue, QueueConfig};
///
/// let admission = Arc::new(AdmissionControl::new(
///     SlidingWindowLimiter::builder().build().unwrap(),
///     TokenBucketLimiter::new(TokenBucketConfig::default()).unwrap(),
/// ));
/// let governor: Governor<String> = Governor::builder()
///     .admission(admission)
///     .cache(Arc::new(ResponseCache::new("summaries", CacheConfig::default()).unwrap()))
///     .queue(PriorityRequestQueue::new(QueueConfig::default()).unwrap())
///     .breaker(Arc::new(AsyncCircuitBreaker::new("llm", CircuitBreakerConfig::default())))
///     .build()
///     .unwrap();
/// ```
pub struct GovernorBuilder<T> {
    admission: Option<Arc<AdmissionControl>>,
    cache: Option<Arc<ResponseCache<T>>>,
    queue: Option<PriorityRequestQueue>,
    breaker: Option<Arc<AsyncCircuitBreaker>>,
    metrics: Option<Arc<Metrics>>,
}

impl<T> GovernorBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            admission: None,
            cache: None,
            queue: None,
            breaker: None,
            metrics: None,
        }
    }

    pub fn admission(mut self, admission: Arc<AdmissionControl>) -> Self {
        self.admission = Some(admission);
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache<T>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn queue(mut self, queue: PriorityRequestQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn breaker(mut self, breaker: Arc<AsyncCircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> anyhow::Result<Governor<T>> {
        Ok(Governor {
            admission: self
                .admission
                .ok_or_else(|| anyhow!("governor requires admission control"))?,
            cache: self.cache.ok_or_else(|| anyhow!("governor requires a cache"))?,
            dedup: RequestDeduplicator::new(),
            queue: self.queue.ok_or_else(|| anyhow!("governor requires a queue"))?,
            breaker: self
                .breaker
                .ok_or_else(|| anyhow!("governor requires a circuit breaker"))?,
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}

impl<T> Default for GovernorBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
