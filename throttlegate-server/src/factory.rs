//! Construction of governance components from configuration
//!
//! [`Components`] owns the pieces that are shared process-wide: one
//! admission policy, one downstream breaker, one queue and one metrics
//! registry. Governors for individual result types are stamped out from it,
//! each with its own cache. Every limiter and cache it hands out is
//! registered with its [`Sweeper`].

use crate::admission::AdmissionControl;
use crate::breaker::AsyncCircuitBreaker;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::governor::Governor;
use crate::metrics::Metrics;
use crate::queue::PriorityRequestQueue;
use crate::sweeper::{Sweep, Sweeper};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use throttlegate::{CacheConfig, SlidingWindowLimiter, TokenBucketLimiter};

/// Name reported by the downstream breaker in logs and `GET /breaker`
pub const DOWNSTREAM_BREAKER: &str = "downstream";

#[derive(Clone)]
pub struct Components {
    pub admission: Arc<AdmissionControl>,
    pub breaker: Arc<AsyncCircuitBreaker>,
    pub queue: PriorityRequestQueue,
    pub metrics: Arc<Metrics>,
    cache: CacheConfig,
    sweeper: Arc<Mutex<Sweeper>>,
    sweep_interval: Duration,
}

impl Components {
    /// Build every shared component described by `config`
    ///
    /// Must be called inside a Tokio runtime; the admission limiters start
    /// being swept every `config.sweep_interval`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let sustained = SlidingWindowLimiter::new(config.sliding_window.clone())
            .context("failed to build sliding window limiter")?;
        let burst = TokenBucketLimiter::new(config.token_bucket.clone())
            .context("failed to build token bucket limiter")?;
        let queue = PriorityRequestQueue::new(config.queue.clone())
            .context("failed to build request queue")?;

        let admission = Arc::new(AdmissionControl::new(sustained, burst));
        let mut sweeper = Sweeper::new();
        sweeper.register(Arc::clone(&admission) as Arc<dyn Sweep>, config.sweep_interval);

        Ok(Self {
            admission,
            breaker: Arc::new(AsyncCircuitBreaker::new(
                DOWNSTREAM_BREAKER,
                config.breaker.clone(),
            )),
            queue,
            metrics: Arc::new(Metrics::new()),
            cache: config.cache.clone(),
            sweeper: Arc::new(Mutex::new(sweeper)),
            sweep_interval: config.sweep_interval,
        })
    }

    /// A new swept response cache using the configured TTL and capacity
    pub fn cache<T>(&self, name: &str) -> Result<Arc<ResponseCache<T>>>
    where
        T: Clone + Send + 'static,
    {
        let cache = ResponseCache::new(name, self.cache.clone())
            .with_context(|| format!("failed to build cache {name}"))?;
        let cache = Arc::new(cache);
        self.sweeper
            .lock()
            .register(Arc::clone(&cache) as Arc<dyn Sweep>, self.sweep_interval);
        Ok(cache)
    }

    /// Number of limiters and caches currently being swept
    pub fn swept(&self) -> usize {
        self.sweeper.lock().len()
    }

    /// Stop sweeping; later calls are no-ops
    pub async fn shutdown(&self) {
        let sweeper = std::mem::take(&mut *self.sweeper.lock());
        sweeper.shutdown().await;
    }

    /// A governor over the shared components with its own cache
    pub fn governor<T>(&self, cache_name: &str) -> Result<Governor<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        Governor::builder()
            .admission(Arc::clone(&self.admission))
            .cache(self.cache(cache_name)?)
            .queue(self.queue.clone())
            .breaker(Arc::clone(&self.breaker))
            .metrics(Arc::clone(&self.metrics))
            .build()
    }
}
