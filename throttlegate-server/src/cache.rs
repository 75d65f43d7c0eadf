//! Shared response cache
//!
//! One [`ResponseCache`] per class of data (summaries, recommendations,
//! embeddings...), each with its own TTL and capacity. Values are cloned out
//! of the cache, so large payloads should be wrapped in an `Arc`.

use crate::sweeper::Sweep;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime};
use throttlegate::{CacheConfig, CacheStats, GateError, TtlCache};

pub struct ResponseCache<V> {
    name: String,
    inner: Mutex<TtlCache<String, V>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Result<Self, GateError> {
        Ok(Self {
            name: name.into(),
            inner: Mutex::new(TtlCache::new(config)?),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().get(key, SystemTime::now()).cloned()
    }

    /// Store `value` under `key`; `None` uses the cache's default TTL
    ///
    /// Returns `false` if nothing was stored (zero TTL).
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> bool {
        let mut inner = self.inner.lock();
        let ttl = ttl.unwrap_or(inner.config().default_ttl);
        inner.set(key.to_string(), value, ttl, SystemTime::now())
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.inner.lock().remove(key)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }
}

impl<V: Clone + Send + 'static> Sweep for ResponseCache<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn sweep(&self, now: SystemTime) -> usize {
        self.inner.lock().cleanup(now)
    }
}
