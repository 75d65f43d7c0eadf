//! Bounded cache with per-entry time-to-live and LRU eviction
//!
//! [`TtlCache`] is a generic key/value store. An entry is only ever returned
//! while `now < expires_at`; expired entries are removed when a lookup runs
//! into them or when [`TtlCache::cleanup`] sweeps the map. When an insert
//! pushes the cache past `max_entries`, the least recently accessed entry is
//! evicted.
//!
//! Recency is tracked with a monotonically increasing access sequence kept in
//! a `BTreeMap`, so eviction is `O(log n)` and two accesses in the same
//! instant still have a strict order.

use super::{GateError, HashMap, deadline_after};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::hash::Hash;
use std::time::{Duration, SystemTime};

// Configuration constants
const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Configuration for a [`TtlCache`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied by [`TtlCache::set_default`]
    pub default_ttl: Duration,
    /// Maximum number of live entries
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to stay within `max_entries`
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: SystemTime,
    access_seq: u64,
}

/// Generic TTL/LRU cache
///
/// Several independently configured instances are typically used side by
/// side, one per class of data, each with its own TTL and size.
///
/// # Example
///
/// ```
/// use throttlegate::{CacheConfig, TtlCache};
/// use std::time::{Duration, SystemTime};
///
/// let mut cache: TtlCache<String, u32> = TtlCache::new(CacheConfig {
///     default_ttl: Duration::from_secs(60),
///     max_entries: 100,
/// })
/// .unwrap();
///
/// let now = SystemTime::now();
/// cache.set("x".to_string(), 42, Duration::from_millis(1000), now);
///
/// assert_eq!(cache.get("x", now + Duration::from_millis(999)), Some(&42));
/// assert_eq!(cache.get("x", now + Duration::from_millis(1001)), None);
/// ```
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    lru: BTreeMap<u64, K>,
    next_seq: u64,
    config: CacheConfig,
    stats: CacheStats,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a cache from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidConfig`] if `max_entries` or `default_ttl` is zero.
    pub fn new(config: CacheConfig) -> Result<Self, GateError> {
        if config.max_entries == 0 {
            return Err(GateError::InvalidConfig(
                "max_entries must be greater than zero".into(),
            ));
        }
        if config.default_ttl.is_zero() {
            return Err(GateError::InvalidConfig(
                "default_ttl must be greater than zero".into(),
            ));
        }
        Ok(TtlCache {
            entries: HashMap::new(),
            lru: BTreeMap::new(),
            next_seq: 0,
            config,
            stats: CacheStats::default(),
        })
    }

    /// The configuration this cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Look up `key`, refreshing its recency on a hit
    ///
    /// An entry found past its expiry is removed and reported as a miss.
    pub fn get<Q>(&mut self, key: &Q, now: SystemTime) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let expired = match self.entries.get(key) {
            Some(entry) => now >= entry.expires_at,
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        if expired {
            self.remove(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            return None;
        }

        let seq = self.bump();
        let entry = self.entries.get_mut(key)?;
        if let Some(owner) = self.lru.remove(&entry.access_seq) {
            self.lru.insert(seq, owner);
        }
        entry.access_seq = seq;
        self.stats.hits += 1;
        Some(&entry.value)
    }

    /// Insert or overwrite `key` with an explicit TTL
    ///
    /// A zero TTL is treated as already expired: nothing is cached, any
    /// previous value for `key` is dropped, and `false` is returned.
    pub fn set(&mut self, key: K, value: V, ttl: Duration, now: SystemTime) -> bool {
        if ttl.is_zero() {
            self.remove(&key);
            return false;
        }

        let seq = self.bump();
        let entry = CacheEntry {
            value,
            expires_at: deadline_after(now, ttl),
            access_seq: seq,
        };
        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            self.lru.remove(&previous.access_seq);
        }
        self.lru.insert(seq, key);

        while self.entries.len() > self.config.max_entries {
            let Some((_, lru_key)) = self.lru.pop_first() else {
                break;
            };
            self.entries.remove(&lru_key);
            self.stats.evictions += 1;
        }
        true
    }

    /// Insert or overwrite `key` using the configured default TTL
    pub fn set_default(&mut self, key: K, value: V, now: SystemTime) -> bool {
        let ttl = self.config.default_ttl;
        self.set(key, value, ttl, now)
    }

    /// Return the cached value for `key`, or compute, cache and return it
    ///
    /// `producer` only runs on a miss. It is a synchronous helper for values
    /// that are cheap to produce; concurrent asynchronous producers should be
    /// coalesced with a request deduplicator instead.
    pub fn get_or_set<F>(&mut self, key: K, ttl: Duration, now: SystemTime, producer: F) -> V
    where
        V: Clone,
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key, now) {
            return value.clone();
        }
        let value = producer();
        self.set(key, value.clone(), ttl, now);
        value
    }

    /// Remove `key`, returning its value if it was present (expired or not)
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.access_seq);
        Some(entry.value)
    }

    /// Drop every entry; statistics are kept
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
    }

    /// Remove all entries whose TTL has elapsed at `now`
    ///
    /// Returns the number of entries removed.
    pub fn cleanup(&mut self, now: SystemTime) -> usize {
        let before = self.entries.len();
        let lru = &mut self.lru;
        self.entries.retain(|_, entry| {
            if now >= entry.expires_at {
                lru.remove(&entry.access_seq);
                false
            } else {
                true
            }
        });
        let removed = before - self.entries.len();
        self.stats.expirations += removed as u64;
        removed
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
