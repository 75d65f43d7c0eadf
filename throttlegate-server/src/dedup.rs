//! In-flight request de-duplication
//!
//! Concurrent callers asking for the same key share one execution of the
//! producer. The first caller starts it; later callers subscribe to the same
//! [`Shared`] future and observe the identical settled result, success or
//! error. The key is forgotten the moment that execution settles, so a call
//! arriving afterwards starts a fresh one.

use crate::error::Result;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight<T> {
    id: u64,
    future: SharedResult<T>,
    subscribers: usize,
}

type InFlightMap<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

/// Result of [`RequestDeduplicator::execute_detailed`]
#[derive(Debug, Clone)]
pub struct Deduplicated<T> {
    pub result: Result<T>,
    /// `true` if this caller joined an execution started by someone else
    pub joined: bool,
}

/// Collapses concurrent identical requests into one execution
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use throttlegate_server::dedup::RequestDeduplicator;
///
/// let dedup: RequestDeduplicator<String> = RequestDeduplicator::new();
/// let summary = dedup
///     .execute("doc:42", || async { Ok("summary".to_string()) })
///     .await
///     .unwrap();
/// assert_eq!(summary, "summary");
/// assert_eq!(dedup.in_flight(), 0);
/// # });
/// ```
pub struct RequestDeduplicator<T> {
    in_flight: InFlightMap<T>,
    next_id: AtomicU64,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `producer` for `key`, or join the execution already running
    pub async fn execute<F, Fut>(&self, key: &str, producer: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.execute_detailed(key, producer).await.result
    }

    /// Like [`execute`](Self::execute), also reporting whether the caller joined
    pub async fn execute_detailed<F, Fut>(&self, key: &str, producer: F) -> Deduplicated<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (future, joined) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get_mut(key) {
                Some(entry) => {
                    entry.subscribers += 1;
                    (entry.future.clone(), true)
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let cleanup = EntryCleanup {
                        in_flight: Arc::clone(&self.in_flight),
                        key: key.to_string(),
                        id,
                    };
                    // The producer is only invoked on first poll, outside the lock
                    let future = async move {
                        let _cleanup = cleanup;
                        producer().await
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            future: future.clone(),
                            subscribers: 1,
                        },
                    );
                    (future, false)
                }
            }
        };

        if joined {
            tracing::debug!(key, "joined in-flight request");
        }

        Deduplicated {
            result: future.await,
            joined,
        }
    }

    /// Number of distinct keys currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Callers attached to the execution running for `key`
    pub fn subscribers(&self, key: &str) -> Option<usize> {
        self.in_flight.lock().get(key).map(|entry| entry.subscribers)
    }
}

impl<T> Default for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the map entry once the shared execution settles or is dropped
///
/// Removal is by id: if the entry was already replaced by a newer
/// execution for the same key, it is left alone.
struct EntryCleanup<T> {
    in_flight: InFlightMap<T>,
    key: String,
    id: u64,
}

impl<T> Drop for EntryCleanup<T> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            in_flight.remove(&self.key);
        }
    }
}
