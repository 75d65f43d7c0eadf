//! Priority-ordered, bounded-concurrency work queue
//!
//! At most `max_concurrency` units of work execute at once. Everything else
//! waits in a pending heap ordered by priority (higher first) and then by
//! enqueue order. When a running unit settles its slot is handed straight to
//! the best pending waiter, so a free slot is never observable while work
//! is pending.
//!
//! Every enqueue carries a deadline measured from enqueue time. A unit still
//! pending at its deadline is removed and its caller gets
//! [`GovernanceError::QueueTimeout`]. A unit that already started also fails
//! its caller at the deadline; whether the work keeps running is decided by
//! [`TimeoutPolicy`].

use crate::error::{GovernanceError, Result};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

const DEFAULT_MAX_CONCURRENCY: usize = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// What happens to started work when its caller times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Let the work run to completion in the background, still holding its slot
    #[default]
    Detach,
    /// Abort the work's task, freeing the slot immediately
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_concurrency: usize,
    /// Applied when an enqueue does not set its own timeout
    pub default_timeout: Duration,
    pub on_timeout: TimeoutPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            on_timeout: TimeoutPolicy::Detach,
        }
    }
}

/// Per-call scheduling options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Higher runs first
    pub priority: i32,
    /// Overrides [`QueueConfig::default_timeout`]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub timed_out: u64,
    pub max_concurrency: usize,
}

struct Waiter {
    seq: u64,
    priority: i32,
    enqueued_at: Instant,
    wake: oneshot::Sender<SlotPermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower sequence (earlier enqueue)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    running: usize,
    pending: BinaryHeap<Waiter>,
    closed: bool,
}

struct QueueInner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    next_seq: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
}

impl QueueInner {
    /// Hand a freed slot to the best pending waiter, or give it back
    fn release_slot(self: &Arc<Self>) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.pending.pop() {
            let permit = SlotPermit {
                queue: Some(Arc::clone(self)),
            };
            match waiter.wake.send(permit) {
                Ok(()) => {
                    tracing::trace!(
                        priority = waiter.priority,
                        waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                        "dispatched pending task"
                    );
                    return;
                }
                // Waiter went away; the slot stays with us
                Err(mut permit) => permit.disarm(),
            }
        }
        state.running = state.running.saturating_sub(1);
    }

    /// Remove a waiter that gave up; `false` if it was already dispatched
    fn remove_waiter(&self, seq: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|waiter| waiter.seq != seq);
        state.pending.len() != before
    }
}

/// Await `future` until `deadline`, or forever without one; `None` on timeout
async fn until<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

/// One concurrency slot; freeing it dispatches the next pending task
struct SlotPermit {
    queue: Option<Arc<QueueInner>>,
}

impl SlotPermit {
    fn disarm(&mut self) {
        self.queue = None;
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.release_slot();
        }
    }
}

/// Removes a pending waiter if the enqueue future is dropped mid-wait
struct PendingGuard<'a> {
    queue: &'a QueueInner,
    seq: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.remove_waiter(self.seq);
        }
    }
}

/// Bounded-concurrency executor with priority ordering
///
/// Cloning is cheap; clones share the same slots and pending heap.
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use throttlegate_server::queue::{EnqueueOptions, PriorityRequestQueue, QueueConfig};
///
/// let queue = PriorityRequestQueue::new(QueueConfig::default()).unwrap();
/// let answer = queue
///     .enqueue(|| async { Ok(42) }, EnqueueOptions { priority: 10, timeout: None })
///     .await
///     .unwrap();
/// assert_eq!(answer, 42);
/// # });
/// ```
#[derive(Clone)]
pub struct PriorityRequestQueue {
    inner: Arc<QueueInner>,
}

impl PriorityRequestQueue {
    pub fn new(config: QueueConfig) -> anyhow::Result<Self> {
        if config.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }
        Ok(Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState {
                    running: 0,
                    pending: BinaryHeap::new(),
                    closed: false,
                }),
                next_seq: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Run `work` once a slot is free, failing if it has not completed by the deadline
    ///
    /// The work runs on its own tokio task so that it can outlive the caller
    /// under [`TimeoutPolicy::Detach`]. A panic inside the work surfaces as
    /// [`GovernanceError::Internal`].
    pub async fn enqueue<F, Fut, T>(&self, work: F, options: EnqueueOptions) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = options.timeout.unwrap_or(self.inner.config.default_timeout);
        // An unrepresentable deadline means the call never times out
        let deadline = Instant::now().checked_add(timeout);

        let permit = self.acquire_slot(options.priority, deadline, timeout).await?;

        let queue = Arc::clone(&self.inner);
        let mut task = tokio::spawn(async move {
            let _permit = permit;
            let result = work().await;
            queue.completed.fetch_add(1, Ordering::Relaxed);
            result
        });

        match until(deadline, &mut task).await {
            Some(Ok(result)) => result,
            Some(Err(join_err)) => Err(GovernanceError::Internal(format!(
                "queued task failed: {join_err}"
            ))),
            None => {
                self.inner.timed_out.fetch_add(1, Ordering::Relaxed);
                if self.inner.config.on_timeout == TimeoutPolicy::Abort {
                    task.abort();
                }
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    policy = ?self.inner.config.on_timeout,
                    "queued task exceeded its timeout while running"
                );
                Err(GovernanceError::QueueTimeout { timeout })
            }
        }
    }

    async fn acquire_slot(
        &self,
        priority: i32,
        deadline: Option<Instant>,
        timeout: Duration,
    ) -> Result<SlotPermit> {
        let (wake, mut rx) = oneshot::channel();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(GovernanceError::QueueClosed);
            }
            if state.running < self.inner.config.max_concurrency && state.pending.is_empty() {
                state.running += 1;
                return Ok(SlotPermit {
                    queue: Some(Arc::clone(&self.inner)),
                });
            }
            state.pending.push(Waiter {
                seq,
                priority,
                enqueued_at: Instant::now(),
                wake,
            });
        }

        let mut guard = PendingGuard {
            queue: &self.inner,
            seq,
            armed: true,
        };
        let waited = until(deadline, &mut rx).await;
        guard.armed = false;
        drop(guard);

        match waited {
            Some(Ok(permit)) => Ok(permit),
            // Sender dropped without a slot: the queue was closed
            Some(Err(_)) => Err(GovernanceError::QueueClosed),
            None => {
                if !self.inner.remove_waiter(seq) {
                    // Dispatched in the same instant; hand the slot straight back
                    drop(rx.try_recv());
                }
                self.inner.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    priority,
                    timeout_ms = timeout.as_millis() as u64,
                    "task timed out waiting for a concurrency slot"
                );
                Err(GovernanceError::QueueTimeout { timeout })
            }
        }
    }

    /// Stop accepting work and reject everything still pending
    ///
    /// Running work is unaffected.
    pub fn close(&self) {
        let drained: Vec<Waiter> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::info!(rejected = drained.len(), "request queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            pending: state.pending.len(),
            running: state.running,
            completed: self.inner.completed.load(Ordering::Relaxed),
            timed_out: self.inner.timed_out.load(Ordering::Relaxed),
            max_concurrency: self.inner.config.max_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn queue(max_concurrency: usize, on_timeout: TimeoutPolicy) -> PriorityRequestQueue {
        PriorityRequestQueue::new(QueueConfig {
            max_concurrency,
            default_timeout: Duration::from_secs(30),
            on_timeout,
        })
        .unwrap()
    }

    async fn wait_for_pending(queue: &PriorityRequestQueue, pending: usize) {
        while queue.stats().pending < pending {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(
            PriorityRequestQueue::new(QueueConfig {
                max_concurrency: 0,
                ..QueueConfig::default()
            })
            .is_err()
        );
    }

    #[test]
    fn test_waiter_ordering() {
        let (a, _) = oneshot::channel();
        let (b, _) = oneshot::channel();
        let (c, _) = oneshot::channel();
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(Waiter { seq: 0, priority: 1, enqueued_at: now, wake: a });
        heap.push(Waiter { seq: 1, priority: 5, enqueued_at: now, wake: b });
        heap.push(Waiter { seq: 2, priority: 5, enqueued_at: now, wake: c });

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|w| w.seq)).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_concurrency() {
        let queue = queue(3, TimeoutPolicy::Detach);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..12u64 {
            let queue = queue.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                queue
                    .enqueue(
                        move || async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10 + i)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok(i)
                        },
                        EnqueueOptions::default(),
                    )
                    .await
            }));
        }

        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap().unwrap(), i as u64);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);

        let stats = queue.stats();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.completed, 12);
    }

    #[tokio::test]
    async fn test_dispatches_by_priority_then_fifo() {
        let queue = queue(1, TimeoutPolicy::Detach);
        let gate = Arc::new(Notify::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let blocker = tokio::spawn({
            let queue = queue.clone();
            let gate = Arc::clone(&gate);
            async move {
                queue
                    .enqueue(
                        move || async move {
                            gate.notified().await;
                            Ok(())
                        },
                        EnqueueOptions::default(),
                    )
                    .await
            }
        });
        while queue.stats().running == 0 {
            tokio::task::yield_now().await;
        }

        let mut waiters = Vec::new();
        for (label, priority) in [("low", 0), ("high-1", 10), ("mid", 5), ("high-2", 10)] {
            let pending = queue.clone();
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                pending
                    .enqueue(
                        move || async move {
                            order.lock().push(label);
                            Ok(())
                        },
                        EnqueueOptions {
                            priority,
                            timeout: None,
                        },
                    )
                    .await
            }));
            wait_for_pending(&queue, waiters.len()).await;
        }

        gate.notify_one();
        blocker.await.unwrap().unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock(), vec!["high-1", "high-2", "mid", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_task_times_out_and_is_removed() {
        let queue = queue(1, TimeoutPolicy::Detach);
        let ran = Arc::new(AtomicUsize::new(0));

        let blocker = tokio::spawn({
            let queue = queue.clone();
            async move {
                queue
                    .enqueue(
                        || async {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            Ok(())
                        },
                        EnqueueOptions::default(),
                    )
                    .await
            }
        });
        while queue.stats().running == 0 {
            tokio::task::yield_now().await;
        }

        let starved = queue
            .enqueue(
                {
                    let ran = Arc::clone(&ran);
                    move || async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                EnqueueOptions {
                    priority: 0,
                    timeout: Some(Duration::from_secs(1)),
                },
            )
            .await;

        assert!(matches!(starved, Err(GovernanceError::QueueTimeout { .. })));
        assert_eq!(queue.stats().pending, 0);
        assert_eq!(queue.stats().timed_out, 1);

        blocker.await.unwrap().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.stats().running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_work_keeps_running_after_timeout() {
        let queue = queue(1, TimeoutPolicy::Detach);
        let finished = Arc::new(AtomicUsize::new(0));

        let result = queue
            .enqueue(
                {
                    let finished = Arc::clone(&finished);
                    move || async move {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                EnqueueOptions {
                    priority: 0,
                    timeout: Some(Duration::from_secs(1)),
                },
            )
            .await;
        assert!(matches!(result, Err(GovernanceError::QueueTimeout { .. })));

        // Still holding its slot
        assert_eq!(queue.stats().running, 1);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_policy_frees_slot() {
        let queue = queue(1, TimeoutPolicy::Abort);
        let finished = Arc::new(AtomicUsize::new(0));

        let result = queue
            .enqueue(
                {
                    let finished = Arc::clone(&finished);
                    move || async move {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                EnqueueOptions {
                    priority: 0,
                    timeout: Some(Duration::from_secs(1)),
                },
            )
            .await;
        assert!(matches!(result, Err(GovernanceError::QueueTimeout { .. })));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(queue.stats().running, 0);
    }

    #[tokio::test]
    async fn test_close_rejects_pending_and_new_work() {
        let queue = queue(1, TimeoutPolicy::Detach);
        let gate = Arc::new(Notify::new());

        let blocker = tokio::spawn({
            let queue = queue.clone();
            let gate = Arc::clone(&gate);
            async move {
                queue
                    .enqueue(
                        move || async move {
                            gate.notified().await;
                            Ok(1)
                        },
                        EnqueueOptions::default(),
                    )
                    .await
            }
        });
        while queue.stats().running == 0 {
            tokio::task::yield_now().await;
        }

        let pending = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue(|| async { Ok(2) }, EnqueueOptions::default()).await }
        });
        wait_for_pending(&queue, 1).await;

        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(
            pending.await.unwrap(),
            Err(GovernanceError::QueueClosed)
        ));
        assert!(matches!(
            queue.enqueue(|| async { Ok(3) }, EnqueueOptions::default()).await,
            Err(GovernanceError::QueueClosed)
        ));

        // Running work still completes
        gate.notify_one();
        assert_eq!(blocker.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_waits_without_deadline() {
        let queue = queue(1, TimeoutPolicy::Detach);
        let unbounded = EnqueueOptions {
            priority: 0,
            timeout: Some(Duration::MAX),
        };
        assert_eq!(
            queue.enqueue(|| async { Ok(7) }, unbounded).await.unwrap(),
            7
        );

        let gate = Arc::new(Notify::new());
        let blocker = tokio::spawn({
            let queue = queue.clone();
            let gate = Arc::clone(&gate);
            async move {
                queue
                    .enqueue(
                        move || async move {
                            gate.notified().await;
                            Ok(1)
                        },
                        EnqueueOptions::default(),
                    )
                    .await
            }
        });
        while queue.stats().running == 0 {
            tokio::task::yield_now().await;
        }
        let waiting = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue(|| async { Ok(2) }, unbounded).await }
        });
        wait_for_pending(&queue, 1).await;

        gate.notify_one();
        assert_eq!(blocker.await.unwrap().unwrap(), 1);
        assert_eq!(waiting.await.unwrap().unwrap(), 2);
        assert_eq!(queue.stats().timed_out, 0);
    }

    #[tokio::test]
    async fn test_panicking_work_is_internal_error_and_frees_slot() {
        let queue = queue(1, TimeoutPolicy::Detach);
        let result: Result<()> = queue
            .enqueue(
                || async { panic!("work exploded") },
                EnqueueOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(GovernanceError::Internal(_))));
        assert_eq!(queue.stats().running, 0);
        assert_eq!(
            queue.enqueue(|| async { Ok(1) }, EnqueueOptions::default()).await.unwrap(),
            1
        );
    }
}
