//! Periodic cleanup of in-memory governance state
//!
//! Limiters and caches only shrink when swept. The [`Sweeper`] owns one
//! background task per registered [`Sweep`] target and stops them all on
//! [`shutdown`](Sweeper::shutdown) or when it is dropped.

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// State that can drop expired or idle entries
pub trait Sweep: Send + Sync + 'static {
    /// Label used in logs
    fn name(&self) -> &str;

    /// Remove what is stale at `now`, returning how many entries went
    fn sweep(&self, now: SystemTime) -> usize;
}

pub struct Sweeper {
    shutdown: broadcast::Sender<()>,
    tasks: JoinSet<()>,
}

impl Sweeper {
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            shutdown,
            tasks: JoinSet::new(),
        }
    }

    /// Sweep `target` every `interval`, starting one interval from now
    pub fn register(&mut self, target: Arc<dyn Sweep>, interval: Duration) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let name = target.name().to_string();
        tracing::info!(sweep = %name, interval_secs = interval.as_secs_f64(), "sweeper registered");

        self.tasks.spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.recv() => break,

                    _ = ticker.tick() => {
                        let removed = target.sweep(SystemTime::now());
                        if removed > 0 {
                            tracing::debug!(sweep = %name, removed, "sweep removed stale entries");
                        }
                    }
                }
            }
            tracing::debug!(sweep = %name, "sweeper task stopped");
        });
    }

    /// Number of running sweep tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal every task to stop and wait for them to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        while self.tasks.join_next().await.is_some() {}
        tracing::info!("sweeper shutdown complete");
    }
}

impl Default for Sweeper {
    fn default() -> Self {
        Self::new()
    }
}
