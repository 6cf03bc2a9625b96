//! Lifecycle Reaper
//!
//! Pools that nobody depends on and that have not been read or written for a
//! while are evicted. Combinator states idle for the same threshold are
//! dropped alongside them.
//!
//! The reaper runs as a tokio task ticking every `reap_interval_ms`. It stops
//! when its [`ReaperHandle`] is shut down or dropped.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::store::PoolStore;
use crate::combinators::Combinators;

/// What a single sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub pools: Vec<String>,
    pub states: usize,
}

/// Periodic eviction of idle pools and combinator states.
#[derive(Debug, Clone)]
pub struct Reaper {
    store: PoolStore,
    combinators: Option<Combinators>,
}

impl Reaper {
    pub fn new(store: PoolStore) -> Self {
        Self {
            store,
            combinators: None,
        }
    }

    /// Also drop idle combinator states on each sweep.
    pub fn with_combinators(mut self, combinators: Combinators) -> Self {
        self.combinators = Some(combinators);
        self
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> ReapReport {
        let threshold = self.store.config().inactivity_threshold_ms;
        let pools = self.store.reap_idle(threshold);
        let states = self
            .combinators
            .as_ref()
            .map_or(0, |combinators| combinators.reap_idle(threshold));
        ReapReport { pools, states }
    }

    /// Start sweeping in the background. Must be called within a tokio
    /// runtime.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let period = Duration::from_millis(self.store.config().reap_interval_ms.max(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.sweep();
                        if !report.pools.is_empty() || report.states > 0 {
                            tracing::info!(
                                pools = report.pools.len(),
                                states = report.states,
                                "reaper sweep evicted idle entries"
                            );
                        }
                    }
                    _ = stop.wait_for(|stopped| *stopped) => break,
                }
            }
            tracing::debug!("reaper stopped");
        });

        ReaperHandle {
            shutdown,
            task: Some(task),
        }
    }
}

/// Handle to a running reaper task.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for its task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
