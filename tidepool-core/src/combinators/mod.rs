//! Subscription Combinators
//!
//! Combinators shape the timing and frequency of values pushed through a
//! pipeline: debounce, throttle, buffer, cache, share, retry, sample, audit,
//! distinct, delay and the take/skip-until gates.
//!
//! # How It Works
//!
//! 1. Every push names a stream (the caller's pipeline or node identity).
//!    Stream, combinator kind and arguments together form a
//!    [`CombinatorKey`], and each key owns one piece of typed state.
//!
//! 2. Synchronous combinators (throttle, cache, share, sample, audit,
//!    distinct, gates) update their state and answer immediately.
//!
//! 3. Asynchronous combinators (debounce, delay, retry backoff) wait on tokio
//!    timers. The buffer arms a background timeout task that flushes partial
//!    buffers to the [`BufferFlush`] channel.
//!
//! 4. [`Combinators::shutdown`] cancels every in-flight wait and drops all
//!    state. [`Combinators::clear`] and [`Combinators::reap_idle`] drop
//!    state selectively.

mod buffer;
mod gate;
mod key;
mod rate;
mod spec;
mod state;
mod timing;

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::clock::{default_clock, Clock};
use crate::config::{CombinatorDefaults, EngineConfig};
use crate::metrics::EngineMetrics;
use crate::reactive::PoolStore;

pub use buffer::BufferFlush;
pub use key::{CombinatorKey, CombinatorKind};
pub use rate::{Cached, Shared};
pub use spec::CombinatorSpec;
pub use timing::RetryOutcome;

use state::StateStore;

/// What a combinator produced for one push.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Emission {
    /// Pass this value downstream.
    Value(Value),
    /// Nothing to emit for this push.
    Suppressed,
    /// The stream has finished; nothing will be emitted again.
    Completed,
}

impl Emission {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Emission::Value(value) => Some(value),
            Emission::Suppressed | Emission::Completed => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Emission::Value(_))
    }
}

impl From<Option<Value>> for Emission {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Emission::Suppressed, Emission::Value)
    }
}

struct Inner {
    clock: Arc<dyn Clock>,
    defaults: CombinatorDefaults,
    metrics: Arc<EngineMetrics>,
    states: StateStore,
    /// Source of debounce generations, unique for the life of the handle.
    generations: AtomicU64,
    shutdown: watch::Sender<bool>,
    flush_tx: mpsc::UnboundedSender<BufferFlush>,
    flush_rx: Mutex<Option<mpsc::UnboundedReceiver<BufferFlush>>>,
}

/// Handle to the combinator state store. Clones share state.
#[derive(Clone)]
pub struct Combinators {
    inner: Arc<Inner>,
}

impl Combinators {
    pub fn new(clock: Arc<dyn Clock>, defaults: CombinatorDefaults, metrics: Arc<EngineMetrics>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                clock,
                defaults,
                metrics,
                states: StateStore::default(),
                generations: AtomicU64::new(0),
                shutdown,
                flush_tx,
                flush_rx: Mutex::new(Some(flush_rx)),
            }),
        }
    }

    /// Combinators sharing a store's clock, metrics and configured defaults.
    pub fn for_store(store: &PoolStore) -> Self {
        Self::new(
            Arc::clone(store.clock()),
            store.config().combinators.clone(),
            Arc::clone(store.metrics()),
        )
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            default_clock(),
            config.combinators.clone(),
            Arc::new(EngineMetrics::new()),
        )
    }

    pub fn defaults(&self) -> &CombinatorDefaults {
        &self.inner.defaults
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.inner.metrics
    }

    /// Take the receiving end of the buffer timeout channel. Only the first
    /// call gets it.
    pub fn buffer_flushes(&self) -> Option<mpsc::UnboundedReceiver<BufferFlush>> {
        self.inner.flush_rx.lock().take()
    }

    /// Number of live subscription states.
    pub fn state_count(&self) -> usize {
        self.inner.states.len()
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// Run a parsed combinator spec against one push.
    pub async fn apply(&self, stream: &str, spec: &CombinatorSpec, value: Value) -> Emission {
        match spec {
            CombinatorSpec::Debounce { delay_ms } => {
                self.debounce(stream, *delay_ms, value).await.into()
            }
            CombinatorSpec::Throttle { interval_ms } => {
                Emission::Value(self.throttle(stream, *interval_ms, value))
            }
            CombinatorSpec::Buffer { size, timeout_ms } => self
                .buffer(stream, *size, *timeout_ms, value)
                .map(Value::Array)
                .into(),
            CombinatorSpec::Cache { ttl_ms } => {
                Emission::Value(self.cache(stream, *ttl_ms, value).value)
            }
            CombinatorSpec::Share => Emission::Value(self.share(stream, value).value),
            CombinatorSpec::Retry { max, backoff_ms } => {
                match self.retry(stream, *max, *backoff_ms, value).await {
                    RetryOutcome::Value(value) => Emission::Value(value),
                    RetryOutcome::Cancelled => Emission::Suppressed,
                    outcome => Emission::Value(serde_json::to_value(&outcome).unwrap_or(Value::Null)),
                }
            }
            CombinatorSpec::Sample { interval_ms } => {
                self.sample(stream, *interval_ms, value).into()
            }
            CombinatorSpec::AuditOn { trigger } => self.audit_on(stream, trigger, value).into(),
            CombinatorSpec::DistinctUntilChanged { strategy } => {
                self.distinct_until_changed(stream, *strategy, value).into()
            }
            CombinatorSpec::Delay { ms } => self.delay(*ms, value).await.into(),
            CombinatorSpec::TakeUntil { token } => self.take_until(stream, token, value),
            CombinatorSpec::SkipUntil { token } => self.skip_until(stream, token, value).into(),
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Cancel every in-flight wait and drop all state. Waits started after
    /// shutdown resolve as cancelled immediately.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let dropped = self.inner.states.clear();
        tracing::info!(states = dropped, "combinators shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Drop every state belonging to `stream`. Returns how many were dropped.
    pub fn clear(&self, stream: &str) -> usize {
        let dropped = self.inner.states.remove_stream(stream);
        tracing::debug!(stream, states = dropped, "combinator states cleared");
        dropped
    }

    /// Drop states untouched for at least `threshold_ms`.
    pub fn reap_idle(&self, threshold_ms: u64) -> usize {
        let dropped = self.inner.states.reap(self.now(), threshold_ms);
        if dropped > 0 {
            self.inner.metrics.record_evictions(dropped);
            tracing::info!(states = dropped, "evicted idle combinator states");
        }
        dropped
    }

    /// Sleep for `duration` unless shut down first. Returns false if the wait
    /// was cancelled.
    async fn sleep(&self, duration: Duration) -> bool {
        cancellable_sleep(duration, self.inner.shutdown.subscribe()).await
    }
}

async fn cancellable_sleep(duration: Duration, mut shutdown: watch::Receiver<bool>) -> bool {
    if *shutdown.borrow_and_update() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.wait_for(|stopped| *stopped) => false,
    }
}

impl Default for Combinators {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl fmt::Debug for Combinators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Combinators")
            .field("states", &self.inner.states.len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
