//! Pool Store
//!
//! The store owns every pool, the dependency graph between them, and the
//! propagation of changes along that graph.
//!
//! # How It Works
//!
//! 1. An external writer calls [`PoolStore::update`]. The value always lands
//!    in the pool's current value and history.
//!
//! 2. The configured [`ChangeStrategy`](super::ChangeStrategy) compares the
//!    new value against the previous one. Unchanged writes stop here.
//!
//! 3. Changed writes are propagated to the pool's dependents in registration
//!    order: derived pools are recomputed through their [`Transform`] and
//!    updated (recursively), subscriber tokens are handed to the
//!    [`SubscriberRunner`].
//!
//! 4. A failure in one dependent is logged and counted, and propagation to
//!    the remaining dependents carries on.
//!
//! # Thread Safety
//!
//! Writes are serialized by a re-entrant writer lock held across the whole
//! write and its propagation, so a write is fully propagated before the next
//! external write begins. Nested writes made by propagation on the same
//! thread re-enter the lock. Pool data sits behind a separate mutex that is
//! never held while calling transforms, operators or the runner.

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde_json::Value;

use super::batch::BatchState;
use super::change::should_update;
use super::pool::{Derivation, Pool, PoolSnapshot, PoolStats};
use super::subscriber::{Dependent, SubscriberRunner, SubscriberToken};
use super::transform::Transform;
use crate::clock::{default_clock, Clock};
use crate::config::EngineConfig;
use crate::error::{EntityKind, Error, Result};
use crate::graph::DependencyGraph;
use crate::lens::{LensContext, LensEvaluator, NoOperators, OperatorLookup};
use crate::metrics::EngineMetrics;

#[derive(Debug, Default)]
struct StoreState {
    pools: IndexMap<String, Pool>,
    graph: DependencyGraph,
    batch: BatchState,
}

struct StoreInner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    evaluator: LensEvaluator,
    runner: RwLock<Option<Arc<dyn SubscriberRunner>>>,
    metrics: Arc<EngineMetrics>,
    writer: ReentrantMutex<()>,
    state: Mutex<StoreState>,
}

/// Handle to a pool store. Clones share the same pools.
#[derive(Clone)]
pub struct PoolStore {
    inner: Arc<StoreInner>,
}

/// Builder for [`PoolStore`].
#[derive(Default)]
pub struct PoolStoreBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    operators: Option<Arc<dyn OperatorLookup>>,
    runner: Option<Arc<dyn SubscriberRunner>>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl PoolStoreBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn operators(mut self, operators: Arc<dyn OperatorLookup>) -> Self {
        self.operators = Some(operators);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn SubscriberRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> PoolStore {
        let metrics = self.metrics.unwrap_or_default();
        let operators = self.operators.unwrap_or_else(|| Arc::new(NoOperators));
        let evaluator = LensEvaluator::new(operators).with_metrics(Arc::clone(&metrics));

        PoolStore {
            inner: Arc::new(StoreInner {
                config: self.config,
                clock: self.clock.unwrap_or_else(default_clock),
                evaluator,
                runner: RwLock::new(self.runner),
                metrics,
                writer: ReentrantMutex::new(()),
                state: Mutex::new(StoreState::default()),
            }),
        }
    }
}

impl PoolStore {
    /// Create a store with the default configuration, the tokio clock and
    /// no operators.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> PoolStoreBuilder {
        PoolStoreBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.inner.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn evaluator(&self) -> &LensEvaluator {
        &self.inner.evaluator
    }

    /// Install or replace the runner used for subscriber tokens.
    pub fn set_runner(&self, runner: Arc<dyn SubscriberRunner>) {
        *self.inner.runner.write() = Some(runner);
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    // ------------------------------------------------------------------------
    // Pools
    // ------------------------------------------------------------------------

    /// Create a pool. Names are unique.
    pub fn create(&self, name: &str, initial: Value) -> Result<()> {
        let _writer = self.inner.writer.lock();
        let mut state = self.inner.state.lock();
        if state.pools.contains_key(name) {
            return Err(Error::DuplicateName {
                kind: EntityKind::Pool,
                name: name.to_string(),
            });
        }
        let pool = Pool::new(name, initial, self.now());
        state.pools.insert(name.to_string(), pool);
        state.graph.add_node(name);
        tracing::debug!(pool = name, "pool created");
        Ok(())
    }

    /// Current value of a pool.
    pub fn get(&self, name: &str) -> Result<Value> {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let pool = state
            .pools
            .get_mut(name)
            .ok_or_else(|| Error::pool_not_found(name))?;
        pool.touch(now);
        Ok(pool.current().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.state.lock().pools.contains_key(name)
    }

    /// Pool names in creation order.
    pub fn names(&self) -> Vec<String> {
        self.inner.state.lock().pools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a value to a pool and propagate it if it counts as a change.
    ///
    /// Returns whether the write was a change.
    pub fn update(&self, name: &str, value: Value) -> Result<bool> {
        let _writer = self.inner.writer.lock();
        let changed = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let pool = state
                .pools
                .get_mut(name)
                .ok_or_else(|| Error::pool_not_found(name))?;
            let previous = pool.record(value.clone(), self.now(), self.inner.config.history_limit);
            let changed = should_update(&previous, &value, self.inner.config.change_detection);

            if changed && state.batch.is_active() {
                state.batch.defer(name);
                tracing::debug!(pool = name, "pool updated, propagation deferred");
                return Ok(true);
            }
            if changed {
                state.batch.mark_propagated(name);
            }
            changed
        };

        tracing::debug!(pool = name, changed, "pool updated");
        if changed {
            self.propagate(name, &value);
        }
        Ok(changed)
    }

    /// History from oldest to newest, keeping only the newest `limit`
    /// entries when a limit is given.
    pub fn history(&self, name: &str, limit: Option<usize>) -> Result<Vec<Value>> {
        let state = self.inner.state.lock();
        state
            .pools
            .get(name)
            .map(|pool| pool.history(limit))
            .ok_or_else(|| Error::pool_not_found(name))
    }

    pub fn stats(&self, name: &str) -> Result<PoolStats> {
        let state = self.inner.state.lock();
        let pool = state
            .pools
            .get(name)
            .ok_or_else(|| Error::pool_not_found(name))?;
        Ok(PoolStats {
            update_count: pool.meta().update_count,
            subscriber_count: state.graph.subscriber_count(name),
            history_size: pool.history_len(),
            approx_memory_bytes: pool.approx_memory_bytes(),
        })
    }

    /// Inspect a pool without touching it.
    pub fn pool(&self, name: &str) -> Result<PoolSnapshot> {
        let state = self.inner.state.lock();
        state
            .pools
            .get(name)
            .map(|pool| pool.snapshot(state.graph.subscriber_count(name)))
            .ok_or_else(|| Error::pool_not_found(name))
    }

    /// Reset a pool to `value`, or to its oldest retained history entry.
    /// Goes through [`update`](Self::update), so dependents are notified.
    pub fn reset(&self, name: &str, value: Option<Value>) -> Result<bool> {
        let _writer = self.inner.writer.lock();
        let value = match value {
            Some(value) => value,
            None => {
                let state = self.inner.state.lock();
                let pool = state
                    .pools
                    .get(name)
                    .ok_or_else(|| Error::pool_not_found(name))?;
                pool.oldest().cloned().unwrap_or(Value::Null)
            }
        };
        self.update(name, value)
    }

    /// Remove a pool and every edge touching it. Pools derived from it keep
    /// their value and lose their derivation.
    pub fn remove(&self, name: &str) -> Result<Value> {
        let _writer = self.inner.writer.lock();
        let mut state = self.inner.state.lock();
        self.remove_locked(&mut state, name)
    }

    fn remove_locked(&self, state: &mut StoreState, name: &str) -> Result<Value> {
        let pool = state
            .pools
            .shift_remove(name)
            .ok_or_else(|| Error::pool_not_found(name))?;
        for orphan in state.graph.remove_node(name) {
            if let Some(orphan) = state.pools.get_mut(&orphan) {
                orphan.set_derivation(None);
            }
        }
        tracing::debug!(pool = name, "pool removed");
        Ok(pool.current().clone())
    }

    // ------------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------------

    /// Register an external subscriber of `source`. Idempotent.
    ///
    /// Returns false if the token was already subscribed.
    pub fn track_dependency(&self, source: &str, token: SubscriberToken) -> Result<bool> {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let pool = state
            .pools
            .get_mut(source)
            .ok_or_else(|| Error::pool_not_found(source))?;
        pool.touch(now);
        Ok(state.graph.add_dependent(source, Dependent::Token(token)))
    }

    /// Remove an external subscriber. Returns whether it was subscribed.
    pub fn untrack_dependency(&self, source: &str, token: &SubscriberToken) -> bool {
        let dependent = Dependent::Token(token.clone());
        self.inner
            .state
            .lock()
            .graph
            .remove_dependent(source, &dependent)
    }

    /// Dependents of a pool in registration order.
    pub fn subscribers(&self, name: &str) -> Result<Vec<Dependent>> {
        let state = self.inner.state.lock();
        if !state.pools.contains_key(name) {
            return Err(Error::pool_not_found(name));
        }
        Ok(state.graph.dependents(name))
    }

    /// Derived pools downstream of `name`, upstream first.
    pub fn downstream(&self, name: &str) -> Vec<String> {
        self.inner.state.lock().graph.affected(name)
    }

    /// Derive `target` from `source` through `transform`.
    ///
    /// The target is created if missing. An existing target is rewired to the
    /// new source and its recomputed value is written through
    /// [`update`](Self::update).
    pub fn create_derived(&self, source: &str, transform: Transform, target: &str) -> Result<()> {
        let _writer = self.inner.writer.lock();
        transform.validate(self.inner.evaluator.operators().as_ref())?;

        let now = self.now();
        let (input, target_exists) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let pool = state
                .pools
                .get_mut(source)
                .ok_or_else(|| Error::pool_not_found(source))?;
            pool.touch(now);
            let input = pool.current().clone();

            if state.graph.would_cycle(source, target) {
                return Err(Error::CycleDetected {
                    source_pool: source.to_string(),
                    target: target.to_string(),
                });
            }

            let target_exists = state.pools.contains_key(target);
            let below = if target_exists {
                state.graph.height(target)
            } else {
                0
            };
            let depth = state.graph.depth(source) + 1 + below;
            let max = self.inner.config.max_derivation_depth;
            if depth > max {
                return Err(Error::DerivationTooDeep {
                    target: target.to_string(),
                    depth,
                    max,
                });
            }
            (input, target_exists)
        };

        let ctx = LensContext::for_node(target);
        let value = transform.apply(&input, &self.inner.evaluator, &ctx)?;
        let derivation = Derivation {
            source: source.to_string(),
            transform,
        };

        {
            let mut state = self.inner.state.lock();
            if !target_exists {
                state
                    .pools
                    .insert(target.to_string(), Pool::new(target, value.clone(), now));
                state.graph.add_node(target);
            }
            state.graph.link_derived(source, target);
            if let Some(pool) = state.pools.get_mut(target) {
                pool.set_derivation(Some(derivation));
            }
        }

        tracing::debug!(source, target, rewired = target_exists, "derived pool linked");
        if target_exists {
            self.update(target, value)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------------

    /// Notify every dependent of `source` that it now holds `value`.
    ///
    /// Failures are isolated per dependent.
    pub fn propagate(&self, source: &str, value: &Value) {
        let _writer = self.inner.writer.lock();
        let dependents = self.inner.state.lock().graph.dependents(source);
        if dependents.is_empty() {
            return;
        }
        self.inner.metrics.record_propagation();

        for dependent in dependents {
            match dependent {
                Dependent::Pool(target) => {
                    tracing::trace!(source, target = %target, "recomputing derived pool");
                    if let Err(error) = self.recompute(&target, value) {
                        self.inner.metrics.record_derivation_failure();
                        tracing::warn!(source, target = %target, %error, "derivation failed");
                    }
                }
                Dependent::Token(token) => {
                    tracing::trace!(source, token = %token, "notifying subscriber");
                    if let Err(error) = self.notify(&token, source, value) {
                        self.inner.metrics.record_runner_failure();
                        tracing::warn!(source, token = %token, %error, "subscriber rerun failed");
                    }
                }
            }
        }
    }

    fn recompute(&self, target: &str, input: &Value) -> Result<()> {
        let transform = {
            let state = self.inner.state.lock();
            state
                .pools
                .get(target)
                .and_then(Pool::derivation)
                .map(|derivation| derivation.transform.clone())
        };
        let Some(transform) = transform else {
            return Ok(());
        };
        let ctx = LensContext::for_node(target);
        let value = transform.apply(input, &self.inner.evaluator, &ctx)?;
        self.update(target, value)?;
        Ok(())
    }

    fn notify(&self, token: &SubscriberToken, source: &str, value: &Value) -> Result<()> {
        let runner = self.inner.runner.read().clone();
        match runner {
            Some(runner) => runner.run(token, source, value).map_err(|e| match e {
                runner_error @ Error::Runner { .. } => runner_error,
                other => Error::Runner {
                    token: token.to_string(),
                    reason: other.to_string(),
                },
            }),
            None => {
                tracing::trace!(token = %token, "no runner installed");
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------------

    /// Run `f` with propagation deferred until the outermost batch returns.
    ///
    /// Writes inside the batch land immediately. Each changed pool is then
    /// propagated once with its final value, upstream pools first. If `f`
    /// panics the deferred propagation is discarded.
    pub fn batch<R>(&self, f: impl FnOnce(&PoolStore) -> R) -> R {
        let _writer = self.inner.writer.lock();
        self.inner.state.lock().batch.enter();

        let mut guard = BatchGuard {
            store: self,
            armed: true,
        };
        let result = f(self);
        guard.armed = false;

        let pending = self.inner.state.lock().batch.exit();
        if let Some(pending) = pending {
            self.flush(pending);
        }
        result
    }

    pub fn in_batch(&self) -> bool {
        self.inner.state.lock().batch.is_active()
    }

    fn flush(&self, pending: Vec<String>) {
        if pending.is_empty() {
            return;
        }
        let (order, outer) = {
            let mut state = self.inner.state.lock();
            let order = state.graph.topological_sort(pending);
            (order, state.batch.begin_flush())
        };
        tracing::debug!(pools = order.len(), "flushing batch");

        let _flush = FlushGuard {
            store: self,
            outer,
        };
        for name in order {
            let value = {
                let mut state = self.inner.state.lock();
                // already pushed downstream by a recompute from its source
                if state.batch.was_propagated(&name) {
                    continue;
                }
                let Some(value) = state.pools.get(&name).map(|pool| pool.current().clone()) else {
                    continue;
                };
                state.batch.mark_propagated(&name);
                value
            };
            self.propagate(&name, &value);
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Evict pools nobody depends on that have been idle for at least the
    /// configured inactivity threshold.
    pub fn reap_inactive(&self) -> Vec<String> {
        self.reap_idle(self.inner.config.inactivity_threshold_ms)
    }

    /// Evict pools nobody depends on that have been idle for at least
    /// `threshold_ms`. Returns the evicted names.
    pub fn reap_idle(&self, threshold_ms: u64) -> Vec<String> {
        let _writer = self.inner.writer.lock();
        let now = self.now();
        let mut state = self.inner.state.lock();

        let idle: Vec<String> = state
            .pools
            .values()
            .filter(|pool| state.graph.subscriber_count(pool.name()) == 0)
            .filter(|pool| now.saturating_sub(pool.meta().last_activity_ms()) >= threshold_ms)
            .map(|pool| pool.name().to_string())
            .collect();

        for name in &idle {
            // cannot fail, the name was just read from the map
            let _ = self.remove_locked(&mut state, name);
        }
        if !idle.is_empty() {
            self.inner.metrics.record_evictions(idle.len());
            tracing::info!(evicted = idle.len(), pools = ?idle, "evicted idle pools");
        }
        idle
    }
}

impl Default for PoolStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PoolStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PoolStore")
            .field("pools", &state.pools.len())
            .field("batch_depth", &state.batch.depth())
            .finish_non_exhaustive()
    }
}

/// Closes a batch level if the batch closure unwinds.
struct BatchGuard<'a> {
    store: &'a PoolStore,
    armed: bool,
}

struct FlushGuard<'a> {
    store: &'a PoolStore,
    outer: Option<IndexSet<String>>,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        let outer = self.outer.take();
        self.store.inner.state.lock().batch.end_flush(outer);
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let dropped = self.store.inner.state.lock().batch.abandon();
            tracing::warn!(dropped, "batch aborted, pending propagation discarded");
        }
    }
}
