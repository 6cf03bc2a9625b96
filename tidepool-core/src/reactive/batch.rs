//! Batch bookkeeping.
//!
//! While a batch is open, writes still land in their pool but propagation is
//! deferred. Each touched pool is remembered once, in first-touch order, and
//! propagated with whatever value it holds when the outermost batch closes.
//! That gives last-value-wins per pool and a single propagation for it.
//!
//! During the flush, every pool whose write actually propagated is recorded,
//! so a pending pool already pushed downstream by an upstream flush is not
//! pushed again. A pool whose recompute was unchanged or failed stays
//! unrecorded and is flushed on its own.

use indexmap::IndexSet;

#[derive(Debug, Default)]
pub(crate) struct BatchState {
    depth: usize,
    pending: IndexSet<String>,
    flushed: Option<IndexSet<String>>,
}

impl BatchState {
    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn enter(&mut self) {
        self.depth += 1;
    }

    /// Remember that `pool` changed and needs propagating.
    pub fn defer(&mut self, pool: &str) {
        if !self.pending.contains(pool) {
            self.pending.insert(pool.to_string());
        }
    }

    /// Close one level. Returns the pools to flush once the outermost level
    /// closes.
    pub fn exit(&mut self) -> Option<Vec<String>> {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            Some(self.pending.drain(..).collect())
        } else {
            None
        }
    }

    /// Start recording propagated pools. Returns the record of an enclosing
    /// flush, to be handed back to [`end_flush`](Self::end_flush).
    pub fn begin_flush(&mut self) -> Option<IndexSet<String>> {
        self.flushed.replace(IndexSet::new())
    }

    pub fn end_flush(&mut self, outer: Option<IndexSet<String>>) {
        self.flushed = outer;
    }

    /// Note that `pool` propagated while a flush is running.
    pub fn mark_propagated(&mut self, pool: &str) {
        if let Some(flushed) = self.flushed.as_mut() {
            flushed.insert(pool.to_string());
        }
    }

    pub fn was_propagated(&self, pool: &str) -> bool {
        self.flushed
            .as_ref()
            .is_some_and(|flushed| flushed.contains(pool))
    }

    /// Close one level after a panic. Pending work is dropped once the
    /// outermost level is gone. Returns how many pools were dropped.
    pub fn abandon(&mut self) -> usize {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            let dropped = self.pending.len();
            self.pending.clear();
            dropped
        } else {
            0
        }
    }
}
