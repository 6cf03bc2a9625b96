//! Engine Metrics
//!
//! Failures that the engine isolates instead of returning (derivation errors,
//! runner errors, skipped lens steps, coerced combinator arguments) are
//! counted here in addition to being logged.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Writes that were propagated to dependents.
    pub propagations: AtomicU64,

    /// Derived pools whose transform failed during propagation.
    pub derivation_failures: AtomicU64,

    /// Subscriber tokens whose runner returned an error.
    pub runner_failures: AtomicU64,

    /// Lens steps skipped because of an unknown or failing operator.
    pub lens_step_failures: AtomicU64,

    /// Combinator arguments replaced by their default.
    pub combinator_input_errors: AtomicU64,

    /// Pools and subscription states removed for inactivity.
    pub evictions: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_propagation(&self) {
        self.propagations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_derivation_failure(&self) {
        self.derivation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_runner_failure(&self) {
        self.runner_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lens_step_failures(&self, count: usize) {
        self.lens_step_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_combinator_input_error(&self) {
        self.combinator_input_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            propagations: self.propagations.load(Ordering::Relaxed),
            derivation_failures: self.derivation_failures.load(Ordering::Relaxed),
            runner_failures: self.runner_failures.load(Ordering::Relaxed),
            lens_step_failures: self.lens_step_failures.load(Ordering::Relaxed),
            combinator_input_errors: self.combinator_input_errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub propagations: u64,
    pub derivation_failures: u64,
    pub runner_failures: u64,
    pub lens_step_failures: u64,
    pub combinator_input_errors: u64,
    pub evictions: u64,
}

impl MetricsSnapshot {
    /// Total number of isolated failures of any kind.
    pub fn isolated_failures(&self) -> u64 {
        self.derivation_failures + self.runner_failures + self.lens_step_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let metrics = EngineMetrics::new();
        metrics.record_propagation();
        metrics.record_propagation();
        metrics.record_derivation_failure();
        metrics.record_lens_step_failures(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.propagations, 2);
        assert_eq!(snap.derivation_failures, 1);
        assert_eq!(snap.lens_step_failures, 3);
        assert_eq!(snap.isolated_failures(), 4);
    }
}
