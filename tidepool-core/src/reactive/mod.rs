//! Reactive Pools
//!
//! This module implements the pool store: named reactive cells, derivations
//! between them, and propagation of changes to their dependents.
//!
//! # Concepts
//!
//! ## Pools
//!
//! A pool is a named container for a value. Every write lands in its current
//! value and a bounded history. Writes that the configured
//! [`ChangeStrategy`] considers a change are propagated.
//!
//! ## Derived Pools
//!
//! A derived pool is recomputed from exactly one source pool through a
//! [`Transform`] whenever the source changes. Derivations never form cycles
//! and are limited in depth.
//!
//! ## Subscribers
//!
//! External subscribers are registered with a [`SubscriberToken`] and rerun
//! through the host's [`SubscriberRunner`] when a pool they read changes.
//!
//! # Implementation Notes
//!
//! Propagation is synchronous and runs to completion. Writes can be grouped
//! with [`PoolStore::batch`], which defers propagation until the batch ends.
//! Idle, unsubscribed pools are evicted by the [`Reaper`].

mod batch;
pub mod change;
mod pool;
mod reaper;
mod store;
mod subscriber;
mod transform;

pub use change::{should_update, ChangeStrategy};
pub use pool::{Derivation, Pool, PoolMeta, PoolSnapshot, PoolStats};
pub use reaper::{ReapReport, Reaper, ReaperHandle};
pub use store::{PoolStore, PoolStoreBuilder};
pub use subscriber::{Dependent, SubscriberRunner, SubscriberToken};
pub use transform::Transform;
