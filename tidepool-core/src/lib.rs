//! Tidepool Core
//!
//! This crate provides the reactive state engine behind Tidepool pipelines.
//! It implements:
//!
//! - Named reactive pools with bounded history and change detection
//! - Derived pools recomputed along a dependency graph
//! - Lenses, a small pipe-composed expression language for projections
//! - Stream combinators (debounce, throttle, buffer, retry, ...)
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Pool store, propagation, batching and the idle reaper
//! - `graph`: Dependency graph between pools and subscribers
//! - `lens`: Lens parsing and evaluation against host operators
//! - `combinators`: Keyed per-stream state and the combinators using it
//! - `clock`, `config`, `metrics`, `error`: shared plumbing
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use tidepool_core::reactive::{PoolStore, Transform};
//!
//! let store = PoolStore::new();
//! store.create("reading", json!({"celsius": 20}))?;
//! store.create_derived("reading", Transform::field("celsius"), "celsius")?;
//!
//! store.update("reading", json!({"celsius": 25}))?;
//! assert_eq!(store.get("celsius")?, json!(25));
//! ```

pub mod clock;
pub mod combinators;
pub mod config;
pub mod error;
pub mod graph;
pub mod lens;
pub mod metrics;
pub mod reactive;

pub use clock::{Clock, ManualClock, TokioClock};
pub use combinators::{CombinatorSpec, Combinators, Emission};
pub use config::{CombinatorDefaults, EngineConfig};
pub use error::{Error, Result};
pub use lens::{Lens, LensEvaluator, OperatorRegistry};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use reactive::{ChangeStrategy, PoolStore, Reaper, SubscriberToken, Transform};
