//! Dependency Graph
//!
//! This module tracks which pools and external subscribers depend on which
//! pools.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes represent pools
//! - Edges point from a source pool to a dependent: a pool derived from it,
//!   or a subscriber token that reads it
//!
//! When a pool changes, its dependents are visited in registration order.
//! Batches use the graph to order their flush upstream first.
//!
//! # Design Decisions
//!
//! 1. One centralized graph, so cycle checks and topological ordering look at
//!    every edge at once.
//!
//! 2. Nodes are indexed by pool name.
//!
//! 3. Each node keeps its source (backward edge) and its dependents (forward
//!    edges), so both directions are cheap to walk.

mod dependency;
mod node;

pub use dependency::DependencyGraph;
pub use node::{Node, NodeKind};
