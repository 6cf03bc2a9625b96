//! Graph Nodes
//!
//! This module defines the node type that lives in the dependency graph.
//! There is one node per pool.

use indexmap::IndexSet;

use crate::reactive::Dependent;

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A plain pool, written by external writers. A root of the graph.
    Source,

    /// A pool recomputed from exactly one other pool.
    Derived,
}

/// A pool's position in the dependency graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Name of the pool this node stands for.
    name: String,

    /// The pool this one is derived from, if any.
    source: Option<String>,

    /// Derived pools and subscriber tokens that depend on this pool,
    /// in registration order.
    dependents: IndexSet<Dependent>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            dependents: IndexSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        if self.source.is_some() {
            NodeKind::Derived
        } else {
            NodeKind::Source
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub(crate) fn set_source(&mut self, source: Option<String>) {
        self.source = source;
    }

    /// Add a dependent. Returns false if it was already registered.
    pub fn add_dependent(&mut self, dependent: Dependent) -> bool {
        self.dependents.insert(dependent)
    }

    /// Remove a dependent, keeping the order of the rest.
    pub fn remove_dependent(&mut self, dependent: &Dependent) -> bool {
        self.dependents.shift_remove(dependent)
    }

    pub fn dependents(&self) -> &IndexSet<Dependent> {
        &self.dependents
    }

    /// Names of derived pools among the dependents.
    pub fn derived_dependents(&self) -> impl Iterator<Item = &str> {
        self.dependents.iter().filter_map(Dependent::as_pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::SubscriberToken;

    #[test]
    fn node_kind_follows_source() {
        let mut node = Node::new("celsius");
        assert_eq!(node.kind(), NodeKind::Source);

        node.set_source(Some("raw".into()));
        assert_eq!(node.kind(), NodeKind::Derived);
        assert_eq!(node.source(), Some("raw"));
    }

    #[test]
    fn dependents_keep_registration_order() {
        let mut node = Node::new("raw");
        assert!(node.add_dependent(Dependent::pool("b")));
        assert!(node.add_dependent(Dependent::Token(SubscriberToken::new("n1"))));
        assert!(node.add_dependent(Dependent::pool("a")));

        // idempotent
        assert!(!node.add_dependent(Dependent::pool("b")));
        assert_eq!(node.dependents().len(), 3);

        node.remove_dependent(&Dependent::Token(SubscriberToken::new("n1")));
        let order: Vec<_> = node.derived_dependents().collect();
        assert_eq!(order, vec!["b", "a"]);
    }
}
