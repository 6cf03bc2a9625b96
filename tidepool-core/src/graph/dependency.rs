//! Dependency Graph
//!
//! Tracks `source -> dependent` edges between pools and external subscribers
//! and answers the structural questions propagation needs:
//!
//! - would a new derivation close a cycle?
//! - how deep is a derivation chain?
//! - in what order should a set of pools be propagated?
//!
//! Every derived pool has exactly one source, so the pool-to-pool part of the
//! graph is a forest. A pool's depth (edges from its root) is therefore a
//! valid topological key.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use super::node::Node;
use crate::reactive::Dependent;

/// The dependency graph, indexed by pool name.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: IndexMap<String, Node>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node for `name` if there is none yet.
    pub fn add_node(&mut self, name: &str) {
        if !self.nodes.contains_key(name) {
            self.nodes.insert(name.to_string(), Node::new(name));
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Remove a node and every edge touching it.
    ///
    /// Returns the derived pools that lost their source.
    pub fn remove_node(&mut self, name: &str) -> Vec<String> {
        let Some(node) = self.nodes.shift_remove(name) else {
            return Vec::new();
        };

        if let Some(source) = node.source() {
            if let Some(parent) = self.nodes.get_mut(source) {
                parent.remove_dependent(&Dependent::pool(name));
            }
        }

        let orphaned: Vec<String> = node.derived_dependents().map(str::to_string).collect();
        for child in &orphaned {
            if let Some(child) = self.nodes.get_mut(child) {
                child.set_source(None);
            }
        }
        orphaned
    }

    /// Register a dependent of `source`. Returns false if it already was one.
    pub fn add_dependent(&mut self, source: &str, dependent: Dependent) -> bool {
        self.nodes
            .get_mut(source)
            .is_some_and(|node| node.add_dependent(dependent))
    }

    pub fn remove_dependent(&mut self, source: &str, dependent: &Dependent) -> bool {
        self.nodes
            .get_mut(source)
            .is_some_and(|node| node.remove_dependent(dependent))
    }

    /// Dependents of `source` in registration order.
    pub fn dependents(&self, source: &str) -> Vec<Dependent> {
        self.nodes
            .get(source)
            .map(|node| node.dependents().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, source: &str) -> usize {
        self.nodes
            .get(source)
            .map_or(0, |node| node.dependents().len())
    }

    pub fn source_of(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).and_then(Node::source)
    }

    /// Make `target` derived from `source`, detaching it from any previous
    /// source. Both nodes must exist.
    pub fn link_derived(&mut self, source: &str, target: &str) {
        if let Some(previous) = self.source_of(target).map(str::to_string) {
            if previous != source {
                if let Some(parent) = self.nodes.get_mut(&previous) {
                    parent.remove_dependent(&Dependent::pool(target));
                }
            }
        }
        if let Some(node) = self.nodes.get_mut(target) {
            node.set_source(Some(source.to_string()));
        }
        if let Some(node) = self.nodes.get_mut(source) {
            node.add_dependent(Dependent::pool(target));
        }
    }

    /// Whether deriving `target` from `source` would make a pool depend on
    /// itself, directly or transitively.
    pub fn would_cycle(&self, source: &str, target: &str) -> bool {
        source == target || self.reaches(target, source)
    }

    /// Whether `to` is reachable from `from` by following derived-pool edges.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from]);

        while let Some(name) = queue.pop_front() {
            if name == to {
                return true;
            }
            if !visited.insert(name) {
                continue;
            }
            if let Some(node) = self.nodes.get(name) {
                queue.extend(node.derived_dependents());
            }
        }
        false
    }

    /// Number of derivation edges between `name` and the root of its chain.
    pub fn depth(&self, name: &str) -> usize {
        let mut depth = 0;
        let mut current = name;
        // bounded by node count in case of a corrupted chain
        while let Some(source) = self.source_of(current) {
            depth += 1;
            if depth > self.nodes.len() {
                break;
            }
            current = source;
        }
        depth
    }

    /// Length of the longest chain of derived pools hanging below `name`.
    pub fn height(&self, name: &str) -> usize {
        let mut height = 0;
        let mut frontier = vec![(name, 0usize)];
        let mut visited = HashSet::new();
        while let Some((current, level)) = frontier.pop() {
            if !visited.insert(current) {
                continue;
            }
            height = height.max(level);
            if let Some(node) = self.nodes.get(current) {
                frontier.extend(node.derived_dependents().map(|child| (child, level + 1)));
            }
        }
        height
    }

    /// Every derived pool downstream of `source`, in topological order.
    pub fn affected(&self, source: &str) -> Vec<String> {
        let mut to_process = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(node) = self.nodes.get(source) {
            queue.extend(node.derived_dependents());
        }

        while let Some(name) = queue.pop_front() {
            if !visited.insert(name) {
                continue;
            }
            if let Some(node) = self.nodes.get(name) {
                to_process.push(name.to_string());
                queue.extend(node.derived_dependents());
            }
        }

        self.topological_sort(to_process)
    }

    /// Sort `names` so upstream pools come before pools derived from them.
    /// Unrelated pools keep their relative order.
    pub fn topological_sort(&self, names: Vec<String>) -> Vec<String> {
        let depths: HashMap<&str, usize> = names
            .iter()
            .map(|name| (name.as_str(), self.depth(name)))
            .collect();
        let mut order: Vec<(usize, &String)> = names
            .iter()
            .map(|name| (depths[name.as_str()], name))
            .collect();
        order.sort_by_key(|(depth, _)| *depth);
        order.into_iter().map(|(_, name)| name.clone()).collect()
    }
}
