//! Operator capability.
//!
//! The host engine owns the operator catalogue. The lens evaluator only sees
//! it through [`OperatorLookup`], resolved by name. [`OperatorRegistry`] is
//! the in-crate implementation: names are validated when operators are
//! registered, not when a lens first runs.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::parser::is_identifier;
use crate::error::{EntityKind, Error, OperatorError, Result};

/// Ambient information handed to operators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LensContext {
    /// Identity of the node whose pipeline is evaluating, if any.
    pub node: Option<String>,
}

impl LensContext {
    pub fn for_node(node: impl Into<String>) -> Self {
        Self {
            node: Some(node.into()),
        }
    }
}

/// A named transformation `(value, args, context) -> value`.
pub trait Operator: Send + Sync {
    fn call(
        &self,
        input: &Value,
        args: &[Value],
        ctx: &LensContext,
    ) -> std::result::Result<Value, OperatorError>;
}

impl<F> Operator for F
where
    F: Fn(&Value, &[Value], &LensContext) -> std::result::Result<Value, OperatorError>
        + Send
        + Sync,
{
    fn call(
        &self,
        input: &Value,
        args: &[Value],
        ctx: &LensContext,
    ) -> std::result::Result<Value, OperatorError> {
        self(input, args, ctx)
    }
}

/// Resolves operator names. Supplied by the hosting engine.
pub trait OperatorLookup: Send + Sync {
    fn lookup_operator(&self, name: &str) -> Option<Arc<dyn Operator>>;
}

/// A lookup that knows no operators.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOperators;

impl OperatorLookup for NoOperators {
    fn lookup_operator(&self, _name: &str) -> Option<Arc<dyn Operator>> {
        None
    }
}

/// Concurrent operator registry.
#[derive(Default)]
pub struct OperatorRegistry {
    operators: DashMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure as an operator.
    pub fn register<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&Value, &[Value], &LensContext) -> std::result::Result<Value, OperatorError>
            + Send
            + Sync
            + 'static,
    {
        self.register_operator(name, Arc::new(f))
    }

    /// Register an operator object.
    ///
    /// Fails if the name is not an identifier or is already taken.
    pub fn register_operator(&self, name: &str, operator: Arc<dyn Operator>) -> Result<()> {
        if !is_identifier(name) {
            return Err(Error::InvalidOperatorName(name.to_string()));
        }
        match self.operators.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateName {
                kind: EntityKind::Operator,
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(operator);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.operators.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operators.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl OperatorLookup for OperatorRegistry {
    fn lookup_operator(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.operators.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

impl<T: OperatorLookup + ?Sized> OperatorLookup for Arc<T> {
    fn lookup_operator(&self, name: &str) -> Option<Arc<dyn Operator>> {
        (**self).lookup_operator(name)
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.names())
            .finish()
    }
}
