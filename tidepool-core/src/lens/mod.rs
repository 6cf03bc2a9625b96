//! Lenses
//!
//! A lens is a pipe-composed expression that projects or transforms a value:
//!
//! ```text
//! .reading | .celsius | scale(1.8) | offset(32)
//! ```
//!
//! # Architecture
//!
//! 1. Expressions are parsed into a [`Lens`]: an ordered list of [`LensStep`]s
//!    (field access, operator call, bare operator, `.value` projection).
//! 2. Operator names resolve through an [`OperatorLookup`] supplied by the
//!    host. [`Lens::compile`] validates them up front.
//! 3. [`LensEvaluator`] runs the steps left to right. Failing steps are
//!    skipped and reported, never raised.
//! 4. The consumers in [`ops`] (map, filter, reduce, conditional, path
//!    transforms) build on the evaluator.

mod evaluator;
mod operator;
pub mod ops;
mod parser;
mod step;

pub use evaluator::{LensEvaluator, LensOutput};
pub use operator::{LensContext, NoOperators, Operator, OperatorLookup, OperatorRegistry};
pub use ops::{
    conditional_lens, filter_lens, map_lens, reduce_lens, transform_paths, truthy, Comparator,
    Condition,
};
pub use parser::parse_literal;
pub use step::{Lens, LensArgs, LensStep};

