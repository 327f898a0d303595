//! # Template expansion
//!
//! Substitutes `${...}` placeholders inside configuration trees. Parsing and
//! evaluation are separate: [`parser`] builds a tree of text and (possibly
//! nested) placeholder segments, [`expander`] evaluates it against an
//! [`EnvironmentContext`].
//!
//! Expansion never fails. Placeholders that cannot be resolved stay in the
//! output and are listed in [`Expansion::unresolved`] so callers can decide
//! whether a partially expanded document is acceptable.

pub mod expander;
pub mod parser;

pub use expander::{
    expand, expand_str, EnvironmentContext, ExpandOptions, Expansion, TemplateExpander, Unresolved,
};
pub use parser::{parse, render, Segment};
