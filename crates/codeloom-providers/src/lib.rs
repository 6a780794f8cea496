//! Reference `Provider` implementations for `codeloom-core`, backed by
//! `tree-sitter`.
//!
//! These exist so the core's pipeline (walker → provider → writer →
//! transaction) has something real to drive through its tests, and so any
//! caller embedding the engine has at least two working languages without
//! writing their own provider first. They are deliberately minimal: a
//! fixed table of node kinds per query type, not a general-purpose
//! structural search/rewrite tool.

mod python;
mod rust;
mod support;

pub use python::PythonProvider;
pub use rust::RustProvider;
