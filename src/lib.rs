//! Archetype interpreter: parses declarative XML wizard scripts and
//! executes, validates, or enumerates the interactive project-generation
//! flows they describe.
//!
//! This crate implements the model described in spec.md: a dynamic
//! [`value`] type, an [`expr`] engine over it, a typed [`ast`] produced by
//! the [`loader`], a hierarchical [`context`] of scopes, a generic
//! [`walker`] that drives either the executing [`controller`] or the
//! static [`validator`], and two ways to enumerate every reachable answer
//! combination: the up-front [`permutation`] engine and the cycling
//! [`input_tree`].
//!
//! Template rendering, file output, and plugin integration are out of
//! scope here; this crate stops at "what values would this script produce
//! for a given set of answers."

pub mod ast;
pub mod context;
pub mod controller;
pub mod error;
pub mod expr;
pub mod input_tree;
pub mod loader;
pub mod permutation;
pub mod validator;
pub mod value;
pub mod walker;

pub use context::{Context, ValueKind};
pub use controller::{Controller, DefaultInputResolver, InputResolver};
pub use error::{ArchetypeError, Location};
pub use input_tree::InputTree;
pub use loader::{LoadedScript, Loader};
pub use permutation::{permute, Permutation, DEFAULT_MAX_PERMUTATIONS};
pub use validator::{validate, Diagnostic, DiagnosticCode};
pub use value::Value;
pub use walker::{walk, LoaderResolver, ScriptResolver, VisitResult, Visitor};
