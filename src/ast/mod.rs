//! Typed AST (spec.md §3, §9).
//!
//! The original schema models this as a deep class hierarchy
//! (`Node -> Block -> Input -> NamedInput -> Options -> Enum/List`) walked by
//! visitors. Here it is a single tagged `Node` with a `NodeKind` payload per
//! variant, matching Design Notes §9: subtree-wide recursion lives in the
//! walker, not the node types, and there are no cycles — invocation targets
//! are resolved by name through the loader rather than held as pointers.
//!
//! `TEXT`/`BOOLEAN`/`ENUM`/`LIST` appear in spec.md §3 both as `BlockKind`
//! members and as `Input` variants; this implementation keeps them solely as
//! `InputPayload` variants (a `BlockKind` for them would never be
//! constructed). `OPTION` keeps its `Input` form (`InputPayload::Option`)
//! rather than a `BlockKind`, since spec.md §3 defines it as `Option(value)`
//! with no children of its own.

pub mod builder;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::Location;
use crate::value::Value;

/// Monotonically assigned node id; wraps at `i32::MAX + 1` back to `1`
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Thread-safe monotonic id allocation (spec.md §5: "thread-safe increment
/// is required if scripts are loaded concurrently").
pub fn next_node_id() -> NodeId {
    loop {
        let current = NEXT_ID.load(Ordering::Relaxed);
        let next = if current == i32::MAX as u32 { 1 } else { current + 1 };
        if NEXT_ID
            .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return NodeId(current);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Script,
    Methods,
    Method,
    Step,
    Inputs,
    Presets,
    Variables,
    Output,
    Templates,
    Template,
    Files,
    File,
    Model,
    Map,
    Value,
    Transformation,
    Replace,
    Includes,
    Include,
    Excludes,
    Exclude,
    InvokeDir,
    Invoke,
    Validations,
    Regex,
}

impl BlockKind {
    /// `SCRIPT` and `METHOD` are the only invocable `DeclaredBlock`s
    /// (spec.md §3).
    #[must_use]
    pub fn is_declared_block(self) -> bool {
        matches!(self, BlockKind::Script | BlockKind::Method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationKind {
    Exec,
    Source,
    Call,
}

/// The non-`Option` input kinds; any of these is a `DeclaredInput`
/// (spec.md §3). `Option` itself is a leaf carrying a candidate value and
/// the `if` condition that filters it out of its enclosing `Enum`/`List`.
#[derive(Debug, Clone, PartialEq)]
pub enum InputPayload {
    Boolean { default: Option<bool>, optional: bool, global: bool },
    Text { default: Option<String>, optional: bool, global: bool },
    Enum { default: Option<String>, optional: bool, global: bool, options: Vec<Arc<Node>> },
    List { default: Vec<String>, optional: bool, global: bool, options: Vec<Arc<Node>> },
    Option { value: String, condition: Option<String> },
}

impl InputPayload {
    #[must_use]
    pub fn is_optional(&self) -> bool {
        match self {
            InputPayload::Boolean { optional, .. }
            | InputPayload::Text { optional, .. }
            | InputPayload::Enum { optional, .. }
            | InputPayload::List { optional, .. } => *optional,
            InputPayload::Option { .. } => false,
        }
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        match self {
            InputPayload::Boolean { global, .. }
            | InputPayload::Text { global, .. }
            | InputPayload::Enum { global, .. }
            | InputPayload::List { global, .. } => *global,
            InputPayload::Option { .. } => false,
        }
    }

    #[must_use]
    pub fn has_default(&self) -> bool {
        match self {
            InputPayload::Boolean { default, .. } => default.is_some(),
            InputPayload::Text { default, .. } => default.is_some(),
            InputPayload::Enum { default, .. } => default.is_some(),
            InputPayload::List { default, .. } => !default.is_empty(),
            InputPayload::Option { .. } => true,
        }
    }

    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            InputPayload::Boolean { default, .. } => Value::Bool(default.unwrap_or(false)),
            InputPayload::Text { default, .. } => Value::String(default.clone().unwrap_or_default()),
            InputPayload::Enum { default, .. } => Value::String(default.clone().unwrap_or_default()),
            InputPayload::List { default, .. } => Value::StringList(default.clone()),
            InputPayload::Option { value, .. } => Value::String(value.clone()),
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            InputPayload::Boolean { .. } => "boolean",
            InputPayload::Text { .. } => "text",
            InputPayload::Enum { .. } => "enum",
            InputPayload::List { .. } => "list",
            InputPayload::Option { .. } => "option",
        }
    }

    #[must_use]
    pub fn options(&self) -> &[Arc<Node>] {
        match self {
            InputPayload::Enum { options, .. } | InputPayload::List { options, .. } => options,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Block { kind: BlockKind, children: Vec<Arc<Node>> },
    /// Guards `then` with `expression` (raw source, parsed lazily/memoized
    /// by the expression engine).
    Condition { expression: String, then: Vec<Arc<Node>> },
    Invocation { kind: InvocationKind, target: String },
    /// A `DeclaredInput`: `id` lives in `Node::attributes["id"]`.
    Input(InputPayload),
    Preset { path: String, value: Value },
    Variable { path: String, raw_value: String, transient: bool },
    Validation { id: String, description: String, patterns: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub script_path: String,
    pub loc: Location,
    pub attributes: HashMap<String, Value>,
    pub kind: NodeKind,
}

impl Node {
    #[must_use]
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn id_attr(&self) -> Option<&str> {
        self.attr_str("id")
    }

    #[must_use]
    pub fn if_attr(&self) -> Option<&str> {
        self.attr_str("if")
    }

    #[must_use]
    pub fn attr_bool(&self, key: &str) -> bool {
        matches!(self.attributes.get(key), Some(Value::Bool(true)))
    }

    #[must_use]
    pub fn children(&self) -> &[Arc<Node>] {
        match &self.kind {
            NodeKind::Block { children, .. } => children,
            NodeKind::Condition { then, .. } => then,
            NodeKind::Input(payload) => payload.options(),
            _ => &[],
        }
    }

    #[must_use]
    pub fn block_kind(&self) -> Option<BlockKind> {
        match &self.kind {
            NodeKind::Block { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The unique `blockName` for `SCRIPT`/`METHOD` nodes: the script path,
    /// or `"path#method"` (spec.md §3).
    #[must_use]
    pub fn block_name(&self) -> Option<String> {
        match self.block_kind()? {
            BlockKind::Script => Some(self.script_path.clone()),
            BlockKind::Method => {
                let name = self.id_attr().unwrap_or("");
                Some(format!("{}#{}", self.script_path, name))
            }
            _ => None,
        }
    }

    /// `DeclaredInput` = any `Input` node except `Option` (spec.md §3
    /// glossary).
    #[must_use]
    pub fn is_declared_input(&self) -> bool {
        matches!(&self.kind, NodeKind::Input(p) if !matches!(p, InputPayload::Option { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_monotonic() {
        let a = next_node_id();
        let b = next_node_id();
        assert!(b.0 > a.0);
    }
}
