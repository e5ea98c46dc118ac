//! Construction-time attribute accumulation (spec.md §9: "Builder pattern").
//!
//! Used once by the script loader; afterwards every [`Node`](super::Node) is
//! immutable and shared by `Arc`. Builders own child builders and are
//! consumed by [`NodeBuilder::build`].

use std::collections::HashMap;
use std::sync::Arc;

use super::{next_node_id, BlockKind, InputPayload, InvocationKind, Node, NodeKind};
use crate::error::Location;
use crate::value::Value;

pub struct NodeBuilder {
    script_path: String,
    loc: Location,
    attributes: HashMap<String, Value>,
    kind: PendingKind,
}

enum PendingKind {
    Block { kind: BlockKind, children: Vec<NodeBuilder> },
    Condition { expression: String, then: Vec<NodeBuilder> },
    Invocation { kind: InvocationKind, target: String },
    Input(InputPayload),
    /// `Enum`/`List` inputs: `options` are built separately since
    /// `InputPayload::Enum`/`List` hold them as `Arc<Node>`.
    EnumInput { default: Option<String>, optional: bool, global: bool, options: Vec<NodeBuilder> },
    ListInput { default: Vec<String>, optional: bool, global: bool, options: Vec<NodeBuilder> },
    Preset { path: String, value: Value },
    Variable { path: String, raw_value: String, transient: bool },
    Validation { id: String, description: String, patterns: Vec<String> },
}

impl NodeBuilder {
    #[must_use]
    pub fn block(script_path: impl Into<String>, loc: Location, kind: BlockKind) -> Self {
        Self {
            script_path: script_path.into(),
            loc,
            attributes: HashMap::new(),
            kind: PendingKind::Block { kind, children: Vec::new() },
        }
    }

    #[must_use]
    pub fn condition(script_path: impl Into<String>, loc: Location, expression: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
            loc,
            attributes: HashMap::new(),
            kind: PendingKind::Condition { expression: expression.into(), then: Vec::new() },
        }
    }

    #[must_use]
    pub fn invocation(
        script_path: impl Into<String>,
        loc: Location,
        kind: InvocationKind,
        target: impl Into<String>,
    ) -> Self {
        Self {
            script_path: script_path.into(),
            loc,
            attributes: HashMap::new(),
            kind: PendingKind::Invocation { kind, target: target.into() },
        }
    }

    #[must_use]
    pub fn input(script_path: impl Into<String>, loc: Location, payload: InputPayload) -> Self {
        Self {
            script_path: script_path.into(),
            loc,
            attributes: HashMap::new(),
            kind: PendingKind::Input(payload),
        }
    }

    #[must_use]
    pub fn enum_input(
        script_path: impl Into<String>,
        loc: Location,
        default: Option<String>,
        optional: bool,
        global: bool,
    ) -> Self {
        Self {
            script_path: script_path.into(),
            loc,
            attributes: HashMap::new(),
            kind: PendingKind::EnumInput { default, optional, global, options: Vec::new() },
        }
    }

    #[must_use]
    pub fn list_input(
        script_path: impl Into<String>,
        loc: Location,
        default: Vec<String>,
        optional: bool,
        global: bool,
    ) -> Self {
        Self {
            script_path: script_path.into(),
            loc,
            attributes: HashMap::new(),
            kind: PendingKind::ListInput { default, optional, global, options: Vec::new() },
        }
    }

    #[must_use]
    pub fn option(
        script_path: impl Into<String>,
        loc: Location,
        value: impl Into<String>,
        condition: Option<String>,
    ) -> Self {
        Self {
            script_path: script_path.into(),
            loc,
            attributes: HashMap::new(),
            kind: PendingKind::Input(InputPayload::Option { value: value.into(), condition }),
        }
    }

    #[must_use]
    pub fn preset(script_path: impl Into<String>, loc: Location, path: impl Into<String>, value: Value) -> Self {
        Self {
            script_path: script_path.into(),
            loc,
            attributes: HashMap::new(),
            kind: PendingKind::Preset { path: path.into(), value },
        }
    }

    #[must_use]
    pub fn variable(
        script_path: impl Into<String>,
        loc: Location,
        path: impl Into<String>,
        raw_value: impl Into<String>,
        transient: bool,
    ) -> Self {
        Self {
            script_path: script_path.into(),
            loc,
            attributes: HashMap::new(),
            kind: PendingKind::Variable { path: path.into(), raw_value: raw_value.into(), transient },
        }
    }

    #[must_use]
    pub fn validation(
        script_path: impl Into<String>,
        loc: Location,
        id: impl Into<String>,
        description: impl Into<String>,
        patterns: Vec<String>,
    ) -> Self {
        Self {
            script_path: script_path.into(),
            loc,
            attributes: HashMap::new(),
            kind: PendingKind::Validation { id: id.into(), description: description.into(), patterns },
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Panics if called on a leaf builder (programmer error in the loader,
    /// never user input): `Block`/`Condition` attach ordinary children,
    /// `EnumInput`/`ListInput` attach `<option>` builders.
    pub fn push_child(&mut self, child: NodeBuilder) {
        match &mut self.kind {
            PendingKind::Block { children, .. } => children.push(child),
            PendingKind::Condition { then, .. } => then.push(child),
            PendingKind::EnumInput { options, .. } | PendingKind::ListInput { options, .. } => {
                options.push(child);
            }
            _ => panic!("cannot attach children to a leaf AST node"),
        }
    }

    #[must_use]
    pub fn build(self) -> Arc<Node> {
        let kind = match self.kind {
            PendingKind::Block { kind, children } => NodeKind::Block {
                kind,
                children: children.into_iter().map(NodeBuilder::build).collect(),
            },
            PendingKind::Condition { expression, then } => NodeKind::Condition {
                expression,
                then: then.into_iter().map(NodeBuilder::build).collect(),
            },
            PendingKind::Invocation { kind, target } => NodeKind::Invocation { kind, target },
            PendingKind::Input(payload) => NodeKind::Input(payload),
            PendingKind::EnumInput { default, optional, global, options } => NodeKind::Input(InputPayload::Enum {
                default,
                optional,
                global,
                options: options.into_iter().map(NodeBuilder::build).collect(),
            }),
            PendingKind::ListInput { default, optional, global, options } => NodeKind::Input(InputPayload::List {
                default,
                optional,
                global,
                options: options.into_iter().map(NodeBuilder::build).collect(),
            }),
            PendingKind::Preset { path, value } => NodeKind::Preset { path, value },
            PendingKind::Variable { path, raw_value, transient } => {
                NodeKind::Variable { path, raw_value, transient }
            }
            PendingKind::Validation { id, description, patterns } => {
                NodeKind::Validation { id, description, patterns }
            }
        };
        Arc::new(Node {
            id: next_node_id(),
            script_path: self.script_path,
            loc: self.loc,
            attributes: self.attributes,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assigns_attributes_and_children() {
        let mut step = NodeBuilder::block("s.xml", Location::unknown(), BlockKind::Step)
            .with_attribute("label", Value::String("Pick a fruit".into()));
        step.push_child(NodeBuilder::input(
            "s.xml",
            Location::unknown(),
            InputPayload::Boolean { default: Some(false), optional: false, global: false },
        ));
        let node = step.build();
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.attr_str("label"), Some("Pick a fruit"));
    }
}
