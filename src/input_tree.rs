//! Pruning-oriented permutation representation (spec.md §4.9).
//!
//! Where [`crate::permutation`] enumerates the full Cartesian product up
//! front, `InputTree` holds one cycling index per `DeclaredInput` and
//! advances the deepest (last-declared) index first, carrying into
//! shallower ones as each wraps — an odometer over the same candidate sets.
//! `Preset` paths shadow their peers: a preset matching a `Boolean`/`Enum`
//! input locks that input's cycle to the preset's own value (it never
//! advances); a preset matching a `Text`/`List` input has no corresponding
//! cycle at all, since those kinds carry no enumerable candidate the preset
//! could select among, and is instead carried as a fixed answer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{Node, NodeKind};
use crate::permutation::{self, CandidateInput};
use crate::value::Value;

struct TreeNode {
    path: String,
    candidates: Vec<Value>,
    index: usize,
}

/// A rooted cycling structure over one script's declared inputs, plus the
/// fixed answers contributed by presets that matched a non-cyclable kind.
pub struct InputTree {
    nodes: Vec<TreeNode>,
    fixed: HashMap<String, String>,
    exhausted: bool,
}

impl InputTree {
    #[must_use]
    pub fn build(roots: &[Arc<Node>]) -> Self {
        let mut candidates = Vec::new();
        permutation::collect_candidates(roots, &mut candidates);
        let presets = collect_presets(roots);

        let mut governed = Vec::new();
        let mut free = Vec::new();
        let mut fixed = HashMap::new();

        for input in candidates {
            match presets.get(&input.id) {
                Some(preset_value) if locks(&input, preset_value) => {
                    governed.push(TreeNode { path: input.id, candidates: vec![preset_value.clone()], index: 0 });
                }
                Some(preset_value) => {
                    fixed.insert(input.id, preset_value.to_string());
                }
                None => free.push(TreeNode { path: input.id, candidates: input.candidates, index: 0 }),
            }
        }

        // Preset-governed inputs shadow their peers: they iterate first
        // (outermost), ahead of the freely-varying inputs.
        governed.extend(free);
        let exhausted = governed.iter().any(|n| n.candidates.is_empty());
        Self { nodes: governed, fixed, exhausted }
    }

    /// The current combination as `path -> value` strings, including any
    /// preset-fixed answers.
    #[must_use]
    pub fn current(&self) -> HashMap<String, String> {
        let mut out = self.fixed.clone();
        for node in &self.nodes {
            out.insert(node.path.clone(), node.candidates[node.index].to_string());
        }
        out
    }

    /// Advances to the next combination, carrying from the deepest
    /// (last-declared) node backward. Returns `false` once every
    /// combination has been produced.
    pub fn advance(&mut self) -> bool {
        if self.exhausted || self.nodes.is_empty() {
            self.exhausted = true;
            return false;
        }
        for node in self.nodes.iter_mut().rev() {
            node.index += 1;
            if node.index < node.candidates.len() {
                return true;
            }
            node.index = 0;
        }
        self.exhausted = true;
        false
    }
}

impl Iterator for InputTree {
    type Item = HashMap<String, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let out = self.current();
        if !self.advance() {
            self.exhausted = true;
        }
        Some(out)
    }
}

/// Whether `preset` can meaningfully select among `input`'s candidates
/// (spec.md §4.9: "a matching boolean/enum child is kept; other kinds are
/// removed").
fn locks(input: &CandidateInput, preset: &Value) -> bool {
    matches!(preset, Value::Bool(_)) || (matches!(preset, Value::String(_)) && input.candidates.iter().any(|c| c == preset))
}

fn collect_presets(nodes: &[Arc<Node>]) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    collect_presets_into(nodes, &mut out);
    out
}

fn collect_presets_into(nodes: &[Arc<Node>], out: &mut HashMap<String, Value>) {
    for node in nodes {
        match &node.kind {
            NodeKind::Block { children, .. } => collect_presets_into(children, out),
            NodeKind::Condition { then, .. } => collect_presets_into(then, out),
            NodeKind::Preset { path, value } => {
                out.insert(path.clone(), value.clone());
            }
            NodeKind::Input(_) if node.is_declared_input() => collect_presets_into(node.children(), out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_only_tree_yields_two_steps() {
        let script = crate::loader::parse_script(
            "s.xml",
            r#"<archetype-script><step><inputs><boolean id="frosting" default="false"/></inputs></step></archetype-script>"#,
        )
        .unwrap();
        let tree = InputTree::build(script.root.children());
        let steps: Vec<_> = tree.collect();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].get("frosting"), Some(&"false".to_string()));
        assert_eq!(steps[1].get("frosting"), Some(&"true".to_string()));
    }

    #[test]
    fn preset_boolean_locks_the_cycle_to_one_step() {
        let script = crate::loader::parse_script(
            "s.xml",
            r#"<archetype-script>
                <presets><boolean path="frosting">true</boolean></presets>
                <step><inputs><boolean id="frosting" default="false"/></inputs></step>
            </archetype-script>"#,
        )
        .unwrap();
        let tree = InputTree::build(script.root.children());
        let steps: Vec<_> = tree.collect();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].get("frosting"), Some(&"true".to_string()));
    }

    #[test]
    fn deepest_index_advances_first() {
        let script = crate::loader::parse_script(
            "s.xml",
            r#"<archetype-script><step><inputs>
                <boolean id="outer" default="false"/>
                <boolean id="inner" default="false"/>
            </inputs></step></archetype-script>"#,
        )
        .unwrap();
        let tree = InputTree::build(script.root.children());
        let steps: Vec<_> = tree.collect();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].get("inner"), Some(&"false".to_string()));
        assert_eq!(steps[1].get("inner"), Some(&"true".to_string()));
        assert_eq!(steps[0].get("outer"), Some(&"false".to_string()));
        assert_eq!(steps[2].get("outer"), Some(&"true".to_string()));
    }
}
