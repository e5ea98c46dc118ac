//! Answer-combination enumerator (spec.md §4.8).
//!
//! Two passes over the same AST as the controller: first an unconditional
//! sweep collects every `DeclaredInput`'s absolute path and candidate value
//! set (ignoring `Condition` truth — an input gated behind a condition that
//! never holds for a given combination simply fails validation in the
//! second pass and that combination is dropped); then the Cartesian
//! product of those sets is replayed through an ordinary [`Controller`]
//! run, one combination at a time, via a resolver that reads from it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{InputPayload, Node, NodeKind};
use crate::context::Context;
use crate::controller::{Controller, InputResolver};
use crate::error::ArchetypeError;
use crate::loader::Loader;
use crate::value::Value;
use crate::walker::{self, LoaderResolver};

/// Caps combination exploration (spec.md §4.8's "configurable maximum,
/// default 200").
pub const DEFAULT_MAX_PERMUTATIONS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Permutation {
    pub values: Vec<(String, String)>,
}

impl Permutation {
    fn sort_key(&self) -> String {
        self.values.first().map(|(_, v)| v.clone()).unwrap_or_default()
    }
}

pub(crate) struct CandidateInput {
    pub(crate) id: String,
    pub(crate) global: bool,
    pub(crate) candidates: Vec<Value>,
}

/// First pass: walks `roots` unconditionally (every `Condition`'s `then`
/// is always descended) collecting one [`CandidateInput`] per
/// `DeclaredInput` in document order.
pub(crate) fn collect_candidates(nodes: &[Arc<Node>], out: &mut Vec<CandidateInput>) {
    for node in nodes {
        collect_one(node, out);
    }
}

fn collect_one(node: &Arc<Node>, out: &mut Vec<CandidateInput>) {
    match &node.kind {
        NodeKind::Block { children, .. } => collect_candidates(children, out),
        NodeKind::Condition { then, .. } => collect_candidates(then, out),
        NodeKind::Input(payload) if node.is_declared_input() => {
            out.push(CandidateInput {
                id: node.id_attr().unwrap_or_default().to_string(),
                global: payload.is_global(),
                candidates: candidate_values(payload),
            });
            collect_candidates(node.children(), out);
        }
        _ => {}
    }
}

pub(crate) fn candidate_values(payload: &InputPayload) -> Vec<Value> {
    match payload {
        InputPayload::Boolean { .. } => vec![Value::Bool(false), Value::Bool(true)],
        InputPayload::Text { default, .. } => vec![Value::String(default.clone().unwrap_or_else(|| "xxx".to_string()))],
        InputPayload::Enum { options, .. } => option_values(options).into_iter().map(Value::String).collect(),
        InputPayload::List { default, options, .. } => {
            let mut out = vec![Value::StringList(Vec::new())];
            if !default.is_empty() {
                out.push(Value::StringList(default.clone()));
            }
            for v in option_values(options) {
                out.push(Value::StringList(vec![v]));
            }
            let full: Vec<String> = option_values(options);
            if !full.is_empty() {
                out.push(Value::StringList(full));
            }
            out
        }
        InputPayload::Option { value, .. } => vec![Value::String(value.clone())],
    }
}

fn option_values(options: &[Arc<Node>]) -> Vec<String> {
    options
        .iter()
        .filter_map(|opt| match &opt.kind {
            NodeKind::Input(InputPayload::Option { value, .. }) => Some(value.clone()),
            _ => None,
        })
        .collect()
}

/// Reads answers from a precomputed `path -> Value` combination; any input
/// not present in the combination (shouldn't happen given `collect_candidates`
/// enumerates every declared input) falls back to its default.
struct CombinationResolver<'a> {
    combination: &'a HashMap<String, Value>,
}

impl InputResolver for CombinationResolver<'_> {
    fn prompt(&mut self, node: &Node, _scope_path: &str) -> Result<Value, ArchetypeError> {
        let id = node.id_attr().unwrap_or_default();
        match self.combination.get(id) {
            Some(v) => Ok(v.clone()),
            None => match &node.kind {
                NodeKind::Input(payload) => Ok(payload.default_value()),
                _ => Ok(Value::Null),
            },
        }
    }
}

/// Enumerates every reachable answer combination for `roots`, capped at
/// `max` and deduplicated by observed user-kind values (spec.md §4.8).
pub fn permute(roots: &[Arc<Node>], max: usize) -> Vec<Permutation> {
    let mut candidates = Vec::new();
    collect_candidates(roots, &mut candidates);

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let loader = Arc::new(Loader::new());

    for combo in cartesian(&candidates) {
        if out.len() >= max {
            break;
        }
        let mut resolver_map = HashMap::new();
        for (input, value) in candidates.iter().zip(&combo) {
            resolver_map.insert(input.id.clone(), value.clone());
        }

        let mut ctx = Context::new(".");
        let mut controller = Controller::new(CombinationResolver { combination: &resolver_map });
        let mut script_resolver = LoaderResolver::new(loader.clone());
        match walker::walk(roots, &mut controller, &mut ctx, &mut script_resolver) {
            Ok(()) => {}
            Err(e) if e.is_invalid_option() => continue,
            Err(_) => continue,
        }

        let mut values: Vec<(String, String)> = candidates
            .iter()
            .filter_map(|input| {
                let path = if input.global { input.id.clone() } else { input.id.clone() };
                ctx.get_value(&path).map(|v| (input.id.clone(), v.to_string()))
            })
            .collect();
        values.sort();
        let perm = Permutation { values };
        let key = format!("{perm:?}");
        if seen.insert(key) {
            out.push(perm);
        }
    }

    out.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    out
}

/// Cartesian product over each input's candidate list, in input-declaration
/// order.
fn cartesian(inputs: &[CandidateInput]) -> Vec<Vec<Value>> {
    let mut acc: Vec<Vec<Value>> = vec![Vec::new()];
    for input in inputs {
        let mut next = Vec::with_capacity(acc.len() * input.candidates.len().max(1));
        for prefix in &acc {
            if input.candidates.is_empty() {
                next.push(prefix.clone());
                continue;
            }
            for v in &input.candidates {
                let mut combo = prefix.clone();
                combo.push(v.clone());
                next.push(combo);
            }
        }
        acc = next;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_only_script_yields_two_permutations() {
        let script = crate::loader::parse_script(
            "s.xml",
            r#"<archetype-script><step><inputs><boolean id="frosting" default="false"/></inputs></step></archetype-script>"#,
        )
        .unwrap();
        let perms = permute(script.root.children(), DEFAULT_MAX_PERMUTATIONS);
        assert_eq!(perms.len(), 2);
    }

    #[test]
    fn permutation_count_respects_cap() {
        let script = crate::loader::parse_script(
            "s.xml",
            r#"<archetype-script><step><inputs>
                <boolean id="a" default="false"/>
                <boolean id="b" default="false"/>
                <boolean id="c" default="false"/>
                <boolean id="d" default="false"/>
                <boolean id="e" default="false"/>
                <boolean id="f" default="false"/>
                <boolean id="g" default="false"/>
                <boolean id="h" default="false"/>
            </inputs></step></archetype-script>"#,
        )
        .unwrap();
        let perms = permute(script.root.children(), 50);
        assert_eq!(perms.len(), 50);
    }

    #[test]
    fn enum_permutes_over_every_option() {
        let script = crate::loader::parse_script(
            "s.xml",
            r#"<archetype-script><step><inputs><enum id="fruit" default="a"><option value="a"/><option value="b"/><option value="c"/></enum></inputs></step></archetype-script>"#,
        )
        .unwrap();
        let perms = permute(script.root.children(), DEFAULT_MAX_PERMUTATIONS);
        assert_eq!(perms.len(), 3);
    }
}
