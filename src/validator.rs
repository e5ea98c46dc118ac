//! Static semantic checks (spec.md §4.7).
//!
//! Unlike the controller, the validator never expands `CALL`/`SOURCE`/`EXEC`
//! — each script is checked in isolation; invocation targets are validated
//! independently when they themselves are loaded. Conditions are always
//! descended regardless of their evaluated truth, since the checks here are
//! structural (every declared input must still be found inside a step, even
//! one nested under a condition that never fires for a given run).

use std::collections::HashMap;
use std::fmt;
use std::ops::Add;
use std::sync::Arc;

use crate::ast::{BlockKind, InputPayload, Node, NodeKind};
use crate::context::{Context, ValueKind};
use crate::error::Location;
use crate::expr;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    StepNoInput,
    StepDeclaredOptional,
    StepNotDeclaredOptional,
    ExprUnresolvedVariable,
    ExprEvalError,
    InputAlreadyDeclared,
    InputTypeMismatch,
    InputOptionalNoDefault,
    InputNotInStep,
    OptionValueAlreadyDeclared,
    EnumNoOptions,
    PresetUnresolved,
    PresetTypeMismatch,
}

impl DiagnosticCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticCode::StepNoInput => "STEP_NO_INPUT",
            DiagnosticCode::StepDeclaredOptional => "STEP_DECLARED_OPTIONAL",
            DiagnosticCode::StepNotDeclaredOptional => "STEP_NOT_DECLARED_OPTIONAL",
            DiagnosticCode::ExprUnresolvedVariable => "EXPR_UNRESOLVED_VARIABLE",
            DiagnosticCode::ExprEvalError => "EXPR_EVAL_ERROR",
            DiagnosticCode::InputAlreadyDeclared => "INPUT_ALREADY_DECLARED",
            DiagnosticCode::InputTypeMismatch => "INPUT_TYPE_MISMATCH",
            DiagnosticCode::InputOptionalNoDefault => "INPUT_OPTIONAL_NO_DEFAULT",
            DiagnosticCode::InputNotInStep => "INPUT_NOT_IN_STEP",
            DiagnosticCode::OptionValueAlreadyDeclared => "OPTION_VALUE_ALREADY_DECLARED",
            DiagnosticCode::EnumNoOptions => "ENUM_NO_OPTIONS",
            DiagnosticCode::PresetUnresolved => "PRESET_UNRESOLVED",
            DiagnosticCode::PresetTypeMismatch => "PRESET_TYPE_MISMATCH",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub loc: Location,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.loc, self.code.as_str(), self.message)
    }
}

/// Validates a script's top-level children, returning every diagnostic
/// found. An empty result does not guarantee a successful run (presets can
/// still be unresolved only at runtime scope depths this pass doesn't
/// model precisely) but matches spec.md §8's round-trip property in the
/// common case.
#[must_use]
pub fn validate(roots: &[Arc<Node>]) -> Vec<Diagnostic> {
    let mut v = Validator::default();
    v.collect(roots, &[], false);

    let mut ctx = Context::new(".");
    for (path, value, _) in &v.presets {
        ctx.put_value(path, value.clone(), ValueKind::Preset);
    }
    v.check_presets();
    v.seed_defaults_and_check_conditions(roots, &mut ctx);
    v.diagnostics
}

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    input_count: usize,
    optional_count: usize,
    non_optional_count: usize,
}

impl Add for Stats {
    type Output = Stats;
    fn add(self, rhs: Stats) -> Stats {
        Stats {
            input_count: self.input_count + rhs.input_count,
            optional_count: self.optional_count + rhs.optional_count,
            non_optional_count: self.non_optional_count + rhs.non_optional_count,
        }
    }
}

struct SeenInput {
    kind_name: &'static str,
    loc: Location,
}

#[derive(Default)]
struct Validator {
    diagnostics: Vec<Diagnostic>,
    seen_paths: HashMap<String, SeenInput>,
    declared_names: std::collections::HashSet<String>,
    presets: Vec<(String, Value, Location)>,
}

impl Validator {
    fn diag(&mut self, code: DiagnosticCode, loc: Location, message: String) {
        self.diagnostics.push(Diagnostic { code, loc, message });
    }

    fn collect(&mut self, nodes: &[Arc<Node>], scope: &[String], in_step: bool) -> Stats {
        let mut stats = Stats::default();
        for node in nodes {
            stats = stats + self.collect_one(node, scope, in_step);
        }
        stats
    }

    fn collect_one(&mut self, node: &Arc<Node>, scope: &[String], in_step: bool) -> Stats {
        match &node.kind {
            NodeKind::Block { kind, children } => {
                if *kind == BlockKind::Step {
                    let child_stats = self.collect(children, scope, true);
                    self.check_step(node, child_stats);
                    child_stats
                } else {
                    self.collect(children, scope, in_step)
                }
            }
            NodeKind::Condition { then, .. } => self.collect(then, scope, in_step),
            NodeKind::Input(payload) => self.collect_input(node, payload, scope, in_step),
            NodeKind::Preset { path, value } => {
                self.presets.push((path.clone(), value.clone(), node.loc.clone()));
                Stats::default()
            }
            NodeKind::Variable { path, .. } => {
                self.declared_names.insert(path.clone());
                Stats::default()
            }
            NodeKind::Invocation { .. } | NodeKind::Validation { .. } => Stats::default(),
        }
    }

    fn collect_input(&mut self, node: &Arc<Node>, payload: &InputPayload, scope: &[String], in_step: bool) -> Stats {
        if matches!(payload, InputPayload::Option { .. }) {
            return Stats::default();
        }
        let id = node.id_attr().unwrap_or_default();
        let scope_path = if payload.is_global() {
            id.to_string()
        } else {
            let mut segs = scope.to_vec();
            segs.push(id.to_string());
            segs.join(".")
        };
        self.declared_names.insert(scope_path.clone());
        self.declared_names.insert(id.to_string());

        if !in_step {
            self.diag(
                DiagnosticCode::InputNotInStep,
                node.loc.clone(),
                format!("input '{scope_path}' is declared outside any step"),
            );
        }
        if payload.is_optional() && !payload.has_default() {
            self.diag(
                DiagnosticCode::InputOptionalNoDefault,
                node.loc.clone(),
                format!("optional input '{scope_path}' has no default"),
            );
        }
        self.check_duplicate_options(node, payload);

        match self.seen_paths.get(&scope_path) {
            Some(existing) if existing.kind_name != payload.kind_name() => {
                self.diag(
                    DiagnosticCode::InputTypeMismatch,
                    node.loc.clone(),
                    format!(
                        "input '{scope_path}' redeclared as {} (first declared as {} at {})",
                        payload.kind_name(),
                        existing.kind_name,
                        existing.loc
                    ),
                );
            }
            Some(existing) => {
                self.diag(
                    DiagnosticCode::InputAlreadyDeclared,
                    node.loc.clone(),
                    format!("input '{scope_path}' already declared at {}", existing.loc),
                );
            }
            None => {
                self.seen_paths.insert(scope_path.clone(), SeenInput { kind_name: payload.kind_name(), loc: node.loc.clone() });
            }
        }

        let mut nested_scope = scope.to_vec();
        nested_scope.push(id.to_string());
        let nested = self.collect(node.children(), &nested_scope, in_step);
        Stats {
            input_count: 1,
            optional_count: usize::from(payload.is_optional()),
            non_optional_count: usize::from(!payload.is_optional()),
        } + nested
    }

    fn check_duplicate_options(&mut self, node: &Arc<Node>, payload: &InputPayload) {
        let options = payload.options();
        if matches!(payload, InputPayload::Enum { .. } | InputPayload::List { .. }) && options.is_empty() {
            self.diag(
                DiagnosticCode::EnumNoOptions,
                node.loc.clone(),
                format!("'{}' declares no options", node.id_attr().unwrap_or_default()),
            );
            return;
        }
        let mut seen = std::collections::HashSet::new();
        for opt in options {
            if let NodeKind::Input(InputPayload::Option { value, .. }) = &opt.kind {
                if !seen.insert(value.clone()) {
                    self.diag(
                        DiagnosticCode::OptionValueAlreadyDeclared,
                        opt.loc.clone(),
                        format!("option value '{value}' declared more than once in '{}'", node.id_attr().unwrap_or_default()),
                    );
                }
            }
        }
    }

    fn check_step(&mut self, node: &Arc<Node>, stats: Stats) {
        if stats.input_count == 0 {
            self.diag(DiagnosticCode::StepNoInput, node.loc.clone(), "step has no declared inputs".into());
            return;
        }
        let declared_optional = node.attr_bool("optional");
        if declared_optional && stats.non_optional_count > 0 {
            self.diag(
                DiagnosticCode::StepDeclaredOptional,
                node.loc.clone(),
                "step is declared optional but contains a non-optional input".into(),
            );
        } else if !declared_optional && stats.non_optional_count == 0 {
            self.diag(
                DiagnosticCode::StepNotDeclaredOptional,
                node.loc.clone(),
                "step contains only optional inputs but is not declared optional".into(),
            );
        }
    }

    fn check_presets(&mut self) {
        for (path, value, loc) in self.presets.clone() {
            match self.seen_paths.get(&path) {
                None => {
                    self.diag(DiagnosticCode::PresetUnresolved, loc, format!("preset path '{path}' does not match any declared input"));
                }
                Some(existing) => {
                    let expected = match existing.kind_name {
                        "boolean" => value.as_bool().is_ok(),
                        "list" => matches!(value, Value::StringList(_)),
                        "text" | "enum" => matches!(value, Value::String(_)),
                        _ => true,
                    };
                    if !expected {
                        self.diag(
                            DiagnosticCode::PresetTypeMismatch,
                            loc,
                            format!("preset '{path}' has value {value:?} incompatible with declared kind {}", existing.kind_name),
                        );
                    }
                }
            }
        }
    }

    /// Second traversal: fills `ctx` with canonical placeholder values as
    /// each declared input is encountered (spec.md §4.7's "evaluated with
    /// canonical placeholder values") and evaluates every `Condition`
    /// expression purely for `EXPR_*` diagnostics, always descending
    /// regardless of the result.
    fn seed_defaults_and_check_conditions(&mut self, nodes: &[Arc<Node>], ctx: &mut Context) {
        for node in nodes {
            self.seed_one(node, ctx);
        }
    }

    fn seed_one(&mut self, node: &Arc<Node>, ctx: &mut Context) {
        match &node.kind {
            NodeKind::Block { children, .. } => self.seed_defaults_and_check_conditions(children, ctx),
            NodeKind::Condition { expression, then } => {
                self.check_condition(node, expression, ctx);
                self.seed_defaults_and_check_conditions(then, ctx);
            }
            NodeKind::Variable { path, raw_value, .. } => match ctx.interpolate(raw_value) {
                Ok(v) => ctx.put_value(path, Value::String(v), ValueKind::LocalVar),
                Err(e) if e.is_unresolved_variable() => {
                    self.diag(DiagnosticCode::ExprUnresolvedVariable, node.loc.clone(), e.to_string());
                }
                Err(_) => {}
            },
            NodeKind::Input(payload) if node.is_declared_input() => {
                let id = node.id_attr().unwrap_or_default();
                let scope = ctx.get_or_create(id, payload.is_global());
                if ctx.value_at(scope).is_none() {
                    ctx.put_value_at(scope, canonical_placeholder(payload), ValueKind::Default);
                }
                let prev = ctx.current_scope();
                ctx.set_current_scope(scope);
                self.seed_defaults_and_check_conditions(node.children(), ctx);
                ctx.set_current_scope(prev);
            }
            NodeKind::Input(_) => {}
            NodeKind::Invocation { .. } | NodeKind::Preset { .. } | NodeKind::Validation { .. } => {}
        }
    }

    fn check_condition(&mut self, node: &Arc<Node>, expression: &str, ctx: &Context) {
        let rpn = match expr::parse(expression) {
            Ok(rpn) => rpn,
            Err(e) => {
                self.diag(DiagnosticCode::ExprEvalError, node.loc.clone(), e.to_string());
                return;
            }
        };
        let declared = &self.declared_names;
        let resolver = move |name: &str, _parent: bool| -> Option<Value> {
            ctx.get_value(name).or_else(|| if declared.contains(name) { Some(Value::Null) } else { None })
        };
        match expr::evaluate(&rpn, &resolver) {
            Ok(_) => {}
            Err(e) if e.is_unresolved_variable() => {
                self.diag(DiagnosticCode::ExprUnresolvedVariable, node.loc.clone(), e.to_string());
            }
            Err(e) => {
                self.diag(DiagnosticCode::ExprEvalError, node.loc.clone(), e.to_string());
            }
        }
    }
}

fn canonical_placeholder(payload: &InputPayload) -> Value {
    match payload {
        InputPayload::Boolean { .. } => Value::Bool(false),
        InputPayload::Text { .. } => Value::String(String::new()),
        InputPayload::Enum { options, .. } => match first_option_value(options) {
            Some(v) => Value::String(v),
            None => Value::String(String::new()),
        },
        InputPayload::List { options, .. } => match first_option_value(options) {
            Some(v) => Value::StringList(vec![v]),
            None => Value::StringList(Vec::new()),
        },
        InputPayload::Option { value, .. } => Value::String(value.clone()),
    }
}

fn first_option_value(options: &[Arc<Node>]) -> Option<String> {
    options.iter().find_map(|opt| match &opt.kind {
        NodeKind::Input(InputPayload::Option { value, .. }) => Some(value.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(xml: &str) -> crate::loader::LoadedScript {
        crate::loader::parse_script("s.xml", xml).unwrap()
    }

    #[test]
    fn step_with_only_optional_inputs_flags_not_declared_optional() {
        let script = loaded(r#"<archetype-script><step><inputs><boolean id="opt" optional="true" default="false"/></inputs></step></archetype-script>"#);
        let diags = validate(script.root.children());
        assert!(diags.iter().any(|d| d.code == DiagnosticCode::StepNotDeclaredOptional));
    }

    #[test]
    fn step_without_inputs_is_flagged() {
        let script = loaded(r#"<archetype-script><step><output/></step></archetype-script>"#);
        let diags = validate(script.root.children());
        assert!(diags.iter().any(|d| d.code == DiagnosticCode::StepNoInput));
    }

    #[test]
    fn input_outside_step_is_flagged() {
        let script = loaded(r#"<archetype-script><inputs><boolean id="free" default="false"/></inputs></archetype-script>"#);
        let diags = validate(script.root.children());
        assert!(diags.iter().any(|d| d.code == DiagnosticCode::InputNotInStep));
    }

    #[test]
    fn duplicate_global_input_is_flagged() {
        let script = loaded(
            r#"<archetype-script>
                <step><inputs><text id="name" global="true" default="a"/></inputs></step>
                <step><inputs><text id="name" global="true" default="b"/></inputs></step>
            </archetype-script>"#,
        );
        let diags = validate(script.root.children());
        assert!(diags.iter().any(|d| d.code == DiagnosticCode::InputAlreadyDeclared));
    }

    #[test]
    fn preset_with_no_matching_input_is_unresolved() {
        let script = loaded(r#"<archetype-script><presets><boolean path="ghost">true</boolean></presets><step><inputs><boolean id="opt" default="false"/></inputs></step></archetype-script>"#);
        let diags = validate(script.root.children());
        assert!(diags.iter().any(|d| d.code == DiagnosticCode::PresetUnresolved));
    }

    #[test]
    fn enum_with_no_options_is_flagged() {
        let script = loaded(r#"<archetype-script><step><inputs><enum id="fruit" default="a"></enum></inputs></step></archetype-script>"#);
        let diags = validate(script.root.children());
        assert!(diags.iter().any(|d| d.code == DiagnosticCode::EnumNoOptions));
        assert!(diags.iter().all(|d| d.code != DiagnosticCode::OptionValueAlreadyDeclared));
    }

    #[test]
    fn duplicate_enum_option_values_are_flagged() {
        let script = loaded(
            r#"<archetype-script><step><inputs><enum id="fruit" default="a"><option value="a"/><option value="a"/></enum></inputs></step></archetype-script>"#,
        );
        let diags = validate(script.root.children());
        assert!(diags.iter().any(|d| d.code == DiagnosticCode::OptionValueAlreadyDeclared));
    }

    #[test]
    fn well_formed_script_has_no_diagnostics() {
        let script = loaded(
            r#"<archetype-script><step><inputs><boolean id="opt" default="false"/></inputs></step></archetype-script>"#,
        );
        let diags = validate(script.root.children());
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn condition_referencing_unknown_variable_is_flagged() {
        let script = loaded(
            r#"<archetype-script><step if="${nope}"><inputs><boolean id="opt" default="false"/></inputs></step></archetype-script>"#,
        );
        let diags = validate(script.root.children());
        assert!(diags.iter().any(|d| d.code == DiagnosticCode::ExprUnresolvedVariable));
    }
}
