//! Execution visitor (spec.md §4.6).

use std::sync::Arc;

use crate::ast::{InputPayload, Node, NodeKind};
use crate::context::{Context, ValueKind};
use crate::error::ArchetypeError;
use crate::expr;
use crate::value::Value;
use crate::walker::{VisitResult, Visitor};

/// Scope key an `Option` node's value is visible under while its subtree is
/// active (spec.md §4.6 step 5).
const OPTION_VALUE_KEY: &str = "option-value";

/// Supplies an answer for a `DeclaredInput` when no preset/external value is
/// already in scope (spec.md §6: `InputResolver`).
pub trait InputResolver {
    fn prompt(&mut self, node: &Node, scope_path: &str) -> Result<Value, ArchetypeError>;
}

/// Always answers with the input's declared default — used to exercise
/// "every script with all-default inputs succeeds" (spec.md §8).
pub struct DefaultInputResolver;

impl InputResolver for DefaultInputResolver {
    fn prompt(&mut self, node: &Node, _scope_path: &str) -> Result<Value, ArchetypeError> {
        match &node.kind {
            NodeKind::Input(payload) => Ok(payload.default_value()),
            _ => Err(ArchetypeError::UnresolvedInput(node.loc.clone(), "not an input node".into())),
        }
    }
}

pub struct Controller<R: InputResolver> {
    resolver: R,
    scope_stack: Vec<crate::context::ScopeId>,
}

impl<R: InputResolver> Controller<R> {
    #[must_use]
    pub fn new(resolver: R) -> Self {
        Self { resolver, scope_stack: Vec::new() }
    }

    fn ctx_resolver<'a>(ctx: &'a Context) -> impl Fn(&str, bool) -> Option<Value> + 'a {
        move |name, parent_scope| {
            let path = if parent_scope { format!("~{name}") } else { name.to_string() };
            ctx.get_value(&path)
        }
    }

    fn eval_condition(&self, expr_src: &str, ctx: &Context) -> Result<bool, ArchetypeError> {
        let rpn = expr::parse(expr_src)?;
        let resolver = Self::ctx_resolver(ctx);
        expr::evaluate(&rpn, &resolver)?.as_bool()
    }

    fn interpolate_value(ctx: &Context, value: Value) -> Result<Value, ArchetypeError> {
        match value {
            Value::String(s) => Ok(Value::String(ctx.interpolate(&s)?)),
            Value::StringList(xs) => {
                let mut out = Vec::with_capacity(xs.len());
                for x in xs {
                    out.push(ctx.interpolate(&x)?);
                }
                Ok(Value::StringList(out))
            }
            other => Ok(other),
        }
    }

    /// Options whose `if` condition (if any) currently evaluates truthy.
    fn live_options(&self, options: &[Arc<Node>], ctx: &Context) -> Result<Vec<String>, ArchetypeError> {
        let mut out = Vec::new();
        for opt in options {
            if let NodeKind::Input(InputPayload::Option { value, condition }) = &opt.kind {
                let keep = match condition {
                    Some(expr_src) => self.eval_condition(expr_src, ctx)?,
                    None => true,
                };
                if keep {
                    out.push(value.clone());
                }
            }
        }
        Ok(out)
    }

    fn handle_declared_input(
        &mut self,
        node: &Arc<Node>,
        payload: &InputPayload,
        ctx: &mut Context,
    ) -> Result<VisitResult, ArchetypeError> {
        let id = node.id_attr().unwrap_or_default();
        let scope = ctx.get_or_create(id, payload.is_global());

        let already_resolved = matches!(ctx.value_at(scope), Some((_, ValueKind::Preset | ValueKind::External)));
        if !already_resolved {
            let scope_path = ctx.path(scope, true);
            let raw = self.resolver.prompt(node, &scope_path)?;
            let interpolated = Self::interpolate_value(ctx, raw)?;
            self.validate_options(node, payload, &interpolated, ctx)?;
            ctx.put_value_at(scope, interpolated, ValueKind::User);
        }

        self.scope_stack.push(ctx.current_scope());
        ctx.set_current_scope(scope);
        Ok(VisitResult::Continue)
    }

    fn validate_options(
        &self,
        node: &Node,
        payload: &InputPayload,
        value: &Value,
        ctx: &Context,
    ) -> Result<(), ArchetypeError> {
        match payload {
            InputPayload::Enum { options, .. } => {
                let allowed = self.live_options(options, ctx)?;
                let chosen = value.as_string()?;
                if !allowed.contains(&chosen) {
                    return Err(ArchetypeError::InvalidOption {
                        loc: node.loc.clone(),
                        path: node.id_attr().unwrap_or_default().to_string(),
                        value: chosen,
                    });
                }
            }
            InputPayload::List { options, .. } => {
                let allowed = self.live_options(options, ctx)?;
                for chosen in value.as_list()? {
                    if !allowed.contains(&chosen) {
                        return Err(ArchetypeError::InvalidOption {
                            loc: node.loc.clone(),
                            path: node.id_attr().unwrap_or_default().to_string(),
                            value: chosen,
                        });
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl<R: InputResolver> Visitor for Controller<R> {
    fn pre_visit(&mut self, node: &Arc<Node>, ctx: &mut Context) -> Result<VisitResult, ArchetypeError> {
        match &node.kind {
            NodeKind::Condition { expression, .. } => {
                if self.eval_condition(expression, ctx)? {
                    Ok(VisitResult::Continue)
                } else {
                    Ok(VisitResult::SkipSubtree)
                }
            }
            NodeKind::Variable { path, raw_value, .. } => {
                let value = Value::String(ctx.interpolate(raw_value)?);
                ctx.put_value(path, value, ValueKind::LocalVar);
                Ok(VisitResult::Continue)
            }
            NodeKind::Preset { path, value } => {
                ctx.put_value(path, value.clone(), ValueKind::Preset);
                Ok(VisitResult::Continue)
            }
            NodeKind::Input(InputPayload::Option { value, .. }) => {
                ctx.put_value(OPTION_VALUE_KEY, Value::String(value.clone()), ValueKind::LocalVar);
                Ok(VisitResult::Continue)
            }
            NodeKind::Input(payload) => self.handle_declared_input(node, payload, ctx),
            _ => Ok(VisitResult::Continue),
        }
    }

    fn post_visit(&mut self, node: &Arc<Node>, ctx: &mut Context) -> Result<(), ArchetypeError> {
        if node.is_declared_input() {
            if let Some(prev) = self.scope_stack.pop() {
                ctx.set_current_scope(prev);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::{self, LoaderResolver};

    fn run(script_xml: &str) -> Context {
        let loaded = crate::loader::parse_script("s.xml", script_xml).unwrap();
        let loader = Arc::new(crate::loader::Loader::new());
        let mut ctx = Context::new(".");
        let mut controller = Controller::new(DefaultInputResolver);
        let mut resolver = LoaderResolver::new(loader);
        walker::walk(loaded.root.children(), &mut controller, &mut ctx, &mut resolver).unwrap();
        ctx
    }

    #[test]
    fn preset_suppresses_prompting() {
        let xml = r#"
            <archetype-script>
                <presets><boolean path="opt">true</boolean></presets>
                <step><inputs><boolean id="opt" default="false"/></inputs></step>
            </archetype-script>
        "#;
        let ctx = run(xml);
        assert_eq!(ctx.get_value("opt"), Some(Value::Bool(true)));
    }

    #[test]
    fn default_resolver_fills_declared_default() {
        let xml = r#"
            <archetype-script>
                <step><inputs><text id="name" default="demo"/></inputs></step>
            </archetype-script>
        "#;
        let ctx = run(xml);
        assert_eq!(ctx.get_value("name"), Some(Value::String("demo".into())));
    }

    #[test]
    fn condition_false_skips_subtree() {
        let xml = r#"
            <archetype-script>
                <presets><boolean path="gate">false</boolean></presets>
                <step if="${gate}"><inputs><text id="hidden" default="x"/></inputs></step>
            </archetype-script>
        "#;
        let ctx = run(xml);
        assert_eq!(ctx.get_value("hidden"), None);
    }

    #[test]
    fn enum_rejects_value_outside_filtered_options() {
        struct Fixed;
        impl InputResolver for Fixed {
            fn prompt(&mut self, node: &Node, _scope_path: &str) -> Result<Value, ArchetypeError> {
                let _ = node;
                Ok(Value::String("not-an-option".into()))
            }
        }
        let loaded = crate::loader::parse_script(
            "s.xml",
            r#"<archetype-script><step><inputs><enum id="fruit" default="a"><option value="a"/><option value="b"/></enum></inputs></step></archetype-script>"#,
        )
        .unwrap();
        let loader = Arc::new(crate::loader::Loader::new());
        let mut ctx = Context::new(".");
        let mut controller = Controller::new(Fixed);
        let mut resolver = LoaderResolver::new(loader);
        let err = walker::walk(loaded.root.children(), &mut controller, &mut ctx, &mut resolver).unwrap_err();
        assert!(err.is_invalid_option());
    }

    #[test]
    fn option_contributes_option_value_to_its_enum_scope() {
        let xml = r#"
            <archetype-script>
                <step><inputs><enum id="fruit" default="a"><option value="a"/><option value="b"/></enum></inputs></step>
            </archetype-script>
        "#;
        let ctx = run(xml);
        // each option is visited in turn, so the last one visited is what's
        // left once the enum's own subtree finishes.
        assert_eq!(ctx.get_value("fruit.option-value"), Some(Value::String("b".into())));
    }
}
