//! Generic depth-first traversal (spec.md §4.5).
//!
//! The walker is shared by the controller, the validator, and the
//! permutation engine: each supplies a [`Visitor`] and drives a different
//! [`Context`]/[`ScriptResolver`] pairing over the same immutable AST.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::ast::{BlockKind, InvocationKind, Node, NodeKind};
use crate::context::Context;
use crate::error::ArchetypeError;
use crate::loader::Loader;

/// The only control-flow mechanism a [`Visitor`] has (spec.md §9).
///
/// `SkipSubtree` and `SkipSiblings` both suppress the current node's
/// children and post-visit; `SkipSiblings` additionally tells the enclosing
/// sibling list to stop (the node's own ancestors are unaffected).
/// `Terminate` unwinds the whole walk without calling any further
/// post-visits, including the one for the node that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    Continue,
    SkipSubtree,
    SkipSiblings,
    Terminate,
}

pub trait Visitor {
    fn pre_visit(&mut self, node: &Arc<Node>, ctx: &mut Context) -> Result<VisitResult, ArchetypeError>;
    fn post_visit(&mut self, node: &Arc<Node>, ctx: &mut Context) -> Result<(), ArchetypeError>;
}

/// What an `Invocation` node resolves to: the spliced-in children, a stable
/// name for cycle detection, and (for `EXEC`/`SOURCE`) the directory that
/// becomes the new CWD for relative file operations.
pub struct ResolvedInvocation {
    pub nodes: Vec<Arc<Node>>,
    pub block_name: String,
    pub base_dir: Option<std::path::PathBuf>,
}

pub trait ScriptResolver {
    fn resolve(&mut self, node: &Node, kind: InvocationKind, target: &str) -> Result<ResolvedInvocation, ArchetypeError>;
}

/// The default [`ScriptResolver`]: `CALL` looks up a method in the
/// invoking node's own script; `SOURCE`/`EXEC` resolve `target` relative to
/// that script's directory and load it through the shared [`Loader`]
/// (spec.md §4.5, §6).
pub struct LoaderResolver {
    loader: Arc<Loader>,
}

impl LoaderResolver {
    #[must_use]
    pub fn new(loader: Arc<Loader>) -> Self {
        Self { loader }
    }
}

impl ScriptResolver for LoaderResolver {
    fn resolve(&mut self, node: &Node, kind: InvocationKind, target: &str) -> Result<ResolvedInvocation, ArchetypeError> {
        match kind {
            InvocationKind::Call => {
                let current = self.loader.load(Path::new(&node.script_path))?;
                let method = current.methods.get(target).ok_or_else(|| {
                    ArchetypeError::UnresolvedInput(node.loc.clone(), format!("method '{target}'"))
                })?;
                Ok(ResolvedInvocation {
                    nodes: method.children().to_vec(),
                    block_name: format!("{}#{target}", node.script_path),
                    base_dir: None,
                })
            }
            InvocationKind::Source | InvocationKind::Exec => {
                let base_dir = Path::new(&node.script_path).parent().unwrap_or_else(|| Path::new("."));
                let path = self.loader.resolve(base_dir, target);
                let script = self.loader.load(&path)?;
                Ok(ResolvedInvocation {
                    nodes: script.root.children().to_vec(),
                    block_name: path.to_string_lossy().into_owned(),
                    base_dir: path.parent().map(Path::to_path_buf),
                })
            }
        }
    }
}

/// Entry point: walks `roots` (typically a loaded script's top-level
/// children) with `visitor`.
pub fn walk<V: Visitor, R: ScriptResolver>(
    roots: &[Arc<Node>],
    visitor: &mut V,
    ctx: &mut Context,
    resolver: &mut R,
) -> Result<(), ArchetypeError> {
    let mut visiting = HashSet::new();
    walk_siblings(roots, visitor, ctx, resolver, &mut visiting)?;
    Ok(())
}

fn walk_siblings<V: Visitor, R: ScriptResolver>(
    nodes: &[Arc<Node>],
    visitor: &mut V,
    ctx: &mut Context,
    resolver: &mut R,
    visiting: &mut HashSet<(String, String)>,
) -> Result<VisitResult, ArchetypeError> {
    for node in nodes {
        match walk_one(node, visitor, ctx, resolver, visiting)? {
            VisitResult::Terminate => return Ok(VisitResult::Terminate),
            VisitResult::SkipSiblings => return Ok(VisitResult::Continue),
            VisitResult::Continue | VisitResult::SkipSubtree => {}
        }
    }
    Ok(VisitResult::Continue)
}

fn walk_one<V: Visitor, R: ScriptResolver>(
    node: &Arc<Node>,
    visitor: &mut V,
    ctx: &mut Context,
    resolver: &mut R,
    visiting: &mut HashSet<(String, String)>,
) -> Result<VisitResult, ArchetypeError> {
    match visitor.pre_visit(node, ctx)? {
        VisitResult::Terminate => return Ok(VisitResult::Terminate),
        VisitResult::SkipSubtree => return Ok(VisitResult::SkipSubtree),
        VisitResult::SkipSiblings => return Ok(VisitResult::SkipSiblings),
        VisitResult::Continue => {}
    }

    let pushed_dir = node.block_kind() == Some(BlockKind::InvokeDir);
    if pushed_dir {
        let new_dir = match node.attr_str("directory") {
            Some(dir) => ctx.cwd().join(dir),
            None => ctx.cwd().to_path_buf(),
        };
        ctx.push_cwd(new_dir);
    }

    let descend = match &node.kind {
        NodeKind::Invocation { kind, target } => walk_invocation(node, *kind, target, visitor, ctx, resolver, visiting),
        _ => walk_siblings(node.children(), visitor, ctx, resolver, visiting),
    };

    if pushed_dir {
        ctx.pop_cwd();
    }

    if matches!(descend?, VisitResult::Terminate) {
        return Ok(VisitResult::Terminate);
    }

    visitor.post_visit(node, ctx)?;
    Ok(VisitResult::Continue)
}

fn walk_invocation<V: Visitor, R: ScriptResolver>(
    node: &Arc<Node>,
    kind: InvocationKind,
    target: &str,
    visitor: &mut V,
    ctx: &mut Context,
    resolver: &mut R,
    visiting: &mut HashSet<(String, String)>,
) -> Result<VisitResult, ArchetypeError> {
    let resolved = resolver
        .resolve(node, kind, target)
        .map_err(|e| ArchetypeError::InvocationError(node.loc.clone(), Box::new(e)))?;

    let scope_key = ctx.path(ctx.current_scope(), true);
    let cycle_key = (resolved.block_name.clone(), scope_key);
    if !visiting.insert(cycle_key.clone()) {
        return Err(ArchetypeError::CycleDetected(node.loc.clone(), resolved.block_name));
    }

    let saved_scope = ctx.current_scope();
    if matches!(kind, InvocationKind::Exec) {
        ctx.set_current_scope(ctx.root_scope());
    }
    if let Some(dir) = &resolved.base_dir {
        ctx.push_cwd(dir.clone());
    }

    let result = walk_siblings(&resolved.nodes, visitor, ctx, resolver, visiting);

    if resolved.base_dir.is_some() {
        ctx.pop_cwd();
    }
    if matches!(kind, InvocationKind::Exec) {
        ctx.set_current_scope(saved_scope);
    }
    visiting.remove(&cycle_key);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::NodeBuilder;
    use crate::error::Location;

    struct CountingVisitor {
        pre: usize,
        post: usize,
    }

    impl Visitor for CountingVisitor {
        fn pre_visit(&mut self, _node: &Arc<Node>, _ctx: &mut Context) -> Result<VisitResult, ArchetypeError> {
            self.pre += 1;
            Ok(VisitResult::Continue)
        }
        fn post_visit(&mut self, _node: &Arc<Node>, _ctx: &mut Context) -> Result<(), ArchetypeError> {
            self.post += 1;
            Ok(())
        }
    }

    struct NoInvocations;
    impl ScriptResolver for NoInvocations {
        fn resolve(&mut self, node: &Node, _kind: InvocationKind, _target: &str) -> Result<ResolvedInvocation, ArchetypeError> {
            Err(ArchetypeError::UnresolvedInput(node.loc.clone(), "no invocations in this test".into()))
        }
    }

    #[test]
    fn visits_every_node_pre_and_post() {
        let mut step = NodeBuilder::block("s.xml", Location::unknown(), BlockKind::Step);
        step.push_child(NodeBuilder::block("s.xml", Location::unknown(), BlockKind::Inputs));
        let roots = vec![step.build()];

        let mut ctx = Context::new(".");
        let mut visitor = CountingVisitor { pre: 0, post: 0 };
        walk(&roots, &mut visitor, &mut ctx, &mut NoInvocations).unwrap();
        assert_eq!(visitor.pre, 2);
        assert_eq!(visitor.post, 2);
    }

    struct TerminateAt {
        at: usize,
        seen: usize,
    }
    impl Visitor for TerminateAt {
        fn pre_visit(&mut self, _node: &Arc<Node>, _ctx: &mut Context) -> Result<VisitResult, ArchetypeError> {
            self.seen += 1;
            if self.seen == self.at {
                Ok(VisitResult::Terminate)
            } else {
                Ok(VisitResult::Continue)
            }
        }
        fn post_visit(&mut self, _node: &Arc<Node>, _ctx: &mut Context) -> Result<(), ArchetypeError> {
            Ok(())
        }
    }

    #[test]
    fn terminate_aborts_remaining_siblings() {
        let a = NodeBuilder::block("s.xml", Location::unknown(), BlockKind::Step).build();
        let b = NodeBuilder::block("s.xml", Location::unknown(), BlockKind::Step).build();
        let roots = vec![a, b];
        let mut ctx = Context::new(".");
        let mut visitor = TerminateAt { at: 1, seen: 0 };
        walk(&roots, &mut visitor, &mut ctx, &mut NoInvocations).unwrap();
        assert_eq!(visitor.seen, 1);
    }
}
