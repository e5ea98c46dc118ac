//! Hierarchical scopes, value provenance, and the CWD stack (spec.md §4.4).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ArchetypeError, Location};
use crate::value::Value;

/// Provenance of a stored value. Ordering matches precedence: `Preset`/
/// `External` beat `User`, which beats `Default`, which beats `LocalVar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    LocalVar,
    Default,
    User,
    Preset,
    External,
}

impl ValueKind {
    fn precedence(self) -> u8 {
        match self {
            ValueKind::LocalVar => 0,
            ValueKind::Default => 1,
            ValueKind::User => 2,
            ValueKind::Preset | ValueKind::External => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug)]
struct ScopeNode {
    parent: Option<ScopeId>,
    children: HashMap<String, ScopeId>,
    value: Option<(Value, ValueKind)>,
    segment: String,
}

pub struct Context {
    scopes: Vec<ScopeNode>,
    root: ScopeId,
    current: ScopeId,
    cwd_stack: Vec<PathBuf>,
}

static VAR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([~\w.-]+)\}").unwrap());

impl Context {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let root = ScopeNode { parent: None, children: HashMap::new(), value: None, segment: String::new() };
        Self { scopes: vec![root], root: ScopeId(0), current: ScopeId(0), cwd_stack: vec![base_dir.into()] }
    }

    #[must_use]
    pub fn current_scope(&self) -> ScopeId {
        self.current
    }

    #[must_use]
    pub fn root_scope(&self) -> ScopeId {
        self.root
    }

    pub fn set_current_scope(&mut self, scope: ScopeId) {
        self.current = scope;
    }

    fn parent_of(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope.0].parent
    }

    /// Interprets `id` as a dot-separated chain of scope segments, creating
    /// any missing ones. `global` attaches the chain at the tree root
    /// regardless of the caller's current scope (spec.md §4.4).
    pub fn get_or_create(&mut self, id: &str, global: bool) -> ScopeId {
        let mut scope = if global { self.root } else { self.current };
        for seg in id.split('.').filter(|s| !s.is_empty()) {
            scope = self.child_or_create(scope, seg);
        }
        scope
    }

    fn child_or_create(&mut self, scope: ScopeId, seg: &str) -> ScopeId {
        if let Some(existing) = self.scopes[scope.0].children.get(seg) {
            return *existing;
        }
        let node = ScopeNode {
            parent: Some(scope),
            children: HashMap::new(),
            value: None,
            segment: seg.to_string(),
        };
        self.scopes.push(node);
        let id = ScopeId(self.scopes.len() - 1);
        self.scopes[scope.0].children.insert(seg.to_string(), id);
        id
    }

    /// Dotted absolute id of `scope` from the tree root. `absolute = false`
    /// is documented in spec.md §4.4 as "relative to root-scope"; this
    /// implementation treats the context's single root as that root-scope,
    /// so the two forms coincide (see DESIGN.md).
    #[must_use]
    pub fn path(&self, scope: ScopeId, _absolute: bool) -> String {
        let mut segs = Vec::new();
        let mut cur = scope;
        while let Some(parent) = self.scopes[cur.0].parent {
            segs.push(self.scopes[cur.0].segment.clone());
            cur = parent;
        }
        segs.reverse();
        segs.join(".")
    }

    /// Stores `value` at the scope for dotted `path` (relative to the
    /// current scope) with provenance `kind`; a lower-precedence write is a
    /// no-op when a higher-precedence value already exists there.
    pub fn put_value(&mut self, path: &str, value: Value, kind: ValueKind) {
        let scope = self.get_or_create(path, false);
        self.put_value_at(scope, value, kind);
    }

    pub fn put_value_at(&mut self, scope: ScopeId, value: Value, kind: ValueKind) {
        let node = &mut self.scopes[scope.0];
        let should_write = match &node.value {
            Some((_, existing_kind)) => kind.precedence() >= existing_kind.precedence(),
            None => true,
        };
        if should_write {
            node.value = Some((value, kind));
        }
    }

    #[must_use]
    pub fn value_at(&self, scope: ScopeId) -> Option<&(Value, ValueKind)> {
        self.scopes[scope.0].value.as_ref()
    }

    /// Resolves `path` from the current scope upward; a leading `~` looks
    /// starting from the parent scope (spec.md §4.4, §9: the `~` prefix is
    /// fixed here to mean "parent scope", not "sibling").
    #[must_use]
    pub fn get_value(&self, path: &str) -> Option<Value> {
        let (start, rest) = match path.strip_prefix('~') {
            Some(rest) => (self.parent_of(self.current), rest),
            None => (Some(self.current), path),
        };
        let mut scope = start?;
        loop {
            if let Some(v) = self.lookup_descending(scope, rest) {
                return Some(v);
            }
            match self.scopes[scope.0].parent {
                Some(p) => scope = p,
                None => return None,
            }
        }
    }

    fn lookup_descending(&self, scope: ScopeId, rest: &str) -> Option<Value> {
        let mut cur = scope;
        for seg in rest.split('.').filter(|s| !s.is_empty()) {
            cur = *self.scopes[cur.0].children.get(seg)?;
        }
        self.scopes[cur.0].value.as_ref().map(|(v, _)| v.clone())
    }

    /// Replaces every `${name}` occurrence in `raw` using [`get_value`],
    /// failing with `UnresolvedVariable` on the first miss.
    pub fn interpolate(&self, raw: &str) -> Result<String, ArchetypeError> {
        let mut err = None;
        let out = VAR_PATTERN.replace_all(raw, |caps: &regex::Captures| {
            let name = &caps[1];
            match self.get_value(name) {
                Some(v) => v.to_string(),
                None => {
                    if err.is_none() {
                        err = Some(name.to_string());
                    }
                    String::new()
                }
            }
        });
        match err {
            Some(name) => Err(ArchetypeError::UnresolvedVariable(Location::unknown(), name)),
            None => Ok(out.into_owned()),
        }
    }

    pub fn push_cwd(&mut self, dir: impl Into<PathBuf>) {
        self.cwd_stack.push(dir.into());
    }

    pub fn pop_cwd(&mut self) {
        self.cwd_stack.pop();
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        self.cwd_stack.last().expect("cwd stack is never empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_cannot_be_overwritten_by_default() {
        let mut ctx = Context::new(".");
        ctx.put_value("opt", Value::Bool(true), ValueKind::Preset);
        ctx.put_value("opt", Value::Bool(false), ValueKind::Default);
        assert_eq!(ctx.get_value("opt"), Some(Value::Bool(true)));
    }

    #[test]
    fn global_input_visible_from_sibling_step() {
        let mut ctx = Context::new(".");
        let step_a = ctx.get_or_create("stepA", false);
        ctx.set_current_scope(step_a);
        let name_scope = ctx.get_or_create("name", true);
        ctx.put_value_at(name_scope, Value::String("demo".into()), ValueKind::User);

        let step_b = ctx.get_or_create("stepB", false);
        ctx.set_current_scope(step_b);
        assert_eq!(ctx.get_value("name"), Some(Value::String("demo".into())));
    }

    #[test]
    fn tilde_looks_in_parent_scope() {
        let mut ctx = Context::new(".");
        let parent = ctx.get_or_create("parent", false);
        ctx.put_value_at(parent, Value::String("p".into()), ValueKind::User);
        let aunt = ctx.get_or_create("parent.aunt", false);
        ctx.put_value_at(aunt, Value::String("a".into()), ValueKind::User);
        let child = ctx.get_or_create("parent.child", false);
        ctx.set_current_scope(child);

        // "~aunt" resolves from the parent scope, finding child's sibling "aunt".
        assert_eq!(ctx.get_value("~aunt"), Some(Value::String("a".into())));
        // a name absent anywhere in the tree is still a miss.
        assert_eq!(ctx.get_value("~nonexistent"), None);
    }

    #[test]
    fn interpolate_substitutes_and_errors_on_miss() {
        let mut ctx = Context::new(".");
        ctx.put_value("name", Value::String("demo".into()), ValueKind::User);
        assert_eq!(ctx.interpolate("hello ${name}").unwrap(), "hello demo");
        assert!(ctx.interpolate("hello ${missing}").is_err());
    }

    #[test]
    fn cwd_stack_push_pop() {
        let mut ctx = Context::new("/base");
        ctx.push_cwd("/base/sub");
        assert_eq!(ctx.cwd(), Path::new("/base/sub"));
        ctx.pop_cwd();
        assert_eq!(ctx.cwd(), Path::new("/base"));
    }
}
