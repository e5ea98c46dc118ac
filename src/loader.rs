//! XML script loader (spec.md §4.3, §6).
//!
//! Two passes: [`parse_xml`] turns the document into a namespace-blind
//! [`ParsedElement`] tree (quick-xml is a pull parser; we buffer one element
//! at a time so attribute/text/child order doesn't matter to the second
//! pass), then [`parse_script`] walks that tree applying the pseudo-child
//! collapsing rules and building [`Node`]s through [`NodeBuilder`].

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::ast::builder::NodeBuilder;
use crate::ast::{BlockKind, InputPayload, InvocationKind, Node};
use crate::error::{ArchetypeError, Location};
use crate::value::Value;

/// A loaded script: its executable tree plus the `<methods>` extracted out
/// of it and keyed by `id` (spec.md §4.3).
pub struct LoadedScript {
    pub root: Arc<Node>,
    pub methods: HashMap<String, Arc<Node>>,
}

/// Owns the process-wide script cache (spec.md §9: "Encapsulate them behind
/// a `Loader` object"). Each `Loader` is independently cacheable, so tests
/// can construct their own instead of sharing global state.
pub struct Loader {
    cache: Mutex<HashMap<String, Arc<LoadedScript>>>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    #[must_use]
    pub fn new() -> Self {
        Self { cache: Mutex::new(HashMap::new()) }
    }

    /// Joins `rel_or_abs` onto `base_dir` (unless it's already absolute) and
    /// lexically normalizes the result — the identity used for the script
    /// cache key (spec.md §4.3).
    #[must_use]
    pub fn resolve(&self, base_dir: &Path, rel_or_abs: &str) -> PathBuf {
        let candidate = Path::new(rel_or_abs);
        let joined = if candidate.is_absolute() { candidate.to_path_buf() } else { base_dir.join(candidate) };
        normalize(&joined)
    }

    /// Loads and caches the script at `path`, a duplicate concurrent load of
    /// the same key is acceptable and the last writer wins (spec.md §5).
    pub fn load(&self, path: &Path) -> Result<Arc<LoadedScript>, ArchetypeError> {
        let key = normalize(path).to_string_lossy().into_owned();
        if let Some(existing) = self.cache.lock().unwrap().get(&key) {
            return Ok(existing.clone());
        }
        let xml = std::fs::read_to_string(&key)
            .map_err(|e| ArchetypeError::Io(Location::new(key.clone(), 0, 0), e.to_string()))?;
        let loaded = Arc::new(parse_script(&key, &xml)?);
        self.cache.lock().unwrap().insert(key, loaded.clone());
        Ok(loaded)
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A raw XML element, namespace prefixes stripped from tag and attribute
/// names, before any of the spec's collapsing rules are applied.
struct ParsedElement {
    tag: String,
    attrs: HashMap<String, String>,
    text: String,
    children: Vec<ParsedElement>,
    offset: usize,
}

impl ParsedElement {
    fn loc(&self, xml: &str, script_path: &str) -> Location {
        let (line, col) = offset_to_line_col(xml, self.offset);
        Location::new(script_path, line, col)
    }
}

fn offset_to_line_col(xml: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut col = 1u32;
    for (i, ch) in xml.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn xml_err(e: impl std::fmt::Display) -> ArchetypeError {
    ArchetypeError::FormatError(Location::unknown(), e.to_string())
}

fn local_name(raw: &[u8]) -> String {
    let full = String::from_utf8_lossy(raw).into_owned();
    full.rsplit(':').next().unwrap_or(&full).to_string()
}

fn read_attrs(e: &BytesStart) -> Result<HashMap<String, String>, ArchetypeError> {
    let mut out = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = local_name(attr.key.as_ref());
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        out.insert(key, value);
    }
    Ok(out)
}

/// Parses `xml` into the root [`ParsedElement`] (the `<archetype-script>`
/// tag and everything under it).
fn parse_xml(xml: &str) -> Result<ParsedElement, ArchetypeError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    loop {
        let offset = reader.buffer_position() as usize;
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let tag = local_name(e.name().as_ref());
                let attrs = read_attrs(&e)?;
                return collect_element(&mut reader, tag, attrs, offset);
            }
            Event::Empty(e) => {
                let tag = local_name(e.name().as_ref());
                let attrs = read_attrs(&e)?;
                return Ok(ParsedElement { tag, attrs, text: String::new(), children: Vec::new(), offset });
            }
            Event::Eof => return Err(xml_err("empty document")),
            _ => {}
        }
        buf.clear();
    }
}

fn collect_element(
    reader: &mut Reader<&[u8]>,
    tag: String,
    attrs: HashMap<String, String>,
    offset: usize,
) -> Result<ParsedElement, ArchetypeError> {
    let mut text = String::new();
    let mut children = Vec::new();
    let mut buf = Vec::new();
    loop {
        let child_offset = reader.buffer_position() as usize;
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let child_tag = local_name(e.name().as_ref());
                let child_attrs = read_attrs(&e)?;
                children.push(collect_element(reader, child_tag, child_attrs, child_offset)?);
            }
            Event::Empty(e) => {
                let child_tag = local_name(e.name().as_ref());
                let child_attrs = read_attrs(&e)?;
                children.push(ParsedElement {
                    tag: child_tag,
                    attrs: child_attrs,
                    text: String::new(),
                    children: Vec::new(),
                    offset: child_offset,
                });
            }
            Event::Text(t) => text.push_str(&t.unescape().map_err(xml_err)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(_) => break,
            Event::Eof => return Err(xml_err("unexpected end of document")),
            _ => {}
        }
        buf.clear();
    }
    Ok(ParsedElement { tag, attrs, text, children, offset })
}

/// Separates `elem`'s children into the "noop" pseudo-children that collapse
/// into attributes and the real children that become sibling nodes
/// (spec.md §4.3, §6).
fn split_children(elem: &ParsedElement) -> (HashMap<String, Value>, Vec<&ParsedElement>) {
    let mut overrides = HashMap::new();
    let mut includes = Vec::new();
    let mut excludes = Vec::new();
    let mut replace_vals = Vec::new();
    let mut help = String::new();
    let mut real = Vec::new();

    for c in &elem.children {
        match c.tag.as_str() {
            "help" => {
                if !help.is_empty() {
                    help.push(' ');
                }
                help.push_str(c.text.trim());
            }
            "directory" => {
                overrides.insert("directory".to_string(), Value::String(c.text.trim().to_string()));
            }
            "include" => includes.push(c.text.trim().to_string()),
            "exclude" => excludes.push(c.text.trim().to_string()),
            "replace" if !c.attrs.contains_key("regex") => replace_vals.push(c.text.trim().to_string()),
            "value" if elem.tag != "model" && elem.tag != "map" => {
                overrides.insert("value".to_string(), Value::String(c.text.trim().to_string()));
            }
            _ => real.push(c),
        }
    }
    if !help.is_empty() {
        overrides.insert("help".to_string(), Value::String(help));
    }
    if !includes.is_empty() {
        overrides.insert("includes".to_string(), Value::StringList(includes));
    }
    if !excludes.is_empty() {
        overrides.insert("excludes".to_string(), Value::StringList(excludes));
    }
    if !replace_vals.is_empty() {
        overrides.insert("replace".to_string(), Value::StringList(replace_vals));
    }
    (overrides, real)
}

fn attach_common_attrs(mut b: NodeBuilder, elem: &ParsedElement, overrides: &HashMap<String, Value>) -> NodeBuilder {
    for key in ["id", "name", "label", "path", "description", "key"] {
        if let Some(v) = elem.attrs.get(key) {
            b = b.with_attribute(key, Value::String(v.clone()));
        }
    }
    for (k, v) in overrides {
        b = b.with_attribute(k.clone(), v.clone());
    }
    b
}

/// Any element (other than `<option>`, which carries its own `if` as a
/// filter condition rather than a guard) whose `if` attribute is present is
/// wrapped in a `Condition` node — the one place the loader constructs one
/// (spec.md §3's `Condition(expression, then)`, driven by the `if` attribute
/// documented in §6).
fn maybe_wrap_condition(elem: &ParsedElement, script_path: &str, xml: &str, built: NodeBuilder) -> NodeBuilder {
    match elem.attrs.get("if") {
        Some(expr) if elem.tag != "option" => {
            let loc = elem.loc(xml, script_path);
            let mut cond = NodeBuilder::condition(script_path, loc, expr.clone());
            cond.push_child(built);
            cond
        }
        _ => built,
    }
}

fn block_kind_for_tag(tag: &str) -> Option<BlockKind> {
    use BlockKind::*;
    Some(match tag {
        "archetype-script" => Script,
        "methods" => Methods,
        "method" => Method,
        "step" => Step,
        "inputs" => Inputs,
        "output" => Output,
        "templates" => Templates,
        "template" => Template,
        "files" => Files,
        "file" => File,
        "model" => Model,
        "map" => Map,
        "value" => Value,
        "transformation" => Transformation,
        "replace" => Replace,
        "includes" => Includes,
        "include" => Include,
        "excludes" => Excludes,
        "exclude" => Exclude,
        "invoke-dir" => InvokeDir,
        "invoke" => Invoke,
        "validations" => Validations,
        "regex" => Regex,
        _ => return None,
    })
}

fn to_node_builder(elem: &ParsedElement, script_path: &str, xml: &str) -> Result<NodeBuilder, ArchetypeError> {
    if elem.tag == "option" {
        return build_option(elem, script_path, xml);
    }
    let built = match elem.tag.as_str() {
        "presets" => build_presets_block(elem, script_path, xml)?,
        "variables" => build_variables_block(elem, script_path, xml)?,
        "validations" => build_validations_block(elem, script_path, xml)?,
        "boolean" | "text" | "enum" | "list" => build_input(elem, script_path, xml)?,
        "call" | "source" | "exec" => build_invocation(elem, script_path, xml)?,
        other => match block_kind_for_tag(other) {
            Some(kind) => build_generic_block(elem, script_path, xml, kind)?,
            None => return Err(ArchetypeError::FormatError(elem.loc(xml, script_path), format!("unknown element <{other}>"))),
        },
    };
    Ok(maybe_wrap_condition(elem, script_path, xml, built))
}

fn attr_bool(elem: &ParsedElement, key: &str) -> bool {
    elem.attrs.get(key).and_then(|v| Value::parse_bool(v)).unwrap_or(false)
}

fn build_input(elem: &ParsedElement, script_path: &str, xml: &str) -> Result<NodeBuilder, ArchetypeError> {
    let loc = elem.loc(xml, script_path);
    let (overrides, real_children) = split_children(elem);
    let optional = attr_bool(elem, "optional");
    let global = attr_bool(elem, "global");

    let mut builder = match elem.tag.as_str() {
        "boolean" => {
            let default = elem.attrs.get("default").and_then(|v| Value::parse_bool(v));
            NodeBuilder::input(script_path, loc.clone(), InputPayload::Boolean { default, optional, global })
        }
        "text" => {
            let default = elem.attrs.get("default").cloned();
            NodeBuilder::input(script_path, loc.clone(), InputPayload::Text { default, optional, global })
        }
        "enum" => {
            let default = elem.attrs.get("default").cloned();
            let mut b = NodeBuilder::enum_input(script_path, loc.clone(), default, optional, global);
            for c in real_children.iter().filter(|c| c.tag == "option") {
                b.push_child(build_option(c, script_path, xml)?);
            }
            b
        }
        "list" => {
            let default = elem.attrs.get("default").map(|v| Value::parse_string_list(v)).unwrap_or_default();
            let mut b = NodeBuilder::list_input(script_path, loc.clone(), default, optional, global);
            for c in real_children.iter().filter(|c| c.tag == "option") {
                b.push_child(build_option(c, script_path, xml)?);
            }
            b
        }
        other => unreachable!("build_input called for <{other}>"),
    };
    builder = attach_common_attrs(builder, elem, &overrides);
    Ok(builder)
}

fn build_option(elem: &ParsedElement, script_path: &str, xml: &str) -> Result<NodeBuilder, ArchetypeError> {
    let loc = elem.loc(xml, script_path);
    let value = elem.attrs.get("value").cloned().unwrap_or_else(|| elem.text.trim().to_string());
    let condition = elem.attrs.get("if").cloned();
    let mut b = NodeBuilder::option(script_path, loc, value, condition);
    if let Some(label) = elem.attrs.get("label") {
        b = b.with_attribute("label", Value::String(label.clone()));
    }
    Ok(b)
}

fn build_invocation(elem: &ParsedElement, script_path: &str, xml: &str) -> Result<NodeBuilder, ArchetypeError> {
    let loc = elem.loc(xml, script_path);
    let (kind, target) = match elem.tag.as_str() {
        "call" => (InvocationKind::Call, elem.attrs.get("method").cloned()),
        "source" => (InvocationKind::Source, elem.attrs.get("src").cloned()),
        "exec" => (InvocationKind::Exec, elem.attrs.get("src").or_else(|| elem.attrs.get("url")).cloned()),
        other => unreachable!("build_invocation called for <{other}>"),
    };
    let target = target.ok_or_else(|| {
        ArchetypeError::FormatError(loc.clone(), format!("<{}> is missing its target attribute", elem.tag))
    })?;
    Ok(NodeBuilder::invocation(script_path, loc, kind, target))
}

fn build_presets_block(elem: &ParsedElement, script_path: &str, xml: &str) -> Result<NodeBuilder, ArchetypeError> {
    let loc = elem.loc(xml, script_path);
    let mut block = NodeBuilder::block(script_path, loc, BlockKind::Presets);
    for c in &elem.children {
        let path = c.attrs.get("path").cloned().unwrap_or_default();
        let value = match c.tag.as_str() {
            "boolean" => Value::Bool(Value::parse_bool(c.text.trim()).unwrap_or(false)),
            "list" => Value::StringList(Value::parse_string_list(c.text.trim())),
            _ => Value::String(c.text.trim().to_string()),
        };
        block.push_child(NodeBuilder::preset(script_path, c.loc(xml, script_path), path, value));
    }
    Ok(block)
}

fn build_variables_block(elem: &ParsedElement, script_path: &str, xml: &str) -> Result<NodeBuilder, ArchetypeError> {
    let loc = elem.loc(xml, script_path);
    let mut block = NodeBuilder::block(script_path, loc, BlockKind::Variables);
    for c in &elem.children {
        let path = c.attrs.get("path").cloned().unwrap_or_default();
        let transient = attr_bool(c, "transient");
        block.push_child(NodeBuilder::variable(script_path, c.loc(xml, script_path), path, c.text.trim(), transient));
    }
    Ok(block)
}

fn build_validations_block(elem: &ParsedElement, script_path: &str, xml: &str) -> Result<NodeBuilder, ArchetypeError> {
    let loc = elem.loc(xml, script_path);
    let mut block = NodeBuilder::block(script_path, loc, BlockKind::Validations);
    for v in elem.children.iter().filter(|c| c.tag == "validation") {
        let id = v.attrs.get("id").cloned().unwrap_or_default();
        let description = v.attrs.get("description").cloned().unwrap_or_default();
        let patterns = v
            .children
            .iter()
            .filter(|c| c.tag == "regex")
            .map(|c| c.attrs.get("pattern").cloned().unwrap_or_else(|| c.text.trim().to_string()))
            .collect();
        block.push_child(NodeBuilder::validation(script_path, v.loc(xml, script_path), id, description, patterns));
    }
    Ok(block)
}

fn build_generic_block(
    elem: &ParsedElement,
    script_path: &str,
    xml: &str,
    kind: BlockKind,
) -> Result<NodeBuilder, ArchetypeError> {
    let loc = elem.loc(xml, script_path);
    let (overrides, real_children) = split_children(elem);
    let mut b = NodeBuilder::block(script_path, loc.clone(), kind);

    if kind == BlockKind::Model {
        let bare = elem.text.trim();
        if !bare.is_empty() {
            b.push_child(
                NodeBuilder::block(script_path, loc.clone(), BlockKind::Value)
                    .with_attribute("text", Value::String(bare.to_string())),
            );
        }
    }

    for key in ["id", "name", "key", "label", "regex", "pattern", "replacement", "src", "url"] {
        if let Some(v) = elem.attrs.get(key) {
            b = b.with_attribute(key, Value::String(v.clone()));
        }
    }
    if kind == BlockKind::Step {
        b = b.with_attribute("optional", Value::Bool(attr_bool(elem, "optional")));
    }
    for (k, v) in &overrides {
        b = b.with_attribute(k.clone(), v.clone());
    }
    for c in &real_children {
        if c.tag == "methods" {
            continue; // extracted separately by parse_script
        }
        let child = to_node_builder(c, script_path, xml)?;
        b.push_child(child);
    }
    Ok(b)
}

/// Parses a full `<archetype-script>` document, extracting `<methods>` into
/// a name-keyed map and returning the remaining tree as the script body
/// (spec.md §4.3).
pub fn parse_script(script_path: &str, xml: &str) -> Result<LoadedScript, ArchetypeError> {
    let root_elem = parse_xml(xml)?;
    if root_elem.tag != "archetype-script" {
        return Err(ArchetypeError::FormatError(
            root_elem.loc(xml, script_path),
            format!("expected <archetype-script>, found <{}>", root_elem.tag),
        ));
    }

    let mut methods = HashMap::new();
    let mut script_b = NodeBuilder::block(script_path, root_elem.loc(xml, script_path), BlockKind::Script);

    for c in &root_elem.children {
        if c.tag == "methods" {
            for m in c.children.iter().filter(|m| m.tag == "method") {
                let id = m.attrs.get("id").cloned().unwrap_or_default();
                let mut mb = NodeBuilder::block(script_path, m.loc(xml, script_path), BlockKind::Method)
                    .with_attribute("id", Value::String(id.clone()));
                for gc in &m.children {
                    mb.push_child(to_node_builder(gc, script_path, xml)?);
                }
                methods.insert(id, mb.build());
            }
        } else {
            script_b.push_child(to_node_builder(c, script_path, xml)?);
        }
    }

    Ok(LoadedScript { root: script_b.build(), methods })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;

    const SCRIPT: &str = r#"
        <archetype-script xmlns="https://helidon.io/archetype/2.0">
            <methods>
                <method id="greet">
                    <output/>
                </method>
            </methods>
            <step label="Pick a fruit">
                <help>Choose wisely</help>
                <inputs>
                    <enum id="fruit" default="berries">
                        <option value="berries" label="Berries"/>
                        <option value="tropical" label="Tropical" if="${allow-tropical}"/>
                    </enum>
                    <boolean id="organic" default="false" optional="true"/>
                </inputs>
            </step>
            <presets>
                <boolean path="organic">true</boolean>
            </presets>
            <variables>
                <variable path="greeting" value="hi"/>
            </variables>
            <call method="greet"/>
        </archetype-script>
    "#;

    #[test]
    fn parses_methods_step_presets_variables_and_call() {
        let loaded = parse_script("cake.xml", SCRIPT).unwrap();
        assert_eq!(loaded.methods.len(), 1);
        assert!(loaded.methods.contains_key("greet"));

        let children = loaded.root.children();
        assert_eq!(children.len(), 4); // step, presets, variables, call

        let step = &children[0];
        assert_eq!(step.block_kind(), Some(BlockKind::Step));
        assert_eq!(step.attr_str("help"), Some("Choose wisely"));

        let inputs = &step.children()[0];
        let fruit = &inputs.children()[0];
        match &fruit.kind {
            NodeKind::Input(InputPayload::Enum { options, default, .. }) => {
                assert_eq!(default.as_deref(), Some("berries"));
                assert_eq!(options.len(), 2);
            }
            other => panic!("expected enum input, got {other:?}"),
        }

        let presets = &children[1];
        assert_eq!(presets.block_kind(), Some(BlockKind::Presets));
        match &presets.children()[0].kind {
            NodeKind::Preset { path, value } => {
                assert_eq!(path, "organic");
                assert_eq!(*value, Value::Bool(true));
            }
            other => panic!("expected preset, got {other:?}"),
        }

        let call = &children[3];
        assert!(matches!(&call.kind, NodeKind::Invocation { kind: InvocationKind::Call, target } if target == "greet"));
    }

    #[test]
    fn loader_caches_by_normalized_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.xml");
        std::fs::write(&path, "<archetype-script/>").unwrap();

        let loader = Loader::new();
        let a = loader.load(&path).unwrap();
        let b = loader.load(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn bare_text_under_model_becomes_value_block() {
        let xml = r#"<archetype-script><output><templates><model>hello</model></templates></output></archetype-script>"#;
        let loaded = parse_script("m.xml", xml).unwrap();
        let output = &loaded.root.children()[0];
        let templates = &output.children()[0];
        let model = &templates.children()[0];
        assert_eq!(model.children().len(), 1);
        assert_eq!(model.children()[0].block_kind(), Some(BlockKind::Value));
        assert_eq!(model.children()[0].attr_str("text"), Some("hello"));
    }
}
