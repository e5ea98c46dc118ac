//! CLI front-end for the archetype interpreter (SPEC_FULL.md §A).

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use clap_complete::{generate, Shell};

use archetype_core::ast::{InputPayload, Node, NodeKind};
use archetype_core::{
    permute, validate, ArchetypeError, Context, Controller, InputResolver, LoaderResolver, Value,
    ValueKind, DEFAULT_MAX_PERMUTATIONS,
};

#[derive(Debug, Parser)]
#[command(name = "archetype", about = "Interpreter for declarative project-generation wizard scripts")]
struct Cli {
    #[command(subcommand)]
    command: SubCommand,
}

#[derive(Debug, Subcommand)]
enum SubCommand {
    /// Run every static check on a script and print its diagnostics
    Validate {
        /// The `.xml` script to check
        script: PathBuf,
    },
    /// Execute a script, prompting on stdin for any input without a preset
    Run {
        /// The `.xml` script to execute
        script: PathBuf,
        /// A `path=value` preset, layered in before prompting. May repeat.
        #[arg(long = "preset", value_name = "KEY=VALUE")]
        presets: Vec<String>,
    },
    /// Enumerate every reachable answer combination for a script
    Permute {
        /// The `.xml` script to enumerate
        script: PathBuf,
        /// Maximum number of combinations to return
        #[arg(long, default_value_t = DEFAULT_MAX_PERMUTATIONS)]
        max: usize,
    },
    /// Print shell completions for this CLI
    Completions {
        shell: Shell,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        SubCommand::Validate { script } => cmd_validate(&script),
        SubCommand::Run { script, presets } => cmd_run(&script, &presets),
        SubCommand::Permute { script, max } => cmd_permute(&script, max),
        SubCommand::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_script_root(script: &PathBuf) -> anyhow::Result<(Arc<archetype_core::Loader>, Arc<archetype_core::LoadedScript>)> {
    let loader = Arc::new(archetype_core::Loader::new());
    let loaded = loader
        .load(script)
        .with_context(|| format!("loading {}", script.display()))?;
    Ok((loader, loaded))
}

fn cmd_validate(script: &PathBuf) -> anyhow::Result<()> {
    let (_loader, loaded) = load_script_root(script)?;
    let diagnostics = validate(loaded.root.children());
    if diagnostics.is_empty() {
        println!("{}: no diagnostics", script.display());
        return Ok(());
    }
    for d in &diagnostics {
        println!("{d}");
    }
    bail!("{} diagnostic(s)", diagnostics.len());
}

/// Parses `path=value` into a `(path, Value)` pair; `true`/`false` (any of
/// the aliases `Value::parse_bool` accepts) become `Bool`, a comma-separated
/// value with more than one entry becomes a `StringList`, everything else
/// is a `String` (spec.md §4.1's preset typing is otherwise only inferable
/// from the script itself, which a bare command-line flag doesn't have).
fn parse_preset(raw: &str) -> anyhow::Result<(String, Value)> {
    let (path, raw_value) = raw.split_once('=').with_context(|| format!("preset '{raw}' is not KEY=VALUE"))?;
    let value = match Value::parse_bool(raw_value) {
        Some(b) => Value::Bool(b),
        None if raw_value.contains(',') => Value::StringList(Value::parse_string_list(raw_value)),
        None => Value::String(raw_value.to_string()),
    };
    Ok((path.to_string(), value))
}

fn cmd_run(script: &PathBuf, raw_presets: &[String]) -> anyhow::Result<()> {
    let (loader, loaded) = load_script_root(script)?;
    let mut ctx = Context::new(script.parent().unwrap_or_else(|| std::path::Path::new(".")));
    for raw in raw_presets {
        let (path, value) = parse_preset(raw)?;
        ctx.put_value(&path, value, ValueKind::Preset);
    }

    let mut resolver = LoaderResolver::new(loader);
    let mut controller = Controller::new(StdinResolver);
    archetype_core::walk(loaded.root.children(), &mut controller, &mut ctx, &mut resolver)
        .with_context(|| format!("running {}", script.display()))
}

fn cmd_permute(script: &PathBuf, max: usize) -> anyhow::Result<()> {
    let (_loader, loaded) = load_script_root(script)?;
    let perms = permute(loaded.root.children(), max);
    for perm in &perms {
        let map: std::collections::BTreeMap<_, _> = perm.values.iter().cloned().collect();
        println!("{}", serde_json::to_string(&map)?);
    }
    Ok(())
}

/// Prompts on stdin, showing the declared default and accepting a blank
/// line as "use it".
struct StdinResolver;

impl InputResolver for StdinResolver {
    fn prompt(&mut self, node: &Node, scope_path: &str) -> Result<Value, ArchetypeError> {
        let payload = match &node.kind {
            NodeKind::Input(p) => p,
            _ => return Err(ArchetypeError::UnresolvedInput(node.loc.clone(), "not an input node".into())),
        };
        let default = payload.default_value();
        print!("{scope_path} [{default}]");
        if let InputPayload::Enum { options, .. } | InputPayload::List { options, .. } = payload {
            let values: Vec<&str> = options
                .iter()
                .filter_map(|o| match &o.kind {
                    NodeKind::Input(InputPayload::Option { value, .. }) => Some(value.as_str()),
                    _ => None,
                })
                .collect();
            print!(" ({})", values.join("/"));
        }
        print!(": ");
        io::stdout().flush().ok();

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| ArchetypeError::Io(node.loc.clone(), e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(default);
        }
        Ok(match payload {
            InputPayload::Boolean { .. } => Value::Bool(Value::parse_bool(trimmed).unwrap_or(false)),
            InputPayload::List { .. } => Value::StringList(Value::parse_string_list(trimmed)),
            _ => Value::String(trimmed.to_string()),
        })
    }
}
