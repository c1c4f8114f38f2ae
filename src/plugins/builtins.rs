//! Built-in handlers for `internal` commands: `help`, `exit`, `state` and
//! `echo`.
//!
//! Bound by the last path segment, so a target subtree's `core/help` gets
//! the same handler as a top-level `help`.

use crate::core::error::HandlerError;
use crate::core::handler::{HandlerRegistry, Invocation, handler_fn};
use crate::core::manifest::{CommandSpec, CommandType, Manifest};
use serde_json::{Map, Value};

/// Bind built-ins to every matching `internal` command that has no handler
/// yet. Returns how many were bound.
pub fn register(manifest: &Manifest, registry: &mut HandlerRegistry) -> usize {
    let mut bound = 0;
    for spec in manifest.commands.values() {
        if spec.command_type != CommandType::Internal || registry.contains(&spec.name) {
            continue;
        }
        let base = spec.name.rsplit('/').next().unwrap_or(&spec.name);
        match base {
            "help" => registry.register(spec.name.clone(), handler_fn(help)),
            "exit" => registry.register(spec.name.clone(), handler_fn(exit)),
            "state" => registry.register(spec.name.clone(), handler_fn(state)),
            "echo" => registry.register(spec.name.clone(), handler_fn(echo)),
            _ => continue,
        };
        bound += 1;
    }
    bound
}

/// Overview of every command, or the detail of one via `command`.
pub fn help(inv: &Invocation<'_>) -> Result<Value, HandlerError> {
    match inv.arg_str("command").filter(|c| !c.trim().is_empty()) {
        Some(name) => {
            let spec = inv
                .manifest
                .get(name)
                .ok_or_else(|| HandlerError::new(format!("Unknown command: '{}'", name)))?;
            Ok(Value::String(describe(spec)))
        }
        None => Ok(Value::String(overview(inv.manifest))),
    }
}

pub fn exit(_inv: &Invocation<'_>) -> Result<Value, HandlerError> {
    Ok(Value::String("Goodbye.".to_string()))
}

/// The whole session state, or one `key` of it.
pub fn state(inv: &Invocation<'_>) -> Result<Value, HandlerError> {
    match inv.arg_str("key") {
        Some(key) => {
            let mut out = Map::new();
            out.insert(key.to_string(), inv.state.get(key).cloned().unwrap_or(Value::Null));
            Ok(Value::Object(out))
        }
        None => Ok(inv.state.snapshot()),
    }
}

pub fn echo(inv: &Invocation<'_>) -> Result<Value, HandlerError> {
    Ok(Value::Object(inv.args.clone()))
}

fn overview(manifest: &Manifest) -> String {
    let mut lines = vec![format!("{} v{}", manifest.name, manifest.version)];
    if let Some(description) = &manifest.description {
        lines.push(description.clone());
    }
    lines.push(String::new());
    let width = manifest
        .commands
        .values()
        .map(|s| s.usage().chars().count())
        .max()
        .unwrap_or(0);
    for spec in manifest.commands.values() {
        let usage = spec.usage();
        match &spec.description {
            Some(d) => lines.push(format!("  {:<width$}  {}", usage, d, width = width)),
            None => lines.push(format!("  {}", usage)),
        }
    }
    lines.join("\n")
}

fn describe(spec: &CommandSpec) -> String {
    let mut lines = vec![spec.usage()];
    if let Some(d) = &spec.description {
        lines.push(format!("  {}", d));
    }
    if !spec.parameters.is_empty() {
        lines.push(String::new());
        lines.push("Parameters:".to_string());
        for (name, p) in &spec.parameters {
            let mut line = format!("  {} ({}{})", name, p.type_decl, if p.required { ", required" } else { "" });
            if let Some(default) = &p.default {
                line.push_str(&format!(" default {}", default));
            }
            if let Some(allowed) = &p.allowed {
                let values: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                line.push_str(&format!(" one of {}", values.join("|")));
            }
            if let Some(d) = &p.description {
                line.push_str(&format!(": {}", d));
            }
            lines.push(line);
        }
    }
    if !spec.examples.is_empty() {
        lines.push(String::new());
        lines.push("Examples:".to_string());
        lines.extend(spec.examples.iter().map(|e| format!("  {}", e)));
    }
    lines.join("\n")
}
