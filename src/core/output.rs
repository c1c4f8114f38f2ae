//! Compact output rendering for the CLI and the interactive session.
//!
//! Keeps command results bounded and readable on a terminal.

use crate::core::manifest::Manifest;
use crate::core::router::CommandResult;
use colored::Colorize;
use serde_json::Value;

pub const MAX_LINE_CHARS: usize = 240;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

/// Plain text for a handler output. Strings print as-is (multi-line help
/// text included); everything else prints as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Session rendering of one result: the output, or a red error line followed
/// by a dimmed summary of the links that did run.
pub fn render_result(result: &CommandResult) -> String {
    match &result.error {
        None => value_text(&result.output),
        Some(error) => {
            let mut out = format!("{} {}", "error:".red().bold(), error);
            if !result.chain.is_empty() {
                out.push('\n');
                out.push_str(
                    &format!("  ran: {}", preview_messages(&result.chain, 5, 40))
                        .dimmed()
                        .to_string(),
                );
            }
            out
        }
    }
}

/// One line per command, in manifest order.
pub fn render_manifest(manifest: &Manifest) -> String {
    let mut lines = vec![format!(
        "{} v{} ({} commands)",
        manifest.name.bold(),
        manifest.version,
        manifest.commands.len()
    )];
    for spec in manifest.commands.values() {
        let description = spec
            .description
            .as_deref()
            .map(|d| compact_line(d, 72))
            .unwrap_or_default();
        lines.push(format!(
            "  {:<12} {} {}",
            spec.command_type.as_str().cyan(),
            spec.usage(),
            description.dimmed()
        ));
    }
    lines.join("\n")
}
