//! `{{ path | filter }}` templates.
//!
//! Paths are dot-separated and resolved against a JSON context; numeric
//! segments index arrays. Strings render raw, other values as compact JSON,
//! missing or `null` values as nothing.

use crate::core::error::TemplateError;
use serde_json::Value;
use std::path::Path;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Render `template` to a string.
pub fn render(template: &str, ctx: &Value) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let end = after
            .find(CLOSE)
            .ok_or(TemplateError::Unterminated(offset + start))?;
        let value = eval_hole(&after[..end], ctx)?;
        out.push_str(&to_text(value.as_ref()));
        let consumed = start + OPEN.len() + end + CLOSE.len();
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Render, then read the result as JSON when it parses, else as a string.
pub fn render_to_value(template: &str, ctx: &Value) -> Result<Value, TemplateError> {
    let rendered = render(template, ctx)?;
    Ok(serde_json::from_str(&rendered).unwrap_or(Value::String(rendered)))
}

/// Render every string leaf of a JSON value.
pub fn render_json(value: &Value, ctx: &Value) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => render_to_value(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| render_json(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), render_json(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve a dot path. An empty path is the context itself.
pub fn lookup<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(ctx);
    }
    path.split('.').try_fold(ctx, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn eval_hole(expr: &str, ctx: &Value) -> Result<Option<Value>, TemplateError> {
    let mut parts = expr.split('|');
    let path = parts.next().unwrap_or_default();
    let mut value = lookup(ctx, path).cloned();
    for filter in parts {
        value = Some(apply_filter(filter.trim(), value)?);
    }
    Ok(value)
}

fn apply_filter(filter: &str, value: Option<Value>) -> Result<Value, TemplateError> {
    let text = to_text(value.as_ref());
    let out = match filter {
        "basename" => Value::String(basename(&text)),
        "json" => Value::String(
            serde_json::to_string(&value.unwrap_or(Value::Null)).unwrap_or_default(),
        ),
        "lower" => Value::String(text.to_lowercase()),
        "upper" => Value::String(text.to_uppercase()),
        "trim" => Value::String(text.trim().to_string()),
        other => return Err(TemplateError::UnknownFilter(other.to_string())),
    };
    Ok(out)
}

/// Final path component with its last extension removed.
pub fn basename(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub fn to_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
