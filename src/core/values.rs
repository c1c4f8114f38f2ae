//! Token helpers for function-style arguments: top-level splitting,
//! unquoting and bare-token normalization.

use crate::core::literal;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static INTEGER_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+$").unwrap());
static DECIMAL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?(\d+\.\d*|\.\d+|\d+)([eE][+-]?\d+)?$").unwrap());

/// Split on `sep` at nesting depth zero, ignoring separators inside quotes,
/// brackets, braces and parentheses. Returns `Err` on unbalanced input.
pub fn split_top_level(input: &str, sep: char) -> Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in input.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                stack.push(c);
                current.push(c);
            }
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    return Err(format!("unbalanced '{}'", c));
                }
                current.push(c);
            }
            c if c == sep && stack.is_empty() => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if let Some(q) = quote {
        return Err(format!("unterminated {} quote", q));
    }
    if let Some(open) = stack.last() {
        return Err(format!("unclosed '{}'", open));
    }
    parts.push(current);
    Ok(parts)
}

/// Index of the first `=` at nesting depth zero and outside quotes.
pub fn find_top_level_eq(token: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in token.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '=' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Strip one matching pair of `"` or `'` and resolve backslash escapes.
pub fn unquote(token: &str) -> Option<String> {
    let mut chars = token.chars();
    let first = chars.next()?;
    if (first != '"' && first != '\'') || token.len() < 2 || !token.ends_with(first) {
        return None;
    }
    let inner = &token[1..token.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut iter = inner.chars();
    while let Some(c) = iter.next() {
        if c == '\\' {
            match iter.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Turn one raw argument token into a JSON value.
///
/// Quoted tokens stay strings. Bare tokens are detected as integers,
/// decimals, booleans, `null`/`undefined`, or array/object literals; anything
/// else is kept as a bare string.
pub fn normalize_token(raw: &str) -> Value {
    let token = raw.trim();
    if let Some(s) = unquote(token) {
        return Value::String(s);
    }
    match token {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "undefined" => return Value::Null,
        _ => {}
    }
    if INTEGER_TOKEN.is_match(token) || DECIMAL_TOKEN.is_match(token) {
        if let Some(v) = literal::number_value(token) {
            return v;
        }
    }
    if token.starts_with('[') || token.starts_with('{') {
        if let Ok(v) = literal::parse_json_or_literal(token) {
            return v;
        }
    }
    Value::String(token.to_string())
}
