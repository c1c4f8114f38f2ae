//! Parameter types and union resolution.
//!
//! A declared `type` may be a `|`-joined union. Members are always tried in
//! the fixed [`ParamType::ALL`] order regardless of how they were written, so
//! `"string|integer"` and `"integer|string"` behave the same.

use crate::core::error::ValidationError;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

static INTEGER_STRING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamType {
    Blob,
    Buffer,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    String,
    Any,
}

impl ParamType {
    /// Precedence order; earlier members win.
    pub const ALL: [ParamType; 9] = [
        ParamType::Blob,
        ParamType::Buffer,
        ParamType::Integer,
        ParamType::Number,
        ParamType::Boolean,
        ParamType::Array,
        ParamType::Object,
        ParamType::String,
        ParamType::Any,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name.trim().to_ascii_lowercase().as_str() {
            "blob" => ParamType::Blob,
            "buffer" => ParamType::Buffer,
            "integer" | "int" => ParamType::Integer,
            "number" | "float" => ParamType::Number,
            "boolean" | "bool" => ParamType::Boolean,
            "array" => ParamType::Array,
            "object" => ParamType::Object,
            "string" => ParamType::String,
            "any" => ParamType::Any,
            _ => return None,
        };
        Some(ty)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::Blob => "blob",
            ParamType::Buffer => "buffer",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::String => "string",
            ParamType::Any => "any",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ParamType::Integer | ParamType::Number)
    }

    /// Whether `value` can be represented as this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::Blob => match value {
                Value::String(s) => !s.trim().is_empty(),
                Value::Object(map) => matches!(
                    map.get("type").and_then(Value::as_str),
                    Some("dataUrl" | "base64" | "path")
                ),
                _ => false,
            },
            ParamType::Buffer => buffer_bytes(value).is_some(),
            ParamType::Integer => match value {
                Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(fits_i64),
                Value::String(s) => {
                    let s = s.trim();
                    INTEGER_STRING.is_match(s) && s.parse::<i64>().is_ok()
                }
                _ => false,
            },
            ParamType::Number => match value {
                Value::Number(_) => true,
                Value::String(s) => parse_finite(s).is_some(),
                _ => false,
            },
            ParamType::Boolean => match value {
                Value::Bool(_) => true,
                Value::String(s) => {
                    s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false")
                }
                _ => false,
            },
            ParamType::Array => match value {
                Value::Array(_) => true,
                Value::String(s) => matches!(parse_json_str(s), Some(Value::Array(_))),
                _ => false,
            },
            ParamType::Object => match value {
                Value::Object(_) => true,
                Value::String(s) => matches!(parse_json_str(s), Some(Value::Object(_))),
                _ => false,
            },
            ParamType::String => {
                matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
            }
            ParamType::Any => true,
        }
    }

    /// Convert an accepted value into this type's normal form.
    ///
    /// Blob values are handled by [`crate::core::blob`]; here they pass
    /// through unchanged.
    pub fn coerce(self, value: Value) -> Result<Value, String> {
        match self {
            ParamType::Blob | ParamType::Any => Ok(value),
            ParamType::Buffer => buffer_bytes(&value)
                .map(|bytes| Value::Array(bytes.into_iter().map(Value::from).collect()))
                .ok_or_else(|| "expected an array of bytes".to_string()),
            ParamType::Integer => match &value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
                Value::Number(n) => n
                    .as_f64()
                    .filter(|f| fits_i64(*f))
                    .map(|f| Value::from(f as i64))
                    .ok_or_else(|| format!("{} is not an integer", n)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("'{}' is out of integer range", s)),
                other => Err(format!("cannot read {} as integer", other)),
            },
            ParamType::Number => match &value {
                Value::Number(_) => Ok(value),
                Value::String(s) => parse_finite(s)
                    .and_then(|_| crate::core::literal::number_value(s.trim()))
                    .ok_or_else(|| format!("'{}' is not a finite number", s)),
                other => Err(format!("cannot read {} as number", other)),
            },
            ParamType::Boolean => match &value {
                Value::Bool(_) => Ok(value),
                Value::String(s) => Ok(Value::Bool(s.eq_ignore_ascii_case("true"))),
                other => Err(format!("cannot read {} as boolean", other)),
            },
            ParamType::Array | ParamType::Object => match value {
                Value::String(s) => {
                    parse_json_str(&s).ok_or_else(|| format!("'{}' is not valid JSON", s))
                }
                other => Ok(other),
            },
            ParamType::String => match value {
                Value::String(_) => Ok(value),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                other => Err(format!("cannot read {} as string", other)),
            },
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a declared type into its members, ordered by precedence.
pub fn parse_union(type_decl: &str, parameter: &str) -> Result<Vec<ParamType>, ValidationError> {
    let mut members = Vec::new();
    for raw in type_decl.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let ty = ParamType::from_name(raw).ok_or_else(|| ValidationError::UnknownType {
            parameter: parameter.to_string(),
            type_name: raw.to_string(),
        })?;
        if !members.contains(&ty) {
            members.push(ty);
        }
    }
    if members.is_empty() {
        members.push(ParamType::String);
    }
    members.sort();
    Ok(members)
}

fn parse_finite(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn parse_json_str(s: &str) -> Option<Value> {
    serde_json::from_str(s.trim()).ok()
}

/// Integral and inside the i64 range.
fn fits_i64(f: f64) -> bool {
    f.fract() == 0.0 && f.abs() < i64::MAX as f64
}

fn buffer_bytes(value: &Value) -> Option<Vec<u8>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) if is_buffer_object(map) => map.get("data")?.as_array()?,
        _ => return None,
    };
    items
        .iter()
        .map(|v| v.as_u64().filter(|b| *b <= 255).map(|b| b as u8))
        .collect()
}

fn is_buffer_object(map: &Map<String, Value>) -> bool {
    map.get("type").and_then(Value::as_str) == Some("Buffer")
}
