//! Parameter validation and normalization.
//!
//! Shared by the parser and the chain router: every command, parsed or
//! chained, goes through [`prepare_args`] before reaching a handler.

use crate::core::blob;
use crate::core::descriptors::json_kind;
use crate::core::error::ValidationError;
use crate::core::manifest::ParamSpec;
use crate::core::state::State;
use crate::core::types::{self, ParamType};
use indexmap::IndexMap;
use serde_json::{Map, Value};

pub type Parameters = IndexMap<String, ParamSpec>;

/// Validate raw args against declared parameters and return the normalized
/// args in declaration order.
pub fn validate(args: &Map<String, Value>, parameters: &Parameters) -> Result<Map<String, Value>, ValidationError> {
    let mut given = canonicalize_keys(args, parameters)?;

    let missing: Vec<String> = parameters
        .iter()
        .filter(|(name, spec)| spec.required && given.get(*name).is_none_or(Value::is_null))
        .map(|(name, _)| name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingRequired(missing));
    }

    let mut out = Map::new();
    for (name, spec) in parameters {
        match given.shift_remove(name) {
            Some(Value::Null) => {
                out.insert(name.clone(), Value::Null);
            }
            Some(value) => {
                out.insert(name.clone(), normalize_value(name, spec, value)?);
            }
            None => {
                if let Some(default) = &spec.default {
                    out.insert(name.clone(), default.clone());
                }
            }
        }
    }
    Ok(out)
}

/// Runtime fallbacks, then validation.
pub fn prepare_args(
    args: &Map<String, Value>,
    parameters: &Parameters,
    state: &State,
) -> Result<Map<String, Value>, ValidationError> {
    let mut args = canonicalize_keys(args, parameters)?;
    apply_runtime_fallbacks(&mut args, parameters, state);
    validate(&args, parameters)
}

/// Rename keys to their declared spelling; unknown keys are an error.
pub fn canonicalize_keys(
    args: &Map<String, Value>,
    parameters: &Parameters,
) -> Result<Map<String, Value>, ValidationError> {
    let mut out = Map::new();
    for (key, value) in args {
        let declared = parameters
            .get_key_value(key.as_str())
            .or_else(|| parameters.iter().find(|(name, _)| name.eq_ignore_ascii_case(key)))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| ValidationError::UnknownParameter(key.clone()))?;
        out.insert(declared, value.clone());
    }
    Ok(out)
}

/// Fill missing required parameters from `state[runtimeFallback]`.
pub fn apply_runtime_fallbacks(args: &mut Map<String, Value>, parameters: &Parameters, state: &State) {
    for (name, spec) in parameters {
        if !spec.required || args.get(name).is_some_and(|v| !v.is_null()) {
            continue;
        }
        let Some(key) = &spec.runtime_fallback else {
            continue;
        };
        if let Some(value) = state.get(key).filter(|v| !v.is_null()) {
            tracing::debug!(parameter = %name, state_key = %key, "filled from runtime fallback");
            args.insert(name.clone(), value.clone());
        }
    }
}

/// Resolve the declared union for one value, then check enum and range.
pub fn normalize_value(name: &str, spec: &ParamSpec, value: Value) -> Result<Value, ValidationError> {
    let members = types::parse_union(&spec.type_decl, name)?;
    let Some(chosen) = members.iter().copied().find(|ty| ty.accepts(&value)) else {
        return Err(ValidationError::TypeMismatch {
            parameter: name.to_string(),
            expected: spec.type_decl.clone(),
            got: json_kind(&value).to_string(),
        });
    };

    let normalized = if chosen == ParamType::Blob {
        blob::normalize(&value, spec.constraints.as_ref()).map_err(|message| ValidationError::Blob {
            parameter: name.to_string(),
            message,
        })?
    } else {
        chosen.coerce(value).map_err(|got| ValidationError::TypeMismatch {
            parameter: name.to_string(),
            expected: chosen.to_string(),
            got,
        })?
    };

    if let Some(allowed) = &spec.allowed {
        if !allowed.iter().any(|a| values_equal(a, &normalized)) {
            return Err(ValidationError::NotInEnum {
                parameter: name.to_string(),
                value: display_value(&normalized),
                allowed: allowed.iter().map(display_value).collect(),
            });
        }
    }

    if chosen.is_numeric() {
        if let Some(n) = normalized.as_f64() {
            if let Some(min) = spec.min.filter(|min| n < *min) {
                return Err(ValidationError::OutOfRange {
                    parameter: name.to_string(),
                    bound: format!("at least {}", format_bound(min)),
                    value: display_value(&normalized),
                });
            }
            if let Some(max) = spec.max.filter(|max| n > *max) {
                return Err(ValidationError::OutOfRange {
                    parameter: name.to_string(),
                    bound: format!("at most {}", format_bound(max)),
                    value: display_value(&normalized),
                });
            }
        }
    }

    Ok(normalized)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_bound(bound: f64) -> String {
    if bound.fract() == 0.0 && bound.abs() < 1e15 {
        format!("{}", bound as i64)
    } else {
        bound.to_string()
    }
}
