//! Deep merge of descriptor JSON.
//!
//! Objects merge key by key, recursively. A conflicting leaf is decided by
//! [`Precedence`]. A `null` in the incoming value never deletes anything.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    /// Existing leaves are kept; the incoming value only fills gaps.
    /// Used for sources (ancestor wins) and per-file property routing.
    KeepExisting,
    /// Incoming leaves replace existing ones. Used for targets (descendant wins).
    TakeIncoming,
}

pub fn deep_merge(base: &mut Value, incoming: Value, precedence: Precedence) {
    if incoming.is_null() {
        return;
    }
    if base.is_null() {
        *base = incoming;
        return;
    }
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            merge_maps(base_map, incoming_map, precedence);
        }
        (slot, incoming) => {
            if precedence == Precedence::TakeIncoming {
                *slot = incoming;
            }
        }
    }
}

pub fn merge_maps(base: &mut Map<String, Value>, incoming: Map<String, Value>, precedence: Precedence) {
    for (key, value) in incoming {
        match base.get_mut(&key) {
            Some(existing) => deep_merge(existing, value, precedence),
            None => {
                if !value.is_null() {
                    base.insert(key, value);
                }
            }
        }
    }
}

/// Pure variant of [`deep_merge`].
pub fn merged(base: &Value, incoming: &Value, precedence: Precedence) -> Value {
    let mut out = base.clone();
    deep_merge(&mut out, incoming.clone(), precedence);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keep_existing_only_fills_gaps() {
        let parent = json!({"type": "string", "nested": {"a": 1}});
        let child = json!({"type": "integer", "required": true, "nested": {"a": 2, "b": 3}});
        let out = merged(&parent, &child, Precedence::KeepExisting);
        assert_eq!(
            out,
            json!({"type": "string", "nested": {"a": 1, "b": 3}, "required": true})
        );
    }

    #[test]
    fn take_incoming_overrides_leaves_but_keeps_unique_keys() {
        let parent = json!({"description": "kernel copy", "meta": {"owner": "kernel", "x": 1}});
        let child = json!({"meta": {"x": 2}, "commandType": "native-method"});
        let out = merged(&parent, &child, Precedence::TakeIncoming);
        assert_eq!(
            out,
            json!({
                "description": "kernel copy",
                "meta": {"owner": "kernel", "x": 2},
                "commandType": "native-method"
            })
        );
    }

    #[test]
    fn null_never_deletes() {
        let base = json!({"a": 1});
        assert_eq!(
            merged(&base, &json!({"a": null}), Precedence::TakeIncoming),
            json!({"a": 1})
        );
    }

    #[test]
    fn arrays_are_leaves() {
        let base = json!({"examples": ["a"]});
        let out = merged(&base, &json!({"examples": ["b"]}), Precedence::TakeIncoming);
        assert_eq!(out, json!({"examples": ["b"]}));
    }
}
