//! Session state.
//!
//! A flat key/value map seeded from the manifest's `stateDefaults`. The
//! parser and chain templates read it; only side-effect application writes
//! to it. Hosts own the value and pass it by `&mut`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    values: Map<String, Value>,
}

impl State {
    pub fn new() -> Self {
        State::default()
    }

    pub fn from_defaults(defaults: &Map<String, Value>) -> Self {
        State {
            values: defaults.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Present and not `null`.
    pub fn has_value(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn snapshot(&self) -> Value {
        Value::Object(self.values.clone())
    }
}
