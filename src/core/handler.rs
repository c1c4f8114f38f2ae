//! Handler capability and the explicit name → handler registry.

use crate::core::error::HandlerError;
use crate::core::manifest::{CommandSpec, Manifest};
use crate::core::state::State;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Everything a handler may look at. Args are already validated.
pub struct Invocation<'a> {
    pub command: &'a str,
    pub args: &'a Map<String, Value>,
    pub spec: &'a CommandSpec,
    pub manifest: &'a Manifest,
    pub state: &'a State,
}

impl Invocation<'_> {
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }
}

pub trait Handler: Send + Sync {
    fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Invocation<'_>) -> Result<Value, HandlerError> + Send + Sync,
{
    fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, HandlerError> {
        self(invocation)
    }
}

/// Pins a closure to the handler signature so its argument and error types
/// are inferred.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&Invocation<'_>) -> Result<Value, HandlerError> + Send + Sync,
{
    f
}

/// Looks handlers up by command name.
pub trait HandlerResolver {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Handler>>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    /// Bind `handler` to `name`, replacing any earlier binding.
    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> &mut Self
    where
        H: Handler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn register_arc(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.handlers.keys()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl HandlerResolver for HandlerRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn closures_are_handlers() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "double",
            handler_fn(|inv| {
                let n = inv.arg("n").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(n * 2))
            }),
        );
        assert!(registry.contains("double"));
        assert!(registry.resolve("triple").is_none());

        let manifest = Manifest::new("t");
        let spec = CommandSpec::new("double");
        let state = State::new();
        let args = json!({"n": 21}).as_object().cloned().unwrap();
        let inv = Invocation {
            command: "double",
            args: &args,
            spec: &spec,
            manifest: &manifest,
            state: &state,
        };
        let handler = registry.resolve("double").unwrap();
        assert_eq!(handler.execute(&inv).unwrap(), json!(42));
    }

    #[test]
    fn debug_lists_names_only() {
        let mut registry = HandlerRegistry::new();
        registry.register("b", handler_fn(|_| Ok(Value::Null)));
        registry.register("a", handler_fn(|_| Ok(Value::Null)));
        assert_eq!(format!("{:?}", registry), r#"HandlerRegistry { handlers: ["a", "b"] }"#);
    }
}
