//! The engine value hosts hold for the life of a process.
//!
//! `ContractEngine` owns the merged manifest, the handler registry and the
//! config. It is `Send + Sync`; session [`State`] stays with the caller.

use crate::core::config::EngineConfig;
use crate::core::error::{CarapaceError, ParseError};
use crate::core::handler::{Handler, HandlerRegistry};
use crate::core::manifest::{self, Manifest};
use crate::core::parser::{self, ParseContext, ParsedCommand};
use crate::core::router::{self, CommandResult};
use crate::core::state::State;
use crate::core::validate;
use crate::plugins::{builtins, process};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ContractEngine {
    manifest: Manifest,
    registry: HandlerRegistry,
    config: EngineConfig,
}

impl ContractEngine {
    /// Load `root` with `carapace.toml` (if any) and environment overrides.
    pub fn load(root: &Path) -> Result<Self, CarapaceError> {
        let config = EngineConfig::discover(root, None)?;
        ContractEngine::load_with_config(root, config)
    }

    pub fn load_with_config(root: &Path, config: EngineConfig) -> Result<Self, CarapaceError> {
        let manifest = manifest::load_manifest_with(root, config.engine.project_root.as_deref())?;
        info!(
            manifest = %manifest.name,
            version = %manifest.version,
            commands = manifest.commands.len(),
            fingerprint = %manifest.fingerprint(),
            "manifest loaded"
        );
        Ok(ContractEngine::builder(manifest).config(config).build())
    }

    pub fn builder(manifest: Manifest) -> EngineBuilder {
        EngineBuilder {
            manifest,
            config: EngineConfig::default(),
            registry: HandlerRegistry::new(),
            builtins: true,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Fresh session state seeded from `stateDefaults`.
    pub fn new_state(&self) -> State {
        State::from_defaults(&self.manifest.state_defaults)
    }

    pub fn parse(&self, input: &str, state: &State) -> Result<ParsedCommand, ParseError> {
        parser::parse(
            input,
            &ParseContext {
                manifest: &self.manifest,
                state,
            },
        )
    }

    /// Validate `args` for `command` without running anything.
    pub fn validate(&self, command: &str, args: &Map<String, Value>) -> Result<Map<String, Value>, CarapaceError> {
        let spec = self
            .manifest
            .get(command)
            .ok_or_else(|| ParseError::UnknownCommand(command.to_string()))?;
        Ok(validate::validate(args, &spec.parameters)?)
    }

    pub fn run(&self, command: ParsedCommand, state: &mut State) -> CommandResult {
        router::run(command, &self.manifest, &self.registry, state, &self.config)
    }

    /// Parse and run one input line. Parse errors come back as a failed result.
    pub fn execute_line(&self, input: &str, state: &mut State) -> CommandResult {
        match self.parse(input, state) {
            Ok(command) => self.run(command, state),
            Err(e) => {
                debug!(input, error = %e, "parse failed");
                CommandResult::failure(e.to_string())
            }
        }
    }
}

pub struct EngineBuilder {
    manifest: Manifest,
    config: EngineConfig,
    registry: HandlerRegistry,
    builtins: bool,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind a handler. Host bindings take priority over built-ins.
    pub fn handler<H>(mut self, name: &str, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.registry.register(name, handler);
        self
    }

    pub fn handler_arc(mut self, name: &str, handler: Arc<dyn Handler>) -> Self {
        self.registry.register_arc(name, handler);
        self
    }

    /// Skip the `help`/`exit`/`state`/`echo` bindings.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    pub fn build(self) -> ContractEngine {
        let EngineBuilder {
            manifest,
            config,
            mut registry,
            builtins,
        } = self;
        if builtins {
            let bound = builtins::register(&manifest, &mut registry);
            debug!(bound, "built-in handlers bound");
        }
        if config.engine.allow_external {
            let bound = process::register(&manifest, &mut registry);
            debug!(bound, "subprocess handlers bound");
        }
        let unbound: Vec<&String> = manifest
            .command_names()
            .filter(|name| !registry.contains(name))
            .collect();
        if !unbound.is_empty() {
            debug!(?unbound, "commands without a handler");
        }
        ContractEngine {
            manifest,
            registry,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handler::handler_fn;
    use crate::core::manifest::{CommandSpec, CommandType, ParamSpec};
    use serde_json::json;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn engine_is_shareable() {
        assert_send_sync::<ContractEngine>();
    }

    fn engine() -> ContractEngine {
        let mut echo = CommandSpec::new("echo").with_param("text", ParamSpec::of_type("string"));
        echo.command_type = CommandType::Internal;
        let manifest = Manifest::new("e")
            .with_command(echo)
            .with_command(CommandSpec::new("add").with_param("a", ParamSpec::of_type("integer").required()));
        ContractEngine::builder(manifest)
            .handler(
                "add",
                handler_fn(|inv| Ok(json!(inv.arg("a").and_then(Value::as_i64).unwrap_or(0) + 1))),
            )
            .build()
    }

    #[test]
    fn execute_line_reports_parse_errors() {
        let engine = engine();
        let mut state = engine.new_state();
        let result = engine.execute_line("add(x=1)", &mut state);
        assert_eq!(
            result.error.as_deref(),
            Some("Unknown parameter 'x' for command 'add'")
        );
        assert_eq!(result.output, Value::Null);

        let result = engine.execute_line("add(41)", &mut state);
        assert_eq!(result.output, json!(42));
    }

    #[test]
    fn builtins_bind_to_internal_commands() {
        let engine = engine();
        assert!(engine.registry().contains("echo"));
        let mut state = engine.new_state();
        let result = engine.execute_line("echo(text=hi)", &mut state);
        assert_eq!(result.output, json!({"text": "hi"}));

        let bare = ContractEngine::builder(engine.manifest().clone())
            .without_builtins()
            .build();
        assert!(!bare.registry().contains("echo"));
    }

    #[test]
    fn validate_without_running() {
        let engine = engine();
        let args = json!({"A": "7"}).as_object().cloned().unwrap();
        assert_eq!(Value::Object(engine.validate("add", &args).unwrap()), json!({"a": 7}));
        assert!(engine.validate("nope", &args).is_err());
    }
}
