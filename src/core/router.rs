//! Execution router and chainer.
//!
//! One invocation walks `validate → execute → side effects → next` for the
//! command it was given, then for every command selected by a `next` rule,
//! until no rule matches, something fails, or the chain gets too deep. All
//! failures come back as a [`CommandResult`] with `error` set.

use crate::core::condition;
use crate::core::config::EngineConfig;
use crate::core::error::{ChainError, ExecutionError, ParseError, TemplateError, ValidationError};
use crate::core::handler::{HandlerResolver, Invocation};
use crate::core::manifest::{CommandSpec, Manifest, SideEffects};
use crate::core::parser::ParsedCommand;
use crate::core::state::State;
use crate::core::template;
use crate::core::trace::{TraceEvent, TraceRecorder};
use crate::core::validate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub error: Option<String>,
    pub output: Value,
    /// The host should end the session.
    #[serde(default)]
    pub exit: bool,
    /// Every command executed, in order.
    #[serde(default)]
    pub chain: Vec<String>,
}

impl CommandResult {
    pub fn success(output: Value) -> Self {
        CommandResult {
            error: None,
            output,
            exit: false,
            chain: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        CommandResult {
            error: Some(message.into()),
            output: Value::Null,
            exit: false,
            chain: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// `{name, args, output}` of one executed link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkContext {
    pub name: String,
    pub args: Map<String, Value>,
    pub output: Value,
}

/// What `when` conditions and `resolve` templates can see.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contexts<'a> {
    pub input: &'a Map<String, Value>,
    pub output: &'a Value,
    pub original: &'a LinkContext,
    pub previous: &'a LinkContext,
    pub original_command: &'a str,
    pub previous_command: &'a str,
}

impl Contexts<'_> {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Run `command` and any chain it triggers against `state`.
pub fn run(
    command: ParsedCommand,
    manifest: &Manifest,
    resolver: &dyn HandlerResolver,
    state: &mut State,
    config: &EngineConfig,
) -> CommandResult {
    let recorder = config
        .trace
        .enabled
        .then(|| TraceRecorder::new(config.trace_path(&manifest.root)));
    let max_depth = config.engine.max_chain_depth;

    let mut chain: Vec<String> = Vec::new();
    let mut exit = false;
    let mut original: Option<LinkContext> = None;
    let mut previous: Option<LinkContext> = None;
    let mut current = command;

    loop {
        let depth = chain.len() + 1;
        let origin = original.as_ref().map(|o| o.name.clone());

        if depth > max_depth {
            let err = ChainError::DepthExceeded {
                command: current.name.clone(),
                depth,
                max: max_depth,
            };
            warn!(command = %current.name, depth, max = max_depth, "chain depth exceeded");
            return failed(err.to_string(), chain, exit);
        }

        let Some(spec) = manifest.get(&current.name) else {
            return failed(ParseError::UnknownCommand(current.name.clone()).to_string(), chain, exit);
        };
        debug!(command = %spec.name, depth, origin = origin.as_deref().unwrap_or(&spec.name), "running chain link");

        let args = match validate::prepare_args(&current.args, &spec.parameters, state) {
            Ok(args) => args,
            // a next rule naming a parameter its target never declared
            Err(e @ ValidationError::UnknownParameter(_)) if !chain.is_empty() => {
                return failed(ChainError::Construct(e.to_string()).to_string(), chain, exit);
            }
            Err(e) => return failed(e.to_string(), chain, exit),
        };

        let output = match execute(spec, &args, manifest, resolver, state, origin.as_deref()) {
            Ok(output) => output,
            Err(message) => {
                record(recorder.as_ref(), spec, origin.as_deref(), depth, &args, &Value::Null, Some(&message));
                return failed(message, chain, exit);
            }
        };
        chain.push(spec.name.clone());

        let output = match success_output(spec, &args, output) {
            Ok(output) => output,
            Err(e) => return failed(e.to_string(), chain, exit),
        };

        if let Some(effects) = &spec.side_effects {
            match apply_side_effects(effects, &spec.name, &args, &output, state) {
                Ok(signalled_exit) => exit |= signalled_exit,
                Err(e) => return failed(e.to_string(), chain, exit),
            }
        }
        record(recorder.as_ref(), spec, origin.as_deref(), depth, &args, &output, None);

        let link = LinkContext {
            name: spec.name.clone(),
            args,
            output,
        };
        let original_link = original.get_or_insert_with(|| link.clone()).clone();
        let previous_link = previous.take().unwrap_or_else(|| link.clone());
        let contexts = Contexts {
            input: &link.args,
            output: &link.output,
            original: &original_link,
            previous: &previous_link,
            original_command: &original_link.name,
            previous_command: &previous_link.name,
        };

        let ctx = contexts.to_value();
        match select_next(spec, manifest, &ctx) {
            Ok(Some(next)) => {
                debug!(from = %spec.name, to = %next.name, "chaining");
                current = next;
                previous = Some(link);
            }
            Ok(None) => {
                return CommandResult {
                    error: None,
                    output: link.output,
                    exit,
                    chain,
                };
            }
            Err(e) => return failed(e.to_string(), chain, exit),
        }
    }
}

fn failed(message: String, chain: Vec<String>, exit: bool) -> CommandResult {
    CommandResult {
        error: Some(message),
        output: Value::Null,
        exit,
        chain,
    }
}

fn execute(
    spec: &CommandSpec,
    args: &Map<String, Value>,
    manifest: &Manifest,
    resolver: &dyn HandlerResolver,
    state: &State,
    origin: Option<&str>,
) -> Result<Value, String> {
    let handler = resolver
        .resolve(&spec.name)
        .ok_or_else(|| ExecutionError::HandlerNotFound(spec.name.clone()).to_string())?;
    let invocation = Invocation {
        command: &spec.name,
        args,
        spec,
        manifest,
        state,
    };
    handler.execute(&invocation).map_err(|e| {
        ExecutionError::HandlerFailed {
            command: spec.name.clone(),
            message: e.to_string(),
            chain_origin: origin.map(str::to_string),
        }
        .to_string()
    })
}

/// A `null` output is replaced by the rendered `successOutput`, if any.
fn success_output(spec: &CommandSpec, args: &Map<String, Value>, output: Value) -> Result<Value, TemplateError> {
    match (&spec.success_output, output) {
        (Some(tpl), Value::Null) => {
            let ctx = effect_context(args, &Value::Null);
            Ok(Value::String(template::render(tpl, &ctx)?))
        }
        (_, output) => Ok(output),
    }
}

/// Args plus `output`, the context for side-effect templates.
fn effect_context(args: &Map<String, Value>, output: &Value) -> Value {
    let mut ctx = args.clone();
    ctx.insert("output".to_string(), output.clone());
    Value::Object(ctx)
}

/// Apply `effects` in order: set, clear, conditional clear, then exit.
/// Returns whether the command asked the host to exit.
///
/// Every template and condition is evaluated before `state` is touched, so a
/// failing entry leaves the state as it was.
pub fn apply_side_effects(
    effects: &SideEffects,
    command: &str,
    args: &Map<String, Value>,
    output: &Value,
    state: &mut State,
) -> Result<bool, TemplateError> {
    let ctx = effect_context(args, output);

    let mut assignments = Vec::with_capacity(effects.set_state.len());
    for (key, assignment) in &effects.set_state {
        let value = if let Some(param) = &assignment.from_param {
            match args.get(param) {
                Some(v) => v.clone(),
                None => {
                    debug!(command, key = %key, param = %param, "setState source param absent");
                    continue;
                }
            }
        } else if let Some(tpl) = &assignment.template {
            Value::String(template::render(tpl, &ctx)?)
        } else if let Some(v) = &assignment.value {
            v.clone()
        } else {
            continue;
        };
        assignments.push((key, value));
    }

    let mut conditional_clears = Vec::new();
    for rule in &effects.clear_state_if {
        let param_matches = match (&rule.param, &rule.equals) {
            (Some(param), Some(expected)) => args.get(param).is_some_and(|v| loosely_equal(v, expected)),
            (Some(param), None) => args.get(param).is_some_and(condition::truthy),
            (None, _) => true,
        };
        let when_matches = match &rule.when {
            Some(expr) => condition::evaluate(expr, &ctx)?,
            None => true,
        };
        if param_matches && when_matches {
            conditional_clears.extend(rule.keys.iter());
        }
    }

    for (key, value) in assignments {
        info!(command, key = %key, "state set");
        state.set(key.clone(), value);
    }
    for key in &effects.clear_state {
        if state.remove(key).is_some() {
            info!(command, key = %key, "state cleared");
        }
    }
    for key in conditional_clears {
        if state.remove(key).is_some() {
            info!(command, key = %key, "state cleared by condition");
        }
    }

    Ok(effects.signals_exit())
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), other) | (other, Value::String(s)) if !other.is_string() => {
            template::to_text(Some(other)) == *s
        }
        _ => a == b,
    }
}

/// The first `next` rule whose `when` holds, turned into a command.
pub fn select_next(spec: &CommandSpec, manifest: &Manifest, ctx: &Value) -> Result<Option<ParsedCommand>, ChainError> {
    let Some(rules) = &spec.next else {
        return Ok(None);
    };
    for (target, rule) in rules {
        let selected = match &rule.when {
            Some(expr) => condition::evaluate(expr, ctx).map_err(|e| ChainError::Construct(e.to_string()))?,
            None => true,
        };
        if !selected {
            continue;
        }
        let name = resolve_next_name(target, spec, manifest)
            .ok_or_else(|| ChainError::Construct(ParseError::UnknownCommand(target.clone()).to_string()))?;
        let mut args = Map::new();
        for (param, resolve) in &rule.parameters {
            let value = template::render_json(&resolve.resolve, ctx).map_err(|e| ChainError::Construct(e.to_string()))?;
            args.insert(param.clone(), value);
        }
        return Ok(Some(ParsedCommand::new(name, args)));
    }
    Ok(None)
}

/// As declared, else under the current command's namespace.
fn resolve_next_name(target: &str, spec: &CommandSpec, manifest: &Manifest) -> Option<String> {
    if manifest.contains(target) {
        return Some(target.to_string());
    }
    let qualified = format!("{}/{}", spec.namespace()?, target);
    manifest.contains(&qualified).then_some(qualified)
}

fn record(
    recorder: Option<&TraceRecorder>,
    spec: &CommandSpec,
    origin: Option<&str>,
    depth: usize,
    args: &Map<String, Value>,
    output: &Value,
    error: Option<&str>,
) {
    let Some(recorder) = recorder else {
        return;
    };
    let mut event = TraceEvent::new(
        &spec.name,
        origin.unwrap_or(&spec.name),
        depth,
        Value::Object(args.clone()),
        output.clone(),
    );
    if let Some(error) = error {
        event = event.with_error(error);
    }
    if let Err(e) = recorder.append(event) {
        warn!(path = %recorder.path().display(), error = %e, "failed to write trace event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::HandlerError;
    use crate::core::handler::{HandlerRegistry, handler_fn};
    use crate::core::manifest::{ClearStateIf, NextRule, ParamSpec, ResolveRule, StateAssignment};
    use indexmap::IndexMap;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn next_to(target: &str, when: Option<&str>, params: &[(&str, Value)]) -> (String, NextRule) {
        let parameters: IndexMap<String, ResolveRule> = params
            .iter()
            .map(|(k, v)| (k.to_string(), ResolveRule { resolve: v.clone() }))
            .collect();
        (
            target.to_string(),
            NextRule {
                when: when.map(str::to_string),
                parameters,
            },
        )
    }

    fn chain_manifest() -> Manifest {
        let mut a = CommandSpec::new("a");
        a.next = Some([next_to("b", None, &[("x", json!("{{output}}"))])].into_iter().collect());
        let b = CommandSpec::new("b").with_param("x", ParamSpec::of_type("any").required());
        Manifest::new("chain").with_command(a).with_command(b)
    }

    fn chain_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("a", handler_fn(|_| Ok(json!("42"))));
        registry.register(
            "b",
            handler_fn(|inv| Ok(json!({"got": inv.arg("x").cloned().unwrap_or(Value::Null)}))),
        );
        registry
    }

    #[test]
    fn chain_returns_last_result() {
        let manifest = chain_manifest();
        let mut state = State::new();
        let result = run(
            ParsedCommand::new("a", Map::new()),
            &manifest,
            &chain_registry(),
            &mut state,
            &EngineConfig::default(),
        );
        assert!(result.is_ok(), "{:?}", result.error);
        assert_eq!(result.output, json!({"got": 42}));
        assert_eq!(result.chain, vec!["a", "b"]);
    }

    #[test]
    fn handler_failure_mid_chain_names_origin() {
        let manifest = chain_manifest();
        let mut registry = chain_registry();
        registry.register("b", handler_fn(|_| Err(HandlerError::new("disk full"))));
        let result = run(
            ParsedCommand::new("a", Map::new()),
            &manifest,
            &registry,
            &mut State::new(),
            &EngineConfig::default(),
        );
        assert_eq!(
            result.error.as_deref(),
            Some("Command 'b' failed: disk full (chain started by 'a')")
        );
        assert_eq!(result.output, Value::Null);
        assert_eq!(result.chain, vec!["a"]);
    }

    #[test]
    fn missing_handler() {
        let manifest = chain_manifest();
        let result = run(
            ParsedCommand::new("a", Map::new()),
            &manifest,
            &HandlerRegistry::new(),
            &mut State::new(),
            &EngineConfig::default(),
        );
        assert_eq!(result.error.as_deref(), Some("No handler registered for command 'a'"));
    }

    #[test]
    fn side_effects_run_in_order() {
        let mut effects = SideEffects::default();
        effects.set_state.insert(
            "model".into(),
            StateAssignment {
                template: Some("models/{{file|basename}}.json".into()),
                ..Default::default()
            },
        );
        effects.set_state.insert(
            "lastFile".into(),
            StateAssignment {
                from_param: Some("file".into()),
                ..Default::default()
            },
        );
        effects.set_state.insert(
            "trained".into(),
            StateAssignment {
                value: Some(json!(true)),
                ..Default::default()
            },
        );
        effects.clear_state = vec!["stale".into()];
        effects.clear_state_if = vec![ClearStateIf {
            param: Some("reset".into()),
            equals: Some(json!(true)),
            when: None,
            keys: vec!["trained".into()],
        }];

        let mut state = State::new();
        state.set("stale", json!(1));
        let exit = apply_side_effects(
            &effects,
            "train",
            &args(json!({"file": "corpora/poe.txt", "reset": false})),
            &Value::Null,
            &mut state,
        )
        .unwrap();
        assert!(!exit);
        assert_eq!(
            state.snapshot(),
            json!({"model": "models/poe.json", "lastFile": "corpora/poe.txt", "trained": true})
        );

        apply_side_effects(&effects, "train", &args(json!({"file": "x.txt", "reset": "true"})), &Value::Null, &mut state)
            .unwrap();
        assert!(state.get("trained").is_none());
    }

    #[test]
    fn failing_side_effect_leaves_state_untouched() {
        let mut effects = SideEffects::default();
        effects.set_state.insert(
            "lastFile".into(),
            StateAssignment {
                from_param: Some("file".into()),
                ..Default::default()
            },
        );
        effects.set_state.insert(
            "label".into(),
            StateAssignment {
                template: Some("{{file|upper".into()),
                ..Default::default()
            },
        );
        effects.clear_state = vec!["model".into()];

        let mut state = State::new();
        state.set("model", json!("poe"));
        let before = state.snapshot();
        let err = apply_side_effects(&effects, "load", &args(json!({"file": "a.txt"})), &Value::Null, &mut state);
        assert!(err.is_err());
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn exit_builtin_is_signalled() {
        let effects = SideEffects {
            builtin: Some("exit".into()),
            ..Default::default()
        };
        assert!(apply_side_effects(&effects, "quit", &Map::new(), &Value::Null, &mut State::new()).unwrap());
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut spec = CommandSpec::new("check");
        spec.next = Some(
            [
                next_to("fail", Some("output.ok == false"), &[]),
                next_to("pass", Some("output.ok"), &[("score", json!("{{output.score}}"))]),
                next_to("fallback", None, &[]),
            ]
            .into_iter()
            .collect(),
        );
        let manifest = Manifest::new("m")
            .with_command(spec.clone())
            .with_command(CommandSpec::new("fail"))
            .with_command(CommandSpec::new("pass"))
            .with_command(CommandSpec::new("fallback"));

        let ctx = json!({"output": {"ok": true, "score": 0.9}});
        let next = select_next(&spec, &manifest, &ctx).unwrap().unwrap();
        assert_eq!(next.name, "pass");
        assert_eq!(next.args["score"], json!(0.9));

        let ctx = json!({"output": {}});
        assert_eq!(select_next(&spec, &manifest, &ctx).unwrap().unwrap().name, "fallback");
    }

    #[test]
    fn malformed_rule_is_construct_error() {
        let mut spec = CommandSpec::new("a");
        spec.next = Some([next_to("b", Some("output =="), &[])].into_iter().collect());
        let manifest = Manifest::new("m").with_command(spec.clone()).with_command(CommandSpec::new("b"));
        let err = select_next(&spec, &manifest, &json!({})).unwrap_err();
        assert!(err.to_string().starts_with("Failed to construct next command: "));

        spec.next = Some([next_to("ghost", None, &[])].into_iter().collect());
        let err = select_next(&spec, &manifest, &json!({})).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn undeclared_next_parameter_is_construct_error() {
        let mut a = CommandSpec::new("a");
        a.next = Some([next_to("b", None, &[("y", json!("{{output}}"))])].into_iter().collect());
        let b = CommandSpec::new("b").with_param("x", ParamSpec::of_type("any"));
        let manifest = Manifest::new("m").with_command(a).with_command(b);

        let result = run(
            ParsedCommand::new("a", Map::new()),
            &manifest,
            &chain_registry(),
            &mut State::new(),
            &EngineConfig::default(),
        );
        assert_eq!(
            result.error.as_deref(),
            Some("Failed to construct next command: Unknown parameter: 'y'")
        );
        assert_eq!(result.chain, vec!["a"]);

        // a top-level unknown parameter keeps its plain validation message
        let result = run(
            ParsedCommand::new("b", args(json!({"y": 1}))),
            &manifest,
            &chain_registry(),
            &mut State::new(),
            &EngineConfig::default(),
        );
        assert_eq!(result.error.as_deref(), Some("Unknown parameter: 'y'"));
    }

    #[test]
    fn self_loop_hits_depth_guard() {
        let mut ping = CommandSpec::new("ping");
        ping.next = Some([next_to("ping", None, &[])].into_iter().collect());
        let manifest = Manifest::new("m").with_command(ping);
        let mut registry = HandlerRegistry::new();
        registry.register("ping", handler_fn(|_| Ok(json!("pong"))));
        let mut config = EngineConfig::default();
        config.engine.max_chain_depth = 3;

        let result = run(
            ParsedCommand::new("ping", Map::new()),
            &manifest,
            &registry,
            &mut State::new(),
            &config,
        );
        assert_eq!(
            result.error.as_deref(),
            Some("Chain depth exceeded: 'ping' would run at depth 4 (max 3)")
        );
        assert_eq!(result.chain.len(), 3);
    }
}
