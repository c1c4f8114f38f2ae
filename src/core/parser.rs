//! Command-line parser.
//!
//! Three grammars, tried in order:
//!
//! 1. object style: `name({key: value, ...})`, or a single scalar expanded
//!    through the command's `transform` rule
//! 2. function style: `name(positional, key=value, ...)`
//! 3. simple style: `name`
//!
//! Every parsed command then goes through runtime fallbacks and validation,
//! so a [`ParsedCommand`] always carries normalized args.

use crate::core::condition;
use crate::core::error::ParseError;
use crate::core::literal;
use crate::core::manifest::{CommandSpec, Manifest};
use crate::core::state::State;
use crate::core::template;
use crate::core::validate;
use crate::core::values;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

static IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-.]*(/[A-Za-z_][A-Za-z0-9_\-.]*)*$").unwrap()
});
static ARG_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$\-]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ParsedCommand {
    pub fn new(name: impl Into<String>, args: Map<String, Value>) -> Self {
        ParsedCommand {
            name: name.into(),
            args,
        }
    }
}

pub struct ParseContext<'a> {
    pub manifest: &'a Manifest,
    pub state: &'a State,
}

/// Parse and validate one input line.
pub fn parse(input: &str, ctx: &ParseContext<'_>) -> Result<ParsedCommand, ParseError> {
    let raw = parse_syntax(input, ctx.manifest)?;
    let spec = ctx
        .manifest
        .get(&raw.name)
        .ok_or_else(|| ParseError::UnknownCommand(raw.name.clone()))?;
    let args = validate::prepare_args(&raw.args, &spec.parameters, ctx.state)?;
    Ok(ParsedCommand::new(raw.name, args))
}

/// Syntax only: name lookup and raw args, no fallbacks or validation.
pub fn parse_syntax(input: &str, manifest: &Manifest) -> Result<ParsedCommand, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::InvalidSyntax("empty input".to_string()));
    }

    let Some(open) = input.find('(') else {
        let spec = lookup(input, manifest)?;
        return Ok(ParsedCommand::new(spec.name.clone(), Map::new()));
    };
    if !input.ends_with(')') {
        return Err(ParseError::InvalidSyntax(format!(
            "'{}' is missing a closing parenthesis",
            input
        )));
    }
    let spec = lookup(input[..open].trim(), manifest)?;
    let body = input[open + 1..input.len() - 1].trim();
    if body.is_empty() {
        return Ok(ParsedCommand::new(spec.name.clone(), Map::new()));
    }

    let args = match parse_object_style(body, spec)? {
        Some(args) => args,
        None => parse_function_style(body, spec)?,
    };
    Ok(ParsedCommand::new(spec.name.clone(), args))
}

fn lookup<'m>(name: &str, manifest: &'m Manifest) -> Result<&'m CommandSpec, ParseError> {
    if !IDENT.is_match(name) {
        return Err(ParseError::InvalidSyntax(format!(
            "'{}' is not a valid command name",
            name
        )));
    }
    manifest
        .get(name)
        .ok_or_else(|| ParseError::UnknownCommand(name.to_string()))
}

/// `Ok(None)` declines and lets function style have a go.
fn parse_object_style(body: &str, spec: &CommandSpec) -> Result<Option<Map<String, Value>>, ParseError> {
    let Ok(value) = literal::parse_json_or_literal(body) else {
        return Ok(None);
    };
    match value {
        Value::Object(map) => Ok(Some(map)),
        scalar => apply_transform(scalar, spec),
    }
}

fn apply_transform(value: Value, spec: &CommandSpec) -> Result<Option<Map<String, Value>>, ParseError> {
    let mut required = spec.required_params();
    let (Some((name, param)), None) = (required.next(), required.next()) else {
        return Ok(None);
    };
    let Some(transform) = &param.transform else {
        return Ok(None);
    };

    let coerced = validate::normalize_value(name, param, value)?;
    let ctx = json!({
        "value": coerced,
        "parameter": name,
        "command": spec.name,
    });
    let malformed = |message: String| ParseError::MalformedArguments {
        command: spec.name.clone(),
        message,
    };
    let use_then = match &transform.when {
        Some(when) => condition::evaluate(when, &ctx).map_err(|e| malformed(e.to_string()))?,
        None => true,
    };
    let chosen = if use_then {
        Some(&transform.then)
    } else {
        transform.otherwise.as_ref()
    };
    let rendered = match chosen {
        Some(tpl) => template::render_json(tpl, &ctx).map_err(|e| malformed(e.to_string()))?,
        None => ctx["value"].clone(),
    };

    Ok(Some(match rendered {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(name.clone(), other);
            map
        }
    }))
}

fn parse_function_style(body: &str, spec: &CommandSpec) -> Result<Map<String, Value>, ParseError> {
    let tokens = values::split_top_level(body, ',').map_err(|message| ParseError::MalformedArguments {
        command: spec.name.clone(),
        message,
    })?;

    let mut keyed = Map::new();
    let mut positional = Vec::new();
    for token in tokens.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        let key_split = values::find_top_level_eq(token)
            .map(|eq| (token[..eq].trim(), &token[eq + 1..]))
            .filter(|(key, _)| ARG_KEY.is_match(key));
        match key_split {
            Some((key, raw)) => {
                let (declared, _) = spec.find_param(key).ok_or_else(|| ParseError::UnknownParameter {
                    command: spec.name.clone(),
                    parameter: key.to_string(),
                })?;
                keyed.insert(declared.clone(), values::normalize_token(raw));
            }
            None => positional.push(token),
        }
    }

    let mut free_slots = spec
        .required_params()
        .map(|(name, _)| name)
        .filter(|name| !keyed.contains_key(name.as_str()));
    let mut args = Map::new();
    for token in positional {
        let slot = free_slots.next().ok_or_else(|| ParseError::TooManyPositional {
            command: spec.name.clone(),
            value: token.to_string(),
        })?;
        args.insert(slot.clone(), values::normalize_token(token));
    }
    for (key, value) in keyed {
        args.insert(key, value);
    }
    Ok(args)
}
