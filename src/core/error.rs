use std::io;
use thiserror::Error;

/// Umbrella error for the engine. Descriptor failures originate here; the
/// narrower families below convert into it with `?`.
#[derive(Error, Debug)]
pub enum CarapaceError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Missing required descriptor: {0}")]
    MissingDescriptor(String),
    #[error("Invalid descriptor {path}: {message}")]
    InvalidDescriptor { path: String, message: String },
    #[error("Path error: {0}")]
    PathError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unknown command: '{0}'")]
    UnknownCommand(String),
    #[error("Invalid command syntax: {0}")]
    InvalidSyntax(String),
    #[error("Malformed arguments for '{command}': {message}")]
    MalformedArguments { command: String, message: String },
    #[error("Unknown parameter '{parameter}' for command '{command}'")]
    UnknownParameter { command: String, parameter: String },
    #[error(
        "Too many positional arguments for '{command}': unexpected value {value} after all required parameters were filled"
    )]
    TooManyPositional { command: String, value: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown parameter: '{0}'")]
    UnknownParameter(String),
    #[error("Missing required parameters: {}", .0.join(", "))]
    MissingRequired(Vec<String>),
    #[error("Parameter '{parameter}' declares unknown type '{type_name}'")]
    UnknownType { parameter: String, type_name: String },
    #[error("Invalid type for parameter '{parameter}': expected {expected}, got {got}")]
    TypeMismatch {
        parameter: String,
        expected: String,
        got: String,
    },
    #[error("Invalid value for parameter '{parameter}': {value} (allowed: {})", .allowed.join(", "))]
    NotInEnum {
        parameter: String,
        value: String,
        allowed: Vec<String>,
    },
    #[error("Parameter '{parameter}' must be {bound}, got {value}")]
    OutOfRange {
        parameter: String,
        bound: String,
        value: String,
    },
    #[error("Blob parameter '{parameter}' {message}")]
    Blob { parameter: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("No handler registered for command '{0}'")]
    HandlerNotFound(String),
    #[error("Command '{command}' failed: {message}{}", chain_suffix(.chain_origin))]
    HandlerFailed {
        command: String,
        message: String,
        chain_origin: Option<String>,
    },
}

fn chain_suffix(origin: &Option<String>) -> String {
    match origin {
        Some(name) => format!(" (chain started by '{}')", name),
        None => String::new(),
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("Failed to construct next command: {0}")]
    Construct(String),
    #[error("Chain depth exceeded: '{command}' would run at depth {depth} (max {max})")]
    DepthExceeded {
        command: String,
        depth: usize,
        max: usize,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Unterminated template expression starting at byte {0}")]
    Unterminated(usize),
    #[error("Unknown template filter '{0}'")]
    UnknownFilter(String),
    #[error("Invalid condition '{expr}': {message}")]
    Condition { expr: String, message: String },
}

/// Error returned by a command handler. Converted by the router into
/// `ExecutionError::HandlerFailed`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError(message.into())
    }
}

impl From<io::Error> for HandlerError {
    fn from(e: io::Error) -> Self {
        HandlerError(e.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError(e.to_string())
    }
}
