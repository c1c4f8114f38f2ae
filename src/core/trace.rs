//! JSONL execution trace: one redacted event per executed chain link.

use crate::core::error::CarapaceError;
use crate::core::time;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: String,
    pub ts: String,
    pub command: String,
    /// First command of the chain this link belongs to.
    pub origin: String,
    /// 1 for the command that started the chain.
    pub depth: usize,
    pub args: Value,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceEvent {
    pub fn new(command: &str, origin: &str, depth: usize, args: Value, output: Value) -> Self {
        TraceEvent {
            trace_id: time::new_event_id(),
            ts: time::now_epoch_z(),
            command: command.to_string(),
            origin: origin.to_string(),
            depth,
            args,
            output,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // AWS access key id
        (
            Regex::new(r"(A3T[A-Z0-9]|AKIA|AGPA|AIDA|AROA|AIPA|ANPA|ANVA|ASIA)[0-9A-Z]{16}")
                .unwrap(),
            "[AWS_KEY_REDACTED]",
        ),
        // GitHub tokens
        (
            Regex::new(r"(ghp|gho|ghu|ghs|ghr)_[a-zA-Z0-9_]{36,255}").unwrap(),
            "[GITHUB_TOKEN_REDACTED]",
        ),
        (
            Regex::new(r"(?i)bearer\s+[a-zA-Z0-9_\-\.]{20,}").unwrap(),
            "[BEARER_REDACTED]",
        ),
        (
            Regex::new(r"-----BEGIN (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----[\s\S]*?-----END (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----").unwrap(),
            "[PEM_KEY_REDACTED]",
        ),
        // user:password@host connection strings
        (
            Regex::new(r#"(?i)[a-z][a-z0-9+.-]*://[^\s'"/]+:[^\s'"/]+@[^\s'"]+"#).unwrap(),
            "[CONNECTION_STRING_REDACTED]",
        ),
        (
            Regex::new(r#"(?i)(password|passwd|pwd|api[_-]?key|secret)['"]?\s*[:=]\s*['"]?[^\s'",]{8,}['"]?"#)
                .unwrap(),
            "[SECRET_REDACTED]",
        ),
    ]
});

const SENSITIVE_KEYS: [&str; 6] = [
    "token",
    "secret",
    "password",
    "api_key",
    "apikey",
    "authorization",
];

pub fn redact_string(input: &str) -> String {
    let mut result = input.to_string();
    for (pattern, replacement) in SECRET_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Redact a JSON value. Sensitive-looking keys lose their whole value;
/// strings are scanned for secret patterns.
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, val) in map {
                let lower = key.to_lowercase();
                if SENSITIVE_KEYS.iter().any(|k| lower.contains(k)) {
                    out.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(key, redact(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        Value::String(s) => Value::String(redact_string(&s)),
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct TraceRecorder {
    path: PathBuf,
}

impl TraceRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TraceRecorder { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: TraceEvent) -> Result<(), CarapaceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(CarapaceError::IoError)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(CarapaceError::IoError)?;

        let event = TraceEvent {
            args: redact(event.args),
            output: redact(event.output),
            error: event.error.map(|e| redact_string(&e)),
            ..event
        };
        let line = serde_json::to_string(&event)
            .map_err(|e| CarapaceError::ConfigError(format!("trace encoding failed: {}", e)))?;
        writeln!(file, "{}", line).map_err(CarapaceError::IoError)?;
        Ok(())
    }

    /// The last `n` raw lines.
    pub fn tail(&self, n: usize) -> Result<Vec<String>, CarapaceError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let content = fs::read_to_string(&self.path).map_err(CarapaceError::IoError)?;
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].to_vec())
    }
}
