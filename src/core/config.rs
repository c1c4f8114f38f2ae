//! Engine configuration from `carapace.toml` plus environment overrides.

use crate::core::error::CarapaceError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "carapace.toml";
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub trace: TraceSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Longest permitted chain, counting the command that started it.
    pub max_chain_depth: usize,
    /// Bind subprocess handlers to `external-method` commands.
    pub allow_external: bool,
    /// Base for `resolvedAbsolutePath`; the descriptor root when unset.
    pub project_root: Option<PathBuf>,
}

impl Default for EngineSection {
    fn default() -> Self {
        EngineSection {
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            allow_external: false,
            project_root: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSection {
    pub enabled: bool,
    /// Relative paths are taken from the descriptor root.
    pub path: PathBuf,
}

impl Default for TraceSection {
    fn default() -> Self {
        TraceSection {
            enabled: false,
            path: PathBuf::from(".carapace/traces.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub filter: String,
}

impl Default for LogSection {
    fn default() -> Self {
        LogSection {
            filter: "warn".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, CarapaceError> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| CarapaceError::ConfigError(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Read `path`; a missing file is the default config.
    pub fn load(path: &Path) -> Result<Self, CarapaceError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }
        let content = fs::read_to_string(path).map_err(CarapaceError::IoError)?;
        EngineConfig::from_toml_str(&content).map_err(|e| match e {
            CarapaceError::ConfigError(msg) => {
                CarapaceError::ConfigError(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// `explicit` if given, else `<root>/carapace.toml`; env overrides applied.
    pub fn discover(root: &Path, explicit: Option<&Path>) -> Result<Self, CarapaceError> {
        let path = match explicit {
            Some(p) => {
                if !p.exists() {
                    return Err(CarapaceError::ConfigError(format!(
                        "config file {} does not exist",
                        p.display()
                    )));
                }
                p.to_path_buf()
            }
            None => root.join(CONFIG_FILE),
        };
        let mut config = EngineConfig::load(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `CARAPACE_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), CarapaceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("CARAPACE_MAX_CHAIN_DEPTH") {
            self.engine.max_chain_depth = raw.trim().parse().map_err(|_| {
                CarapaceError::ConfigError(format!(
                    "CARAPACE_MAX_CHAIN_DEPTH must be a positive integer, got '{}'",
                    raw
                ))
            })?;
        }
        if let Some(raw) = lookup("CARAPACE_ALLOW_EXTERNAL") {
            self.engine.allow_external = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(filter) = lookup("CARAPACE_LOG").filter(|f| !f.trim().is_empty()) {
            self.log.filter = filter;
        }
        self.check()
    }

    pub fn trace_path(&self, root: &Path) -> PathBuf {
        if self.trace.path.is_absolute() {
            self.trace.path.clone()
        } else {
            root.join(&self.trace.path)
        }
    }

    fn check(&self) -> Result<(), CarapaceError> {
        if self.engine.max_chain_depth == 0 {
            return Err(CarapaceError::ConfigError(
                "engine.max_chain_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
