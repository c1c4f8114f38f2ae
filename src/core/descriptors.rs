//! Descriptor store: read-only access to the per-directory JSON slices.
//!
//! Every directory of a descriptor tree may carry up to five files. Only the
//! root's `contract.json` is mandatory; everything else reads as `{}` when
//! absent.

use crate::core::error::CarapaceError;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFile {
    /// Manifest metadata plus `sources` and `targets` links.
    Contract,
    /// Definition properties: commandType, parameter types, defaults, ranges.
    Commands,
    /// Behavioral properties: sideEffects, successOutput, runtimeFallback, transform.
    Runtime,
    /// Descriptive properties: description, examples, syntax.
    Help,
    /// Chaining rules.
    Routes,
}

impl DescriptorFile {
    pub const ALL: [DescriptorFile; 5] = [
        DescriptorFile::Contract,
        DescriptorFile::Commands,
        DescriptorFile::Runtime,
        DescriptorFile::Help,
        DescriptorFile::Routes,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            DescriptorFile::Contract => "contract.json",
            DescriptorFile::Commands => "commands.json",
            DescriptorFile::Runtime => "runtime.json",
            DescriptorFile::Help => "help.json",
            DescriptorFile::Routes => "routes.json",
        }
    }
}

/// Read one descriptor slice from `dir`.
///
/// Returns `Ok(None)` when the file does not exist. A file that exists but is
/// not a JSON object is an `InvalidDescriptor` error.
pub fn read_descriptor(
    dir: &Path,
    file: DescriptorFile,
) -> Result<Option<Map<String, Value>>, CarapaceError> {
    let path = dir.join(file.file_name());
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).map_err(CarapaceError::IoError)?;
    if content.trim().is_empty() {
        return Ok(Some(Map::new()));
    }
    let value: Value =
        serde_json::from_str(&content).map_err(|e| CarapaceError::InvalidDescriptor {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    match value {
        Value::Object(map) => Ok(Some(map)),
        other => Err(CarapaceError::InvalidDescriptor {
            path: path.display().to_string(),
            message: format!("expected a JSON object, found {}", json_kind(&other)),
        }),
    }
}

/// Same as [`read_descriptor`], defaulting a missing file to `{}`.
pub fn read_descriptor_or_empty(
    dir: &Path,
    file: DescriptorFile,
) -> Result<Map<String, Value>, CarapaceError> {
    Ok(read_descriptor(dir, file)?.unwrap_or_default())
}

/// Resolve a `sources`/`targets` link declared in `dir`.
///
/// The relative path must stay inside `dir`'s subtree both lexically and
/// after symlinks are resolved.
pub fn resolve_source_path(dir: &Path, relative: &str) -> Result<PathBuf, CarapaceError> {
    let rel = Path::new(relative);
    if relative.trim().is_empty() {
        return Err(CarapaceError::PathError(format!(
            "empty path declared in {}",
            dir.display()
        )));
    }
    if rel.is_absolute() {
        return Err(CarapaceError::PathError(format!(
            "'{}' is absolute; links must be relative to {}",
            relative,
            dir.display()
        )));
    }

    let mut depth: i64 = 0;
    for component in rel.components() {
        match component {
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(CarapaceError::PathError(format!(
                    "'{}' is not a relative path",
                    relative
                )));
            }
        }
        if depth < 0 {
            return Err(CarapaceError::PathError(format!(
                "'{}' escapes {}",
                relative,
                dir.display()
            )));
        }
    }

    let base = fs::canonicalize(dir).map_err(CarapaceError::IoError)?;
    let target = fs::canonicalize(base.join(rel)).map_err(|e| {
        CarapaceError::PathError(format!("cannot resolve '{}': {}", relative, e))
    })?;
    if !target.starts_with(&base) {
        return Err(CarapaceError::PathError(format!(
            "'{}' resolves outside {}",
            relative,
            base.display()
        )));
    }
    if !target.is_dir() {
        return Err(CarapaceError::PathError(format!(
            "'{}' is not a directory",
            relative
        )));
    }
    Ok(target)
}

/// Lexically normalize `base/relative` without touching the filesystem.
pub fn normalize_join(base: &Path, relative: &str) -> PathBuf {
    let joined = if Path::new(relative).is_absolute() {
        PathBuf::from(relative)
    } else {
        base.join(relative)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
