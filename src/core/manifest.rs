//! Manifest model and the descriptor-tree merger.
//!
//! A manifest is built once from a directory tree:
//!
//! - Each directory composes its command specs from `commands.json`,
//!   `runtime.json`, `help.json` and `routes.json` (add-only, in that order).
//! - `sources` links merge child trees flat, with the including directory
//!   winning every conflicting leaf.
//! - `targets` links merge child trees under a `namespace/` prefix, with the
//!   child winning conflicting leaves while parent-only properties survive.
//!
//! Missing descriptor files count as empty, except the root `contract.json`.
//! Broken links are logged and skipped.

use crate::core::descriptors::{self, DescriptorFile};
use crate::core::error::CarapaceError;
use crate::core::merge::{self, Precedence};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandType {
    NativeMethod,
    KernelPlugin,
    Internal,
    ExternalMethod,
    #[default]
    Custom,
}

impl CommandType {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::NativeMethod => "native-method",
            CommandType::KernelPlugin => "kernel-plugin",
            CommandType::Internal => "internal",
            CommandType::ExternalMethod => "external-method",
            CommandType::Custom => "custom",
        }
    }

    pub fn needs_resolved_path(self) -> bool {
        matches!(self, CommandType::NativeMethod | CommandType::ExternalMethod)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    #[serde(rename = "type", default = "default_param_type")]
    pub type_decl: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_fallback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<BlobConstraints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_param_type() -> String {
    "string".to_string()
}

impl Default for ParamSpec {
    fn default() -> Self {
        ParamSpec {
            type_decl: default_param_type(),
            required: false,
            default: None,
            allowed: None,
            min: None,
            max: None,
            runtime_fallback: None,
            transform: None,
            constraints: None,
            description: None,
            extra: Map::new(),
        }
    }
}

impl ParamSpec {
    pub fn of_type(type_decl: &str) -> Self {
        ParamSpec {
            type_decl: type_decl.to_string(),
            ..ParamSpec::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_fallback(mut self, state_key: &str) -> Self {
        self.runtime_fallback = Some(state_key.to_string());
        self
    }

    pub fn with_constraints(mut self, constraints: BlobConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }
}

/// Wraps a scalar given in object-call position, e.g. `show(42)` into `{id: 42}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    pub then: Value,
    #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
    pub otherwise: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobConstraints {
    /// Bytes, or a size string such as `"10MB"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideEffects {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub set_state: IndexMap<String, StateAssignment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clear_state: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clear_state_if: Vec<ClearStateIf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<String>,
}

impl SideEffects {
    pub fn signals_exit(&self) -> bool {
        self.builtin.as_deref() == Some("exit")
    }
}

/// One `setState` entry. Exactly one source is expected; `fromParam` is
/// checked first, then `template`, then `value`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateAssignment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearStateIf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NextRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default)]
    pub parameters: IndexMap<String, ResolveRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveRule {
    /// A template string, or a JSON value whose string leaves are templates.
    pub resolve: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub command_type: CommandType,
    #[serde(default)]
    pub parameters: IndexMap<String, ParamSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<SideEffects>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<IndexMap<String, NextRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_absolute_path: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

impl CommandSpec {
    pub fn new(name: &str) -> Self {
        CommandSpec {
            name: name.to_string(),
            ..CommandSpec::default()
        }
    }

    pub fn with_param(mut self, name: &str, spec: ParamSpec) -> Self {
        self.parameters.insert(name.to_string(), spec);
        self
    }

    pub fn required_params(&self) -> impl Iterator<Item = (&String, &ParamSpec)> {
        self.parameters.iter().filter(|(_, p)| p.required)
    }

    /// `a/b` for a command named `a/b/x`.
    pub fn namespace(&self) -> Option<&str> {
        self.name.rsplit_once('/').map(|(ns, _)| ns)
    }

    /// Case-insensitive lookup of a declared parameter, returning its
    /// declared spelling.
    pub fn find_param(&self, key: &str) -> Option<(&String, &ParamSpec)> {
        self.parameters
            .get_key_value(key)
            .or_else(|| {
                self.parameters
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
            })
    }

    /// Usage line for help output: the declared syntax, or one derived
    /// from the parameter list.
    pub fn usage(&self) -> String {
        if let Some(syntax) = &self.syntax {
            return syntax.clone();
        }
        if self.parameters.is_empty() {
            return self.name.clone();
        }
        let parts: Vec<String> = self
            .parameters
            .iter()
            .map(|(name, p)| {
                if p.required {
                    name.clone()
                } else {
                    format!("{}?", name)
                }
            })
            .collect();
        format!("{}({})", self.name, parts.join(", "))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub state_defaults: Map<String, Value>,
    pub commands: IndexMap<String, CommandSpec>,
    #[serde(skip)]
    pub root: PathBuf,
}

impl Manifest {
    /// An empty manifest, mostly for hosts and tests assembling specs by hand.
    pub fn new(name: &str) -> Self {
        Manifest {
            name: name.to_string(),
            version: "0.0.0".to_string(),
            description: None,
            prompt: None,
            state_defaults: Map::new(),
            commands: IndexMap::new(),
            root: PathBuf::new(),
        }
    }

    pub fn with_command(mut self, spec: CommandSpec) -> Self {
        self.commands.insert(spec.name.clone(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn command_names(&self) -> impl Iterator<Item = &String> {
        self.commands.keys()
    }

    /// SHA-256 over the serialized manifest; stable for a fixed tree.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(&bytes))
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Intermediate, untyped form of one directory's merged slices.
#[derive(Debug, Default)]
struct RawManifest {
    meta: Map<String, Value>,
    commands: Map<String, Value>,
}

/// Load and merge the descriptor tree rooted at `root`.
pub fn load_manifest(root: &Path) -> Result<Manifest, CarapaceError> {
    load_manifest_with(root, None)
}

/// As [`load_manifest`], resolving method sources against `project_root`
/// instead of the descriptor root.
pub fn load_manifest_with(
    root: &Path,
    project_root: Option<&Path>,
) -> Result<Manifest, CarapaceError> {
    let contract_path = root.join(DescriptorFile::Contract.file_name());
    if !contract_path.is_file() {
        return Err(CarapaceError::MissingDescriptor(
            contract_path.display().to_string(),
        ));
    }
    let root = fs::canonicalize(root).map_err(CarapaceError::IoError)?;
    let project_root = match project_root {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => descriptors::normalize_join(&root, &p.to_string_lossy()),
        None => root.clone(),
    };

    let mut visiting = Vec::new();
    let raw = load_tree(&root, &mut visiting)?;
    Ok(build_manifest(raw, &root, &project_root))
}

fn load_tree(dir: &Path, visiting: &mut Vec<PathBuf>) -> Result<RawManifest, CarapaceError> {
    // Only the root contract is required; it is checked before recursion starts.
    let mut meta = descriptors::read_descriptor_or_empty(dir, DescriptorFile::Contract)?;
    let sources = take_links(&mut meta, "sources", dir);
    let targets = take_links(&mut meta, "targets", dir);

    let mut raw = RawManifest {
        meta,
        commands: compose_commands(dir)?,
    };

    visiting.push(dir.to_path_buf());
    for (label, relative) in sources {
        match follow_link(dir, &relative, visiting) {
            Ok(child) => {
                debug!(dir = %dir.display(), source = %label, "merging source subtree");
                merge_source(&mut raw, child);
            }
            Err(e) => {
                warn!(dir = %dir.display(), source = %label, link = %relative, error = %e, "skipping source subtree");
            }
        }
    }
    for (namespace, relative) in targets {
        match follow_link(dir, &relative, visiting) {
            Ok(child) => {
                debug!(dir = %dir.display(), target = %namespace, "merging target subtree");
                merge_target(&mut raw, child, &namespace);
            }
            Err(e) => {
                warn!(dir = %dir.display(), target = %namespace, link = %relative, error = %e, "skipping target subtree");
            }
        }
    }
    visiting.pop();

    Ok(raw)
}

fn follow_link(
    dir: &Path,
    relative: &str,
    visiting: &mut Vec<PathBuf>,
) -> Result<RawManifest, CarapaceError> {
    let child_dir = descriptors::resolve_source_path(dir, relative)?;
    if visiting.iter().any(|p| p == &child_dir) {
        return Err(CarapaceError::PathError(format!(
            "'{}' links back to {}",
            relative,
            child_dir.display()
        )));
    }
    load_tree(&child_dir, visiting)
}

/// Remove a `label -> path` map from the contract metadata.
fn take_links(meta: &mut Map<String, Value>, key: &str, dir: &Path) -> Vec<(String, String)> {
    match meta.remove(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(label, path)| match path {
                Value::String(p) => Some((label, p)),
                other => {
                    warn!(dir = %dir.display(), key, label = %label, found = descriptors::json_kind(&other), "ignoring non-string link");
                    None
                }
            })
            .collect(),
        Some(other) => {
            warn!(dir = %dir.display(), key, found = descriptors::json_kind(&other), "ignoring malformed link map");
            Vec::new()
        }
    }
}

/// Compose per-command JSON from the property-bearing files of one directory.
fn compose_commands(dir: &Path) -> Result<Map<String, Value>, CarapaceError> {
    let mut commands = Map::new();
    for file in [
        DescriptorFile::Commands,
        DescriptorFile::Runtime,
        DescriptorFile::Help,
        DescriptorFile::Routes,
    ] {
        let slice = descriptors::read_descriptor_or_empty(dir, file)?;
        for (name, value) in slice {
            let Value::Object(mut props) = value else {
                warn!(dir = %dir.display(), file = file.file_name(), command = %name, "ignoring non-object command entry");
                continue;
            };
            if file == DescriptorFile::Routes {
                props.retain(|k, _| k == "next");
            }
            match commands.get_mut(&name) {
                Some(existing) => {
                    merge::deep_merge(existing, Value::Object(props), Precedence::KeepExisting)
                }
                None => {
                    commands.insert(name, Value::Object(props));
                }
            }
        }
    }
    Ok(commands)
}

/// Flat merge: the including directory (`parent`) wins every leaf.
fn merge_source(parent: &mut RawManifest, child: RawManifest) {
    merge::merge_maps(&mut parent.meta, child.meta, Precedence::KeepExisting);
    for (name, spec) in child.commands {
        match parent.commands.get_mut(&name) {
            Some(existing) => merge::deep_merge(existing, spec, Precedence::KeepExisting),
            None => {
                parent.commands.insert(name, spec);
            }
        }
    }
}

/// Namespaced merge: the child wins conflicting leaves of `namespace/x`,
/// parent-only properties of that command are kept.
fn merge_target(parent: &mut RawManifest, mut child: RawManifest, namespace: &str) {
    if let Some(defaults) = child.meta.remove("stateDefaults") {
        let slot = parent
            .meta
            .entry("stateDefaults")
            .or_insert_with(|| Value::Object(Map::new()));
        merge::deep_merge(slot, defaults, Precedence::KeepExisting);
    }
    for (name, spec) in child.commands {
        let qualified = format!("{}/{}", namespace, name);
        match parent.commands.get_mut(&qualified) {
            Some(existing) => merge::deep_merge(existing, spec, Precedence::TakeIncoming),
            None => {
                parent.commands.insert(qualified, spec);
            }
        }
    }
}

fn build_manifest(raw: RawManifest, root: &Path, project_root: &Path) -> Manifest {
    let meta_str = |key: &str| raw.meta.get(key).and_then(Value::as_str).map(str::to_string);
    let name = meta_str("name").unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "carapace".to_string())
    });
    let version = meta_str("version").unwrap_or_else(|| "0.0.0".to_string());
    let description = meta_str("description");
    let prompt = meta_str("prompt");
    let state_defaults = match raw.meta.get("stateDefaults") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    let mut commands = IndexMap::new();
    for (command_name, value) in raw.commands {
        let mut value = value;
        if let Value::Object(props) = &mut value {
            props.insert("name".to_string(), Value::String(command_name.clone()));
        }
        match serde_json::from_value::<CommandSpec>(value) {
            Ok(mut spec) => {
                if spec.command_type.needs_resolved_path() {
                    if let Some(source) = &spec.source {
                        spec.resolved_absolute_path =
                            Some(descriptors::normalize_join(project_root, source));
                    }
                }
                commands.insert(command_name, spec);
            }
            Err(e) => {
                warn!(command = %command_name, error = %e, "skipping command with invalid spec");
            }
        }
    }

    Manifest {
        name,
        version,
        description,
        prompt,
        state_defaults,
        commands,
        root: root.to_path_buf(),
    }
}
