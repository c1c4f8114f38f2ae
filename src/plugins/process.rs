//! Subprocess handler for `external-method` commands.
//!
//! The executable at `resolvedAbsolutePath` runs with `methodName` as its
//! first argument and the validated args on stdin as JSON. Stdout is read
//! back as JSON, or as trimmed text when it isn't JSON.

use crate::core::error::HandlerError;
use crate::core::handler::{Handler, HandlerRegistry, Invocation};
use crate::core::manifest::{CommandType, Manifest};
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ProcessHandler {
    pub program: PathBuf,
    pub method: Option<String>,
    pub working_dir: PathBuf,
}

impl Handler for ProcessHandler {
    fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, HandlerError> {
        let mut cmd = Command::new(&self.program);
        if let Some(method) = &self.method {
            cmd.arg(method);
        }
        debug!(command = invocation.command, program = %self.program.display(), "spawning");
        let mut child = cmd
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HandlerError::new(format!("cannot start {}: {}", self.program.display(), e)))?;

        let payload = serde_json::to_vec(invocation.args)?;
        let stdin = child.stdin.take();
        // Stdin is fed from its own thread while stdout and stderr drain here,
        // otherwise a child that writes before reading can fill both pipes.
        let output = thread::scope(|scope| {
            if let Some(mut stdin) = stdin {
                scope.spawn(move || {
                    // The child may exit without reading stdin; that is its call.
                    if let Err(e) = stdin.write_all(&payload) {
                        debug!(error = %e, "child closed stdin early");
                    }
                });
            }
            child.wait_with_output()
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let detail = stderr.trim();
            return Err(HandlerError::new(if detail.is_empty() {
                format!("exited with status {}", code)
            } else {
                format!("exited with status {}: {}", code, detail)
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = stdout.trim();
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
    }
}

/// Bind a [`ProcessHandler`] to every `external-method` command with a
/// resolved path and no handler yet.
pub fn register(manifest: &Manifest, registry: &mut HandlerRegistry) -> usize {
    let mut bound = 0;
    for spec in manifest.commands.values() {
        if spec.command_type != CommandType::ExternalMethod || registry.contains(&spec.name) {
            continue;
        }
        let Some(program) = &spec.resolved_absolute_path else {
            continue;
        };
        registry.register(
            spec.name.clone(),
            ProcessHandler {
                program: program.clone(),
                method: spec.method_name.clone(),
                working_dir: manifest.root.clone(),
            },
        );
        bound += 1;
    }
    bound
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::manifest::CommandSpec;
    use crate::core::state::State;
    use serde_json::{Map, json};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn run(handler: &ProcessHandler, args: Value) -> Result<Value, HandlerError> {
        let manifest = Manifest::new("p");
        let spec = CommandSpec::new("ext");
        let state = State::new();
        let args: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
        handler.execute(&Invocation {
            command: "ext",
            args: &args,
            spec: &spec,
            manifest: &manifest,
            state: &state,
        })
    }

    #[test]
    fn stdin_json_round_trips_through_cat() {
        let tmp = tempdir().unwrap();
        let handler = ProcessHandler {
            program: script(tmp.path(), "cat.sh", "cat"),
            method: None,
            working_dir: tmp.path().to_path_buf(),
        };
        assert_eq!(run(&handler, json!({"n": 1})).unwrap(), json!({"n": 1}));
    }

    #[test]
    fn method_name_is_first_argument() {
        let tmp = tempdir().unwrap();
        let handler = ProcessHandler {
            program: script(tmp.path(), "m.sh", "echo \"method: $1\""),
            method: Some("train".into()),
            working_dir: tmp.path().to_path_buf(),
        };
        assert_eq!(run(&handler, json!({})).unwrap(), json!("method: train"));
    }

    #[test]
    fn large_output_before_reading_large_input() {
        let tmp = tempdir().unwrap();
        // 256 KiB of output first, then drain stdin
        let handler = ProcessHandler {
            program: script(
                tmp.path(),
                "chatty.sh",
                "head -c 262144 /dev/zero | tr '\\0' 'a'\ncat > /dev/null",
            ),
            method: None,
            working_dir: tmp.path().to_path_buf(),
        };
        let text = "z".repeat(256 * 1024);
        let out = run(&handler, json!({"text": text})).unwrap();
        assert_eq!(out.as_str().map(str::len), Some(256 * 1024));
    }

    #[test]
    fn nonzero_exit_carries_stderr() {
        let tmp = tempdir().unwrap();
        let handler = ProcessHandler {
            program: script(tmp.path(), "fail.sh", "echo 'no corpus' >&2; exit 3"),
            method: None,
            working_dir: tmp.path().to_path_buf(),
        };
        let err = run(&handler, json!({})).unwrap_err();
        assert_eq!(err.to_string(), "exited with status 3: no corpus");
    }

    #[test]
    fn only_external_methods_with_paths_bind() {
        let mut ext = CommandSpec::new("train");
        ext.command_type = CommandType::ExternalMethod;
        ext.resolved_absolute_path = Some(PathBuf::from("/bin/true"));
        let mut pathless = CommandSpec::new("pathless");
        pathless.command_type = CommandType::ExternalMethod;
        let manifest = Manifest::new("p")
            .with_command(ext)
            .with_command(pathless)
            .with_command(CommandSpec::new("other"));
        let mut registry = HandlerRegistry::new();
        assert_eq!(register(&manifest, &mut registry), 1);
        assert!(registry.contains("train"));
    }
}
