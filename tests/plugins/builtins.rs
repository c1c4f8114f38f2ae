use carapace::core::config::EngineConfig;
use carapace::core::manifest::load_manifest;
use carapace::{ContractEngine, handler_fn};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write(dir: &Path, file: &str, value: Value) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(file), serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

fn fixture(root: &Path) {
    write(root, "contract.json", json!({"name": "plugins", "targets": {"core": "core"}}));
    write(
        root,
        "commands.json",
        json!({
            "help": {"commandType": "internal", "parameters": {"command": {"type": "string"}}},
            "echo": {"commandType": "internal"},
            "train": {
                "commandType": "external-method",
                "source": "bin/train.sh",
                "methodName": "train",
                "parameters": {"file": {"type": "string", "required": true}}
            }
        }),
    );
    write(root, "help.json", json!({"train": {"description": "Train a model", "examples": ["train(\"c.txt\")"]}}));
    write(&root.join("core"), "contract.json", json!({"name": "core"}));
    write(
        &root.join("core"),
        "commands.json",
        json!({"state": {"commandType": "internal", "parameters": {"key": {"type": "string"}}}}),
    );
}

#[test]
fn help_lists_and_describes_commands() {
    let tmp = tempdir().unwrap();
    fixture(tmp.path());
    let engine = ContractEngine::builder(load_manifest(tmp.path()).unwrap()).build();
    let mut state = engine.new_state();

    let overview = engine.execute_line("help", &mut state);
    let text = overview.output.as_str().unwrap();
    assert!(text.starts_with("plugins v0.0.0"), "{}", text);
    let train_line = text.lines().find(|l| l.trim_start().starts_with("train(file)")).unwrap();
    assert!(train_line.ends_with("Train a model"), "{}", text);
    assert!(text.contains("core/state(key?)"), "{}", text);

    let detail = engine.execute_line("help(command=train)", &mut state);
    let text = detail.output.as_str().unwrap();
    assert!(text.contains("file (string, required)"), "{}", text);
    assert!(text.contains("Examples:"), "{}", text);

    let unknown = engine.execute_line("help(command=nope)", &mut state);
    assert_eq!(
        unknown.error.as_deref(),
        Some("Command 'help' failed: Unknown command: 'nope'")
    );
}

#[test]
fn namespaced_state_builtin_and_host_override() {
    let tmp = tempdir().unwrap();
    fixture(tmp.path());
    let engine = ContractEngine::builder(load_manifest(tmp.path()).unwrap())
        .handler("echo", handler_fn(|_| Ok(json!("host echo"))))
        .build();
    let mut state = engine.new_state();
    state.set("model", json!("poe"));

    let result = engine.execute_line("core/state", &mut state);
    assert_eq!(result.output, json!({"model": "poe"}));
    let result = engine.execute_line("echo", &mut state);
    assert_eq!(result.output, json!("host echo"));
}

#[test]
fn external_methods_need_opt_in() {
    let tmp = tempdir().unwrap();
    fixture(tmp.path());
    let engine = ContractEngine::builder(load_manifest(tmp.path()).unwrap()).build();
    assert!(!engine.registry().contains("train"));
    let train = engine.manifest().get("train").unwrap();
    let resolved = train.resolved_absolute_path.as_ref().unwrap();
    assert!(resolved.ends_with("bin/train.sh"));
}

#[cfg(unix)]
#[test]
fn external_method_runs_as_subprocess() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempdir().unwrap();
    fixture(tmp.path());
    let script = tmp.path().join("bin").join("train.sh");
    fs::create_dir_all(script.parent().unwrap()).unwrap();
    fs::write(
        &script,
        "#!/bin/sh\nread -r input\nprintf '{\"method\":\"%s\",\"input\":%s}' \"$1\" \"$input\"\n",
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = EngineConfig::default();
    config.engine.allow_external = true;
    let engine = ContractEngine::builder(load_manifest(tmp.path()).unwrap())
        .config(config)
        .build();
    let mut state = engine.new_state();
    let result = engine.execute_line(r#"train("c.txt")"#, &mut state);
    assert_eq!(result.error, None);
    assert_eq!(
        result.output,
        json!({"method": "train", "input": {"file": "c.txt"}})
    );
}
