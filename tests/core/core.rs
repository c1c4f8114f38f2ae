use carapace::core::config::EngineConfig;
use carapace::core::error::{CarapaceError, ParseError, ValidationError};
use carapace::core::manifest::{CommandType, load_manifest};
use carapace::{ContractEngine, ParseContext, State, handler_fn, parse};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write(dir: &Path, file: &str, value: Value) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(file), serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

/// root
/// ├── contract.json   sources: {shared: "shared"}, targets: {core: "core"}
/// ├── commands.json   train, status
/// ├── shared/         a `status` default and a `ping` command
/// └── core/           `core/status` plus a child override of `core/status`
fn build_tree(root: &Path) {
    write(
        root,
        "contract.json",
        json!({
            "name": "textgen",
            "version": "2.1.0",
            "stateDefaults": {"lastFile": "default.txt"},
            "sources": {"shared": "shared"},
            "targets": {"core": "core"}
        }),
    );
    write(
        root,
        "commands.json",
        json!({
            "train": {
                "commandType": "internal",
                "parameters": {
                    "file": {"type": "string", "required": true, "runtimeFallback": "lastFile"},
                    "modelType": {"type": "string", "required": true, "enum": ["markov", "vlmm"]},
                    "order": {"type": "integer", "default": 2, "min": 1, "max": 10}
                }
            },
            "status": {"description": "Parent status"},
            "core/status": {"description": "Parent view of core status", "syntax": "core/status()"}
        }),
    );
    write(
        &root.join("shared"),
        "contract.json",
        json!({"name": "shared", "version": "9.9.9", "prompt": "> "}),
    );
    write(
        &root.join("shared"),
        "commands.json",
        json!({
            "status": {"description": "Shared status", "successOutput": "ok"},
            "ping": {"parameters": {"n": {"type": "integer|string"}}}
        }),
    );
    write(&root.join("core"), "contract.json", json!({"name": "core"}));
    write(
        &root.join("core"),
        "commands.json",
        json!({"status": {"description": "Core status"}, "reset": {}}),
    );
}

#[test]
fn sources_are_defaults_and_targets_override() {
    let tmp = tempdir().unwrap();
    build_tree(tmp.path());
    let manifest = load_manifest(tmp.path()).unwrap();

    // root metadata wins over the source's; the source fills gaps
    assert_eq!(manifest.name, "textgen");
    assert_eq!(manifest.version, "2.1.0");
    assert_eq!(manifest.prompt.as_deref(), Some("> "));

    let status = manifest.get("status").unwrap();
    assert_eq!(status.description.as_deref(), Some("Parent status"));
    assert_eq!(status.success_output.as_deref(), Some("ok"));
    assert!(manifest.contains("ping"));

    // target subtree: names are prefixed and the child wins conflicts
    let core_status = manifest.get("core/status").unwrap();
    assert_eq!(core_status.description.as_deref(), Some("Core status"));
    assert_eq!(core_status.syntax.as_deref(), Some("core/status()"));
    assert!(manifest.contains("core/reset"));
    assert!(!manifest.contains("reset"));

    assert_eq!(manifest.get("train").unwrap().command_type, CommandType::Internal);
}

#[test]
fn broken_subtree_is_skipped_not_fatal() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    write(
        root,
        "contract.json",
        json!({"name": "r", "sources": {"gone": "missing", "escape": "../../elsewhere"}, "targets": {"bad": "bad"}}),
    );
    write(root, "commands.json", json!({"hello": {}}));
    fs::create_dir_all(root.join("bad")).unwrap();
    fs::write(root.join("bad").join("contract.json"), "{ not json").unwrap();

    let manifest = load_manifest(root).unwrap();
    assert_eq!(manifest.command_names().collect::<Vec<_>>(), vec!["hello"]);
}

#[test]
fn child_trees_need_no_contract_of_their_own() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    write(
        root,
        "contract.json",
        json!({"name": "r", "sources": {"lib": "lib"}, "targets": {"ns": "ns"}}),
    );
    write(&root.join("lib"), "commands.json", json!({"fromlib": {"description": "from lib"}}));
    write(&root.join("ns"), "commands.json", json!({"x": {}}));
    write(&root.join("ns"), "help.json", json!({"x": {"description": "namespaced"}}));

    let manifest = load_manifest(root).unwrap();
    assert_eq!(
        manifest.command_names().collect::<Vec<_>>(),
        vec!["fromlib", "ns/x"]
    );
    assert_eq!(manifest.get("fromlib").unwrap().description.as_deref(), Some("from lib"));
    assert_eq!(manifest.get("ns/x").unwrap().description.as_deref(), Some("namespaced"));
}

#[test]
fn missing_root_descriptor_is_fatal() {
    let tmp = tempdir().unwrap();
    let err = ContractEngine::load(tmp.path()).unwrap_err();
    assert!(matches!(err, CarapaceError::MissingDescriptor(_)));
}

#[test]
fn three_grammars_produce_the_same_command() {
    let tmp = tempdir().unwrap();
    build_tree(tmp.path());
    let manifest = load_manifest(tmp.path()).unwrap();
    let state = State::new();
    let ctx = ParseContext {
        manifest: &manifest,
        state: &state,
    };

    let expected = json!({"file": "c.txt", "modelType": "markov", "order": 3});
    for input in [
        r#"train({ file: "c.txt", modelType: "markov", order: 3 })"#,
        r#"train({"file": "c.txt", "modelType": "markov", "order": "3"})"#,
        r#"train("c.txt", "markov", order=3)"#,
        r#"train(modeltype=markov, FILE="c.txt", order=3)"#,
    ] {
        let parsed = parse(input, &ctx).unwrap();
        assert_eq!(parsed.name, "train", "{}", input);
        assert_eq!(Value::Object(parsed.args), expected, "{}", input);
    }
}

#[test]
fn train_scenario() {
    let tmp = tempdir().unwrap();
    build_tree(tmp.path());
    let manifest = load_manifest(tmp.path()).unwrap();
    let state = State::new();
    let ctx = ParseContext {
        manifest: &manifest,
        state: &state,
    };

    let parsed = parse(r#"train("c.txt", "markov")"#, &ctx).unwrap();
    assert_eq!(
        serde_json::to_value(&parsed).unwrap(),
        json!({"name": "train", "args": {"file": "c.txt", "modelType": "markov", "order": 2}})
    );

    let err = parse(r#"train("c.txt", "bogus")"#, &ctx).unwrap_err();
    match err {
        ParseError::Validation(ValidationError::NotInEnum { parameter, allowed, .. }) => {
            assert_eq!(parameter, "modelType");
            assert_eq!(allowed, vec!["markov", "vlmm"]);
        }
        other => panic!("expected enum error, got {:?}", other),
    }

    let err = parse(r#"train("c.txt", "markov", order=11)"#, &ctx).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("order") && msg.contains("at most 10"), "{}", msg);
}

#[test]
fn runtime_fallback_reads_session_state() {
    let tmp = tempdir().unwrap();
    build_tree(tmp.path());
    let engine = ContractEngine::builder(load_manifest(tmp.path()).unwrap())
        .handler("train", handler_fn(|inv| Ok(Value::Object(inv.args.clone()))))
        .build();

    // stateDefaults seed the fallback
    let mut state = engine.new_state();
    let result = engine.execute_line("train(modelType=vlmm)", &mut state);
    assert_eq!(result.error, None);
    assert_eq!(result.output["file"], json!("default.txt"));

    // explicit args still win
    state.set("lastFile", json!("other.txt"));
    let parsed = engine.parse(r#"train("mine.txt", "vlmm")"#, &state).unwrap();
    assert_eq!(parsed.args["file"], json!("mine.txt"));
    let parsed = engine.parse("train(modelType=vlmm)", &state).unwrap();
    assert_eq!(parsed.args["file"], json!("other.txt"));

    // with neither, every missing required param is listed
    let empty = State::new();
    let err = engine.parse("train", &empty).unwrap_err();
    assert_eq!(err.to_string(), "Missing required parameters: file, modelType");
}

#[test]
fn union_tries_integer_before_string() {
    let tmp = tempdir().unwrap();
    build_tree(tmp.path());
    let engine = ContractEngine::builder(load_manifest(tmp.path()).unwrap()).build();
    let state = engine.new_state();

    let parsed = engine.parse(r#"ping(n="42")"#, &state).unwrap();
    assert_eq!(parsed.args["n"], json!(42));
    let parsed = engine.parse("ping(n=forty)", &state).unwrap();
    assert_eq!(parsed.args["n"], json!("forty"));
}

#[test]
fn config_file_and_env_overrides() {
    let tmp = tempdir().unwrap();
    fs::write(
        tmp.path().join("carapace.toml"),
        "[engine]\nmax_chain_depth = 4\n\n[trace]\nenabled = true\n",
    )
    .unwrap();
    let mut config = EngineConfig::load(&tmp.path().join("carapace.toml")).unwrap();
    assert_eq!(config.engine.max_chain_depth, 4);
    assert!(config.trace.enabled);
    assert!(!config.engine.allow_external);

    config
        .apply_overrides(|key| match key {
            "CARAPACE_ALLOW_EXTERNAL" => Some("true".to_string()),
            "CARAPACE_MAX_CHAIN_DEPTH" => Some("8".to_string()),
            _ => None,
        })
        .unwrap();
    assert!(config.engine.allow_external);
    assert_eq!(config.engine.max_chain_depth, 8);

    fs::write(tmp.path().join("broken.toml"), "[engine\n").unwrap();
    assert!(matches!(
        EngineConfig::load(&tmp.path().join("broken.toml")),
        Err(CarapaceError::ConfigError(_))
    ));
}
