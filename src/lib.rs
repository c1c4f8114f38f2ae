//! Carapace: a declarative command-contract engine.
//!
//! A tree of JSON descriptor files is merged into one [`Manifest`]. Input
//! lines are parsed against it in any of three grammars, validated and
//! normalized, routed to a bound [`Handler`], and followed by declared side
//! effects on session [`State`] and declarative `next` chains.
//!
//! # Grammar
//!
//! ```text
//! train({ file: "corpus.txt", order: 3 })   object literal
//! train("corpus.txt", order=3)              function call
//! status                                    bare command
//! ```
//!
//! # Descriptor tree
//!
//! Every directory may carry `contract.json`, `commands.json`,
//! `runtime.json`, `help.json` and `routes.json`. `sources` subtrees are
//! merged as defaults under the parent; `targets` subtrees override the
//! parent and have their command names prefixed with the target path.
//!
//! # Embedding
//!
//! ```no_run
//! use carapace::{ContractEngine, handler_fn};
//! use serde_json::json;
//!
//! let manifest = carapace::load_manifest(std::path::Path::new("descriptors"))?;
//! let engine = ContractEngine::builder(manifest)
//!     .handler("train", handler_fn(|inv| Ok(json!({"trained": inv.arg("file")}))))
//!     .build();
//! let mut state = engine.new_state();
//! let result = engine.execute_line("train(\"corpus.txt\")", &mut state);
//! assert!(result.is_ok());
//! # Ok::<(), carapace::CarapaceError>(())
//! ```

pub mod cli;
pub mod core;
pub mod plugins;

pub use crate::core::config::EngineConfig;
pub use crate::core::engine::{ContractEngine, EngineBuilder};
pub use crate::core::error::{
    CarapaceError, ChainError, ExecutionError, HandlerError, ParseError, TemplateError, ValidationError,
};
pub use crate::core::handler::{Handler, HandlerRegistry, HandlerResolver, Invocation, handler_fn};
pub use crate::core::manifest::{CommandSpec, CommandType, Manifest, ParamSpec, load_manifest};
pub use crate::core::parser::{ParseContext, ParsedCommand, parse};
pub use crate::core::router::CommandResult;
pub use crate::core::state::State;
pub use crate::core::validate::validate;

use crate::cli::{Cli, Command, RpcCli};
use crate::core::descriptors::DescriptorFile;
use crate::core::rpc::{self, RpcRequest};
use crate::core::trace::TraceRecorder;
use crate::core::types::ParamType;
use crate::core::{output, values};
use anyhow::{Context, bail};
use clap::Parser;
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second init (e.g. an embedding host already installed one) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Entry point for the `carapace` binary.
pub fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = EngineConfig::discover(&cli.root, cli.config.as_deref())
        .with_context(|| format!("loading engine config for {}", cli.root.display()))?;
    init_logging(&config.log.filter);

    match cli.command {
        Command::Schema => {
            print_json(&schema())?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Trace { last } => {
            let recorder = TraceRecorder::new(config.trace_path(&cli.root));
            for line in recorder.tail(last)? {
                println!("{}", line);
            }
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let engine = ContractEngine::load_with_config(&cli.root, config)
        .with_context(|| format!("loading descriptors from {}", cli.root.display()))?;

    match cli.command {
        Command::Manifest { format } => match format.as_str() {
            "json" => print_json(&serde_json::to_value(engine.manifest())?)?,
            "text" => println!("{}", output::render_manifest(engine.manifest())),
            other => bail!("unknown format '{}': expected 'text' or 'json'", other),
        },
        Command::Parse { input } => {
            let state = engine.new_state();
            match engine.parse(&input, &state) {
                Ok(parsed) => print_json(&serde_json::to_value(parsed)?)?,
                Err(e) => {
                    print_json(&json!({ "error": e.to_string() }))?;
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Run { input, set } => {
            let mut state = engine.new_state();
            for pair in &set {
                let Some((key, raw)) = pair.split_once('=') else {
                    bail!("--set expects KEY=VALUE, got '{}'", pair);
                };
                state.set(key.trim(), values::normalize_token(raw));
            }
            let result = engine.execute_line(&input, &mut state);
            print_json(&json!({
                "error": result.error,
                "output": result.output,
                "exit": result.exit,
                "chain": result.chain,
                "state": state.snapshot(),
            }))?;
            if !result.is_ok() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Session => run_session(&engine)?,
        Command::Rpc(args) => return run_rpc(&engine, args),
        Command::Schema | Command::Trace { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One command per stdin line; state lives for the whole session.
fn run_session(engine: &ContractEngine) -> anyhow::Result<()> {
    let mut state = engine.new_state();
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();
        if input.is_empty() || input.starts_with('#') {
            continue;
        }
        let result = engine.execute_line(input, &mut state);
        let rendered = output::render_result(&result);
        if !rendered.is_empty() {
            writeln!(stdout, "{}", rendered)?;
        }
        if result.exit {
            break;
        }
    }
    Ok(())
}

fn run_rpc(engine: &ContractEngine, args: RpcCli) -> anyhow::Result<ExitCode> {
    let mut state = engine.new_state();
    if args.stdin {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        for line in stdin.lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(req) => rpc::handle(engine, &mut state, req),
                Err(e) => rpc::error_response(
                    rpc::default_request_id(),
                    String::new(),
                    &Value::Null,
                    "invalid_request",
                    e.to_string(),
                ),
            };
            writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
            if response.exit {
                break;
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let Some(op) = args.op else {
        bail!("rpc needs --op or --stdin");
    };
    let params: Value = match args.params.as_deref() {
        Some(raw) => serde_json::from_str(raw).context("--params is not valid JSON")?,
        None => Value::Null,
    };
    let response = rpc::handle(
        engine,
        &mut state,
        RpcRequest {
            op,
            params,
            id: rpc::default_request_id(),
        },
    );
    print_json(&serde_json::to_value(&response)?)?;
    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn schema() -> Value {
    let command_types = [
        CommandType::NativeMethod,
        CommandType::KernelPlugin,
        CommandType::Internal,
        CommandType::ExternalMethod,
        CommandType::Custom,
    ];
    json!({
        "descriptorFiles": DescriptorFile::ALL.iter().map(|f| f.file_name()).collect::<Vec<_>>(),
        "parameterTypes": ParamType::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        "commandTypes": command_types.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        "grammar": [
            "IDENT '(' OBJECT_LITERAL ')'",
            "IDENT '(' ARG_LIST ')'",
            "IDENT",
        ],
        "templateFilters": ["basename", "json", "lower", "upper", "trim"],
        "rpcOps": rpc::OPS,
        "configFile": crate::core::config::CONFIG_FILE,
    })
}
