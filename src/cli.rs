//! CLI struct definitions for the carapace command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "carapace",
    version = env!("CARGO_PKG_VERSION"),
    about = "Load a tree of JSON command descriptors, then parse, validate and run commands against it."
)]
pub(crate) struct Cli {
    /// Descriptor root (the directory holding the root descriptor).
    #[clap(long, global = true, default_value = ".")]
    pub root: PathBuf,
    /// Engine config file. Defaults to `carapace.toml` under the root.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Print the merged manifest
    Manifest {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Parse and validate one input line without running it
    Parse {
        /// e.g. 'train("corpus.txt", order=3)'
        input: String,
    },
    /// Run one input line, chain included, and print the result as JSON
    Run {
        input: String,
        /// Seed session state before running (repeatable).
        #[clap(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Read input lines from stdin and run each against one session state
    Session,
    /// JSON envelope interface
    Rpc(RpcCli),
    /// Describe the descriptor vocabulary: parameter types, command types, RPC ops
    Schema,
    /// Show the most recent execution trace events
    Trace {
        #[clap(long, default_value_t = 20)]
        last: usize,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct RpcCli {
    /// Operation to perform
    #[clap(long, conflicts_with = "stdin")]
    pub op: Option<String>,
    /// Operation parameters as JSON
    #[clap(long, requires = "op")]
    pub params: Option<String>,
    /// Read one request envelope per stdin line
    #[clap(long)]
    pub stdin: bool,
}
