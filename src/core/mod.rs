//! The command-contract engine.
//!
//! Descriptor loading and merging, the parser, the validator, templates and
//! conditions, the router, and the ambient pieces (config, trace, RPC).

pub mod blob;
pub mod condition;
pub mod config;
pub mod descriptors;
pub mod engine;
pub mod error;
pub mod handler;
pub mod literal;
pub mod manifest;
pub mod merge;
pub mod output;
pub mod parser;
pub mod router;
pub mod rpc;
pub mod state;
pub mod template;
pub mod time;
pub mod trace;
pub mod types;
pub mod validate;
pub mod values;
