//! Handlers shipped with the engine.
//!
//! `builtins` covers the `internal` commands; `process` runs
//! `external-method` executables when `allow_external` is set.

pub mod builtins;
pub mod process;
