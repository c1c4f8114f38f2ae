//! JSON request/response envelope for hosts that drive the engine over
//! stdin/stdout.
//!
//! # Response envelope
//!
//! Every response carries a `receipt`: the op, a timestamp and SHA-256
//! hashes of the canonical JSON of the params and the result.

use crate::core::engine::ContractEngine;
use crate::core::error::CarapaceError;
use crate::core::parser::ParsedCommand;
use crate::core::state::State;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sha2::Digest;
use tracing::debug;

pub const OPS: &[&str] = &["manifest", "parse", "validate", "run", "state"];

/// Standard RPC request envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcRequest {
    /// Operation to perform
    pub op: String,
    #[serde(default)]
    pub params: Value,
    /// Request ID for correlation
    #[serde(default = "default_request_id")]
    pub id: String,
}

pub fn default_request_id() -> String {
    crate::core::time::new_event_id()
}

/// Standard RPC response envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcResponse {
    pub id: String,
    pub success: bool,
    pub receipt: Receipt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Set when a side effect asked the host to end the session.
    #[serde(default)]
    pub exit: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Receipt {
    pub op: String,
    pub timestamp: String,
    pub inputs_hash: String,
    pub outputs_hash: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

fn hash_json<T: Serialize>(value: &T) -> String {
    format!(
        "{:x}",
        sha2::Sha256::digest(serde_json::to_string(value).unwrap_or_default())
    )
}

pub fn success_response(request_id: String, op: String, params: &Value, result: Value) -> RpcResponse {
    RpcResponse {
        id: request_id,
        success: true,
        receipt: Receipt {
            op,
            timestamp: crate::core::time::now_epoch_z(),
            inputs_hash: hash_json(params),
            outputs_hash: hash_json(&result),
        },
        result: Some(result),
        error: None,
        exit: false,
    }
}

pub fn error_response(request_id: String, op: String, params: &Value, code: &str, message: String) -> RpcResponse {
    RpcResponse {
        id: request_id,
        success: false,
        receipt: Receipt {
            op,
            timestamp: crate::core::time::now_epoch_z(),
            inputs_hash: hash_json(params),
            outputs_hash: format!("{:x}", sha2::Sha256::digest("error")),
        },
        result: None,
        error: Some(RpcError {
            code: code.to_string(),
            message,
        }),
        exit: false,
    }
}

/// Answer one request. `state` persists across calls made by the same host.
pub fn handle(engine: &ContractEngine, state: &mut State, req: RpcRequest) -> RpcResponse {
    let RpcRequest { op, params, id } = req;
    debug!(op = %op, id = %id, "rpc request");
    match dispatch(engine, state, &op, &params) {
        Ok(Dispatched::Value(result)) => success_response(id, op, &params, result),
        Ok(Dispatched::Run(result)) => match &result.error {
            Some(message) => {
                let mut response = error_response(id, op, &params, "command_failed", message.clone());
                response.exit = result.exit;
                response
            }
            None => {
                let exit = result.exit;
                let mut response = success_response(
                    id,
                    op,
                    &params,
                    json!({ "output": result.output, "chain": result.chain }),
                );
                response.exit = exit;
                response
            }
        },
        Err((code, message)) => error_response(id, op, &params, code, message),
    }
}

enum Dispatched {
    Value(Value),
    Run(crate::core::router::CommandResult),
}

fn dispatch(
    engine: &ContractEngine,
    state: &mut State,
    op: &str,
    params: &Value,
) -> Result<Dispatched, (&'static str, String)> {
    match op {
        "manifest" => serde_json::to_value(engine.manifest())
            .map(Dispatched::Value)
            .map_err(|e| ("internal", e.to_string())),
        "state" => Ok(Dispatched::Value(state.snapshot())),
        "parse" => {
            let input = str_param(params, "input")?;
            let parsed = engine.parse(input, state).map_err(|e| ("parse_error", e.to_string()))?;
            serde_json::to_value(parsed)
                .map(Dispatched::Value)
                .map_err(|e| ("internal", e.to_string()))
        }
        "validate" => {
            let command = str_param(params, "command")?;
            let empty = Map::new();
            let args = params.get("args").and_then(Value::as_object).unwrap_or(&empty);
            match engine.validate(command, args) {
                Ok(args) => Ok(Dispatched::Value(Value::Object(args))),
                Err(e) => Err((error_code(&e), e.to_string())),
            }
        }
        "run" => {
            if let Some(input) = params.get("input").and_then(Value::as_str) {
                return Ok(Dispatched::Run(engine.execute_line(input, state)));
            }
            let command = str_param(params, "command")?;
            let args = params
                .get("args")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Ok(Dispatched::Run(engine.run(ParsedCommand::new(command, args), state)))
        }
        other => Err((
            "unknown_op",
            format!("Unknown op '{}'; expected one of: {}", other, OPS.join(", ")),
        )),
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, (&'static str, String)> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ("invalid_params", format!("Missing string param '{}'", key)))
}

fn error_code(e: &CarapaceError) -> &'static str {
    match e {
        CarapaceError::Parse(_) => "parse_error",
        CarapaceError::Validation(_) => "validation_error",
        _ => "internal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handler::handler_fn;
    use crate::core::manifest::{CommandSpec, Manifest, ParamSpec};

    fn engine() -> ContractEngine {
        let manifest = Manifest::new("rpc").with_command(
            CommandSpec::new("double").with_param("n", ParamSpec::of_type("integer").required()),
        );
        ContractEngine::builder(manifest)
            .handler(
                "double",
                handler_fn(|inv| Ok(json!(inv.arg("n").and_then(Value::as_i64).unwrap_or(0) * 2))),
            )
            .build()
    }

    fn request(op: &str, params: Value) -> RpcRequest {
        RpcRequest {
            op: op.to_string(),
            params,
            id: "req-1".to_string(),
        }
    }

    #[test]
    fn run_returns_output_and_receipt() {
        let engine = engine();
        let mut state = engine.new_state();
        let resp = handle(&engine, &mut state, request("run", json!({"input": "double(21)"})));
        assert!(resp.success);
        assert_eq!(resp.id, "req-1");
        assert_eq!(resp.result, Some(json!({"output": 42, "chain": ["double"]})));
        assert_eq!(resp.receipt.inputs_hash, hash_json(&json!({"input": "double(21)"})));
        assert_eq!(resp.receipt.inputs_hash.len(), 64);
    }

    #[test]
    fn validate_reports_validation_code() {
        let engine = engine();
        let mut state = engine.new_state();
        let resp = handle(
            &engine,
            &mut state,
            request("validate", json!({"command": "double", "args": {}})),
        );
        assert!(!resp.success);
        let err = resp.error.unwrap();
        assert_eq!(err.code, "validation_error");
        assert_eq!(err.message, "Missing required parameters: n");
    }

    #[test]
    fn unknown_op_and_missing_params() {
        let engine = engine();
        let mut state = engine.new_state();
        let resp = handle(&engine, &mut state, request("launch", Value::Null));
        assert_eq!(resp.error.unwrap().code, "unknown_op");
        let resp = handle(&engine, &mut state, request("parse", json!({})));
        assert_eq!(resp.error.unwrap().code, "invalid_params");
    }

    #[test]
    fn request_id_defaults_to_ulid() {
        let req: RpcRequest = serde_json::from_str(r#"{"op":"state"}"#).unwrap();
        assert_eq!(req.id.len(), 26);
        assert_eq!(req.params, Value::Null);
    }
}
