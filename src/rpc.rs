//! JSON-RPC 2.0 request/response envelopes.
//!
//! The dispatch engine and its collaborators treat `params`/`result` as
//! opaque `serde_json::Value`s — nothing below the ingress layer interprets
//! Solana-specific method semantics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: Value, method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), id, method: method.into(), params }
    }

    /// Version must be "2.0" and method non-empty.
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(RpcError::new(INVALID_REQUEST, "invalid or missing jsonrpc version", self.id.clone()));
        }
        if self.method.is_empty() {
            return Err(RpcError::new(INVALID_REQUEST, "missing method", self.id.clone()));
        }
        Ok(())
    }

    /// Canonicalized form used for fingerprinting: method plus params with
    /// object keys sorted, so field-order differences hash identically.
    pub fn canonical_params(&self) -> Value {
        canonicalize(&self.params)
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by_key(|(k, _)| k.as_str());
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), id, result: Some(result), error: None }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcErrorObject { code, message: message.into(), data: None }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Local representation of a malformed-request rejection (§6: HTTP 400 with
/// a JSON-RPC error code). `id` is `Value::Null` when the body didn't even
/// parse far enough to recover one.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub id: Value,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>, id: Value) -> Self {
        Self { code, message: message.into(), id }
    }

    pub fn into_response(self) -> RpcResponse {
        RpcResponse::error(self.id, self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_rejects_wrong_version() {
        let req = RpcRequest::new(json!(1), "getSlot", json!([]));
        let mut req = req;
        req.jsonrpc = "1.0".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_method() {
        let req = RpcRequest::new(json!(1), "", json!([]));
        assert!(req.validate().is_err());
    }

    #[test]
    fn canonical_params_ignores_field_order() {
        let a = RpcRequest::new(json!(1), "m", json!({"b": 1, "a": 2}));
        let b = RpcRequest::new(json!(1), "m", json!({"a": 2, "b": 1}));
        assert_eq!(a.canonical_params(), b.canonical_params());
    }

    #[test]
    fn response_success_has_no_error() {
        let resp = RpcResponse::success(json!(1), json!(42));
        assert!(!resp.is_error());
        assert_eq!(resp.result, Some(json!(42)));
    }
}
