//! JSON-RPC 2.0 envelope types shared by every method in `methods.rs`.
//!
//! One message per WebSocket text frame; no batching.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request — has an `id`, expects a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".into(), id, method: method.into(), params }
    }
}

/// A JSON-RPC 2.0 notification — no `id`, fire-and-forget. Used for
/// `event`, `guidance`, and `broadcast` pushes from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0".into(), method: method.into(), params: Some(params) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self { jsonrpc: "2.0".into(), id, result: Some(result), error: None }
    }

    pub fn err(id: u64, error: JsonRpcError) -> Self {
        Self { jsonrpc: "2.0".into(), id, result: None, error: Some(error) }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

/// Error codes named in the external-interface spec, beyond the standard
/// JSON-RPC 2.0 reserved range.
pub mod error_codes {
    pub const UNAUTHORIZED: i64 = -32000;
    pub const CONVERSATION_NOT_FOUND: i64 = -32001;
    pub const INVALID_TOKEN: i64 = -32002;
    pub const SUBSCRIPTION_FAILED: i64 = -32003;
    pub const CLOSED_CONVERSATION: i64 = -32010;
    pub const WRONG_AUTHOR: i64 = -32011;
    pub const DUPLICATE_REQUEST: i64 = -32012;

    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Map a domain error onto the wire error code/message pair, attaching
/// whatever structured `data` the spec calls for (e.g. the existing seq on
/// a duplicate request).
pub fn error_from_domain(err: &oc_domain::Error) -> JsonRpcError {
    use error_codes::*;
    use oc_domain::Error as E;

    match err {
        E::ClosedConversation => JsonRpcError { code: CLOSED_CONVERSATION, message: err.to_string(), data: None },
        E::WrongAuthor => JsonRpcError { code: WRONG_AUTHOR, message: err.to_string(), data: None },
        E::DuplicateRequest { existing_seq } => JsonRpcError {
            code: DUPLICATE_REQUEST,
            message: err.to_string(),
            data: Some(serde_json::json!({ "existingSeq": existing_seq })),
        },
        E::UnknownConversation(_) => JsonRpcError { code: CONVERSATION_NOT_FOUND, message: err.to_string(), data: None },
        E::Unauthorized => JsonRpcError { code: UNAUTHORIZED, message: err.to_string(), data: None },
        E::InvalidParams(_) => JsonRpcError { code: INVALID_PARAMS, message: err.to_string(), data: None },
        E::NoOpenTurn
        | E::UnknownAgent(_)
        | E::Timeout(_)
        | E::TransportClosed
        | E::Io(_)
        | E::Json(_)
        | E::Internal(_) => JsonRpcError { code: INTERNAL_ERROR, message: err.to_string(), data: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips() {
        let req = JsonRpcRequest::new(7, "ping", None);
        let json = serde_json::to_string(&req).unwrap();
        let back: JsonRpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
        assert!(!json.contains("params"));
    }

    #[test]
    fn duplicate_request_error_carries_existing_seq() {
        let err = oc_domain::Error::DuplicateRequest { existing_seq: 42 };
        let rpc_err = error_from_domain(&err);
        assert_eq!(rpc_err.code, error_codes::DUPLICATE_REQUEST);
        assert_eq!(rpc_err.data.unwrap()["existingSeq"], 42);
    }

    #[test]
    fn closed_conversation_maps_to_dedicated_code() {
        let rpc_err = error_from_domain(&oc_domain::Error::ClosedConversation);
        assert_eq!(rpc_err.code, error_codes::CLOSED_CONVERSATION);
    }
}
