//! JSON-RPC 2.0 envelope for the MCP tool-call surface, distinct from
//! `oc-protocol`'s gateway envelope — same shape, different wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct McpRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct McpResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(McpError { code, message: message.into() }) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct McpToolDef {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallContent {
    #[serde(rename = "type")]
    pub content_type: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolCallContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(value: &Value) -> Self {
        Self {
            content: vec![ToolCallContent { content_type: "text", text: value.to_string() }],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolCallContent { content_type: "text", text: message.into() }],
            is_error: true,
        }
    }
}

pub fn tool_defs() -> Vec<McpToolDef> {
    vec![
        McpToolDef {
            name: "begin_chat_thread",
            description: "Start a new bridged conversation and return its id.",
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
        },
        McpToolDef {
            name: "send_message_to_chat_thread",
            description: "Send a message into a bridged conversation and wait for the counterpart's reply.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "conversationId": { "type": "integer" },
                    "message": { "type": "string" },
                    "attachments": { "type": "array" }
                },
                "required": ["conversationId", "message"]
            }),
        },
        McpToolDef {
            name: "wait_for_reply",
            description: "Wait for the counterpart's next reply without sending a message.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "conversationId": { "type": "integer" } },
                "required": ["conversationId"]
            }),
        },
    ]
}
