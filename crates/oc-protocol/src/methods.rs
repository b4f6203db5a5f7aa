//! Request/result payloads for every JSON-RPC method enumerated in §4.6
//! and §6. These are the wire shapes; `oc-gateway` maps them onto
//! `oc-domain` types and back.

use std::collections::HashMap;

use oc_domain::{AgentMeta, Attachment, Conversation, Finality};
use serde::{Deserialize, Serialize};

/// `createConversation` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationParams {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub starting_agent_id: Option<String>,
    #[serde(default)]
    pub agents: HashMap<String, AgentMeta>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationResult {
    pub conversation: Conversation,
}

/// `getConversation` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConversationParams {
    pub conversation_id: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConversationResult {
    pub conversation: Conversation,
}

/// `getAllConversations` has no params.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAllConversationsResult {
    pub conversations: Vec<Conversation>,
}

/// `subscribe` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    pub conversation_id: u64,
    #[serde(default)]
    pub since_seq: Option<u64>,
    #[serde(default = "d_true")]
    pub include_guidance: bool,
}

fn d_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResult {
    pub subscription_id: String,
}

/// `unsubscribe` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeParams {
    pub subscription_id: String,
}

/// `sendMessage` params — `finality` defaults to `none` (ongoing turn).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    pub conversation_id: u64,
    pub agent_id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub finality: Finality,
    #[serde(default)]
    pub client_request_id: Option<String>,
}

/// `sendTrace` params — always `finality=none`; requires an open turn
/// owned by `agent_id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTraceParams {
    pub conversation_id: u64,
    pub agent_id: String,
    pub text: String,
    #[serde(default)]
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResult {
    pub seq: u64,
    pub turn: u64,
    pub event: u64,
}

/// `startAgents` / `stopAgents` share a shape: an explicit agent id list,
/// or all agents recorded for the conversation when omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSetParams {
    pub conversation_id: u64,
    #[serde(default)]
    pub agent_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSetResult {
    pub agent_ids: Vec<String>,
}

/// `createUserQuery` params — an agent asking the human/caller a question
/// mid-turn; times out after `timeout_ms` (default 5 min) per §5.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserQueryParams {
    pub conversation_id: u64,
    pub agent_id: String,
    pub prompt: String,
    #[serde(default = "d_query_timeout_ms")]
    pub timeout_ms: u64,
}

fn d_query_timeout_ms() -> u64 {
    300_000
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserQueryResult {
    pub query_id: String,
}

/// `respondToUserQuery` params — answers a pending `createUserQuery`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondToUserQueryParams {
    pub query_id: String,
    pub text: String,
}

/// `ping` has no params; result is the literal string `"pong"`.
#[derive(Debug, Clone, Serialize)]
pub struct PongResult {
    pub pong: bool,
}

impl Default for PongResult {
    fn default() -> Self {
        Self { pong: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_finality_defaults_to_none() {
        let raw = r#"{"conversationId":1,"agentId":"a","text":"hi"}"#;
        let params: SendMessageParams = serde_json::from_str(raw).unwrap();
        assert_eq!(params.finality, Finality::None);
        assert!(params.attachments.is_empty());
    }

    #[test]
    fn subscribe_defaults_include_guidance_true() {
        let raw = r#"{"conversationId":1}"#;
        let params: SubscribeParams = serde_json::from_str(raw).unwrap();
        assert!(params.include_guidance);
        assert_eq!(params.since_seq, None);
    }

    #[test]
    fn create_user_query_default_timeout_is_five_minutes() {
        let raw = r#"{"conversationId":1,"agentId":"a","prompt":"pick one"}"#;
        let params: CreateUserQueryParams = serde_json::from_str(raw).unwrap();
        assert_eq!(params.timeout_ms, 300_000);
    }
}
