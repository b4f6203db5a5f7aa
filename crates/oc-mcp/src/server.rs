//! The MCP bridge server half: `POST /api/bridge/{config64}/mcp`
//! exposes `begin_chat_thread`/`send_message_to_chat_thread`/
//! `wait_for_reply` as MCP tools over one internal conversation per
//! bridged thread.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use oc_bus::{Bus, BusItem, SubscribeOptions};
use oc_domain::{AppendRequest, Attachment, ConversationMetadata, Event, EventPayload, Finality};
use oc_host::AgentHost;
use oc_scheduler::Scheduler;
use oc_store::EventStore;
use serde_json::Value;
use tokio::time::Instant;

use crate::template::BridgeTemplate;
use crate::wire::{tool_defs, McpRequest, McpResponse, ToolCallResult};

const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct McpBridgeState {
    pub store: Arc<dyn EventStore>,
    pub bus: Arc<Bus>,
    pub scheduler: Arc<Scheduler>,
    pub host: Arc<AgentHost>,
    pub reply_timeout: Duration,
}

impl McpBridgeState {
    pub fn new(store: Arc<dyn EventStore>, bus: Arc<Bus>, scheduler: Arc<Scheduler>, host: Arc<AgentHost>) -> Self {
        Self { store, bus, scheduler, host, reply_timeout: DEFAULT_REPLY_TIMEOUT }
    }
}

pub fn router(state: McpBridgeState) -> Router {
    Router::new().route("/api/bridge/:config64/mcp", post(handle_rpc)).with_state(state)
}

async fn handle_rpc(
    State(state): State<McpBridgeState>,
    Path(config64): Path<String>,
    Json(req): Json<McpRequest>,
) -> impl IntoResponse {
    let Some(id) = req.id.clone() else {
        // Notification (e.g. `notifications/initialized`): nothing to do,
        // nothing to reply with.
        return (axum::http::StatusCode::ACCEPTED, Json(Value::Null)).into_response();
    };

    let result = dispatch(&state, &config64, &req.method, req.params.clone()).await;
    let response = match result {
        Ok(value) => McpResponse::ok(id, value),
        Err(message) => McpResponse::err(id, -32000, message),
    };
    Json(response).into_response()
}

async fn dispatch(state: &McpBridgeState, config64: &str, method: &str, params: Option<Value>) -> Result<Value, String> {
    match method {
        "initialize" => Ok(serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "oc-mcp", "version": env!("CARGO_PKG_VERSION") },
        })),
        "tools/list" => Ok(serde_json::json!({ "tools": tool_defs() })),
        "tools/call" => {
            let params = params.ok_or("tools/call requires params")?;
            let name = params.get("name").and_then(Value::as_str).ok_or("missing tool name")?;
            let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
            let result = call_tool(state, config64, name, arguments).await;
            serde_json::to_value(result).map_err(|e| e.to_string())
        }
        other => Err(format!("unknown method {other}")),
    }
}

async fn call_tool(state: &McpBridgeState, config64: &str, name: &str, arguments: Value) -> ToolCallResult {
    let outcome = match name {
        "begin_chat_thread" => begin_chat_thread(state, config64).await,
        "send_message_to_chat_thread" => send_message_to_chat_thread(state, config64, arguments).await,
        "wait_for_reply" => wait_for_reply(state, config64, arguments).await,
        other => Err(format!("unknown tool {other}")),
    };
    match outcome {
        Ok(value) => ToolCallResult::text(&value),
        Err(message) => ToolCallResult::error(message),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn begin_chat_thread(state: &McpBridgeState, config64: &str) -> Result<Value, String> {
    let template = BridgeTemplate::decode(config64).map_err(|e| e.to_string())?;

    let mut metadata = ConversationMetadata {
        title: template.title.clone(),
        starting_agent_id: Some(template.internal_agent.id.clone()),
        agents: Default::default(),
    };
    metadata.agents.insert(template.internal_agent.id.clone(), template.internal_agent.clone());
    metadata.agents.insert(template.peer_agent_id.clone(), oc_domain::AgentMeta::new(template.peer_agent_id.clone()));

    let conversation = state.store.create_conversation(metadata);
    state.host.ensure(conversation.id, &template.internal_agent);

    tracing::info!(conversation_id = conversation.id, internal_agent = %template.internal_agent.id, "bridged chat thread started");
    Ok(serde_json::json!({ "conversationId": conversation.id }))
}

#[derive(serde::Deserialize)]
struct SendMessageArgs {
    #[serde(rename = "conversationId")]
    conversation_id: u64,
    message: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

async fn send_message_to_chat_thread(state: &McpBridgeState, config64: &str, arguments: Value) -> Result<Value, String> {
    let args: SendMessageArgs = serde_json::from_value(arguments).map_err(|e| e.to_string())?;
    let template = BridgeTemplate::decode(config64).map_err(|e| e.to_string())?;
    let conversation = state.store.get_conversation(args.conversation_id).map_err(|e| e.to_string())?;

    let req = AppendRequest {
        agent_id: template.peer_agent_id.clone(),
        payload: EventPayload::Message { text: args.message, attachments: args.attachments },
        finality: Finality::Turn,
        client_request_id: None,
    };
    let event = state.store.append(args.conversation_id, req).map_err(|e| e.to_string())?;
    state.bus.publish_event(event.clone());
    state.scheduler.on_event_appended(&conversation, &event);

    wait_for_counterpart(state, args.conversation_id, &template.peer_agent_id, event.seq).await
}

#[derive(serde::Deserialize)]
struct WaitForReplyArgs {
    #[serde(rename = "conversationId")]
    conversation_id: u64,
}

async fn wait_for_reply(state: &McpBridgeState, config64: &str, arguments: Value) -> Result<Value, String> {
    let args: WaitForReplyArgs = serde_json::from_value(arguments).map_err(|e| e.to_string())?;
    let template = BridgeTemplate::decode(config64).map_err(|e| e.to_string())?;
    let conversation = state.store.get_conversation(args.conversation_id).map_err(|e| e.to_string())?;
    let since = conversation.last_closed_seq;
    wait_for_counterpart(state, args.conversation_id, &template.peer_agent_id, since).await
}

/// Blocks until the counterpart (any agent other than `peer_agent_id`)
/// closes a turn, the conversation reaches finality, or `reply_timeout`
/// elapses.
async fn wait_for_counterpart(
    state: &McpBridgeState,
    conversation_id: u64,
    peer_agent_id: &str,
    since_seq: u64,
) -> Result<Value, String> {
    let mut sub = state
        .bus
        .subscribe(&*state.store, conversation_id, SubscribeOptions { since_seq: Some(since_seq), include_guidance: false })
        .map_err(|e| e.to_string())?;

    let deadline = Instant::now() + state.reply_timeout;
    let mut text = String::new();
    let mut attachments: Vec<Attachment> = Vec::new();
    let mut is_final = false;
    let mut saw_any = false;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(serde_json::json!({ "timeout": true }));
        }

        let item = match tokio::time::timeout(remaining, sub.next()).await {
            Ok(Some(Ok(item))) => item,
            Ok(Some(Err(_))) | Ok(None) => return Ok(serde_json::json!({ "timeout": true })),
            Err(_) => return Ok(serde_json::json!({ "timeout": true })),
        };

        let BusItem::Event(event) = item else { continue };
        if event.agent_id == peer_agent_id {
            continue;
        }
        accumulate(&event, &mut text, &mut attachments);
        saw_any = true;

        if event.finality.closes_conversation() {
            is_final = true;
            break;
        }
        if event.finality.closes_turn() {
            break;
        }
    }

    if !saw_any {
        return Ok(serde_json::json!({ "timeout": true }));
    }

    let mut reply = serde_json::json!({ "text": text, "attachments": attachments });
    if is_final {
        reply["final"] = Value::Bool(true);
    }
    Ok(serde_json::json!({ "reply": reply }))
}

fn accumulate(event: &Event, text: &mut String, attachments: &mut Vec<Attachment>) {
    if let EventPayload::Message { text: t, attachments: a } = &event.payload {
        if !text.is_empty() && !t.is_empty() {
            text.push('\n');
        }
        text.push_str(t);
        attachments.extend(a.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_domain::AgentMeta;
    use oc_runtime::UserQueryBroker;
    use oc_scheduler::DefaultPolicy;
    use oc_store::memory::MemoryStore;

    fn scripted_template(lines: &[&str]) -> BridgeTemplate {
        let lines_json: Vec<Value> = lines.iter().map(|l| serde_json::json!({ "text": l, "finality": "turn" })).collect();
        let mut internal_agent = AgentMeta::new("assistant");
        internal_agent.agent_class = Some("scripted".into());
        internal_agent.config = Some(serde_json::json!({ "lines": lines_json }));
        BridgeTemplate { internal_agent, peer_agent_id: "external".into(), title: Some("bridged thread".into()) }
    }

    async fn spawn_server() -> (String, tokio::task::JoinHandle<()>) {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), Default::default()));
        let host = Arc::new(AgentHost::new(store.clone(), bus.clone(), scheduler.clone(), Arc::new(UserQueryBroker::new())));
        let state = McpBridgeState { reply_timeout: Duration::from_secs(2), ..McpBridgeState::new(store, bus, scheduler, host) };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn begin_send_and_receive_a_scripted_reply() {
        let (base_url, _server) = spawn_server().await;
        let template = scripted_template(&["pong"]);
        let config64 = template.encode();
        let endpoint = format!("{base_url}/api/bridge/{config64}/mcp");
        let client = reqwest::Client::new();

        let begin: Value = client
            .post(&endpoint)
            .json(&serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": { "name": "begin_chat_thread", "arguments": {} }
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let content_text = begin["result"]["content"][0]["text"].as_str().unwrap();
        let begin_result: Value = serde_json::from_str(content_text).unwrap();
        let conversation_id = begin_result["conversationId"].as_u64().unwrap();

        let send: Value = client
            .post(&endpoint)
            .json(&serde_json::json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {
                    "name": "send_message_to_chat_thread",
                    "arguments": { "conversationId": conversation_id, "message": "hello" }
                }
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let content_text = send["result"]["content"][0]["text"].as_str().unwrap();
        let send_result: Value = serde_json::from_str(content_text).unwrap();
        assert_eq!(send_result["reply"]["text"].as_str().unwrap(), "pong");
    }

    #[tokio::test]
    async fn send_message_times_out_when_no_internal_agent_replies() {
        let mut internal_agent = AgentMeta::new("assistant");
        internal_agent.agent_class = None;
        let template = BridgeTemplate { internal_agent, peer_agent_id: "external".into(), title: None };
        let (base_url, _server) = spawn_server().await;
        let config64 = template.encode();
        let endpoint = format!("{base_url}/api/bridge/{config64}/mcp");
        let client = reqwest::Client::new();

        let begin: Value = client
            .post(&endpoint)
            .json(&serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": { "name": "begin_chat_thread", "arguments": {} }
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let content_text = begin["result"]["content"][0]["text"].as_str().unwrap();
        let begin_result: Value = serde_json::from_str(content_text).unwrap();
        let conversation_id = begin_result["conversationId"].as_u64().unwrap();

        let send: Value = client
            .post(&endpoint)
            .json(&serde_json::json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {
                    "name": "send_message_to_chat_thread",
                    "arguments": { "conversationId": conversation_id, "message": "hello?" }
                }
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let content_text = send["result"]["content"][0]["text"].as_str().unwrap();
        let send_result: Value = serde_json::from_str(content_text).unwrap();
        assert_eq!(send_result["timeout"].as_bool(), Some(true));
    }
}
