//! The JSON-RPC-over-WebSocket server endpoint: the exact counterpart
//! `oc_runtime::ws::WsHandle` dials into. Grounded in the teacher's
//! `nodes/ws.rs` connection handshake (split sink/stream, an outbound
//! mpsc channel fed by a writer task, a reader loop dispatching inbound
//! frames) generalized from the teacher's bespoke node-hello protocol
//! to JSON-RPC request/response plus `event`/`guidance`/`broadcast`
//! notifications.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use oc_bus::SubscribeOptions;
use oc_domain::{AppendRequest, ConversationMetadata, Error, EventPayload};
use oc_protocol::error_codes;
use oc_protocol::jsonrpc::{error_from_domain, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use oc_protocol::methods::{
    AgentSetParams, AgentSetResult, AppendResult, CreateConversationParams, CreateConversationResult, CreateUserQueryParams,
    CreateUserQueryResult, GetAllConversationsResult, GetConversationParams, GetConversationResult, PongResult, RespondToUserQueryParams,
    SendMessageParams, SendTraceParams, SubscribeParams, SubscribeResult, UnsubscribeParams,
};
use oc_protocol::ws::{event_notification, guidance_notification, EventNotificationParams, GuidanceNotificationParams};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Constant-time comparison of the provided token's digest against the
/// precomputed hash held in `AppState`, same construction the teacher's
/// node endpoint uses so token length never leaks through timing.
fn token_matches(provided: &str, required_hash: &[u8]) -> bool {
    Sha256::digest(provided.as_bytes()).as_slice().ct_eq(required_hash).into()
}

#[derive(Debug, serde::Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn agent_ws(ws: WebSocketUpgrade, State(state): State<AppState>, Query(query): Query<WsQuery>) -> impl IntoResponse {
    if let Some(required_hash) = state.api_token_hash.as_deref() {
        let provided = query.token.as_deref().unwrap_or("");
        if !token_matches(provided, required_hash) {
            return (axum::http::StatusCode::UNAUTHORIZED, "invalid or missing token").into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state)).into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
    let subs: Arc<Mutex<HashMap<String, CancellationToken>>> = Arc::new(Mutex::new(HashMap::new()));

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };
        let Ok(request) = serde_json::from_str::<JsonRpcRequest>(&text) else {
            tracing::debug!("ignoring unparseable frame");
            continue;
        };
        let response = dispatch(&state, request.clone(), outbound_tx.clone(), subs.clone()).await;
        let _ = outbound_tx.send(Message::Text(serde_json::to_string(&response).expect("JsonRpcResponse serializes"))).await;
    }

    for (_, token) in subs.lock().drain() {
        token.cancel();
    }
    drop(outbound_tx);
    let _ = writer.await;
}

async fn dispatch(
    state: &AppState,
    req: JsonRpcRequest,
    outbound: mpsc::Sender<Message>,
    subs: Arc<Mutex<HashMap<String, CancellationToken>>>,
) -> JsonRpcResponse {
    let id = req.id;
    match handle_method(state, &req, outbound, subs).await {
        Ok(result) => JsonRpcResponse::ok(id, result),
        Err(err) => JsonRpcResponse::err(id, err),
    }
}

fn params<T: serde::de::DeserializeOwned>(req: &JsonRpcRequest) -> Result<T, JsonRpcError> {
    let value = req.params.clone().unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value).map_err(|e| JsonRpcError { code: error_codes::INVALID_PARAMS, message: e.to_string(), data: None })
}

async fn handle_method(
    state: &AppState,
    req: &JsonRpcRequest,
    outbound: mpsc::Sender<Message>,
    subs: Arc<Mutex<HashMap<String, CancellationToken>>>,
) -> Result<serde_json::Value, JsonRpcError> {
    match req.method.as_str() {
        "ping" => Ok(serde_json::to_value(PongResult::default()).unwrap()),

        "createConversation" => {
            let p: CreateConversationParams = params(req)?;
            let metadata = ConversationMetadata { title: p.title, starting_agent_id: p.starting_agent_id, agents: p.agents };
            let conversation = state.store.create_conversation(metadata);
            for meta in conversation.metadata.agents.values() {
                state.host.ensure(conversation.id, meta);
            }
            tracing::info!(conversation_id = conversation.id, "conversation created");
            Ok(serde_json::to_value(CreateConversationResult { conversation }).unwrap())
        }

        "getConversation" => {
            let p: GetConversationParams = params(req)?;
            let conversation = state.store.get_conversation(p.conversation_id).map_err(|e| error_from_domain(&e))?;
            Ok(serde_json::to_value(GetConversationResult { conversation }).unwrap())
        }

        "getAllConversations" => {
            let conversations = state.store.list_conversations();
            Ok(serde_json::to_value(GetAllConversationsResult { conversations }).unwrap())
        }

        "subscribe" => {
            let p: SubscribeParams = params(req)?;
            let opts = SubscribeOptions { since_seq: p.since_seq, include_guidance: p.include_guidance };
            let sub = state.bus.subscribe(state.store.as_ref(), p.conversation_id, opts).map_err(|e| error_from_domain(&e))?;
            let subscription_id = sub.id().to_string();
            let cancel = CancellationToken::new();
            subs.lock().insert(subscription_id.clone(), cancel.clone());
            tokio::spawn(forward_subscription(sub, subscription_id.clone(), outbound, cancel));
            Ok(serde_json::to_value(SubscribeResult { subscription_id }).unwrap())
        }

        "unsubscribe" => {
            let p: UnsubscribeParams = params(req)?;
            if let Some(cancel) = subs.lock().remove(&p.subscription_id) {
                cancel.cancel();
            }
            Ok(serde_json::json!({}))
        }

        "sendMessage" => {
            let p: SendMessageParams = params(req)?;
            let mut append_req =
                AppendRequest { agent_id: p.agent_id, payload: EventPayload::Message { text: p.text, attachments: p.attachments }, finality: p.finality, client_request_id: None };
            append_req.client_request_id = p.client_request_id;
            let result = append(state, p.conversation_id, append_req)?;
            Ok(serde_json::to_value(result).unwrap())
        }

        "sendTrace" => {
            let p: SendTraceParams = params(req)?;
            let mut append_req = AppendRequest::trace(p.agent_id, p.text);
            append_req.client_request_id = p.client_request_id;
            let result = append(state, p.conversation_id, append_req)?;
            Ok(serde_json::to_value(result).unwrap())
        }

        "startAgents" => {
            let p: AgentSetParams = params(req)?;
            let conversation = state.store.get_conversation(p.conversation_id).map_err(|e| error_from_domain(&e))?;
            let agent_ids = p.agent_ids.unwrap_or_else(|| conversation.metadata.agents.keys().cloned().collect());
            for agent_id in &agent_ids {
                if let Some(meta) = conversation.metadata.agents.get(agent_id) {
                    state.host.ensure(conversation.id, meta);
                }
            }
            Ok(serde_json::to_value(AgentSetResult { agent_ids }).unwrap())
        }

        "stopAgents" => {
            let p: AgentSetParams = params(req)?;
            let conversation = state.store.get_conversation(p.conversation_id).map_err(|e| error_from_domain(&e))?;
            let agent_ids = p.agent_ids.unwrap_or_else(|| conversation.metadata.agents.keys().cloned().collect());
            for agent_id in &agent_ids {
                state.host.stop(conversation.id, agent_id);
            }
            Ok(serde_json::to_value(AgentSetResult { agent_ids }).unwrap())
        }

        "createUserQuery" => {
            let p: CreateUserQueryParams = params(req)?;
            let query_id = uuid::Uuid::new_v4().to_string();
            state.remote_queries.lock().insert(query_id.clone(), p.conversation_id);
            let announce = AppendRequest::trace(p.agent_id, format!("query[{query_id}]: {}", p.prompt));
            append(state, p.conversation_id, announce)?;
            Ok(serde_json::to_value(CreateUserQueryResult { query_id }).unwrap())
        }

        "respondToUserQuery" => {
            let p: RespondToUserQueryParams = params(req)?;
            let resolved_in_process = state.queries.respond(&p.query_id, p.text.clone());
            let conversation_id = state.remote_queries.lock().remove(&p.query_id);
            if let Some(conversation_id) = conversation_id {
                let event = AppendRequest::system("user_query_answered", serde_json::json!({ "queryId": p.query_id, "text": p.text }));
                append(state, conversation_id, event)?;
            } else if !resolved_in_process {
                return Err(JsonRpcError { code: error_codes::INVALID_PARAMS, message: format!("unknown or already-answered query {}", p.query_id), data: None });
            }
            Ok(serde_json::json!({}))
        }

        other => Err(JsonRpcError { code: error_codes::METHOD_NOT_FOUND, message: format!("unknown method {other}"), data: None }),
    }
}

/// Appends an event and publishes it to the bus/scheduler, collapsing a
/// `DuplicateRequest` error into the original append's result so retried
/// `clientRequestId`s are idempotent from the caller's perspective (mirrors
/// `oc_runtime::InProcessTransport::append`).
fn append(state: &AppState, conversation_id: u64, req: AppendRequest) -> Result<AppendResult, JsonRpcError> {
    match state.store.append(conversation_id, req) {
        Ok(event) => {
            let result = AppendResult { seq: event.seq, turn: event.turn, event: event.event };
            state.bus.publish_event(event.clone());
            if let Ok(conversation) = state.store.get_conversation(conversation_id) {
                state.scheduler.on_event_appended(&conversation, &event);
            }
            Ok(result)
        }
        Err(Error::DuplicateRequest { existing_seq }) => state
            .store
            .read_range(conversation_id, existing_seq.saturating_sub(1))
            .map_err(|e| error_from_domain(&e))?
            .into_iter()
            .find(|e| e.seq == existing_seq)
            .map(|e| AppendResult { seq: e.seq, turn: e.turn, event: e.event })
            .ok_or_else(|| JsonRpcError { code: error_codes::INTERNAL_ERROR, message: "duplicate request pointed at a missing event".into(), data: None }),
        Err(e) => Err(error_from_domain(&e)),
    }
}

async fn forward_subscription(mut sub: oc_bus::Subscription, subscription_id: String, outbound: mpsc::Sender<Message>, cancel: CancellationToken) {
    loop {
        let item = tokio::select! {
            item = sub.next() => item,
            _ = cancel.cancelled() => return,
        };
        let notification = match item {
            None => return,
            Some(Err(err)) => {
                tracing::warn!(subscription_id, error = %err, "subscription lagged; closing");
                return;
            }
            Some(Ok(oc_bus::BusItem::Event(event))) => event_notification(EventNotificationParams { subscription_id: subscription_id.clone(), event }),
            Some(Ok(oc_bus::BusItem::Guidance(guidance))) => guidance_notification(GuidanceNotificationParams { subscription_id: subscription_id.clone(), guidance }),
        };
        if outbound.send(Message::Text(serde_json::to_string(&notification).expect("notification serializes"))).await.is_err() {
            return;
        }
    }
}
