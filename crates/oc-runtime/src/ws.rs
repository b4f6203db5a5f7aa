//! WebSocket agent transport (§4.5, §4.6): connects an out-of-process
//! agent to the gateway's JSON-RPC endpoint. Mirrors the teacher's
//! node-sdk client shape — connect, subscribe, message loop — with
//! jittered-backoff reconnect wrapped around the whole thing by
//! [`run_agent`]. Authenticates the same way the teacher's node
//! WebSocket endpoint does: a pre-shared `?token=` query parameter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use oc_domain::{Attachment, Conversation, Error, EventPayload, Finality, Result};
use oc_protocol::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use oc_protocol::methods::{
    AppendResult, CreateUserQueryParams, CreateUserQueryResult, GetConversationParams, GetConversationResult, SendMessageParams,
    SendTraceParams, SubscribeParams,
};
use oc_protocol::ws::{EventNotificationParams, GuidanceNotificationParams};
use oc_scheduler::ClaimOutcome;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::reconnect::ReconnectBackoff;
use crate::runtime::AgentRuntime;
use crate::stream::{ChannelGuidanceStream, StreamItem};
use crate::transport::AgentTransport;

#[derive(Clone)]
pub struct WsAgentConfig {
    pub gateway_ws_url: String,
    pub token: Option<String>,
    pub conversation_id: u64,
    pub agent_id: String,
    pub since_seq: Option<u64>,
    pub request_timeout: Duration,
    pub reconnect: ReconnectBackoff,
}

impl WsAgentConfig {
    fn url(&self) -> String {
        match &self.token {
            Some(token) => format!("{}?token={}", self.gateway_ws_url, token),
            None => self.gateway_ws_url.clone(),
        }
    }
}

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// The live side of one connection, handed to the agent as an
/// [`AgentTransport`]. Dropped and rebuilt on every reconnect.
pub struct WsHandle {
    outbound: mpsc::Sender<Message>,
    pending: PendingTable,
    next_id: AtomicU64,
    conversation_id: u64,
    agent_id: String,
    request_timeout: Duration,
    /// Every persisted event this connection has seen, fanned out
    /// separately from the guidance-routing channel so `query_user` can
    /// watch for its answer without competing with the run loop for it.
    events: broadcast::Sender<oc_domain::Event>,
}

impl WsHandle {
    async fn call<P: Serialize>(&self, method: &str, params: P) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let params = serde_json::to_value(params)?;
        let request = JsonRpcRequest::new(id, method, Some(params));
        let text = serde_json::to_string(&request)?;
        if self.outbound.send(Message::Text(text)).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::TransportClosed);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::TransportClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(Error::Timeout(method.to_string()));
            }
        };
        response.into_result().map_err(|e| Error::Internal(e.to_string()))
    }
}

#[async_trait]
impl AgentTransport for WsHandle {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn conversation_id(&self) -> u64 {
        self.conversation_id
    }

    async fn post_message(
        &self,
        text: String,
        attachments: Vec<Attachment>,
        finality: Finality,
        client_request_id: Option<String>,
    ) -> Result<AppendResult> {
        let params = SendMessageParams {
            conversation_id: self.conversation_id,
            agent_id: self.agent_id.clone(),
            text,
            attachments,
            finality,
            client_request_id,
        };
        let result = self.call("sendMessage", params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn post_trace(&self, text: String) -> Result<AppendResult> {
        let params = SendTraceParams { conversation_id: self.conversation_id, agent_id: self.agent_id.clone(), text, client_request_id: None };
        let result = self.call("sendTrace", params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn claim_turn(&self) -> Result<ClaimOutcome> {
        // No claim RPC exists on the wire — the store's `WrongAuthor` on
        // the eventual `sendMessage` is the hard backstop under
        // competition policy, so a remote agent just claims optimistically.
        Ok(ClaimOutcome::Won)
    }

    async fn snapshot(&self) -> Result<Conversation> {
        let params = GetConversationParams { conversation_id: self.conversation_id };
        let result = self.call("getConversation", params).await?;
        let parsed: GetConversationResult = serde_json::from_value(result)?;
        Ok(parsed.conversation)
    }

    async fn get_attachment(&self, _name: &str) -> Result<Option<Attachment>> {
        tracing::debug!("attachment lookup isn't exposed over the JSON-RPC transport; read attachments off received events instead");
        Ok(None)
    }

    async fn query_user(&self, prompt: String, timeout: Duration) -> Result<String> {
        let mut events = self.events.subscribe();
        let params = CreateUserQueryParams { conversation_id: self.conversation_id, agent_id: self.agent_id.clone(), prompt, timeout_ms: timeout.as_millis() as u64 };
        let result = self.call("createUserQuery", params).await?;
        let created: CreateUserQueryResult = serde_json::from_value(result)?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!("user query {} timed out", created.query_id)));
            }
            let event = match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Ok(event)) => event,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return Err(Error::TransportClosed),
                Err(_) => return Err(Error::Timeout(format!("user query {} timed out", created.query_id))),
            };
            if let EventPayload::System { kind, data } = &event.payload {
                if kind == "user_query_answered" && data.get("queryId").and_then(Value::as_str) == Some(created.query_id.as_str()) {
                    if let Some(text) = data.get("text").and_then(Value::as_str) {
                        return Ok(text.to_string());
                    }
                }
            }
        }
    }
}

/// Runs one agent against one conversation for as long as the process
/// lives, reconnecting with [`ReconnectBackoff`] on every drop. Returns
/// only when `shutdown` is cancelled or the backoff policy gives up.
pub async fn run_agent(config: WsAgentConfig, agent: Arc<dyn Agent>, shutdown: CancellationToken) -> Result<()> {
    let mut attempt: u32 = 0;
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let outcome = tokio::select! {
            r = connect_and_run(&config, &agent) => r,
            _ = shutdown.cancelled() => {
                tracing::info!(agent_id = %config.agent_id, "shutdown requested");
                return Ok(());
            }
        };

        match outcome {
            Ok(()) => {
                tracing::info!(agent_id = %config.agent_id, "connection closed gracefully");
                attempt = 0;
            }
            Err(err) => {
                tracing::warn!(agent_id = %config.agent_id, attempt, error = %err, "connection lost");
            }
        }

        if config.reconnect.should_give_up(attempt) {
            tracing::error!(agent_id = %config.agent_id, attempts = attempt, "max reconnect attempts exhausted");
            return Err(Error::TransportClosed);
        }

        let delay = config.reconnect.delay_for_attempt(attempt);
        tracing::info!(agent_id = %config.agent_id, delay_ms = delay.as_millis() as u64, attempt = attempt + 1, "reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => return Ok(()),
        }
        attempt += 1;
    }
}

async fn connect_and_run(config: &WsAgentConfig, agent: &Arc<dyn Agent>) -> Result<()> {
    let url = config.url();
    tracing::info!(url = %url, agent_id = %config.agent_id, "connecting to gateway");
    let (ws, _response) = tokio_tungstenite::connect_async(&url).await.map_err(|e| Error::Internal(e.to_string()))?;
    let (mut sink, stream) = ws.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
    let (stream_tx, stream_rx) = mpsc::channel::<StreamItem>(64);
    let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
    let (events_tx, _) = broadcast::channel(64);

    let handle = Arc::new(WsHandle {
        outbound: outbound_tx.clone(),
        pending: pending.clone(),
        next_id: AtomicU64::new(1),
        conversation_id: config.conversation_id,
        agent_id: config.agent_id.clone(),
        request_timeout: config.request_timeout,
        events: events_tx.clone(),
    });

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let reader_task = tokio::spawn(reader_loop(stream, pending, stream_tx, events_tx));

    let subscribe_params = SubscribeParams { conversation_id: config.conversation_id, since_seq: config.since_seq, include_guidance: true };
    if let Err(err) = handle.call("subscribe", subscribe_params).await {
        reader_task.abort();
        drop(outbound_tx);
        let _ = writer_task.await;
        return Err(err);
    }

    let runtime = AgentRuntime::new(agent.clone(), handle.clone());
    let run_task = tokio::spawn(async move { runtime.run(Box::new(ChannelGuidanceStream(stream_rx))).await });

    let result = tokio::select! {
        r = reader_task => r.map_err(|e| Error::Internal(e.to_string()))?,
        r = run_task => r.map_err(|e| Error::Internal(e.to_string()))?,
    };

    drop(outbound_tx);
    let _ = writer_task.await;
    result
}

async fn reader_loop(
    mut stream: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    pending: PendingTable,
    stream_tx: mpsc::Sender<StreamItem>,
    events_tx: broadcast::Sender<oc_domain::Event>,
) -> Result<()> {
    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| Error::Internal(e.to_string()))?;
        let Message::Text(text) = msg else { continue };
        let value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed frame");
                continue;
            }
        };

        if value.get("id").is_some() {
            if let Ok(response) = serde_json::from_value::<JsonRpcResponse>(value) {
                if let Some(tx) = pending.lock().remove(&response.id) {
                    let _ = tx.send(response);
                }
            }
            continue;
        }

        let Ok(notification) = serde_json::from_value::<JsonRpcNotification>(value) else { continue };
        match notification.method.as_str() {
            "event" => {
                if let Some(params) = notification.params.and_then(|p| serde_json::from_value::<EventNotificationParams>(p).ok()) {
                    let _ = events_tx.send(params.event.clone());
                    let _ = stream_tx.send(StreamItem::Event(params.event)).await;
                }
            }
            "guidance" => {
                if let Some(params) = notification.params.and_then(|p| serde_json::from_value::<GuidanceNotificationParams>(p).ok()) {
                    let _ = stream_tx.send(StreamItem::Guidance(params.guidance)).await;
                }
            }
            "broadcast" => tracing::info!(params = ?notification.params, "server broadcast"),
            other => tracing::debug!(method = other, "ignoring unknown notification"),
        }
    }
    Ok(())
}
