//! The MCP proxy agent: drives a *remote*
//! orchestrator's MCP bridge using the same three tools an external MCP
//! client would use, so two orchestrators can bridge to each other with
//! MCP as their only shared interface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oc_domain::{Error, Finality, Result};
use oc_runtime::{Agent, TurnContext};
use parking_lot::Mutex;
use serde_json::Value;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(35);

#[derive(Clone)]
pub struct McpProxyAgentConfig {
    /// Base URL of the remote orchestrator, e.g. `http://localhost:8089`.
    pub remote_base_url: String,
    /// The `{config64}` segment identifying the remote conversation
    /// template this proxy bridges to.
    pub config64: String,
    pub request_timeout: Duration,
}

impl McpProxyAgentConfig {
    pub fn new(remote_base_url: impl Into<String>, config64: impl Into<String>) -> Self {
        Self { remote_base_url: remote_base_url.into(), config64: config64.into(), request_timeout: DEFAULT_REQUEST_TIMEOUT }
    }
}

/// Bridges each local conversation this agent is asked to act in to one
/// remote conversation, created lazily on first turn via `begin_chat_thread`.
pub struct McpProxyAgent {
    config: McpProxyAgentConfig,
    client: reqwest::Client,
    next_id: AtomicU64,
    remote_conversations: Mutex<HashMap<u64, u64>>,
}

impl McpProxyAgent {
    pub fn new(config: McpProxyAgentConfig) -> Arc<Self> {
        Arc::new(Self {
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            remote_conversations: Mutex::new(HashMap::new()),
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/bridge/{}/mcp", self.config.remote_base_url.trim_end_matches('/'), self.config.config64)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments },
        });

        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("mcp proxy request failed: {e}")))?;

        let envelope: Value = resp.json().await.map_err(|e| Error::Internal(format!("mcp proxy response malformed: {e}")))?;

        if let Some(error) = envelope.get("error") {
            return Err(Error::Internal(format!("remote mcp error: {error}")));
        }

        let content_text = envelope
            .get("result")
            .and_then(|r| r.get("content"))
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal("mcp tool result missing content[0].text".into()))?;

        serde_json::from_str(content_text).map_err(|e| Error::Internal(format!("mcp tool result not JSON: {e}")))
    }

    async fn remote_conversation_for(&self, local_conversation: u64) -> Result<u64> {
        if let Some(&id) = self.remote_conversations.lock().get(&local_conversation) {
            return Ok(id);
        }
        let result = self.call_tool("begin_chat_thread", Value::Null).await?;
        let remote_id = result
            .get("conversationId")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Internal("begin_chat_thread did not return conversationId".into()))?;
        self.remote_conversations.lock().insert(local_conversation, remote_id);
        Ok(remote_id)
    }
}

#[async_trait]
impl Agent for McpProxyAgent {
    async fn handle_turn(&self, ctx: &TurnContext<'_>) -> Result<()> {
        let remote_conversation = self.remote_conversation_for(ctx.conversation).await?;
        let message = ctx.trigger.as_ref().map(|e| e.payload.as_text().to_string()).unwrap_or_default();

        let result = self
            .call_tool(
                "send_message_to_chat_thread",
                serde_json::json!({ "conversationId": remote_conversation, "message": message }),
            )
            .await?;

        if result.get("timeout").and_then(Value::as_bool).unwrap_or(false) {
            ctx.transport.post_trace("remote orchestrator did not reply in time".into()).await?;
            ctx.transport
                .post_message(String::new(), Vec::new(), Finality::Turn, Some(uuid::Uuid::new_v4().to_string()))
                .await?;
            return Ok(());
        }

        let reply = result.get("reply").cloned().unwrap_or(Value::Null);
        let text = reply.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
        let is_final = reply.get("final").and_then(Value::as_bool).unwrap_or(false);

        ctx.transport
            .post_message(
                text,
                Vec::new(),
                if is_final { Finality::Conversation } else { Finality::Turn },
                Some(uuid::Uuid::new_v4().to_string()),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oc_domain::{AgentMeta, Attachment, Conversation, Event, EventPayload, Finality as F, Guidance, GuidanceKind};
    use oc_host::AgentHost;
    use oc_runtime::UserQueryBroker;
    use oc_scheduler::{ClaimOutcome, DefaultPolicy, Scheduler};
    use oc_store::memory::MemoryStore;
    use oc_store::EventStore;
    use parking_lot::Mutex as StdMutex;
    use std::sync::Arc;

    struct RecordingTransport {
        posts: StdMutex<Vec<(String, Finality)>>,
    }

    #[async_trait]
    impl oc_runtime::AgentTransport for RecordingTransport {
        fn agent_id(&self) -> &str {
            "proxy"
        }

        fn conversation_id(&self) -> u64 {
            1
        }

        async fn post_message(
            &self,
            text: String,
            _attachments: Vec<Attachment>,
            finality: Finality,
            _client_request_id: Option<String>,
        ) -> Result<oc_protocol::methods::AppendResult> {
            self.posts.lock().push((text, finality));
            Ok(oc_protocol::methods::AppendResult { seq: 1, turn: 1, event: 1 })
        }

        async fn post_trace(&self, _text: String) -> Result<oc_protocol::methods::AppendResult> {
            Ok(oc_protocol::methods::AppendResult { seq: 1, turn: 1, event: 1 })
        }

        async fn claim_turn(&self) -> Result<ClaimOutcome> {
            Ok(ClaimOutcome::Won)
        }

        async fn snapshot(&self) -> Result<Conversation> {
            unimplemented!("not exercised by this test")
        }

        async fn get_attachment(&self, _name: &str) -> Result<Option<Attachment>> {
            Ok(None)
        }

        async fn query_user(&self, _prompt: String, _timeout: Duration) -> Result<String> {
            unimplemented!("not exercised by this test")
        }
    }

    async fn spawn_remote_scripted_server(reply: &str) -> (String, String, tokio::task::JoinHandle<()>) {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(oc_bus::Bus::new(16));
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), Default::default()));
        let host = Arc::new(AgentHost::new(store.clone(), bus.clone(), scheduler.clone(), Arc::new(UserQueryBroker::new())));
        let state = crate::server::McpBridgeState::new(store, bus, scheduler, host);

        let mut internal_agent = AgentMeta::new("insurer");
        internal_agent.agent_class = Some("scripted".into());
        internal_agent.config = Some(serde_json::json!({ "lines": [{ "text": reply, "finality": "turn" }] }));
        let template = crate::template::BridgeTemplate { internal_agent, peer_agent_id: "patient-proxy".into(), title: None };
        let config64 = template.encode();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crate::server::router(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), config64, handle)
    }

    fn trigger_event(text: &str) -> Event {
        Event {
            conversation: 1,
            turn: 1,
            event: 1,
            seq: 1,
            agent_id: "patient".into(),
            payload: EventPayload::Message { text: text.into(), attachments: Vec::new() },
            finality: F::Turn,
            ts: chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().into(),
            client_request_id: None,
        }
    }

    fn guidance() -> Guidance {
        Guidance { conversation: 1, seq: 1, ordinal: 0, next_agent_id: "proxy".into(), kind: GuidanceKind::ContinueTurn, deadline_ms: None }
    }

    #[tokio::test]
    async fn drives_remote_orchestrator_and_relays_its_reply() {
        let (base_url, config64, _remote) = spawn_remote_scripted_server("covered, please proceed").await;
        let proxy = McpProxyAgent::new(McpProxyAgentConfig::new(base_url, config64));

        let transport = RecordingTransport { posts: StdMutex::new(Vec::new()) };
        let ctx = oc_runtime::TurnContext {
            agent_id: "proxy",
            conversation: 1,
            guidance: guidance(),
            trigger: Some(trigger_event("I'd like to file a claim")),
            transport: &transport,
        };

        proxy.handle_turn(&ctx).await.unwrap();

        let posts = transport.posts.lock();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "covered, please proceed");
        assert_eq!(posts[0].1, F::Turn);
    }
}
