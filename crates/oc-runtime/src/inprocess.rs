//! Direct, no-serialization transport for agents running in the same
//! process as the store/bus/scheduler (`oc-host`'s default). The external
//! WebSocket transport in [`crate::ws`] implements the same trait over
//! JSON-RPC for agents running elsewhere.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oc_bus::Bus;
use oc_domain::{AppendRequest, Attachment, Conversation, Error, EventPayload, Finality, Result};
use oc_protocol::methods::AppendResult;
use oc_scheduler::{ClaimOutcome, Scheduler};
use oc_store::EventStore;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::transport::AgentTransport;

/// Pending `createUserQuery`/`respondToUserQuery` pairs (§4.6, §5). Shared
/// between every in-process transport in a gateway instance so that the
/// JSON-RPC handler for `respondToUserQuery` can answer a query raised by
/// any conversation's agent.
#[derive(Default)]
pub struct UserQueryBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl UserQueryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (String, oneshot::Receiver<String>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        (id, rx)
    }

    /// `true` if a pending query with this id was found and answered.
    pub fn respond(&self, query_id: &str, text: String) -> bool {
        match self.pending.lock().remove(query_id) {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    fn cancel(&self, query_id: &str) {
        self.pending.lock().remove(query_id);
    }
}

pub struct InProcessTransport {
    store: Arc<dyn EventStore>,
    bus: Arc<Bus>,
    scheduler: Arc<Scheduler>,
    queries: Arc<UserQueryBroker>,
    conversation_id: u64,
    agent_id: String,
}

impl InProcessTransport {
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Arc<Bus>,
        scheduler: Arc<Scheduler>,
        queries: Arc<UserQueryBroker>,
        conversation_id: u64,
        agent_id: impl Into<String>,
    ) -> Self {
        Self { store, bus, scheduler, queries, conversation_id, agent_id: agent_id.into() }
    }

    fn append(&self, req: AppendRequest) -> Result<AppendResult> {
        match self.store.append(self.conversation_id, req) {
            Ok(event) => {
                let result = AppendResult { seq: event.seq, turn: event.turn, event: event.event };
                self.bus.publish_event(event.clone());
                if let Ok(conversation) = self.store.get_conversation(self.conversation_id) {
                    self.scheduler.on_event_appended(&conversation, &event);
                }
                Ok(result)
            }
            // The caller already holds the seq of its own earlier attempt;
            // returning it keeps retries idempotent instead of erroring.
            Err(Error::DuplicateRequest { existing_seq }) => {
                let events = self.store.read_range(self.conversation_id, existing_seq.saturating_sub(1))?;
                events
                    .into_iter()
                    .find(|e| e.seq == existing_seq)
                    .map(|e| AppendResult { seq: e.seq, turn: e.turn, event: e.event })
                    .ok_or_else(|| Error::Internal("duplicate request pointed at a missing event".into()))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AgentTransport for InProcessTransport {
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
        let mut req = AppendRequest {
            agent_id: self.agent_id.clone(),
            payload: EventPayload::Message { text, attachments },
            finality,
            client_request_id: None,
        };
        req.client_request_id = client_request_id;
        self.append(req)
    }

    async fn post_trace(&self, text: String) -> Result<AppendResult> {
        self.append(AppendRequest::trace(self.agent_id.clone(), text))
    }

    async fn claim_turn(&self) -> Result<ClaimOutcome> {
        Ok(self.scheduler.claim(self.conversation_id, &self.agent_id))
    }

    async fn snapshot(&self) -> Result<Conversation> {
        self.store.get_conversation(self.conversation_id)
    }

    async fn get_attachment(&self, name: &str) -> Result<Option<Attachment>> {
        let events = self.store.read_range(self.conversation_id, 0)?;
        for event in events.into_iter().rev() {
            if let EventPayload::Message { attachments, .. } = event.payload {
                if let Some(found) = attachments.into_iter().find(|a| a.name == name) {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    async fn query_user(&self, prompt: String, timeout: Duration) -> Result<String> {
        let (query_id, rx) = self.queries.register();
        self.append(AppendRequest::trace(self.agent_id.clone(), format!("query[{query_id}]: {prompt}")))?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) | Err(_) => {
                self.queries.cancel(&query_id);
                Err(Error::Timeout(format!("user query {query_id} timed out")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_domain::ConversationMetadata;
    use oc_scheduler::DefaultPolicy;
    use oc_store::memory::MemoryStore;

    fn harness(agent_id: &str) -> (InProcessTransport, u64) {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), Default::default()));
        let queries = Arc::new(UserQueryBroker::new());
        let convo = store.create_conversation(ConversationMetadata::default());
        (InProcessTransport::new(store, bus, scheduler, queries, convo.id, agent_id), convo.id)
    }

    #[tokio::test]
    async fn post_message_persists_and_schedules() {
        let (transport, _id) = harness("alpha");
        let result = transport.post_message("hi".into(), vec![], Finality::Turn, None).await.unwrap();
        assert_eq!(result.seq, 1);
        let snap = transport.snapshot().await.unwrap();
        assert_eq!(snap.open_turn, None);
    }

    #[tokio::test]
    async fn duplicate_client_request_id_returns_same_seq() {
        let (transport, _id) = harness("alpha");
        let first = transport.post_message("hi".into(), vec![], Finality::None, Some("req-1".into())).await.unwrap();
        let second = transport.post_message("hi again".into(), vec![], Finality::None, Some("req-1".into())).await.unwrap();
        assert_eq!(first.seq, second.seq);
    }

    #[tokio::test]
    async fn query_user_times_out_when_unanswered() {
        let (transport, _id) = harness("alpha");
        transport.post_message("open".into(), vec![], Finality::None, None).await.unwrap();
        let err = transport.query_user("pick one".into(), Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.kind(), "Timeout");
    }

    #[tokio::test]
    async fn query_user_resolves_when_broker_responds() {
        let (transport, _id) = harness("alpha");
        transport.post_message("open".into(), vec![], Finality::None, None).await.unwrap();
        let queries = transport.queries.clone();
        let ask = transport.query_user("pick one".into(), Duration::from_secs(5));
        tokio::pin!(ask);
        // Give the trace append a moment to land, then answer it by
        // scanning for the query id the same way `respondToUserQuery`
        // would after reading it off the conversation's trace log.
        tokio::task::yield_now().await;
        let events = transport.store.read_range(_id, 0).unwrap();
        let query_id = events
            .iter()
            .find_map(|e| e.payload.as_text().strip_prefix("query[").and_then(|s| s.split(']').next()))
            .unwrap()
            .to_string();
        assert!(queries.respond(&query_id, "yes".into()));
        assert_eq!(ask.await.unwrap(), "yes");
    }
}
