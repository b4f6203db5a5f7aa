//! Agent Host & Lifecycle (§4.7): owns the supervision loop for every
//! in-process built-in agent — which conversation/agent pairs are
//! currently running, starting them, stopping them, and bringing them
//! all back after a restart.
//!
//! Agents that aren't built-in (`agentClass` unset or unrecognized) are
//! assumed to connect themselves via the `agent-join` WebSocket client in
//! `oc_runtime::ws`; the host has nothing to supervise for those.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use oc_bus::{Bus, SubscribeOptions};
use oc_domain::{AgentMeta, Finality, Result};
use oc_runtime::{Agent, AgentRuntime, BusSubscriptionStream, EchoAgent, InProcessTransport, ScriptedAgent, ScriptedLine, UserQueryBroker};
use oc_scheduler::Scheduler;
use oc_store::EventStore;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Backoff between resubscribe attempts when a supervised agent's
/// subscription ends for a reason other than conversation completion
/// (e.g. it lagged). Intentionally short and fixed — this is recovering a
/// local subscription, not a flaky network link.
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(200);

struct RunningAgent {
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

pub struct AgentHost {
    store: Arc<dyn EventStore>,
    bus: Arc<Bus>,
    scheduler: Arc<Scheduler>,
    queries: Arc<UserQueryBroker>,
    running: Mutex<HashMap<(u64, String), RunningAgent>>,
}

impl AgentHost {
    pub fn new(store: Arc<dyn EventStore>, bus: Arc<Bus>, scheduler: Arc<Scheduler>, queries: Arc<UserQueryBroker>) -> Self {
        Self { store, bus, scheduler, queries, running: Mutex::new(HashMap::new()) }
    }

    /// Start supervising `agent_id` in `conversation_id` if it isn't
    /// already running and its `agentClass` names a built-in agent.
    /// Idempotent: a second `ensure` for the same pair is a no-op.
    pub fn ensure(&self, conversation_id: u64, meta: &AgentMeta) {
        let key = (conversation_id, meta.id.clone());
        if self.running.lock().contains_key(&key) {
            return;
        }
        let Some(agent) = build_builtin_agent(meta) else {
            tracing::debug!(conversation_id, agent_id = %meta.id, "no built-in agentClass; expecting an external agent-join connection");
            return;
        };

        let shutdown = CancellationToken::new();
        let task = self.spawn_supervisor(conversation_id, meta.id.clone(), agent, shutdown.clone());
        self.running.lock().insert(key, RunningAgent { shutdown, task });
        tracing::info!(conversation_id, agent_id = %meta.id, "agent started");
    }

    /// Stop supervising one agent. A no-op if it wasn't running.
    pub fn stop(&self, conversation_id: u64, agent_id: &str) {
        if let Some(running) = self.running.lock().remove(&(conversation_id, agent_id.to_string())) {
            running.shutdown.cancel();
            running.task.abort();
            tracing::info!(conversation_id, agent_id, "agent stopped");
        }
    }

    /// Stop every agent running for a conversation (called once it
    /// reaches conversation finality).
    pub fn stop_all_for(&self, conversation_id: u64) {
        let keys: Vec<(u64, String)> = self.running.lock().keys().filter(|(c, _)| *c == conversation_id).cloned().collect();
        for (conversation_id, agent_id) in keys {
            self.stop(conversation_id, &agent_id);
        }
    }

    /// Every `(conversation_id, agent_id)` pair currently supervised.
    pub fn list(&self) -> Vec<(u64, String)> {
        let mut keys: Vec<(u64, String)> = self.running.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Re-`ensure` every built-in agent of every still-active conversation.
    /// Called once at startup (§4.7, §8 scenario S6 — resurrection across
    /// restart): the store is the only durable state, so rebuilding
    /// supervision from it is sufficient to pick back up where a previous
    /// process left off.
    pub fn resume_all(&self) -> Result<()> {
        for conversation in self.store.list_conversations() {
            if !conversation.is_active() {
                continue;
            }
            for meta in conversation.metadata.agents.values() {
                self.ensure(conversation.id, meta);
            }
        }
        Ok(())
    }

    fn spawn_supervisor(
        &self,
        conversation_id: u64,
        agent_id: String,
        agent: Arc<dyn Agent>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let bus = self.bus.clone();
        let scheduler = self.scheduler.clone();
        let queries = self.queries.clone();

        tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    return;
                }
                let transport = Arc::new(InProcessTransport::new(store.clone(), bus.clone(), scheduler.clone(), queries.clone(), conversation_id, agent_id.clone()));
                let sub = match bus.subscribe(store.as_ref(), conversation_id, SubscribeOptions { since_seq: None, include_guidance: true }) {
                    Ok(sub) => sub,
                    Err(err) => {
                        tracing::warn!(conversation_id, agent_id = %agent_id, error = %err, "agent host could not subscribe; conversation may be gone");
                        return;
                    }
                };
                let runtime = AgentRuntime::new(agent.clone(), transport);

                tokio::select! {
                    result = runtime.run(Box::new(BusSubscriptionStream(sub))) => {
                        if let Err(err) = result {
                            tracing::warn!(conversation_id, agent_id = %agent_id, error = %err, "agent run loop errored");
                        }
                    }
                    _ = shutdown.cancelled() => return,
                }

                match store.get_conversation(conversation_id) {
                    Ok(conversation) if !conversation.is_active() => return,
                    Ok(_) => {
                        tokio::select! {
                            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                            _ = shutdown.cancelled() => return,
                        }
                    }
                    Err(_) => return,
                }
            }
        })
    }
}

fn build_builtin_agent(meta: &AgentMeta) -> Option<Arc<dyn Agent>> {
    match meta.agent_class.as_deref() {
        Some("echo") => Some(Arc::new(EchoAgent)),
        Some("scripted") => Some(Arc::new(ScriptedAgent::new(scripted_lines_from_config(meta)))),
        _ => None,
    }
}

fn scripted_lines_from_config(meta: &AgentMeta) -> Vec<ScriptedLine> {
    let Some(lines) = meta.config.as_ref().and_then(|c| c.get("lines")).and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    lines
        .iter()
        .filter_map(|line| {
            let text = line.get("text")?.as_str()?.to_string();
            let finality = match line.get("finality").and_then(|f| f.as_str()) {
                Some("turn") => Finality::Turn,
                Some("conversation") => Finality::Conversation,
                _ => Finality::None,
            };
            Some(ScriptedLine::new(text, finality))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_domain::{AppendRequest, ConversationMetadata};
    use oc_scheduler::DefaultPolicy;
    use oc_store::memory::MemoryStore;
    use std::collections::HashMap as StdHashMap;

    fn agents_metadata(echo: &str) -> ConversationMetadata {
        let mut agents = StdHashMap::new();
        agents.insert("user".to_string(), AgentMeta::new("user"));
        let mut meta = AgentMeta::new(echo);
        meta.agent_class = Some("echo".to_string());
        agents.insert(echo.to_string(), meta);
        ConversationMetadata { title: None, starting_agent_id: Some(echo.to_string()), agents }
    }

    #[tokio::test]
    async fn ensure_is_idempotent_for_the_same_pair() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), Default::default()));
        let host = AgentHost::new(store.clone(), bus, scheduler, Arc::new(UserQueryBroker::new()));

        let convo = store.create_conversation(agents_metadata("echo"));
        let meta = convo.metadata.agents.get("echo").unwrap().clone();
        host.ensure(convo.id, &meta);
        host.ensure(convo.id, &meta);

        assert_eq!(host.list(), vec![(convo.id, "echo".to_string())]);
        host.stop(convo.id, "echo");
        assert!(host.list().is_empty());
    }

    #[tokio::test]
    async fn supervised_echo_agent_answers_a_message() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), Default::default()));
        let host = AgentHost::new(store.clone(), bus.clone(), scheduler.clone(), Arc::new(UserQueryBroker::new()));

        let convo = store.create_conversation(agents_metadata("echo"));
        let meta = convo.metadata.agents.get("echo").unwrap().clone();
        host.ensure(convo.id, &meta);

        let event = store.append(convo.id, AppendRequest::message("user", "ping", Finality::Turn)).unwrap();
        let conversation = store.get_conversation(convo.id).unwrap();
        bus.publish_event(event.clone());
        scheduler.on_event_appended(&conversation, &event);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let events = store.read_range(convo.id, 0).unwrap();
        assert!(events.iter().any(|e| e.payload.as_text().starts_with("echo: ping")));

        host.stop(convo.id, "echo");
    }

    #[tokio::test]
    async fn resume_all_restarts_agents_for_active_conversations() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), Default::default()));
        store.create_conversation(agents_metadata("echo"));

        let host = AgentHost::new(store, bus, scheduler, Arc::new(UserQueryBroker::new()));
        host.resume_all().unwrap();
        assert_eq!(host.list().len(), 1);
    }
}
