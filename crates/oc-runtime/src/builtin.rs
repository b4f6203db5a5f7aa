//! Reference agents used for smoke-testing a deployment and for the
//! scenario tests in `oc-gateway`: [`EchoAgent`] just answers back,
//! [`ScriptedAgent`] plays a fixed line-by-line script (handy for
//! deterministic multi-turn and competition scenarios).

use std::collections::VecDeque;

use async_trait::async_trait;
use oc_domain::{Finality, Result};
use oc_scheduler::ClaimOutcome;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::agent::{Agent, TurnContext};

/// Posts a trace, then a single `echo: <trigger text>` message that closes
/// the turn. Used by scenario S1 and as a deployment smoke test.
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn handle_turn(&self, ctx: &TurnContext<'_>) -> Result<()> {
        let prompt = ctx.trigger.as_ref().map(|e| e.payload.as_text().to_string()).unwrap_or_default();
        ctx.transport.post_trace("echoing".to_string()).await?;
        ctx.transport
            .post_message(format!("echo: {prompt}"), Vec::new(), Finality::Turn, Some(Uuid::new_v4().to_string()))
            .await?;
        Ok(())
    }
}

/// One line of a [`ScriptedAgent`]'s script.
#[derive(Debug, Clone)]
pub struct ScriptedLine {
    pub text: String,
    pub finality: Finality,
}

impl ScriptedLine {
    pub fn new(text: impl Into<String>, finality: Finality) -> Self {
        Self { text: text.into(), finality }
    }
}

/// Plays a fixed sequence of lines, one per turn it's handed, regardless of
/// what the trigger said. Always attempts [`crate::transport::AgentTransport::claim_turn`]
/// first, so the same agent works under both default and competition
/// policy: under default policy the claim is uncontested and always wins;
/// under competition policy, a lost claim means standing down silently.
/// Once the script is exhausted, closes the conversation with an empty
/// final message.
pub struct ScriptedAgent {
    lines: Mutex<VecDeque<ScriptedLine>>,
}

impl ScriptedAgent {
    pub fn new(lines: impl IntoIterator<Item = ScriptedLine>) -> Self {
        Self { lines: Mutex::new(lines.into_iter().collect()) }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn handle_turn(&self, ctx: &TurnContext<'_>) -> Result<()> {
        if ctx.transport.claim_turn().await? == ClaimOutcome::Lost {
            return Ok(());
        }

        let next = self.lines.lock().pop_front();
        match next {
            Some(line) => {
                ctx.transport
                    .post_message(line.text, Vec::new(), line.finality, Some(Uuid::new_v4().to_string()))
                    .await?;
            }
            None => {
                ctx.transport
                    .post_message(String::new(), Vec::new(), Finality::Conversation, Some(Uuid::new_v4().to_string()))
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inprocess::{InProcessTransport, UserQueryBroker};
    use crate::runtime::AgentRuntime;
    use crate::stream::BusSubscriptionStream;
    use oc_bus::{Bus, SubscribeOptions};
    use oc_domain::{AppendRequest, ConversationMetadata};
    use oc_scheduler::{DefaultPolicy, Scheduler};
    use oc_store::memory::MemoryStore;
    use oc_store::EventStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn echo_agent_answers_the_trigger_and_closes_the_turn() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), Default::default()));
        let convo =
            store.create_conversation(ConversationMetadata { agents: [("user".into(), oc_domain::AgentMeta::new("user")), ("echo".into(), oc_domain::AgentMeta::new("echo"))].into(), ..Default::default() });

        let sub = bus.subscribe(store.as_ref(), convo.id, SubscribeOptions { since_seq: None, include_guidance: true }).unwrap();
        let transport = Arc::new(InProcessTransport::new(store.clone(), bus.clone(), scheduler.clone(), Arc::new(UserQueryBroker::new()), convo.id, "echo"));
        let runtime = AgentRuntime::new(Arc::new(EchoAgent), transport);

        let event = store.append(convo.id, AppendRequest::message("user", "ping", Finality::Turn)).unwrap();
        let conversation = store.get_conversation(convo.id).unwrap();
        bus.publish_event(event.clone());
        scheduler.on_event_appended(&conversation, &event);

        // Drive one turn's worth of the run loop, then stop by closing
        // the conversation so the stream ends on its own.
        let run = tokio::spawn({
            let store = store.clone();
            let bus = bus.clone();
            async move {
                runtime.run(Box::new(BusSubscriptionStream(sub))).await.unwrap();
                (store, bus)
            }
        });

        // Give the echo agent time to post, then close the conversation
        // so `run` returns.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let closing = store.append(convo.id, AppendRequest::message("user", "bye", Finality::Conversation)).unwrap();
        bus.publish_event(closing);
        tokio::time::timeout(std::time::Duration::from_secs(2), run).await.unwrap().unwrap();

        let events = store.read_range(convo.id, 0).unwrap();
        let echoed = events.iter().find(|e| e.payload.as_text().starts_with("echo: ping"));
        assert!(echoed.is_some());
    }

    #[tokio::test]
    async fn scripted_agent_plays_lines_in_order() {
        let agent = ScriptedAgent::new(vec![ScriptedLine::new("first", Finality::Turn), ScriptedLine::new("second", Finality::Conversation)]);
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), Default::default()));
        let convo = store.create_conversation(ConversationMetadata::default());
        let transport = Arc::new(InProcessTransport::new(store.clone(), bus, scheduler, Arc::new(UserQueryBroker::new()), convo.id, "scripted"));

        let ctx = TurnContext {
            agent_id: "scripted",
            conversation: convo.id,
            guidance: oc_domain::Guidance { conversation: convo.id, seq: 0, ordinal: 0, next_agent_id: "scripted".into(), kind: oc_domain::GuidanceKind::StartTurn, deadline_ms: None },
            trigger: None,
            transport: transport.as_ref(),
        };
        agent.handle_turn(&ctx).await.unwrap();
        agent.handle_turn(&ctx).await.unwrap();

        let events = store.read_range(convo.id, 0).unwrap();
        assert_eq!(events[0].payload.as_text(), "first");
        assert_eq!(events[1].payload.as_text(), "second");
    }
}
