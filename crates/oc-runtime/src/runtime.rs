//! The cooperative Idle → Handling → Idle/Stopped loop (§4.5): pull the
//! next stream item, and whenever it's guidance addressed to us, hand a
//! turn to the agent. One `run()` call is one connection's worth of work;
//! reconnect/restart supervision is [`crate::ws::run_agent`]'s job for
//! external agents, or `oc-host`'s for in-process ones.

use std::sync::Arc;

use oc_domain::{Event, Finality, Result};

use crate::agent::{Agent, RecoveryMode, TurnContext};
use crate::stream::{GuidanceStream, StreamItem};
use crate::transport::AgentTransport;

pub struct AgentRuntime<T: AgentTransport> {
    agent: Arc<dyn Agent>,
    transport: Arc<T>,
}

impl<T: AgentTransport + 'static> AgentRuntime<T> {
    pub fn new(agent: Arc<dyn Agent>, transport: Arc<T>) -> Self {
        Self { agent, transport }
    }

    /// Runs until the stream ends. Returns `Ok(())` on a clean end (stream
    /// closed); transport-level errors surface through the stream ending
    /// early rather than as an `Err` here, since "stream ended" is itself
    /// the reconnect signal callers act on.
    pub async fn run(&self, mut stream: Box<dyn GuidanceStream>) -> Result<()> {
        self.recover_on_start().await;

        let mut last_event: Option<Event> = None;
        loop {
            match stream.next().await {
                None => return Ok(()),
                Some(StreamItem::Event(event)) => {
                    last_event = Some(event);
                }
                Some(StreamItem::Guidance(guidance)) => {
                    if guidance.next_agent_id != self.transport.agent_id() {
                        continue;
                    }
                    let ctx = TurnContext {
                        agent_id: self.transport.agent_id(),
                        conversation: self.transport.conversation_id(),
                        guidance: guidance.clone(),
                        trigger: last_event.clone(),
                        transport: self.transport.as_ref(),
                    };
                    if let Err(err) = self.agent.handle_turn(&ctx).await {
                        tracing::warn!(
                            agent_id = ctx.agent_id,
                            conversation = ctx.conversation,
                            guidance_kind = guidance.kind.name(),
                            error = %err,
                            "agent returned an error handling its turn"
                        );
                    }
                }
            }
        }
    }

    /// Under `RecoveryMode::Restart`, a fresh run that finds itself still
    /// holding an open turn (left behind by a prior run that never
    /// returned) closes it out with an abort message rather than silently
    /// picking up where a — possibly dead — previous process left off.
    async fn recover_on_start(&self) {
        if self.agent.recovery_mode() != RecoveryMode::Restart {
            return;
        }
        let Ok(snapshot) = self.transport.snapshot().await else { return };
        if snapshot.open_turn_agent() != Some(self.transport.agent_id()) {
            return;
        }
        tracing::warn!(
            agent_id = self.transport.agent_id(),
            conversation = self.transport.conversation_id(),
            "restart recovery: closing a turn left open by a previous run"
        );
        let _ = self
            .transport
            .post_message("aborted: agent restarted".to_string(), Vec::new(), Finality::Turn, None)
            .await;
    }
}
