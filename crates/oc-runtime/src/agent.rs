//! The agent contract (§4.5): react to one turn's worth of guidance, using
//! only what [`crate::transport::AgentTransport`] exposes.

use async_trait::async_trait;
use oc_domain::{Event, Guidance, Result};

use crate::transport::AgentTransport;

/// How an agent wants to recover from a dropped connection or restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Pick up the turn it was mid-way through, if any, as if nothing
    /// happened — assumes the agent kept its own state.
    Resume,
    /// Assume no memory of the turn survived the interruption: close out
    /// whatever turn it's still shown as holding with an abort message,
    /// then wait for fresh guidance.
    Restart,
}

/// Everything an agent needs to act on a single piece of guidance: the
/// guidance itself, the event that triggered it (when there is one — a
/// freshly-opened conversation has no prior event), and the transport it's
/// allowed to use.
pub struct TurnContext<'a> {
    pub agent_id: &'a str,
    pub conversation: u64,
    pub guidance: Guidance,
    pub trigger: Option<Event>,
    pub transport: &'a dyn AgentTransport,
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn recovery_mode(&self) -> RecoveryMode {
        RecoveryMode::Restart
    }

    async fn handle_turn(&self, ctx: &TurnContext<'_>) -> Result<()>;
}
