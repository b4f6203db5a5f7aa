//! The capability set an [`crate::agent::Agent`] is allowed to use (§4.5):
//! post a message or trace, attempt a competition claim, read a snapshot,
//! fetch an attachment, or ask the human a question. Deliberately narrow —
//! an agent never sees the store, the bus, or the scheduler directly.

use std::time::Duration;

use async_trait::async_trait;
use oc_domain::{Attachment, Conversation, Finality, Result};
use oc_protocol::methods::AppendResult;
use oc_scheduler::ClaimOutcome;

#[async_trait]
pub trait AgentTransport: Send + Sync {
    fn agent_id(&self) -> &str;

    fn conversation_id(&self) -> u64;

    async fn post_message(
        &self,
        text: String,
        attachments: Vec<Attachment>,
        finality: Finality,
        client_request_id: Option<String>,
    ) -> Result<AppendResult>;

    async fn post_trace(&self, text: String) -> Result<AppendResult>;

    /// Attempt to reserve the next turn under competition policy. Transports
    /// that cannot arbitrate locally (e.g. a remote WebSocket agent) may
    /// answer optimistically and rely on the store's `WrongAuthor` error as
    /// the hard backstop when the agent actually posts.
    async fn claim_turn(&self) -> Result<ClaimOutcome>;

    async fn snapshot(&self) -> Result<Conversation>;

    async fn get_attachment(&self, name: &str) -> Result<Option<Attachment>>;

    async fn query_user(&self, prompt: String, timeout: Duration) -> Result<String>;
}
