//! Conversation and agent metadata — the "who" and "what's it about" that
//! sits above the event log.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lifecycle of a [`Conversation`]: created → active → completed, never
/// reopened once completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Completed,
}

/// Purely descriptive metadata for one participant. Identity is the `id`;
/// everything else is advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl AgentMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), agent_class: None, config: None }
    }
}

/// An opaque attachment carried inside a message payload. Content is never
/// interpreted by the orchestrator itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    #[serde(flatten)]
    pub content: AttachmentContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentContent {
    /// Base64-encoded bytes, inline.
    Bytes { bytes: String },
    /// A reference to out-of-band content (e.g. a blob store URI).
    Uri { uri: String },
}

/// Descriptive, non-authoritative conversation metadata supplied at
/// creation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub agents: HashMap<String, AgentMeta>,
}

/// A conversation's authoritative state, as held by the store. `open_turn`
/// is the single source of truth for "who may append right now" (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: u64,
    pub status: ConversationStatus,
    pub metadata: ConversationMetadata,
    /// Highest `seq` that closed a turn or the conversation; `0` if none yet.
    pub last_closed_seq: u64,
    /// `(turn, agent_id)` of the currently open turn, if any.
    pub open_turn: Option<(u64, String)>,
}

impl Conversation {
    pub fn new(id: u64, metadata: ConversationMetadata) -> Self {
        Self {
            id,
            status: ConversationStatus::Active,
            metadata,
            last_closed_seq: 0,
            open_turn: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, ConversationStatus::Active)
    }

    pub fn open_turn_agent(&self) -> Option<&str> {
        self.open_turn.as_ref().map(|(_, agent)| agent.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_conversation_is_active_with_no_open_turn() {
        let c = Conversation::new(1, ConversationMetadata::default());
        assert!(c.is_active());
        assert_eq!(c.open_turn_agent(), None);
        assert_eq!(c.last_closed_seq, 0);
    }

    #[test]
    fn attachment_bytes_variant_serializes_flat() {
        let a = Attachment {
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            content: AttachmentContent::Bytes { bytes: "aGk=".into() },
        };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["bytes"], "aGk=");
        assert_eq!(json["name"], "a.txt");
    }
}
