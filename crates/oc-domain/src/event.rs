//! The event log's unit of record.
//!
//! An [`Event`] is created once by the store and never mutated afterward;
//! callers reference it forever by `seq`. See the store crate for the
//! append algorithm that assigns `turn`/`event`/`seq`/`ts`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Attachment;

/// How final an event is, from the perspective of the turn/conversation
/// it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finality {
    /// More events from this agent are coming in this turn.
    None,
    /// This event closes the current turn.
    Turn,
    /// This event closes the current turn AND the conversation forever.
    Conversation,
}

impl Default for Finality {
    fn default() -> Self {
        Finality::None
    }
}

impl Finality {
    pub fn closes_turn(self) -> bool {
        matches!(self, Finality::Turn | Finality::Conversation)
    }

    pub fn closes_conversation(self) -> bool {
        matches!(self, Finality::Conversation)
    }
}

/// The payload carried by an event, tagged by event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A message authored by an agent — the unit of conversational content.
    Message {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
    /// Ephemeral reasoning/progress content. Requires an open turn owned by
    /// the same agent (`NoOpenTurn` otherwise — see §4.1 of the spec).
    Trace { text: String },
    /// Orchestrator-authored bookkeeping (`claim_expired`, aborts, etc.).
    System {
        kind: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::Message { .. } => "message",
            EventPayload::Trace { .. } => "trace",
            EventPayload::System { .. } => "system",
        }
    }

    pub fn as_text(&self) -> &str {
        match self {
            EventPayload::Message { text, .. } => text,
            EventPayload::Trace { text } => text,
            EventPayload::System { kind, .. } => kind,
        }
    }
}

/// Input to `EventStore::append` — everything the caller supplies; the
/// store computes `turn`, `event`, `seq`, and `ts` itself.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub agent_id: String,
    pub payload: EventPayload,
    pub finality: Finality,
    pub client_request_id: Option<String>,
}

impl AppendRequest {
    pub fn message(agent_id: impl Into<String>, text: impl Into<String>, finality: Finality) -> Self {
        Self {
            agent_id: agent_id.into(),
            payload: EventPayload::Message { text: text.into(), attachments: Vec::new() },
            finality,
            client_request_id: None,
        }
    }

    pub fn trace(agent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            payload: EventPayload::Trace { text: text.into() },
            finality: Finality::None,
            client_request_id: None,
        }
    }

    pub fn system(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            agent_id: "system".into(),
            payload: EventPayload::System { kind: kind.into(), data },
            finality: Finality::None,
            client_request_id: None,
        }
    }

    pub fn with_client_request_id(mut self, id: impl Into<String>) -> Self {
        self.client_request_id = Some(id.into());
        self
    }
}

/// A single, immutable entry in a conversation's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub conversation: u64,
    /// 1-based turn number within the conversation.
    pub turn: u64,
    /// 1-based event number within the turn.
    pub event: u64,
    /// Strictly monotonic, gap-free sequence number within the conversation.
    pub seq: u64,
    pub agent_id: String,
    pub payload: EventPayload,
    pub finality: Finality,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        self.payload.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finality_closes_turn_and_conversation() {
        assert!(!Finality::None.closes_turn());
        assert!(Finality::Turn.closes_turn());
        assert!(Finality::Conversation.closes_turn());
        assert!(!Finality::Turn.closes_conversation());
        assert!(Finality::Conversation.closes_conversation());
    }

    #[test]
    fn message_payload_roundtrips() {
        let req = AppendRequest::message("echo", "ping", Finality::Turn);
        let json = serde_json::to_value(&req.payload).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["text"], "ping");
    }
}
