//! A2A wire shapes: the JSON-RPC envelope `message/stream` and
//! `tasks/*` arrive in, and the SSE frames (`task`, `message`,
//! `status-update`) the bridge emits back.

use oc_domain::{Attachment, AttachmentContent, Event, EventPayload};
use serde::{Deserialize, Serialize};

/// One request arriving at `POST /api/bridge/{config64}/a2a`.
#[derive(Debug, Clone, Deserialize)]
pub struct A2aRequest {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

/// A part of an A2A message — text or a file attachment. Attachment bytes
/// are base64 of UTF-8 and pass through unchanged between the wire and
/// `oc_domain::AttachmentContent::Bytes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    File { file: FilePart },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePart {
    pub name: String,
    pub mime_type: String,
    pub bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2aMessage {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStreamParams {
    pub message: A2aMessage,
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    pub task_id: String,
}

/// `state` a task/turn is in, derived from turn open/closed and
/// conversation finality. `completed` is only ever emitted once the
/// conversation-finality event is durably appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub role: String,
    pub parts: Vec<Part>,
}

/// The initial SSE frame of a `message/stream`/`tasks/resubscribe` reply:
/// a full snapshot of the task so far.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFrame {
    pub task_id: String,
    pub status: TaskStatus,
    pub history: Vec<HistoryEntry>,
}

/// A new message from the internal counterpart.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFrame {
    pub task_id: String,
    pub message: HistoryEntry,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateFrame {
    pub task_id: String,
    pub status: TaskStatus,
    pub r#final: bool,
}

pub fn role_for(agent_id: &str, peer_agent_id: &str) -> String {
    if agent_id == peer_agent_id { "user".into() } else { "agent".into() }
}

/// Renders one persisted event as history/message parts. Traces and
/// system events carry no externally meaningful parts and are skipped.
pub fn parts_for_event(event: &Event) -> Option<Vec<Part>> {
    match &event.payload {
        EventPayload::Message { text, attachments } => {
            let mut parts = Vec::new();
            if !text.is_empty() {
                parts.push(Part::Text { text: text.clone() });
            }
            for attachment in attachments {
                parts.push(Part::File { file: file_part_for(attachment) });
            }
            Some(parts)
        }
        EventPayload::Trace { .. } | EventPayload::System { .. } => None,
    }
}

fn file_part_for(attachment: &Attachment) -> FilePart {
    let bytes = match &attachment.content {
        AttachmentContent::Bytes { bytes } => bytes.clone(),
        AttachmentContent::Uri { uri } => uri.clone(),
    };
    FilePart { name: attachment.name.clone(), mime_type: attachment.mime_type.clone(), bytes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_domain::Finality;

    #[test]
    fn trace_events_produce_no_parts() {
        let event = Event {
            conversation: 1,
            turn: 1,
            event: 1,
            seq: 1,
            agent_id: "a".into(),
            payload: EventPayload::Trace { text: "thinking".into() },
            finality: Finality::None,
            ts: chrono::Utc::now(),
            client_request_id: None,
        };
        assert!(parts_for_event(&event).is_none());
    }

    #[test]
    fn message_with_attachment_round_trips_base64() {
        let event = Event {
            conversation: 1,
            turn: 1,
            event: 1,
            seq: 1,
            agent_id: "a".into(),
            payload: EventPayload::Message {
                text: "see attached".into(),
                attachments: vec![Attachment {
                    name: "note.txt".into(),
                    mime_type: "text/plain".into(),
                    content: AttachmentContent::Bytes { bytes: "VmlzaW9u".into() },
                }],
            },
            finality: Finality::Turn,
            ts: chrono::Utc::now(),
            client_request_id: None,
        };
        let parts = parts_for_event(&event).unwrap();
        let Part::File { file } = &parts[1] else { panic!("expected file part") };
        assert_eq!(file.bytes, "VmlzaW9u");
    }

    #[test]
    fn role_for_maps_peer_to_user() {
        assert_eq!(role_for("external", "external"), "user");
        assert_eq!(role_for("claims-agent", "external"), "agent");
    }
}
