//! Server-to-client notification envelopes pushed over the WebSocket
//! transport: `event`, `guidance`, `broadcast`.

use oc_domain::{Event, Guidance};
use serde::{Deserialize, Serialize};

use crate::jsonrpc::JsonRpcNotification;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNotificationParams {
    pub subscription_id: String,
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceNotificationParams {
    pub subscription_id: String,
    pub guidance: Guidance,
}

/// Server-wide notices not tied to a single subscription (e.g. shutdown
/// warnings). Rarely used but part of the method surface in §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastNotificationParams {
    pub text: String,
}

pub fn event_notification(params: EventNotificationParams) -> JsonRpcNotification {
    JsonRpcNotification::new("event", serde_json::to_value(params).expect("serializable"))
}

pub fn guidance_notification(params: GuidanceNotificationParams) -> JsonRpcNotification {
    JsonRpcNotification::new("guidance", serde_json::to_value(params).expect("serializable"))
}

pub fn broadcast_notification(text: impl Into<String>) -> JsonRpcNotification {
    JsonRpcNotification::new(
        "broadcast",
        serde_json::to_value(BroadcastNotificationParams { text: text.into() }).expect("serializable"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_domain::{AppendRequest, Finality};
    use chrono::Utc;

    #[test]
    fn event_notification_has_method_event() {
        let req = AppendRequest::message("agent-a", "hi", Finality::None);
        let event = Event {
            conversation: 1,
            turn: 1,
            event: 1,
            seq: 1,
            agent_id: req.agent_id,
            payload: req.payload,
            finality: req.finality,
            ts: Utc::now(),
            client_request_id: None,
        };
        let notif = event_notification(EventNotificationParams { subscription_id: "sub1".into(), event });
        assert_eq!(notif.method, "event");
        assert!(notif.params.is_some());
    }
}
