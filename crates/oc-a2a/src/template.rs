//! The `{config64}` path segment of the A2A bridge endpoint: identifies
//! which internal agent a new task should be handed to and what agent id
//! to give the external A2A peer. Same base64url-of-JSON shape as
//! `oc_mcp::BridgeTemplate` — the two bridges don't share a crate, but
//! they share the convention.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use oc_domain::AgentMeta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeTemplate {
    pub internal_agent: AgentMeta,
    #[serde(default = "d_peer_agent_id")]
    pub peer_agent_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

fn d_peer_agent_id() -> String {
    "external".into()
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid template json: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeTemplate {
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("BridgeTemplate always serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(config64: &str) -> Result<Self, TemplateError> {
        let bytes = URL_SAFE_NO_PAD.decode(config64)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64url() {
        let template = BridgeTemplate {
            internal_agent: AgentMeta::new("claims-agent"),
            peer_agent_id: "external".into(),
            title: Some("support request".into()),
        };
        let encoded = template.encode();
        assert!(!encoded.contains('+') && !encoded.contains('/'));
        let decoded = BridgeTemplate::decode(&encoded).unwrap();
        assert_eq!(decoded.internal_agent.id, "claims-agent");
        assert_eq!(decoded.peer_agent_id, "external");
    }

    #[test]
    fn rejects_garbage() {
        assert!(BridgeTemplate::decode("!! not base64").is_err());
    }
}
