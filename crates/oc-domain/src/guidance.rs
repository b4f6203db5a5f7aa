//! Scheduler output. Guidance is derived from the log, not persisted as
//! an event — it tells one agent to act, and is replayable/idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduler hint addressed to a specific agent. Kept as a tagged sum
/// rather than one struct with an optional "reason" field, so that each
/// variant only carries the fields that make sense for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuidanceKind {
    /// Open a new turn — there was no open turn before this guidance.
    StartTurn,
    /// Keep writing in the turn that is already open and owned by this agent.
    ContinueTurn,
    /// Another agent's claim won the race for this turn; told so it can stop
    /// retrying under competition policy.
    ClaimLost { winner: String },
    /// A claim or open turn expired without being acted on.
    ClaimExpired,
}

impl GuidanceKind {
    pub fn name(&self) -> &'static str {
        match self {
            GuidanceKind::StartTurn => "start_turn",
            GuidanceKind::ContinueTurn => "continue_turn",
            GuidanceKind::ClaimLost { .. } => "claim_lost",
            GuidanceKind::ClaimExpired => "claim_expired",
        }
    }
}

/// A single instruction emitted by the scheduler. Identity for idempotency
/// purposes is `(conversation, seq, next_agent_id)`: replaying the same
/// triple is a no-op for an agent that already acted on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guidance {
    pub conversation: u64,
    /// The seq of the event that caused this guidance to be generated.
    /// Ordering within that seq (when more than one guidance follows the
    /// same close) is carried by `ordinal`.
    pub seq: u64,
    pub ordinal: u32,
    pub next_agent_id: String,
    #[serde(flatten)]
    pub kind: GuidanceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl Guidance {
    pub fn identity(&self) -> (u64, u64, u32, &str) {
        (self.conversation, self.seq, self.ordinal, self.next_agent_id.as_str())
    }
}

/// A reservation on the right to open a given turn, used only under
/// competition policy. Exactly one claim per `(conversation, turn)` may
/// succeed; the rest fail with the winner's agent id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnClaim {
    pub conversation: u64,
    pub turn: u64,
    pub agent_id: String,
    pub expires_at: DateTime<Utc>,
}

impl TurnClaim {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn claim_expiry_is_inclusive() {
        let now = Utc::now();
        let claim = TurnClaim {
            conversation: 1,
            turn: 1,
            agent_id: "a".into(),
            expires_at: now,
        };
        assert!(claim.is_expired(now));
        assert!(!claim.is_expired(now - Duration::milliseconds(1)));
    }

    #[test]
    fn guidance_kind_names_match_wire_values() {
        assert_eq!(GuidanceKind::StartTurn.name(), "start_turn");
        assert_eq!(GuidanceKind::ContinueTurn.name(), "continue_turn");
        assert_eq!(GuidanceKind::ClaimExpired.name(), "claim_expired");
    }
}
