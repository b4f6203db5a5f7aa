//! The pluggable scheduling policies named in §4.3: default alternation
//! and competition (claim-based). Both only *decide*; claim arbitration,
//! deadline bookkeeping, and guidance publication live in
//! [`crate::scheduler::Scheduler`].

use oc_domain::{Conversation, ConversationMetadata, Event, GuidanceKind};

/// One agent a policy wants to notify, and how.
#[derive(Debug, Clone)]
pub struct PolicyTarget {
    pub agent_id: String,
    pub kind: GuidanceKind,
}

/// Decides who should act next after a turn closes. Implementations must
/// not look past `conversation`/`closed_event` — claims, retries, and
/// deadlines are the scheduler's job, not the policy's.
pub trait Policy: Send + Sync {
    fn decide(&self, conversation: &Conversation, closed_event: &Event) -> Vec<PolicyTarget>;
}

/// Resolves the tie-break rule left open by the distilled spec (§9 open
/// question #1): when `starting_agent_id` is absent and more than one
/// non-user agent is eligible, the lowest `agentId` lexicographically
/// wins.
pub fn pick_next(metadata: &ConversationMetadata, closer_id: &str) -> Option<String> {
    let mut non_user: Vec<String> = metadata.agents.keys().filter(|id| id.as_str() != "user").cloned().collect();
    non_user.sort();

    if closer_id == "user" {
        if let Some(starting) = &metadata.starting_agent_id {
            return Some(starting.clone());
        }
        return non_user.into_iter().next();
    }

    non_user.retain(|id| id != closer_id);
    non_user.into_iter().next()
}

/// Strict round-robin alternation among non-user agents (§4.3 rule 3).
pub struct DefaultPolicy;

impl Policy for DefaultPolicy {
    fn decide(&self, conversation: &Conversation, closed_event: &Event) -> Vec<PolicyTarget> {
        match pick_next(&conversation.metadata, &closed_event.agent_id) {
            Some(agent_id) => vec![PolicyTarget { agent_id, kind: GuidanceKind::StartTurn }],
            None => {
                tracing::warn!(
                    conversation = conversation.id,
                    "no eligible next agent after turn close — conversation metadata may be missing agents"
                );
                Vec::new()
            }
        }
    }
}

/// Every eligible non-user agent may attempt to claim the next turn;
/// the scheduler's claim arbitration picks exactly one winner.
pub struct CompetitionPolicy;

impl Policy for CompetitionPolicy {
    fn decide(&self, conversation: &Conversation, closed_event: &Event) -> Vec<PolicyTarget> {
        let mut eligible: Vec<String> =
            conversation.metadata.agents.keys().filter(|id| id.as_str() != "user" && id.as_str() != closed_event.agent_id).cloned().collect();
        eligible.sort();
        eligible.into_iter().map(|agent_id| PolicyTarget { agent_id, kind: GuidanceKind::StartTurn }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn metadata(agents: &[&str], starting: Option<&str>) -> ConversationMetadata {
        ConversationMetadata {
            title: None,
            starting_agent_id: starting.map(str::to_string),
            agents: agents.iter().map(|id| (id.to_string(), oc_domain::AgentMeta::new(*id))).collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn picks_lowest_id_among_ties() {
        let md = metadata(&["user", "zeta", "alpha", "mu"], None);
        assert_eq!(pick_next(&md, "zeta"), Some("alpha".into()));
    }

    #[test]
    fn excludes_the_closer() {
        let md = metadata(&["user", "alpha", "beta"], None);
        assert_eq!(pick_next(&md, "alpha"), Some("beta".into()));
    }

    #[test]
    fn user_closer_uses_starting_agent() {
        let md = metadata(&["user", "alpha", "beta"], Some("beta"));
        assert_eq!(pick_next(&md, "user"), Some("beta".into()));
    }

    #[test]
    fn user_closer_without_starting_agent_picks_first_lexicographic() {
        let md = metadata(&["user", "zeta", "alpha"], None);
        assert_eq!(pick_next(&md, "user"), Some("alpha".into()));
    }

    #[test]
    fn competition_policy_excludes_closer_and_user() {
        let md = metadata(&["user", "alpha", "beta", "gamma"], None);
        let conversation = Conversation::new(1, md);
        let event = oc_domain::Event {
            conversation: 1,
            turn: 1,
            event: 1,
            seq: 1,
            agent_id: "alpha".into(),
            payload: oc_domain::EventPayload::Message { text: "hi".into(), attachments: vec![] },
            finality: oc_domain::Finality::Turn,
            ts: chrono::Utc::now(),
            client_request_id: None,
        };
        let targets = CompetitionPolicy.decide(&conversation, &event);
        let ids: Vec<&str> = targets.iter().map(|t| t.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["beta", "gamma"]);
    }
}
