//! The scheduler engine: turns policy decisions into published
//! [`Guidance`], arbitrates competition claims, and sweeps expired
//! deadlines (§4.3, §5 cancellation/timeouts).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use oc_domain::config::SchedulerConfig;
use oc_domain::{AppendRequest, Conversation, Event, Finality, Guidance, GuidanceKind};
use oc_bus::Bus;
use oc_store::EventStore;
use parking_lot::Mutex;

use crate::policy::Policy;

struct PendingDeadline {
    turn: u64,
    candidates: Vec<String>,
    seq: u64,
    deadline: DateTime<Utc>,
    retries: u32,
}

#[derive(Default)]
struct ConvoState {
    last_turn: u64,
    ordinals: HashMap<u64, u32>,
    claim_winner: Option<String>,
    pending: Option<PendingDeadline>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Won,
    Lost,
}

pub struct Scheduler {
    store: Arc<dyn EventStore>,
    bus: Arc<Bus>,
    policy: Box<dyn Policy>,
    config: SchedulerConfig,
    state: Mutex<HashMap<u64, ConvoState>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn EventStore>, bus: Arc<Bus>, policy: Box<dyn Policy>, config: SchedulerConfig) -> Self {
        Self { store, bus, policy, config, state: Mutex::new(HashMap::new()) }
    }

    fn next_ordinal(state: &mut ConvoState, seq: u64) -> u32 {
        let counter = state.ordinals.entry(seq).or_insert(0);
        let ordinal = *counter;
        *counter += 1;
        ordinal
    }

    /// Call after every successful `append`. Emits guidance for turn
    /// closes; does nothing for `finality=none` (same agent keeps
    /// writing) or `finality=conversation` (nothing more to schedule).
    pub fn on_event_appended(&self, conversation: &Conversation, event: &Event) {
        if event.finality == Finality::None {
            return;
        }

        let mut guard = self.state.lock();
        let state = guard.entry(conversation.id).or_default();
        state.last_turn = event.turn;
        state.claim_winner = None;
        state.pending = None;

        if event.finality.closes_conversation() {
            drop(guard);
            self.state.lock().remove(&conversation.id);
            return;
        }

        let targets = self.policy.decide(conversation, event);
        if targets.is_empty() {
            return;
        }

        let deadline_ms = self.config.claim_ttl_ms;
        let next_turn = event.turn + 1;
        for target in &targets {
            let ordinal = Self::next_ordinal(state, event.seq);
            let guidance = Guidance {
                conversation: conversation.id,
                seq: event.seq,
                ordinal,
                next_agent_id: target.agent_id.clone(),
                kind: target.kind.clone(),
                deadline_ms: Some(deadline_ms),
            };
            self.bus.publish_guidance(guidance);
        }

        state.pending = Some(PendingDeadline {
            turn: next_turn,
            candidates: targets.into_iter().map(|t| t.agent_id).collect(),
            seq: event.seq,
            deadline: Utc::now() + Duration::milliseconds(deadline_ms as i64),
            retries: 0,
        });
    }

    /// What an agent should do right now, independent of a just-closed
    /// turn — used when an agent (re)subscribes and needs to know
    /// whether it's already mid-turn (`resume` recovery mode, §4.5).
    pub fn current_guidance(&self, conversation: &Conversation, agent_id: &str) -> Option<Guidance> {
        let (_, owner) = conversation.open_turn.as_ref()?;
        if owner != agent_id {
            return None;
        }
        let mut guard = self.state.lock();
        let state = guard.entry(conversation.id).or_default();
        let ordinal = Self::next_ordinal(state, conversation.last_closed_seq);
        Some(Guidance {
            conversation: conversation.id,
            seq: conversation.last_closed_seq,
            ordinal,
            next_agent_id: agent_id.to_string(),
            kind: GuidanceKind::ContinueTurn,
            deadline_ms: None,
        })
    }

    /// Arbitrate a competition-policy claim: first valid claim for the
    /// conversation's contended turn wins; everyone else loses and is
    /// told who won.
    pub fn claim(&self, conversation_id: u64, agent_id: &str) -> ClaimOutcome {
        let mut guard = self.state.lock();
        let state = guard.entry(conversation_id).or_default();

        if let Some(winner) = &state.claim_winner {
            if winner == agent_id {
                return ClaimOutcome::Won;
            }
            let ordinal = Self::next_ordinal(state, state.pending.as_ref().map(|p| p.seq).unwrap_or(0));
            let seq = state.pending.as_ref().map(|p| p.seq).unwrap_or(0);
            let guidance = Guidance {
                conversation: conversation_id,
                seq,
                ordinal,
                next_agent_id: agent_id.to_string(),
                kind: GuidanceKind::ClaimLost { winner: winner.clone() },
                deadline_ms: None,
            };
            drop(guard);
            self.bus.publish_guidance(guidance);
            return ClaimOutcome::Lost;
        }

        state.claim_winner = Some(agent_id.to_string());
        ClaimOutcome::Won
    }

    /// Sweep every conversation's pending deadline; expired ones get a
    /// persisted `claim_expired` system event, a `ClaimExpired` guidance
    /// to every candidate, and — within the retry bound — a fresh
    /// `StartTurn` re-offer.
    pub fn sweep_expired(&self) -> oc_domain::Result<()> {
        let now = Utc::now();
        let expired: Vec<(u64, PendingDeadline)> = {
            let mut guard = self.state.lock();
            guard
                .iter_mut()
                .filter_map(|(conversation_id, state)| {
                    let is_expired = state.pending.as_ref().is_some_and(|p| now >= p.deadline);
                    if is_expired {
                        state.pending.take().map(|p| (*conversation_id, p))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (conversation_id, pending) in expired {
            let conversation = match self.store.get_conversation(conversation_id) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if !conversation.is_active() {
                continue;
            }

            let event = self.store.append(
                conversation_id,
                AppendRequest::system(
                    "claim_expired",
                    serde_json::json!({ "turn": pending.turn, "candidates": pending.candidates, "retry": pending.retries }),
                ),
            )?;
            self.bus.publish_event(event);

            let mut guard = self.state.lock();
            let state = guard.entry(conversation_id).or_default();
            for candidate in &pending.candidates {
                let ordinal = Self::next_ordinal(state, pending.seq);
                self.bus.publish_guidance(Guidance {
                    conversation: conversation_id,
                    seq: pending.seq,
                    ordinal,
                    next_agent_id: candidate.clone(),
                    kind: GuidanceKind::ClaimExpired,
                    deadline_ms: None,
                });
            }

            if pending.retries + 1 > self.config.max_retries {
                tracing::warn!(conversation_id, turn = pending.turn, "turn abandoned after exhausting retries");
                continue;
            }

            let deadline_ms = self.config.claim_ttl_ms;
            for candidate in &pending.candidates {
                let ordinal = Self::next_ordinal(state, pending.seq);
                self.bus.publish_guidance(Guidance {
                    conversation: conversation_id,
                    seq: pending.seq,
                    ordinal,
                    next_agent_id: candidate.clone(),
                    kind: GuidanceKind::StartTurn,
                    deadline_ms: Some(deadline_ms),
                });
            }
            state.claim_winner = None;
            state.pending = Some(PendingDeadline {
                turn: pending.turn,
                candidates: pending.candidates,
                seq: pending.seq,
                deadline: now + Duration::milliseconds(deadline_ms as i64),
                retries: pending.retries + 1,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CompetitionPolicy, DefaultPolicy};
    use oc_bus::SubscribeOptions;
    use oc_domain::ConversationMetadata;
    use oc_store::memory::MemoryStore;
    use std::collections::HashMap as StdHashMap;

    fn metadata(agents: &[&str]) -> ConversationMetadata {
        ConversationMetadata {
            title: None,
            starting_agent_id: None,
            agents: agents.iter().map(|id| (id.to_string(), oc_domain::AgentMeta::new(*id))).collect::<StdHashMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn default_policy_emits_start_turn_to_next_agent() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let convo = store.create_conversation(metadata(&["user", "alpha", "beta"]));
        let scheduler = Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), SchedulerConfig::default());

        let mut sub = bus.subscribe(store.as_ref(), convo.id, SubscribeOptions { since_seq: None, include_guidance: true }).unwrap();
        let event = store.append(convo.id, AppendRequest::message("alpha", "hi", Finality::Turn)).unwrap();
        bus.publish_event(event.clone());
        let conversation = store.get_conversation(convo.id).unwrap();
        scheduler.on_event_appended(&conversation, &event);

        let _evt = sub.next().await.unwrap().unwrap();
        let item = sub.next().await.unwrap().unwrap();
        match item {
            oc_bus::BusItem::Guidance(g) => {
                assert_eq!(g.next_agent_id, "beta");
                assert_eq!(g.kind.name(), "start_turn");
            }
            other => panic!("expected guidance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn competition_claim_first_wins_rest_lose() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let convo = store.create_conversation(metadata(&["user", "a", "b", "c"]));
        let scheduler = Scheduler::new(store.clone(), bus.clone(), Box::new(CompetitionPolicy), SchedulerConfig::default());

        let event = store.append(convo.id, AppendRequest::message("user", "go", Finality::Turn)).unwrap();
        let conversation = store.get_conversation(convo.id).unwrap();
        scheduler.on_event_appended(&conversation, &event);

        assert_eq!(scheduler.claim(convo.id, "a"), ClaimOutcome::Won);
        assert_eq!(scheduler.claim(convo.id, "b"), ClaimOutcome::Lost);
        assert_eq!(scheduler.claim(convo.id, "a"), ClaimOutcome::Won);
    }

    #[tokio::test]
    async fn sweep_expired_appends_system_event_and_reissues() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let convo = store.create_conversation(metadata(&["user", "alpha", "beta"]));
        let mut config = SchedulerConfig::default();
        config.claim_ttl_ms = 1;
        let scheduler = Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), config);

        let event = store.append(convo.id, AppendRequest::message("alpha", "hi", Finality::Turn)).unwrap();
        let conversation = store.get_conversation(convo.id).unwrap();
        scheduler.on_event_appended(&conversation, &event);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        scheduler.sweep_expired().unwrap();

        let events = store.read_range(convo.id, 1).unwrap();
        assert!(events.iter().any(|e| e.event_type() == "system"));
    }

    #[tokio::test]
    async fn conversation_finality_clears_pending_state() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let convo = store.create_conversation(metadata(&["user", "alpha"]));
        let scheduler = Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), SchedulerConfig::default());

        let event = store.append(convo.id, AppendRequest::message("alpha", "bye", Finality::Conversation)).unwrap();
        let conversation = store.get_conversation(convo.id).unwrap();
        scheduler.on_event_appended(&conversation, &event);
        scheduler.sweep_expired().unwrap(); // no-op, nothing pending
    }
}
