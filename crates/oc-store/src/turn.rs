//! The turn state machine and append algorithm (§4.1/§4.2), as pure logic
//! over a single conversation's in-memory state. Both storage backends
//! drive a conversation through this module; neither reimplements the
//! rules themselves.

use chrono::Utc;
use oc_domain::{
    AppendRequest, Conversation, ConversationMetadata, ConversationStatus, Error, Event, EventPayload, Finality,
    Result,
};

/// Everything the store needs to know about one conversation: its public
/// state plus the full event log and the idempotency index.
pub struct ConversationState {
    pub conversation: Conversation,
    pub events: Vec<Event>,
    /// `(agent_id, client_request_id) -> seq`, for idempotent retry.
    seen_requests: std::collections::HashMap<(String, String), u64>,
    /// event count within the currently open (or most recently closed) turn.
    turn_event_count: u64,
}

impl ConversationState {
    pub fn new(id: u64, metadata: ConversationMetadata) -> Self {
        Self {
            conversation: Conversation::new(id, metadata),
            events: Vec::new(),
            seen_requests: std::collections::HashMap::new(),
            turn_event_count: 0,
        }
    }

    pub fn events_since(&self, since_seq: u64) -> Vec<Event> {
        self.events.iter().filter(|e| e.seq > since_seq).cloned().collect()
    }

    /// Re-apply an already-assigned event from a durable log during store
    /// startup, restoring the idempotency index and in-turn event counter
    /// without recomputing `turn`/`event`/`seq` (those are already final).
    pub fn replay_event(&mut self, event: Event) {
        self.turn_event_count = event.event;
        if let Some(client_request_id) = &event.client_request_id {
            self.seen_requests.insert((event.agent_id.clone(), client_request_id.clone()), event.seq);
        }
        self.events.push(event);
    }

    /// Apply an append request, mutating conversation + log state and
    /// returning the newly created event. This is the sole place that
    /// assigns `turn`, `event`, `seq`, `ts`.
    pub fn append(&mut self, req: AppendRequest) -> Result<Event> {
        if !self.conversation.is_active() {
            return Err(Error::ClosedConversation);
        }

        if let Some(client_request_id) = &req.client_request_id {
            let key = (req.agent_id.clone(), client_request_id.clone());
            if let Some(&existing_seq) = self.seen_requests.get(&key) {
                return Err(Error::DuplicateRequest { existing_seq });
            }
        }

        let is_trace = matches!(req.payload, EventPayload::Trace { .. });
        let is_system = matches!(req.payload, EventPayload::System { .. });

        let turn = match &self.conversation.open_turn {
            Some((turn, owner)) => {
                if !is_system && owner != &req.agent_id {
                    return Err(Error::WrongAuthor);
                }
                *turn
            }
            None => {
                if is_trace {
                    return Err(Error::NoOpenTurn);
                }
                if is_system {
                    // System bookkeeping events don't open a turn; they ride
                    // on turn 0 and never affect open_turn/last_closed_seq
                    // beyond finality if explicitly requested.
                    0
                } else {
                    let next_turn = self.conversation.open_turn.as_ref().map(|(t, _)| t + 1).unwrap_or_else(|| {
                        self.events.iter().map(|e| e.turn).max().unwrap_or(0) + 1
                    });
                    self.conversation.open_turn = Some((next_turn, req.agent_id.clone()));
                    self.turn_event_count = 0;
                    next_turn
                }
            }
        };

        self.turn_event_count += 1;
        let seq = self.events.last().map(|e| e.seq + 1).unwrap_or(1);

        let event = Event {
            conversation: self.conversation.id,
            turn,
            event: self.turn_event_count,
            seq,
            agent_id: req.agent_id,
            payload: req.payload,
            finality: req.finality,
            ts: Utc::now(),
            client_request_id: req.client_request_id.clone(),
        };

        if let Some(client_request_id) = req.client_request_id {
            self.seen_requests.insert((event.agent_id.clone(), client_request_id), seq);
        }

        if event.finality.closes_turn() {
            self.conversation.open_turn = None;
            self.conversation.last_closed_seq = seq;
            self.turn_event_count = 0;
        }
        if event.finality.closes_conversation() {
            self.conversation.status = ConversationStatus::Completed;
        }

        self.events.push(event.clone());
        Ok(event)
    }
}
