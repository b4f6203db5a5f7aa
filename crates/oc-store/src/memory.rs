//! `:memory:` backend: state lives only in the process, gone on restart.
//! Selected when `storage.db_path == ":memory:"`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use oc_domain::{AppendRequest, Conversation, ConversationMetadata, Event, Result};
use parking_lot::{Mutex, RwLock};

use crate::turn::ConversationState;
use crate::{unknown_conversation, EventStore};

pub struct MemoryStore {
    conversations: RwLock<HashMap<u64, Mutex<ConversationState>>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { conversations: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MemoryStore {
    fn create_conversation(&self, metadata: ConversationMetadata) -> Conversation {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let state = ConversationState::new(id, metadata);
        let conversation = state.conversation.clone();
        self.conversations.write().insert(id, Mutex::new(state));
        tracing::info!(conversation_id = id, "conversation created");
        conversation
    }

    fn get_conversation(&self, id: u64) -> Result<Conversation> {
        let guard = self.conversations.read();
        match guard.get(&id) {
            Some(lock) => Ok(lock.lock().conversation.clone()),
            None => unknown_conversation(id),
        }
    }

    fn list_conversations(&self) -> Vec<Conversation> {
        self.conversations.read().values().map(|lock| lock.lock().conversation.clone()).collect()
    }

    fn append(&self, conversation_id: u64, req: AppendRequest) -> Result<Event> {
        let guard = self.conversations.read();
        let Some(lock) = guard.get(&conversation_id) else {
            return unknown_conversation(conversation_id);
        };
        let mut state = lock.lock();
        let event = state.append(req)?;
        tracing::debug!(conversation_id, seq = event.seq, turn = event.turn, "event appended");
        Ok(event)
    }

    fn read_range(&self, conversation_id: u64, since_seq: u64) -> Result<Vec<Event>> {
        let guard = self.conversations.read();
        match guard.get(&conversation_id) {
            Some(lock) => Ok(lock.lock().events_since(since_seq)),
            None => unknown_conversation(conversation_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_domain::Finality;

    #[test]
    fn create_then_append_then_read_range() {
        let store = MemoryStore::new();
        let convo = store.create_conversation(ConversationMetadata::default());
        store.append(convo.id, AppendRequest::message("alice", "hi", Finality::Turn)).unwrap();
        store.append(convo.id, AppendRequest::message("bob", "yo", Finality::Turn)).unwrap();

        let events = store.read_range(convo.id, 0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[1].seq, 2);

        let tail = store.read_range(convo.id, 1).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].seq, 2);
    }

    #[test]
    fn unknown_conversation_surfaces_error() {
        let store = MemoryStore::new();
        let err = store.get_conversation(999).unwrap_err();
        assert!(matches!(err, oc_domain::Error::UnknownConversation(999)));
    }

    #[test]
    fn list_conversations_returns_all_created() {
        let store = MemoryStore::new();
        store.create_conversation(ConversationMetadata::default());
        store.create_conversation(ConversationMetadata::default());
        assert_eq!(store.list_conversations().len(), 2);
    }
}
