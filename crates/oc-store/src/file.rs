//! File-backed store: one newline-delimited JSON file per conversation's
//! event log, plus a `conversations.json` index of conversation state.
//! Selected when `storage.db_path` is a directory path rather than
//! `:memory:`. Gives §8's **S6 Resurrection** property a concrete backend.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use oc_domain::{AppendRequest, Conversation, ConversationMetadata, Event, Result};
use parking_lot::{Mutex, RwLock};

use crate::turn::ConversationState;
use crate::{unknown_conversation, EventStore};

pub struct FileStore {
    base_dir: PathBuf,
    conversations: RwLock<HashMap<u64, Mutex<ConversationState>>>,
    next_id: AtomicU64,
}

impl FileStore {
    /// Open (or create) the store rooted at `base_dir`, replaying every
    /// conversation's JSONL log to reconstruct in-memory state.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(base_dir.join("conversations")).map_err(oc_domain::Error::Io)?;

        let index_path = base_dir.join("conversations.json");
        let mut max_id = 0u64;
        let mut conversations = HashMap::new();

        if index_path.exists() {
            let raw = fs::read_to_string(&index_path).map_err(oc_domain::Error::Io)?;
            let entries: Vec<Conversation> = serde_json::from_str(&raw).unwrap_or_default();
            for conversation in entries {
                max_id = max_id.max(conversation.id);
                let mut state = ConversationState::new(conversation.id, conversation.metadata.clone());
                state.conversation = conversation.clone();
                replay_log(&base_dir, conversation.id, &mut state)?;
                conversations.insert(conversation.id, Mutex::new(state));
            }
        }

        tracing::info!(conversations = conversations.len(), path = %base_dir.display(), "file store loaded");

        Ok(Self { base_dir, conversations: RwLock::new(conversations), next_id: AtomicU64::new(max_id + 1) })
    }

    fn log_path(&self, conversation_id: u64) -> PathBuf {
        self.base_dir.join("conversations").join(format!("{conversation_id}.jsonl"))
    }

    fn append_to_log(&self, conversation_id: u64, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(conversation_id))
            .map_err(oc_domain::Error::Io)?;
        let line = serde_json::to_string(event).map_err(oc_domain::Error::Json)?;
        writeln!(file, "{line}").map_err(oc_domain::Error::Io)?;
        Ok(())
    }

    /// Persist the conversation index to disk. Called on a background
    /// interval and immediately after any event that closes a conversation.
    pub fn flush_index(&self) -> Result<()> {
        let guard = self.conversations.read();
        let snapshot: Vec<Conversation> = guard.values().map(|lock| lock.lock().conversation.clone()).collect();
        let json = serde_json::to_string_pretty(&snapshot).map_err(oc_domain::Error::Json)?;
        fs::write(self.base_dir.join("conversations.json"), json).map_err(oc_domain::Error::Io)?;
        Ok(())
    }
}

fn replay_log(base_dir: &Path, conversation_id: u64, state: &mut ConversationState) -> Result<()> {
    let path = base_dir.join("conversations").join(format!("{conversation_id}.jsonl"));
    if !path.exists() {
        return Ok(());
    }
    let file = File::open(&path).map_err(oc_domain::Error::Io)?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(oc_domain::Error::Io)?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line).map_err(oc_domain::Error::Json)?;
        state.replay_event(event);
    }
    Ok(())
}

impl EventStore for FileStore {
    fn create_conversation(&self, metadata: ConversationMetadata) -> Conversation {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let state = ConversationState::new(id, metadata);
        let conversation = state.conversation.clone();
        self.conversations.write().insert(id, Mutex::new(state));
        if let Err(err) = self.flush_index() {
            tracing::warn!(conversation_id = id, %err, "failed to flush conversation index");
        }
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
        self.append_to_log(conversation_id, &event)?;
        let closes_conversation = event.finality.closes_conversation();
        drop(state);
        drop(guard);
        if closes_conversation {
            self.flush_index()?;
        }
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
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let convo_id = {
            let store = FileStore::open(dir.path()).unwrap();
            let convo = store.create_conversation(ConversationMetadata::default());
            store.append(convo.id, AppendRequest::message("alice", "hi", Finality::Turn)).unwrap();
            convo.id
        };

        let reopened = FileStore::open(dir.path()).unwrap();
        let events = reopened.read_range(convo_id, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].agent_id, "alice");
    }

    #[test]
    fn append_after_reopen_continues_seq() {
        let dir = tempfile::tempdir().unwrap();
        let convo_id = {
            let store = FileStore::open(dir.path()).unwrap();
            let convo = store.create_conversation(ConversationMetadata::default());
            store.append(convo.id, AppendRequest::message("alice", "one", Finality::Turn)).unwrap();
            convo.id
        };

        let reopened = FileStore::open(dir.path()).unwrap();
        let event = reopened.append(convo_id, AppendRequest::message("bob", "two", Finality::Turn)).unwrap();
        assert_eq!(event.seq, 2);
        assert_eq!(event.turn, 2);
    }
}
