//! Subscription Bus (§4.4): ordered, backfill-capable fan-out of events
//! and guidance to zero-or-more subscribers per conversation.
//!
//! Modeled as a lazy pull sequence rather than callback registration
//! (§9 design notes): [`Subscription::next`] yields persisted backfill
//! first, then switches to a live tail, deduping by `seq` at the
//! boundary. The live subscription is always opened *before* the
//! backfill read so no event can be missed across the switch — the
//! dedupe then discards whatever the backfill already delivered.

use std::collections::{HashMap, VecDeque};

use oc_domain::{Event, Guidance};
use oc_store::EventStore;
use parking_lot::RwLock;
use tokio::sync::broadcast;

/// One item flowing through the bus: a persisted event, or a derived
/// (non-persisted) guidance hint.
#[derive(Debug, Clone)]
pub enum BusItem {
    Event(Event),
    Guidance(Guidance),
}

impl BusItem {
    pub fn seq(&self) -> u64 {
        match self {
            BusItem::Event(e) => e.seq,
            BusItem::Guidance(g) => g.seq,
        }
    }

    fn is_conversation_final(&self) -> bool {
        matches!(self, BusItem::Event(e) if e.finality.closes_conversation())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("subscriber lagged, {skipped} item(s) dropped; resubscribe with sinceSeq")]
    SubscriberLagged { skipped: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub since_seq: Option<u64>,
    pub include_guidance: bool,
}

/// Per-conversation broadcast fan-out. One `broadcast::Sender` per
/// conversation, created lazily on first publish or subscribe.
pub struct Bus {
    channels: RwLock<HashMap<u64, broadcast::Sender<BusItem>>>,
    queue_depth: usize,
}

impl Bus {
    pub fn new(queue_depth: usize) -> Self {
        Self { channels: RwLock::new(HashMap::new()), queue_depth }
    }

    fn sender(&self, conversation: u64) -> broadcast::Sender<BusItem> {
        if let Some(tx) = self.channels.read().get(&conversation) {
            return tx.clone();
        }
        let mut guard = self.channels.write();
        guard.entry(conversation).or_insert_with(|| broadcast::channel(self.queue_depth).0).clone()
    }

    pub fn publish_event(&self, event: Event) {
        let conversation = event.conversation;
        let seq = event.seq;
        // Err means zero subscribers; not worth logging on every event.
        let _ = self.sender(conversation).send(BusItem::Event(event));
        tracing::trace!(conversation, seq, "event published to bus");
    }

    pub fn publish_guidance(&self, guidance: Guidance) {
        let conversation = guidance.conversation;
        let seq = guidance.seq;
        let _ = self.sender(conversation).send(BusItem::Guidance(guidance));
        tracing::trace!(conversation, seq, "guidance published to bus");
    }

    /// Open a subscription: live first, backfill second, per the
    /// ordering note above.
    pub fn subscribe(
        &self,
        store: &dyn EventStore,
        conversation: u64,
        opts: SubscribeOptions,
    ) -> oc_domain::Result<Subscription> {
        store.get_conversation(conversation)?;
        let live = self.sender(conversation).subscribe();
        let since = opts.since_seq.unwrap_or(0);
        let backfill: VecDeque<BusItem> = store.read_range(conversation, since)?.into_iter().map(BusItem::Event).collect();

        Ok(Subscription {
            id: uuid::Uuid::new_v4().to_string(),
            conversation,
            backfill,
            live,
            include_guidance: opts.include_guidance,
            watermark: since,
            closed: false,
        })
    }
}

/// A single subscriber's ordered view of one conversation. `next()`
/// returns `None` once the subscription has closed — either the caller
/// called [`Subscription::close`], the conversation reached finality, or
/// the live channel was dropped.
pub struct Subscription {
    id: String,
    conversation: u64,
    backfill: VecDeque<BusItem>,
    live: broadcast::Receiver<BusItem>,
    include_guidance: bool,
    watermark: u64,
    closed: bool,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation(&self) -> u64 {
        self.conversation
    }

    /// Idempotent close.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub async fn next(&mut self) -> Option<Result<BusItem, BusError>> {
        if self.closed {
            return None;
        }

        if let Some(item) = self.backfill.pop_front() {
            self.watermark = self.watermark.max(item.seq());
            if item.is_conversation_final() {
                self.closed = true;
            }
            return Some(Ok(item));
        }

        loop {
            match self.live.recv().await {
                Ok(item) => {
                    if item.seq() <= self.watermark {
                        // Already delivered via backfill; the live channel
                        // race (subscribed before the backfill read) means
                        // this item is a duplicate.
                        continue;
                    }
                    if matches!(item, BusItem::Guidance(_)) && !self.include_guidance {
                        continue;
                    }
                    if let BusItem::Event(e) = &item {
                        self.watermark = self.watermark.max(e.seq);
                    }
                    if item.is_conversation_final() {
                        self.closed = true;
                    }
                    return Some(Ok(item));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.closed = true;
                    return Some(Err(BusError::SubscriberLagged { skipped }));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }
}
