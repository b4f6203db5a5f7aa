//! The ordered feed an [`crate::runtime::AgentRuntime`] consumes:
//! persisted events (for context) and guidance (for "it's your turn").
//! One impl reads straight off the in-process [`oc_bus::Subscription`];
//! another reads off notifications decoded from a WebSocket connection.

use async_trait::async_trait;
use oc_domain::{Event, Guidance};

#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(Event),
    Guidance(Guidance),
}

#[async_trait]
pub trait GuidanceStream: Send {
    /// `None` ends the run. Transports decide for themselves whether that
    /// means "conversation is over" or "connection dropped, go reconnect" —
    /// the runtime itself never retries.
    async fn next(&mut self) -> Option<StreamItem>;
}

/// Adapts the bus's backfill-then-live subscription, which already does its
/// own dedup and auto-close, onto the narrower `GuidanceStream` surface.
pub struct BusSubscriptionStream(pub oc_bus::Subscription);

#[async_trait]
impl GuidanceStream for BusSubscriptionStream {
    async fn next(&mut self) -> Option<StreamItem> {
        match self.0.next().await {
            None => None,
            Some(Err(err)) => {
                tracing::warn!(conversation = self.0.conversation(), error = %err, "subscription lagged; ending run");
                None
            }
            Some(Ok(oc_bus::BusItem::Event(event))) => Some(StreamItem::Event(event)),
            Some(Ok(oc_bus::BusItem::Guidance(guidance))) => Some(StreamItem::Guidance(guidance)),
        }
    }
}

/// Adapts an mpsc channel fed by a reader task (the WebSocket transport)
/// onto `GuidanceStream`.
pub struct ChannelGuidanceStream(pub tokio::sync::mpsc::Receiver<StreamItem>);

#[async_trait]
impl GuidanceStream for ChannelGuidanceStream {
    async fn next(&mut self) -> Option<StreamItem> {
        self.0.recv().await
    }
}
