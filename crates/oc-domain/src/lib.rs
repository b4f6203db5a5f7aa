//! Owned, validated domain types shared by every orchestrator crate:
//! events, conversations, guidance, configuration, and the common error
//! type. Wire (de)serialization lives in `oc-protocol`; this crate has no
//! knowledge of JSON-RPC or WebSockets.

pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod guidance;

pub use config::Config;
pub use conversation::{AgentMeta, Attachment, AttachmentContent, Conversation, ConversationMetadata, ConversationStatus};
pub use error::{Error, Result};
pub use event::{AppendRequest, Event, EventPayload, Finality};
pub use guidance::{Guidance, GuidanceKind, TurnClaim};
