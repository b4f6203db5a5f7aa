//! Shared error type used across all orchestrator crates.
//!
//! Variants map 1:1 to the error kinds enumerated in the orchestrator
//! spec's error handling design; transports translate them into their
//! own wire error shapes (JSON-RPC codes, bridge error payloads, etc.).

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("conversation is closed")]
    ClosedConversation,

    #[error("no open turn")]
    NoOpenTurn,

    #[error("wrong author: turn is held by a different agent")]
    WrongAuthor,

    #[error("duplicate request")]
    DuplicateRequest { existing_seq: u64 },

    #[error("unknown conversation: {0}")]
    UnknownConversation(u64),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Stable short name used by transports that need to key off the kind
    /// without matching on the full `Display` message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ClosedConversation => "ClosedConversation",
            Error::NoOpenTurn => "NoOpenTurn",
            Error::WrongAuthor => "WrongAuthor",
            Error::DuplicateRequest { .. } => "DuplicateRequest",
            Error::UnknownConversation(_) => "UnknownConversation",
            Error::UnknownAgent(_) => "UnknownAgent",
            Error::Unauthorized => "Unauthorized",
            Error::InvalidParams(_) => "InvalidParams",
            Error::Timeout(_) => "Timeout",
            Error::TransportClosed => "TransportClosed",
            Error::Io(_) => "Internal",
            Error::Json(_) => "Internal",
            Error::Internal(_) => "Internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
