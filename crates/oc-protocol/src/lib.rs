//! Wire types for the JSON-RPC-over-WebSocket transport: envelopes,
//! per-method params/results, and server-push notifications. Pure
//! (de)serialization — no transport, no store, no scheduling.

pub mod jsonrpc;
pub mod methods;
pub mod ws;

pub use jsonrpc::{error_codes, error_from_domain, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
