//! MCP bridge: maps a foreign MCP client/server session to one
//! internal conversation. `server` exposes `begin_chat_thread`/
//! `send_message_to_chat_thread`/`wait_for_reply` as MCP tools over HTTP;
//! `proxy_agent` drives the same three tools against a *remote*
//! orchestrator so two orchestrators can bridge to each other.

pub mod proxy_agent;
pub mod server;
pub mod template;
pub mod wire;

pub use proxy_agent::{McpProxyAgent, McpProxyAgentConfig};
pub use server::{router, McpBridgeState};
pub use template::BridgeTemplate;
