//! A2A bridge: maps an external A2A client's `message/stream`/`tasks/*`
//! calls onto one internal conversation per task, streamed back over
//! SSE. Sibling to `oc-mcp` — same base64url `{config64}` template
//! convention, different wire protocol.

pub mod server;
pub mod template;
pub mod wire;

pub use server::{router, A2aBridgeState};
pub use template::BridgeTemplate;
