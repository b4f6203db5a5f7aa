//! Agent Runtime (§4.5): the `Agent`/`AgentTransport` contract, the
//! cooperative run loop that turns guidance into turns, and the two
//! transports that implement it — in-process (same binary as the store)
//! and WebSocket (an `agent-join` process talking JSON-RPC to the
//! gateway). Also ships the reference `EchoAgent`/`ScriptedAgent` used
//! for smoke tests and scenario coverage.

pub mod agent;
pub mod builtin;
pub mod inprocess;
pub mod reconnect;
pub mod runtime;
pub mod stream;
pub mod transport;
pub mod ws;

pub use agent::{Agent, RecoveryMode, TurnContext};
pub use builtin::{EchoAgent, ScriptedAgent, ScriptedLine};
pub use inprocess::{InProcessTransport, UserQueryBroker};
pub use reconnect::ReconnectBackoff;
pub use runtime::AgentRuntime;
pub use stream::{BusSubscriptionStream, ChannelGuidanceStream, GuidanceStream, StreamItem};
pub use transport::AgentTransport;
pub use ws::{run_agent, WsAgentConfig, WsHandle};
