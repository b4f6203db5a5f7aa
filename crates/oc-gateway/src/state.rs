//! Shared application state handed to every axum handler — the JSON-RPC
//! WebSocket handler and the MCP/A2A bridge routers all close over the
//! same store/bus/scheduler/host so a message appended through one
//! surface is immediately visible through the others.

use std::collections::HashMap;
use std::sync::Arc;

use oc_bus::Bus;
use oc_domain::config::Config;
use oc_host::AgentHost;
use oc_runtime::UserQueryBroker;
use oc_scheduler::Scheduler;
use oc_store::EventStore;
use parking_lot::Mutex;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn EventStore>,
    pub bus: Arc<Bus>,
    pub scheduler: Arc<Scheduler>,
    pub host: Arc<AgentHost>,
    pub queries: Arc<UserQueryBroker>,
    /// `createUserQuery` calls that arrived over the JSON-RPC transport —
    /// unlike in-process agents (which block on `UserQueryBroker`'s oneshot
    /// directly) a remote agent is off watching its own event subscription
    /// for a `user_query_answered` system event, so `respondToUserQuery`
    /// needs to know which conversation to append that event to.
    pub remote_queries: Arc<Mutex<HashMap<String, u64>>>,
    pub api_token_hash: Option<Vec<u8>>,
}
