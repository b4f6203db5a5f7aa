//! Wires the JSON-RPC WebSocket endpoint together with the MCP and A2A
//! bridge routers into one axum app.

use axum::routing::get;
use axum::Router;
use oc_a2a::A2aBridgeState;
use oc_mcp::McpBridgeState;

use crate::state::AppState;
use crate::ws::agent_ws;

pub fn build(state: AppState) -> Router {
    let mcp_state = McpBridgeState::new(state.store.clone(), state.bus.clone(), state.scheduler.clone(), state.host.clone());
    let a2a_state = A2aBridgeState::new(state.store.clone(), state.bus.clone(), state.scheduler.clone(), state.host.clone());

    Router::new()
        .route("/v1/ws", get(agent_ws))
        .with_state(state)
        .merge(oc_mcp::router(mcp_state))
        .merge(oc_a2a::router(a2a_state))
}
