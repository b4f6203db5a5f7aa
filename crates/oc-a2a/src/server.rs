//! The A2A bridge: `POST /api/bridge/{config64}/a2a` maps
//! `message/stream` and `tasks/{get,resubscribe,cancel}` onto internal
//! turns, each A2A task corresponding to one conversation. Grounded in
//! the teacher's `axum::response::sse` usage in `deliveries_sse` — a
//! persisted snapshot frame followed by a live tail, same shape as that
//! endpoint's backfill-then-live SSE stream.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use futures_util::Stream;
use oc_bus::{Bus, BusItem, SubscribeOptions};
use oc_domain::{AppendRequest, Attachment, AttachmentContent, ConversationMetadata, Event, EventPayload, Finality};
use oc_host::AgentHost;
use oc_scheduler::Scheduler;
use oc_store::EventStore;
use parking_lot::Mutex;
use serde_json::Value;

use crate::template::BridgeTemplate;
use crate::wire::{
    parts_for_event, role_for, A2aMessage, A2aRequest, HistoryEntry, MessageFrame, MessageStreamParams, Part, StatusUpdateFrame, TaskFrame,
    TaskIdParams, TaskState, TaskStatus,
};

#[derive(Clone)]
pub struct A2aBridgeState {
    store: Arc<dyn EventStore>,
    bus: Arc<Bus>,
    scheduler: Arc<Scheduler>,
    host: Arc<AgentHost>,
    /// task id -> (conversation id, peer agent id). A task and a
    /// conversation are created together by the first `message/stream`
    /// call that omits `taskId`.
    tasks: Arc<Mutex<HashMap<String, (u64, String)>>>,
    /// Tasks explicitly canceled via `tasks/cancel`; cancellation is
    /// per-task, not per-conversation, since the conversation itself has
    /// no "canceled" status.
    canceled: Arc<Mutex<HashSet<String>>>,
}

impl A2aBridgeState {
    pub fn new(store: Arc<dyn EventStore>, bus: Arc<Bus>, scheduler: Arc<Scheduler>, host: Arc<AgentHost>) -> Self {
        Self { store, bus, scheduler, host, tasks: Arc::new(Mutex::new(HashMap::new())), canceled: Arc::new(Mutex::new(HashSet::new())) }
    }
}

pub fn router(state: A2aBridgeState) -> Router {
    Router::new().route("/api/bridge/:config64/a2a", post(handle_rpc)).with_state(state)
}

async fn handle_rpc(State(state): State<A2aBridgeState>, Path(config64): Path<String>, Json(req): Json<A2aRequest>) -> Response {
    match req.method.as_str() {
        "message/stream" => message_stream(state, config64, req).await,
        "tasks/resubscribe" => tasks_resubscribe(state, config64, req).await,
        "tasks/get" => tasks_get(state, req).await,
        "tasks/cancel" => tasks_cancel(state, req).await,
        other => err_response(format!("unknown method {other}")),
    }
}

fn err_response(message: impl Into<String>) -> Response {
    (axum::http::StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn message_stream(state: A2aBridgeState, config64: String, req: A2aRequest) -> Response {
    let Some(params) = req.params.clone().and_then(|p| serde_json::from_value::<MessageStreamParams>(p).ok()) else {
        return err_response("message/stream requires params.message");
    };
    let template = match BridgeTemplate::decode(&config64) {
        Ok(t) => t,
        Err(e) => return err_response(e.to_string()),
    };

    let (task_id, conversation_id, peer_agent_id) = match resolve_task(&state, &template, params.task_id) {
        Ok(resolved) => resolved,
        Err(e) => return err_response(e),
    };

    let (text, attachments) = flatten_parts(&params.message.parts);
    let req = AppendRequest {
        agent_id: peer_agent_id.clone(),
        payload: EventPayload::Message { text, attachments },
        finality: Finality::Turn,
        client_request_id: None,
    };
    let event = match state.store.append(conversation_id, req) {
        Ok(event) => event,
        Err(e) => return err_response(e.to_string()),
    };
    state.bus.publish_event(event.clone());
    if let Ok(conversation) = state.store.get_conversation(conversation_id) {
        state.scheduler.on_event_appended(&conversation, &event);
    }

    stream_task(state, task_id, conversation_id, peer_agent_id, event.seq).into_response()
}

async fn tasks_resubscribe(state: A2aBridgeState, config64: String, req: A2aRequest) -> Response {
    let Some(params) = req.params.clone().and_then(|p| serde_json::from_value::<TaskIdParams>(p).ok()) else {
        return err_response("tasks/resubscribe requires params.taskId");
    };
    if BridgeTemplate::decode(&config64).is_err() {
        return err_response("invalid bridge template");
    }
    let Some((conversation_id, peer_agent_id)) = state.tasks.lock().get(&params.task_id).cloned() else {
        return err_response(format!("unknown task {}", params.task_id));
    };
    let since = state.store.get_conversation(conversation_id).map(|c| c.last_closed_seq).unwrap_or(0);
    stream_task(state, params.task_id, conversation_id, peer_agent_id, since).into_response()
}

async fn tasks_get(state: A2aBridgeState, req: A2aRequest) -> Response {
    let Some(params) = req.params.clone().and_then(|p| serde_json::from_value::<TaskIdParams>(p).ok()) else {
        return err_response("tasks/get requires params.taskId");
    };
    let Some((conversation_id, peer_agent_id)) = state.tasks.lock().get(&params.task_id).cloned() else {
        return err_response(format!("unknown task {}", params.task_id));
    };
    let Ok(conversation) = state.store.get_conversation(conversation_id) else {
        return err_response("conversation no longer exists");
    };
    let history = state.store.read_range(conversation_id, 0).unwrap_or_default();
    let frame = task_frame(&params.task_id, &conversation, &history, &peer_agent_id, is_canceled(&state, &params.task_id));
    Json(frame).into_response()
}

async fn tasks_cancel(state: A2aBridgeState, req: A2aRequest) -> Response {
    let Some(params) = req.params.clone().and_then(|p| serde_json::from_value::<TaskIdParams>(p).ok()) else {
        return err_response("tasks/cancel requires params.taskId");
    };
    let Some((conversation_id, _)) = state.tasks.lock().get(&params.task_id).cloned() else {
        return err_response(format!("unknown task {}", params.task_id));
    };
    state.canceled.lock().insert(params.task_id.clone());
    state.host.stop_all_for(conversation_id);
    Json(serde_json::json!({
        "taskId": params.task_id,
        "status": TaskStatus { state: TaskState::Canceled, timestamp: Utc::now() },
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn resolve_task(state: &A2aBridgeState, template: &BridgeTemplate, task_id: Option<String>) -> Result<(String, u64, String), String> {
    if let Some(task_id) = task_id {
        let (conversation_id, peer) = state.tasks.lock().get(&task_id).cloned().ok_or_else(|| format!("unknown task {task_id}"))?;
        return Ok((task_id, conversation_id, peer));
    }

    let mut metadata = ConversationMetadata {
        title: template.title.clone(),
        starting_agent_id: Some(template.internal_agent.id.clone()),
        agents: Default::default(),
    };
    metadata.agents.insert(template.internal_agent.id.clone(), template.internal_agent.clone());
    metadata.agents.insert(template.peer_agent_id.clone(), oc_domain::AgentMeta::new(template.peer_agent_id.clone()));

    let conversation = state.store.create_conversation(metadata);
    state.host.ensure(conversation.id, &template.internal_agent);

    let task_id = uuid::Uuid::new_v4().to_string();
    state.tasks.lock().insert(task_id.clone(), (conversation.id, template.peer_agent_id.clone()));
    tracing::info!(conversation_id = conversation.id, task_id = %task_id, "a2a task created");
    Ok((task_id, conversation.id, template.peer_agent_id.clone()))
}

fn flatten_parts(parts: &[Part]) -> (String, Vec<Attachment>) {
    let mut text = String::new();
    let mut attachments = Vec::new();
    for part in parts {
        match part {
            Part::Text { text: t } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(t);
            }
            Part::File { file } => attachments.push(Attachment {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
                content: AttachmentContent::Bytes { bytes: file.bytes.clone() },
            }),
        }
    }
    (text, attachments)
}

fn history_entries(events: &[Event], peer_agent_id: &str) -> Vec<HistoryEntry> {
    events
        .iter()
        .filter_map(|e| parts_for_event(e).map(|parts| HistoryEntry { role: role_for(&e.agent_id, peer_agent_id), parts }))
        .collect()
}

fn task_frame(task_id: &str, conversation: &oc_domain::Conversation, history: &[Event], peer_agent_id: &str, canceled: bool) -> TaskFrame {
    let state = if canceled {
        TaskState::Canceled
    } else if !conversation.is_active() {
        TaskState::Completed
    } else if conversation.open_turn.is_some() {
        TaskState::Working
    } else if conversation.last_closed_seq > 0 {
        TaskState::InputRequired
    } else {
        TaskState::Submitted
    };
    TaskFrame { task_id: task_id.to_string(), status: TaskStatus { state, timestamp: Utc::now() }, history: history_entries(history, peer_agent_id) }
}

fn is_canceled(state: &A2aBridgeState, task_id: &str) -> bool {
    state.canceled.lock().contains(task_id)
}

/// Builds the SSE response shared by `message/stream` and
/// `tasks/resubscribe`: an initial `task` snapshot, then a live tail of
/// `message`/`status-update` frames for everything the internal
/// counterpart does, ending at turn close or conversation finality.
fn stream_task(
    state: A2aBridgeState,
    task_id: String,
    conversation_id: u64,
    peer_agent_id: String,
    since_seq: u64,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = async_stream::stream! {
        let Ok(conversation) = state.store.get_conversation(conversation_id) else { return };
        let history = state.store.read_range(conversation_id, 0).unwrap_or_default();
        let frame = task_frame(&task_id, &conversation, &history, &peer_agent_id, is_canceled(&state, &task_id));
        yield Ok(SseEvent::default().event("task").json_data(&frame).expect("TaskFrame serializes"));

        if is_canceled(&state, &task_id) {
            return;
        }

        let Ok(mut sub) = state.bus.subscribe(&*state.store, conversation_id, SubscribeOptions { since_seq: Some(since_seq), include_guidance: false }) else {
            return;
        };

        loop {
            if is_canceled(&state, &task_id) {
                yield Ok(SseEvent::default().event("status-update").json_data(&StatusUpdateFrame {
                    task_id: task_id.clone(),
                    status: TaskStatus { state: TaskState::Canceled, timestamp: Utc::now() },
                    r#final: true,
                }).expect("StatusUpdateFrame serializes"));
                return;
            }

            let item = match tokio::time::timeout(Duration::from_millis(500), sub.next()).await {
                Ok(Some(Ok(item))) => item,
                Ok(Some(Err(_))) | Ok(None) => return,
                Err(_) => continue, // idle tick; re-check cancellation above
            };
            let BusItem::Event(event) = item else { continue };
            if event.agent_id == peer_agent_id {
                continue;
            }

            if let Some(parts) = parts_for_event(&event) {
                yield Ok(SseEvent::default().event("message").json_data(&MessageFrame {
                    task_id: task_id.clone(),
                    message: HistoryEntry { role: role_for(&event.agent_id, &peer_agent_id), parts },
                }).expect("MessageFrame serializes"));
            }

            if event.finality.closes_conversation() {
                // The `completed` frame is only sent once this event is
                // durably appended, which it is by the time we observe it
                // here (the store's append already returned).
                yield Ok(SseEvent::default().event("status-update").json_data(&StatusUpdateFrame {
                    task_id: task_id.clone(),
                    status: TaskStatus { state: TaskState::Completed, timestamp: Utc::now() },
                    r#final: true,
                }).expect("StatusUpdateFrame serializes"));
                return;
            }
            if event.finality.closes_turn() {
                yield Ok(SseEvent::default().event("status-update").json_data(&StatusUpdateFrame {
                    task_id: task_id.clone(),
                    status: TaskStatus { state: TaskState::InputRequired, timestamp: Utc::now() },
                    r#final: true,
                }).expect("StatusUpdateFrame serializes"));
                return;
            }
        }
    };
    Sse::new(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_domain::AgentMeta;
    use oc_runtime::UserQueryBroker;
    use oc_scheduler::DefaultPolicy;
    use oc_store::memory::MemoryStore;

    fn scripted_template(reply: &str) -> BridgeTemplate {
        let mut internal_agent = AgentMeta::new("claims-agent");
        internal_agent.agent_class = Some("scripted".into());
        internal_agent.config = Some(serde_json::json!({ "lines": [{ "text": reply, "finality": "turn" }] }));
        BridgeTemplate { internal_agent, peer_agent_id: "external".into(), title: Some("a2a task".into()) }
    }

    async fn spawn_server() -> (String, tokio::task::JoinHandle<()>) {
        let store: Arc<dyn EventStore> = Arc::new(MemoryStore::new());
        let bus = Arc::new(Bus::new(16));
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), Box::new(DefaultPolicy), Default::default()));
        let host = Arc::new(AgentHost::new(store.clone(), bus.clone(), scheduler.clone(), Arc::new(UserQueryBroker::new())));
        let state = A2aBridgeState::new(store, bus, scheduler, host);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn message_stream_emits_task_then_message_then_status() {
        let (base_url, _server) = spawn_server().await;
        let template = scripted_template("claim received");
        let config64 = template.encode();
        let endpoint = format!("{base_url}/api/bridge/{config64}/a2a");

        let body = serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "message/stream",
            "params": { "message": { "role": "user", "parts": [{ "kind": "text", "text": "I need help" }] } }
        });
        let resp = reqwest::Client::new().post(&endpoint).json(&body).send().await.unwrap();
        assert!(resp.status().is_success());
        let text = resp.text().await.unwrap();

        assert!(text.contains("event: task"));
        assert!(text.contains("event: message"));
        assert!(text.contains("claim received"));
        assert!(text.contains("input-required") || text.contains("completed"));
    }

    #[test]
    fn flatten_parts_collects_text_and_attachments() {
        let parts = vec![
            Part::Text { text: "hello".into() },
            Part::File { file: crate::wire::FilePart { name: "a.txt".into(), mime_type: "text/plain".into(), bytes: "aGk=".into() } },
        ];
        let (text, attachments) = flatten_parts(&parts);
        assert_eq!(text, "hello");
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "a.txt");
    }

    #[test]
    fn history_entries_skip_trace_events() {
        let events = vec![
            Event {
                conversation: 1, turn: 1, event: 1, seq: 1, agent_id: "claims-agent".into(),
                payload: EventPayload::Trace { text: "thinking".into() }, finality: Finality::None,
                ts: Utc::now(), client_request_id: None,
            },
            Event {
                conversation: 1, turn: 1, event: 2, seq: 2, agent_id: "claims-agent".into(),
                payload: EventPayload::Message { text: "hi".into(), attachments: vec![] }, finality: Finality::Turn,
                ts: Utc::now(), client_request_id: None,
            },
        ];
        let history = history_entries(&events, "external");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, "agent");
    }
}
