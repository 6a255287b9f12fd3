//! WebSocket endpoint for agent sidecar connections.
//!
//! Flow:
//! 1. Worker connects to `/v1/agents/ws?token=<pre-shared-token>`
//! 2. Worker sends `register` with its id and role
//! 3. Bidirectional loop: brain sends `task`/`cancel`/`pong`, worker sends
//!    `progress`/`partial_result`/`result`/`error`/`ping`
//! 4. On disconnect, the registry entry is removed and any in-flight task
//!    gets a disconnect sentinel on the bridge
//!
//! A worker reconnecting under the same agent id evicts the old entry; its
//! outstanding task is orphaned the same way.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use brain_agent_protocol::AgentMessage;

use crate::agents::bridge::TaskMessage;
use crate::agents::registry::{ConnectedAgent, EvictedTask};
use crate::state::BrainState;

/// Constant-time token comparison via SHA-256 digest. Hashing normalizes
/// lengths so ct_eq always compares 32 bytes.
fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Pre-shared token for worker authentication.
    pub token: Option<String>,
}

/// GET /v1/agents/ws — upgrade to WebSocket.
///
/// When `BRAIN_AGENT_TOKEN` is set, the query token must match it.
/// Unset means open access (dev mode).
pub async fn agent_ws(
    ws: WebSocketUpgrade,
    State(state): State<BrainState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if let Ok(expected) = std::env::var("BRAIN_AGENT_TOKEN") {
        let provided = query.token.as_deref().unwrap_or("");
        if !token_eq(provided, &expected) {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing agent token",
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: BrainState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // 1. Wait for register.
    let Some(reg) = wait_for_register(&mut ws_stream).await else {
        tracing::warn!("worker disconnected before sending register");
        return;
    };
    let AgentMessage::Register {
        agent_id,
        role,
        capabilities,
        ..
    } = reg
    else {
        return;
    };

    tracing::info!(
        agent_id = %agent_id,
        role = %role,
        capabilities = capabilities.len(),
        "agent connected"
    );

    // 2. Channel for outbound brain → worker messages.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<AgentMessage>(64);

    // 3. Register; an evicted predecessor orphans its task.
    let evicted = state.agents.register(ConnectedAgent {
        agent_id: agent_id.clone(),
        role,
        busy: false,
        current_event_id: None,
        current_task_id: None,
        connected_at: Utc::now(),
        last_seen: Utc::now(),
        caps: capabilities,
        sink: outbound_tx,
    });
    orphan_evicted(&state, evicted);

    // 4. Writer task: forwards outbound channel messages to the WS sink.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if send_ws_message(&mut ws_sink, &msg).await.is_err() {
                break;
            }
        }
    });

    // 5. Reader loop.
    let agent_id_read = agent_id.clone();
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                if let Ok(agent_msg) = serde_json::from_str::<AgentMessage>(&text) {
                    handle_inbound(&state, &agent_id_read, agent_msg).await;
                } else {
                    tracing::debug!(agent_id = %agent_id_read, "ignoring unparseable message");
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                state.agents.touch(&agent_id_read);
            }
            _ => {}
        }
    }

    // 6. Cleanup: orphan in-flight work, remove the entry, stop the writer.
    let failed = state.bridge.fail_for_agent(&agent_id);
    let evicted = state.agents.unregister(&agent_id);
    orphan_evicted(&state, evicted);
    writer.abort();
    tracing::info!(
        agent_id = %agent_id,
        failed_in_flight = failed,
        "agent disconnected"
    );
}

/// Inject a disconnect sentinel for a task stranded by registry eviction.
fn orphan_evicted(state: &BrainState, evicted: Option<EvictedTask>) {
    if let Some(task) = evicted {
        tracing::warn!(
            task_id = %task.task_id,
            event_id = %task.event_id,
            "orphaning task of evicted agent"
        );
        state
            .bridge
            .inject_sentinel(&task.task_id, TaskMessage::Disconnected);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn wait_for_register(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<AgentMessage> {
    // Give the worker 10 seconds to identify itself.
    let deadline = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(reg @ AgentMessage::Register { .. }) =
                    serde_json::from_str::<AgentMessage>(&text)
                {
                    return Some(reg);
                }
            }
        }
        None
    })
    .await;

    deadline.unwrap_or(None)
}

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &AgentMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

/// Route a worker message to the bridge (or answer liveness probes).
pub async fn handle_inbound(state: &BrainState, agent_id: &str, msg: AgentMessage) {
    state.agents.touch(agent_id);

    match msg {
        AgentMessage::Progress {
            task_id,
            message,
            source,
            ..
        } => {
            state
                .bridge
                .deliver(&task_id, TaskMessage::Progress { message, source })
                .await;
        }
        AgentMessage::PartialResult {
            task_id, content, ..
        } => {
            state
                .bridge
                .deliver(&task_id, TaskMessage::PartialResult { content })
                .await;
        }
        AgentMessage::Result {
            task_id,
            session_id,
            status,
            output,
            source,
            ..
        } => {
            state
                .bridge
                .deliver(
                    &task_id,
                    TaskMessage::Result {
                        status,
                        output,
                        session_id,
                        source,
                    },
                )
                .await;
        }
        AgentMessage::Error {
            task_id,
            message,
            retryable,
            ..
        } => {
            state
                .bridge
                .deliver(&task_id, TaskMessage::Error { message, retryable })
                .await;
        }
        AgentMessage::Ping { timestamp } => {
            if let Some(sink) = state.agents.get_sink(agent_id) {
                let _ = sink.send(AgentMessage::Pong { timestamp }).await;
            }
        }
        AgentMessage::Pong { .. } => {
            // Heartbeat acknowledgment — touch already done above.
        }
        other => {
            tracing::debug!(
                agent_id = %agent_id,
                msg_type = ?std::mem::discriminant(&other),
                "unexpected inbound message type"
            );
        }
    }
}
