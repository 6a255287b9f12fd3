//! UI push WebSocket: forwards the broadcast hub to connected dashboards.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::state::BrainState;

/// GET /v1/ui/ws — subscribe to typed push messages.
pub async fn ui_ws(ws: WebSocketUpgrade, State(state): State<BrainState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: BrainState) {
    let (mut sink, mut stream) = socket.split();
    let mut rx = state.broadcast.subscribe();

    // Reader: only there to notice the client going away.
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    loop {
        match rx.recv().await {
            Ok(push) => {
                let Ok(json) = serde_json::to_string(&push) else {
                    continue;
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            // Slow consumer: skip what was missed and keep following.
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "ui subscriber lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    reader.abort();
}
