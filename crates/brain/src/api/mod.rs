//! HTTP/WebSocket surface: event ingestion, approval resolution, agent and
//! UI WebSockets, and introspection endpoints.

pub mod events;
pub mod ui;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::agents::ws::agent_ws;
use crate::state::BrainState;

pub fn router(state: BrainState) -> Router {
    Router::new()
        .route("/v1/health", get(events::health))
        .route("/v1/events", post(events::create_event).get(events::list_events))
        .route("/v1/events/:id", get(events::get_event))
        .route("/v1/events/:id/message", post(events::post_message))
        .route("/v1/events/:id/approval", post(events::resolve_approval))
        .route("/v1/events/:id/confirm", post(events::post_confirm))
        .route("/v1/events/:id/cancel", post(events::cancel_event))
        .route("/v1/agents", get(events::list_agents))
        .route("/v1/agents/ws", get(agent_ws))
        .route("/v1/ui/ws", get(ui::ui_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
