//! Event ingestion and introspection REST endpoints.
//!
//! This is the thin layer external signals arrive through: anomaly
//! detections and user messages become events and turns on the blackboard;
//! the scheduler picks them up from there.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;

use brain_blackboard::Blackboard;
use brain_domain::event::{
    Actor, Event, EventInput, EventSource, EventStatus, Severity, Turn,
};
use brain_domain::Error;

use crate::broadcast::{BroadcastSink, PushMessage};
use crate::functions;
use crate::processor;
use crate::scheduler;
use crate::state::BrainState;
use crate::turns::append_and_push;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
pub struct CreateEventRequest {
    pub source: EventSource,
    pub reason: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub domain_hint: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct ApprovalRequest {
    pub approve: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub text: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn error_response(e: Error) -> Response {
    let status = match &e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidTransition(_) => StatusCode::CONFLICT,
        Error::SecurityBlocked(_) => StatusCode::FORBIDDEN,
        Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /v1/events — ingest an external signal as a new event.
///
/// The signal also becomes the event's first turn: an `aligner/observation`
/// for detector signals, a `user/message` otherwise.
pub async fn create_event(
    State(state): State<BrainState>,
    Json(req): Json<CreateEventRequest>,
) -> Response {
    let input = EventInput {
        reason: req.reason.clone(),
        severity: req.severity.unwrap_or_default(),
        domain_hint: req.domain_hint,
        evidence: req.evidence.clone(),
        created_at: Utc::now(),
    };
    let event = Event::new(req.source, req.service, input);
    let event_id = event.id.clone();

    if let Err(e) = state.blackboard.create_event(event).await {
        return error_response(e);
    }
    state.broadcast.push(PushMessage::EventCreated {
        event_id: event_id.clone(),
    });

    let turn = match req.source {
        EventSource::AutonomousDetector => {
            let mut t = Turn::new(Actor::Aligner, "observation");
            t.thoughts = Some(req.reason);
            t.evidence = req.evidence;
            t
        }
        _ => {
            let mut t = Turn::new(Actor::User, "message");
            t.result = Some(req.reason);
            t
        }
    };
    if let Err(e) = append_and_push(&state, &event_id, turn).await {
        return error_response(e);
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "event_id": event_id })),
    )
        .into_response()
}

/// GET /v1/events — summary of all active events.
pub async fn list_events(State(state): State<BrainState>) -> Response {
    let ids = match state.blackboard.list_active_event_ids().await {
        Ok(ids) => ids,
        Err(e) => return error_response(e),
    };
    let mut events = Vec::with_capacity(ids.len());
    for id in ids {
        if let Ok(ev) = state.blackboard.get_event(&id).await {
            events.push(serde_json::json!({
                "id": ev.id,
                "source": ev.source,
                "status": ev.status,
                "service": ev.service,
                "reason": ev.input.reason,
                "turns": ev.conversation.len(),
                "created_at": ev.created_at,
            }));
        }
    }
    Json(serde_json::json!({ "count": events.len(), "events": events })).into_response()
}

/// GET /v1/events/:id — full event document.
pub async fn get_event(State(state): State<BrainState>, Path(id): Path<String>) -> Response {
    match state.blackboard.get_event(&id).await {
        Ok(ev) => Json(ev).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/events/:id/message — append a user turn.
pub async fn post_message(
    State(state): State<BrainState>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Response {
    let mut turn = Turn::new(Actor::User, "message");
    turn.result = Some(req.text);
    let n = match append_and_push(&state, &id, turn).await {
        Ok(n) => n,
        Err(e) => return error_response(e),
    };
    scheduler::user_turn_arrived(&state, &id);
    Json(serde_json::json!({ "turn": n })).into_response()
}

/// POST /v1/events/:id/approval — resolve a pending approval.
///
/// Appends the user's decision turn and flips the event back to ACTIVE via
/// a guarded transition, so a stale decision (the event moved on) is a 409.
pub async fn resolve_approval(
    State(state): State<BrainState>,
    Path(id): Path<String>,
    Json(req): Json<ApprovalRequest>,
) -> Response {
    let ev = match state.blackboard.get_event(&id).await {
        Ok(ev) => ev,
        Err(e) => return error_response(e),
    };
    if ev.status != EventStatus::WaitingApproval {
        return error_response(Error::InvalidTransition(format!(
            "event {id} is {:?}, not waiting for approval",
            ev.status
        )));
    }

    let mut turn = Turn::new(Actor::User, if req.approve { "approve" } else { "reject" });
    turn.result = req.comment;
    if let Err(e) = append_and_push(&state, &id, turn).await {
        return error_response(e);
    }
    if let Err(e) = state
        .blackboard
        .set_event_status(&id, EventStatus::Active, Some(EventStatus::WaitingApproval))
        .await
    {
        return error_response(e);
    }
    Json(serde_json::json!({ "approved": req.approve })).into_response()
}

/// POST /v1/events/:id/confirm — aligner re-verification trigger, with
/// dedup against a still-pending prior confirm.
pub async fn post_confirm(
    State(state): State<BrainState>,
    Path(id): Path<String>,
    Json(req): Json<ConfirmRequest>,
) -> Response {
    match functions::append_aligner_confirm(&state, &id, &req.text).await {
        Ok(Some(n)) => Json(serde_json::json!({ "appended": true, "turn": n })).into_response(),
        Ok(None) => Json(serde_json::json!({ "appended": false })).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/events/:id/cancel — interrupt the active processing pass and
/// any outstanding dispatches. Leaves the event status untouched.
pub async fn cancel_event(State(state): State<BrainState>, Path(id): Path<String>) -> Response {
    let signalled = processor::cancel(&state, &id);
    Json(serde_json::json!({ "signalled": signalled })).into_response()
}

/// GET /v1/agents — list connected workers.
pub async fn list_agents(State(state): State<BrainState>) -> Response {
    let agents = state.agents.list();
    Json(serde_json::json!({ "count": agents.len(), "agents": agents })).into_response()
}
