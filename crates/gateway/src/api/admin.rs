//! Operational endpoints: health, the live session view, and the
//! administrative interrupt.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;

use vx_domain::call::InterruptKind;

use crate::interrupt::TriggerOutcome;
use crate::state::AppState;

use super::history::{not_found, ErrorBody};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let gates: Vec<_> = state.gates.iter().map(|g| g.snapshot()).collect();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.registry.len(),
        "adapters": gates,
        "history": state.history.health(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /active-sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn active_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions: Vec<serde_json::Value> = state
        .registry
        .list()
        .into_iter()
        .map(|entry| {
            let status = state.interrupts.status(&entry.session.session_id);
            serde_json::json!({
                "session_id": entry.session.session_id,
                "user_id": entry.session.user_id,
                "language": entry.session.language,
                "kid_friendly": entry.session.kid_friendly,
                "connected_at": entry.connected_at,
                "status": status,
            })
        })
        .collect();
    Json(serde_json::json!({ "sessions": sessions }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /interrupt/:session_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn interrupt_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    if state.registry.get(&session_id).is_none() {
        return Err(not_found(format!("no active session {session_id}")));
    }
    let outcome =
        state
            .interrupts
            .trigger_interrupt(&session_id, InterruptKind::Manual, Instant::now());
    let result = match outcome {
        TriggerOutcome::Fired(_) => "interrupted",
        TriggerOutcome::AlreadyInterrupted => "already_interrupted",
        TriggerOutcome::AlreadyCompleted => "already_completed",
        TriggerOutcome::NoActiveTurn => "no_active_turn",
    };
    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "result": result,
    })))
}
