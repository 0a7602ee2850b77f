//! REST access to the call-history store.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use crate::state::AppState;

/// JSON error payload shared by the REST surface.
#[derive(Debug, serde::Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

pub fn not_found(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            kind: "not_found".into(),
            message: message.into(),
        }),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /history/:user_id?limit=N
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "d_limit")]
    pub limit: usize,
}

fn d_limit() -> usize {
    20
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Json<serde_json::Value> {
    let sessions = state.history.get_history(&user_id, query.limit);
    Json(serde_json::json!({
        "user_id": user_id,
        "sessions": sessions,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /call/:turn_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_call(
    State(state): State<AppState>,
    Path(turn_id): Path<String>,
) -> Result<Json<vx_domain::call::Turn>, (StatusCode, Json<ErrorBody>)> {
    state
        .history
        .get_turn(&turn_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("no turn {turn_id}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub user_id: String,
    pub query: String,
}

pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Json<serde_json::Value> {
    let turns = state.history.search_by_text(&req.user_id, &req.query);
    Json(serde_json::json!({
        "query": req.query,
        "turns": turns,
    }))
}
