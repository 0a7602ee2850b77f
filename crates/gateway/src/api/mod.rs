pub mod admin;
pub mod history;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full router: the WebSocket front door plus the REST surface.
pub fn router() -> Router<AppState> {
    Router::new()
        // Voice WebSocket
        .route("/phone/stream", get(crate::hub::phone_stream))
        // Call history
        .route("/history/:user_id", get(history::get_history))
        .route("/call/:turn_id", get(history::get_call))
        .route("/search", post(history::search))
        // Operations
        .route("/active-sessions", get(admin::active_sessions))
        .route("/interrupt/:session_id", post(admin::interrupt_session))
        .route("/health", get(admin::health))
}
