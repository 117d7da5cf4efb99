//! Health check handlers.

use axum::extract::State;
use axum::http::StatusCode;

use crate::server::AppState;

/// Liveness probe. Always succeeds while the process is up.
pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness probe. Succeeds only while the session can actually send.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, String) {
    let session_state = state.session.state();
    if session_state.can_send() {
        (StatusCode::OK, "ok".to_string())
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, session_state.to_string())
    }
}
