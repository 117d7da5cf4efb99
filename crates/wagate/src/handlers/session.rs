//! Session lifecycle handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::info;

use crate::response;
use crate::server::AppState;

#[derive(Serialize)]
struct LogoutResponse {
    status: &'static str,
}

/// POST /logout
///
/// Ends the pairing with the network and wipes stored credentials. The
/// session stays down until the process is restarted and re-paired.
pub async fn logout(State(state): State<AppState>) -> Response {
    info!("logout requested");
    match state.session.logout().await {
        Ok(()) => (
            StatusCode::OK,
            Json(LogoutResponse {
                status: "logged_out",
            }),
        )
            .into_response(),
        Err(e) => response::internal_error(format!("logout failed: {e}")).into_response(),
    }
}
