use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::dispatch::{Dispatcher, StatusRegistry};
use crate::handlers;
use crate::session::SessionHandle;
use crate::staging::Staging;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub dispatcher: Dispatcher,
    pub statuses: StatusRegistry,
    pub staging: Staging,
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/send-message", post(handlers::send_message))
        .route("/send-group-message", post(handlers::send_group_message))
        .route("/groups", get(handlers::list_groups))
        .route("/messages/{id}", get(handlers::message_status))
        .route("/logout", post(handlers::logout))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}

// ============================================================================
// Tests
// ============================================================================
