//! Group directory handler.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::directory::{self, GroupRecord};
use crate::response;
use crate::server::AppState;

#[derive(Serialize)]
struct GroupsResponse {
    total: usize,
    groups: Vec<GroupRecord>,
}

/// GET /groups
pub async fn list_groups(State(state): State<AppState>) -> Response {
    let Some(client) = state.session.client() else {
        return response::internal_error("channel unavailable: no open connection").into_response();
    };
    match directory::list_groups(client.as_ref()).await {
        Ok(groups) => (
            StatusCode::OK,
            Json(GroupsResponse {
                total: groups.len(),
                groups,
            }),
        )
            .into_response(),
        Err(e) => response::internal_error(format!("could not fetch groups: {e}")).into_response(),
    }
}
