//! Message send handlers.
//!
//! `/send-message` and `/send-group-message` accept either a JSON body or a
//! multipart form; the only difference between them is the target field name
//! and how the target resolves. `/messages/{id}` reads back the dispatch
//! status of a previously submitted item.

use axum::Json;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::dispatch::{DispatchError, Submission, Target};
use crate::response;
use crate::server::AppState;

/// Attachments arrive as multipart. A JSON body only ever carries the target
/// and the text, so it stays small.
const JSON_BODY_LIMIT: usize = 1024 * 1024;

// ============================================================================
// Request/Response DTOs
// ============================================================================

struct SendRequest {
    target: String,
    message: String,
    upload: Option<Upload>,
}

struct Upload {
    file_name: String,
    mime_type: String,
    payload: Bytes,
}

#[derive(Serialize)]
struct QueuedResponse {
    status: &'static str,
    id: String,
}

#[derive(Serialize)]
struct SentResponse {
    id: String,
    message_id: String,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<AttachmentMeta>,
}

#[derive(Serialize)]
struct AttachmentMeta {
    name: String,
    mimetype: String,
    size: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /send-message
pub async fn send_message(State(state): State<AppState>, req: Request) -> Response {
    let parsed = match parse_send_request(req, "number").await {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };
    let target = Target::Individual {
        number: parsed.target.clone(),
    };
    dispatch(state, target, parsed).await
}

/// POST /send-group-message
pub async fn send_group_message(State(state): State<AppState>, req: Request) -> Response {
    let parsed = match parse_send_request(req, "group_id").await {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };
    let target = Target::Group {
        id: parsed.target.clone(),
    };
    dispatch(state, target, parsed).await
}

/// GET /messages/{id}
pub async fn message_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.statuses.get(&id) {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => response::not_found(format!("no message with id '{id}'")).into_response(),
    }
}

async fn dispatch(state: AppState, target: Target, parsed: SendRequest) -> Response {
    let attachment = match parsed.upload {
        Some(upload) => {
            match state
                .staging
                .stage(&upload.file_name, &upload.mime_type, upload.payload)
                .await
            {
                Ok(staged) => Some(staged),
                Err(e) => {
                    return response::internal_error(format!("could not stage upload: {e}"))
                        .into_response();
                }
            }
        }
        None => None,
    };
    let meta = attachment.as_ref().map(|staged| AttachmentMeta {
        name: staged.file_name.clone(),
        mimetype: staged.mime_type.clone(),
        size: staged.size,
    });

    match state.dispatcher.submit(target, parsed.message, attachment).await {
        Submission::Queued { id } => (
            StatusCode::ACCEPTED,
            Json(QueuedResponse {
                status: "queued",
                id,
            }),
        )
            .into_response(),
        Submission::Completed { id, result } => match result {
            Ok(receipt) => (
                StatusCode::OK,
                Json(SentResponse {
                    id,
                    message_id: receipt.message_id,
                    timestamp: receipt.timestamp,
                    attachment: meta,
                }),
            )
                .into_response(),
            Err(e) => dispatch_error_response(&e),
        },
    }
}

fn dispatch_error_response(err: &DispatchError) -> Response {
    match err {
        DispatchError::RecipientNotFound(_) | DispatchError::GroupNotFound(_) => {
            response::not_found(err.to_string()).into_response()
        }
        DispatchError::ChannelUnavailable | DispatchError::Send(_) | DispatchError::Timeout(_) => {
            response::internal_error(err.to_string()).into_response()
        }
    }
}

// ============================================================================
// Body parsing
// ============================================================================

async fn parse_send_request(
    req: Request,
    target_field: &'static str,
) -> Result<SendRequest, Response> {
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        parse_multipart(req, target_field).await
    } else {
        parse_json(req, target_field).await
    }
}

async fn parse_json(req: Request, target_field: &'static str) -> Result<SendRequest, Response> {
    let bytes = match axum::body::to_bytes(req.into_body(), JSON_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return Err(response::bad_request(format!("unreadable body: {e}")).into_response());
        }
    };
    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            return Err(response::bad_request(format!("invalid JSON body: {e}")).into_response());
        }
    };

    let target = match value.get(target_field) {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        // Phone numbers show up unquoted often enough to be worth accepting.
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let message = value
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let target = require_target(target, target_field)?;
    Ok(SendRequest {
        target,
        message,
        upload: None,
    })
}

async fn parse_multipart(
    req: Request,
    target_field: &'static str,
) -> Result<SendRequest, Response> {
    let mut multipart = match Multipart::from_request(req, &()).await {
        Ok(multipart) => multipart,
        Err(e) => return Err(multipart_error(e)),
    };

    let mut target = String::new();
    let mut message = String::new();
    let mut upload = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e)),
        };
        // Reading a field consumes it, so take the name first.
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            name if name == target_field => {
                target = read_text(field).await?.trim().to_string();
            }
            "message" => message = read_text(field).await?,
            "file" => {
                let file_name = field.file_name().unwrap_or("upload.bin").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let payload = match field.bytes().await {
                    Ok(payload) => payload,
                    Err(e) => return Err(multipart_error(e)),
                };
                debug!(file = %file_name, size = payload.len(), "received upload");
                upload = Some(Upload {
                    file_name,
                    mime_type,
                    payload,
                });
            }
            other => debug!(field = other, "ignoring unknown form field"),
        }
    }

    let target = require_target(target, target_field)?;
    Ok(SendRequest {
        target,
        message,
        upload,
    })
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, Response> {
    field.text().await.map_err(multipart_error)
}

fn multipart_error(err: impl std::fmt::Display) -> Response {
    response::bad_request(format!("invalid multipart body: {err}")).into_response()
}

fn require_target(target: String, target_field: &'static str) -> Result<String, Response> {
    if target.is_empty() {
        return Err(response::bad_request(format!("{target_field} is required")).into_response());
    }
    Ok(target)
}

// ============================================================================
// Tests
// ============================================================================
