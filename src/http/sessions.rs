//! `/sessions` endpoints: create, upload, serve current score
//! (`spec.md` §4.8, §6).

use std::time::Duration;

use aria_protocol::GatewayError;
use aria_sessions::{FileSlot, ScoreSnapshot, SessionId};
use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::http::error::ApiError;
use crate::http::identity::resolve_identity;
use crate::http::state::AppState;

const ALLOWED_EXTENSIONS: &[&str] = &[".xml", ".mxl"];
const PARSE_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse::<SessionId>()
        .map_err(|_| ApiError(GatewayError::invalid_input(format!("malformed session id: {raw}"))))
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    session_id: String,
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;
    let id = state.sessions.create(identity.user_id);
    Ok(Json(CreateSessionResponse {
        session_id: id.to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    session_id: String,
    parsed: bool,
    score_summary: Option<aria_sessions::ScoreSummary>,
}

/// Accept multipart `file`, enforce the size cap and extension allow-list,
/// store the original bytes, invoke `parse_score`, and replace the
/// session's file slot atomically (`spec.md` §4.8 "Upload").
pub async fn upload_score(
    State(state): State<AppState>,
    Path(raw_session_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let session_id = parse_session_id(&raw_session_id)?;
    if !state.sessions.exists(session_id) {
        return Err(ApiError(GatewayError::invalid_input("unknown session")));
    }
    let identity = resolve_identity(&state, &headers).await?;

    let mut file_name = None;
    let mut file_bytes = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(GatewayError::invalid_input(e.to_string())))?
    {
        if field.name() == Some("file") {
            file_name = field.file_name().map(str::to_string);
            file_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError(GatewayError::invalid_input(e.to_string())))?,
            );
        }
    }

    let file_name = file_name.ok_or_else(|| ApiError(GatewayError::invalid_input("missing file field")))?;
    let bytes = file_bytes.ok_or_else(|| ApiError(GatewayError::invalid_input("missing file bytes")))?;

    if bytes.len() > state.config.upload_max_bytes {
        return Err(ApiError(GatewayError::invalid_input(format!(
            "upload exceeds {} byte limit",
            state.config.upload_max_bytes
        ))));
    }
    let lower = file_name.to_lowercase();
    if !ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return Err(ApiError(GatewayError::invalid_input(format!(
            "unsupported file extension for '{file_name}', expected one of {ALLOWED_EXTENSIONS:?}"
        ))));
    }

    let object_ref = format!("sessions/{}/{session_id}/{file_name}", identity.user_id);
    state
        .objects
        .put_object(&object_ref, bytes.to_vec())
        .await
        .map_err(|e| ApiError(GatewayError::internal(e.to_string())))?;

    let parse_result = state
        .router
        .call("parse_score", json!({ "original_ref": object_ref }), PARSE_TIMEOUT)
        .await;

    let (parsed, score_summary) = match parse_result {
        Ok(document) => {
            let score = ScoreSnapshot::new(document, 1);
            let summary = score.summary();
            state
                .sessions
                .with_session(session_id, |session| {
                    session.set_file_slot(FileSlot {
                        original_ref: object_ref.clone(),
                        score,
                        transformed: None,
                    });
                })
                .await
                .map_err(GatewayError::from)?;
            (true, Some(summary))
        }
        Err(e) => {
            info!(session_id = %session_id, error = %e, "upload parse failed");
            (false, None)
        }
    };

    Ok(Json(UploadResponse {
        session_id: session_id.to_string(),
        parsed,
        score_summary,
    }))
}

/// Serve the current score's original uploaded bytes as MusicXML text
/// (`spec.md` §6 "Serve the current score (MusicXML text)").
pub async fn get_score(
    State(state): State<AppState>,
    Path(raw_session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = parse_session_id(&raw_session_id)?;
    let snapshot = state
        .sessions
        .snapshot(session_id)
        .await
        .map_err(GatewayError::from)?;
    let slot = snapshot
        .file_slot
        .ok_or_else(|| ApiError(GatewayError::invalid_input("no score uploaded yet")))?;

    let bytes = state
        .objects
        .get_object(&slot.original_ref)
        .await
        .map_err(|e| ApiError(GatewayError::internal(e.to_string())))?;

    Ok((
        [(axum::http::header::CONTENT_TYPE, "application/vnd.recordare.musicxml+xml")],
        bytes,
    ))
}
