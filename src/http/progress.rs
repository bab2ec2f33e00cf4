//! `GET /sessions/{id}/progress?job={id}` (`spec.md` §4.8 "Progress:
//! snapshot `JobRegistry.get`; include audio URL once available").

use aria_jobs::JobId;
use aria_jobs::JobState;
use aria_protocol::GatewayError;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::http::error::ApiError;
use crate::http::sessions::parse_session_id;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub job: String,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    status: &'static str,
    step: String,
    progress: f32,
    message: Option<String>,
    audio_url: Option<String>,
    error: Option<ProgressError>,
}

#[derive(Debug, Serialize)]
pub struct ProgressError {
    kind: aria_protocol::ErrorKind,
    message: String,
}

pub async fn progress(
    State(state): State<AppState>,
    Path(raw_session_id): Path<String>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let session_id = parse_session_id(&raw_session_id)?;
    if !state.sessions.exists(session_id) {
        return Err(ApiError(GatewayError::invalid_input("unknown session")));
    }
    let job_id: JobId = query
        .job
        .parse()
        .map_err(|_| ApiError(GatewayError::invalid_input("malformed job id")))?;

    let job = state
        .jobs
        .get(job_id)
        .map_err(|e| ApiError(GatewayError::invalid_input(e.to_string())))?;

    let (audio_url, error) = match &job.state {
        JobState::Done { .. } => (
            Some(format!("/sessions/{session_id}/audio?job={job_id}")),
            None,
        ),
        JobState::Error { kind, message } => (
            None,
            Some(ProgressError {
                kind: *kind,
                message: message.clone(),
            }),
        ),
        _ => (None, None),
    };

    Ok(Json(ProgressResponse {
        status: job.state.label(),
        step: job.step,
        progress: job.progress,
        message: job.last_message,
        audio_url,
        error,
    }))
}
