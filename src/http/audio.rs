//! `GET /sessions/{id}/audio?job={id}` (`spec.md` §4.8 "Audio: serve final
//! artifact with `Content-Type: audio/wav` or `audio/mpeg`, honor HTTP
//! `Range` for seekable playback, emit `ETag`").

use aria_jobs::{JobId, JobState};
use aria_protocol::GatewayError;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::http::error::ApiError;
use crate::http::sessions::parse_session_id;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    pub job: String,
}

fn content_type_for(audio_ref: &str) -> &'static str {
    if audio_ref.ends_with(".mp3") {
        "audio/mpeg"
    } else {
        "audio/wav"
    }
}

fn etag_for(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("\"{:x}\"", digest)
}

/// Parse a single-range `bytes=start-end` header per RFC 7233, clamped to
/// the resource length. Multi-range requests are not supported; they fall
/// back to a full 200 response.
fn parse_range(header: &str, len: usize) -> Option<(usize, usize)> {
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start_str, end_str) = spec.split_once('-')?;
    let len = len as u64;
    let (start, end) = if start_str.is_empty() {
        let suffix_len: u64 = end_str.parse().ok()?;
        let start = len.saturating_sub(suffix_len);
        (start, len.saturating_sub(1))
    } else {
        let start: u64 = start_str.parse().ok()?;
        let end: u64 = if end_str.is_empty() {
            len.saturating_sub(1)
        } else {
            end_str.parse().ok()?
        };
        (start, end)
    };
    if start > end || start >= len {
        return None;
    }
    Some((start as usize, (end.min(len.saturating_sub(1))) as usize))
}

pub async fn audio(
    State(state): State<AppState>,
    Path(raw_session_id): Path<String>,
    Query(query): Query<AudioQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
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

    let audio_ref = match job.state {
        JobState::Done { audio_ref } => audio_ref,
        _ => return Err(ApiError(GatewayError::invalid_input("audio not ready for this job"))),
    };

    let bytes = state
        .objects
        .get_object(&audio_ref)
        .await
        .map_err(|e| ApiError(GatewayError::internal(e.to_string())))?;

    let etag = etag_for(&bytes);
    let content_type = content_type_for(&audio_ref);
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    let mut response = match range_header.and_then(|r| parse_range(r, bytes.len())) {
        Some((start, end)) => {
            let slice = bytes[start..=end].to_vec();
            let mut resp = (StatusCode::PARTIAL_CONTENT, slice).into_response();
            resp.headers_mut().insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{}", bytes.len())).unwrap(),
            );
            resp
        }
        None => (StatusCode::OK, bytes).into_response(),
    };

    let response_headers = response.headers_mut();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).unwrap_or_else(|_| HeaderValue::from_static("\"invalid\"")),
    );

    Ok(response)
}
