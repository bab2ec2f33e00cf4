//! `POST /sessions/{id}/chat` (`spec.md` §4.8 "Chat: forward to
//! Orchestrator, return envelope by type").

use aria_protocol::GatewayError;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::http::error::ApiError;
use crate::http::sessions::parse_session_id;
use crate::http::state::AppState;
use aria_orchestrator::ChatEnvelope;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

pub async fn chat(
    State(state): State<AppState>,
    Path(raw_session_id): Path<String>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatEnvelope>, ApiError> {
    let session_id = parse_session_id(&raw_session_id)?;
    if !state.sessions.exists(session_id) {
        return Err(ApiError(GatewayError::invalid_input("unknown session")));
    }

    let envelope = state
        .orchestrator
        .handle_chat_turn(session_id, body.message)
        .await?;
    Ok(Json(envelope))
}
