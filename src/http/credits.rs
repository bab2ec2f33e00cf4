//! `/credits` endpoints (`spec.md` §6 "Pure estimate; persists estimate on
//! session" / "Return `{balance, reserved, available, expires_at,
//! overdrafted}`").
//!
//! The wire table lists both routes without a `{id}` segment, unlike every
//! other endpoint. `GET /credits` is naturally keyed by the caller's
//! identity rather than a session (an account has one balance regardless
//! of how many sessions it opens), so it resolves identity directly.
//! `POST /credits/estimate` accepts an optional `session_id` in the body:
//! when present, the resulting estimate is persisted onto that session's
//! `pending_estimate` (what `spec.md` §4.7's synthesize guard checks for);
//! when absent, the caller gets pure numbers with nothing persisted. See
//! `DESIGN.md` for the recorded rationale.

use std::time::Duration;

use aria_protocol::{GatewayError, ESTIMATE_TOOL};
use aria_sessions::EstimateRecord;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http::error::ApiError;
use crate::http::identity::resolve_identity;
use crate::http::state::AppState;

const ESTIMATE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub target: serde_json::Value,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    estimated_seconds: u32,
    estimated_credits: u32,
    balance: i64,
    available: i64,
    projected: i64,
    persisted_to_session: bool,
}

pub async fn estimate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EstimateRequest>,
) -> Result<Json<EstimateResponse>, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;

    let tool_result = state
        .router
        .call(ESTIMATE_TOOL, json!({ "target": body.target }), ESTIMATE_TIMEOUT)
        .await?;
    let estimated_seconds = tool_result
        .get("estimated_seconds")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32;

    let est = state
        .credits
        .estimate(&identity.user_id, estimated_seconds)
        .await
        .map_err(GatewayError::from)?;

    let mut persisted_to_session = false;
    if let Some(raw_session_id) = &body.session_id {
        let session_id = crate::http::sessions::parse_session_id(raw_session_id)?;
        state
            .sessions
            .with_session(session_id, |session| {
                session.pending_estimate = Some(EstimateRecord {
                    estimated_seconds: est.estimated_seconds,
                    estimated_credits: est.estimated_credits,
                    created_at: Utc::now(),
                });
            })
            .await
            .map_err(GatewayError::from)?;
        persisted_to_session = true;
    }

    Ok(Json(EstimateResponse {
        estimated_seconds: est.estimated_seconds,
        estimated_credits: est.estimated_credits,
        balance: est.balance,
        available: est.available,
        projected: est.projected,
        persisted_to_session,
    }))
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    balance: i64,
    reserved: i64,
    available: i64,
    expires_at: Option<chrono::DateTime<Utc>>,
    overdrafted: bool,
}

pub async fn account(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AccountResponse>, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;
    let account = state
        .credits
        .account_snapshot(&identity.user_id)
        .await
        .map_err(GatewayError::from)?;

    Ok(Json(AccountResponse {
        balance: account.balance,
        reserved: account.reserved,
        available: account.available(),
        expires_at: account.expires_at,
        overdrafted: account.overdrafted,
    }))
}
