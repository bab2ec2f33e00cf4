//! Resolves the caller's identity from the `Authorization` header
//! (`spec.md` §1 "assumed to yield a stable user id"; `SPEC_FULL.md` §6
//! "`BACKEND_AUTH_DISABLED` maps to a trait object swap").

use aria_interfaces::VerifiedIdentity;
use aria_protocol::GatewayError;
use axum::http::HeaderMap;

use crate::http::error::ApiError;
use crate::http::state::AppState;

pub async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Result<VerifiedIdentity, ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    state
        .identity
        .verify_token(token)
        .await
        .map_err(|e| ApiError(GatewayError::invalid_input(e.to_string())))
}
