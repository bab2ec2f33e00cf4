//! Mapping from [`GatewayError`] to an HTTP response (`SPEC_FULL.md` §6
//! "status code selected by `ErrorKind`").

use aria_protocol::{ErrorKind, GatewayError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Wrapper so `GatewayError` (defined in `aria-protocol`, outside this
/// crate) can implement `IntoResponse` here without an orphan-rule
/// violation.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::ToolNotAllowed | ErrorKind::ActionRequired => StatusCode::CONFLICT,
        ErrorKind::InsufficientCredits | ErrorKind::Locked => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::Backpressure => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::WorkerLost | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind);
        let body = json!({"error": {"kind": self.0.kind, "message": self.0.message}});
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_credits_maps_to_402() {
        let err = ApiError(GatewayError::new(ErrorKind::InsufficientCredits, "nope"));
        assert_eq!(status_for(err.0.kind), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn backpressure_maps_to_503() {
        assert_eq!(status_for(ErrorKind::Backpressure), StatusCode::SERVICE_UNAVAILABLE);
    }
}
