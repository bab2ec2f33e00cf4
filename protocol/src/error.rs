//! Stable error kinds surfaced across the gateway core.
//!
//! Every crate in the workspace converts its local error type into a
//! [`GatewayError`] at its public boundary so that the HTTP edge and the
//! orchestrator only ever have to match on one enum (`spec.md` §7 "tagged
//! result types").

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, wire-visible error classification (`spec.md` §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    ToolNotAllowed,
    ActionRequired,
    WorkerLost,
    Backpressure,
    Timeout,
    Cancelled,
    InsufficientCredits,
    Locked,
    Internal,
}

impl ErrorKind {
    /// Whether the orchestrator can feed this error back to the planner to
    /// let it repair the turn, rather than surfacing it to the caller.
    pub fn is_recoverable_by_planner(self) -> bool {
        matches!(
            self,
            ErrorKind::ToolNotAllowed | ErrorKind::ActionRequired | ErrorKind::InvalidInput
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ToolNotAllowed => "tool_not_allowed",
            ErrorKind::ActionRequired => "action_required",
            ErrorKind::WorkerLost => "worker_lost",
            ErrorKind::Backpressure => "backpressure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InsufficientCredits => "insufficient_credits",
            ErrorKind::Locked => "locked",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, user-safe error. Never carries a stack trace across the API
/// boundary (`spec.md` §7 "Stack traces never cross the API boundary").
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn tool_not_allowed(tool: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::ToolNotAllowed,
            format!("tool '{tool}' is not in the public allow-list"),
        )
    }

    pub fn action_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ActionRequired, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds_match_spec() {
        assert!(ErrorKind::ToolNotAllowed.is_recoverable_by_planner());
        assert!(ErrorKind::ActionRequired.is_recoverable_by_planner());
        assert!(ErrorKind::InvalidInput.is_recoverable_by_planner());
        assert!(!ErrorKind::WorkerLost.is_recoverable_by_planner());
        assert!(!ErrorKind::Locked.is_recoverable_by_planner());
    }

    #[test]
    fn serializes_snake_case() {
        let v = serde_json::to_value(ErrorKind::InsufficientCredits).unwrap();
        assert_eq!(v, serde_json::json!("insufficient_credits"));
    }
}
