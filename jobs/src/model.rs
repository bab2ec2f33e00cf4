//! Job data model and state machine (`spec.md` §3 "Job", §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aria_protocol::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Reason a job landed in `Cancelled` (`spec.md` §4.5 diagram: explicit
/// cancel vs. deadline expiry are both reachable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserRequested,
    SessionEvicted,
    Deadline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Done { audio_ref: String },
    Cancelled { reason: CancelReason },
    Error { kind: ErrorKind, message: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Done { .. } | JobState::Cancelled { .. } | JobState::Error { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done { .. } => "done",
            JobState::Cancelled { .. } => "cancelled",
            JobState::Error { .. } => "error",
        }
    }
}

/// An attempted transition the state diagram does not allow
/// (`spec.md` §9 "Explicit state machines ... invalid transitions are
/// programming errors"). Reachable at runtime only via caller bugs, so
/// this is `Err`, not a panic, but callers should treat it as a defect.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid job transition: {from} -> {attempted}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub attempted: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub session_id: String,
    pub user_id: String,
    pub reservation_id: Option<String>,
    pub state: JobState,
    pub step: String,
    pub progress: f32,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        deadline: chrono::Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: JobId::new(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            reservation_id: None,
            state: JobState::Queued,
            step: "queued".to_string(),
            progress: 0.0,
            last_message: None,
            created_at,
            deadline_at: created_at + deadline,
        }
    }

    /// `queued -> running` (`spec.md` §4.5 diagram "start"). Any other
    /// source state is a bug at the call site.
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        match &self.state {
            JobState::Queued => {
                self.state = JobState::Running;
                Ok(())
            }
            other => Err(InvalidTransition {
                from: other.label(),
                attempted: "running",
            }),
        }
    }

    /// `running -> done` (`spec.md` §4.5 diagram "complete").
    pub fn complete(&mut self, audio_ref: impl Into<String>) -> Result<(), InvalidTransition> {
        match &self.state {
            JobState::Running => {
                self.state = JobState::Done {
                    audio_ref: audio_ref.into(),
                };
                self.progress = 1.0;
                Ok(())
            }
            other => Err(InvalidTransition {
                from: other.label(),
                attempted: "done",
            }),
        }
    }

    /// `running -> error` (`spec.md` §4.5 diagram: tool failure /
    /// worker_lost).
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) -> Result<(), InvalidTransition> {
        match &self.state {
            JobState::Running => {
                self.state = JobState::Error {
                    kind,
                    message: message.into(),
                };
                Ok(())
            }
            other => Err(InvalidTransition {
                from: other.label(),
                attempted: "error",
            }),
        }
    }

    /// `queued|running -> cancelled`. Cancellation is reachable from
    /// either non-terminal state (`spec.md` §4.5 diagram) and is
    /// idempotent on an already-terminal job (`spec.md` §5 "Cancellation
    /// is idempotent") rather than an error, since a racing deadline and
    /// explicit cancel are both legitimate callers.
    pub fn cancel(&mut self, reason: CancelReason) {
        if !self.state.is_terminal() {
            self.state = JobState::Cancelled { reason };
        }
    }

    /// Apply a progress notification. Late updates with lower progress
    /// than the current value are clamped rather than applied
    /// (`spec.md` §5 "monotonic progress is not enforced ... clamped to
    /// the current value"). Dropped outright if the job is terminal.
    pub fn apply_progress(&mut self, step: impl Into<String>, progress: f32, message: Option<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.step = step.into();
        self.progress = progress.max(self.progress).clamp(0.0, 1.0);
        if let Some(m) = message {
            self.last_message = Some(m);
        }
    }
}
