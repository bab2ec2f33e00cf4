//! Job progress pipeline (`spec.md` §4.5, component C5): owns every
//! [`Job`], ingests `job/progress` notifications, runs per-job deadline
//! timers, and exposes a cooperative cancel flag the orchestrator polls
//! between tool calls (`spec.md` §9 "message-passing ... cancel is a flag
//! read cooperatively").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aria_protocol::{ErrorKind, JobProgressParams};
use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{CancelReason, InvalidTransition, Job, JobId, JobState};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("invalid job transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),
}

impl From<JobError> for aria_protocol::GatewayError {
    fn from(e: JobError) -> Self {
        match &e {
            JobError::NotFound(_) => aria_protocol::GatewayError::invalid_input(e.to_string()),
            JobError::InvalidTransition(_) => aria_protocol::GatewayError::internal(e.to_string()),
        }
    }
}

struct JobCell {
    job: Mutex<Job>,
    /// Flipped once, observed many times; the orchestrator's background
    /// synth task polls this between tool calls (`spec.md` §4.5
    /// "Cancellation semantics").
    cancel_requested: AtomicBool,
    deadline_timer: tokio::sync::Notify,
}

pub struct JobRegistry {
    jobs: DashMap<JobId, Arc<JobCell>>,
    default_deadline: Duration,
}

impl JobRegistry {
    pub fn new(default_deadline: Duration) -> Arc<Self> {
        Arc::new(Self {
            jobs: DashMap::new(),
            default_deadline,
        })
    }

    /// Create a `queued` job owned by `session_id`/`user_id` and arm its
    /// deadline timer (`spec.md` §4.5 "The registry owns a deadline timer
    /// per job").
    pub fn create(self: &Arc<Self>, session_id: impl Into<String>, user_id: impl Into<String>) -> JobId {
        let job = Job::new(session_id, user_id, ChronoDuration::from_std(self.default_deadline).unwrap_or(ChronoDuration::seconds(900)));
        let id = job.id;
        let cell = Arc::new(JobCell {
            job: Mutex::new(job),
            cancel_requested: AtomicBool::new(false),
            deadline_timer: tokio::sync::Notify::new(),
        });
        self.jobs.insert(id, Arc::clone(&cell));
        spawn_deadline_timer(Arc::clone(self), id, Arc::clone(&cell), self.default_deadline);
        info!(job_id = %id, "job created");
        id
    }

    fn cell(&self, id: JobId) -> Result<Arc<JobCell>, JobError> {
        self.jobs
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(JobError::NotFound(id))
    }

    pub fn start(&self, id: JobId) -> Result<(), JobError> {
        let cell = self.cell(id)?;
        cell.job.lock().start()?;
        Ok(())
    }

    pub fn set_reservation(&self, id: JobId, reservation_id: impl Into<String>) -> Result<(), JobError> {
        let cell = self.cell(id)?;
        cell.job.lock().reservation_id = Some(reservation_id.into());
        Ok(())
    }

    pub fn complete(&self, id: JobId, audio_ref: impl Into<String>) -> Result<(), JobError> {
        let cell = self.cell(id)?;
        cell.job.lock().complete(audio_ref)?;
        cell.deadline_timer.notify_one();
        Ok(())
    }

    pub fn fail(&self, id: JobId, kind: ErrorKind, message: impl Into<String>) -> Result<(), JobError> {
        let cell = self.cell(id)?;
        cell.job.lock().fail(kind, message)?;
        cell.deadline_timer.notify_one();
        Ok(())
    }

    /// Request cooperative cancellation (`spec.md` §4.5 "The registry
    /// signals a cancel flag"). Idempotent.
    pub fn cancel(&self, id: JobId, reason: CancelReason) -> Result<(), JobError> {
        let cell = self.cell(id)?;
        cell.cancel_requested.store(true, Ordering::SeqCst);
        cell.job.lock().cancel(reason);
        cell.deadline_timer.notify_one();
        Ok(())
    }

    /// Whether a cancel has been requested for `id`. The orchestrator
    /// polls this between tool calls; an outstanding call is allowed to
    /// finish regardless (`spec.md` §4.5).
    pub fn is_cancel_requested(&self, id: JobId) -> bool {
        self.jobs
            .get(&id)
            .map(|c| c.cancel_requested.load(Ordering::SeqCst))
            .unwrap_or(true)
    }

    /// Apply a `job/progress` notification. Notifications for unknown or
    /// terminal jobs are silently dropped (`spec.md` §4.5).
    pub fn apply_progress(&self, params: JobProgressParams) {
        let id = match params.job_id.parse::<JobId>() {
            Ok(id) => id,
            Err(_) => {
                warn!(job_id = %params.job_id, "progress notification for malformed job id");
                return;
            }
        };
        if let Some(cell) = self.jobs.get(&id) {
            cell.job
                .lock()
                .apply_progress(params.step, params.progress, params.message);
        }
    }

    /// Read-only snapshot (`spec.md` §4.5 `get`).
    pub fn get(&self, id: JobId) -> Result<Job, JobError> {
        Ok(self.cell(id)?.job.lock().clone())
    }

    pub fn exists(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }
}

fn spawn_deadline_timer(
    registry: Arc<JobRegistry>,
    id: JobId,
    cell: Arc<JobCell>,
    deadline: Duration,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(deadline) => {
                let fired = {
                    let mut job = cell.job.lock();
                    let was_non_terminal = !job.state.is_terminal();
                    job.cancel(CancelReason::Deadline);
                    was_non_terminal
                };
                if fired {
                    cell.cancel_requested.store(true, Ordering::SeqCst);
                    warn!(job_id = %id, "job deadline exceeded, cancelling");
                }
            }
            _ = cell.deadline_timer.notified() => {}
        }
        let _ = registry;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_queued_running_done() {
        let registry = JobRegistry::new(Duration::from_secs(900));
        let id = registry.create("session-1", "user-1");
        assert_eq!(registry.get(id).unwrap().state.label(), "queued");

        registry.start(id).unwrap();
        assert_eq!(registry.get(id).unwrap().state.label(), "running");

        registry.complete(id, "sessions/u/s/jobs/j/output.wav").unwrap();
        let job = registry.get(id).unwrap();
        assert_eq!(job.state.label(), "done");
        assert_eq!(job.progress, 1.0);
    }

    #[tokio::test]
    async fn progress_is_clamped_not_overwritten_by_late_lower_values() {
        let registry = JobRegistry::new(Duration::from_secs(900));
        let id = registry.create("session-1", "user-1");
        registry.start(id).unwrap();

        registry.apply_progress(JobProgressParams {
            job_id: id.to_string(),
            step: "predict_pitch".into(),
            progress: 0.5,
            message: None,
        });
        registry.apply_progress(JobProgressParams {
            job_id: id.to_string(),
            step: "predict_variance".into(),
            progress: 0.2,
            message: None,
        });

        assert_eq!(registry.get(id).unwrap().progress, 0.5);
    }

    #[tokio::test]
    async fn progress_for_terminal_job_is_dropped() {
        let registry = JobRegistry::new(Duration::from_secs(900));
        let id = registry.create("session-1", "user-1");
        registry.start(id).unwrap();
        registry.complete(id, "ref").unwrap();

        registry.apply_progress(JobProgressParams {
            job_id: id.to_string(),
            step: "late".into(),
            progress: 0.1,
            message: None,
        });

        assert_eq!(registry.get(id).unwrap().progress, 1.0);
    }

    #[tokio::test]
    async fn progress_for_unknown_job_does_not_panic() {
        let registry = JobRegistry::new(Duration::from_secs(900));
        registry.apply_progress(JobProgressParams {
            job_id: JobId::new().to_string(),
            step: "x".into(),
            progress: 0.1,
            message: None,
        });
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_flag_observable() {
        let registry = JobRegistry::new(Duration::from_secs(900));
        let id = registry.create("session-1", "user-1");
        registry.start(id).unwrap();

        registry.cancel(id, CancelReason::UserRequested).unwrap();
        assert!(registry.is_cancel_requested(id));
        // Second cancel is a no-op, not an error.
        registry.cancel(id, CancelReason::UserRequested).unwrap();
        assert_eq!(registry.get(id).unwrap().state.label(), "cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_cancellation() {
        let registry = JobRegistry::new(Duration::from_millis(50));
        let id = registry.create("session-1", "user-1");
        registry.start(id).unwrap();

        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;

        let job = registry.get(id).unwrap();
        assert_eq!(job.state.label(), "cancelled");
        assert!(matches!(job.state, JobState::Cancelled { reason: CancelReason::Deadline }));
    }
}
