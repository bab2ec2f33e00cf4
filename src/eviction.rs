//! Session eviction hook: cancels a still-running job and releases its
//! reservation when the owning session is deleted or sweeper-evicted
//! (`SPEC_FULL.md` REDESIGN FLAGS #1 "session/job ownership conflation" —
//! eviction must not leave an orphaned job or reservation behind).

use std::sync::Arc;

use aria_credits::CreditLedger;
use aria_jobs::{CancelReason, JobRegistry};
use aria_sessions::{SessionEvictionHook, SessionId};
use async_trait::async_trait;
use tracing::warn;

pub struct JobCancelingEvictionHook {
    jobs: Arc<JobRegistry>,
    credits: Arc<CreditLedger>,
}

impl JobCancelingEvictionHook {
    pub fn new(jobs: Arc<JobRegistry>, credits: Arc<CreditLedger>) -> Arc<Self> {
        Arc::new(Self { jobs, credits })
    }
}

#[async_trait]
impl SessionEvictionHook for JobCancelingEvictionHook {
    async fn on_evict(&self, session_id: SessionId, current_job_id: Option<String>) {
        let Some(job_id_str) = current_job_id else {
            return;
        };
        let Ok(job_id) = job_id_str.parse() else {
            warn!(session_id = %session_id, job_id = %job_id_str, "malformed job id on session evict");
            return;
        };
        if let Ok(job) = self.jobs.get(job_id) {
            if !job.state.is_terminal() {
                let _ = self.jobs.cancel(job_id, CancelReason::SessionEvicted);
                if let Err(e) = self.credits.release(&job.user_id, &job_id_str).await {
                    warn!(session_id = %session_id, job_id = %job_id_str, error = %e, "failed to release reservation on session evict");
                }
            }
        }
    }
}
