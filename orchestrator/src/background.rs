//! Work that continues after a chat turn has already returned a
//! `chat_progress` envelope (`spec.md` §4.7 step f, §4.5, §4.6).

use std::sync::Arc;
use std::time::Duration;

use aria_credits::CreditLedger;
use aria_jobs::{JobId, JobRegistry};
use aria_protocol::{ErrorKind, JobProgressParams, RpcNotification, SYNTHESIZE_TOOL};
use aria_router::ToolRouter;
use aria_sessions::SessionStore;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Dispatch the `synthesize` tool call for an already-reserved job and
/// settle or release its reservation depending on outcome. Runs detached
/// from the request that started it; the caller already returned its
/// `chat_progress` envelope (`spec.md` §4.7 "the turn ends here").
#[allow(clippy::too_many_arguments)]
pub fn spawn_background_synthesis(
    router: Arc<ToolRouter>,
    jobs: Arc<JobRegistry>,
    credits: Arc<CreditLedger>,
    sessions: Arc<SessionStore>,
    job_id: JobId,
    session_id: aria_sessions::SessionId,
    user_id: String,
    arguments: Value,
    deadline: Duration,
) {
    tokio::spawn(async move {
        let job_id_str = job_id.to_string();
        let outcome = router.call(SYNTHESIZE_TOOL, arguments, deadline).await;

        let still_running = jobs
            .get(job_id)
            .map(|j| j.state.label() == "running")
            .unwrap_or(false);

        if !still_running {
            // Cancelled (explicit or deadline) while the call was in
            // flight: discard whatever came back and release the hold
            // (`spec.md` §5 "If the worker produces an output after
            // cancel, it is discarded and the reservation is released").
            if let Err(e) = credits.release(&user_id, &job_id_str).await {
                warn!(job_id = %job_id, error = %e, "failed to release reservation for cancelled job");
            }
            return;
        }

        match outcome {
            Ok(value) => {
                let audio_ref = value
                    .get("audio_ref")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let actual_seconds = value.get("actual_seconds").and_then(Value::as_u64).unwrap_or(0) as u32;

                match credits.settle(&user_id, &job_id_str, actual_seconds).await {
                    Ok(settled) => {
                        if let Err(e) = jobs.complete(job_id, audio_ref.clone()) {
                            warn!(job_id = %job_id, error = %e, "job already left running state at completion");
                        }
                        let _ = sessions
                            .with_session(session_id, |s| {
                                s.latest_audio_ref = Some(audio_ref);
                                s.current_job_id = None;
                            })
                            .await;
                        info!(job_id = %job_id, actual_seconds, balance = settled.balance, "synthesis settled");
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "settlement failed after synthesis succeeded");
                        let _ = jobs.fail(job_id, ErrorKind::Internal, e.to_string());
                        let _ = credits.release(&user_id, &job_id_str).await;
                        let _ = sessions
                            .with_session(session_id, |s| s.current_job_id = None)
                            .await;
                    }
                }
            }
            Err(err) => {
                warn!(job_id = %job_id, kind = %err.kind, message = %err.message, "synthesis failed");
                let _ = jobs.fail(job_id, err.kind, err.message.clone());
                if let Err(e) = credits.release(&user_id, &job_id_str).await {
                    warn!(job_id = %job_id, error = %e, "failed to release reservation after synthesis failure");
                }
                let _ = sessions
                    .with_session(session_id, |s| s.current_job_id = None)
                    .await;
            }
        }
    });
}

/// Bridge `job/progress` notifications off a worker pool's notification
/// channel into the job registry (`spec.md` §4.5, §6).
pub fn spawn_progress_forwarder(
    mut notifications: mpsc::UnboundedReceiver<RpcNotification>,
    jobs: Arc<JobRegistry>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            if notification.method != "job/progress" {
                continue;
            }
            let Some(params) = notification.params else {
                continue;
            };
            match serde_json::from_value::<JobProgressParams>(params) {
                Ok(params) => jobs.apply_progress(params),
                Err(e) => warn!(error = %e, "malformed job/progress notification"),
            }
        }
    })
}
