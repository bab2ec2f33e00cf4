//! Chat-turn orchestration: the LLM-planner loop that validates and
//! dispatches tool calls, enforces the synthesis workflow guards, and
//! hands off long-running jobs to a background task (`spec.md` §4.7,
//! component C7).

pub mod background;
pub mod context;
pub mod envelope;
pub mod guards;
pub mod planner;
mod turn;

use std::sync::Arc;
use std::time::Duration;

use aria_credits::CreditLedger;
use aria_jobs::JobRegistry;
use aria_router::ToolRouter;
use aria_sessions::SessionStore;

pub use background::spawn_progress_forwarder;
pub use context::{CreditFacts, SessionFacts, TurnContext, DEFAULT_HISTORY_TAIL};
pub use envelope::ChatEnvelope;
pub use guards::{SynthesizeGuardFailure, SynthesizeRequest};
pub use planner::{LlmPlanner, PlannerError, PlannerOutput, ScriptedPlanner};

/// Tunables for the turn loop (`spec.md` §4.7, §6 config table).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard cap on planner/tool round-trips in a single turn before
    /// falling back to a canned reply (`spec.md` §4.7 "bounded number of
    /// iterations").
    pub max_iterations: u32,
    /// Wall-clock budget for an entire turn's tool dispatches, including
    /// the synchronous `parse_score` reparse path.
    pub turn_deadline: Duration,
    /// Deadline handed to the background synthesis call, independent of
    /// `turn_deadline` since synthesis runs after the turn has returned
    /// (`spec.md` §4.5's per-job deadline, default 900s).
    pub job_deadline: Duration,
    pub history_tail_len: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            turn_deadline: Duration::from_secs(60),
            job_deadline: Duration::from_secs(900),
            history_tail_len: DEFAULT_HISTORY_TAIL,
        }
    }
}

/// The orchestrator itself: a thin owner of `Arc` handles to every other
/// component, since it never outlives the process and every collaborator
/// is already reference-counted for concurrent access (`spec.md` §4.7).
pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    router: Arc<ToolRouter>,
    jobs: Arc<JobRegistry>,
    credits: Arc<CreditLedger>,
    planner: Arc<dyn LlmPlanner>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        router: Arc<ToolRouter>,
        jobs: Arc<JobRegistry>,
        credits: Arc<CreditLedger>,
        planner: Arc<dyn LlmPlanner>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            router,
            jobs,
            credits,
            planner,
            config,
        })
    }
}
