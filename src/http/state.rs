//! Shared application state handed to every axum handler (`spec.md` §4.8
//! "The edge is stateless beyond delegating to the components above").

use std::sync::Arc;

use aria_credits::CreditLedger;
use aria_interfaces::{IdentityVerifier, ObjectStore};
use aria_jobs::JobRegistry;
use aria_orchestrator::Orchestrator;
use aria_router::ToolRouter;
use aria_sessions::SessionStore;

use crate::config::Config;
use crate::voicebank::VoicebankCache;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub router: Arc<ToolRouter>,
    pub jobs: Arc<JobRegistry>,
    pub credits: Arc<CreditLedger>,
    pub orchestrator: Arc<Orchestrator>,
    pub objects: Arc<dyn ObjectStore>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub voicebank: Arc<VoicebankCache>,
}
