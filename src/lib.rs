//! Process wiring for the `aria` gateway binary: construct every component
//! from [`Config`], hand them to the HTTP edge (`spec.md` §4.8, §6).

pub mod config;
pub mod eviction;
pub mod http;
pub mod voicebank;

use std::sync::Arc;

use aria_credits::CreditLedger;
use aria_interfaces::{AlwaysAllowIdentity, IdentityVerifier, InMemoryDocumentStore, InMemoryObjectStore, ObjectStore};
use aria_jobs::JobRegistry;
use aria_orchestrator::{Orchestrator, OrchestratorConfig, ScriptedPlanner};
use aria_router::ToolRouter;
use aria_sessions::SessionStore;
use aria_workers::{PoolConfig, WorkerPool, WorkerSpawnSpec};
use tracing::warn;

use crate::config::Config;
use crate::eviction::JobCancelingEvictionHook;
use crate::http::state::AppState;
use crate::voicebank::VoicebankCache;

/// Everything `main` needs beyond the router itself: the worker pool's
/// notification stream must be pumped into the job registry for the
/// lifetime of the process (`spec.md` §4.5).
pub struct App {
    pub router: axum::Router,
    pub progress_forwarder: tokio::task::JoinHandle<()>,
}

/// Build the full component graph and the HTTP router from `config`
/// (`SPEC_FULL.md` §2.1 "Configuration", §4 implementation notes).
///
/// The object store and document store backing sessions/credits are
/// in-process (`InMemoryObjectStore`/`InMemoryDocumentStore`); swapping in
/// durable backends is a matter of constructing a different
/// `Arc<dyn ObjectStore>`/`Arc<dyn DocumentStore>` here, since every
/// consumer only depends on the trait (`spec.md` §9 "Interface
/// abstractions").
pub fn build_app(config: Config) -> App {
    let pool_config = PoolConfig {
        cpu: config
            .cpu_worker_command
            .clone()
            .map(|command| WorkerSpawnSpec {
                command,
                args: config.cpu_worker_args.clone(),
            }),
        gpu: config
            .gpu_worker_command
            .clone()
            .map(|command| WorkerSpawnSpec {
                command,
                args: config.gpu_worker_args.clone(),
            }),
        cpu_concurrency: config.cpu_concurrency,
        gpu_queue_depth: config.gpu_queue_depth,
        ..PoolConfig::default()
    };
    let (pool, notifications) = WorkerPool::start(pool_config);
    let pool = Arc::new(pool);
    let router = Arc::new(ToolRouter::new(pool));

    let jobs = JobRegistry::new(config.job_deadline());
    // A reservation outlives its job by a fixed grace period so the TTL
    // reaper, not the job's own deadline timer, is what reclaims credits
    // if settlement itself never runs (`spec.md` §4.6 "reservation expiry
    // is locked at reservation time").
    let reservation_ttl = config.job_deadline() + std::time::Duration::from_secs(60);
    let credits = CreditLedger::new(Arc::new(InMemoryDocumentStore::new()), reservation_ttl);
    let progress_forwarder = aria_orchestrator::spawn_progress_forwarder(notifications, Arc::clone(&jobs));

    let objects: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
    let eviction_hook = JobCancelingEvictionHook::new(Arc::clone(&jobs), Arc::clone(&credits));
    let sessions = SessionStore::with_eviction_hook(config.session_ttl(), Arc::clone(&objects), eviction_hook);

    // A real `IdentityVerifier` backend is an external collaborator this
    // core never implements (`SPEC_FULL.md` §6, per Non-goals); only the
    // dev-only `AlwaysAllowIdentity` double ships here either way, but a
    // warning distinguishes the explicit opt-in from the absence of a real
    // backend.
    if config.backend_auth_disabled {
        warn!("BACKEND_AUTH_DISABLED is set: every bearer token is trusted as-is");
    }
    let identity: Arc<dyn IdentityVerifier> = Arc::new(AlwaysAllowIdentity);

    // The actual model backend is an external collaborator this core never
    // implements (`spec.md` §1, `SPEC_FULL.md` §4.7); `ScriptedPlanner`
    // with an empty script is the only concrete `LlmPlanner` this crate
    // ships, falling back to a canned reply on every turn until a real
    // backend is wired in its place.
    let planner = Arc::new(ScriptedPlanner::new(Vec::new()));

    let orchestrator = Orchestrator::new(
        Arc::clone(&sessions),
        Arc::clone(&router),
        Arc::clone(&jobs),
        Arc::clone(&credits),
        planner,
        OrchestratorConfig {
            job_deadline: config.job_deadline(),
            ..OrchestratorConfig::default()
        },
    );

    let state = AppState {
        config: Arc::new(config),
        sessions,
        router,
        jobs,
        credits,
        orchestrator,
        objects,
        identity,
        voicebank: Arc::new(VoicebankCache::new()),
    };

    App {
        router: http::router(state),
        progress_forwarder,
    }
}
