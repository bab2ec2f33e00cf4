//! Per-session conversational state (`spec.md` §4.4, component C4).
//!
//! Sessions live in a `DashMap` keyed by [`SessionId`], each wrapped in its
//! own `tokio::sync::Mutex` so a chat turn, an upload, and a progress poll
//! on the *same* session never interleave conflicting writes, while
//! different sessions proceed fully concurrently (`spec.md` §5).

pub mod model;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aria_interfaces::ObjectStore;
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use model::{
    EstimateRecord, FileSlot, HistoryEntry, Role, ScoreSnapshot, ScoreSummary, Session, SessionId,
    ToolCallMeta,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
}

impl From<SessionError> for aria_protocol::GatewayError {
    fn from(e: SessionError) -> Self {
        aria_protocol::GatewayError::invalid_input(e.to_string())
    }
}

/// A single store entry: the session itself plus a lock-free expiry
/// timestamp read by the sweeper without acquiring the session mutex
/// (`SPEC_FULL.md` §4 "a `last_active: AtomicI64` per entry"). The mutex
/// is wrapped in its own `Arc` (rather than nested inside the entry's) so
/// callers that need the lock held across `.await` points — the
/// orchestrator's turn loop — can take an owned guard via
/// [`SessionStore::lock`] instead of a borrowed one tied to a DashMap
/// shard guard's lifetime.
struct Entry {
    session: Arc<Mutex<Session>>,
    last_active_unix: AtomicI64,
}

/// An owned, held-across-`.await` lock on one session (`spec.md` §4.7
/// step 1 "Acquire the session mutex"). Dropping it releases the lock.
pub type SessionGuard = tokio::sync::OwnedMutexGuard<Session>;

/// Invoked by the store on eviction (sweeper or explicit `delete`) so the
/// caller can cancel any non-terminal job owned by the session
/// (`SPEC_FULL.md` REDESIGN FLAGS #1: closing/evicting a session cancels
/// its in-flight job).
#[async_trait::async_trait]
pub trait SessionEvictionHook: Send + Sync + 'static {
    async fn on_evict(&self, session_id: SessionId, current_job_id: Option<String>);
}

pub struct NoopEvictionHook;

#[async_trait::async_trait]
impl SessionEvictionHook for NoopEvictionHook {
    async fn on_evict(&self, _session_id: SessionId, _current_job_id: Option<String>) {}
}

pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Entry>>,
    ttl: Duration,
    objects: Arc<dyn ObjectStore>,
    eviction_hook: Arc<dyn SessionEvictionHook>,
    sweeper: tokio::sync::OnceCell<tokio::task::JoinHandle<()>>,
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

impl SessionStore {
    pub fn new(ttl: Duration, objects: Arc<dyn ObjectStore>) -> Arc<Self> {
        Self::with_eviction_hook(ttl, objects, Arc::new(NoopEvictionHook))
    }

    pub fn with_eviction_hook(
        ttl: Duration,
        objects: Arc<dyn ObjectStore>,
        eviction_hook: Arc<dyn SessionEvictionHook>,
    ) -> Arc<Self> {
        let store = Arc::new(Self {
            sessions: DashMap::new(),
            ttl,
            objects,
            eviction_hook,
            sweeper: tokio::sync::OnceCell::new(),
        });
        let handle = spawn_sweeper(Arc::clone(&store));
        // Infallible: nothing else can have raced to set this cell, since
        // the store is only just now leaving construction.
        let _ = store.sweeper.set(handle);
        store
    }

    /// Create a new session for `user_id`, returning its id.
    pub fn create(&self, user_id: impl Into<String>) -> SessionId {
        let session = Session::new(SessionId::new(), user_id);
        let id = session.id;
        let entry = Arc::new(Entry {
            last_active_unix: AtomicI64::new(session.last_active.timestamp()),
            session: Arc::new(Mutex::new(session)),
        });
        self.sessions.insert(id, entry);
        info!(session_id = %id, "session created");
        id
    }

    /// Acquire the session mutex, run `f` with a mutable handle, and
    /// release it on every exit path (`spec.md` §4.4 `with_session`).
    pub async fn with_session<F, R>(&self, id: SessionId, f: F) -> Result<R, SessionError>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut guard = self.lock(id).await?;
        Ok(f(&mut guard))
    }

    /// Acquire the session mutex as an owned guard that may be held
    /// across `.await` points — the shape the orchestrator's turn loop
    /// needs (`spec.md` §4.7 step 1), unlike [`with_session`]'s
    /// synchronous closure.
    pub async fn lock(&self, id: SessionId) -> Result<SessionGuard, SessionError> {
        let entry = self
            .sessions
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(SessionError::NotFound(id))?;
        let mut guard = Arc::clone(&entry.session).lock_owned().await;
        guard.touch();
        entry
            .last_active_unix
            .store(guard.last_active.timestamp(), Ordering::Relaxed);
        Ok(guard)
    }

    pub fn exists(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Advance `last_active` without otherwise touching session contents.
    pub async fn touch(&self, id: SessionId) -> Result<(), SessionError> {
        self.with_session(id, |_| ()).await
    }

    /// Read-only snapshot clone, for handlers that only need to serve
    /// current state (e.g. `GET /score`) without holding the lock longer
    /// than necessary.
    pub async fn snapshot(&self, id: SessionId) -> Result<Session, SessionError> {
        self.with_session(id, |s| s.clone()).await
    }

    /// Remove a session immediately, running the eviction hook and
    /// deleting its filesystem scratch through the object store
    /// (`spec.md` §4.4 `delete`).
    pub async fn delete(&self, id: SessionId) {
        if let Some((_, entry)) = self.sessions.remove(&id) {
            let (user_id, current_job_id) = {
                let guard = entry.session.lock().await;
                (guard.user_id.clone(), guard.current_job_id.clone())
            };
            self.eviction_hook.on_evict(id, current_job_id).await;
            let prefix = format!("sessions/{user_id}/{id}/");
            if let Err(e) = self.objects.delete_prefix(&prefix).await {
                warn!(session_id = %id, error = %e, "failed to delete session scratch");
            }
            info!(session_id = %id, "session deleted");
        }
    }

    fn expired_ids(&self) -> Vec<SessionId> {
        let cutoff = Utc::now().timestamp() - self.ttl.as_secs() as i64;
        self.sessions
            .iter()
            .filter(|e| e.value().last_active_unix.load(Ordering::Relaxed) < cutoff)
            .map(|e| *e.key())
            .collect()
    }

    async fn sweep_once(self: &Arc<Self>) {
        for id in self.expired_ids() {
            info!(session_id = %id, "evicting expired session");
            self.delete(id).await;
        }
    }
}

/// Background TTL sweeper: walks the map every [`SWEEP_INTERVAL`] and
/// evicts anything past expiry (`spec.md` §4.4 "a background sweeper walks
/// entries every 5 minutes").
fn spawn_sweeper(store: Arc<SessionStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            store.sweep_once().await;
        }
    })
}
