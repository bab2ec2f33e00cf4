//! A single managed worker subprocess (`spec.md` §3 "Worker").

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use aria_protocol::ToolClass;
use aria_transport::Transport;
use parking_lot::RwLock;

/// Spawn specification for a worker class: the subprocess command line.
#[derive(Debug, Clone)]
pub struct WorkerSpawnSpec {
    pub command: String,
    pub args: Vec<String>,
}

pub struct Worker {
    pub class: ToolClass,
    pub transport: Transport,
    allow_listed_tools: RwLock<HashSet<String>>,
    pub started_at: Instant,
    last_health_check_ms: AtomicU64,
    pub restart_count: AtomicU32,
    pub pid: Option<u32>,
    outstanding: AtomicU32,
}

impl Worker {
    pub fn new(class: ToolClass, transport: Transport, pid: Option<u32>, restart_count: u32) -> Self {
        Self {
            class,
            transport,
            allow_listed_tools: RwLock::new(HashSet::new()),
            started_at: Instant::now(),
            last_health_check_ms: AtomicU64::new(0),
            restart_count: AtomicU32::new(restart_count),
            pid,
            outstanding: AtomicU32::new(0),
        }
    }

    pub fn set_allow_list(&self, tools: HashSet<String>) {
        *self.allow_listed_tools.write() = tools;
    }

    /// "A worker only accepts tool calls in its allow-list" (`spec.md` §3
    /// Worker invariant).
    pub fn allows(&self, tool: &str) -> bool {
        self.allow_listed_tools.read().contains(tool)
    }

    pub fn allow_list(&self) -> HashSet<String> {
        self.allow_listed_tools.read().clone()
    }

    pub fn record_health_check(&self) {
        self.last_health_check_ms
            .store(self.started_at.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    pub fn outstanding_count(&self) -> u32 {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn enter(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}
