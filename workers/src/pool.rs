//! Per-class worker subprocess pool (`spec.md` §4.2, component C2).
//!
//! In normal operation each class (`cpu`, `gpu`) runs exactly one worker;
//! horizontal scaling is out of scope for this core. [`WorkerPool`] is the
//! sole owner of [`Worker`]/[`Transport`] handles — [`ToolRouter`] (in
//! `aria-router`) borrows one for the duration of a single call via
//! [`WorkerHandle`], an arena-style handle that never outlives that call
//! (`spec.md` §9 "Arena-style ownership").

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aria_protocol::{RpcNotification, RpcRequest, ToolClass};
use aria_transport::Transport;
use dashmap::DashMap;
use parking_lot::RwLock as SyncRwLock;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::error::PoolError;
use crate::worker::{Worker, WorkerSpawnSpec};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub cpu: Option<WorkerSpawnSpec>,
    pub gpu: Option<WorkerSpawnSpec>,
    /// `N_cpu` concurrent CPU requests (`spec.md` §4.2, default 4).
    pub cpu_concurrency: usize,
    /// GPU admission queue depth before `backpressure` (`spec.md` §4.2,
    /// default 16).
    pub gpu_queue_depth: usize,
    /// Readiness probe timeout, default 3s.
    pub ready_probe_timeout: Duration,
    /// Interval between idle health-check probes.
    pub health_check_interval: Duration,
    /// Grace period for `close()` before force-terminating, default 5s.
    pub close_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cpu: None,
            gpu: None,
            cpu_concurrency: 4,
            gpu_queue_depth: 16,
            ready_probe_timeout: Duration::from_secs(3),
            health_check_interval: Duration::from_secs(60),
            close_grace: Duration::from_secs(5),
        }
    }
}

type WorkerSlot = Arc<SyncRwLock<Option<Arc<Worker>>>>;

pub struct WorkerPool {
    config: PoolConfig,
    cpu_gate: Arc<Semaphore>,
    gpu_gate: Arc<Semaphore>,
    gpu_waiting: Arc<AtomicUsize>,
    slots: DashMap<ToolClass, WorkerSlot>,
    supervisors: Vec<tokio::task::JoinHandle<()>>,
}

/// Borrowed access to a ready worker for exactly one tool call
/// (`spec.md` §9 "Arena-style ownership for Worker handles").
pub struct WorkerHandle {
    worker: Arc<Worker>,
    _permit: OwnedSemaphorePermit,
}

impl WorkerHandle {
    pub fn transport(&self) -> &Transport {
        &self.worker.transport
    }

    pub fn allows(&self, tool: &str) -> bool {
        self.worker.allows(tool)
    }

    pub fn class(&self) -> ToolClass {
        self.worker.class
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.worker.exit();
    }
}

impl WorkerPool {
    /// Spawn configured classes and start their restart supervisors.
    /// `notifications` receives every `job/progress` notification from
    /// every worker, forwarded for the caller (normally `JobRegistry`) to
    /// apply.
    pub fn start(config: PoolConfig) -> (Self, mpsc::UnboundedReceiver<RpcNotification>) {
        let (notif_tx, notif_rx) = mpsc::unbounded_channel();
        let cpu_gate = Arc::new(Semaphore::new(config.cpu_concurrency));
        let gpu_gate = Arc::new(Semaphore::new(1));
        let gpu_waiting = Arc::new(AtomicUsize::new(0));
        let slots = DashMap::new();
        let mut supervisors = Vec::new();

        if let Some(spec) = config.cpu.clone() {
            let slot: WorkerSlot = Arc::new(SyncRwLock::new(None));
            slots.insert(ToolClass::Cpu, Arc::clone(&slot));
            supervisors.push(spawn_supervisor(
                ToolClass::Cpu,
                spec,
                slot,
                notif_tx.clone(),
                config.ready_probe_timeout,
                config.health_check_interval,
            ));
        }
        if let Some(spec) = config.gpu.clone() {
            let slot: WorkerSlot = Arc::new(SyncRwLock::new(None));
            slots.insert(ToolClass::Gpu, Arc::clone(&slot));
            supervisors.push(spawn_supervisor(
                ToolClass::Gpu,
                spec,
                slot,
                notif_tx.clone(),
                config.ready_probe_timeout,
                config.health_check_interval,
            ));
        }

        (
            Self {
                config,
                cpu_gate,
                gpu_gate,
                gpu_waiting,
                slots,
                supervisors,
            },
            notif_rx,
        )
    }

    fn current_worker(&self, class: ToolClass) -> Result<Arc<Worker>, PoolError> {
        let slot = self
            .slots
            .get(&class)
            .ok_or(PoolError::ClassNotConfigured(class.as_str()))?;
        let guard = slot.read();
        match &*guard {
            Some(w) if w.transport.is_alive() => Ok(Arc::clone(w)),
            _ => Err(PoolError::NotReady),
        }
    }

    /// Acquire a worker for `class`, respecting its concurrency model
    /// (`spec.md` §4.2): CPU admits up to `cpu_concurrency` concurrently;
    /// GPU serializes and fails fast with `Backpressure` past
    /// `gpu_queue_depth` queued callers.
    pub async fn acquire(&self, class: ToolClass) -> Result<WorkerHandle, PoolError> {
        let worker = self.current_worker(class)?;
        let permit = match class {
            ToolClass::Cpu => self
                .cpu_gate
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PoolError::NotReady)?,
            ToolClass::Gpu => {
                let waiting = self.gpu_waiting.fetch_add(1, Ordering::SeqCst);
                if waiting >= self.config.gpu_queue_depth {
                    self.gpu_waiting.fetch_sub(1, Ordering::SeqCst);
                    return Err(PoolError::Backpressure);
                }
                let result = self.gpu_gate.clone().acquire_owned().await;
                self.gpu_waiting.fetch_sub(1, Ordering::SeqCst);
                result.map_err(|_| PoolError::NotReady)?
            }
        };
        worker.enter();
        Ok(WorkerHandle {
            worker,
            _permit: permit,
        })
    }

    pub async fn close_all(&self) {
        for entry in self.slots.iter() {
            if let Some(worker) = entry.value().read().clone() {
                worker.transport.close(Some(self.config.close_grace)).await;
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for task in &self.supervisors {
            task.abort();
        }
    }
}

fn spawn_supervisor(
    class: ToolClass,
    spec: WorkerSpawnSpec,
    slot: WorkerSlot,
    notif_tx: mpsc::UnboundedSender<RpcNotification>,
    ready_probe_timeout: Duration,
    health_check_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut restart_count: u32 = 0;
        loop {
            match spawn_and_ready(class, &spec, restart_count, ready_probe_timeout, &notif_tx)
                .await
            {
                Ok(worker) => {
                    info!(class = %class, attempt = restart_count, "worker ready");
                    *slot.write() = Some(Arc::clone(&worker));
                    wait_for_death_or_unhealthy(&worker, health_check_interval).await;
                    *slot.write() = None;
                    warn!(class = %class, "worker died, scheduling restart");
                    restart_count += 1;
                }
                Err(e) => {
                    warn!(class = %class, error = %e, "failed to spawn worker");
                    restart_count += 1;
                }
            }
            tokio::time::sleep(Backoff::delay_for(restart_count)).await;
        }
    })
}

async fn spawn_and_ready(
    class: ToolClass,
    spec: &WorkerSpawnSpec,
    restart_count: u32,
    ready_probe_timeout: Duration,
    notif_tx: &mpsc::UnboundedSender<RpcNotification>,
) -> Result<Arc<Worker>, PoolError> {
    let (transport, mut notif_rx) = Transport::spawn(&spec.command, &spec.args)?;
    let pid = transport.pid().await;

    let tx = notif_tx.clone();
    tokio::spawn(async move {
        while let Some(n) = notif_rx.recv().await {
            let _ = tx.send(n);
        }
    });

    let list_req = RpcRequest::tools_list(transport.next_request_id());
    let resp = transport.call(list_req, ready_probe_timeout).await?;
    let result = resp
        .into_result()
        .map_err(|e| PoolError::WorkerLost(e.to_string()))?;
    let tools: HashSet<String> = result
        .get("tools")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.get("name").and_then(|n| n.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let worker = Worker::new(class, transport, pid, restart_count);
    worker.set_allow_list(tools);
    worker.record_health_check();
    Ok(Arc::new(worker))
}

async fn wait_for_death_or_unhealthy(worker: &Worker, health_check_interval: Duration) {
    let mut ticker = tokio::time::interval(health_check_interval.min(Duration::from_secs(1)));
    let mut since_last_probe = Duration::ZERO;
    loop {
        ticker.tick().await;
        if !worker.transport.is_alive() {
            return;
        }
        since_last_probe += ticker.period();
        if since_last_probe >= health_check_interval && worker.outstanding_count() == 0 {
            since_last_probe = Duration::ZERO;
            let req = RpcRequest::ping(worker.transport.next_request_id());
            match worker
                .transport
                .call(req, Duration::from_secs(3))
                .await
            {
                Ok(_) => worker.record_health_check(),
                Err(_) => return,
            }
        }
    }
}
