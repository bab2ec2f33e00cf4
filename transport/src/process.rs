//! A framed JSON-RPC transport over a subprocess's stdio
//! (`spec.md` §4.1). Owns the child process and its pipes exclusively;
//! callers interact only through [`Transport::call`], [`Transport::send`],
//! and the notification channel returned by [`Transport::spawn`].

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aria_protocol::{InboundMessage, RequestId, RpcNotification, RpcRequest, RpcResponse};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::framing::{read_frame, write_frame, FramingError};

const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);
const STDERR_RING_CAPACITY: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(std::io::Error),
    #[error("transport error: {0}")]
    Framing(#[from] FramingError),
    #[error("worker lost: {0}")]
    WorkerLost(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport is closed")]
    Closed,
}

type PendingMap = Arc<DashMap<RequestId, oneshot::Sender<Result<RpcResponse, TransportError>>>>;

pub struct Transport {
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
    pending: PendingMap,
    write_tx: mpsc::UnboundedSender<WriteCommand>,
    stderr_log: Arc<Mutex<VecDeque<String>>>,
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
    reader_task: tokio::task::JoinHandle<()>,
    stderr_task: tokio::task::JoinHandle<()>,
}

enum WriteCommand {
    Message(serde_json::Value),
    CloseStdin,
}

impl Transport {
    /// Spawn `command args...` and wire up the framed transport. Returns the
    /// transport plus a receiver of worker-emitted notifications (e.g.
    /// `job/progress`).
    pub fn spawn(
        command: &str,
        args: &[String],
    ) -> Result<(Self, mpsc::UnboundedReceiver<RpcNotification>), TransportError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TransportError::Spawn)?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let alive = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(DashMap::new());
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteCommand>();
        let (notif_tx, notif_rx) = mpsc::unbounded_channel::<RpcNotification>();
        let stderr_log = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_RING_CAPACITY)));

        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(cmd) = write_rx.recv().await {
                match cmd {
                    WriteCommand::Message(v) => {
                        if let Err(e) = write_frame(&mut stdin, &v).await {
                            warn!(error = %e, "failed writing to worker stdin");
                            break;
                        }
                    }
                    WriteCommand::CloseStdin => {
                        let _ = stdin.shutdown().await;
                        break;
                    }
                }
            }
        });

        let reader_alive = Arc::clone(&alive);
        let reader_pending = Arc::clone(&pending);
        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                match read_frame(&mut reader).await {
                    Ok(value) => match InboundMessage::from_value(value) {
                        Ok(InboundMessage::Response(resp)) => {
                            if let Some((_, tx)) = reader_pending.remove(&resp.id) {
                                let _ = tx.send(Ok(resp));
                            }
                        }
                        Ok(InboundMessage::Notification(n)) => {
                            let _ = notif_tx.send(n);
                        }
                        Err(e) => warn!(error = %e, "malformed inbound message"),
                    },
                    Err(e) => {
                        debug!(error = %e, "worker transport closed");
                        break;
                    }
                }
            }
            reader_alive.store(false, Ordering::SeqCst);
            let keys: Vec<RequestId> = reader_pending.iter().map(|e| *e.key()).collect();
            for key in keys {
                if let Some((_, tx)) = reader_pending.remove(&key) {
                    let _ = tx.send(Err(TransportError::WorkerLost(
                        "worker stdout closed".to_string(),
                    )));
                }
            }
        });

        let stderr_ring = Arc::clone(&stderr_log);
        let stderr_task = tokio::spawn(async move {
            use tokio::io::AsyncBufReadExt;
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut ring = stderr_ring.lock();
                if ring.len() >= STDERR_RING_CAPACITY {
                    ring.pop_front();
                }
                ring.push_back(line);
            }
        });

        Ok((
            Self {
                alive,
                next_id: AtomicU64::new(1),
                pending,
                write_tx,
                stderr_log,
                child: Arc::new(tokio::sync::Mutex::new(Some(child))),
                reader_task,
                stderr_task,
            },
            notif_rx,
        ))
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(|c| c.id())
    }

    pub fn next_request_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Write a framed request. Never blocks on worker processing time
    /// (`spec.md` §4.1 `send`) — it only enqueues onto the writer task.
    pub fn send(&self, request: &RpcRequest) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        let value = serde_json::to_value(request).expect("RpcRequest always serializes");
        self.write_tx
            .send(WriteCommand::Message(value))
            .map_err(|_| TransportError::Closed)
    }

    /// Send `request` and await its correlated response, bounded by
    /// `deadline`.
    pub async fn call(
        &self,
        request: RpcRequest,
        deadline: Duration,
    ) -> Result<RpcResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request.id, tx);
        if let Err(e) = self.send(&request) {
            self.pending.remove(&request.id);
            return Err(e);
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.pending.remove(&request.id);
                Err(TransportError::WorkerLost(
                    "response channel dropped".to_string(),
                ))
            }
            Err(_) => {
                self.pending.remove(&request.id);
                Err(TransportError::Timeout(deadline))
            }
        }
    }

    /// Last N captured stderr lines, for worker-crash diagnostics.
    pub fn recent_stderr(&self) -> Vec<String> {
        self.stderr_log.lock().iter().cloned().collect()
    }

    /// Flush pending writes, close stdin, wait for graceful exit within
    /// `grace`, then force-terminate (`spec.md` §4.1 `close`).
    pub async fn close(&self, grace: Option<Duration>) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.write_tx.send(WriteCommand::CloseStdin);

        let grace = grace.unwrap_or(DEFAULT_CLOSE_GRACE);
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("worker did not exit within grace period, killing");
                    let _ = child.kill().await;
                }
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.stderr_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn echo_worker_round_trips_tools_list() {
        // A tiny python-free echo using `cat` won't speak our framing, so we
        // drive a shell script that replies with one canned frame.
        let script = r#"printf 'Content-Length: 39\r\n\r\n{"jsonrpc":"2.0","id":1,"result":{}}'"#;
        let (transport, _notifs) = Transport::spawn("sh", &["-c".to_string(), script.to_string()])
            .expect("spawn sh");

        let req = RpcRequest::tools_list(transport.next_request_id());
        let resp = transport
            .call(req, Duration::from_secs(2))
            .await
            .expect("call should succeed");
        assert_eq!(resp.id, RequestId(1));
        transport.close(Some(Duration::from_millis(200))).await;
    }

    #[tokio::test]
    async fn call_times_out_when_worker_never_responds() {
        let (transport, _notifs) = Transport::spawn("sh", &["-c".to_string(), "sleep 5".into()])
            .expect("spawn sh");

        let req = RpcRequest::tools_list(transport.next_request_id());
        let result = transport.call(req, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
        transport.close(Some(Duration::from_millis(50))).await;
    }

    #[tokio::test]
    async fn worker_exit_fails_outstanding_calls_with_worker_lost() {
        let (transport, _notifs) =
            Transport::spawn("sh", &["-c".to_string(), "exit 0".into()]).expect("spawn sh");

        let req = RpcRequest::tools_list(transport.next_request_id());
        let result = transport.call(req, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TransportError::WorkerLost(_))));
    }
}
