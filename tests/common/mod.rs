//! Shared scaffolding for the end-to-end scenario tests (`SPEC_FULL.md`
//! §8, `spec.md` §8 "End-to-end scenarios").
//!
//! A canned worker is a real `sh` subprocess that prints a fixed sequence
//! of `Content-Length` framed JSON-RPC messages to stdout without ever
//! reading stdin, the same technique `aria-transport`'s own process tests
//! use for a single canned response; here it is generalized to a whole
//! script of frames so a worker can answer `tools/list` and then one or
//! more `tools/call`s in order. Because the worker never parses a
//! request, calls against it must be issued in the same order its frames
//! are listed.

use std::time::Duration;

use aria_protocol::ToolClass;
use aria_transport::framing::encode_frame;
use aria_workers::{PoolError, WorkerPool, WorkerSpawnSpec};
use serde_json::Value;

/// Render `frames` as a `sh -c` script. A short `sleep` after each frame
/// gives the async caller time to register the next outstanding request
/// before the worker "replies" to it.
pub fn canned_script(frames: &[Value]) -> String {
    let mut body = String::new();
    for frame in frames {
        let bytes = encode_frame(frame);
        let text = String::from_utf8(bytes).expect("frame is valid utf8");
        let escaped = text.replace('\'', "'\\''");
        body.push_str(&format!("printf '%s' '{escaped}'\nsleep 0.05\n"));
    }
    body
}

pub fn spawn_spec(frames: &[Value]) -> WorkerSpawnSpec {
    WorkerSpawnSpec {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), canned_script(frames)],
    }
}

/// The first frame a worker ever answers is always `tools/list` with
/// request id 1 (`Transport::next_request_id` starts at 1 and
/// `spawn_and_ready` sends `tools/list` before anything else).
pub fn tools_list_response(tools: &[&str]) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "tools": tools.iter().map(|t| serde_json::json!({"name": t})).collect::<Vec<_>>(),
        }
    })
}

pub fn call_response(id: u64, result: Value) -> Value {
    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
}

pub fn progress_notification(job_id: &str, step: &str, progress: f32) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "job/progress",
        "params": {"job_id": job_id, "step": step, "progress": progress},
    })
}

/// Poll until a worker class has a live, registered worker. A freshly
/// started [`WorkerPool`] spawns its supervisors in the background, so
/// the very first `acquire` after `start` would otherwise race the
/// subprocess's own startup and `tools/list` round trip.
pub async fn wait_ready(pool: &WorkerPool, class: ToolClass) {
    for _ in 0..200 {
        match pool.acquire(class).await {
            Ok(_handle) => return,
            Err(PoolError::NotReady) | Err(PoolError::ClassNotConfigured(_)) => {
                tokio::time::sleep(Duration::from_millis(15)).await;
            }
            Err(e) => panic!("unexpected pool error while waiting for {class}: {e}"),
        }
    }
    panic!("worker for class {class} never became ready");
}
