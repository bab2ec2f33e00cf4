//! Tool-name → worker-class dispatch (`spec.md` §4.3, component C3).
//!
//! The static allow-list mapping in `aria-protocol::tool` is the sole
//! source of truth for "is this tool exposed" — a tool absent from it is
//! rejected with `tool_not_allowed` even if the planner names it, and this
//! router never consults anything else to decide routing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aria_protocol::{classify, is_non_idempotent, ErrorKind, GatewayError, RequestId, RpcRequest};
use aria_transport::TransportError;
use aria_workers::{PoolError, WorkerPool};
use serde_json::Value;
use tracing::{info, warn};

/// Minimum time budget allotted to a retry attempt, regardless of how much
/// of the user-visible deadline has already elapsed (`spec.md` §4.3).
const MIN_RETRY_BUDGET: Duration = Duration::from_secs(10);

pub struct ToolRouter {
    pool: Arc<WorkerPool>,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchRecord {
    pub attempt: u32,
    pub duration_ms: u128,
}

impl ToolRouter {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    /// Dispatch `tool` with `arguments`, bounded by `deadline` measured
    /// from the first send (`spec.md` §4.3).
    pub async fn call(
        &self,
        tool: &str,
        arguments: Value,
        deadline: Duration,
    ) -> Result<Value, GatewayError> {
        let class = match classify(tool) {
            Some(c) => c,
            None => {
                return Err(GatewayError::tool_not_allowed(tool));
            }
        };

        let start = Instant::now();
        let retryable = !is_non_idempotent(tool);

        let mut attempt: u32 = 1;
        loop {
            let elapsed = start.elapsed();
            let remaining = deadline.saturating_sub(elapsed);
            let budget = if attempt == 1 {
                remaining
            } else {
                remaining.max(MIN_RETRY_BUDGET)
            };

            let outcome = self.dispatch_once(tool, class, arguments.clone(), budget).await;

            let duration_ms = start.elapsed().as_millis();
            match &outcome {
                Ok(_) => info!(
                    tool, class = %class, attempt, duration_ms, outcome = "success",
                    "tool call completed"
                ),
                Err(e) => warn!(
                    tool, class = %class, attempt, duration_ms, outcome = %e.kind,
                    "tool call failed"
                ),
            }

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let should_retry = retryable
                        && attempt == 1
                        && matches!(err.kind, ErrorKind::WorkerLost);
                    if should_retry {
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn dispatch_once(
        &self,
        tool: &str,
        class: aria_protocol::ToolClass,
        arguments: Value,
        deadline: Duration,
    ) -> Result<Value, GatewayError> {
        let handle = self
            .pool
            .acquire(class)
            .await
            .map_err(pool_error_to_gateway)?;

        if !handle.allows(tool) {
            return Err(GatewayError::new(
                ErrorKind::Internal,
                format!("worker for class {class} does not allow-list tool '{tool}'"),
            ));
        }

        let id: RequestId = handle.transport().next_request_id();
        let request = RpcRequest::tools_call(id, tool, arguments);
        let response = handle
            .transport()
            .call(request, deadline)
            .await
            .map_err(transport_error_to_gateway)?;

        response.into_result().map_err(|rpc_err| {
            GatewayError::new(ErrorKind::Internal, rpc_err.to_string())
        })
    }
}

fn transport_error_to_gateway(e: TransportError) -> GatewayError {
    match e {
        TransportError::Timeout(d) => {
            GatewayError::new(ErrorKind::Timeout, format!("tool call timed out after {d:?}"))
        }
        TransportError::WorkerLost(msg) => GatewayError::new(ErrorKind::WorkerLost, msg),
        TransportError::Closed => {
            GatewayError::new(ErrorKind::WorkerLost, "transport closed".to_string())
        }
        other => GatewayError::new(ErrorKind::Internal, other.to_string()),
    }
}

fn pool_error_to_gateway(e: PoolError) -> GatewayError {
    e.into()
}
