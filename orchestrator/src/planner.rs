//! The LLM planner seam (`spec.md` §1 "a large language model (LLM)
//! acting as a planner", §9 design notes). The wire protocol to an actual
//! model is explicitly out of scope for this core, so callers are reached
//! through [`LlmPlanner`]; tests and local development drive a
//! deterministic [`ScriptedPlanner`] instead.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::context::TurnContext;

#[derive(Debug, Clone)]
pub enum PlannerOutput {
    /// The planner is done for this turn and has a user-facing reply.
    FinalText(String),
    /// The planner wants to invoke a tool before replying.
    ToolCall { name: String, arguments: Value },
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait LlmPlanner: Send + Sync + 'static {
    async fn plan(&self, ctx: &TurnContext) -> Result<PlannerOutput, PlannerError>;
}

/// A deterministic test double that replays a fixed script of outputs,
/// one per call, falling back to a canned final text once exhausted
/// (grounded in the teacher's `ScriptedWorker` testing pattern used
/// throughout its MCP integration tests).
pub struct ScriptedPlanner {
    script: tokio::sync::Mutex<std::collections::VecDeque<PlannerOutput>>,
}

impl ScriptedPlanner {
    pub fn new(script: Vec<PlannerOutput>) -> Self {
        Self {
            script: tokio::sync::Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl LlmPlanner for ScriptedPlanner {
    async fn plan(&self, _ctx: &TurnContext) -> Result<PlannerOutput, PlannerError> {
        let mut script = self.script.lock().await;
        Ok(script
            .pop_front()
            .unwrap_or_else(|| PlannerOutput::FinalText("(script exhausted)".to_string())))
    }
}
