//! Shared wire types and error kinds for the aria gateway core.
//!
//! Every other workspace crate depends on this one so that tool-call
//! outcomes, JSON-RPC envelopes, and error classification stay a single
//! shared vocabulary instead of being reinvented per crate (`spec.md` §9
//! "tagged result types").

pub mod error;
pub mod rpc;
pub mod tool;

pub use error::{ErrorKind, GatewayError};
pub use rpc::{
    InboundMessage, JobProgressParams, JsonRpcVersion, RequestId, RpcError, RpcNotification,
    RpcRequest, RpcResponse,
};
pub use tool::{
    classify, is_non_idempotent, is_public, public_tool_names, ToolClass, ESTIMATE_TOOL,
    NEVER_EXPOSED, NON_IDEMPOTENT, SYNTHESIZE_TOOL,
};

/// Generic outcome of a tool call: either a JSON payload or a classified
/// error, never a raw exception (`spec.md` §9).
pub type ToolOutcome = Result<serde_json::Value, GatewayError>;
