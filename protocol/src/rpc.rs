//! JSON-RPC 2.0 envelopes exchanged with MCP worker subprocesses over
//! Content-Length framed stdio (`spec.md` §4.1, §6 "JSON-RPC worker
//! protocol").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-worker monotonically increasing request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            method: method.into(),
            params,
        }
    }

    pub fn tools_list(id: RequestId) -> Self {
        Self::new(id, "tools/list", None)
    }

    pub fn tools_call(id: RequestId, name: &str, arguments: Value) -> Self {
        Self::new(
            id,
            "tools/call",
            Some(serde_json::json!({ "name": name, "arguments": arguments })),
        )
    }

    pub fn ping(id: RequestId) -> Self {
        Self::new(id, "ping", None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A server-initiated notification (no id, no response expected). Workers
/// use this exclusively for `job/progress` (`spec.md` §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Any framed message read off a worker's stdout: either a response
/// correlated by id, or a notification.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Response(RpcResponse),
    Notification(RpcNotification),
}

impl InboundMessage {
    /// Parse a raw JSON value into a response or notification based on
    /// presence of `id`.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.get("id").is_some() {
            Ok(InboundMessage::Response(serde_json::from_value(value)?))
        } else {
            Ok(InboundMessage::Notification(serde_json::from_value(value)?))
        }
    }
}

/// Marker type that always (de)serializes as the literal `"2.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "2.0" {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported jsonrpc version: {s}"
            )))
        }
    }
}

/// Payload of a `job/progress` notification (`spec.md` §4.5, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgressParams {
    pub job_id: String,
    pub step: String,
    pub progress: f32,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let req = RpcRequest::tools_call(RequestId(7), "parse_score", serde_json::json!({}));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["id"], 7);
        assert_eq!(v["jsonrpc"], "2.0");
        let back: RpcRequest = serde_json::from_value(v).unwrap();
        assert_eq!(back.method, "tools/call");
    }

    #[test]
    fn inbound_distinguishes_notification_from_response() {
        let resp = serde_json::json!({"jsonrpc": "2.0", "id": 3, "result": {}});
        let notif = serde_json::json!({"jsonrpc": "2.0", "method": "job/progress", "params": {}});
        assert!(matches!(
            InboundMessage::from_value(resp).unwrap(),
            InboundMessage::Response(_)
        ));
        assert!(matches!(
            InboundMessage::from_value(notif).unwrap(),
            InboundMessage::Notification(_)
        ));
    }
}
