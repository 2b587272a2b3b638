//! JSON-RPC message shapes for the remote tool protocol.
//!
//! The protocol is a handshake (`initialize`), a listing
//! (`tools/list`), invocation (`tools/call`), and an optional resource
//! read (`resources/read`), all as JSON-RPC 2.0 over the transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision sent in the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// An outgoing JSON-RPC request.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    /// Always "2.0".
    pub jsonrpc: &'static str,
    /// Request id; responses are matched on it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Method name.
    pub method: &'a str,
    /// Method parameters.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl<'a> Request<'a> {
    /// A request expecting a response.
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        }
    }

    /// A fire-and-forget notification.
    pub fn notification(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        }
    }
}

/// An incoming JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Id of the request this answers; notifications have none.
    pub id: Option<u64>,
    /// Successful result.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure, mutually exclusive with `result`.
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// Parameters for the `initialize` handshake.
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "reef",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Extract the concatenated text blocks from a tool-call result.
pub fn extract_text(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| {
                    (block.get("type").and_then(Value::as_str) == Some("text"))
                        .then(|| block.get("text").and_then(Value::as_str))
                        .flatten()
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_null_id() {
        let req = Request::notification("notifications/initialized", Value::Null);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("\"params\""));
    }

    #[test]
    fn request_with_id_round_trips() {
        let req = Request::new(7, "tools/list", serde_json::json!({}));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["jsonrpc"], "2.0");
    }

    #[test]
    fn extract_text_joins_blocks() {
        let result = serde_json::json!({
            "content": [
                {"type": "text", "text": "one"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "two"},
            ],
        });
        assert_eq!(extract_text(&result), "one\ntwo");
    }
}
