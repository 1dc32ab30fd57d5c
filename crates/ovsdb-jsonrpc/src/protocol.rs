//! JSON-RPC message types
//!
//! OVSDB speaks JSON-RPC 1.0 (RFC 7047 §4): requests carry `method`,
//! `params` and `id`; notifications are requests with a null `id`; responses
//! carry both `result` and `error`, one of them null.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ovsdb_core::{Error, Result};

/// JSON-RPC 1.0 request or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Value,
}

impl JsonRpcRequest {
    /// Create a request with a numeric call ID
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            method: method.into(),
            params,
            id: Value::Number(id.into()),
        }
    }

    /// Create a notification (null ID, no response expected)
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            id: Value::Null,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }
}

/// JSON-RPC 1.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Value,
    pub id: Value,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            result,
            error: Value::Null,
            id,
        }
    }

    /// Create an error response
    pub fn error(id: Value, error: Value) -> Self {
        Self {
            result: Value::Null,
            error,
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_null()
    }
}

/// A classified incoming frame
#[derive(Debug, Clone)]
pub enum JsonRpcMessage {
    /// Peer-originated call that expects an answer (e.g. `echo`)
    Request(JsonRpcRequest),
    /// Unsolicited notification (e.g. `update`)
    Notification(JsonRpcRequest),
    /// Answer to one of our calls
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Classify a decoded frame. Presence of `method` makes it a request or
    /// notification depending on the ID; otherwise it must look like a
    /// response to a pending call.
    pub fn classify(frame: Value) -> Result<JsonRpcMessage> {
        let obj = frame
            .as_object()
            .ok_or_else(|| Error::protocol(format!("frame is not an object: {frame}")))?;

        if obj.get("method").map(Value::is_string).unwrap_or(false) {
            let request: JsonRpcRequest = serde_json::from_value(frame)?;
            if request.is_notification() {
                return Ok(JsonRpcMessage::Notification(request));
            }
            return Ok(JsonRpcMessage::Request(request));
        }

        if obj.contains_key("result") || obj.contains_key("error") {
            let response: JsonRpcResponse = serde_json::from_value(frame)?;
            return Ok(JsonRpcMessage::Response(response));
        }

        Err(Error::protocol(format!("unclassifiable frame: {frame}")))
    }
}
