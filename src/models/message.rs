//! JSON-RPC 2.0 message envelope exchanged with the peer.
//!
//! One [`Message`] type covers all three shapes that travel on the wire:
//!
//! | Shape        | `id` | `method` | `result` / `error` |
//! |--------------|------|----------|--------------------|
//! | Request      | yes  | yes      | no                 |
//! | Notification | no   | yes      | no                 |
//! | Response     | yes  | no       | yes                |
//!
//! Anything else is rejected by [`Message::from_frame`] with
//! [`AppError::Decode`].

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Protocol version written into every outbound message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error code: invalid request.
pub const INVALID_REQUEST: i64 = -32600;

/// Standard JSON-RPC error code: method not found.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Correlation identifier linking a request to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id, e.g. `1`.
    Number(i64),
    /// String id, e.g. `"req-7"`.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Error object carried by an error-shaped response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error object without structured detail.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// `-32601` error for a method the handler does not know.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {method}"))
    }
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Shape of a message, derived from which fields are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Carries an id and a method; a reply is due.
    Request,
    /// Carries a method but no id; no reply is due.
    Notification,
    /// Carries an id and a result or error.
    Response,
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version tag.
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    /// Correlation id; absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Method name for requests and notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Successful reply payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error reply payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_owned()
}

impl Message {
    /// Build a request.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a successful response for `id`.
    #[must_use]
    pub fn reply(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error-shaped response for `id`.
    #[must_use]
    pub fn error_reply(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// Classify the message, or `None` when it matches no valid shape.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        let has_outcome = self.result.is_some() || self.error.is_some();
        match (&self.id, &self.method, has_outcome) {
            (Some(_), Some(_), false) => Some(MessageKind::Request),
            (None, Some(_), false) => Some(MessageKind::Notification),
            (Some(_), None, true) => Some(MessageKind::Response),
            _ => None,
        }
    }

    /// Method name, or `""` for responses.
    #[must_use]
    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or_default()
    }

    /// Decode one frame into a message.
    ///
    /// # Errors
    ///
    /// - [`AppError::Decode`]`("malformed json: …")`: the frame is not a JSON object.
    /// - [`AppError::Decode`]`("invalid message: …")`: the object has no recognised shape.
    pub fn from_frame(frame: &str) -> Result<Self> {
        let message: Self = serde_json::from_str(frame)
            .map_err(|e| AppError::Decode(format!("malformed json: {e}")))?;

        if message.kind().is_none() {
            return Err(AppError::Decode(
                "invalid message: expected a request, notification or response".into(),
            ));
        }

        Ok(message)
    }

    /// Encode the message as a single compact JSON line (without the newline).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Write`] if serialisation fails.
    pub fn to_frame(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Write(format!("failed to serialise outbound message: {e}")))
    }
}
