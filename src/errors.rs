//! Error types shared across the endpoint.

use std::fmt::{Display, Formatter};

use crate::models::message::RequestId;

/// Shared endpoint result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of the endpoint.
///
/// [`ExchangeOutcome::NoReply`](crate::session::ExchangeOutcome::NoReply) is
/// deliberately absent: "no response due" is an outcome, not a failure.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Session or transport construction failed; the endpoint is not running.
    Start(String),
    /// A single inbound frame could not be decoded into a message.
    Decode(String),
    /// The handler failed while producing a reply.
    Exchange {
        /// Correlation id of the inbound request, if it had one.
        id: Option<RequestId>,
        /// Human-readable failure description.
        message: String,
    },
    /// Writing an outbound frame failed.
    Write(String),
    /// The exchange was attempted on, or interrupted by, a closed session.
    SessionClosed,
    /// A blocking operation observed cancellation.
    Cancelled(String),
    /// Unrecoverable stream I/O failure.
    Io(String),
}

impl AppError {
    /// Correlation id attached to this error, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Exchange { id, .. } => id.as_ref(),
            _ => None,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Start(msg) => write!(f, "start: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Exchange { id: Some(id), message } => {
                write!(f, "exchange failed for request {id}: {message}")
            }
            Self::Exchange { id: None, message } => write!(f, "exchange failed: {message}"),
            Self::Write(msg) => write!(f, "write: {msg}"),
            Self::SessionClosed => write!(f, "session closed"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
