//! Message handler abstraction.
//!
//! The [`MessageHandler`] trait is the seam between the exchange machinery
//! and the business logic behind each method.  The session calls it once per
//! inbound request or notification with an [`ExchangeContext`] holding the
//! environment snapshot taken when the exchange began.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::models::message::{Message, RpcError};

/// Session environment: a flat string-to-string map.
pub type Environment = HashMap<String, String>;

/// Handler verdict for one inbound message.
///
/// - `Ok(Some(value))`: reply with `value` as the `result`.
/// - `Ok(None)`: deliberately send nothing.
/// - `Err(error)`: reply with an error-shaped response.
pub type HandlerResult = std::result::Result<Option<Value>, RpcError>;

/// Per-exchange context handed to the handler.
#[derive(Debug, Clone)]
pub struct ExchangeContext {
    /// Connection tag of the owning transport.
    pub connection: Arc<str>,
    /// Environment snapshot; unaffected by later `set_env` calls.
    pub env: Arc<Environment>,
    /// Fires when the exchange is cancelled from outside.
    pub cancel: CancellationToken,
}

impl ExchangeContext {
    /// Look up one environment variable in the snapshot.
    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }
}

/// Business logic invoked by the session for each inbound message.
///
/// Implementations may block for as long as they need; the session places
/// no timeout on them.  Returning `Ok(Some(_))` or `Err(_)` for a
/// notification is allowed but nothing is sent back to the peer.
pub trait MessageHandler: Send + Sync {
    /// Produce the reply payload for `message`.
    fn handle<'a>(
        &'a self,
        ctx: &'a ExchangeContext,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;
}
