//! Built-in diagnostic handler served by the `stdio-exchange` binary.
//!
//! | Method      | Reply                                              |
//! |-------------|----------------------------------------------------|
//! | `ping`      | `"pong"`                                           |
//! | `echo`      | the request `params` (or `null`)                   |
//! | `env/keys`  | sorted key names of the environment snapshot       |
//! | *(other)*   | `-32601` method not found                          |
//!
//! Notifications are logged at `INFO` and otherwise ignored.  Values of
//! environment variables are never sent back to the peer.

use std::future::Future;
use std::pin::Pin;

use serde_json::{json, Value};
use tracing::info;

use crate::models::message::{Message, MessageKind, RpcError};
use crate::session::{ExchangeContext, HandlerResult, MessageHandler};

/// Answers `ping`, `echo` and `env/keys`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiagnosticHandler;

impl DiagnosticHandler {
    fn answer(ctx: &ExchangeContext, message: &Message) -> HandlerResult {
        if message.kind() == Some(MessageKind::Notification) {
            let params = message.params.as_ref().unwrap_or(&Value::Null);
            info!(
                connection = &*ctx.connection,
                method = message.method_name(),
                %params,
                "notification received"
            );
            return Ok(None);
        }

        match message.method_name() {
            "ping" => Ok(Some(json!("pong"))),
            "echo" => Ok(Some(message.params.clone().unwrap_or(Value::Null))),
            "env/keys" => {
                let mut keys: Vec<&str> = ctx.env.keys().map(String::as_str).collect();
                keys.sort_unstable();
                Ok(Some(json!(keys)))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }
}

impl MessageHandler for DiagnosticHandler {
    fn handle<'a>(
        &'a self,
        ctx: &'a ExchangeContext,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>> {
        Box::pin(async move { Self::answer(ctx, message) })
    }
}
