#![forbid(unsafe_code)]

//! Single-peer request/response endpoint over a newline-delimited JSON
//! duplex stream.
//!
//! The crate is layered bottom-up:
//! - [`transport`]: frames the byte stream into [`Message`]s and back.
//! - [`session`]: answers one message at a time with a [`MessageHandler`].
//! - [`endpoint`]: runs both, one task per inbound message, and owns the
//!   start / wait / teardown lifecycle.

pub mod config;
pub mod diagnostics;
pub mod endpoint;
pub mod env_provider;
pub mod errors;
pub mod models;
pub mod session;
pub mod transport;

pub use config::EndpointConfig;
pub use endpoint::{EndpointState, StdioEndpoint};
pub use env_provider::{EnvProvider, FileEnvProvider};
pub use errors::{AppError, Result};
pub use models::message::{Message, RequestId, RpcError};
pub use session::{ExchangeContext, ExchangeOutcome, ExchangeSession, MessageHandler};
