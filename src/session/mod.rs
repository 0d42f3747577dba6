//! Exchange session.
//!
//! An [`ExchangeSession`] owns one logical conversation with the peer.  It
//! turns each inbound message into at most one outbound reply by calling the
//! registered [`MessageHandler`] with the current environment snapshot.
//!
//! # Environment
//!
//! The environment lives behind an `RwLock<Arc<Environment>>`.
//! [`ExchangeSession::set_env`] swaps the whole `Arc`, and every exchange
//! clones the `Arc` once when it starts, so a running exchange sees either the
//! old map or the new one in full, never a mix.
//!
//! # Shutdown
//!
//! Every exchange holds a [`TaskTracker`] token for its whole duration.
//! [`ExchangeSession::close`] with `graceful = true` waits for those tokens to
//! drain; with `graceful = false` it fires the abort token and in-flight
//! handlers are dropped, failing with [`AppError::SessionClosed`].

pub mod handler;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub use handler::{Environment, ExchangeContext, HandlerResult, MessageHandler};

use crate::models::message::{Message, MessageKind, RequestId, RpcError, INVALID_REQUEST};
use crate::AppError;

/// Result of one exchange.
#[derive(Debug)]
pub enum ExchangeOutcome {
    /// Send this reply to the peer.
    Reply(Message),
    /// Nothing is due: a notification, an inbound response, or a handler
    /// that declined to answer.  Not an error.
    NoReply,
    /// The exchange failed.
    Failed {
        /// Correlation id of the inbound message, if it had one.
        id: Option<RequestId>,
        /// What went wrong.
        error: AppError,
        /// Error-shaped reply to surface the failure to the peer, if any.
        reply: Option<Message>,
    },
}

impl ExchangeOutcome {
    /// Message to write back to the peer, if any.
    #[must_use]
    pub fn outbound(&self) -> Option<&Message> {
        match self {
            Self::Reply(message) => Some(message),
            Self::Failed { reply, .. } => reply.as_ref(),
            Self::NoReply => None,
        }
    }

    /// Correlation id of a failed exchange.
    #[must_use]
    pub fn failed_id(&self) -> Option<&RequestId> {
        match self {
            Self::Failed { id, .. } => id.as_ref(),
            Self::Reply(_) | Self::NoReply => None,
        }
    }
}

/// How a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// In-flight exchanges were allowed to finish.
    Graceful,
    /// In-flight exchanges were aborted.
    Abort,
}

/// One conversation with the peer.
pub struct ExchangeSession {
    connection: Arc<str>,
    handler: Arc<dyn MessageHandler>,
    env: RwLock<Arc<Environment>>,
    in_flight: Mutex<HashSet<RequestId>>,
    tracker: TaskTracker,
    abort: CancellationToken,
    closed: AtomicBool,
    close_mode: OnceLock<CloseMode>,
}

impl std::fmt::Debug for ExchangeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSession")
            .field("connection", &self.connection)
            .field("in_flight", &self.tracker.len())
            .field("close_mode", &self.close_mode.get())
            .finish_non_exhaustive()
    }
}

/// Removes a request id from the in-flight set when the exchange ends.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<RequestId>>,
    id: RequestId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl ExchangeSession {
    /// Create a session bound to `handler` with an empty environment.
    pub fn new(connection: impl Into<Arc<str>>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            connection: connection.into(),
            handler,
            env: RwLock::new(Arc::new(Environment::new())),
            in_flight: Mutex::new(HashSet::new()),
            tracker: TaskTracker::new(),
            abort: CancellationToken::new(),
            closed: AtomicBool::new(false),
            close_mode: OnceLock::new(),
        }
    }

    /// Replace the environment wholesale.
    ///
    /// Exchanges that already started keep the snapshot they took.
    pub fn set_env(&self, env: Environment) {
        let next = Arc::new(env);
        *self.env.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Current environment snapshot.
    #[must_use]
    pub fn env_snapshot(&self) -> Arc<Environment> {
        Arc::clone(&self.env.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of exchanges currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Whether [`ExchangeSession::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// How the session was closed, if it has been.
    #[must_use]
    pub fn close_mode(&self) -> Option<CloseMode> {
        self.close_mode.get().copied()
    }

    /// Answer one inbound message.
    ///
    /// - Requests are handed to the handler; the reply carries the request id.
    /// - Notifications are handed to the handler; the outcome is always
    ///   [`ExchangeOutcome::NoReply`].
    /// - Inbound responses match no request this session issued and are
    ///   dropped with [`ExchangeOutcome::NoReply`].
    ///
    /// A request whose id is already in flight fails without a reply so that
    /// no id is ever answered twice.  After [`ExchangeSession::close`] every
    /// call fails with [`AppError::SessionClosed`].
    pub async fn exchange(&self, message: Message, cancel: &CancellationToken) -> ExchangeOutcome {
        let _token = self.tracker.token();
        if self.is_closed() {
            return ExchangeOutcome::Failed {
                id: message.id,
                error: AppError::SessionClosed,
                reply: None,
            };
        }

        match message.kind() {
            Some(MessageKind::Request) => self.exchange_request(message, cancel).await,
            Some(MessageKind::Notification) => {
                self.exchange_notification(&message, cancel).await;
                ExchangeOutcome::NoReply
            }
            Some(MessageKind::Response) => {
                warn!(
                    connection = &*self.connection,
                    id = ?message.id,
                    "session: dropping response with no matching outstanding request"
                );
                ExchangeOutcome::NoReply
            }
            None => {
                let id = message.id.clone();
                ExchangeOutcome::Failed {
                    id: id.clone(),
                    error: AppError::Exchange {
                        id: id.clone(),
                        message: "message is neither a request, notification nor response".into(),
                    },
                    reply: id.map(|id| {
                        Message::error_reply(id, RpcError::new(INVALID_REQUEST, "invalid request"))
                    }),
                }
            }
        }
    }

    async fn exchange_request(&self, message: Message, cancel: &CancellationToken) -> ExchangeOutcome {
        let Some(id) = message.id.clone() else {
            return ExchangeOutcome::NoReply;
        };

        let fresh = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        if !fresh {
            return ExchangeOutcome::Failed {
                id: Some(id.clone()),
                error: AppError::Exchange {
                    id: Some(id),
                    message: "a request with this id is already in flight".into(),
                },
                reply: None,
            };
        }
        let _guard = InFlightGuard {
            set: &self.in_flight,
            id: id.clone(),
        };

        match self.dispatch(&message, cancel).await {
            Ok(Ok(Some(result))) => ExchangeOutcome::Reply(Message::reply(id, result)),
            Ok(Ok(None)) => {
                debug!(
                    connection = &*self.connection,
                    %id,
                    "session: handler declined to reply"
                );
                ExchangeOutcome::NoReply
            }
            Ok(Err(rpc_error)) => ExchangeOutcome::Failed {
                id: Some(id.clone()),
                error: AppError::Exchange {
                    id: Some(id.clone()),
                    message: rpc_error.to_string(),
                },
                reply: Some(Message::error_reply(id, rpc_error)),
            },
            Err(error) => ExchangeOutcome::Failed {
                id: Some(id),
                error,
                reply: None,
            },
        }
    }

    async fn exchange_notification(&self, message: &Message, cancel: &CancellationToken) {
        match self.dispatch(message, cancel).await {
            Ok(Ok(_)) => {}
            Ok(Err(rpc_error)) => warn!(
                connection = &*self.connection,
                method = message.method_name(),
                error = %rpc_error,
                "session: notification handler failed"
            ),
            Err(error) => debug!(
                connection = &*self.connection,
                method = message.method_name(),
                %error,
                "session: notification interrupted"
            ),
        }
    }

    /// Run the handler against a fresh snapshot, racing session abort and
    /// caller cancellation.
    async fn dispatch(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> crate::Result<HandlerResult> {
        let ctx = ExchangeContext {
            connection: Arc::clone(&self.connection),
            env: self.env_snapshot(),
            cancel: cancel.child_token(),
        };

        tokio::select! {
            biased;

            () = self.abort.cancelled() => Err(AppError::SessionClosed),
            () = cancel.cancelled() => Err(AppError::Cancelled("exchange cancelled".into())),
            result = self.handler.handle(&ctx, message) => Ok(result),
        }
    }

    /// Close the session.  Returns `false` if it was already closed.
    ///
    /// With `graceful = true` this waits for every in-flight exchange to
    /// finish.  With `graceful = false` in-flight exchanges are aborted and
    /// resolve to [`AppError::SessionClosed`].
    pub async fn close(&self, graceful: bool) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!(connection = &*self.connection, "session: close called twice, ignoring");
            return false;
        }

        let mode = if graceful {
            CloseMode::Graceful
        } else {
            CloseMode::Abort
        };
        let _ = self.close_mode.set(mode);

        self.tracker.close();
        if graceful {
            self.tracker.wait().await;
        } else {
            self.abort.cancel();
        }

        info!(connection = &*self.connection, ?mode, "session closed");
        true
    }
}
