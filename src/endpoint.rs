//! Endpoint orchestrator.
//!
//! [`StdioEndpoint`] wires a [`StdioTransport`], an optional
//! [`EnvProvider`] and an [`ExchangeSession`] into one running endpoint.
//!
//! # Message flow
//!
//! 1. The transport read task decodes a frame and pushes the message into a
//!    bounded channel.
//! 2. The dispatcher task spawns one [`TaskTracker`] task per message, so a
//!    slow handler never holds up the read loop.
//! 3. Each task refreshes the environment (best effort), runs the exchange,
//!    and writes the reply if there is one.
//!
//! # Lifecycle
//!
//! ```text
//! NotStarted ──start──▶ Running ──read loop ends──▶ Draining ──▶ Closed
//! ```
//!
//! While draining, the session is closed non-gracefully, message tasks get
//! `drain_timeout` to push out replies they already hold, and the write half
//! is shut down.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::EndpointConfig;
use crate::env_provider::EnvProvider;
use crate::models::message::Message;
use crate::session::{ExchangeOutcome, ExchangeSession, MessageHandler};
use crate::transport::reader::ReadExit;
use crate::transport::StdioTransport;
use crate::{AppError, Result};

/// Endpoint lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// `start` has not succeeded yet.
    NotStarted,
    /// Reading and answering messages.
    Running,
    /// The read loop ended; the session is being torn down.
    Draining,
    /// Fully terminated.  Terminal.
    Closed,
}

/// State owned by one successful `start`.
struct Live {
    connection: String,
    session: Arc<ExchangeSession>,
    transport: Arc<StdioTransport>,
}

/// Single-peer request/response endpoint over a duplex stream.
pub struct StdioEndpoint {
    config: EndpointConfig,
    handler: Arc<dyn MessageHandler>,
    env_provider: Option<Arc<dyn EnvProvider>>,
    state: Arc<watch::Sender<EndpointState>>,
    live: Mutex<Option<Live>>,
}

impl std::fmt::Debug for StdioEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioEndpoint")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("env_provider", &self.env_provider.is_some())
            .finish_non_exhaustive()
    }
}

impl StdioEndpoint {
    /// Create an endpoint that answers messages with `handler`.
    pub fn new(config: EndpointConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let (state, _) = watch::channel(EndpointState::NotStarted);
        Self {
            config,
            handler,
            env_provider: None,
            state: Arc::new(state),
            live: Mutex::new(None),
        }
    }

    /// Refresh the session environment from `provider` before every exchange.
    #[must_use]
    pub fn with_env_provider(mut self, provider: Arc<dyn EnvProvider>) -> Self {
        self.env_provider = Some(provider);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EndpointState {
        *self.state.borrow()
    }

    /// Session created by `start`, if any.
    #[must_use]
    pub fn session(&self) -> Option<Arc<ExchangeSession>> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|live| Arc::clone(&live.session))
    }

    /// Connection tag assigned by `start`, if any.
    #[must_use]
    pub fn connection(&self) -> Option<String> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|live| live.connection.clone())
    }

    /// Start serving `input` / `output`.
    ///
    /// Builds a fresh session and transport, spawns the read, dispatch and
    /// supervisor tasks, and returns immediately.  `cancel` stops the read
    /// loop and every exchange, which then drains the endpoint like an EOF.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Start`] if this endpoint was already started or
    /// the transport could not be started.
    pub fn start<R, W>(&self, input: R, output: W, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if live.is_some() || self.state() != EndpointState::NotStarted {
            return Err(AppError::Start("endpoint already started".into()));
        }

        let connection = connection_tag(&self.config.name);
        let session = Arc::new(ExchangeSession::new(
            connection.as_str(),
            Arc::clone(&self.handler),
        ));
        let transport = Arc::new(StdioTransport::new(
            connection.clone(),
            input,
            output,
            self.config.max_frame_bytes,
        ));

        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_queue);
        let read_handle = transport
            .start(inbound_tx, &cancel)
            .map_err(|err| AppError::Start(format!("failed to start stdio transport: {err}")))?;

        let worker = Arc::new(MessageWorker {
            connection: connection.clone(),
            session: Arc::clone(&session),
            transport: Arc::clone(&transport),
            env_provider: self.env_provider.clone(),
            cancel,
        });
        let tracker = TaskTracker::new();
        let span = info_span!("endpoint", connection = connection.as_str());

        let dispatcher = tokio::spawn(
            run_dispatcher(inbound_rx, Arc::clone(&worker), tracker.clone()).instrument(span.clone()),
        );

        tokio::spawn(
            supervise(Teardown {
                read_handle,
                dispatcher,
                tracker,
                session: Arc::clone(&session),
                transport: Arc::clone(&transport),
                state: Arc::clone(&self.state),
                drain_timeout: self.config.drain_timeout(),
            })
            .instrument(span),
        );

        self.state.send_replace(EndpointState::Running);
        info!(connection = connection.as_str(), "stdio endpoint running");

        *live = Some(Live {
            connection,
            session,
            transport,
        });
        Ok(())
    }

    /// Block until the connection has fully terminated.
    ///
    /// Returns immediately if `start` never succeeded.
    pub async fn wait(&self) {
        if self.state() == EndpointState::NotStarted {
            return;
        }
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so this only ends on `Closed`.
        let _ = state.wait_for(|s| *s == EndpointState::Closed).await;
    }

    /// Whether the transport read loop has terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|live| live.transport.is_terminated())
    }
}

fn connection_tag(name: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{name}-{}", &id[..8])
}

/// Per-connection context shared by every message task.
struct MessageWorker {
    connection: String,
    session: Arc<ExchangeSession>,
    transport: Arc<StdioTransport>,
    env_provider: Option<Arc<dyn EnvProvider>>,
    cancel: CancellationToken,
}

impl MessageWorker {
    /// Refresh, exchange, reply.  Every failure stops here.
    async fn process(&self, message: Message) {
        let connection = self.connection.as_str();

        if let Some(provider) = &self.env_provider {
            self.refresh_env(provider.as_ref()).await;
        }

        let reply = match self.session.exchange(message, &self.cancel).await {
            ExchangeOutcome::NoReply => return,
            ExchangeOutcome::Reply(reply) => reply,
            ExchangeOutcome::Failed { id, error, reply } => {
                match &error {
                    AppError::SessionClosed | AppError::Cancelled(_) => {
                        debug!(connection, id = ?id, %error, "exchange interrupted by shutdown");
                    }
                    _ => error!(connection, id = ?id, %error, "failed to exchange message"),
                }
                match reply {
                    Some(reply) => reply,
                    None => return,
                }
            }
        };

        if let Err(err) = self.transport.send(&reply).await {
            error!(connection, id = ?reply.id, %err, "failed to send reply");
        }
    }

    async fn refresh_env(&self, provider: &dyn EnvProvider) {
        let loaded = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                Err(AppError::Cancelled("environment refresh cancelled".into()))
            }
            loaded = provider.load() => loaded,
        };

        match loaded {
            Ok(env) => self.session.set_env(env),
            Err(err) => error!(
                connection = self.connection.as_str(),
                %err,
                "failed to reload environment, keeping previous snapshot"
            ),
        }
    }
}

/// Spawn one task per inbound message until the read loop drops its sender.
async fn run_dispatcher(
    mut inbound_rx: mpsc::Receiver<Message>,
    worker: Arc<MessageWorker>,
    tracker: TaskTracker,
) {
    while let Some(message) = inbound_rx.recv().await {
        let worker = Arc::clone(&worker);
        tracker.spawn(async move { worker.process(message).await });
    }
    debug!("dispatcher: inbound channel closed");
}

/// Everything the supervisor tears down once the read loop ends.
struct Teardown {
    read_handle: JoinHandle<ReadExit>,
    dispatcher: JoinHandle<()>,
    tracker: TaskTracker,
    session: Arc<ExchangeSession>,
    transport: Arc<StdioTransport>,
    state: Arc<watch::Sender<EndpointState>>,
    drain_timeout: std::time::Duration,
}

async fn supervise(teardown: Teardown) {
    let Teardown {
        read_handle,
        dispatcher,
        tracker,
        session,
        transport,
        state,
        drain_timeout,
    } = teardown;

    match read_handle.await {
        Ok(exit) => info!(reason = ?exit, "stdio endpoint draining"),
        Err(err) => warn!(%err, "stdio read task failed, draining"),
    }
    state.send_replace(EndpointState::Draining);

    session.close(false).await;

    if let Err(err) = dispatcher.await {
        warn!(%err, "dispatcher task failed");
    }
    tracker.close();
    if tokio::time::timeout(drain_timeout, tracker.wait()).await.is_err() {
        warn!(
            pending = tracker.len(),
            "message tasks still running after drain timeout"
        );
    }

    if tokio::time::timeout(drain_timeout, transport.close()).await.is_err() {
        warn!("write half did not shut down within drain timeout");
    }

    state.send_replace(EndpointState::Closed);
    info!("stdio endpoint closed");
}
