//! Framed duplex transport.
//!
//! Turns a raw byte stream (normally the process's stdin/stdout) into a
//! sequence of [`Message`]s and back, and reports when the connection ends.
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based NDJSON framing.
//! - `reader`: read task that decodes inbound frames.
//! - `writer`: mutex-serialised outbound writer.

pub mod codec;
pub mod reader;
pub mod writer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::message::Message;
use crate::transport::reader::{run_reader, ReadExit};
use crate::transport::writer::{BoxedWriter, FrameWriter};
use crate::{AppError, Result};

/// Boxed read half accepted by the transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// NDJSON transport over one duplex stream.
///
/// Lifecycle:
///
/// 1. [`StdioTransport::new`] takes ownership of both halves.
/// 2. [`StdioTransport::start`] spawns the read task (once).
/// 3. The read task ends on EOF, I/O error, cancellation or
///    [`StdioTransport::close`]; every [`StdioTransport::wait`] caller is
///    then released.
/// 4. [`StdioTransport::close`] shuts the write half down exactly once.
pub struct StdioTransport {
    name: String,
    max_frame_bytes: usize,
    input: Mutex<Option<BoxedReader>>,
    writer: FrameWriter,
    shutdown: CancellationToken,
    terminated: CancellationToken,
    closed: AtomicBool,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("name", &self.name)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("terminated", &self.is_terminated())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Build a transport named `name` over `input` and `output`.
    pub fn new<R, W>(name: impl Into<String>, input: R, output: W, max_frame_bytes: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let input: BoxedReader = Box::new(input);
        let output: BoxedWriter = Box::new(output);
        Self {
            name: name.into(),
            max_frame_bytes,
            input: Mutex::new(Some(input)),
            writer: FrameWriter::new(output),
            shutdown: CancellationToken::new(),
            terminated: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Spawn the read task.
    ///
    /// Each decoded message is delivered once through `inbound_tx`.  The
    /// returned handle resolves to the reason the loop stopped.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Start`] if the transport was already started or
    /// already closed.
    pub fn start(
        &self,
        inbound_tx: mpsc::Sender<Message>,
        cancel: &CancellationToken,
    ) -> Result<JoinHandle<ReadExit>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::Start(format!(
                "transport '{}' is already closed",
                self.name
            )));
        }

        let input = self
            .input
            .lock()
            .map_err(|_| AppError::Start("transport input lock poisoned".into()))?
            .take()
            .ok_or_else(|| {
                AppError::Start(format!("transport '{}' is already started", self.name))
            })?;

        let name = self.name.clone();
        let max_frame_bytes = self.max_frame_bytes;
        let outer = cancel.clone();
        let shutdown = self.shutdown.clone();
        let terminated = self.terminated.clone();

        info!(connection = name.as_str(), "stdio transport started");

        Ok(tokio::spawn(async move {
            // Release waiters even if the read task panics.
            let _terminated = terminated.drop_guard();

            let exit = tokio::select! {
                exit = run_reader(name.clone(), input, max_frame_bytes, inbound_tx, outer) => exit,
                () = shutdown.cancelled() => ReadExit::Cancelled,
            };

            info!(connection = name.as_str(), reason = ?exit, "stdio transport read loop ended");
            exit
        }))
    }

    /// Write one message.
    ///
    /// Concurrent callers are serialised; bytes of two messages never
    /// interleave.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Write`] on I/O failure or after [`StdioTransport::close`].
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.writer.send(message).await
    }

    /// Block until the read loop has terminated.
    ///
    /// Any number of callers may wait concurrently.  On a transport that was
    /// never started this returns once [`StdioTransport::close`] runs.
    pub async fn wait(&self) {
        self.terminated.cancelled().await;
    }

    /// Whether the read loop has terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Stop the read loop and shut the write half down.
    ///
    /// Only the first call has any effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.cancel();

        let never_started = self
            .input
            .lock()
            .map(|mut input| input.take().is_some())
            .unwrap_or(false);
        if never_started {
            self.terminated.cancel();
        }

        self.writer.close().await;
        debug!(connection = self.name.as_str(), "stdio transport closed");
    }

    /// Whether [`StdioTransport::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
