//! Serialised outbound frame writer.
//!
//! Holds the write half of the stream behind an async mutex so that
//! concurrent [`FrameWriter::send`] calls never interleave bytes: each call
//! encodes one message as a single `\n`-terminated line and flushes it before
//! releasing the lock.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::debug;

use crate::models::message::Message;
use crate::transport::codec::FrameCodec;
use crate::{AppError, Result};

/// Boxed write half accepted by the writer.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Mutex-guarded NDJSON writer.
pub struct FrameWriter {
    sink: Mutex<Option<FramedWrite<BoxedWriter, FrameCodec>>>,
}

impl FrameWriter {
    /// Wrap `output` in a framed writer.
    #[must_use]
    pub fn new(output: BoxedWriter) -> Self {
        Self {
            sink: Mutex::new(Some(FramedWrite::new(output, FrameCodec::new()))),
        }
    }

    /// Encode and flush one message.
    ///
    /// # Errors
    ///
    /// - [`AppError::Write`]`("transport closed")` after [`FrameWriter::close`].
    /// - [`AppError::Write`] if serialisation or the underlying write fails.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let line = message.to_frame()?;

        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(AppError::Write("transport closed".into()));
        };

        sink.send(line).await.map_err(|e| match e {
            AppError::Write(msg) => AppError::Write(msg),
            other => AppError::Write(other.to_string()),
        })
    }

    /// Flush and shut down the write half.  Idempotent.
    pub async fn close(&self) {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return;
        };

        if let Err(e) = SinkExt::close(&mut sink).await {
            debug!(error = %e, "stdio writer: shutdown of write half failed");
        }
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}
