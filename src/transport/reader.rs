//! Stdio reader task.
//!
//! Reads newline-delimited JSON frames from the peer, decodes each into a
//! [`Message`], and forwards it through a tokio [`mpsc`] channel.
//!
//! The reader is driven by [`FramedRead`] backed by [`FrameCodec`], which
//! enforces the per-line limit before any heap allocation for JSON parsing.
//!
//! # Frame handling
//!
//! | Frame                         | Action                         |
//! |-------------------------------|--------------------------------|
//! | valid message                 | forwarded                      |
//! | blank line                    | skipped silently               |
//! | malformed / oversized frame   | logged at `WARN`, skipped      |
//! | non-UTF-8 frame               | logged at `WARN`, skipped      |
//! | EOF                           | loop ends                      |
//! | I/O error                     | logged at `WARN`, loop ends    |

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::models::message::Message;
use crate::transport::codec::{Frame, FrameCodec};
use crate::{AppError, Result};

/// Why the read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadExit {
    /// The peer closed its side of the stream.
    Eof,
    /// The underlying stream failed.
    IoError(String),
    /// The cancellation token fired.
    Cancelled,
    /// Nobody is consuming inbound messages any more.
    ConsumerGone,
}

/// Decode a single frame into a [`Message`].
///
/// # Return value
///
/// - `Ok(Some(message))`: a well-formed message.
/// - `Ok(None)`: the line is empty or whitespace.
///
/// # Errors
///
/// Returns [`AppError::Decode`] if the line is not a valid message.
pub fn parse_frame(line: &str) -> Result<Option<Message>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    Message::from_frame(line).map(Some)
}

/// Stdio reader task: reads frames from `input` and emits [`Message`]s.
///
/// Every decoded message is sent through `inbound_tx` exactly once.  Bad
/// frames are logged and skipped; they do **not** terminate the loop.
///
/// The loop returns when the stream hits EOF or an I/O error, when `cancel`
/// fires, or when `inbound_tx` has no receiver left.
pub async fn run_reader<R>(
    connection: String,
    input: R,
    max_frame_bytes: usize,
    inbound_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) -> ReadExit
where
    R: AsyncRead + Unpin + Send,
{
    let connection = connection.as_str();
    let mut framed = FramedRead::new(input, FrameCodec::with_max_frame_bytes(max_frame_bytes));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(connection, "stdio reader: cancellation received, stopping");
                return ReadExit::Cancelled;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(connection, "stdio reader: EOF detected");
                        return ReadExit::Eof;
                    }

                    Some(Err(e)) => {
                        warn!(connection, error = %e, "stdio reader: IO error, stopping");
                        return ReadExit::IoError(e.to_string());
                    }

                    Some(Ok(Frame::Oversized { limit })) => {
                        warn!(
                            connection,
                            limit,
                            "stdio reader: frame exceeds size limit, skipping"
                        );
                    }

                    Some(Ok(Frame::Invalid { reason })) => {
                        warn!(
                            connection,
                            error = reason.as_str(),
                            "stdio reader: frame is not valid UTF-8, skipping"
                        );
                    }

                    Some(Ok(Frame::Line(line))) => match parse_frame(&line) {
                        Ok(Some(message)) => {
                            trace!(
                                connection,
                                id = ?message.id,
                                method = message.method_name(),
                                "stdio reader: message received"
                            );
                            if inbound_tx.send(message).await.is_err() {
                                debug!(connection, "stdio reader: inbound channel closed, stopping");
                                return ReadExit::ConsumerGone;
                            }
                        }
                        Ok(None) => {}
                        Err(AppError::Decode(reason)) => {
                            warn!(
                                connection,
                                error = reason.as_str(),
                                raw_line = %line,
                                "stdio reader: undecodable frame, skipping"
                            );
                        }
                        Err(e) => {
                            warn!(connection, error = %e, "stdio reader: frame rejected, skipping");
                        }
                    },
                }
            }
        }
    }
}
