//! NDJSON codec for the stdio stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so an unterminated or oversized frame from the peer cannot exhaust
//! memory.
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).  Both directions use UTF-8
//! lines delimited by `\n`.

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default maximum inbound frame length: 1 MiB.
pub const MAX_FRAME_BYTES: usize = 1_048_576;

/// One decoded unit from the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, without its trailing `\n`.
    Line(String),
    /// A line exceeded the limit and is being discarded up to the next `\n`.
    Oversized {
        /// The limit that was exceeded.
        limit: usize,
    },
    /// A complete line that is not valid UTF-8.  The line has already been
    /// consumed from the buffer.
    Invalid {
        /// Decoder diagnostic.
        reason: String,
    },
}

/// Newline-delimited frame codec.
///
/// # Decoder
///
/// Oversized lines surface as [`Frame::Oversized`] and non-UTF-8 lines as
/// [`Frame::Invalid`] rather than as decoder errors. `FramedRead` pauses the
/// stream after any decoder error, so reporting them in-band keeps the frames
/// behind a bad line flowing.  Only failures of the underlying reader become
/// [`AppError::Io`] and end the stream.
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`.  The length limit is a
/// decoder-side concern and is not enforced during encoding.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LinesCodec,
    max_frame_bytes: usize,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(MAX_FRAME_BYTES)
    }

    /// Create a codec with a custom inbound line limit.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_frame_bytes),
            max_frame_bytes,
        }
    }

    fn map_decoded(
        &self,
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Frame>> {
        match decoded {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized {
                limit: self.max_frame_bytes,
            })),
            Err(LinesCodecError::Io(io_err)) if io_err.kind() == ErrorKind::InvalidData => {
                Ok(Some(Frame::Invalid {
                    reason: io_err.to_string(),
                }))
            }
            Err(LinesCodecError::Io(io_err)) => Err(AppError::Io(io_err.to_string())),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = AppError;

    /// Returns `Ok(None)` while `src` holds no complete line yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.inner.decode(src);
        self.map_decoded(decoded)
    }

    /// Flush a final unterminated line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.inner.decode_eof(src);
        self.map_decoded(decoded)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // LinesCodec::encode does not enforce the max length.
        self.inner.encode(item, dst).map_err(|e| match e {
            LinesCodecError::Io(io_err) => AppError::Write(io_err.to_string()),
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Write("outbound line too long".into())
            }
        })
    }
}
