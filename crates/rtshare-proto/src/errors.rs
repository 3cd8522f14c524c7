//! Protocol error types.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors raised while framing or (de)serializing messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A frame grew past the configured limit without a delimiter.
    ///
    /// Fatal for the connection: the peer is either broken or trying to
    /// exhaust memory.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLong {
        /// Bytes buffered for the frame so far
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Frame body is not a valid JSON message.
    ///
    /// Not fatal: the frame is skipped and the stream continues.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// No bytes arrived within the idle window.
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    /// Underlying stream failed.
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Returns true if the connection can keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
