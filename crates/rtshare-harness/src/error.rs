//! Harness errors.

use std::{io, time::Duration};

use rtshare_proto::{ProtocolError, Response};
use rtshare_server::HubError;
use thiserror::Error;

/// Errors surfaced by test peers.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Stream I/O failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Frame could not be read or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Hub refused the connection.
    #[error("hub error: {0}")]
    Hub(#[from] HubError),

    /// Nothing arrived in time.
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    /// The relay closed the stream.
    #[error("stream closed by relay")]
    Closed,

    /// A frame arrived when silence was expected.
    #[error("unexpected frame: {0:?}")]
    Unexpected(Box<Response>),
}
