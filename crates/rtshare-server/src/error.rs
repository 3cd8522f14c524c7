//! Server error types.
//!
//! Two layers:
//! - [`HubError`] for registry and delivery failures inside the hub. These
//!   are handled locally (logged, connection removed) and never reach a
//!   client as-is; routers translate them into protocol replies.
//! - [`ServerError`] for the runtime: configuration, binding, and accepting
//!   connections.

use std::io;

use rtshare_proto::ProtocolError;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors raised by hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// Connection id already registered.
    ///
    /// Ids come from a monotonic counter, so this is a logic bug in the
    /// caller. The new connection is closed and no state changes.
    #[error("connection {0} already registered")]
    DuplicateConnection(ConnectionId),

    /// Writing to a connection failed; it has been removed.
    #[error("send to connection {id} failed: {source}")]
    SendFailed {
        /// Connection that failed
        id: ConnectionId,
        /// Underlying write error
        #[source]
        source: io::Error,
    },

    /// A frame could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors that can occur in the server runtime.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable TLS files, etc.).
    ///
    /// Fatal at startup. Fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (endpoint closed, handshake failure, etc.).
    ///
    /// May be transient (a single failed handshake) or fatal (address in use).
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol error on a connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Listener shut down; no further connections will arrive.
    #[error("listener closed")]
    Closed,

    /// I/O error from the listener.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
