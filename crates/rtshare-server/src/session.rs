//! Per-connection read loop.
//!
//! A session owns the read half of one client stream. It pulls frames,
//! decodes them, hands them to the router, and writes the reply. Whatever
//! ends the loop, the connection is removed from the hub on the way out.

use std::sync::Arc;

use rtshare_proto::{FrameReader, ProtocolError, Request};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    connection::{Connection, PeerInfo},
    error::HubError,
    hub::Hub,
    router,
};

/// Why a session stopped.
#[derive(Debug, Error)]
pub enum SessionEnd {
    /// Connection was closed from the hub side (removal, leave, eviction).
    #[error("connection closed")]
    Closed,

    /// Peer closed its stream.
    #[error("peer disconnected")]
    Disconnected,

    /// Peer stayed silent past the idle timeout.
    #[error("idle timeout")]
    IdleTimeout,

    /// Stream read failed.
    #[error("read failed: {0}")]
    ReadError(std::io::Error),

    /// Peer violated framing (oversize frame).
    #[error("protocol violation: {0}")]
    Protocol(ProtocolError),

    /// Writing the direct reply failed.
    #[error("reply failed: {0}")]
    ReplyFailed(HubError),

    /// Hub refused to register the connection.
    #[error("registration rejected: {0}")]
    Rejected(HubError),
}

impl From<ProtocolError> for SessionEnd {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::IdleTimeout(_) => Self::IdleTimeout,
            ProtocolError::Io(e) => Self::ReadError(e),
            other => Self::Protocol(other),
        }
    }
}

/// Register a stream with the hub and serve it until it ends.
pub async fn serve_connection<R, W>(
    hub: Arc<Hub>,
    reader: R,
    writer: W,
    peer: PeerInfo,
) -> SessionEnd
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let conn = match hub.open(peer, writer).await {
        Ok(conn) => conn,
        Err(e) => return SessionEnd::Rejected(e),
    };

    run_session(hub, conn, reader).await
}

/// Serve an already registered connection.
///
/// Always removes the connection before returning.
pub async fn run_session<R>(hub: Arc<Hub>, conn: Arc<Connection>, reader: R) -> SessionEnd
where
    R: AsyncRead + Unpin + Send,
{
    let id = conn.id();
    tracing::info!(conn = %id, remote = %conn.peer().remote_addr, "session started");

    let end = read_loop(&hub, &conn, reader).await;

    match &end {
        SessionEnd::Closed | SessionEnd::Disconnected => {
            tracing::info!(conn = %id, reason = %end, "session ended");
        },
        _ => tracing::warn!(conn = %id, reason = %end, "session ended"),
    }

    hub.remove_connection(id).await;
    end
}

async fn read_loop<R>(hub: &Hub, conn: &Arc<Connection>, reader: R) -> SessionEnd
where
    R: AsyncRead + Unpin + Send,
{
    let config = hub.config();
    let mut frames = FrameReader::with_limits(reader, config.max_frame_len, config.read_chunk_size)
        .idle_timeout(config.idle_timeout);

    loop {
        let next = tokio::select! {
            () = conn.closed() => return SessionEnd::Closed,
            next = frames.next_frame() => next,
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => return SessionEnd::Disconnected,
            Err(e) => return e.into(),
        };

        if frame.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let request = match Request::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(
                    conn = %conn.id(),
                    error = %e,
                    len = frame.len(),
                    "skipping malformed frame"
                );
                continue;
            },
        };

        let reply = router::dispatch(hub, &request, conn).await;

        if let Err(e) = hub.reply(conn, &reply.response).await {
            return SessionEnd::ReplyFailed(e);
        }
        if reply.close {
            conn.close().await;
            return SessionEnd::Closed;
        }
    }
}
