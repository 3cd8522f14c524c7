//! Connection handles.
//!
//! A [`Connection`] is the write side of one client stream plus its identity
//! and a close signal. The registry owns the handles (`Arc`); handlers only
//! borrow them to write. The read side stays with the session task, which
//! watches [`Connection::closed`] so that removing a connection from anywhere
//! also stops its read loop.

use std::{fmt, io, net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, watch},
};

/// Time allowed to flush a shutdown on close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Unique, never reused identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a connection came from.
///
/// Proxies in front of the relay report the original client through
/// forwarding headers; whatever performed the upgrade fills those in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Transport-level remote address
    pub remote_addr: SocketAddr,
    /// Raw `X-Forwarded-For` value, if any
    pub forwarded_for: Option<String>,
    /// Raw `X-Real-IP` value, if any
    pub real_ip: Option<String>,
}

impl PeerInfo {
    /// Peer known only by its transport address.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self { remote_addr, forwarded_for: None, real_ip: None }
    }

    /// Attach a forwarded-for header value.
    #[must_use]
    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    /// Attach a real-ip header value.
    #[must_use]
    pub fn with_real_ip(mut self, value: impl Into<String>) -> Self {
        self.real_ip = Some(value.into());
        self
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write handle for one client stream.
///
/// Writes are serialized by an internal mutex so concurrent broadcasts,
/// forwards, and heartbeats never interleave partial frames. Every write is
/// bounded by the configured write timeout.
pub struct Connection {
    id: ConnectionId,
    peer: PeerInfo,
    writer: Mutex<BoxedWriter>,
    write_timeout: Duration,
    closed: watch::Sender<bool>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.peer.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap the write half of a stream.
    pub fn new<W>(id: ConnectionId, peer: PeerInfo, writer: W, write_timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self { id, peer, writer: Mutex::new(Box::new(writer)), write_timeout, closed }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer address information.
    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Write one complete frame.
    ///
    /// Fails with `BrokenPipe` once the connection is closed and with
    /// `TimedOut` if the peer stops draining its stream.
    pub async fn send(&self, frame: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"));
        }

        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };

        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// Wakes the session's read loop. The stream is shut down right away if
    /// no write is in flight; otherwise it is dropped with the last handle.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await;
        }
    }

    /// True once [`Connection::close`] has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves when the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
