//! In-memory test peers.
//!
//! A [`TestPeer`] is one client connected to a hub through a
//! `tokio::io::duplex` pipe. The hub side is served by the real
//! [`run_session`] loop, so everything between the pipe and the registry is
//! production code.

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rtshare_proto::{FrameReader, MessageKind, Request, Response, Status};
use rtshare_server::{ConnectionId, Hub, PeerInfo, SessionEnd, run_session};
use tokio::{
    io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
    task::JoinHandle,
};

use crate::{HarnessError, faults::FaultyWriter};

/// How long [`TestPeer::recv`] waits for a frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

const PIPE_CAPACITY: usize = 1 << 20;

/// A client connected to an in-process hub.
pub struct TestPeer {
    id: ConnectionId,
    writer: WriteHalf<DuplexStream>,
    frames: FrameReader<ReadHalf<DuplexStream>>,
    fault: Arc<AtomicBool>,
    session: JoinHandle<SessionEnd>,
}

impl TestPeer {
    /// Connect from 127.0.0.1.
    pub async fn connect(hub: &Arc<Hub>) -> Result<Self, HarnessError> {
        let peer = PeerInfo::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 40000)));
        Self::connect_with(hub, peer).await
    }

    /// Connect with explicit peer information (forwarding headers, address).
    ///
    /// The connection is registered before this returns, so a broadcast sent
    /// afterwards is guaranteed to reach it.
    pub async fn connect_with(hub: &Arc<Hub>, peer: PeerInfo) -> Result<Self, HarnessError> {
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let (server_read, server_write) = tokio::io::split(server);
        let (server_write, fault) = FaultyWriter::new(server_write);

        let conn = hub.open(peer, server_write).await?;
        let id = conn.id();
        let session = tokio::spawn(run_session(Arc::clone(hub), conn, server_read));

        let (client_read, writer) = tokio::io::split(client);
        Ok(Self { id, writer, frames: FrameReader::new(client_read), fault, session })
    }

    /// Hub-side connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send a request.
    pub async fn send(&mut self, request: &Request) -> Result<(), HarnessError> {
        let frame = request.encode()?;
        self.send_raw(&frame).await
    }

    /// Send raw bytes, delimiters included.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), HarnessError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next frame from the relay, waiting up to [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Result<Response, HarnessError> {
        self.recv_within(RECV_TIMEOUT).await
    }

    /// Next frame from the relay, waiting up to `limit`.
    pub async fn recv_within(&mut self, limit: Duration) -> Result<Response, HarnessError> {
        let frame = tokio::time::timeout(limit, self.frames.next_frame())
            .await
            .map_err(|_| HarnessError::Timeout(limit))??
            .ok_or(HarnessError::Closed)?;
        Ok(Response::decode(&frame)?)
    }

    /// Skip frames until one with `status` arrives.
    pub async fn recv_status(&mut self, status: Status) -> Result<Response, HarnessError> {
        loop {
            let response = self.recv().await?;
            if response.status == status {
                return Ok(response);
            }
            tracing::debug!(?response, "skipping frame");
        }
    }

    /// Send a request and return the next frame.
    ///
    /// Only meaningful when nothing else can arrive in between.
    pub async fn request(&mut self, request: &Request) -> Result<Response, HarnessError> {
        self.send(request).await?;
        self.recv().await
    }

    /// Join as `user_id` and return the reply.
    pub async fn join(&mut self, user_id: &str) -> Result<Response, HarnessError> {
        self.request(&Request::new(MessageKind::Join, user_id)).await
    }

    /// Assert nothing arrives for `window`.
    pub async fn expect_silence(&mut self, window: Duration) -> Result<(), HarnessError> {
        match self.recv_within(window).await {
            Err(HarnessError::Timeout(_)) => Ok(()),
            Ok(response) => Err(HarnessError::Unexpected(Box::new(response))),
            Err(e) => Err(e),
        }
    }

    /// Make every hub-side write to this peer fail from now on.
    pub fn break_writes(&self) {
        self.fault.store(true, Ordering::SeqCst);
    }

    /// Wait for the relay to close the stream.
    pub async fn closed(&mut self) -> Result<(), HarnessError> {
        loop {
            match self.recv().await {
                Err(HarnessError::Closed) => return Ok(()),
                Err(e) => return Err(e),
                Ok(_) => {},
            }
        }
    }

    /// Drop the client side and wait for the hub session to finish.
    pub async fn disconnect(self) -> Result<SessionEnd, HarnessError> {
        let Self { writer, frames, session, .. } = self;
        drop(writer);
        drop(frames);

        session.await.map_err(|e| HarnessError::Io(std::io::Error::other(e)))
    }
}
