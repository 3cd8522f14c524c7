//! The relay over turmoil's simulated network.
//!
//! [`run_sim_server`] is the production accept loop with turmoil's TCP in
//! place of tokio's. Each accepted stream goes through the real
//! [`serve_connection`], so the hub, router, and session loop are exactly
//! what ships.

use std::{sync::Arc, time::Duration};

use rtshare_proto::{FrameReader, MessageKind, Request, Response, Status};
use rtshare_server::{Hub, HubConfig, PeerInfo, serve_connection, spawn_heartbeat};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use turmoil::net::{TcpListener, TcpStream};

use crate::{HarnessError, peer::RECV_TIMEOUT};

/// Serve the relay on `address` inside a turmoil host. Runs until the
/// simulation ends.
pub async fn run_sim_server(address: &str, config: HubConfig) -> turmoil::Result {
    let listener = TcpListener::bind(address).await?;
    let hub = Arc::new(Hub::new(config));
    let _heartbeat = spawn_heartbeat(Arc::clone(&hub));

    tracing::info!(address, "sim server listening");

    loop {
        let (stream, remote) = listener.accept().await?;
        let hub = Arc::clone(&hub);

        tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(stream);
            let end = serve_connection(hub, reader, writer, PeerInfo::new(remote)).await;
            tracing::debug!(%remote, reason = %end, "sim connection finished");
        });
    }
}

/// A relay client on a turmoil host.
pub struct SimClient {
    writer: WriteHalf<TcpStream>,
    frames: FrameReader<ReadHalf<TcpStream>>,
}

impl SimClient {
    /// Connect to a relay at `address` (e.g. `"relay:3000"`).
    pub async fn connect(address: &str) -> Result<Self, HarnessError> {
        let stream = TcpStream::connect(address).await?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Self { writer, frames: FrameReader::new(reader) })
    }

    /// Send a request.
    pub async fn send(&mut self, request: &Request) -> Result<(), HarnessError> {
        let frame = request.encode()?;
        self.writer.write_all(&frame).await?;
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
        }
    }

    /// Send a request and wait for the direct reply to it.
    ///
    /// Broadcasts and forwards that arrive first are skipped. An accepted
    /// file offer comes back as the stored `dataSend` frame.
    pub async fn request(&mut self, request: &Request) -> Result<Response, HarnessError> {
        self.send(request).await?;
        let accepting = request.message_kind() == Some(MessageKind::AcceptFile);
        loop {
            let response = self.recv().await?;
            let direct = response.kind == request.kind
                && matches!(response.status, Status::Ok | Status::Error);
            if direct || (accepting && response.status == Status::DataSend) {
                return Ok(response);
            }
        }
    }

    /// Join as `user_id` and return the reply.
    pub async fn join(&mut self, user_id: &str) -> Result<Response, HarnessError> {
        self.request(&Request::new(MessageKind::Join, user_id)).await
    }
}
