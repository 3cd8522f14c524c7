//! WebSocket transport.
//!
//! Browser clients reach the hub over a WebSocket. The session loop works on
//! byte streams, so each socket is bridged through an in-memory pipe:
//!
//! - inbound message payloads (text or binary) are appended to the stream
//!   as-is, so clients keep terminating every request with `\n` and one
//!   request may span several messages
//! - every outbound frame becomes one text message, delimiter included
//!
//! Forwarding headers from the upgrade request (`X-Forwarded-For`,
//! `X-Real-IP`) are carried into [`PeerInfo`] so the client IP survives a
//! TLS-terminating proxy.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use rtshare_proto::{DEFAULT_CHUNK_SIZE, FrameReader};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    net::TcpStream,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
    },
};

use crate::{
    connection::PeerInfo,
    error::ServerError,
    hub::Hub,
    session::{SessionEnd, serve_connection},
    transport::TcpTransport,
};

const BRIDGE_CAPACITY: usize = 256 * 1024;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Plain WebSocket listener (`ws://`); put a TLS proxy in front for `wss://`.
#[derive(Debug)]
pub struct WsTransport {
    tcp: TcpTransport,
}

impl WsTransport {
    /// Bind the listener.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let tcp = TcpTransport::bind(address).await?;
        tracing::info!("WebSocket upgrades enabled");
        Ok(Self { tcp })
    }

    /// Accept the next TCP stream. The upgrade happens in [`upgrade`] so a
    /// slow handshake never blocks the accept loop.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        self.tcp.accept().await
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.tcp.local_addr()
    }
}

/// Run the server side of the WebSocket handshake on `stream`.
///
/// Returns the socket plus peer information filled from the upgrade
/// request's forwarding headers.
pub async fn upgrade<S>(
    stream: S,
    remote: SocketAddr,
) -> Result<(WebSocketStream<S>, PeerInfo), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut peer = PeerInfo::new(remote);

    let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        peer.forwarded_for = header(request, "x-forwarded-for");
        peer.real_ip = header(request, "x-real-ip");
        tracing::trace!(%remote, path = %request.uri().path(), "websocket upgrade");
        Ok(response)
    };

    let socket = tokio_tungstenite::accept_hdr_async(stream, capture)
        .await
        .map_err(|e| ServerError::Transport(format!("handshake with {remote} failed: {e}")))?;

    Ok((socket, peer))
}

fn header(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Serve an upgraded socket until the session ends.
pub async fn serve_websocket<S>(
    hub: Arc<Hub>,
    socket: WebSocketStream<S>,
    peer: PeerInfo,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let remote = peer.remote_addr;
    let (sink, source) = socket.split();

    let (hub_side, bridge_side) = tokio::io::duplex(BRIDGE_CAPACITY);
    let (hub_read, hub_write) = tokio::io::split(hub_side);
    let (bridge_read, bridge_write) = tokio::io::split(bridge_side);

    let inbound = tokio::spawn(pump_inbound(source, bridge_write));
    let outbound = tokio::spawn(pump_outbound(bridge_read, sink));

    let end = serve_connection(hub, hub_read, hub_write, peer).await;

    inbound.abort();
    match tokio::time::timeout(CLOSE_TIMEOUT, outbound).await {
        Ok(Ok(Ok(()))) => {},
        Ok(Ok(Err(e))) => tracing::debug!(%remote, error = %e, "websocket close failed"),
        Ok(Err(e)) => tracing::warn!(%remote, error = %e, "websocket writer task failed"),
        Err(_) => tracing::warn!(%remote, "websocket writer did not finish"),
    }

    end
}

type WsSource<S> = futures::stream::SplitStream<WebSocketStream<S>>;
type WsSink<S> = futures::stream::SplitSink<WebSocketStream<S>, Message>;

async fn pump_inbound<S, W>(mut source: WsSource<S>, mut pipe: WriteHalf<W>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncRead + AsyncWrite,
{
    while let Some(message) = source.next().await {
        match message.map_err(io::Error::other)? {
            Message::Text(text) => pipe.write_all(text.as_bytes()).await?,
            Message::Binary(data) => pipe.write_all(&data).await?,
            Message::Close(_) => break,
            // Pings are answered by tungstenite itself
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {},
        }
    }
    pipe.shutdown().await
}

async fn pump_outbound<S, R>(pipe: ReadHalf<R>, mut sink: WsSink<S>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite,
{
    // Frames come from the hub's own encoder, so no length cap
    let mut frames = FrameReader::with_limits(pipe, usize::MAX, DEFAULT_CHUNK_SIZE);

    while let Some(frame) = frames.next_frame().await.map_err(io::Error::other)? {
        let mut text = String::from_utf8_lossy(&frame).into_owned();
        text.push('\n');
        sink.send(Message::text(text)).await.map_err(io::Error::other)?;
    }

    sink.close().await.map_err(io::Error::other)
}
