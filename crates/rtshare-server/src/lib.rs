//! rt-share relay server.
//!
//! Clients connect over a persistent duplex stream, claim an identifier with
//! `join`, and then exchange WebRTC signaling, short text, and consent-gated
//! files with other connected clients. Clients never talk to each other
//! directly: the hub relays every frame and tracks liveness.
//!
//! # Architecture
//!
//! All shared state (connections, user bindings, pending transfers) lives in
//! one [`Registry`] behind the [`Hub`]'s `RwLock`. Each connection is served
//! by its own task running [`run_session`]; the heartbeat runs in another.
//! No task holds the lock while writing to the network.
//!
//! # Components
//!
//! - [`Hub`]: registry, broadcast fan-out, removal, heartbeat pings
//! - [`Registry`]: connection liveness and the user directory
//! - [`TransferBroker`]: pending file offers and standing permissions
//! - [`dispatch`]: per-request handlers
//! - [`Server`]: accept loop over [`WsTransport`], [`TcpTransport`] or
//!   [`QuinnTransport`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod heartbeat;
mod hub;
mod ip;
mod registry;
mod router;
mod session;
mod transfer;
mod transport;
mod websocket;

use std::{net::SocketAddr, sync::Arc};

pub use connection::{Connection, ConnectionId, PeerInfo};
pub use error::{HubError, ServerError};
pub use heartbeat::{run_heartbeat, spawn_heartbeat};
pub use hub::{Hub, HubConfig};
pub use ip::{parse_ip, resolve_remote_ip};
pub use registry::{Binding, ConnectionState, Registry, RemovedConnection};
pub use router::{Reply, dispatch};
pub use session::{SessionEnd, run_session, serve_connection};
pub use transfer::{PendingTransfer, TransferBroker};
pub use transport::{QuinnConnection, QuinnTransport, TcpTransport};
pub use websocket::{WsTransport, serve_websocket, upgrade};

/// Which transport the server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TransportKind {
    /// WebSocket carrying newline-delimited JSON
    #[default]
    #[value(name = "ws")]
    WebSocket,
    /// Plain TCP
    Tcp,
    /// QUIC with TLS 1.3
    Quic,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Transport to listen on
    pub transport: TransportKind,
    /// Address to bind to (e.g., "0.0.0.0:3000")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format, QUIC only)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format, QUIC only)
    pub key_path: Option<String>,
    /// Hub configuration (timeouts, limits)
    pub hub: HubConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::WebSocket,
            bind_address: "0.0.0.0:3000".to_string(),
            cert_path: None,
            key_path: None,
            hub: HubConfig::default(),
        }
    }
}

enum Listener {
    Ws(WsTransport),
    Tcp(TcpTransport),
    Quic(QuinnTransport),
}

/// Production rt-share server.
pub struct Server {
    hub: Arc<Hub>,
    listener: Listener,
}

impl Server {
    /// Validate the configuration and bind the listener.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        config.hub.validate()?;

        let listener = match config.transport {
            TransportKind::WebSocket => {
                Listener::Ws(WsTransport::bind(&config.bind_address).await?)
            },
            TransportKind::Tcp => Listener::Tcp(TcpTransport::bind(&config.bind_address).await?),
            TransportKind::Quic => Listener::Quic(QuinnTransport::bind(
                &config.bind_address,
                config.cert_path.as_deref(),
                config.key_path.as_deref(),
            )?),
        };

        Ok(Self { hub: Arc::new(Hub::new(config.hub)), listener })
    }

    /// The hub shared by every connection.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        match &self.listener {
            Listener::Ws(transport) => transport.local_addr(),
            Listener::Tcp(transport) => transport.local_addr(),
            Listener::Quic(transport) => transport.local_addr(),
        }
    }

    /// Run the server, accepting connections until the listener fails.
    ///
    /// Failed accepts and handshakes are logged and skipped.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.local_addr()?);

        let heartbeat = spawn_heartbeat(Arc::clone(&self.hub));

        let result = match &self.listener {
            Listener::Ws(transport) => accept_ws(transport, &self.hub).await,
            Listener::Tcp(transport) => accept_tcp(transport, &self.hub).await,
            Listener::Quic(transport) => accept_quic(transport, &self.hub).await,
        };

        heartbeat.abort();
        result
    }
}

async fn accept_ws(transport: &WsTransport, hub: &Arc<Hub>) -> Result<(), ServerError> {
    loop {
        match transport.accept().await {
            Ok((stream, remote)) => {
                let hub = Arc::clone(hub);
                tokio::spawn(async move {
                    let (socket, peer) = match upgrade(stream, remote).await {
                        Ok(upgraded) => upgraded,
                        Err(e) => {
                            tracing::debug!(%remote, error = %e, "websocket upgrade failed");
                            return;
                        },
                    };

                    let end = serve_websocket(hub, socket, peer).await;
                    tracing::debug!(%remote, reason = %end, "WebSocket connection finished");
                });
            },
            Err(e) => {
                tracing::error!("Accept error: {}", e);
            },
        }
    }
}

async fn accept_tcp(transport: &TcpTransport, hub: &Arc<Hub>) -> Result<(), ServerError> {
    loop {
        match transport.accept().await {
            Ok((stream, remote)) => {
                let hub = Arc::clone(hub);
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    let end = serve_connection(hub, reader, writer, PeerInfo::new(remote)).await;
                    tracing::debug!(%remote, reason = %end, "TCP connection finished");
                });
            },
            Err(e) => {
                tracing::error!("Accept error: {}", e);
            },
        }
    }
}

async fn accept_quic(transport: &QuinnTransport, hub: &Arc<Hub>) -> Result<(), ServerError> {
    loop {
        match transport.accept().await {
            Ok(conn) => {
                let hub = Arc::clone(hub);
                tokio::spawn(async move {
                    let remote = conn.remote_addr();
                    let (send, recv) = match conn.accept_bi().await {
                        Ok(streams) => streams,
                        Err(e) => {
                            tracing::debug!(%remote, error = %e, "no session stream");
                            return;
                        },
                    };

                    let end = serve_connection(hub, recv, send, PeerInfo::new(remote)).await;
                    tracing::debug!(%remote, reason = %end, "QUIC connection finished");
                    conn.close(0u32.into(), b"session ended");
                });
            },
            Err(ServerError::Closed) => {
                tracing::info!("QUIC endpoint closed");
                return Ok(());
            },
            Err(e) => {
                tracing::error!("Accept error: {}", e);
            },
        }
    }
}
