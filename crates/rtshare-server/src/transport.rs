//! Stream transports.
//!
//! Two ways for a client to reach the hub, both yielding one duplex byte
//! stream per client:
//!
//! - [`TcpTransport`]: plain TCP listener, for deployments behind a TLS
//!   terminating proxy and for local development.
//! - [`QuinnTransport`]: QUIC via Quinn with TLS 1.3. The client opens a
//!   single bidirectional stream which carries the whole session. ALPN is
//!   set to `rt-share`.
//!
//! # Security
//!
//! Self-signed certificates (generated when no PEM files are configured) are
//! only suitable for local testing. Production QUIC deployments MUST use
//! certificates from a trusted CA.

use std::{net::SocketAddr, sync::Arc};

use quinn::{Endpoint, RecvStream, SendStream, ServerConfig, crypto::rustls::QuicServerConfig};
use rtshare_proto::ALPN_PROTOCOL;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::net::{TcpListener, TcpStream};

use crate::error::ServerError;

fn parse_address(address: &str) -> Result<SocketAddr, ServerError> {
    address
        .parse()
        .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))
}

/// Plain TCP listener.
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind a TCP listener.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let addr = parse_address(address)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("cannot listen on {addr}: {e}")))?;

        tracing::info!(%addr, "TCP transport bound");

        Ok(Self { listener })
    }

    /// Accept the next client stream.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        let (stream, addr) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(remote = %addr, error = %e, "failed to set TCP_NODELAY");
        }
        Ok((stream, addr))
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

type Identity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// QUIC listener.
///
/// Without PEM files the endpoint presents a freshly generated self-signed
/// certificate for `localhost`.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Bind a QUIC endpoint, using the PEM certificate and key when both
    /// paths are given.
    pub fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, ServerError> {
        let addr = parse_address(address)?;

        let identity = match (cert_path, key_path) {
            (Some(cert), Some(key)) => read_pem_identity(cert, key)?,
            _ => self_signed_identity()?,
        };

        let endpoint = Endpoint::server(quic_server_config(identity)?, addr)
            .map_err(|e| ServerError::Transport(format!("cannot open endpoint on {addr}: {e}")))?;

        tracing::info!(%addr, "QUIC transport bound");

        Ok(Self { endpoint })
    }

    /// Next client whose handshake completed.
    ///
    /// Fails with [`ServerError::Closed`] once the endpoint shuts down; a
    /// failed handshake is a [`ServerError::Transport`].
    pub async fn accept(&self) -> Result<QuinnConnection, ServerError> {
        let incoming = self.endpoint.accept().await.ok_or(ServerError::Closed)?;
        let remote = incoming.remote_address();

        let connection = incoming
            .await
            .map_err(|e| ServerError::Transport(format!("handshake with {remote} failed: {e}")))?;

        Ok(QuinnConnection { connection })
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.endpoint.local_addr()?)
    }
}

/// A QUIC client connection. Clones share the connection.
#[derive(Clone)]
pub struct QuinnConnection {
    connection: quinn::Connection,
}

impl QuinnConnection {
    /// Wait for the stream that carries the client's session.
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        self.connection
            .accept_bi()
            .await
            .map_err(|e| ServerError::Transport(format!("no session stream: {e}")))
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close with an application error code and reason.
    pub fn close(&self, error_code: quinn::VarInt, reason: &[u8]) {
        self.connection.close(error_code, reason);
    }
}

fn quic_server_config((certs, key): Identity) -> Result<ServerConfig, ServerError> {
    let mut tls = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("rejected TLS identity: {e}")))?;
    tls.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = QuicServerConfig::try_from(tls)
        .map_err(|e| ServerError::Config(format!("TLS config unusable for QUIC: {e}")))?;

    Ok(ServerConfig::with_crypto(Arc::new(crypto)))
}

fn read_pem_identity(cert_path: &str, key_path: &str) -> Result<Identity, ServerError> {
    let read = |path: &str| {
        std::fs::read(path).map_err(|e| ServerError::Config(format!("cannot read '{path}': {e}")))
    };
    let cert_pem = read(cert_path)?;
    let key_pem = read(key_path)?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("bad certificate in '{cert_path}': {e}")))?;
    if certs.is_empty() {
        return Err(ServerError::Config(format!("no certificate in '{cert_path}'")));
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| ServerError::Config(format!("bad private key in '{key_path}': {e}")))?
        .ok_or_else(|| ServerError::Config(format!("no private key in '{key_path}'")))?;

    Ok((certs, key))
}

fn self_signed_identity() -> Result<Identity, ServerError> {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("cannot generate certificate: {e}")))?;

    tracing::warn!("QUIC endpoint is using a self-signed certificate");

    let key = PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der());
    Ok((vec![generated.cert.der().clone()], key.into()))
}
