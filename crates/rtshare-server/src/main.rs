//! rt-share relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # WebSocket (put a TLS-terminating proxy in front for wss://)
//! rtshare-server --bind 0.0.0.0:3000
//!
//! # Plain TCP, newline-delimited JSON
//! rtshare-server --transport tcp --bind 0.0.0.0:3000
//!
//! # QUIC with TLS certificate
//! rtshare-server --transport quic --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//! ```

use std::time::Duration;

use clap::Parser;
use rtshare_server::{HubConfig, Server, ServerRuntimeConfig, TransportKind};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// rt-share relay server
#[derive(Parser, Debug)]
#[command(name = "rtshare-server")]
#[command(about = "Relay hub for peer discovery, WebRTC signaling and file hand-off")]
#[command(version)]
struct Args {
    /// Transport to listen on
    #[arg(long, value_enum, default_value_t = TransportKind::WebSocket)]
    transport: TransportKind,

    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    bind: String,

    /// Path to TLS certificate (PEM format, QUIC only)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format, QUIC only)
    #[arg(short, long)]
    key: Option<String>,

    /// Seconds between heartbeat pings
    #[arg(long, default_value = "240")]
    heartbeat_secs: u64,

    /// Seconds of silence before a connection is dropped
    #[arg(long, default_value = "300")]
    idle_secs: u64,

    /// Seconds allowed for a single frame write
    #[arg(long, default_value = "30")]
    write_timeout_secs: u64,

    /// Largest accepted inbound frame in bytes
    #[arg(long, default_value = "67108864")]
    max_frame_len: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("rt-share server starting");
    tracing::info!("Binding to {} ({:?})", args.bind, args.transport);

    if args.transport == TransportKind::Quic && (args.cert.is_none() || args.key.is_none()) {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let config = ServerRuntimeConfig {
        transport: args.transport,
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        hub: HubConfig {
            heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
            idle_timeout: Duration::from_secs(args.idle_secs),
            write_timeout: Duration::from_secs(args.write_timeout_secs),
            max_frame_len: args.max_frame_len,
            ..Default::default()
        },
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
