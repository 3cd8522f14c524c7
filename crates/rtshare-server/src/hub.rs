//! The relay hub: shared registry, broadcast fan-out, and removal.
//!
//! All relay state sits behind one `RwLock<Registry>`. Every path that writes
//! to the network first takes what it needs from the registry, releases the
//! lock, and only then performs I/O. Writes that fail remove the failing
//! connection, which in turn may broadcast a `userLeft`; that recursion is
//! why [`Hub::remove_connection`] returns a boxed future.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rtshare_proto::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FRAME_LEN, Response};
use tokio::{
    io::AsyncWrite,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    task::JoinHandle,
};

use crate::{
    connection::{Connection, ConnectionId, PeerInfo},
    error::{HubError, ServerError},
    ip::resolve_remote_ip,
    registry::Registry,
};

/// Hub timing and sizing.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Period between heartbeat pings
    pub heartbeat_interval: Duration,
    /// A connection silent for this long is closed
    pub idle_timeout: Duration,
    /// Upper bound on a single frame write
    pub write_timeout: Duration,
    /// Upper bound on acquiring the lock for removal
    pub removal_timeout: Duration,
    /// Largest accepted inbound frame in bytes
    pub max_frame_len: usize,
    /// Read size for the frame reader
    pub read_chunk_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(4 * 60),
            idle_timeout: Duration::from_secs(5 * 60),
            write_timeout: Duration::from_secs(30),
            removal_timeout: Duration::from_secs(2),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl HubConfig {
    /// Reject values that would stall or spin the hub.
    pub fn validate(&self) -> Result<(), ServerError> {
        let durations = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("idle_timeout", self.idle_timeout),
            ("write_timeout", self.write_timeout),
            ("removal_timeout", self.removal_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ServerError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.max_frame_len == 0 {
            return Err(ServerError::Config("max_frame_len must be non-zero".to_string()));
        }
        if self.read_chunk_size == 0 {
            return Err(ServerError::Config("read_chunk_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Shared relay state and the operations that touch many connections.
#[derive(Debug)]
pub struct Hub {
    config: HubConfig,
    state: RwLock<Registry>,
    next_id: AtomicU64,
}

impl Hub {
    /// Create an empty hub.
    pub fn new(config: HubConfig) -> Self {
        Self { config, state: RwLock::new(Registry::new()), next_id: AtomicU64::new(1) }
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Allocate a fresh connection id. Ids are never reused.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a writer in a new connection and register it.
    pub async fn open<W>(&self, peer: PeerInfo, writer: W) -> Result<Arc<Connection>, HubError>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let conn = Arc::new(Connection::new(
            self.next_connection_id(),
            peer,
            writer,
            self.config.write_timeout,
        ));
        self.add_connection(Arc::clone(&conn)).await?;
        Ok(conn)
    }

    /// Register a connection as active.
    ///
    /// A duplicate id is logged, the new connection is closed, and the
    /// registry is left untouched.
    pub async fn add_connection(&self, conn: Arc<Connection>) -> Result<(), HubError> {
        let remote_ip = resolve_remote_ip(conn.peer()).await;
        let id = conn.id();

        let result = self.state.write().await.register(Arc::clone(&conn), remote_ip.clone());
        match result {
            Ok(()) => {
                tracing::debug!(conn = %id, ip = %remote_ip, "connection registered");
                Ok(())
            },
            Err(e) => {
                tracing::error!(conn = %id, error = %e, "rejecting connection");
                conn.close().await;
                Err(e)
            },
        }
    }

    /// Remove a connection. Idempotent.
    ///
    /// Closes the stream and, if a user was bound to it, broadcasts
    /// `userLeft` to everyone else. Acquiring the lock is bounded by
    /// `removal_timeout`; on expiry removal is abandoned and logged.
    pub fn remove_connection(
        &self,
        id: ConnectionId,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Ok(mut state) =
                tokio::time::timeout(self.config.removal_timeout, self.state.write()).await
            else {
                tracing::error!(
                    conn = %id,
                    timeout = ?self.config.removal_timeout,
                    "timed out acquiring hub lock for removal, probable deadlock"
                );
                return;
            };

            let Some(removed) = state.remove(id) else {
                return;
            };
            drop(state);

            removed.handle.close().await;
            tracing::info!(
                conn = %id,
                user = removed.user_id.as_deref().unwrap_or(""),
                dropped_transfers = removed.dropped_transfers,
                "connection removed"
            );

            if let Some(user_id) = removed.user_id {
                self.broadcast(&Response::user_left(&user_id), None).await;
            }
        })
    }

    /// True if the connection is registered and active.
    pub async fn is_active(&self, id: ConnectionId) -> bool {
        self.state.read().await.is_active(id)
    }

    /// Send a response to every active connection except `exclude`.
    ///
    /// Encoding happens once. Connections whose write fails are removed.
    /// Nothing is reported to the caller.
    pub async fn broadcast(&self, response: &Response, exclude: Option<ConnectionId>) {
        let frame = match response.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind = %response.kind, error = %e, "failed to encode broadcast");
                return;
            },
        };

        let targets = self.state.read().await.active_connections(exclude);

        for conn in targets {
            if !self.is_active(conn.id()).await {
                continue;
            }
            if let Err(e) = conn.send(&frame).await {
                tracing::warn!(conn = %conn.id(), error = %e, "broadcast write failed");
                self.remove_connection(conn.id()).await;
            }
        }
    }

    /// Write a response to one connection.
    ///
    /// On failure the target is removed and the error returned.
    pub async fn deliver(&self, target: &Connection, response: &Response) -> Result<(), HubError> {
        let frame = response.encode()?;
        if let Err(source) = target.send(&frame).await {
            tracing::warn!(conn = %target.id(), error = %source, "delivery failed");
            self.remove_connection(target.id()).await;
            return Err(HubError::SendFailed { id: target.id(), source });
        }
        Ok(())
    }

    /// Write a direct reply. The caller decides what a failure means.
    pub async fn reply(&self, conn: &Connection, response: &Response) -> Result<(), HubError> {
        let frame = response.encode()?;
        conn.send(&frame).await.map_err(|source| HubError::SendFailed { id: conn.id(), source })
    }

    /// Ping every active connection, one task each.
    pub async fn ping_all(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let targets = self.state.read().await.active_connections(None);
        let ping = Response::heartbeat();

        targets
            .into_iter()
            .map(|conn| {
                let hub = Arc::clone(self);
                let ping = ping.clone();
                tokio::spawn(async move {
                    if hub.deliver(&conn, &ping).await.is_err() {
                        tracing::debug!(conn = %conn.id(), "heartbeat evicted connection");
                    }
                })
            })
            .collect()
    }

    /// Sorted snapshot of bound user ids.
    pub async fn user_ids(&self) -> Vec<String> {
        self.state.read().await.user_ids()
    }

    /// Number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connection_count()
    }

    /// Resolved IP of a connection.
    pub async fn remote_ip(&self, id: ConnectionId) -> Option<String> {
        self.state.read().await.remote_ip(id).map(str::to_owned)
    }

    /// User bound to a connection.
    pub async fn user_for_connection(&self, id: ConnectionId) -> Option<String> {
        self.state.read().await.user_for_connection(id).map(str::to_owned)
    }

    /// Number of file offers awaiting a decision.
    pub async fn pending_transfers(&self) -> usize {
        self.state.read().await.transfers().pending_count()
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.state.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.state.write().await
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    use rtshare_proto::{FrameReader, Status};

    use super::*;
    use crate::test_util::BrokenWriter;

    fn peer() -> PeerInfo {
        PeerInfo::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 40000)))
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let hub = Hub::new(HubConfig::default());
        let a = hub.next_connection_id();
        let b = hub.next_connection_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn duplicate_registration_closes_newcomer() {
        let hub = Hub::new(HubConfig::default());
        let conn = hub.open(peer(), tokio::io::sink()).await.unwrap();

        let twin = Arc::new(Connection::new(
            conn.id(),
            peer(),
            tokio::io::sink(),
            Duration::from_secs(1),
        ));
        let err = hub.add_connection(Arc::clone(&twin)).await.unwrap_err();

        assert!(matches!(err, HubError::DuplicateConnection(_)));
        assert!(twin.is_closed());
        assert!(!conn.is_closed());
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let hub = Hub::new(HubConfig::default());
        let conn = hub.open(peer(), tokio::io::sink()).await.unwrap();

        hub.remove_connection(conn.id()).await;
        hub.remove_connection(conn.id()).await;
        hub.remove_connection(ConnectionId::new(999)).await;

        assert!(!hub.is_active(conn.id()).await);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_and_evicts_broken() {
        let hub = Hub::new(HubConfig::default());

        let (client, server) = tokio::io::duplex(4096);
        let listener = hub.open(peer(), server).await.unwrap();
        let excluded = hub.open(peer(), tokio::io::sink()).await.unwrap();
        let broken = hub.open(peer(), BrokenWriter).await.unwrap();

        hub.broadcast(&Response::ok("test").with_message("hello"), Some(excluded.id())).await;

        assert!(hub.is_active(listener.id()).await);
        assert!(hub.is_active(excluded.id()).await);
        assert!(!hub.is_active(broken.id()).await);

        let mut reader = FrameReader::new(client);
        let frame = reader.next_frame().await.unwrap().unwrap();
        let response = Response::decode(&frame).unwrap();
        assert_eq!(response.message, "hello");
    }

    #[tokio::test]
    async fn removing_bound_connection_broadcasts_user_left() {
        let hub = Hub::new(HubConfig::default());

        let (client, server) = tokio::io::duplex(4096);
        let watcher = hub.open(peer(), server).await.unwrap();
        let leaver = hub.open(peer(), tokio::io::sink()).await.unwrap();
        hub.write().await.bind("alice", leaver.id()).unwrap();

        hub.remove_connection(leaver.id()).await;

        let mut reader = FrameReader::new(client);
        let frame = reader.next_frame().await.unwrap().unwrap();
        let response = Response::decode(&frame).unwrap();
        assert_eq!(response.status, Status::UserLeft);
        assert_eq!(response.data, "alice");
        assert!(hub.is_active(watcher.id()).await);
        assert!(hub.user_ids().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn removal_gives_up_when_lock_is_held() {
        let hub = Hub::new(HubConfig::default());
        let conn = hub.open(peer(), tokio::io::sink()).await.unwrap();

        let guard = hub.read().await;
        hub.remove_connection(conn.id()).await;
        drop(guard);

        assert!(hub.is_active(conn.id()).await);
    }

    #[tokio::test]
    async fn ping_all_evicts_broken() {
        let hub = Arc::new(Hub::new(HubConfig::default()));
        let healthy = hub.open(peer(), tokio::io::sink()).await.unwrap();
        let broken = hub.open(peer(), BrokenWriter).await.unwrap();

        for task in hub.ping_all().await {
            task.await.unwrap();
        }

        assert!(hub.is_active(healthy.id()).await);
        assert!(!hub.is_active(broken.id()).await);
    }

    #[test]
    fn config_rejects_zero_values() {
        assert!(HubConfig::default().validate().is_ok());

        let config = HubConfig { idle_timeout: Duration::ZERO, ..HubConfig::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));

        let config = HubConfig { max_frame_len: 0, ..HubConfig::default() };
        assert!(config.validate().is_err());
    }
}
