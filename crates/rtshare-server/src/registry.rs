//! Connection registry and user directory.
//!
//! The registry holds every piece of shared relay state: connection liveness,
//! the user ↔ connection bindings (both directions), and the transfer broker.
//! It is plain data with no locking and no I/O; the [`Hub`](crate::Hub)
//! wraps it in a single `RwLock` so all tables change together.
//!
//! Bindings are kept in two maps, user → connection and connection → user.
//! Every mutation updates both, which gives us:
//! - at most one binding per user id (last join wins), and
//! - at most one binding per connection (re-joining under a new id drops the
//!   old one).
//!
//! Only active connections can be bound, so a message racing with removal
//! cannot leave a binding behind for a dead connection.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use crate::{
    connection::{Connection, ConnectionId},
    error::HubError,
    transfer::{PendingTransfer, TransferBroker},
};

/// Liveness record for a registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// Write handle
    pub handle: Arc<Connection>,
    /// Cleared exactly once, on removal
    pub active: bool,
    /// Resolved client IP
    pub remote_ip: String,
}

/// What [`Registry::remove`] took out.
#[derive(Debug)]
pub struct RemovedConnection {
    /// Handle of the removed connection, to be closed by the caller
    pub handle: Arc<Connection>,
    /// User that was bound to it, if any
    pub user_id: Option<String>,
    /// Pending transfers dropped with it
    pub dropped_transfers: usize,
}

/// Side effects of [`Registry::bind`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Binding {
    /// Connection that held this user id before
    pub displaced: Option<ConnectionId>,
    /// Id this connection was bound to before
    pub previous_user: Option<String>,
}

/// Shared relay state.
#[derive(Debug, Default)]
pub struct Registry {
    /// Connection id → liveness record
    connections: HashMap<ConnectionId, ConnectionState>,
    /// User id → connection id
    users: HashMap<String, ConnectionId>,
    /// Connection id → user id (reverse index)
    user_by_connection: HashMap<ConnectionId, String>,
    transfers: TransferBroker,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection as active.
    ///
    /// Fails if the connection is already registered.
    pub fn register(&mut self, handle: Arc<Connection>, remote_ip: String) -> Result<(), HubError> {
        match self.connections.entry(handle.id()) {
            Entry::Occupied(_) => Err(HubError::DuplicateConnection(handle.id())),
            Entry::Vacant(slot) => {
                slot.insert(ConnectionState { handle, active: true, remote_ip });
                Ok(())
            },
        }
    }

    /// Remove a connection and everything that references it.
    ///
    /// Returns `None` if the connection is not registered, which makes
    /// repeated removal a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> Option<RemovedConnection> {
        let state = self.connections.get_mut(&id)?;
        state.active = false;

        let state = self.connections.remove(&id)?;
        let user_id = self.user_by_connection.remove(&id);
        if let Some(user_id) = &user_id {
            self.users.remove(user_id);
        }
        let dropped_transfers = self.transfers.purge_connection(id);

        Some(RemovedConnection { handle: state.handle, user_id, dropped_transfers })
    }

    /// True if the connection is registered and active.
    pub fn is_active(&self, id: ConnectionId) -> bool {
        self.connections.get(&id).is_some_and(|s| s.active)
    }

    /// Handle of an active connection.
    pub fn connection(&self, id: ConnectionId) -> Option<&Arc<Connection>> {
        self.connections.get(&id).filter(|s| s.active).map(|s| &s.handle)
    }

    /// Resolved IP of a registered connection.
    pub fn remote_ip(&self, id: ConnectionId) -> Option<&str> {
        self.connections.get(&id).map(|s| s.remote_ip.as_str())
    }

    /// Snapshot of active connections, optionally skipping one.
    pub fn active_connections(&self, exclude: Option<ConnectionId>) -> Vec<Arc<Connection>> {
        self.connections
            .values()
            .filter(|s| s.active && Some(s.handle.id()) != exclude)
            .map(|s| Arc::clone(&s.handle))
            .collect()
    }

    /// Number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.values().filter(|s| s.active).count()
    }

    /// Bind `user_id` to a connection.
    ///
    /// Last join wins: a previous holder of `user_id` loses its binding but
    /// stays connected. Returns `None` (and changes nothing) if the
    /// connection is not active.
    pub fn bind(&mut self, user_id: &str, id: ConnectionId) -> Option<Binding> {
        if !self.is_active(id) {
            return None;
        }

        let mut binding = Binding::default();

        if let Some(previous) = self.user_by_connection.remove(&id) {
            if previous != user_id {
                self.users.remove(&previous);
                binding.previous_user = Some(previous);
            }
        }

        if let Some(displaced) = self.users.insert(user_id.to_owned(), id) {
            if displaced != id {
                self.user_by_connection.remove(&displaced);
                binding.displaced = Some(displaced);
            }
        }

        self.user_by_connection.insert(id, user_id.to_owned());
        Some(binding)
    }

    /// Release `user_id` if it is bound to this connection.
    pub fn unbind(&mut self, user_id: &str, id: ConnectionId) -> bool {
        if self.users.get(user_id) != Some(&id) {
            return false;
        }

        self.users.remove(user_id);
        self.user_by_connection.remove(&id);
        true
    }

    /// Connection id bound to a user.
    pub fn connection_id_for_user(&self, user_id: &str) -> Option<ConnectionId> {
        self.users.get(user_id).copied()
    }

    /// Handle of the connection bound to a user.
    pub fn connection_for_user(&self, user_id: &str) -> Option<&Arc<Connection>> {
        self.connection_id_for_user(user_id).and_then(|id| self.connection(id))
    }

    /// User bound to a connection.
    pub fn user_for_connection(&self, id: ConnectionId) -> Option<&str> {
        self.user_by_connection.get(&id).map(String::as_str)
    }

    /// Sorted snapshot of bound user ids.
    pub fn user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.users.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Park a file offer if the receiving connection is still active.
    ///
    /// Returns `false` without storing anything otherwise.
    pub fn offer_transfer(&mut self, transfer: PendingTransfer) -> bool {
        if !self.is_active(transfer.sender) || !self.is_active(transfer.receiver) {
            return false;
        }
        self.transfers.offer(transfer);
        true
    }

    /// Transfer broker.
    pub fn transfers(&self) -> &TransferBroker {
        &self.transfers
    }

    /// Mutable transfer broker.
    pub fn transfers_mut(&mut self) -> &mut TransferBroker {
        &mut self.transfers
    }
}
