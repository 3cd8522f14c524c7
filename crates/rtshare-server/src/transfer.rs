//! File-transfer consent broker.
//!
//! A `sendFile` to a receiver who has not yet accepted anything from the
//! sender is parked as a [`PendingTransfer`] until the receiver answers with
//! `acceptFile` or `denyFile`. Accepting also grants a standing permission so
//! later files from the same sender to the same receiver skip the question.
//!
//! Pending transfers are keyed by the (sender, receiver) connection pair.
//! Connection ids are never reused, so a key can only ever match the offer it
//! was created for. Two senders offering files to the same receiver at once
//! get two independent entries.

use std::collections::HashMap;

use rtshare_proto::Response;

use crate::connection::ConnectionId;

/// A file offer waiting for the receiver's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    /// Frame handed to the receiver if they accept
    pub offer: Response,
    /// Offering connection
    pub sender: ConnectionId,
    /// Receiving connection
    pub receiver: ConnectionId,
}

/// Pending offers plus standing sender → receiver permissions.
#[derive(Debug, Default)]
pub struct TransferBroker {
    pending: HashMap<(ConnectionId, ConnectionId), PendingTransfer>,
    /// Sender id → receiver id that accepted a file from them
    permissions: HashMap<String, String>,
}

impl TransferBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an offer. A newer offer for the same pair replaces the older one,
    /// which is returned.
    pub fn offer(&mut self, transfer: PendingTransfer) -> Option<PendingTransfer> {
        self.pending.insert((transfer.sender, transfer.receiver), transfer)
    }

    /// Take the offer for this pair, if any.
    ///
    /// The entry is removed before it is returned, so concurrent accepts for
    /// the same offer see it at most once.
    pub fn accept(
        &mut self,
        sender: ConnectionId,
        receiver: ConnectionId,
    ) -> Option<PendingTransfer> {
        self.pending.remove(&(sender, receiver))
    }

    /// Discard the offer for this pair. Returns whether one existed.
    pub fn deny(&mut self, sender: ConnectionId, receiver: ConnectionId) -> bool {
        self.pending.remove(&(sender, receiver)).is_some()
    }

    /// True if an offer is waiting for this pair.
    pub fn has_pending(&self, sender: ConnectionId, receiver: ConnectionId) -> bool {
        self.pending.contains_key(&(sender, receiver))
    }

    /// Number of waiting offers.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Let `sender_id` deliver files to `receiver_id` without asking.
    ///
    /// A sender holds at most one permission; granting another receiver
    /// replaces it.
    pub fn grant(&mut self, sender_id: &str, receiver_id: &str) {
        self.permissions.insert(sender_id.to_owned(), receiver_id.to_owned());
    }

    /// Withdraw whatever permission `sender_id` holds, whichever receiver
    /// granted it. Returns whether one existed.
    pub fn revoke(&mut self, sender_id: &str) -> bool {
        self.permissions.remove(sender_id).is_some()
    }

    /// True if `sender_id` may deliver straight to `receiver_id`.
    pub fn is_permitted(&self, sender_id: &str, receiver_id: &str) -> bool {
        self.permissions.get(sender_id).is_some_and(|r| r == receiver_id)
    }

    /// Drop every offer made by or to a connection. Returns how many.
    pub fn purge_connection(&mut self, id: ConnectionId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|&(sender, receiver), _| sender != id && receiver != id);
        before - self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use rtshare_proto::Status;

    use super::*;

    const ALICE: ConnectionId = ConnectionId::new(1);
    const BOB: ConnectionId = ConnectionId::new(2);
    const CAROL: ConnectionId = ConnectionId::new(3);

    fn transfer(sender: ConnectionId, receiver: ConnectionId, filename: &str) -> PendingTransfer {
        PendingTransfer {
            offer: Response::new("sendFile", Status::DataSend).with_file(filename, b"data".to_vec()),
            sender,
            receiver,
        }
    }

    #[test]
    fn accept_returns_offer_once() {
        let mut broker = TransferBroker::new();
        broker.offer(transfer(ALICE, BOB, "x.txt"));

        let accepted = broker.accept(ALICE, BOB).unwrap();
        assert_eq!(accepted.offer.filename, "x.txt");
        assert!(broker.accept(ALICE, BOB).is_none());
        assert!(!broker.deny(ALICE, BOB));
    }

    #[test]
    fn deny_consumes_offer() {
        let mut broker = TransferBroker::new();
        broker.offer(transfer(ALICE, BOB, "x.txt"));

        assert!(broker.deny(ALICE, BOB));
        assert!(!broker.deny(ALICE, BOB));
        assert!(broker.accept(ALICE, BOB).is_none());
    }

    #[test]
    fn offers_to_same_receiver_are_independent() {
        let mut broker = TransferBroker::new();
        broker.offer(transfer(ALICE, BOB, "from-alice.txt"));
        broker.offer(transfer(CAROL, BOB, "from-carol.txt"));

        assert_eq!(broker.pending_count(), 2);
        assert!(broker.deny(CAROL, BOB));
        assert_eq!(broker.accept(ALICE, BOB).unwrap().offer.filename, "from-alice.txt");
    }

    #[test]
    fn newer_offer_replaces_older_for_same_pair() {
        let mut broker = TransferBroker::new();
        assert!(broker.offer(transfer(ALICE, BOB, "v1")).is_none());

        let replaced = broker.offer(transfer(ALICE, BOB, "v2")).unwrap();
        assert_eq!(replaced.offer.filename, "v1");
        assert_eq!(broker.pending_count(), 1);
    }

    #[test]
    fn pair_direction_matters() {
        let mut broker = TransferBroker::new();
        broker.offer(transfer(ALICE, BOB, "x.txt"));

        assert!(broker.accept(BOB, ALICE).is_none());
        assert!(broker.has_pending(ALICE, BOB));
    }

    #[test]
    fn permissions_match_sender_and_receiver() {
        let mut broker = TransferBroker::new();
        broker.grant("alice", "bob");

        assert!(broker.is_permitted("alice", "bob"));
        assert!(!broker.is_permitted("alice", "carol"));
        assert!(!broker.is_permitted("bob", "alice"));

        assert!(broker.revoke("alice"));
        assert!(!broker.is_permitted("alice", "bob"));
        assert!(!broker.revoke("alice"));
    }

    #[test]
    fn revoke_clears_permission_granted_by_anyone() {
        let mut broker = TransferBroker::new();
        broker.grant("alice", "carol");
        broker.grant("bob", "carol");

        assert!(broker.revoke("alice"));
        assert!(!broker.is_permitted("alice", "carol"));
        assert!(broker.is_permitted("bob", "carol"));
    }

    #[test]
    fn purge_drops_both_directions() {
        let mut broker = TransferBroker::new();
        broker.offer(transfer(ALICE, BOB, "a"));
        broker.offer(transfer(BOB, CAROL, "b"));
        broker.offer(transfer(CAROL, ALICE, "c"));

        assert_eq!(broker.purge_connection(BOB), 2);
        assert!(broker.has_pending(CAROL, ALICE));
        assert_eq!(broker.pending_count(), 1);
    }
}
