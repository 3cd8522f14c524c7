//! Relay behavior through real sessions.
//!
//! Each test connects in-memory peers to a hub and drives it through the
//! wire protocol, checking both direct replies and what other peers observe.

use std::{sync::Arc, time::Duration};

use rtshare_harness::TestPeer;
use rtshare_proto::{MessageKind, Request, Status};
use rtshare_server::{Hub, HubConfig, SessionEnd};

const QUIET: Duration = Duration::from_millis(100);

fn hub() -> Arc<Hub> {
    Arc::new(Hub::new(HubConfig::default()))
}

/// Connect `users` in order, draining the presence broadcasts each join
/// produces so every peer starts with an empty inbox.
async fn joined(hub: &Arc<Hub>, users: &[&str]) -> Vec<TestPeer> {
    let mut peers: Vec<TestPeer> = Vec::new();
    for user in users {
        let mut peer = TestPeer::connect(hub).await.unwrap();
        let reply = peer.join(user).await.unwrap();
        assert_eq!(reply.status, Status::Ok, "join {user}");

        for earlier in &mut peers {
            let seen = earlier.recv_status(Status::UserJoin).await.unwrap();
            assert_eq!(seen.data, *user);
        }
        peers.push(peer);
    }
    peers
}

#[tokio::test]
async fn join_replies_with_ids_and_announces_to_others() {
    let hub = hub();
    let mut observer = TestPeer::connect(&hub).await.unwrap();
    let mut alice = TestPeer::connect(&hub).await.unwrap();

    let reply = alice.join("alice").await.unwrap();
    assert_eq!(reply.kind, "join");
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.data, r#"["alice"]"#);

    let broadcast = observer.recv().await.unwrap();
    assert_eq!(broadcast.kind, "join");
    assert_eq!(broadcast.status, Status::UserJoin);
    assert_eq!(broadcast.data, "alice");

    alice.expect_silence(QUIET).await.unwrap();
}

#[tokio::test]
async fn offer_is_forwarded_with_sender() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;
    let (alice, rest) = peers.split_first_mut().unwrap();
    let bob = &mut rest[0];

    let offer = Request::new(MessageKind::Offer, "bob").with_text("<sdp>");
    let reply = alice.request(&offer).await.unwrap();
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.message, "forwarded");

    let forwarded = bob.recv().await.unwrap();
    assert_eq!(forwarded.kind, "offer");
    assert_eq!(forwarded.status, Status::Forward);
    assert_eq!(forwarded.data, "<sdp>");
    assert_eq!(forwarded.sender, "alice");
}

#[tokio::test]
async fn signaling_kinds_and_text_all_forward() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;
    let (alice, rest) = peers.split_first_mut().unwrap();
    let bob = &mut rest[0];

    for kind in [MessageKind::Answer, MessageKind::Candidate, MessageKind::SendText] {
        let reply = alice.request(&Request::new(kind, "bob").with_text("body")).await.unwrap();
        assert_eq!(reply.status, Status::Ok, "{kind}");

        let forwarded = bob.recv().await.unwrap();
        assert_eq!(forwarded.kind, kind.as_str());
        assert_eq!(forwarded.data, "body");
    }
}

#[tokio::test]
async fn forward_from_unjoined_connection_has_empty_sender() {
    let hub = hub();
    let mut peers = joined(&hub, &["bob"]).await;
    let mut anon = TestPeer::connect(&hub).await.unwrap();

    let reply = anon.request(&Request::new(MessageKind::SendText, "bob").with_text("hi")).await;
    assert_eq!(reply.unwrap().status, Status::Ok);

    let forwarded = peers[0].recv().await.unwrap();
    assert_eq!(forwarded.sender, "");
}

#[tokio::test]
async fn send_file_without_permission_asks_receiver() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;
    let (alice, rest) = peers.split_first_mut().unwrap();
    let bob = &mut rest[0];

    let send = Request::new(MessageKind::SendFile, "bob").with_file("x.txt", b"payload".to_vec());
    let reply = alice.request(&send).await.unwrap();
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.message, "File request sent");

    let notice = bob.recv().await.unwrap();
    assert_eq!(notice.kind, "sendFile");
    assert_eq!(notice.status, Status::RequestSendFile);
    assert_eq!(notice.filename, "x.txt");
    assert_eq!(notice.data, "alice");
    assert!(notice.bytes.is_empty());
    assert_eq!(hub.pending_transfers().await, 1);
}

#[tokio::test]
async fn accept_delivers_stored_offer_and_grants_permission() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;
    let (alice, rest) = peers.split_first_mut().unwrap();
    let bob = &mut rest[0];

    let send = Request::new(MessageKind::SendFile, "bob").with_file("x.txt", b"payload".to_vec());
    alice.request(&send).await.unwrap();
    bob.recv_status(Status::RequestSendFile).await.unwrap();

    let file = bob.request(&Request::new(MessageKind::AcceptFile, "alice")).await.unwrap();
    assert_eq!(file.kind, "sendFile");
    assert_eq!(file.status, Status::DataSend);
    assert_eq!(file.filename, "x.txt");
    assert_eq!(file.bytes, b"payload");
    assert_eq!(file.sender, "alice");

    // Second file skips the request step
    let again = Request::new(MessageKind::SendFile, "bob").with_file("y.txt", b"more".to_vec());
    let reply = alice.request(&again).await.unwrap();
    assert_eq!(reply.message, "File sent");

    let direct = bob.recv().await.unwrap();
    assert_eq!(direct.status, Status::DataSend);
    assert_eq!(direct.filename, "y.txt");
    assert_eq!(hub.pending_transfers().await, 0);
}

#[tokio::test]
async fn deny_discards_offer_once() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;
    let (alice, rest) = peers.split_first_mut().unwrap();
    let bob = &mut rest[0];

    let send = Request::new(MessageKind::SendFile, "bob").with_file("x.txt", b"payload".to_vec());
    alice.request(&send).await.unwrap();
    bob.recv_status(Status::RequestSendFile).await.unwrap();

    let reply = bob.request(&Request::new(MessageKind::DenyFile, "alice")).await.unwrap();
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(hub.pending_transfers().await, 0);

    let reply = bob.request(&Request::new(MessageKind::DenyFile, "alice")).await.unwrap();
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.message, "No pending file request");

    let reply = bob.request(&Request::new(MessageKind::AcceptFile, "alice")).await.unwrap();
    assert_eq!(reply.kind, "acceptFile");
    assert_eq!(reply.status, Status::Ok);
    assert!(reply.bytes.is_empty());
}

#[tokio::test]
async fn deny_revokes_standing_permission() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;
    let (alice, rest) = peers.split_first_mut().unwrap();
    let bob = &mut rest[0];

    bob.request(&Request::new(MessageKind::AcceptFile, "alice")).await.unwrap();
    bob.request(&Request::new(MessageKind::DenyFile, "alice")).await.unwrap();

    let send = Request::new(MessageKind::SendFile, "bob").with_file("x.txt", b"payload".to_vec());
    let reply = alice.request(&send).await.unwrap();
    assert_eq!(reply.message, "File request sent");
}

#[tokio::test]
async fn deny_by_any_receiver_clears_offerer_permission() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob", "carol"]).await;

    let reply = peers[2].request(&Request::new(MessageKind::AcceptFile, "alice")).await.unwrap();
    assert_eq!(reply.status, Status::Ok);

    // Bob never accepted anything from alice, but his deny still clears her
    // standing permission with carol
    let reply = peers[1].request(&Request::new(MessageKind::DenyFile, "alice")).await.unwrap();
    assert_eq!(reply.message, "No pending file request");

    let send = Request::new(MessageKind::SendFile, "carol").with_file("x.txt", b"payload".to_vec());
    let reply = peers[0].request(&send).await.unwrap();
    assert_eq!(reply.message, "File request sent");

    let notice = peers[2].recv().await.unwrap();
    assert_eq!(notice.status, Status::RequestSendFile);
    assert_eq!(notice.data, "alice");
}

#[tokio::test]
async fn concurrent_offers_to_one_receiver_stay_separate() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "carol", "bob"]).await;

    for (i, name) in ["a.txt", "c.txt"].into_iter().enumerate() {
        let send = Request::new(MessageKind::SendFile, "bob").with_file(name, name.as_bytes());
        peers[i].request(&send).await.unwrap();
        peers[2].recv_status(Status::RequestSendFile).await.unwrap();
    }
    assert_eq!(hub.pending_transfers().await, 2);

    let reply = peers[2].request(&Request::new(MessageKind::DenyFile, "carol")).await.unwrap();
    assert_eq!(reply.status, Status::Ok);

    let file = peers[2].request(&Request::new(MessageKind::AcceptFile, "alice")).await.unwrap();
    assert_eq!(file.filename, "a.txt");
    assert_eq!(file.sender, "alice");
}

#[tokio::test]
async fn disconnect_broadcasts_user_left() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob", "carol"]).await;
    let carol = peers.pop().unwrap();

    let end = carol.disconnect().await.unwrap();
    assert!(matches!(end, SessionEnd::Disconnected));

    for peer in &mut peers {
        let left = peer.recv().await.unwrap();
        assert_eq!(left.kind, "leave");
        assert_eq!(left.status, Status::UserLeft);
        assert_eq!(left.message, "User carol left");
        assert_eq!(left.data, "carol");
        peer.expect_silence(QUIET).await.unwrap();
    }
    assert_eq!(hub.user_ids().await, vec!["alice", "bob"]);
}

#[tokio::test]
async fn disconnect_drops_pending_offers() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;

    let send = Request::new(MessageKind::SendFile, "bob").with_file("x.txt", b"payload".to_vec());
    peers[0].request(&send).await.unwrap();
    assert_eq!(hub.pending_transfers().await, 1);

    let bob = peers.pop().unwrap();
    bob.disconnect().await.unwrap();
    assert_eq!(hub.pending_transfers().await, 0);
}

#[tokio::test]
async fn leave_announces_once_and_closes() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;
    let mut bob = peers.pop().unwrap();
    let alice = &mut peers[0];

    let bob_id = bob.id();

    let reply = bob.request(&Request::new(MessageKind::Leave, "bob")).await.unwrap();
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.message, "Left");
    assert_eq!(reply.data, r#"["alice"]"#);
    bob.closed().await.unwrap();
    assert!(matches!(bob.disconnect().await.unwrap(), SessionEnd::Closed));

    let left = alice.recv().await.unwrap();
    assert_eq!(left.status, Status::UserLeft);
    assert_eq!(left.data, "bob");
    alice.expect_silence(QUIET).await.unwrap();
    assert!(!hub.is_active(bob_id).await);
}

#[tokio::test]
async fn leave_for_someone_else_changes_nothing() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;

    let reply = peers[1].request(&Request::new(MessageKind::Leave, "alice")).await.unwrap();
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.data, r#"["alice","bob"]"#);

    peers[0].expect_silence(QUIET).await.unwrap();
    assert!(hub.is_active(peers[1].id()).await);
}

#[tokio::test]
async fn last_join_wins() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;
    let mut usurper = TestPeer::connect(&hub).await.unwrap();

    let reply = usurper.join("alice").await.unwrap();
    assert_eq!(reply.data, r#"["alice","bob"]"#);

    // Messages for alice now go to the newer connection
    peers[1].recv_status(Status::UserJoin).await.unwrap();
    let send = Request::new(MessageKind::SendText, "alice").with_text("hi");
    let reply = peers[1].request(&send);
    assert_eq!(reply.await.unwrap().status, Status::Ok);

    let forwarded = usurper.recv().await.unwrap();
    assert_eq!(forwarded.data, "hi");
    assert!(hub.user_for_connection(peers[0].id()).await.is_none());
}

#[tokio::test]
async fn failed_forward_evicts_target() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob", "carol"]).await;
    let bob_id = peers[1].id();
    peers[1].break_writes();

    // The eviction broadcast can reach alice before her reply
    peers[0].send(&Request::new(MessageKind::Offer, "bob")).await.unwrap();
    let reply = peers[0].recv_status(Status::Error).await.unwrap();
    assert_eq!(reply.message, "forward failed");

    let left = peers[2].recv().await.unwrap();
    assert_eq!(left.status, Status::UserLeft);
    assert_eq!(left.data, "bob");
    assert!(!hub.is_active(bob_id).await);
}

#[tokio::test]
async fn broken_member_does_not_block_broadcast() {
    let hub = hub();
    let mut peers = joined(&hub, &["alice", "bob"]).await;
    peers[0].break_writes();

    let mut carol = TestPeer::connect(&hub).await.unwrap();
    carol.join("carol").await.unwrap();

    let seen = peers[1].recv_status(Status::UserJoin).await.unwrap();
    assert_eq!(seen.data, "carol");
    assert!(!hub.is_active(peers[0].id()).await);
}

#[tokio::test]
async fn malformed_and_unknown_frames_keep_session_alive() {
    let hub = hub();
    let mut peer = TestPeer::connect(&hub).await.unwrap();

    peer.send_raw(b"{not json\n\n   \n").await.unwrap();
    peer.send_raw(br#"{"type":"shout","payload":"x"}"#).await.unwrap();
    peer.send_raw(b"\n").await.unwrap();

    let reply = peer.recv().await.unwrap();
    assert_eq!(reply.kind, "shout");
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.message, "Unknown type: shout");

    let reply = peer.join("alice").await.unwrap();
    assert_eq!(reply.status, Status::Ok);
}

#[tokio::test]
async fn null_fields_are_dispatched_as_empty() {
    let hub = hub();
    let mut peer = TestPeer::connect(&hub).await.unwrap();

    peer.send_raw(b"{\"type\":\"join\",\"payload\":null,\"text\":null}\n").await.unwrap();

    let reply = peer.recv().await.unwrap();
    assert_eq!(reply.kind, "join");
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.message, "Missing user id");
}

#[tokio::test]
async fn fragmented_frames_are_reassembled() {
    let hub = hub();
    let mut peer = TestPeer::connect(&hub).await.unwrap();

    let frame = Request::new(MessageKind::Join, "alice").encode().unwrap();
    let (head, tail) = frame.split_at(7);
    peer.send_raw(head).await.unwrap();
    peer.expect_silence(QUIET).await.unwrap();
    peer.send_raw(tail).await.unwrap();

    let reply = peer.recv().await.unwrap();
    assert_eq!(reply.data, r#"["alice"]"#);
}

#[tokio::test]
async fn oversize_frame_closes_connection() {
    let hub = Arc::new(Hub::new(HubConfig { max_frame_len: 64, ..HubConfig::default() }));
    let mut peer = TestPeer::connect(&hub).await.unwrap();

    peer.send_raw(&[b'x'; 256]).await.unwrap();
    peer.closed().await.unwrap();

    let end = peer.disconnect().await.unwrap();
    assert!(matches!(end, SessionEnd::Protocol(_)));
    assert_eq!(hub.connection_count().await, 0);
}

#[tokio::test]
async fn join_reports_forwarded_ip() {
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

    use rtshare_server::PeerInfo;

    let hub = hub();
    let peer = PeerInfo::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9)))
        .with_forwarded_for("203.0.113.9, 10.0.0.1");
    let mut client = TestPeer::connect_with(&hub, peer).await.unwrap();

    let reply = client.join("alice").await.unwrap();
    assert_eq!(reply.ip.as_deref(), Some("203.0.113.9"));
}
