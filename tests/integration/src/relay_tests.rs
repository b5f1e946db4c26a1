//! Message delivery, sync replies and health probes through a live relay

use crate::test_utils::*;
use dcf_client::DcfClient;
use dcf_core::{DcfError, LifecycleState, Mode};
use dcf_transport::Transport;

#[tokio::test]
async fn test_async_message_reaches_recipient_mailbox() {
    let relay = TestRelay::start("relay").await;
    let mut alice = running_client(node_config("alice", relay.port, Mode::Client, &["bob"])).await;
    let mut bob = running_client(node_config("bob", relay.port, Mode::Client, &["alice"])).await;

    let outcome = alice
        .send_message_with(b"hello bob", "bob", false)
        .await
        .unwrap();
    assert!(outcome.reply.is_none());
    assert_eq!(outcome.next_hop, "bob");

    let received = bob.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(received.sender(), "alice");
    assert_eq!(received.envelope.recipient, "bob");
    assert_eq!(received.text(), "hello bob");
    assert_eq!(received.envelope.sequence, outcome.sequence);
    assert!(received.control.is_none());

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    relay.shutdown().await;
}

#[tokio::test]
async fn test_sync_send_returns_echo_from_recipient() {
    let relay = TestRelay::start("relay").await;
    let mut alice = running_client(node_config("alice", relay.port, Mode::Client, &["bob"])).await;
    let mut bob = running_client(node_config("bob", relay.port, Mode::Client, &["alice"])).await;

    let outcome = alice.send_message(b"ping", "bob").await.unwrap();
    let reply = outcome.reply.expect("sync send carries a reply");
    assert_eq!(reply.sender, "bob");
    assert_eq!(reply.recipient, "alice");
    assert_eq!(reply.payload, b"Echo: ping");
    assert_eq!(reply.sequence, outcome.sequence);

    // The message itself still reaches bob.
    let received = bob.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(received.text(), "ping");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_health_check_and_sync_send_keep_queued_messages() {
    let relay = TestRelay::start("relay").await;
    let mut alice = running_client(node_config("alice", relay.port, Mode::Client, &["bob"])).await;
    let mut bob = running_client(node_config("bob", relay.port, Mode::Client, &["alice"])).await;

    for text in ["first", "second", "third"] {
        bob.send_message_with(text.as_bytes(), "alice", false)
            .await
            .unwrap();
    }
    // The first receive pulls every queued message from the relay.
    let received = alice.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(received.text(), "first");

    assert!(alice.health_check("bob").await.unwrap() >= 0);

    let outcome = alice.send_message(b"ping", "bob").await.unwrap();
    let reply = outcome.reply.unwrap();
    assert_eq!(reply.sequence, outcome.sequence);
    assert_eq!(reply.payload, b"Echo: ping");

    for expected in ["second", "third"] {
        let received = alice.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
        assert_eq!(received.text(), expected);
        assert_eq!(received.sender(), "bob");
    }
    let received = bob.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(received.text(), "ping");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_large_messages_are_fetched_separately() {
    let relay = TestRelay::start("relay").await;
    let mut alice = running_client(node_config("alice", relay.port, Mode::Client, &["bob"])).await;
    let mut bob = running_client(node_config("bob", relay.port, Mode::Client, &["alice"])).await;

    let big = vec![b'x'; 3 * 1024 * 1024];
    bob.send_message_with(&big, "alice", false).await.unwrap();
    bob.send_message_with(&big, "alice", false).await.unwrap();

    for _ in 0..2 {
        let received = alice.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
        assert_eq!(received.envelope.payload.len(), big.len());
    }

    relay.shutdown().await;
}

#[tokio::test]
async fn test_message_for_relay_lands_in_its_queue() {
    let mut relay = TestRelay::start("relay").await;
    let mut alice = running_client(node_config("alice", relay.port, Mode::Client, &["relay"])).await;

    alice
        .send_message_with(b"to the relay", "relay", false)
        .await
        .unwrap();

    let frame = tokio::time::timeout(RECEIVE_TIMEOUT, relay.channel.receive())
        .await
        .unwrap()
        .unwrap();
    let envelope = dcf_core::codec::decode_message(&frame).unwrap();
    assert_eq!(envelope.sender, "alice");
    assert_eq!(envelope.payload_text(), "to the relay");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_group_peers_measures_every_peer_through_relay() {
    let relay = TestRelay::start("relay").await;
    let mut config = node_config("alice", relay.port, Mode::Auto, &["bob", "carol"]);
    config.rtt_threshold = 10_000;
    let client = running_client(config).await;

    let report = client.group_peers().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.measured.len(), 2);
    assert_eq!(report.measured[0].peer, "bob");
    assert_eq!(report.measured[1].peer, "carol");

    let rtt = client.health_check("carol").await.unwrap();
    assert!(rtt >= 0);
    let peers = client.peers().unwrap();
    assert!(peers.iter().all(|p| p.rtt_ms.is_some()));
    assert!(peers.iter().all(|p| p.group.as_str() == "local"));

    assert!(matches!(
        client.health_check("mallory").await,
        Err(DcfError::PeerUnknown { .. })
    ));

    relay.shutdown().await;
}

#[tokio::test]
async fn test_server_mode_client_serves_other_nodes() {
    init_test_logging();
    let port = free_port();
    let mut server = running_client(node_config("hub", port, Mode::Server, &[])).await;
    assert_eq!(server.status().transport.as_deref(), Some("grpc"));

    let mut alice = running_client(node_config("alice", port, Mode::Client, &["hub"])).await;
    let reply = alice
        .send_message(b"hi hub", "hub")
        .await
        .unwrap()
        .reply
        .unwrap();
    assert_eq!(reply.sender, "hub");

    let received = server.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(received.sender(), "alice");
    assert_eq!(received.text(), "hi hub");

    server.shutdown().await.unwrap();
    assert_eq!(server.state(), LifecycleState::Uninitialized);
}

#[tokio::test]
async fn test_unreachable_relay_fails_initialize() {
    init_test_logging();
    let port = free_port();
    let mut client = DcfClient::default();

    let err = client
        .initialize(node_config("alice", port, Mode::Client, &[]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "transport_setup_failed");
    assert_eq!(client.state(), LifecycleState::Uninitialized);
}
