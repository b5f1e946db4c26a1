//! Redundancy-aware routing and control messages on the wire

use std::sync::Arc;

use crate::test_utils::*;
use dcf_client::{ControlCommand, DcfClient};
use dcf_core::{DcfError, Mode};
use dcf_mesh::FixedRtt;

fn fixed_rtt() -> Arc<FixedRtt> {
    Arc::new(FixedRtt::new([("A", 80), ("B", 30), ("C", 200)]))
}

async fn routing_client(port: u16, mode: Mode) -> DcfClient {
    let mut config = node_config("self", port, mode, &["A", "B", "C"]);
    config.rtt_threshold = 50;
    let mut client = DcfClient::default().with_rtt_policy(fixed_rtt());
    client.initialize(config).await.unwrap();
    client.start().await.unwrap();
    client
}

#[tokio::test]
async fn test_p2p_send_is_relayed_to_fastest_other_peer() {
    let relay = TestRelay::start("relay").await;
    let mut sender = routing_client(relay.port, Mode::P2P).await;
    let mut hop = running_client(node_config("B", relay.port, Mode::Client, &[])).await;

    let report = sender.group_peers().await.unwrap();
    assert!(report.is_complete());
    let groups: Vec<_> = sender
        .peers()
        .unwrap()
        .into_iter()
        .map(|p| (p.id, p.rtt_ms, p.group.as_str()))
        .collect();
    assert_eq!(
        groups,
        vec![
            ("A".to_string(), Some(80), "remote"),
            ("B".to_string(), Some(30), "local"),
            ("C".to_string(), Some(200), "remote"),
        ]
    );

    let outcome = sender.send_message(b"payload", "A").await.unwrap();
    assert_eq!(outcome.next_hop, "B");
    assert_eq!(outcome.reply.unwrap().sender, "A");

    let received = hop.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(received.envelope.recipient, "A");
    assert_eq!(received.envelope.redundancy_path.as_deref(), Some("B"));
    assert_eq!(received.envelope.group_id.as_deref(), Some("local"));
    assert_eq!(received.text(), "payload");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_p2p_without_route_fails_and_heal_restores_it() {
    let relay = TestRelay::start("relay").await;
    let mut sender = routing_client(relay.port, Mode::P2P).await;
    sender.group_peers().await.unwrap();

    sender.simulate_failure("B").unwrap();
    sender.simulate_failure("C").unwrap();
    assert!(matches!(
        sender.send_message(b"x", "A").await,
        Err(DcfError::RouteNotFound { .. })
    ));

    let report = sender.heal("B").await.unwrap();
    assert_eq!(report.measured.len(), 3);
    let outcome = sender.send_message_with(b"x", "A", false).await.unwrap();
    assert_eq!(outcome.next_hop, "B");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_auto_receiver_applies_control_messages() {
    let relay = TestRelay::start("relay").await;
    let mut controller =
        running_client(node_config("controller", relay.port, Mode::Client, &[])).await;
    let mut node = running_client(node_config("node", relay.port, Mode::Auto, &[])).await;

    controller
        .send_message_with(
            br#"{"command":"update_config","key":"rtt_threshold","value":120}"#,
            "node",
            false,
        )
        .await
        .unwrap();
    let received = node.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert!(matches!(
        received.control,
        Some(ControlCommand::UpdateConfig { .. })
    ));
    assert_eq!(node.config().unwrap().rtt_threshold(), 120);

    controller
        .send_message_with(br#"{"command":"set_role","role":"p2p"}"#, "node", false)
        .await
        .unwrap();
    let received = node.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(
        received.control,
        Some(ControlCommand::SetRole {
            role: "p2p".into()
        })
    );
    assert_eq!(node.mode(), Mode::P2P);

    // Outside auto mode payloads are passed through untouched.
    controller
        .send_message_with(br#"{"command":"set_role","role":"client"}"#, "node", false)
        .await
        .unwrap();
    let received = node.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert!(received.control.is_none());
    assert_eq!(node.mode(), Mode::P2P);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_regrouping_between_queued_control_messages() {
    let relay = TestRelay::start("relay").await;
    let mut controller =
        running_client(node_config("controller", relay.port, Mode::Client, &[])).await;
    let mut node = running_client(node_config("node", relay.port, Mode::Auto, &["A", "B"])).await;

    for payload in [
        &br#"{"command":"update_config","key":"rtt_threshold","value":10000}"#[..],
        b"hello",
        br#"{"command":"set_role","role":"p2p"}"#,
    ] {
        controller
            .send_message_with(payload, "node", false)
            .await
            .unwrap();
    }

    let received = node.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert!(received.control.is_some());
    assert_eq!(node.config().unwrap().rtt_threshold(), 10_000);

    let report = node.group_peers().await.unwrap();
    assert!(report.is_complete());

    let received = node.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert_eq!(received.text(), "hello");
    let received = node.receive_message_within(RECEIVE_TIMEOUT).await.unwrap();
    assert!(received.control.is_some());
    assert_eq!(node.mode(), Mode::P2P);

    relay.shutdown().await;
}
