//! Command surface against a live relay

use crate::test_utils::*;
use dcf_client::{render_error, Command, CommandInterface, DcfClient};
use dcf_core::Mode;

async fn run(iface: &mut CommandInterface, command: Command) -> dcf_core::DcfResult<serde_json::Value> {
    iface.prepare(&command).await?;
    Ok(iface.execute(command).await?.json)
}

#[tokio::test]
async fn test_commands_render_json_over_relay() {
    let relay = TestRelay::start("relay").await;
    let mut config = node_config("cli", relay.port, Mode::Auto, &["peer-1", "peer-2"]);
    config.timeouts.request_ms = 500;
    let mut iface = CommandInterface::new(DcfClient::default(), config);

    let status = run(&mut iface, Command::Status).await.unwrap();
    assert_eq!(status["running"], false);
    assert_eq!(status["state"], "initialized");
    assert_eq!(status["transport"], "grpc");

    let sent = run(
        &mut iface,
        Command::Send {
            data: "hello".into(),
            recipient: "peer-1".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(sent["message"], "hello");
    assert_eq!(sent["recipient"], "peer-1");
    assert_eq!(sent["reply"], "Echo: hello");

    let grouped = run(&mut iface, Command::GroupPeers).await.unwrap();
    assert_eq!(grouped["status"], "regrouped");

    let bench = run(
        &mut iface,
        Command::Benchmark {
            peer: "peer-2".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(bench["peer"], "peer-2");
    assert!(bench["execution_ms"].as_f64().unwrap() >= 0.0);

    let peers = run(&mut iface, Command::ListPeers).await.unwrap();
    assert_eq!(peers["peers"].as_array().unwrap().len(), 2);
    assert_eq!(peers["peers"][0]["address"], "peer-1");

    let err = run(&mut iface, Command::Receive).await.unwrap_err();
    let rendered: serde_json::Value = serde_json::from_str(&render_error(&err, true)).unwrap();
    assert_eq!(rendered["code"], "timeout");

    let stopped = run(&mut iface, Command::Stop).await.unwrap();
    assert_eq!(stopped["status"], "stopped");

    iface.finish().await.unwrap();
    relay.shutdown().await;
}
