//! Test utilities for relay integration tests

use std::net::TcpListener;
use std::time::Duration;

use dcf_client::DcfClient;
use dcf_core::{DcfConfig, Mode};
use dcf_transport::{NetworkChannel, Transport};

/// Upper bound for any receive in these tests
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-friendly subscriber once; later calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

/// A relay serving on an ephemeral localhost port
pub struct TestRelay {
    pub channel: NetworkChannel,
    pub port: u16,
}

impl TestRelay {
    /// Start a relay for `node_id`
    pub async fn start(node_id: &str) -> Self {
        init_test_logging();
        let mut channel = NetworkChannel::new(node_id, Mode::Server);
        channel
            .setup("127.0.0.1", 0)
            .await
            .expect("relay setup");
        channel
            .activate(Mode::Server)
            .await
            .expect("relay bind");
        let port = channel.local_addr().expect("relay address").port();
        Self { channel, port }
    }

    /// Stop serving and release the listener
    pub async fn shutdown(mut self) {
        self.channel.teardown().await;
    }
}

/// Configuration for a node talking to the relay on `port`
pub fn node_config(node_id: &str, port: u16, mode: Mode, peers: &[&str]) -> DcfConfig {
    let mut config = DcfConfig::default();
    config.node_id = node_id.to_string();
    config.mode = mode;
    config.host = "127.0.0.1".to_string();
    config.port = port;
    config.peers = peers.iter().map(|p| p.to_string()).collect();
    config.timeouts.poll_interval_ms = 10;
    config
}

/// Initialized and started client for `config`
pub async fn running_client(config: DcfConfig) -> DcfClient {
    let mut client = DcfClient::default();
    client.initialize(config).await.expect("client initialize");
    client.start().await.expect("client start");
    client
}

/// A localhost port that was free a moment ago
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("ephemeral port")
}
