//! Command surface over a [`DcfClient`].
//!
//! Every command produces a [`CommandOutput`] carrying a human-readable
//! line and the equivalent JSON object; the caller picks one.

use serde::Serialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use dcf_core::{DcfConfig, DcfError, DcfResult, LifecycleState, LogLevel, Mode, SDK_VERSION};

use crate::client::DcfClient;

/// Commands understood by [`CommandInterface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Init,
    Start,
    Stop,
    Status,
    Send { data: String, recipient: String },
    Receive,
    HealthCheck { peer: String },
    ListPeers,
    Heal { peer: String },
    Version,
    Benchmark { peer: String },
    GroupPeers,
    SimulateFailure { peer: String },
    LogLevel { level: u8 },
    LoadPlugin { path: String },
}

impl Command {
    /// Whether the client must be running before the command executes.
    pub fn needs_running(&self) -> bool {
        matches!(
            self,
            Command::Send { .. }
                | Command::Receive
                | Command::HealthCheck { .. }
                | Command::Heal { .. }
                | Command::Benchmark { .. }
                | Command::GroupPeers
                | Command::Stop
        )
    }

    /// Whether the command needs an initialized client before it runs.
    ///
    /// `init` and `load-plugin` initialize the client themselves.
    pub fn needs_client(&self) -> bool {
        !matches!(
            self,
            Command::Init | Command::Version | Command::LogLevel { .. } | Command::LoadPlugin { .. }
        )
    }
}

/// Text and JSON renderings of one command result.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub text: String,
    pub json: Value,
}

impl CommandOutput {
    fn new(text: impl Into<String>, json: Value) -> Self {
        Self {
            text: text.into(),
            json,
        }
    }

    /// Render as plain text or compact JSON.
    pub fn render(&self, json: bool) -> String {
        if json {
            self.json.to_string()
        } else {
            self.text.clone()
        }
    }
}

/// Render an error as `Error: <message>` or `{"error": .., "code": ..}`.
pub fn render_error(err: &DcfError, json: bool) -> String {
    if json {
        json!({ "error": err.to_string(), "code": err.code() }).to_string()
    } else {
        format!("Error: {}", err)
    }
}

#[derive(Debug, Serialize)]
struct PeerLine {
    address: String,
    rtt: Option<i32>,
    group: String,
}

/// Executes [`Command`]s against a client built from one configuration.
#[derive(Debug)]
pub struct CommandInterface {
    client: DcfClient,
    config: DcfConfig,
    receive_timeout: Duration,
}

impl CommandInterface {
    pub fn new(client: DcfClient, config: DcfConfig) -> Self {
        let receive_timeout = config.timeouts.request();
        Self {
            client,
            config,
            receive_timeout,
        }
    }

    pub fn client(&self) -> &DcfClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut DcfClient {
        &mut self.client
    }

    /// Initialize and start the client as far as `command` requires.
    pub async fn prepare(&mut self, command: &Command) -> DcfResult<()> {
        if !command.needs_client() {
            return Ok(());
        }
        if self.client.state() == LifecycleState::Uninitialized {
            self.client.initialize(self.config.clone()).await?;
        }
        if command.needs_running() && self.client.state() != LifecycleState::Running {
            self.client.start().await?;
        }
        Ok(())
    }

    /// Run `command` and describe its result.
    pub async fn execute(&mut self, command: Command) -> DcfResult<CommandOutput> {
        match command {
            Command::Init => {
                self.client.initialize(self.config.clone()).await?;
                Ok(CommandOutput::new(
                    "Initialized successfully",
                    json!({ "status": "initialized" }),
                ))
            }
            Command::Start => {
                self.client.start().await?;
                Ok(CommandOutput::new(
                    "Started DCF instance",
                    json!({ "status": "started" }),
                ))
            }
            Command::Stop => {
                self.client.stop().await?;
                Ok(CommandOutput::new(
                    "Stopped DCF instance",
                    json!({ "status": "stopped" }),
                ))
            }
            Command::Status => {
                let status = self.client.status();
                let text = format!(
                    "Running: {}\nState: {}\nMode: {}\nNode: {}\nPeers: {}\nTransport: {}",
                    if status.running { "Yes" } else { "No" },
                    status.state,
                    status.mode,
                    status.node_id.as_deref().unwrap_or("-"),
                    status.peer_count,
                    status.transport.as_deref().unwrap_or("-"),
                );
                let json = serde_json::to_value(&status)
                    .map_err(|e| DcfError::InvalidArgument(e.to_string()))?;
                Ok(CommandOutput::new(text, json))
            }
            Command::Send { data, recipient } => {
                let outcome = self.client.send_message(data.as_bytes(), &recipient).await?;
                let mut text = format!("Sent message: {} to {}", data, recipient);
                if outcome.rerouted() {
                    text.push_str(&format!(" via {}", outcome.next_hop));
                }
                let reply = outcome.reply.as_ref().map(|r| r.payload_text());
                if let Some(reply) = &reply {
                    text.push_str(&format!("\nReply: {}", reply));
                }
                Ok(CommandOutput::new(
                    text,
                    json!({
                        "message": data,
                        "recipient": recipient,
                        "next_hop": outcome.next_hop,
                        "sequence": outcome.sequence,
                        "reply": reply,
                    }),
                ))
            }
            Command::Receive => {
                let received = self
                    .client
                    .receive_message_within(self.receive_timeout)
                    .await?;
                let message = received.text();
                Ok(CommandOutput::new(
                    format!("Received from {}: {}", received.sender(), message),
                    json!({ "message": message, "sender": received.sender() }),
                ))
            }
            Command::HealthCheck { peer } => {
                let rtt = self.client.health_check(&peer).await?;
                Ok(CommandOutput::new(
                    format!("Peer {} RTT: {} ms", peer, rtt),
                    json!({ "peer": peer, "rtt": rtt }),
                ))
            }
            Command::ListPeers => {
                let peers: Vec<PeerLine> = self
                    .client
                    .peers()?
                    .into_iter()
                    .map(|record| PeerLine {
                        address: record.id,
                        rtt: record.rtt_ms,
                        group: record.group.to_string(),
                    })
                    .collect();
                let mut text = format!("Peers ({}):", peers.len());
                for peer in &peers {
                    let rtt = peer
                        .rtt
                        .map(|rtt| format!("{} ms", rtt))
                        .unwrap_or_else(|| "n/a".into());
                    text.push_str(&format!(
                        "\n{} (RTT: {}, Group: {})",
                        peer.address, rtt, peer.group
                    ));
                }
                Ok(CommandOutput::new(text, json!({ "peers": peers })))
            }
            Command::Heal { peer } => {
                let report = self.client.heal(&peer).await?;
                Ok(CommandOutput::new(
                    format!(
                        "Healed network for peer {} ({} measured, {} failed)",
                        peer,
                        report.measured.len(),
                        report.failed.len()
                    ),
                    json!({ "status": "healed", "peer": peer, "report": report }),
                ))
            }
            Command::Version => Ok(CommandOutput::new(
                format!("DCF Version: {} (Rust SDK)", SDK_VERSION),
                json!({ "version": SDK_VERSION }),
            )),
            Command::Benchmark { peer } => {
                let started = Instant::now();
                let rtt = self.client.health_check(&peer).await?;
                let execution_ms = started.elapsed().as_secs_f64() * 1000.0;
                Ok(CommandOutput::new(
                    format!(
                        "Benchmark RTT to {}: {} ms, Execution: {:.2} ms",
                        peer, rtt, execution_ms
                    ),
                    json!({ "peer": peer, "rtt": rtt, "execution_ms": execution_ms }),
                ))
            }
            Command::GroupPeers => {
                let report = self.client.group_peers().await?;
                let mut text = format!("Regrouped peers ({} measured", report.measured.len());
                if !report.failed.is_empty() {
                    text.push_str(&format!(", {} failed", report.failed.len()));
                }
                text.push(')');
                for failed in &report.failed {
                    text.push_str(&format!("\n{}: {}", failed.peer, failed.error));
                }
                Ok(CommandOutput::new(
                    text,
                    json!({ "status": "regrouped", "report": report }),
                ))
            }
            Command::SimulateFailure { peer } => {
                self.client.simulate_failure(&peer)?;
                Ok(CommandOutput::new(
                    format!("Simulated failure for {}", peer),
                    json!({ "peer": peer }),
                ))
            }
            Command::LogLevel { level } => {
                let parsed = LogLevel::try_from(level)?;
                self.client.set_log_level(parsed)?;
                Ok(CommandOutput::new(
                    format!("Log level set to {} ({})", level, parsed),
                    json!({ "log_level": level }),
                ))
            }
            Command::LoadPlugin { path } => {
                if self.client.state() == LifecycleState::Uninitialized {
                    let mut config = self.config.clone();
                    config.plugins.transport = Some(path.clone());
                    self.client.initialize(config).await?;
                } else {
                    self.client.load_plugin(&path).await?;
                }
                Ok(CommandOutput::new(
                    "Plugin loaded successfully",
                    json!({ "status": "plugin_loaded", "path": path }),
                ))
            }
        }
    }

    /// Mode the client will run in.
    pub fn mode(&self) -> Mode {
        match self.client.state() {
            LifecycleState::Uninitialized => self.config.mode(),
            _ => self.client.mode(),
        }
    }

    /// Shut the client down, releasing its transport.
    pub async fn finish(mut self) -> DcfResult<()> {
        self.client.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_interface(mode: Mode) -> CommandInterface {
        let mut config = DcfConfig::default();
        config.mode = mode;
        config.node_id = "cli".into();
        config.peers = vec!["A".into(), "B".into()];
        config.plugins.transport = Some("loopback".into());
        CommandInterface::new(DcfClient::default(), config)
    }

    async fn run(iface: &mut CommandInterface, command: Command) -> DcfResult<CommandOutput> {
        iface.prepare(&command).await?;
        iface.execute(command).await
    }

    #[tokio::test]
    async fn test_version_needs_no_client() {
        let mut iface = loopback_interface(Mode::Client);
        let out = run(&mut iface, Command::Version).await.unwrap();
        assert_eq!(out.json["version"], "5.0.0");
        assert_eq!(iface.client().state(), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn test_send_and_status_render() {
        let mut iface = loopback_interface(Mode::Client);
        let out = run(
            &mut iface,
            Command::Send {
                data: "hi".into(),
                recipient: "A".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(out.text, "Sent message: hi to A\nReply: Echo: hi");
        assert_eq!(out.json["next_hop"], "A");

        let status = run(&mut iface, Command::Status).await.unwrap();
        assert_eq!(status.json["running"], true);
        assert_eq!(status.json["mode"], "client");
        assert_eq!(status.json["peer_count"], 2);
        assert!(status.render(false).starts_with("Running: Yes"));
    }

    #[tokio::test]
    async fn test_group_heal_and_list_peers() {
        let mut iface = loopback_interface(Mode::Auto);
        let out = run(&mut iface, Command::GroupPeers).await.unwrap();
        assert_eq!(out.json["status"], "regrouped");
        assert_eq!(out.json["report"]["measured"].as_array().unwrap().len(), 2);

        run(
            &mut iface,
            Command::SimulateFailure { peer: "B".into() },
        )
        .await
        .unwrap();
        let peers = run(&mut iface, Command::ListPeers).await.unwrap();
        assert_eq!(peers.json["peers"][1]["group"], "unreachable");
        assert!(peers.text.starts_with("Peers (2):"));

        let healed = run(&mut iface, Command::Heal { peer: "B".into() })
            .await
            .unwrap();
        assert_eq!(healed.json["status"], "healed");
        let peers = run(&mut iface, Command::ListPeers).await.unwrap();
        assert_ne!(peers.json["peers"][1]["group"], "unreachable");
    }

    #[tokio::test]
    async fn test_errors_render_with_code() {
        let mut iface = loopback_interface(Mode::Client);
        let err = run(
            &mut iface,
            Command::HealthCheck {
                peer: "nobody".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(render_error(&err, false), "Error: unknown peer: nobody");

        let rendered: Value = serde_json::from_str(&render_error(&err, true)).unwrap();
        assert_eq!(rendered["code"], "peer_unknown");

        let err = run(&mut iface, Command::LogLevel { level: 7 })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn test_command_requirements() {
        assert!(Command::Receive.needs_running());
        assert!(!Command::Status.needs_running());
        assert!(!Command::Version.needs_client());
        assert!(Command::SimulateFailure { peer: "a".into() }.needs_client());
        assert!(!Command::LoadPlugin { path: "x".into() }.needs_client());
    }

    #[tokio::test]
    async fn test_load_plugin_initializes_with_artifact() {
        let mut config = DcfConfig::default();
        config.node_id = "cli".into();
        config.peers = vec!["A".into()];
        let mut iface = CommandInterface::new(DcfClient::default(), config);

        let out = run(
            &mut iface,
            Command::LoadPlugin {
                path: "plugins/libloopback.so".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(out.text, "Plugin loaded successfully");
        assert_eq!(iface.client().state(), LifecycleState::Initialized);
        assert_eq!(iface.client().status().transport.as_deref(), Some("loopback"));
    }
}
