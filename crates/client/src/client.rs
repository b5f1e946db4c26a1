//! Client orchestrator.
//!
//! [`DcfClient`] owns the configuration, the active transport and the
//! redundancy engine, and drives them through one lifecycle:
//!
//! ```text
//! Uninitialized --initialize--> Initialized --start--> Running
//!                                                 ^        |
//!                                                 +-start--+--stop--> Stopped
//! ```
//!
//! Every mutating operation takes `&mut self`, so callers sharing a client
//! across tasks serialize through their own lock.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use dcf_core::codec::{self, Envelope};
use dcf_core::logging::{LogHandle, LogLevel};
use dcf_core::{ConfigKey, DcfConfig, DcfError, DcfResult, LifecycleState, Mode, NodeId};
use dcf_mesh::{GroupReport, PeerRecord, RedundancyEngine, RttPolicy};
use dcf_transport::{shared, NetworkChannel, PluginLoader, SharedTransport, Transport};

use crate::control::{value_text, ControlCommand};

/// Result of a successful `send_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Logical recipient recorded in the envelope.
    pub recipient: NodeId,
    /// Transport-level destination actually used.
    pub next_hop: NodeId,
    /// Sequence nonce of the sent envelope.
    pub sequence: u32,
    /// Decoded reply for sync sends.
    pub reply: Option<Envelope>,
}

impl SendOutcome {
    /// Whether the redundancy engine redirected the send.
    pub fn rerouted(&self) -> bool {
        self.next_hop != self.recipient
    }
}

/// A message pulled from the active transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub envelope: Envelope,
    /// Control command applied while receiving, if any.
    pub control: Option<ControlCommand>,
}

impl ReceivedMessage {
    pub fn sender(&self) -> &str {
        &self.envelope.sender
    }

    pub fn text(&self) -> String {
        self.envelope.payload_text()
    }
}

/// Snapshot reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientStatus {
    pub running: bool,
    pub state: LifecycleState,
    pub mode: Mode,
    pub node_id: Option<NodeId>,
    pub peer_count: usize,
    pub transport: Option<String>,
}

/// Client-side entry point to the DCF fabric.
pub struct DcfClient {
    loader: PluginLoader,
    state: LifecycleState,
    mode: Mode,
    config: Option<DcfConfig>,
    transport: Option<SharedTransport>,
    transport_name: Option<String>,
    engine: Option<Arc<RedundancyEngine>>,
    rtt_policy: Option<Arc<dyn RttPolicy>>,
    log_handle: Option<LogHandle>,
    log_level: LogLevel,
}

impl std::fmt::Debug for DcfClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcfClient")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("transport", &self.transport_name)
            .finish_non_exhaustive()
    }
}

impl Default for DcfClient {
    fn default() -> Self {
        Self::new(PluginLoader::default())
    }
}

impl DcfClient {
    /// Uninitialized client resolving plugins through `loader`.
    pub fn new(loader: PluginLoader) -> Self {
        Self {
            loader,
            state: LifecycleState::Uninitialized,
            mode: Mode::default(),
            config: None,
            transport: None,
            transport_name: None,
            engine: None,
            rtt_policy: None,
            log_handle: None,
            log_level: LogLevel::default(),
        }
    }

    /// Use `policy` for RTT samples instead of the measured round trip.
    pub fn with_rtt_policy(mut self, policy: Arc<dyn RttPolicy>) -> Self {
        self.rtt_policy = Some(policy);
        self
    }

    /// Attach the reloadable log handle used by `set_log_level`.
    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> Option<&DcfConfig> {
        self.config.as_ref()
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    fn require_running(&self, operation: &'static str) -> DcfResult<()> {
        if self.state != LifecycleState::Running {
            return Err(DcfError::invalid_state(operation, self.state));
        }
        Ok(())
    }

    fn engine(&self, operation: &'static str) -> DcfResult<&RedundancyEngine> {
        self.engine
            .as_deref()
            .ok_or_else(|| DcfError::invalid_state(operation, self.state))
    }

    fn transport(&self, operation: &'static str) -> DcfResult<&SharedTransport> {
        self.transport
            .as_ref()
            .ok_or_else(|| DcfError::invalid_state(operation, self.state))
    }

    fn node_id(&self) -> &str {
        self.config.as_ref().map(|c| c.node_id()).unwrap_or_default()
    }

    fn build_transport(&self, config: &DcfConfig) -> DcfResult<Box<dyn Transport>> {
        match config.plugin_path() {
            Some(path) => Ok(self.loader.load(path)?),
            None => Ok(Box::new(
                NetworkChannel::new(config.node_id(), config.mode())
                    .with_poll_interval(config.timeouts.poll_interval()),
            )),
        }
    }

    /// Validate `config` and build the transport and the redundancy engine.
    ///
    /// A configured plugin transport replaces the default channel before
    /// anything connects. On failure everything acquired so far is released
    /// and the client stays uninitialized.
    pub async fn initialize(&mut self, config: DcfConfig) -> DcfResult<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(DcfError::invalid_state("initialize", self.state));
        }
        config.validate()?;

        let mut transport = self.build_transport(&config)?;
        if let Err(e) = transport.setup(config.host(), config.port()).await {
            transport.teardown().await;
            return Err(DcfError::TransportSetupFailed(e));
        }
        let transport_name = transport.name().to_string();
        let transport = shared(transport);

        let mut engine = RedundancyEngine::new().with_probe_timeout(config.timeouts.probe());
        if let Some(policy) = &self.rtt_policy {
            engine = engine.with_policy(policy.clone());
        }
        if let Err(e) = engine.initialize(
            config.peers(),
            config.rtt_threshold(),
            Arc::downgrade(&transport),
        ) {
            transport.lock().await.teardown().await;
            return Err(e);
        }

        tracing::info!(
            node_id = %config.node_id(),
            mode = %config.mode(),
            transport = %transport_name,
            peers = config.peers().len(),
            "client initialized"
        );
        self.mode = config.mode();
        self.config = Some(config);
        self.transport = Some(transport);
        self.transport_name = Some(transport_name);
        self.engine = Some(Arc::new(engine));
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    /// Activate the transport and the engine.
    pub async fn start(&mut self) -> DcfResult<()> {
        match self.state {
            LifecycleState::Initialized | LifecycleState::Stopped => {}
            other => return Err(DcfError::invalid_state("start", other)),
        }
        let transport = self.transport("start")?.clone();
        let engine = self.engine("start")?;

        let mut guard = transport.lock().await;
        guard
            .activate(self.mode)
            .await
            .map_err(DcfError::TransportSetupFailed)?;
        if let Err(e) = engine.start() {
            let _ = guard.deactivate().await;
            return Err(e);
        }
        drop(guard);

        self.state = LifecycleState::Running;
        tracing::info!(mode = %self.mode, "client running");
        Ok(())
    }

    /// Deactivate the transport and stop the engine.
    pub async fn stop(&mut self) -> DcfResult<()> {
        self.require_running("stop")?;
        let transport = self.transport("stop")?.clone();
        self.engine("stop")?.stop()?;
        self.state = LifecycleState::Stopped;

        transport
            .lock()
            .await
            .deactivate()
            .await
            .map_err(DcfError::TransportSetupFailed)?;
        tracing::info!("client stopped");
        Ok(())
    }

    /// Send `data` to `recipient` using the configured sync default.
    pub async fn send_message(&mut self, data: &[u8], recipient: &str) -> DcfResult<SendOutcome> {
        let sync = self.config.as_ref().map(|c| c.sync).unwrap_or(true);
        self.send_message_with(data, recipient, sync).await
    }

    /// Send `data` to `recipient`.
    ///
    /// In `P2P` mode the next hop is the optimal route; in `Auto` mode the
    /// alternate route when one exists, else the recipient itself. The
    /// envelope keeps the logical recipient. Sync sends wait at most the
    /// configured request timeout for the reply, which must carry the
    /// request's sequence.
    pub async fn send_message_with(
        &mut self,
        data: &[u8],
        recipient: &str,
        sync: bool,
    ) -> DcfResult<SendOutcome> {
        self.require_running("send_message")?;
        if recipient.is_empty() {
            return Err(DcfError::MissingArgument("recipient"));
        }
        let engine = self.engine("send_message")?;

        let next_hop = match self.mode {
            Mode::P2P => Some(engine.optimal_route(recipient)?),
            mode if mode.is_redundancy_aware() => match engine.alternate_route(recipient) {
                Ok(hop) => Some(hop),
                Err(DcfError::RouteNotFound { .. }) => None,
                Err(e) => return Err(e),
            },
            _ => None,
        };

        let sequence = rand::random::<u32>();
        let mut envelope = Envelope::new(self.node_id(), recipient, data)
            .with_sync(sync)
            .with_sequence(sequence);
        if let Some(hop) = &next_hop {
            let group = engine.peer(hop).map(|r| r.group).unwrap_or_default();
            envelope = envelope.with_route(hop.clone(), group.as_str());
        }
        let target = next_hop.unwrap_or_else(|| recipient.to_string());
        let frame = codec::encode_message(&envelope)?;

        let request_timeout = self
            .config
            .as_ref()
            .map(|c| c.timeouts.request())
            .unwrap_or(Duration::from_millis(5000));
        let transport = self.transport("send_message")?;
        let mut guard = transport.lock().await;
        let reply = if sync {
            let frame = tokio::time::timeout(request_timeout, guard.request(&frame, &target))
                .await
                .map_err(|_| DcfError::Timeout {
                    operation: "send_message",
                    after_ms: request_timeout.as_millis() as u64,
                })?
                .map_err(DcfError::request_failed)?;
            let reply = codec::decode_message(&frame)?;
            if reply.sequence != sequence {
                return Err(DcfError::ReplyMismatch {
                    expected: sequence,
                    found: reply.sequence,
                });
            }
            Some(reply)
        } else {
            guard
                .send(&frame, &target)
                .await
                .map_err(DcfError::TransportSendFailed)?;
            None
        };
        drop(guard);

        tracing::debug!(
            recipient,
            next_hop = %target,
            sequence,
            sync,
            "message sent"
        );
        Ok(SendOutcome {
            recipient: recipient.to_string(),
            next_hop: target,
            sequence,
            reply,
        })
    }

    /// Block until the next inbound message arrives.
    ///
    /// In `Auto` mode control messages are applied before the message is
    /// returned.
    pub async fn receive_message(&mut self) -> DcfResult<ReceivedMessage> {
        self.require_running("receive_message")?;
        let frame = {
            let transport = self.transport("receive_message")?;
            let mut guard = transport.lock().await;
            guard
                .receive()
                .await
                .map_err(DcfError::TransportReceiveFailed)?
        };
        let envelope = codec::decode_message(&frame)?;
        tracing::debug!(sender = %envelope.sender, sequence = envelope.sequence, "message received");

        let mut control = None;
        if self.mode == Mode::Auto {
            if let Some(command) = ControlCommand::parse(&envelope.payload) {
                match self.apply_control(&command).await {
                    Ok(()) => control = Some(command),
                    Err(e) => {
                        tracing::warn!(sender = %envelope.sender, error = %e, "control message rejected")
                    }
                }
            }
        }

        Ok(ReceivedMessage { envelope, control })
    }

    /// [`receive_message`](Self::receive_message) bounded by `timeout`.
    pub async fn receive_message_within(&mut self, timeout: Duration) -> DcfResult<ReceivedMessage> {
        tokio::time::timeout(timeout, self.receive_message())
            .await
            .map_err(|_| DcfError::Timeout {
                operation: "receive_message",
                after_ms: timeout.as_millis() as u64,
            })?
    }

    async fn apply_control(&mut self, command: &ControlCommand) -> DcfResult<()> {
        match command {
            ControlCommand::SetRole { role } => {
                let mode: Mode = role.parse()?;
                self.set_mode(mode).await
            }
            ControlCommand::UpdateConfig { key, value } => {
                let parsed: ConfigKey = key.parse()?;
                if parsed.binds_transport() {
                    return Err(DcfError::invalid_state("update_config", self.state));
                }
                let config = self
                    .config
                    .as_mut()
                    .ok_or_else(|| DcfError::invalid_state("update_config", self.state))?;
                config.update(key, &value_text(value))?;
                let mode = config.mode();
                let threshold = config.rtt_threshold();
                if let Some(engine) = &self.engine {
                    engine.set_threshold(threshold)?;
                }
                if mode != self.mode {
                    self.set_mode(mode).await?;
                }
                Ok(())
            }
        }
    }

    /// Switch the current mode, re-activating the transport when running.
    pub async fn set_mode(&mut self, mode: Mode) -> DcfResult<()> {
        if self.state == LifecycleState::Uninitialized {
            return Err(DcfError::invalid_state("set_mode", self.state));
        }
        if mode == self.mode {
            return Ok(());
        }
        if self.state == LifecycleState::Running {
            let transport = self.transport("set_mode")?;
            let mut guard = transport.lock().await;
            guard
                .deactivate()
                .await
                .map_err(DcfError::TransportSetupFailed)?;
            guard
                .activate(mode)
                .await
                .map_err(DcfError::TransportSetupFailed)?;
        }
        if let Some(config) = self.config.as_mut() {
            config.mode = mode;
        }
        tracing::info!(from = %self.mode, to = %mode, "mode changed");
        self.mode = mode;
        Ok(())
    }

    /// Change log verbosity through the attached reload handle.
    pub fn set_log_level(&mut self, level: LogLevel) -> DcfResult<()> {
        let handle = self.log_handle.as_ref().ok_or_else(|| {
            DcfError::InvalidArgument("no reloadable log subscriber installed".into())
        })?;
        handle.set_level(level)?;
        self.log_level = level;
        Ok(())
    }

    /// Replace the active transport with one loaded from `path`.
    ///
    /// Not allowed while running. The previous transport is torn down and
    /// the engine keeps probing through the new one.
    pub async fn load_plugin(&mut self, path: &str) -> DcfResult<String> {
        if path.trim().is_empty() {
            return Err(DcfError::MissingArgument("path"));
        }
        match self.state {
            LifecycleState::Initialized | LifecycleState::Stopped => {}
            other => return Err(DcfError::invalid_state("load_plugin", other)),
        }
        let (host, port) = match &self.config {
            Some(config) => (config.host().to_string(), config.port()),
            None => return Err(DcfError::invalid_state("load_plugin", self.state)),
        };

        let mut replacement = self.loader.load(path)?;
        if let Err(e) = replacement.setup(&host, port).await {
            replacement.teardown().await;
            return Err(DcfError::TransportSetupFailed(e));
        }
        let name = replacement.name().to_string();

        let transport = self.transport("load_plugin")?;
        let mut guard = transport.lock().await;
        guard.teardown().await;
        *guard = replacement;
        drop(guard);

        if let Some(config) = self.config.as_mut() {
            config.plugins.transport = Some(path.to_string());
        }
        tracing::info!(artifact = %path, transport = %name, "transport replaced by plugin");
        self.transport_name = Some(name.clone());
        Ok(name)
    }

    /// Probe one peer.
    pub async fn health_check(&self, peer: &str) -> DcfResult<i32> {
        self.engine("health_check")?.health_check(peer).await
    }

    /// Probe every peer and reclassify them.
    pub async fn group_peers(&self) -> DcfResult<GroupReport> {
        self.engine("group_peers")?.group_peers().await
    }

    /// Mark a peer unreachable.
    pub fn simulate_failure(&self, peer: &str) -> DcfResult<()> {
        self.engine("simulate_failure")?.simulate_failure(peer)
    }

    /// Reset a peer and regroup.
    pub async fn heal(&self, peer: &str) -> DcfResult<GroupReport> {
        self.engine("heal")?.heal(peer).await
    }

    /// Snapshot of the peer records.
    pub fn peers(&self) -> DcfResult<Vec<PeerRecord>> {
        Ok(self.engine("list_peers")?.peers())
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            running: self.state == LifecycleState::Running,
            state: self.state,
            mode: self.mode,
            node_id: self.config.as_ref().map(|c| c.node_id().to_string()),
            peer_count: self.config.as_ref().map(|c| c.peers().len()).unwrap_or(0),
            transport: self.transport_name.clone(),
        }
    }

    /// Stop if running, then tear the transport down exactly once.
    ///
    /// The client returns to `Uninitialized` and may be initialized again.
    pub async fn shutdown(&mut self) -> DcfResult<()> {
        let stopped = if self.state == LifecycleState::Running {
            self.stop().await
        } else {
            Ok(())
        };

        if let Some(transport) = self.transport.take() {
            transport.lock().await.teardown().await;
        }
        self.engine = None;
        self.config = None;
        self.transport_name = None;
        self.state = LifecycleState::Uninitialized;
        tracing::info!("client shut down");
        stopped
    }
}
