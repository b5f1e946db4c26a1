//! Redundancy engine: health probing, proximity grouping and route choice.
//!
//! The engine owns the peer table and holds only a [`WeakTransport`] to the
//! client's active transport. Probes are encoded with the frame codec and
//! exchanged through [`dcf_transport::Transport::request`] while holding
//! the transport lock, so a probe's reply never mixes with queued inbound
//! traffic.
//!
//! # Lifecycle
//!
//! `Uninitialized → Initialized → Running → Stopped`, with `start` allowed
//! again from `Stopped`. Probes and route selection require `Running`;
//! failure simulation only needs the engine to be initialized.

use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use dcf_core::codec;
use dcf_core::{DcfError, DcfResult, LifecycleState, NodeId, TransportError};
use dcf_transport::WeakTransport;

use crate::peer::{PeerGroup, PeerRecord, PeerTable};
use crate::routing;
use crate::rtt::{MeasuredRtt, RttPolicy};

/// Default bound on one probe exchange.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(2000);

/// A peer measured by [`RedundancyEngine::group_peers`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasuredPeer {
    /// Peer id
    pub peer: NodeId,
    /// RTT sample
    pub rtt_ms: i32,
    /// Group after reclassification
    pub group: PeerGroup,
}

/// A probe that failed during [`RedundancyEngine::group_peers`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedProbe {
    /// Peer id
    pub peer: NodeId,
    /// Display text of the error
    pub error: String,
}

/// Outcome of a regrouping pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    /// Peers whose probe succeeded, in configuration order
    pub measured: Vec<MeasuredPeer>,
    /// Peers whose probe failed, in configuration order
    pub failed: Vec<FailedProbe>,
}

impl GroupReport {
    /// Whether every peer answered
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct EngineState {
    lifecycle: LifecycleState,
    table: PeerTable,
    threshold_ms: i32,
    transport: WeakTransport,
}

/// Tracks per-peer RTT and selects next hops
pub struct RedundancyEngine {
    state: RwLock<EngineState>,
    policy: Arc<dyn RttPolicy>,
    probe_timeout: Duration,
}

impl std::fmt::Debug for RedundancyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("RedundancyEngine")
            .field("lifecycle", &state.lifecycle)
            .field("peers", &state.table.len())
            .field("threshold_ms", &state.threshold_ms)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

impl Default for RedundancyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RedundancyEngine {
    /// Uninitialized engine measuring real round trips
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState {
                lifecycle: LifecycleState::Uninitialized,
                table: PeerTable::default(),
                threshold_ms: 0,
                transport: WeakTransport::new(),
            }),
            policy: Arc::new(MeasuredRtt),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Replace the RTT policy
    pub fn with_policy(mut self, policy: Arc<dyn RttPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Bound every probe exchange by `timeout`
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_running(state: &EngineState, operation: &'static str) -> DcfResult<()> {
        if state.lifecycle != LifecycleState::Running {
            return Err(DcfError::invalid_state(operation, state.lifecycle));
        }
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.read().lifecycle
    }

    /// Configured RTT threshold
    pub fn threshold_ms(&self) -> i32 {
        self.read().threshold_ms
    }

    /// Snapshot of every peer record in configuration order
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.read().table.snapshot()
    }

    /// Change the threshold and reclassify measured peers against it
    pub fn set_threshold(&self, threshold_ms: i32) -> DcfResult<()> {
        if threshold_ms < 0 {
            return Err(DcfError::InvalidArgument(format!(
                "rtt threshold must be non-negative, got {}",
                threshold_ms
            )));
        }
        let mut state = self.write();
        if state.lifecycle == LifecycleState::Uninitialized {
            return Err(DcfError::invalid_state("set_threshold", state.lifecycle));
        }
        state.threshold_ms = threshold_ms;
        state.table.reclassify(threshold_ms);
        tracing::info!(threshold_ms, "rtt threshold changed");
        Ok(())
    }

    /// Record for one peer
    pub fn peer(&self, peer: &str) -> Option<PeerRecord> {
        self.read().table.get(peer).cloned()
    }

    /// Create one `Unknown` record per peer and attach the transport
    pub fn initialize(
        &self,
        peers: &[NodeId],
        threshold_ms: i32,
        transport: WeakTransport,
    ) -> DcfResult<()> {
        if threshold_ms < 0 {
            return Err(DcfError::InvalidArgument(format!(
                "rtt threshold must be non-negative, got {}",
                threshold_ms
            )));
        }
        if peers.iter().any(|p| p.is_empty()) {
            return Err(DcfError::MissingArgument("peer"));
        }

        let mut state = self.write();
        if state.lifecycle != LifecycleState::Uninitialized {
            return Err(DcfError::invalid_state("initialize", state.lifecycle));
        }
        state.table = PeerTable::new(peers.iter().cloned());
        state.threshold_ms = threshold_ms;
        state.transport = transport;
        state.lifecycle = LifecycleState::Initialized;

        tracing::info!(peers = state.table.len(), threshold_ms, "redundancy engine initialized");
        Ok(())
    }

    /// Allow probing and routing
    pub fn start(&self) -> DcfResult<()> {
        let mut state = self.write();
        match state.lifecycle {
            LifecycleState::Initialized | LifecycleState::Stopped => {
                state.lifecycle = LifecycleState::Running;
                tracing::info!("redundancy engine running");
                Ok(())
            }
            other => Err(DcfError::invalid_state("start", other)),
        }
    }

    /// Stop probing and routing; records persist
    pub fn stop(&self) -> DcfResult<()> {
        let mut state = self.write();
        if state.lifecycle != LifecycleState::Running {
            return Err(DcfError::invalid_state("stop", state.lifecycle));
        }
        state.lifecycle = LifecycleState::Stopped;
        tracing::info!("redundancy engine stopped");
        Ok(())
    }

    /// Probe `peer`, store the RTT sample and reclassify it.
    ///
    /// Transport and codec failures are returned unchanged and leave the
    /// record untouched. A reply with `healthy = false` is
    /// [`DcfError::ProbeRejected`].
    pub async fn health_check(&self, peer: &str) -> DcfResult<i32> {
        if peer.is_empty() {
            return Err(DcfError::MissingArgument("peer"));
        }
        let transport = {
            let state = self.read();
            Self::require_running(&state, "health_check")?;
            if !state.table.contains(peer) {
                return Err(DcfError::peer_unknown(peer));
            }
            state
                .transport
                .upgrade()
                .ok_or(DcfError::TransportSendFailed(TransportError::Closed))?
        };

        let probe = codec::encode_probe(peer)?;
        let (frame, elapsed) = {
            let mut transport = transport.lock().await;
            let started = Instant::now();
            let frame = tokio::time::timeout(self.probe_timeout, transport.request(&probe, peer))
                .await
                .map_err(|_| DcfError::Timeout {
                    operation: "health_check",
                    after_ms: self.probe_timeout.as_millis() as u64,
                })?
                .map_err(DcfError::request_failed)?;
            (frame, started.elapsed())
        };

        let reply = codec::decode_reply(&frame)?;
        if !reply.healthy {
            return Err(DcfError::ProbeRejected {
                peer: peer.to_string(),
                status: reply.status,
            });
        }

        let rtt_ms = self.policy.sample(peer, elapsed);
        let mut state = self.write();
        let threshold_ms = state.threshold_ms;
        let group = state
            .table
            .record_rtt(peer, rtt_ms, threshold_ms)
            .ok_or_else(|| DcfError::peer_unknown(peer))?;

        tracing::debug!(peer, rtt_ms, group = %group, "health check complete");
        Ok(rtt_ms)
    }

    /// Probe every peer concurrently.
    ///
    /// A failed probe is logged and reported; the peer keeps its previous
    /// classification.
    pub async fn group_peers(&self) -> DcfResult<GroupReport> {
        let peers = {
            let state = self.read();
            Self::require_running(&state, "group_peers")?;
            state.table.ids()
        };

        let results = join_all(peers.iter().map(|peer| async move {
            (peer, self.health_check(peer).await)
        }))
        .await;

        let mut report = GroupReport::default();
        for (peer, result) in results {
            match result {
                Ok(rtt_ms) => {
                    let group = self
                        .peer(peer)
                        .map(|record| record.group)
                        .unwrap_or_default();
                    report.measured.push(MeasuredPeer {
                        peer: peer.clone(),
                        rtt_ms,
                        group,
                    });
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "probe failed, keeping previous group");
                    report.failed.push(FailedProbe {
                        peer: peer.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            measured = report.measured.len(),
            failed = report.failed.len(),
            "peers regrouped"
        );
        Ok(report)
    }

    /// Lowest-RTT peer other than `recipient`, regardless of threshold
    pub fn optimal_route(&self, recipient: &str) -> DcfResult<NodeId> {
        if recipient.is_empty() {
            return Err(DcfError::MissingArgument("recipient"));
        }
        let state = self.read();
        Self::require_running(&state, "optimal_route")?;
        routing::select_optimal(&state.table, recipient)
            .map(|record| record.id.clone())
            .ok_or_else(|| DcfError::no_route(recipient))
    }

    /// Lowest-RTT peer other than `recipient` below the threshold
    pub fn alternate_route(&self, recipient: &str) -> DcfResult<NodeId> {
        if recipient.is_empty() {
            return Err(DcfError::MissingArgument("recipient"));
        }
        let state = self.read();
        Self::require_running(&state, "alternate_route")?;
        routing::select_alternate(&state.table, recipient, state.threshold_ms)
            .map(|record| record.id.clone())
            .ok_or_else(|| DcfError::no_route(recipient))
    }

    /// Mark `peer` unreachable without any I/O. Idempotent.
    pub fn simulate_failure(&self, peer: &str) -> DcfResult<()> {
        if peer.is_empty() {
            return Err(DcfError::MissingArgument("peer"));
        }
        let mut state = self.write();
        if state.lifecycle == LifecycleState::Uninitialized {
            return Err(DcfError::invalid_state("simulate_failure", state.lifecycle));
        }
        if !state.table.mark_unreachable(peer) {
            return Err(DcfError::peer_unknown(peer));
        }
        tracing::info!(peer, "peer marked unreachable");
        Ok(())
    }

    /// Reset `peer` to unmeasured and regroup every peer
    pub async fn heal(&self, peer: &str) -> DcfResult<GroupReport> {
        if peer.is_empty() {
            return Err(DcfError::MissingArgument("peer"));
        }
        {
            let mut state = self.write();
            Self::require_running(&state, "heal")?;
            if !state.table.reset(peer) {
                return Err(DcfError::peer_unknown(peer));
            }
        }
        tracing::info!(peer, "healing peer");
        self.group_peers().await
    }
}
