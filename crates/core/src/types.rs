//! Shared identifiers and lifecycle enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DcfError;

/// Opaque identifier of a peer or of the local node.
pub type NodeId = String;

/// Operating mode of a DCF node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Talks to a relay, never routes.
    Client,
    /// Serves the relay and answers probes.
    Server,
    /// Routes every send through the lowest-latency peer.
    P2P,
    /// Routes through a sub-threshold peer when one exists.
    #[default]
    Auto,
}

impl Mode {
    /// Lowercase wire/config name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Client => "client",
            Mode::Server => "server",
            Mode::P2P => "p2p",
            Mode::Auto => "auto",
        }
    }

    /// Whether sends in this mode consult the redundancy engine.
    pub fn is_redundancy_aware(&self) -> bool {
        matches!(self, Mode::P2P | Mode::Auto)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = DcfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Mode::Client),
            "server" => Ok(Mode::Server),
            "p2p" => Ok(Mode::P2P),
            "auto" => Ok(Mode::Auto),
            other => Err(DcfError::InvalidArgument(format!("unknown mode: {}", other))),
        }
    }
}

/// Lifecycle shared by the client orchestrator and the redundancy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, nothing wired yet.
    Uninitialized,
    /// Components built, not serving.
    Initialized,
    /// Accepting sends, receives and probes.
    Running,
    /// Stopped; may be started again.
    Stopped,
}

impl LifecycleState {
    /// Lowercase name used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
