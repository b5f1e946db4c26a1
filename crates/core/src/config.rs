//! Configuration management for DCF nodes.
//!
//! A node is described by a single JSON or TOML document. The core only
//! reads it through accessors; the one mutation path is [`DcfConfig::update`]
//! for a fixed set of keys.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, DcfError, DcfResult};
use crate::types::{Mode, NodeId};

/// Default relay port.
pub const DEFAULT_PORT: u16 = 50051;
/// Default RTT threshold separating local from remote peers (ms).
pub const DEFAULT_RTT_THRESHOLD_MS: i32 = 50;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DcfConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_node_id")]
    pub node_id: NodeId,
    #[serde(default)]
    pub peers: Vec<NodeId>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_rtt_threshold")]
    pub rtt_threshold: i32,
    #[serde(default)]
    pub plugins: PluginConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Whether `send_message` waits for a reply by default.
    #[serde(default = "default_sync")]
    pub sync: bool,
}

/// Plugin section of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PluginConfig {
    /// Artifact path of a transport plugin that replaces the default channel.
    #[serde(default)]
    pub transport: Option<String>,
}

/// Bounded waits, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
    #[serde(default = "default_probe_ms")]
    pub probe_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_ms(),
            probe_ms: default_probe_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Bound on a sync `send_message` reply.
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    /// Bound on a health probe round trip.
    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    /// Delay between relay polls while waiting for inbound frames.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_node_id() -> NodeId {
    uuid::Uuid::new_v4().to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_rtt_threshold() -> i32 {
    DEFAULT_RTT_THRESHOLD_MS
}

fn default_request_ms() -> u64 {
    5000
}

fn default_probe_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_sync() -> bool {
    true
}

impl Default for DcfConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            node_id: default_node_id(),
            peers: Vec::new(),
            host: default_host(),
            port: default_port(),
            rtt_threshold: default_rtt_threshold(),
            plugins: PluginConfig::default(),
            timeouts: TimeoutConfig::default(),
            sync: default_sync(),
        }
    }
}

/// Keys accepted by [`DcfConfig::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    Mode,
    NodeId,
    Host,
    Port,
    RttThreshold,
    PluginPath,
}

impl ConfigKey {
    /// Whether the key was consumed when the transport was built.
    ///
    /// Changing one of these on an initialized client would leave the
    /// live transport out of step with the configuration.
    pub fn binds_transport(&self) -> bool {
        matches!(
            self,
            ConfigKey::NodeId | ConfigKey::Host | ConfigKey::Port | ConfigKey::PluginPath
        )
    }
}

impl FromStr for ConfigKey {
    type Err = DcfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mode" => Ok(ConfigKey::Mode),
            "node_id" => Ok(ConfigKey::NodeId),
            "host" => Ok(ConfigKey::Host),
            "port" => Ok(ConfigKey::Port),
            "rtt_threshold" => Ok(ConfigKey::RttThreshold),
            "plugin_path" => Ok(ConfigKey::PluginPath),
            other => Err(DcfError::InvalidArgument(format!(
                "unknown config key: {}",
                other
            ))),
        }
    }
}

impl DcfConfig {
    /// Load and validate a configuration file.
    ///
    /// Files ending in `.toml` are parsed as TOML, everything else as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let config = if is_toml {
            Self::from_toml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };
        tracing::debug!(path = %path.display(), node_id = %config.node_id, "configuration loaded");
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: DcfConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DcfConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Validation("node_id must not be empty".into()));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".into()));
        }
        if self.rtt_threshold < 0 {
            return Err(ConfigError::Validation(format!(
                "rtt_threshold must be non-negative, got {}",
                self.rtt_threshold
            )));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.trim().is_empty() {
                return Err(ConfigError::Validation("peer ids must not be empty".into()));
            }
            if !seen.insert(peer.as_str()) {
                return Err(ConfigError::Validation(format!("duplicate peer: {}", peer)));
            }
        }

        if self.timeouts.request_ms == 0
            || self.timeouts.probe_ms == 0
            || self.timeouts.poll_interval_ms == 0
        {
            return Err(ConfigError::Validation("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn rtt_threshold(&self) -> i32 {
        self.rtt_threshold
    }

    pub fn plugin_path(&self) -> Option<&str> {
        self.plugins.transport.as_deref()
    }

    /// Update one of the mutable keys from its string form.
    ///
    /// Unknown keys and unparsable values are rejected and leave the
    /// configuration untouched.
    pub fn update(&mut self, key: &str, value: &str) -> DcfResult<()> {
        let key: ConfigKey = key.parse()?;
        match key {
            ConfigKey::Mode => self.mode = value.parse()?,
            ConfigKey::NodeId => {
                if value.trim().is_empty() {
                    return Err(DcfError::MissingArgument("node_id"));
                }
                self.node_id = value.to_string();
            }
            ConfigKey::Host => {
                if value.trim().is_empty() {
                    return Err(DcfError::MissingArgument("host"));
                }
                self.host = value.to_string();
            }
            ConfigKey::Port => {
                let port: u16 = value
                    .trim()
                    .parse()
                    .map_err(|e| DcfError::InvalidArgument(format!("port: {}", e)))?;
                if port == 0 {
                    return Err(DcfError::InvalidArgument("port must be non-zero".into()));
                }
                self.port = port;
            }
            ConfigKey::RttThreshold => {
                let threshold: i32 = value
                    .trim()
                    .parse()
                    .map_err(|e| DcfError::InvalidArgument(format!("rtt_threshold: {}", e)))?;
                if threshold < 0 {
                    return Err(DcfError::InvalidArgument(
                        "rtt_threshold must be non-negative".into(),
                    ));
                }
                self.rtt_threshold = threshold;
            }
            ConfigKey::PluginPath => {
                self.plugins.transport = if value.trim().is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
        }
        tracing::info!(key = ?key, "configuration updated");
        Ok(())
    }
}
