//! Error types for DCF operations.
//!
//! Each concern has its own enum (codec, transport, plugin, configuration);
//! [`DcfError`] is the taxonomy the orchestrator and the CLI surface. Every
//! variant maps to a stable [`DcfError::code`] so callers can render a
//! (code, message) pair.

use thiserror::Error;

use crate::types::LifecycleState;

/// Failures while decoding a frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ends before the header or the declared body length.
    #[error("frame truncated: needed {needed} bytes, got {available}")]
    Truncated {
        /// Bytes the frame declares.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },

    /// Body is not a valid message or a required field is absent.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Discriminant byte names no known frame kind.
    #[error("unknown frame kind: {0:#04x}")]
    UnknownKind(u8),

    /// Frame is valid but of a different kind than requested.
    #[error("unexpected frame kind: expected {expected}, found {found}")]
    UnexpectedKind {
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind carried by the frame.
        found: &'static str,
    },
}

/// Failures while encoding a frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// A required envelope field is empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Body does not fit the 32-bit length prefix.
    #[error("frame body too large: {0} bytes")]
    TooLarge(usize),
}

/// Failures reported by a transport capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// `setup` was called on a transport that is already set up.
    #[error("transport already set up")]
    AlreadySetup,

    /// An operation needed a transport that was never set up.
    #[error("transport not set up")]
    NotSetup,

    /// The transport was torn down.
    #[error("transport closed")]
    Closed,

    /// Could not reach the configured endpoint.
    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Underlying failure.
        reason: String,
    },

    /// Could not bind the listener in server mode.
    #[error("failed to bind {address}: {reason}")]
    BindFailed {
        /// Address that was requested.
        address: String,
        /// Underlying failure.
        reason: String,
    },

    /// A frame could not be delivered.
    #[error("send to {target} failed: {reason}")]
    SendFailed {
        /// Transport-level destination.
        target: String,
        /// Underlying failure.
        reason: String,
    },

    /// No frame could be obtained.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Frame exceeds the transport's limit.
    #[error("frame of {len} bytes exceeds transport limit of {limit}")]
    FrameTooLarge {
        /// Frame size.
        len: usize,
        /// Transport limit.
        limit: usize,
    },
}

/// Failures while loading a transport plugin.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    /// The artifact could not be resolved.
    #[error("plugin artifact not found: {0}")]
    NotFound(String),

    /// A required entry point is not exported by the artifact.
    #[error("plugin {artifact} is missing entry point {symbol}")]
    MissingEntryPoint {
        /// Artifact being loaded.
        artifact: String,
        /// Entry point name.
        symbol: &'static str,
    },

    /// The artifact reports a different capability version.
    #[error("plugin version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version pinned by the loader.
        expected: String,
        /// Version reported by the artifact.
        found: String,
    },

    /// The factory produced no transport instance.
    #[error("plugin factory of {0} returned no transport")]
    FactoryFailed(String),
}

/// Failures while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    /// JSON document did not parse.
    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML document did not parse.
    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Document parsed but holds invalid values.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Errors surfaced by DCF components.
#[derive(Debug, Error)]
pub enum DcfError {
    /// A required argument was empty.
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    /// Configuration is missing or invalid.
    #[error(transparent)]
    ConfigInvalid(#[from] ConfigError),

    /// Transport could not be set up or activated.
    #[error("transport setup failed: {0}")]
    TransportSetupFailed(#[source] TransportError),

    /// Transport could not deliver a frame.
    #[error("transport send failed: {0}")]
    TransportSendFailed(#[source] TransportError),

    /// Transport could not produce a frame.
    #[error("transport receive failed: {0}")]
    TransportReceiveFailed(#[source] TransportError),

    /// A frame could not be encoded.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] EncodeError),

    /// A frame could not be decoded.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(#[from] DecodeError),

    /// A transport plugin could not be loaded.
    #[error("plugin load failed: {0}")]
    PluginLoadFailed(#[from] PluginError),

    /// Operation is not valid in the current lifecycle state.
    #[error("{operation} is invalid while {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State at the time of the call.
        state: LifecycleState,
    },

    /// No next hop satisfies the routing policy.
    #[error("no route to {recipient}")]
    RouteNotFound {
        /// Logical recipient.
        recipient: String,
    },

    /// Peer is not part of the configured peer set.
    #[error("unknown peer: {peer}")]
    PeerUnknown {
        /// Requested peer.
        peer: String,
    },

    /// A peer answered a health probe as unhealthy.
    #[error("peer {peer} reported unhealthy: {status}")]
    ProbeRejected {
        /// Probed peer.
        peer: String,
        /// Status text from the reply.
        status: String,
    },

    /// A sync reply answered a different request.
    #[error("reply sequence {found} does not match request sequence {expected}")]
    ReplyMismatch {
        /// Sequence of the request.
        expected: u32,
        /// Sequence carried by the reply.
        found: u32,
    },

    /// An argument had an invalid value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A bounded wait expired.
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout {
        /// Operation that waited.
        operation: &'static str,
        /// Bound that expired.
        after_ms: u64,
    },
}

impl DcfError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            DcfError::MissingArgument(_) => "missing_argument",
            DcfError::ConfigInvalid(_) => "config_invalid",
            DcfError::TransportSetupFailed(_) => "transport_setup_failed",
            DcfError::TransportSendFailed(_) => "transport_send_failed",
            DcfError::TransportReceiveFailed(_) => "transport_receive_failed",
            DcfError::SerializationFailed(_) => "serialization_failed",
            DcfError::DeserializationFailed(_) => "deserialization_failed",
            DcfError::PluginLoadFailed(_) => "plugin_load_failed",
            DcfError::InvalidState { .. } => "invalid_state",
            DcfError::RouteNotFound { .. } => "route_not_found",
            DcfError::PeerUnknown { .. } => "peer_unknown",
            DcfError::ProbeRejected { .. } => "probe_rejected",
            DcfError::ReplyMismatch { .. } => "reply_mismatch",
            DcfError::InvalidArgument(_) => "invalid_argument",
            DcfError::Timeout { .. } => "timeout",
        }
    }

    /// Shorthand for [`DcfError::InvalidState`].
    pub fn invalid_state(operation: &'static str, state: LifecycleState) -> Self {
        DcfError::InvalidState { operation, state }
    }

    /// Classify a failed request and reply exchange: a missing answer is a
    /// receive failure, anything else a send failure.
    pub fn request_failed(err: TransportError) -> Self {
        match err {
            TransportError::ReceiveFailed(_) => DcfError::TransportReceiveFailed(err),
            other => DcfError::TransportSendFailed(other),
        }
    }

    /// Shorthand for [`DcfError::PeerUnknown`].
    pub fn peer_unknown(peer: impl Into<String>) -> Self {
        DcfError::PeerUnknown { peer: peer.into() }
    }

    /// Shorthand for [`DcfError::RouteNotFound`].
    pub fn no_route(recipient: impl Into<String>) -> Self {
        DcfError::RouteNotFound {
            recipient: recipient.into(),
        }
    }
}

/// Result type for DCF operations.
pub type DcfResult<T> = Result<T, DcfError>;
