//! Core functionality for the DCF messaging fabric.
//!
//! This crate provides the fundamental types, the error taxonomy,
//! configuration, logging setup and the frame codec shared by every
//! other DCF crate.

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

/// Generated protobuf messages and the `DcfService` gRPC contract.
pub mod proto {
    tonic::include_proto!("dcf.v1");
}

pub use codec::{Envelope, Frame, FrameKind, HealthProbe, HealthReply};
pub use config::{ConfigKey, DcfConfig, PluginConfig, TimeoutConfig};
pub use error::{
    ConfigError, DcfError, DcfResult, DecodeError, EncodeError, PluginError, TransportError,
};
pub use logging::{LogHandle, LogLevel};
pub use types::{LifecycleState, Mode, NodeId};

/// SDK version reported by the command surface.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
