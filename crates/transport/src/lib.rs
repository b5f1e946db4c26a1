//! Transport layer for DCF nodes.
//!
//! This crate defines the [`Transport`] capability every wire mechanism
//! implements, the [`PluginLoader`] that swaps in transports from plugin
//! artifacts, the built-in [`LoopbackTransport`] and the default gRPC
//! [`NetworkChannel`].

pub mod channel;
pub mod loopback;
pub mod plugin;
pub mod transport;

pub use channel::{NetworkChannel, MAX_FRAME_LEN, MAX_MESSAGE_LEN};
pub use loopback::LoopbackTransport;
pub use plugin::{
    artifact_key, Artifact, ArtifactResolver, EntryPoint, PluginLoader, PluginRegistry,
    PluginTransport, StaticArtifact, EXPECTED_PLUGIN_VERSION,
};
pub use transport::{shared, SharedTransport, Transport, WeakTransport};
