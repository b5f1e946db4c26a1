//! Transport capability contract.
//!
//! Every wire mechanism, built in or loaded as a plugin, implements
//! [`Transport`]. At this boundary frames are opaque byte sequences
//! produced by [`dcf_core::codec`].

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

use dcf_core::{Mode, TransportError};

/// Capability set any transport must satisfy.
///
/// Lifecycle: `setup` exactly once, then any number of `activate`,
/// `send`, `receive` and `deactivate` calls, then `teardown` at most once.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in status output and logs.
    fn name(&self) -> &str;

    /// Prepare the transport for `host:port`.
    ///
    /// Calling it a second time returns [`TransportError::AlreadySetup`].
    async fn setup(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Begin serving in `mode`. Transports without a listening side ignore it.
    async fn activate(&mut self, _mode: Mode) -> Result<(), TransportError> {
        Ok(())
    }

    /// Stop serving. Must be safe to call when not active.
    async fn deactivate(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Deliver one frame to `target`.
    async fn send(&mut self, frame: &[u8], target: &str) -> Result<(), TransportError>;

    /// Next available inbound frame, regardless of sender.
    async fn receive(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Deliver one frame to `target` and return the frame answering it.
    ///
    /// Used for health probes and sync messages. Transports that queue
    /// unrelated traffic for `receive` override this so the answer is
    /// returned directly and never reordered with that traffic. The default
    /// sends and then takes the next inbound frame.
    async fn request(&mut self, frame: &[u8], target: &str) -> Result<Vec<u8>, TransportError> {
        self.send(frame, target).await?;
        self.receive().await
    }

    /// Release every resource. Infallible.
    async fn teardown(&mut self);
}

/// Single-owner handle to the active transport.
///
/// The orchestrator holds the strong reference; the redundancy engine keeps
/// a [`WeakTransport`] to issue probes. A probe exchange holds the lock
/// across its send and receive.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Wrap a transport into a [`SharedTransport`].
pub fn shared(transport: Box<dyn Transport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

/// Non-owning handle to the active transport.
pub type WeakTransport = Weak<Mutex<Box<dyn Transport>>>;
