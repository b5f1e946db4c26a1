//! DCF Mesh - redundancy layer for peer-addressed messaging
//!
//! Tracks per-peer round-trip time, classifies peers into proximity groups
//! and picks next hops for redundancy-aware sends.
//!
//! # Core Components
//!
//! - **Peer Table**: fixed set of configured peers with their last RTT and group
//! - **RTT Policy**: pluggable conversion of a timed probe into an RTT sample
//! - **Routing**: optimal (global minimum) and alternate (below threshold) next hops
//! - **Redundancy Engine**: lifecycle, health probes, failure simulation and healing
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use dcf_mesh::RedundancyEngine;
//! use dcf_transport::{shared, LoopbackTransport, Transport};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut loopback = LoopbackTransport::new();
//! loopback.setup("localhost", 50051).await?;
//! let transport = shared(Box::new(loopback));
//!
//! let engine = RedundancyEngine::new();
//! engine.initialize(&["peer-a".to_string(), "peer-b".to_string()], 50, Arc::downgrade(&transport))?;
//! engine.start()?;
//!
//! let report = engine.group_peers().await?;
//! println!("measured {} peers", report.measured.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod peer;
pub mod redundancy;
pub mod routing;
pub mod rtt;

// Re-export main types
pub use peer::{PeerGroup, PeerRecord, PeerTable, UNREACHABLE_RTT_MS};
pub use redundancy::{FailedProbe, GroupReport, MeasuredPeer, RedundancyEngine};
pub use rtt::{FixedRtt, MeasuredRtt, RttPolicy};
