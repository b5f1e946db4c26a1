//! RTT measurement policies.
//!
//! The engine times every probe exchange and hands the elapsed duration to
//! an [`RttPolicy`], which turns it into the sample stored for the peer.

use std::collections::HashMap;
use std::time::Duration;

use dcf_core::NodeId;

use crate::peer::UNREACHABLE_RTT_MS;

/// Derives an RTT sample from a completed probe
pub trait RttPolicy: Send + Sync {
    /// RTT in milliseconds for `peer`, non-negative and below the
    /// unreachable sentinel
    fn sample(&self, peer: &str, elapsed: Duration) -> i32;
}

fn to_millis(elapsed: Duration) -> i32 {
    i32::try_from(elapsed.as_millis())
        .unwrap_or(UNREACHABLE_RTT_MS - 1)
        .min(UNREACHABLE_RTT_MS - 1)
}

/// Uses the measured probe round trip
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasuredRtt;

impl RttPolicy for MeasuredRtt {
    fn sample(&self, _peer: &str, elapsed: Duration) -> i32 {
        to_millis(elapsed)
    }
}

/// Reports fixed per-peer values, falling back to the measurement
#[derive(Debug, Clone, Default)]
pub struct FixedRtt {
    values: HashMap<NodeId, i32>,
}

impl FixedRtt {
    /// Policy reporting `values`
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<NodeId>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(peer, rtt)| (peer.into(), rtt.clamp(0, UNREACHABLE_RTT_MS - 1)))
                .collect(),
        }
    }
}

impl RttPolicy for FixedRtt {
    fn sample(&self, peer: &str, elapsed: Duration) -> i32 {
        self.values
            .get(peer)
            .copied()
            .unwrap_or_else(|| to_millis(elapsed))
    }
}
