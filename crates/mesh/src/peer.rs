//! Peer records and the fixed peer table.
//!
//! The table is built once from the configured peer list and keeps
//! configuration order; records are mutated in place and never removed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use dcf_core::NodeId;

/// RTT sentinel marking a peer unreachable.
pub const UNREACHABLE_RTT_MS: i32 = i32::MAX;

/// Proximity group of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerGroup {
    /// Last RTT below the threshold
    Local,
    /// Last RTT at or above the threshold
    Remote,
    /// Failed or simulated as failed
    Unreachable,
    /// Never measured
    #[default]
    Unknown,
}

impl PeerGroup {
    /// Lowercase name, also used as the envelope `group_id`
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerGroup::Local => "local",
            PeerGroup::Remote => "remote",
            PeerGroup::Unreachable => "unreachable",
            PeerGroup::Unknown => "unknown",
        }
    }

    /// Classify an RTT sample against `threshold_ms`
    pub fn classify(rtt_ms: i32, threshold_ms: i32) -> Self {
        if rtt_ms < threshold_ms {
            PeerGroup::Local
        } else {
            PeerGroup::Remote
        }
    }
}

impl fmt::Display for PeerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State the engine keeps per configured peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Peer identifier
    pub id: NodeId,
    /// Last measured RTT; `None` until the first successful probe
    pub rtt_ms: Option<i32>,
    /// Current classification
    pub group: PeerGroup,
}

impl PeerRecord {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            rtt_ms: None,
            group: PeerGroup::Unknown,
        }
    }

    /// Whether the record has a usable measurement
    pub fn is_routable(&self) -> bool {
        self.group != PeerGroup::Unreachable
            && matches!(self.rtt_ms, Some(rtt) if rtt != UNREACHABLE_RTT_MS)
    }
}

/// Peer records in configuration order, indexed by id
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    records: Vec<PeerRecord>,
    index: HashMap<NodeId, usize>,
}

impl PeerTable {
    /// Create a table with one `Unknown` record per peer.
    ///
    /// Duplicate ids keep their first position.
    pub fn new<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let mut table = Self::default();
        for peer in peers {
            let id = peer.into();
            if table.index.contains_key(&id) {
                continue;
            }
            table.index.insert(id.clone(), table.records.len());
            table.records.push(PeerRecord::new(id));
        }
        table
    }

    /// Look up a record
    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut PeerRecord> {
        match self.index.get(id) {
            Some(&i) => self.records.get_mut(i),
            None => None,
        }
    }

    /// Whether `id` is configured
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Records in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.records.iter()
    }

    /// Peer ids in configuration order
    pub fn ids(&self) -> Vec<NodeId> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    /// Number of configured peers
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no peers are configured
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Store an RTT sample and reclassify; returns the new group
    pub fn record_rtt(&mut self, id: &str, rtt_ms: i32, threshold_ms: i32) -> Option<PeerGroup> {
        let record = self.get_mut(id)?;
        record.rtt_ms = Some(rtt_ms);
        record.group = PeerGroup::classify(rtt_ms, threshold_ms);
        Some(record.group)
    }

    /// Force the unreachable sentinel
    pub fn mark_unreachable(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.rtt_ms = Some(UNREACHABLE_RTT_MS);
                record.group = PeerGroup::Unreachable;
                true
            }
            None => false,
        }
    }

    /// Back to unmeasured / `Unknown`
    pub fn reset(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.rtt_ms = None;
                record.group = PeerGroup::Unknown;
                true
            }
            None => false,
        }
    }

    /// Reclassify every measured, reachable record against `threshold_ms`
    pub fn reclassify(&mut self, threshold_ms: i32) {
        for record in self.records.iter_mut().filter(|r| r.is_routable()) {
            if let Some(rtt) = record.rtt_ms {
                record.group = PeerGroup::classify(rtt, threshold_ms);
            }
        }
    }

    /// Owned copy of every record
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.records.clone()
    }
}
