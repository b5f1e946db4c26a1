//! Next-hop selection over the peer table.
//!
//! Both policies skip the logical recipient, unmeasured peers and peers at
//! the unreachable sentinel. Ties go to the peer configured first.

use crate::peer::{PeerRecord, PeerTable};

fn candidates<'a>(
    table: &'a PeerTable,
    recipient: &'a str,
) -> impl Iterator<Item = (&'a PeerRecord, i32)> + 'a {
    table
        .iter()
        .filter(move |record| record.id != recipient && record.is_routable())
        .filter_map(|record| record.rtt_ms.map(|rtt| (record, rtt)))
}

/// Lowest-RTT peer other than `recipient`, ignoring the threshold
pub fn select_optimal<'a>(table: &'a PeerTable, recipient: &'a str) -> Option<&'a PeerRecord> {
    // min_by_key keeps the first of equal minima
    candidates(table, recipient)
        .min_by_key(|(_, rtt)| *rtt)
        .map(|(record, _)| record)
}

/// Lowest-RTT peer other than `recipient` strictly below `threshold_ms`
pub fn select_alternate<'a>(
    table: &'a PeerTable,
    recipient: &'a str,
    threshold_ms: i32,
) -> Option<&'a PeerRecord> {
    candidates(table, recipient)
        .filter(|(_, rtt)| *rtt < threshold_ms)
        .min_by_key(|(_, rtt)| *rtt)
        .map(|(record, _)| record)
}
