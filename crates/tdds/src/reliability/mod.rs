// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliability protocol engine.
//!
//! The writer and reader state machines are explicit and event-driven: each
//! ingest method mutates proxy state, and `poll(now)` returns the wire
//! actions (DATA, HEARTBEAT, ACKNACK, GAP, DATAFRAG, NACKFRAG) due at that
//! instant. The dispatcher thread drives `poll` and hands the events to
//! the transport.

/// Fragment assembly for DATAFRAG streams.
pub mod fragment;
/// Reliable/best-effort reader state machine.
pub mod reader;
/// Reliable writer state machine.
pub mod writer;

pub use fragment::FragmentAssembler;
pub use reader::{ReaderEvent, RtpsReader, WriterProxy};
pub use writer::{ReaderProxy, RtpsWriter, WriterEvent};

use std::ops::Range;

/// Timing knobs shared by both state machines, loaded from the RTPS config
/// group.
#[derive(Debug, Clone, Copy)]
pub struct ReliabilityConfig {
    pub hb_period_ms: u64,
    pub nack_resp_ms: u64,
    pub nack_supp_ms: u64,
    pub hb_resp_ms: u64,
    pub hb_supp_ms: u64,
    pub msg_size: usize,
    pub frag_size: usize,
    pub frag_burst: usize,
    pub frag_delay_ms: u64,
    pub sl_retries: u32,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        ReliabilityConfig {
            hb_period_ms: 100,
            nack_resp_ms: 10,
            nack_supp_ms: 0,
            hb_resp_ms: 5,
            hb_supp_ms: 25,
            msg_size: 1452,
            frag_size: 1344,
            frag_burst: 16,
            frag_delay_ms: 0,
            sl_retries: 4,
        }
    }
}

impl ReliabilityConfig {
    /// Load from the RTPS config group.
    #[must_use]
    pub fn from_config(store: &crate::config::ParamStore) -> Self {
        use crate::config::Group;
        let d = ReliabilityConfig::default();
        let num = |name: &str, fallback: u64| {
            store
                .get_num(Group::Rtps, name)
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(fallback)
        };
        ReliabilityConfig {
            hb_period_ms: num("HB_TIME", d.hb_period_ms),
            nack_resp_ms: num("NACK_RESP_TIME", d.nack_resp_ms),
            nack_supp_ms: num("NACK_SUPP_TIME", d.nack_supp_ms),
            hb_resp_ms: num("HB_RESP_TIME", d.hb_resp_ms),
            hb_supp_ms: num("HB_SUPP_TIME", d.hb_supp_ms),
            msg_size: num("MSG_SIZE", d.msg_size as u64) as usize,
            frag_size: num("FRAG_SIZE", d.frag_size as u64) as usize,
            frag_burst: num("FRAG_BURST", d.frag_burst as u64) as usize,
            frag_delay_ms: num("FRAG_DELAY", d.frag_delay_ms),
            sl_retries: num("SL_RETRIES", u64::from(d.sl_retries)) as u32,
        }
    }
}

/// Merge a sorted iterator of sequence numbers into contiguous ranges.
#[must_use]
pub fn to_ranges(sorted: &[u64]) -> Vec<Range<u64>> {
    let mut out: Vec<Range<u64>> = Vec::new();
    for &seq in sorted {
        match out.last_mut() {
            Some(last) if last.end == seq => last.end = seq + 1,
            _ => out.push(seq..seq + 1),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_ranges_merges_contiguous() {
        assert_eq!(to_ranges(&[1, 2, 3, 7, 8, 12]), vec![1..4, 7..9, 12..13]);
        assert!(to_ranges(&[]).is_empty());
    }

    #[test]
    fn test_config_from_store() {
        let store = crate::config::ParamStore::new();
        store.set_text(crate::config::Group::Rtps, "HB_TIME", "250");
        store.set_text(crate::config::Group::Rtps, "FRAG_SIZE", "512");
        let cfg = ReliabilityConfig::from_config(&store);
        assert_eq!(cfg.hb_period_ms, 250);
        assert_eq!(cfg.frag_size, 512);
        assert_eq!(cfg.nack_resp_ms, 10);
    }
}
