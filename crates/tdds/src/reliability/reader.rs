// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side reliability state machine.
//!
//! One `WriterProxy` per matched writer tracks
//! `(earliest_missing, highest_received, missing_set)`. DATA fills or
//! extends the missing set; HEARTBEAT extends it and, unless the Final bit
//! is set, schedules an ACKNACK after `hb_resp_time` (suppressed within
//! `hb_supp_time` of the previous one). GAP retires sequences that will
//! never arrive. Delivery hands out the dense prefix only: a reliable
//! reader never delivers around a hole.
//!
//! Best-effort proxies skip the ACKNACK machinery entirely; samples older
//! than the newest delivered are dropped.

use super::fragment::{FragOutcome, FragmentAssembler};
use super::ReliabilityConfig;
use crate::core::guid::Guid;
use crate::core::time::Time;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// A sample as it leaves the protocol layer toward the reader cache.
#[derive(Debug, Clone)]
pub struct ReceivedSample {
    pub writer: Guid,
    pub seq: u64,
    pub payload: Vec<u8>,
    pub source_ts: Time,
    /// Serialized-key sample (dispose/unregister path).
    pub key_only: bool,
}

/// Wire/application action produced by the reader machine.
#[derive(Debug)]
pub enum ReaderEvent {
    /// Hand a sample to the reader cache, in order.
    Deliver(ReceivedSample),
    /// Send an ACKNACK to the writer.
    SendAckNack {
        writer: Guid,
        base: u64,
        missing: Vec<u64>,
        count: u32,
        final_flag: bool,
    },
    /// Request missing fragments of one sample.
    SendNackFrag {
        writer: Guid,
        seq: u64,
        fragments: Vec<u32>,
        count: u32,
    },
    /// A sample is definitively lost (reliability exhausted or GAP'd away
    /// after partial arrival).
    SampleLost { writer: Guid, seq: u64 },
}

/// The reader's view of one matched writer.
pub struct WriterProxy {
    pub guid: Guid,
    pub reliable: bool,
    /// Ownership strength the writer advertised (EXCLUSIVE arbitration).
    pub strength: i32,
    /// Everything at or below this was delivered to the cache.
    delivered: u64,
    /// Highest sequence number seen or announced.
    highest: u64,
    /// Sequences between `delivered` and `highest` not yet received.
    missing: BTreeSet<u64>,
    /// Received but not yet deliverable (hole below them).
    pending: BTreeMap<u64, ReceivedSample>,
    last_hb_count: Option<u32>,
    acknack_count: u32,
    nackfrag_count: u32,
    /// When the pending ACKNACK is due (hb_resp_time coalescing).
    ack_due: Option<Instant>,
    last_ack_sent: Option<Instant>,
    /// NACKFRAG retries per incomplete sample (sl_retries bound).
    frag_retries: HashMap<u64, u32>,
}

impl WriterProxy {
    #[must_use]
    pub fn new(guid: Guid, reliable: bool, strength: i32) -> Self {
        WriterProxy {
            guid,
            reliable,
            strength,
            delivered: 0,
            highest: 0,
            missing: BTreeSet::new(),
            pending: BTreeMap::new(),
            last_hb_count: None,
            acknack_count: 0,
            nackfrag_count: 0,
            ack_due: None,
            last_ack_sent: None,
            frag_retries: HashMap::new(),
        }
    }

    /// Highest sequence delivered in order.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Earliest missing sequence, if any.
    #[must_use]
    pub fn earliest_missing(&self) -> Option<u64> {
        self.missing.iter().next().copied()
    }

    /// Snapshot of the missing set.
    #[must_use]
    pub fn missing_set(&self) -> Vec<u64> {
        self.missing.iter().copied().collect()
    }

    fn drain_deliverable(&mut self, out: &mut Vec<ReaderEvent>) {
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() == self.delivered + 1 {
                let sample = entry.remove();
                self.delivered += 1;
                out.push(ReaderEvent::Deliver(sample));
            } else {
                break;
            }
        }
    }
}

/// The reader-side engine for one local reader.
pub struct RtpsReader {
    pub guid: Guid,
    proxies: HashMap<Guid, WriterProxy>,
    cfg: ReliabilityConfig,
    assembler: FragmentAssembler,
}

impl RtpsReader {
    #[must_use]
    pub fn new(guid: Guid, cfg: ReliabilityConfig) -> Self {
        let stale = Duration::from_millis(cfg.hb_resp_ms.max(1) * 4);
        RtpsReader {
            guid,
            proxies: HashMap::new(),
            cfg,
            assembler: FragmentAssembler::new(stale),
        }
    }

    pub fn add_writer(&mut self, proxy: WriterProxy) {
        log::debug!("[RtpsReader] {} matched writer {}", self.guid, proxy.guid);
        self.proxies.insert(proxy.guid, proxy);
    }

    pub fn remove_writer(&mut self, writer: &Guid) -> bool {
        self.assembler.remove_writer(*writer);
        self.proxies.remove(writer).is_some()
    }

    #[must_use]
    pub fn proxy(&self, writer: &Guid) -> Option<&WriterProxy> {
        self.proxies.get(writer)
    }

    #[must_use]
    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Ingest a DATA submessage.
    #[must_use]
    pub fn on_data(&mut self, sample: ReceivedSample) -> Vec<ReaderEvent> {
        let mut out = Vec::new();
        let Some(proxy) = self.proxies.get_mut(&sample.writer) else {
            return out; // unmatched writer: drop
        };
        let seq = sample.seq;

        if !proxy.reliable {
            // best-effort: anything at or behind the newest delivered
            // sample is outside the reordering window and dropped
            if seq <= proxy.delivered {
                return out;
            }
            proxy.highest = proxy.highest.max(seq);
            proxy.delivered = seq;
            out.push(ReaderEvent::Deliver(sample));
            return out;
        }

        if seq <= proxy.delivered || proxy.pending.contains_key(&seq) {
            return out; // duplicate
        }

        if seq > proxy.highest {
            // extend the missing set with the hole we just discovered
            for s in (proxy.highest.max(proxy.delivered) + 1)..seq {
                proxy.missing.insert(s);
            }
            proxy.highest = seq;
        }
        proxy.missing.remove(&seq);
        proxy.pending.insert(seq, sample);
        proxy.drain_deliverable(&mut out);
        out
    }

    /// Ingest a HEARTBEAT.
    #[must_use]
    pub fn on_heartbeat(
        &mut self,
        writer: Guid,
        first_sn: u64,
        last_sn: u64,
        count: u32,
        final_flag: bool,
        now: Instant,
    ) -> Vec<ReaderEvent> {
        let mut out = Vec::new();
        let hb_supp = Duration::from_millis(self.cfg.hb_supp_ms);
        let Some(proxy) = self.proxies.get_mut(&writer) else {
            return out;
        };
        if let Some(last) = proxy.last_hb_count {
            if count <= last {
                return out; // replayed heartbeat
            }
        }
        proxy.last_hb_count = Some(count);

        // sequences below first_sn are unrecoverable: the writer purged them
        if first_sn > proxy.delivered + 1 {
            for s in (proxy.delivered + 1)..first_sn {
                if proxy.missing.remove(&s) || !proxy.pending.contains_key(&s) {
                    out.push(ReaderEvent::SampleLost { writer, seq: s });
                }
            }
            // skip forward over what is gone
            while proxy.delivered + 1 < first_sn {
                if let Some(sample) = proxy.pending.remove(&(proxy.delivered + 1)) {
                    out.push(ReaderEvent::Deliver(sample));
                }
                proxy.delivered += 1;
            }
            proxy.drain_deliverable(&mut out);
        }

        if last_sn > proxy.highest {
            for s in (proxy.highest.max(proxy.delivered) + 1)..=last_sn {
                if !proxy.pending.contains_key(&s) {
                    proxy.missing.insert(s);
                }
            }
            proxy.highest = last_sn;
        }

        // schedule an ACKNACK unless the writer asked for silence
        let must_respond = !final_flag || !proxy.missing.is_empty();
        if must_respond && proxy.ack_due.is_none() {
            let suppressed = proxy
                .last_ack_sent
                .is_some_and(|at| now.duration_since(at) < hb_supp);
            if !suppressed {
                proxy.ack_due = Some(now + Duration::from_millis(self.cfg.hb_resp_ms));
            }
        }
        out
    }

    /// Ingest a GAP: the listed sequences will never arrive.
    #[must_use]
    pub fn on_gap(&mut self, writer: Guid, gap_start: u64, sequences: &[u64]) -> Vec<ReaderEvent> {
        let mut out = Vec::new();
        let Some(proxy) = self.proxies.get_mut(&writer) else {
            return out;
        };
        let mut gone: BTreeSet<u64> = sequences.iter().copied().collect();
        gone.insert(gap_start);
        for &seq in &gone {
            proxy.missing.remove(&seq);
            proxy.highest = proxy.highest.max(seq);
        }
        // advance over leading gapped sequences
        while gone.contains(&(proxy.delivered + 1)) {
            proxy.delivered += 1;
        }
        proxy.drain_deliverable(&mut out);
        out
    }

    /// Ingest a DATAFRAG; a completed sample re-enters through `on_data`.
    #[must_use]
    pub fn on_datafrag(
        &mut self,
        writer: Guid,
        seq: u64,
        frag_start: u32,
        frags_in_submessage: u16,
        frag_size: u16,
        sample_size: u32,
        payload: &[u8],
        source_ts: Time,
        now: Instant,
    ) -> Vec<ReaderEvent> {
        if !self.proxies.contains_key(&writer) {
            return Vec::new();
        }
        match self.assembler.on_frag(
            writer,
            seq,
            frag_start,
            frags_in_submessage,
            frag_size,
            sample_size,
            payload,
            now,
        ) {
            FragOutcome::Complete(data) => {
                if let Some(proxy) = self.proxies.get_mut(&writer) {
                    proxy.frag_retries.remove(&seq);
                }
                self.on_data(ReceivedSample {
                    writer,
                    seq,
                    payload: data,
                    source_ts,
                    key_only: false,
                })
            }
            FragOutcome::Partial | FragOutcome::Dropped => Vec::new(),
        }
    }

    /// Ingest a HEARTBEATFRAG: request what is still missing, bounded by
    /// `sl_retries` before the sample is declared lost.
    #[must_use]
    pub fn on_heartbeatfrag(&mut self, writer: Guid, seq: u64, _last_frag: u32) -> Vec<ReaderEvent> {
        let missing = self.assembler.missing_fragments(writer, seq);
        let sl_retries = self.cfg.sl_retries;
        let Some(proxy) = self.proxies.get_mut(&writer) else {
            return Vec::new();
        };
        if missing.is_empty() {
            return Vec::new();
        }
        let retries = proxy.frag_retries.entry(seq).or_insert(0);
        if *retries >= sl_retries {
            proxy.frag_retries.remove(&seq);
            proxy.missing.remove(&seq);
            // skip the unrecoverable sample
            if proxy.delivered + 1 == seq {
                proxy.delivered = seq;
            }
            return vec![ReaderEvent::SampleLost { writer, seq }];
        }
        *retries += 1;
        proxy.nackfrag_count += 1;
        vec![ReaderEvent::SendNackFrag {
            writer,
            seq,
            fragments: missing,
            count: proxy.nackfrag_count,
        }]
    }

    /// Drive timers: due ACKNACKs and stale fragment assemblies.
    #[must_use]
    pub fn poll(&mut self, now: Instant) -> Vec<ReaderEvent> {
        let mut out = Vec::new();
        self.assembler.abort_stale(now);

        for proxy in self.proxies.values_mut() {
            let due = proxy.ack_due.is_some_and(|at| at <= now);
            if !due {
                continue;
            }
            proxy.ack_due = None;
            proxy.last_ack_sent = Some(now);
            proxy.acknack_count += 1;

            let base = proxy
                .missing
                .iter()
                .next()
                .copied()
                .unwrap_or(proxy.highest.max(proxy.delivered) + 1);
            // bitmap can only describe 256 sequences above the base
            let missing: Vec<u64> = proxy
                .missing
                .iter()
                .copied()
                .take_while(|s| *s < base + 256)
                .collect();
            out.push(ReaderEvent::SendAckNack {
                writer: proxy.guid,
                base,
                missing,
                count: proxy.acknack_count,
                final_flag: proxy.missing.is_empty(),
            });
        }
        out
    }

    /// Next timer deadline (dispatcher sleep hint).
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.proxies.values().filter_map(|p| p.ack_due).min()
    }
}
