// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fragment assembly for large samples.
//!
//! One assembly buffer per (writer, sequence number). Edge cases per the
//! protocol rules:
//! - a fragment for an already-completed or already-aborted sequence is
//!   dropped silently;
//! - a fragment for a new sequence while an older incomplete assembly
//!   shows no progress for `stale_timeout` causes that older assembly to
//!   be aborted.

use crate::core::guid::Guid;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Assembly {
    data: Vec<u8>,
    received: Vec<bool>,
    frag_size: usize,
    sample_size: usize,
    remaining: usize,
    last_progress: Instant,
}

/// Per-writer-proxy fragment reassembler.
pub struct FragmentAssembler {
    active: HashMap<(Guid, u64), Assembly>,
    /// Sequences already delivered or aborted; late fragments are dropped.
    finished: Vec<(Guid, u64)>,
    stale_timeout: Duration,
}

/// Outcome of feeding one DATAFRAG.
#[derive(Debug, PartialEq, Eq)]
pub enum FragOutcome {
    /// Sample fully reassembled.
    Complete(Vec<u8>),
    /// More fragments needed.
    Partial,
    /// Dropped (duplicate, late, or inconsistent).
    Dropped,
}

impl FragmentAssembler {
    #[must_use]
    pub fn new(stale_timeout: Duration) -> Self {
        FragmentAssembler {
            active: HashMap::new(),
            finished: Vec::new(),
            stale_timeout,
        }
    }

    /// Feed one DATAFRAG submessage worth of fragments.
    ///
    /// `frag_start` is 1-based per RTPS. `payload` holds
    /// `frags_in_submessage` consecutive fragments (the last may be short).
    pub fn on_frag(
        &mut self,
        writer: Guid,
        seq: u64,
        frag_start: u32,
        frags_in_submessage: u16,
        frag_size: u16,
        sample_size: u32,
        payload: &[u8],
        now: Instant,
    ) -> FragOutcome {
        if frag_start == 0 || frag_size == 0 || sample_size == 0 {
            return FragOutcome::Dropped;
        }
        let key = (writer, seq);
        if self.finished.contains(&key) {
            return FragOutcome::Dropped;
        }

        // a newer sequence starving out an old, stalled assembly
        self.abort_stale(now);

        let frag_size_u = frag_size as usize;
        let sample_size_u = sample_size as usize;
        let total_frags = sample_size_u.div_ceil(frag_size_u);

        let assembly = self.active.entry(key).or_insert_with(|| Assembly {
            data: vec![0u8; sample_size_u],
            received: vec![false; total_frags],
            frag_size: frag_size_u,
            sample_size: sample_size_u,
            remaining: total_frags,
            last_progress: now,
        });

        if assembly.frag_size != frag_size_u || assembly.sample_size != sample_size_u {
            // inconsistent writer: abandon the assembly
            log::debug!(
                "[Frag] inconsistent fragment parameters for {} seq {}",
                writer,
                seq
            );
            self.active.remove(&key);
            self.finished.push(key);
            return FragOutcome::Dropped;
        }

        let mut offset_in_payload = 0usize;
        for i in 0..frags_in_submessage {
            let frag_no = frag_start as usize + i as usize - 1;
            if frag_no >= assembly.received.len() {
                break;
            }
            let start = frag_no * assembly.frag_size;
            let len = assembly.frag_size.min(assembly.sample_size - start);
            let Some(chunk) = payload.get(offset_in_payload..offset_in_payload + len) else {
                break;
            };
            if !assembly.received[frag_no] {
                assembly.data[start..start + len].copy_from_slice(chunk);
                assembly.received[frag_no] = true;
                assembly.remaining -= 1;
                assembly.last_progress = now;
            }
            offset_in_payload += len;
        }

        if assembly.remaining == 0 {
            let done = self
                .active
                .remove(&key)
                .unwrap_or_else(|| unreachable!("assembly present"));
            self.finished.push(key);
            FragOutcome::Complete(done.data)
        } else {
            FragOutcome::Partial
        }
    }

    /// Fragment numbers still missing for one assembly (for NACKFRAG).
    #[must_use]
    pub fn missing_fragments(&self, writer: Guid, seq: u64) -> Vec<u32> {
        match self.active.get(&(writer, seq)) {
            Some(assembly) => assembly
                .received
                .iter()
                .enumerate()
                .filter(|(_, got)| !**got)
                .map(|(i, _)| i as u32 + 1)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Abort assemblies without progress for longer than the timeout.
    pub fn abort_stale(&mut self, now: Instant) -> usize {
        let stale: Vec<(Guid, u64)> = self
            .active
            .iter()
            .filter(|(_, a)| now.duration_since(a.last_progress) > self.stale_timeout)
            .map(|(k, _)| *k)
            .collect();
        for key in &stale {
            log::debug!("[Frag] aborting stale assembly seq {}", key.1);
            self.active.remove(key);
            self.finished.push(*key);
        }
        stale.len()
    }

    /// Forget a writer entirely (proxy removal).
    pub fn remove_writer(&mut self, writer: Guid) {
        self.active.retain(|(w, _), _| *w != writer);
        self.finished.retain(|(w, _)| *w != writer);
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{EntityId, GuidPrefix};

    fn writer() -> Guid {
        Guid::new(GuidPrefix([1; 12]), EntityId([0, 0, 1, 0x02]))
    }

    fn sample(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_in_order_assembly() {
        let mut asm = FragmentAssembler::new(Duration::from_millis(100));
        let data = sample(2500);
        let now = Instant::now();

        assert_eq!(
            asm.on_frag(writer(), 1, 1, 1, 1000, 2500, &data[0..1000], now),
            FragOutcome::Partial
        );
        assert_eq!(
            asm.on_frag(writer(), 1, 2, 1, 1000, 2500, &data[1000..2000], now),
            FragOutcome::Partial
        );
        match asm.on_frag(writer(), 1, 3, 1, 1000, 2500, &data[2000..2500], now) {
            FragOutcome::Complete(out) => assert_eq!(out, data),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_order_and_duplicate() {
        let mut asm = FragmentAssembler::new(Duration::from_millis(100));
        let data = sample(2000);
        let now = Instant::now();

        assert_eq!(
            asm.on_frag(writer(), 5, 2, 1, 1000, 2000, &data[1000..2000], now),
            FragOutcome::Partial
        );
        assert_eq!(asm.missing_fragments(writer(), 5), vec![1]);
        // duplicate of fragment 2 is ignored
        assert_eq!(
            asm.on_frag(writer(), 5, 2, 1, 1000, 2000, &data[1000..2000], now),
            FragOutcome::Partial
        );
        match asm.on_frag(writer(), 5, 1, 1, 1000, 2000, &data[0..1000], now) {
            FragOutcome::Complete(out) => assert_eq!(out, data),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_late_fragment_after_completion_dropped() {
        let mut asm = FragmentAssembler::new(Duration::from_millis(100));
        let data = sample(800);
        let now = Instant::now();
        assert!(matches!(
            asm.on_frag(writer(), 9, 1, 1, 1000, 800, &data, now),
            FragOutcome::Complete(_)
        ));
        assert_eq!(
            asm.on_frag(writer(), 9, 1, 1, 1000, 800, &data, now),
            FragOutcome::Dropped
        );
    }

    #[test]
    fn test_stale_assembly_aborted() {
        let mut asm = FragmentAssembler::new(Duration::from_millis(10));
        let data = sample(2000);
        let t0 = Instant::now();
        asm.on_frag(writer(), 1, 1, 1, 1000, 2000, &data[0..1000], t0);
        assert_eq!(asm.active_count(), 1);

        // a new sequence arrives much later; the old assembly is stale
        let t1 = t0 + Duration::from_millis(50);
        asm.on_frag(writer(), 2, 1, 1, 1000, 2000, &data[0..1000], t1);
        assert_eq!(asm.active_count(), 1);
        assert!(asm.missing_fragments(writer(), 1).is_empty());

        // late fragment for the aborted sequence: dropped
        assert_eq!(
            asm.on_frag(writer(), 1, 2, 1, 1000, 2000, &data[1000..2000], t1),
            FragOutcome::Dropped
        );
    }

    #[test]
    fn test_multi_frag_submessage() {
        let mut asm = FragmentAssembler::new(Duration::from_millis(100));
        let data = sample(3000);
        let now = Instant::now();
        // fragments 1+2 in one submessage, 3 in another
        assert_eq!(
            asm.on_frag(writer(), 3, 1, 2, 1000, 3000, &data[0..2000], now),
            FragOutcome::Partial
        );
        match asm.on_frag(writer(), 3, 3, 1, 1000, 3000, &data[2000..3000], now) {
            FragOutcome::Complete(out) => assert_eq!(out, data),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_writer_clears_state() {
        let mut asm = FragmentAssembler::new(Duration::from_millis(100));
        let data = sample(2000);
        asm.on_frag(writer(), 1, 1, 1, 1000, 2000, &data[0..1000], Instant::now());
        asm.remove_writer(writer());
        assert_eq!(asm.active_count(), 0);
    }
}
