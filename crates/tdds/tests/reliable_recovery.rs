// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable recovery under loss.
//!
//! Drives the writer and reader state machines directly through a lossy
//! in-memory link: DATA submessages are dropped with 50% probability for a
//! window, then the drop stops. Every sample published during the window
//! must eventually arrive, exactly once, in order.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tdds::cache::{CacheConfig, ChangeKind, HistoryCache};
use tdds::core::dbuf::DbChain;
use tdds::core::guid::{EntityId, Guid, GuidPrefix};
use tdds::core::time::Time;
use tdds::qos::Qos;
use tdds::reliability::{
    ReaderEvent, ReaderProxy, ReliabilityConfig, RtpsReader, RtpsWriter, WriterEvent, WriterProxy,
};

fn writer_guid() -> Guid {
    Guid::new(GuidPrefix([1; 12]), EntityId([0, 0, 1, 0x02]))
}

fn reader_guid() -> Guid {
    Guid::new(GuidPrefix([2; 12]), EntityId([0, 0, 1, 0x07]))
}

struct Harness {
    writer: RtpsWriter,
    reader: RtpsReader,
    cache: Arc<HistoryCache>,
    delivered: Vec<u64>,
    now: Instant,
}

impl Harness {
    fn new() -> Self {
        let mut cfg = ReliabilityConfig::default();
        cfg.hb_period_ms = 5;
        cfg.nack_resp_ms = 1;
        cfg.hb_resp_ms = 1;
        cfg.hb_supp_ms = 0;

        let cache = Arc::new(HistoryCache::new(CacheConfig::from_qos(&Qos::reliable())));
        let mut writer = RtpsWriter::new(writer_guid(), Arc::clone(&cache), cfg, false);
        writer.add_reader(ReaderProxy::new(reader_guid(), Vec::new(), Vec::new(), true));
        let mut reader = RtpsReader::new(reader_guid(), cfg);
        reader.add_writer(WriterProxy::new(writer_guid(), true, 0));

        Harness {
            writer,
            reader,
            cache,
            delivered: Vec::new(),
            now: Instant::now(),
        }
    }

    fn publish(&mut self, payload: Vec<u8>) -> u64 {
        let seq = self
            .cache
            .add_change(
                writer_guid(),
                ChangeKind::Alive,
                0,
                Vec::new(),
                DbChain::from_vec(payload),
                Time::now(),
            )
            .expect("add_change should succeed");
        self.writer.on_change_added(seq);
        seq
    }

    /// Run one exchange round; `drop_data` decides per-DATA loss.
    fn exchange(&mut self, drop_data: &mut dyn FnMut(u64) -> bool) {
        self.now += Duration::from_millis(6);

        // writer side: DATA + HEARTBEAT
        let mut reader_inputs: Vec<ReaderEvent> = Vec::new();
        for event in self.writer.poll(self.now) {
            match event {
                WriterEvent::SendData { change, .. } => {
                    if drop_data(change.seq) {
                        continue; // lost on the wire
                    }
                    reader_inputs.extend(self.reader.on_data(
                        tdds::reliability::reader::ReceivedSample {
                            writer: writer_guid(),
                            seq: change.seq,
                            payload: change.payload.to_vec(),
                            source_ts: change.source_ts,
                            key_only: false,
                        },
                    ));
                }
                WriterEvent::SendHeartbeat {
                    first_sn,
                    last_sn,
                    count,
                    final_flag,
                    ..
                } => {
                    reader_inputs.extend(self.reader.on_heartbeat(
                        writer_guid(),
                        first_sn,
                        last_sn,
                        count,
                        final_flag,
                        self.now,
                    ));
                }
                WriterEvent::SendGap {
                    gap_start,
                    sequences,
                    ..
                } => {
                    reader_inputs
                        .extend(self.reader.on_gap(writer_guid(), gap_start, &sequences));
                }
                WriterEvent::SendDataFrag { .. } => unreachable!("small samples only"),
            }
        }

        // reader timers: ACKNACKs travel back losslessly
        self.now += Duration::from_millis(3);
        reader_inputs.extend(self.reader.poll(self.now));

        for event in reader_inputs {
            match event {
                ReaderEvent::Deliver(sample) => self.delivered.push(sample.seq),
                ReaderEvent::SendAckNack {
                    base,
                    missing,
                    count,
                    ..
                } => {
                    self.writer
                        .on_acknack(reader_guid(), base, &missing, count, self.now);
                }
                ReaderEvent::SendNackFrag { .. } => {}
                ReaderEvent::SampleLost { seq, .. } => {
                    panic!("no sample may be lost on a recovering link (seq {})", seq)
                }
            }
        }
    }
}

#[test]
fn every_sample_delivered_exactly_once_after_loss_window() {
    let mut harness = Harness::new();
    let total = 200u64;

    // deterministic "50%" drop pattern during the loss window
    let mut drop_phase = true;
    let mut toggle = false;

    for i in 0..total {
        harness.publish(vec![i as u8]);
        let mut dropper = |seq: u64| {
            if !drop_phase {
                return false;
            }
            toggle = !toggle;
            toggle && seq % 2 == 0
        };
        harness.exchange(&mut dropper);
        if i == 150 {
            drop_phase = false;
        }
    }

    // recovery rounds with no further loss
    let mut no_drop = |_seq: u64| false;
    for _ in 0..200 {
        harness.exchange(&mut no_drop);
        if harness.delivered.len() as u64 == total {
            break;
        }
    }

    assert_eq!(
        harness.delivered.len() as u64,
        total,
        "total delivered must equal total written"
    );
    // exactly once, in writer order
    let expected: Vec<u64> = (1..=total).collect();
    assert_eq!(harness.delivered, expected);
}

#[test]
fn acked_samples_leave_the_writer_cache() {
    let mut harness = Harness::new();
    for i in 0..20u64 {
        harness.publish(vec![i as u8]);
    }
    let mut no_drop = |_seq: u64| false;
    for _ in 0..50 {
        harness.exchange(&mut no_drop);
        if harness.cache.is_empty() {
            break;
        }
    }
    // ack base reached 21: nothing below it may remain cached
    assert!(harness.cache.is_empty(), "acked changes must be retired");
    assert_eq!(harness.delivered.len(), 20);
}

#[test]
fn duplicate_data_is_never_delivered_twice() {
    let mut harness = Harness::new();
    harness.publish(vec![1]);

    // duplicate every DATA instead of dropping
    let mut first = true;
    for _ in 0..10 {
        harness.exchange(&mut |_seq| false);
        if first {
            // replay the same DATA submessage manually
            let dup = harness.reader.on_data(tdds::reliability::reader::ReceivedSample {
                writer: writer_guid(),
                seq: 1,
                payload: vec![1],
                source_ts: Time::now(),
                key_only: false,
            });
            assert!(dup.is_empty(), "duplicate must be dropped");
            first = false;
        }
    }
    assert_eq!(harness.delivered, vec![1]);
}
