// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! History cache invariants: KEEP_LAST depth, KEEP_ALL blocking bounds,
//! take/return-loan bookkeeping and refcount-based change lifetime.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tdds::cache::{CacheConfig, Change, ChangeKind, HistoryCache, SampleState};
use tdds::core::dbuf::DbChain;
use tdds::core::guid::{EntityId, Guid, GuidPrefix};
use tdds::core::time::Time;
use tdds::dds::read_condition::{ANY_INSTANCE_STATE, ANY_SAMPLE_STATE, ANY_VIEW_STATE};
use tdds::dds::Error;
use tdds::qos::{
    DestinationOrderKind, History, Qos, Reliability, ReliabilityKind, ResourceLimits,
};

fn guid(n: u8) -> Guid {
    Guid::new(GuidPrefix([n; 12]), EntityId([0, 0, n, 0x02]))
}

fn writer_cache(history: History, max_samples: u32, blocking_ms: u64) -> HistoryCache {
    let qos = Qos {
        history,
        resource_limits: ResourceLimits {
            max_samples,
            ..ResourceLimits::default()
        },
        reliability: Reliability {
            kind: ReliabilityKind::Reliable,
            max_blocking_time: tdds::core::time::Duration::from_millis(blocking_ms),
        },
        ..Qos::default()
    };
    HistoryCache::new(CacheConfig::from_qos(&qos))
}

fn add(cache: &HistoryCache, instance: u64) -> u64 {
    cache
        .add_change(
            guid(1),
            ChangeKind::Alive,
            instance,
            Vec::new(),
            DbChain::from_vec(vec![0xEE; 8]),
            Time::now(),
        )
        .expect("add_change should succeed")
}

#[test]
fn keep_last_bounds_alive_changes_per_instance() {
    let cache = writer_cache(History::KeepLast(3), u32::MAX, 10);
    for _ in 0..10 {
        add(&cache, 42);
        // invariant 3: never more than D alive changes for the instance
        assert!(cache.len() <= 3);
    }
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.first_seq(), Some(8));
    assert_eq!(cache.last_seq(), Some(10));
}

#[test]
fn keep_all_blocks_for_max_blocking_time_then_times_out() {
    let cache = writer_cache(History::KeepAll, 2, 40);
    add(&cache, 0);
    add(&cache, 0);

    let start = Instant::now();
    let err = cache
        .add_change(
            guid(1),
            ChangeKind::Alive,
            0,
            Vec::new(),
            DbChain::from_vec(vec![1]),
            Time::now(),
        )
        .expect_err("full cache with no acks must time out");
    let waited = start.elapsed();
    assert!(matches!(err, Error::Timeout));
    assert!(waited >= Duration::from_millis(40));
    assert!(waited < Duration::from_millis(400));
}

#[test]
fn keep_all_write_succeeds_when_ack_frees_space_before_deadline() {
    let cache = Arc::new(writer_cache(History::KeepAll, 2, 500));
    add(&cache, 0);
    add(&cache, 0);

    let cache2 = Arc::clone(&cache);
    let acker = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(40));
        cache2.remove_acknowledged(1);
    });

    let seq = add(&cache, 0);
    assert_eq!(seq, 3);
    acker.join().expect("acker thread");
}

#[test]
fn ack_purge_retires_everything_below_base() {
    let cache = writer_cache(History::KeepAll, u32::MAX, 10);
    for _ in 0..10 {
        add(&cache, 0);
    }
    // invariant 4: ack base N means nothing below N stays cached
    assert_eq!(cache.remove_acknowledged(7), 7);
    assert_eq!(cache.first_seq(), Some(8));
    for seq in 1..=7 {
        assert!(cache.get_change(seq).is_none());
    }
}

#[test]
fn change_freed_only_at_zero_refcount() {
    let cache = writer_cache(History::KeepAll, u32::MAX, 10);
    add(&cache, 0);

    let held = cache.get_change(1).expect("change present");
    cache.remove_change(1);

    // invariant 2: the proxy's reference keeps the payload alive
    assert_eq!(Arc::strong_count(&held), 1);
    assert_eq!(held.payload.to_vec(), vec![0xEE; 8]);
}

#[test]
fn take_then_reread_restores_invariants() {
    let qos = Qos::default();
    let cache = HistoryCache::new(CacheConfig::from_qos(&qos));
    let change = Arc::new(Change {
        seq: 1,
        writer: guid(1),
        instance: 0,
        key: Vec::new(),
        kind: ChangeKind::Alive,
        payload: DbChain::from_vec(vec![7]),
        source_ts: Time::now(),
        arrival_ts: Time::now(),
    });
    cache.receive_change(change, 0).expect("receive");

    let taken = cache.take(ANY_SAMPLE_STATE, ANY_VIEW_STATE, ANY_INSTANCE_STATE, 16);
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].sample_state, SampleState::NotRead);
    assert!(cache.is_empty());
    assert_eq!(cache.instance_count(), 0);

    // returning the loan = dropping the entries; the cache stays consistent
    drop(taken);
    assert!(cache
        .take(ANY_SAMPLE_STATE, ANY_VIEW_STATE, ANY_INSTANCE_STATE, 16)
        .is_empty());
}

#[test]
fn source_timestamp_ordering() {
    let qos = Qos {
        destination_order: tdds::qos::DestinationOrder {
            kind: DestinationOrderKind::BySourceTimestamp,
        },
        ..Qos::default()
    };
    let cache = HistoryCache::new(CacheConfig::from_qos(&qos));

    let mk = |seq: u64, writer: u8, nanos: u64| {
        Arc::new(Change {
            seq,
            writer: guid(writer),
            instance: seq, // distinct instances: cross-instance ordering applies
            key: Vec::new(),
            kind: ChangeKind::Alive,
            payload: DbChain::from_vec(vec![seq as u8]),
            source_ts: Time::from_nanos(nanos),
            arrival_ts: Time::now(),
        })
    };

    // arrival order disagrees with source order
    cache
        .receive_change(mk(1, 1, 2_000_000_000), 0)
        .expect("receive");
    cache
        .receive_change(mk(2, 2, 1_000_000_000), 0)
        .expect("receive");

    let out = cache.read(ANY_SAMPLE_STATE, ANY_VIEW_STATE, ANY_INSTANCE_STATE, 16);
    let stamps: Vec<u64> = out.iter().map(|e| e.change.source_ts.to_nanos()).collect();
    assert!(stamps[0] < stamps[1], "delivery must follow source time");
}
