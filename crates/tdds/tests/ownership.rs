// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! EXCLUSIVE ownership arbitration.
//!
//! Two writers publish the same instance with strengths 10 and 20: the
//! reader delivers only the stronger writer's samples. When the stronger
//! writer goes not-alive, the weaker one takes over. Equal strengths fall
//! back to the lexicographically greater GuidPrefix.

use std::sync::Arc;
use tdds::cache::{CacheConfig, Change, ChangeKind, HistoryCache};
use tdds::core::dbuf::DbChain;
use tdds::core::guid::{EntityId, Guid, GuidPrefix};
use tdds::core::time::Time;
use tdds::dds::read_condition::{ANY_INSTANCE_STATE, ANY_SAMPLE_STATE, ANY_VIEW_STATE};
use tdds::qos::{Ownership, OwnershipKind, Qos};

const INSTANCE: u64 = 0xBEEF;

fn writer(n: u8) -> Guid {
    Guid::new(GuidPrefix([n; 12]), EntityId([0, 0, n, 0x02]))
}

fn exclusive_cache() -> HistoryCache {
    let qos = Qos {
        ownership: Ownership {
            kind: OwnershipKind::Exclusive,
        },
        history: tdds::qos::History::KeepLast(8),
        ..Qos::default()
    };
    HistoryCache::new(CacheConfig::from_qos(&qos))
}

fn sample(w: Guid, seq: u64, tag: u8) -> Arc<Change> {
    Arc::new(Change {
        seq,
        writer: w,
        instance: INSTANCE,
        key: vec![0xBE, 0xEF],
        kind: ChangeKind::Alive,
        payload: DbChain::from_vec(vec![tag]),
        source_ts: Time::now(),
        arrival_ts: Time::now(),
    })
}

fn delivered_tags(cache: &HistoryCache) -> Vec<u8> {
    cache
        .take(ANY_SAMPLE_STATE, ANY_VIEW_STATE, ANY_INSTANCE_STATE, 64)
        .iter()
        .map(|e| e.change.payload.to_vec()[0])
        .collect()
}

#[test]
fn stronger_writer_wins() {
    let cache = exclusive_cache();
    let strong = writer(2);
    let weak = writer(1);

    // strength 20 writer arrives first and owns the instance
    assert!(cache.receive_change(sample(strong, 1, 0xAA), 20).expect("rx"));
    // strength 10 samples are suppressed
    assert!(!cache.receive_change(sample(weak, 1, 0xBB), 10).expect("rx"));
    assert!(!cache.receive_change(sample(weak, 2, 0xBB), 10).expect("rx"));
    assert!(cache.receive_change(sample(strong, 2, 0xAA), 20).expect("rx"));

    assert_eq!(delivered_tags(&cache), vec![0xAA, 0xAA]);
}

#[test]
fn weaker_writer_takes_over_when_owner_dies() {
    let cache = exclusive_cache();
    let strong = writer(2);
    let weak = writer(1);

    assert!(cache.receive_change(sample(strong, 1, 0xAA), 20).expect("rx"));
    assert!(!cache.receive_change(sample(weak, 1, 0xBB), 10).expect("rx"));

    // the strength-20 writer is deleted / loses liveliness
    cache.writer_not_alive(strong);

    // the strength-10 writer's samples become visible
    assert!(cache.receive_change(sample(weak, 2, 0xBB), 10).expect("rx"));
    let tags = delivered_tags(&cache);
    assert!(tags.contains(&0xAA));
    assert!(tags.contains(&0xBB));
}

#[test]
fn stronger_late_joiner_steals_ownership() {
    let cache = exclusive_cache();
    let weak = writer(1);
    let strong = writer(2);

    assert!(cache.receive_change(sample(weak, 1, 0xBB), 10).expect("rx"));
    // a stronger writer appears: it takes the instance over
    assert!(cache.receive_change(sample(strong, 1, 0xAA), 20).expect("rx"));
    // and the weaker one is now suppressed
    assert!(!cache.receive_change(sample(weak, 2, 0xBB), 10).expect("rx"));
}

#[test]
fn equal_strength_tie_breaks_on_guid_prefix() {
    let cache = exclusive_cache();
    let low = writer(1);
    let high = writer(9); // lexicographically greater prefix

    assert!(cache.receive_change(sample(low, 1, 0x01), 15).expect("rx"));
    // same strength, greater prefix: takes over
    assert!(cache.receive_change(sample(high, 1, 0x09), 15).expect("rx"));
    // the lesser prefix is suppressed from here on
    assert!(!cache.receive_change(sample(low, 2, 0x01), 15).expect("rx"));
}

#[test]
fn shared_ownership_delivers_everything() {
    let qos = Qos {
        history: tdds::qos::History::KeepLast(8),
        ..Qos::default()
    };
    let cache = HistoryCache::new(CacheConfig::from_qos(&qos));
    assert!(cache.receive_change(sample(writer(1), 1, 0x01), 10).expect("rx"));
    assert!(cache.receive_change(sample(writer(2), 1, 0x02), 20).expect("rx"));
    assert_eq!(delivered_tags(&cache).len(), 2);
}
