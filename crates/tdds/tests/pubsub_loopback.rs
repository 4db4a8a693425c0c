// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end publish/subscribe between two participants in one process.
//!
//! Discovery is bootstrapped by carrying the SPDP announcements over the
//! test harness (multicast is unreliable in CI containers); everything
//! after that - SEDP, matching, user data, acknowledgments - flows over
//! real UDP unicast through each participant's dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tdds::config::{Group, ParamStore};
use tdds::dds::read_condition::{ANY_INSTANCE_STATE, ANY_SAMPLE_STATE, ANY_VIEW_STATE};
use tdds::xtypes::{DynamicValue, Extensibility, Field, StructType, TypeCode, TypeDescriptor};
use tdds::{DomainParticipant, Qos};

fn shape_type() -> TypeDescriptor {
    let field = |name: &str, id: u32, code: TypeCode, key: bool| Field {
        name: name.to_string(),
        id,
        offset: 0,
        code,
        key,
    };
    TypeDescriptor::for_struct(StructType {
        name: "ShapeType".to_string(),
        extensibility: Extensibility::Final,
        fields: vec![
            field("color", 0, TypeCode::String(Some(128)), true),
            field("x", 1, TypeCode::Long, false),
            field("y", 2, TypeCode::Long, false),
            field("shapesize", 3, TypeCode::Long, false),
        ],
    })
}

fn shape(color: &str, x: i32, y: i32, size: i32) -> DynamicValue {
    DynamicValue::Struct(vec![
        DynamicValue::String(color.to_string()),
        DynamicValue::Long(x),
        DynamicValue::Long(y),
        DynamicValue::Long(size),
    ])
}

fn participant(name: &str, domain: u32) -> DomainParticipant {
    let store = Arc::new(ParamStore::new());
    store.set_text(Group::Rtps, "LEASE_TIME", "2000");
    store.set_text(Group::Rtps, "RESEND_TIME", "300");
    DomainParticipant::builder(name)
        .domain_id(domain)
        .config(store)
        .build()
        .expect("participant should start")
}

/// Cross-feed SPDP announcements until both sides know each other.
fn bootstrap(a: &DomainParticipant, b: &DomainParticipant) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        b.runtime().handle_datagram(&a.runtime().spdp_announcement());
        a.runtime().handle_datagram(&b.runtime().spdp_announcement());
        if a.peer_count() == 1 && b.peer_count() == 1 {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("participants failed to discover each other");
}

fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("timed out waiting for {}", what);
}

#[test]
fn discovery_matching_and_reliable_delivery() {
    let a = participant("pub_side", 150);
    let b = participant("sub_side", 150);

    a.register_type(shape_type()).expect("register");
    b.register_type(shape_type()).expect("register");

    let topic_a = a
        .create_topic("Square", "ShapeType", Qos::reliable())
        .expect("topic");
    let topic_b = b
        .create_topic("Square", "ShapeType", Qos::reliable())
        .expect("topic");

    let writer = a.create_writer(&topic_a, Qos::reliable()).expect("writer");
    let reader = b.create_reader(&topic_b, Qos::reliable()).expect("reader");

    bootstrap(&a, &b);

    // matching flows over real SEDP traffic
    wait_until("subscription match", Duration::from_secs(10), || {
        reader
            .subscription_matched_status()
            .map(|s| s.current_count >= 1)
            .unwrap_or(false)
    });
    wait_until("publication match", Duration::from_secs(10), || {
        writer
            .publication_matched_status()
            .map(|s| s.current_count >= 1)
            .unwrap_or(false)
    });

    // publish a burst; reliability must deliver every sample
    let total = 25;
    for i in 0..total {
        writer
            .write_dynamic(&shape("Red", 10 + i, 50, 30), None)
            .expect("write");
        std::thread::sleep(Duration::from_millis(5));
    }

    let mut received = Vec::new();
    wait_until("all samples", Duration::from_secs(15), || {
        if let Ok(samples) = reader.take(
            ANY_SAMPLE_STATE,
            ANY_VIEW_STATE,
            ANY_INSTANCE_STATE,
            usize::MAX,
        ) {
            for s in samples {
                let DynamicValue::Struct(fields) = s.data.expect("decoded sample") else {
                    panic!("expected struct sample");
                };
                let DynamicValue::Long(x) = fields[1] else {
                    panic!("expected x field");
                };
                received.push(x);
            }
        }
        received.len() as i32 >= total
    });

    // in order, no duplicates
    let expected: Vec<i32> = (10..10 + total).collect();
    assert_eq!(received, expected);

    b.close().expect("close b");
    a.close().expect("close a");
}

#[test]
fn transient_local_replays_history_to_late_joiner() {
    let a = participant("tl_pub", 151);
    let b = participant("tl_sub", 151);

    a.register_type(shape_type()).expect("register");
    b.register_type(shape_type()).expect("register");

    let topic_a = a
        .create_topic("Square", "ShapeType", Qos::transient_local())
        .expect("topic");
    let topic_b = b
        .create_topic("Square", "ShapeType", Qos::transient_local())
        .expect("topic");

    let qos = {
        let mut q = Qos::transient_local();
        q.history = tdds::qos::History::KeepLast(8);
        q
    };
    let writer = a.create_writer(&topic_a, qos.clone()).expect("writer");

    // history written before the reader exists
    for i in 0..3 {
        writer
            .write_dynamic(&shape("Blue", i, i, 20), None)
            .expect("write");
    }

    let reader = b.create_reader(&topic_b, qos).expect("late reader");
    bootstrap(&a, &b);

    let mut received = 0usize;
    wait_until("replayed history", Duration::from_secs(15), || {
        if let Ok(samples) = reader.take(
            ANY_SAMPLE_STATE,
            ANY_VIEW_STATE,
            ANY_INSTANCE_STATE,
            usize::MAX,
        ) {
            received += samples.len();
        }
        received >= 3
    });

    b.close().expect("close b");
    a.close().expect("close a");
}

#[test]
fn content_filtered_reader_drops_mismatches() {
    let a = participant("cf_pub", 152);
    let b = participant("cf_sub", 152);

    a.register_type(shape_type()).expect("register");
    b.register_type(shape_type()).expect("register");

    let topic_a = a
        .create_topic("Square", "ShapeType", Qos::reliable())
        .expect("topic");
    let topic_b = b
        .create_topic("Square", "ShapeType", Qos::reliable())
        .expect("topic");

    let writer = a.create_writer(&topic_a, Qos::reliable()).expect("writer");
    let reader = b
        .create_filtered_reader(
            &topic_b,
            Qos::reliable(),
            "x > 50 and x < 100 and y > 50 and y < 100",
        )
        .expect("filtered reader");

    bootstrap(&a, &b);
    wait_until("match", Duration::from_secs(10), || {
        reader
            .subscription_matched_status()
            .map(|s| s.current_count >= 1)
            .unwrap_or(false)
    });

    // half inside the window, half outside
    let inside = [(60, 60), (75, 80), (99, 51), (51, 99)];
    let outside = [(10, 60), (150, 80), (75, 10), (200, 200)];
    for (x, y) in inside.iter().chain(outside.iter()) {
        writer
            .write_dynamic(&shape("Green", *x, *y, 30), None)
            .expect("write");
        std::thread::sleep(Duration::from_millis(5));
    }

    let mut xs = Vec::new();
    wait_until("filtered samples", Duration::from_secs(15), || {
        if let Ok(samples) = reader.take(
            ANY_SAMPLE_STATE,
            ANY_VIEW_STATE,
            ANY_INSTANCE_STATE,
            usize::MAX,
        ) {
            for s in samples {
                let DynamicValue::Struct(fields) = s.data.expect("decoded") else {
                    panic!("struct expected");
                };
                let DynamicValue::Long(x) = fields[1] else {
                    panic!("x expected");
                };
                xs.push(x);
            }
        }
        xs.len() >= inside.len()
    });

    // give stragglers a moment, then confirm nothing outside arrived
    std::thread::sleep(Duration::from_millis(300));
    if let Ok(samples) = reader.take(
        ANY_SAMPLE_STATE,
        ANY_VIEW_STATE,
        ANY_INSTANCE_STATE,
        usize::MAX,
    ) {
        for s in samples {
            let DynamicValue::Struct(fields) = s.data.expect("decoded") else {
                panic!("struct expected");
            };
            let DynamicValue::Long(x) = fields[1] else {
                panic!("x expected");
            };
            xs.push(x);
        }
    }
    for x in &xs {
        assert!(*x > 50 && *x < 100, "sample outside filter window: x={}", x);
    }
    assert_eq!(xs.len(), inside.len());

    b.close().expect("close b");
    a.close().expect("close a");
}

#[test]
fn peer_lease_expiry_unmatches_endpoints() {
    let a = participant("lease_pub", 153);
    let b = participant("lease_sub", 153);

    a.register_type(shape_type()).expect("register");
    b.register_type(shape_type()).expect("register");

    let topic_a = a
        .create_topic("Square", "ShapeType", Qos::reliable())
        .expect("topic");
    let topic_b = b
        .create_topic("Square", "ShapeType", Qos::reliable())
        .expect("topic");

    let _writer = a.create_writer(&topic_a, Qos::reliable()).expect("writer");
    let reader = b.create_reader(&topic_b, Qos::reliable()).expect("reader");

    bootstrap(&a, &b);
    wait_until("match", Duration::from_secs(10), || {
        reader
            .subscription_matched_status()
            .map(|s| s.current_count >= 1)
            .unwrap_or(false)
    });

    // kill A: announcements stop; B must evict within lease + margin
    a.close().expect("close a");
    wait_until("peer eviction", Duration::from_secs(5), || {
        b.peer_count() == 0
    });
    wait_until("unmatch decrement", Duration::from_secs(3), || {
        reader
            .subscription_matched_status()
            .map(|s| s.current_count == 0)
            .unwrap_or(false)
    });

    b.close().expect("close b");
}
