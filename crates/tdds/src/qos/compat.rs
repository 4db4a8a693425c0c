// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS compatibility checking (RxO - Request vs Offered).
//!
//! Implements the DDS v1.4 Sec.2.2.3 rules gating writer/reader matching.
//! Every failed policy is reported so `OFFERED_INCOMPATIBLE_QOS` and
//! `REQUESTED_INCOMPATIBLE_QOS` statuses can name the offender.
//!
//! | Policy            | Rule                                             |
//! |-------------------|--------------------------------------------------|
//! | Reliability       | offered >= requested (RELIABLE > BEST_EFFORT)    |
//! | Durability        | offered >= requested (VOLATILE < ... < PERSISTENT)|
//! | Deadline          | writer period <= reader period                   |
//! | Latency budget    | writer <= reader                                 |
//! | Liveliness        | offered kind >= requested, lease <= requested    |
//! | Destination order | offered >= requested                             |
//! | Presentation      | offered scope >= requested; flags must not regress|
//! | Ownership         | kinds identical                                  |
//! | Partition         | name sets intersect (wildcards allowed)          |

use super::{Qos, ReliabilityKind};

/// Identifies the policy that failed a compatibility check, mirroring the
/// standard DDS policy ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyId {
    Durability = 2,
    Deadline = 4,
    LatencyBudget = 5,
    Ownership = 6,
    Liveliness = 8,
    Reliability = 11,
    DestinationOrder = 12,
    Presentation = 17,
    Partition = 10,
}

/// Check offered (writer) vs requested (reader) QoS.
///
/// Returns the list of incompatible policies; empty means the pair may
/// match. Partition mismatch is reported separately because the DDS spec
/// treats it as "no match" rather than "incompatible".
#[must_use]
pub fn check(offered: &Qos, requested: &Qos) -> Vec<PolicyId> {
    let mut failed = Vec::new();

    let rel_rank = |k: ReliabilityKind| match k {
        ReliabilityKind::BestEffort => 0u8,
        ReliabilityKind::Reliable => 1u8,
    };
    if rel_rank(offered.reliability.kind) < rel_rank(requested.reliability.kind) {
        log::debug!(
            "[QosCompat] reliability mismatch (offered={:?}, requested={:?})",
            offered.reliability.kind,
            requested.reliability.kind
        );
        failed.push(PolicyId::Reliability);
    }

    if offered.durability < requested.durability {
        log::debug!(
            "[QosCompat] durability mismatch (offered={:?}, requested={:?})",
            offered.durability,
            requested.durability
        );
        failed.push(PolicyId::Durability);
    }

    if offered.deadline.period > requested.deadline.period {
        log::debug!(
            "[QosCompat] deadline mismatch (offered={:?}, requested={:?})",
            offered.deadline.period,
            requested.deadline.period
        );
        failed.push(PolicyId::Deadline);
    }

    if offered.latency_budget.duration > requested.latency_budget.duration {
        failed.push(PolicyId::LatencyBudget);
    }

    if offered.liveliness.kind < requested.liveliness.kind
        || offered.liveliness.lease_duration > requested.liveliness.lease_duration
    {
        log::debug!(
            "[QosCompat] liveliness mismatch (offered={:?}, requested={:?})",
            offered.liveliness,
            requested.liveliness
        );
        failed.push(PolicyId::Liveliness);
    }

    if offered.destination_order.kind < requested.destination_order.kind {
        failed.push(PolicyId::DestinationOrder);
    }

    let p_off = &offered.presentation;
    let p_req = &requested.presentation;
    if p_off.access_scope < p_req.access_scope
        || (p_req.coherent_access && !p_off.coherent_access)
        || (p_req.ordered_access && !p_off.ordered_access)
    {
        failed.push(PolicyId::Presentation);
    }

    if offered.ownership.kind != requested.ownership.kind {
        log::debug!(
            "[QosCompat] ownership mismatch (offered={:?}, requested={:?})",
            offered.ownership.kind,
            requested.ownership.kind
        );
        failed.push(PolicyId::Ownership);
    }

    failed
}

/// Match one partition name against a pattern that may hold `*` and `?`
/// wildcards.
#[must_use]
pub fn partition_name_matches(pattern: &str, name: &str) -> bool {
    glob_match(pattern.as_bytes(), name.as_bytes())
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text)
                || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

/// Partition sets match when their intersection is non-empty. The empty set
/// matches only the empty set -- and `"*"`, which the wildcard rule covers
/// by matching the implicit empty-string partition.
#[must_use]
pub fn partitions_match(a: &super::Partition, b: &super::Partition) -> bool {
    // either side's names may be literal or wildcard patterns
    let a_names: &[String] = &a.names;
    let b_names: &[String] = &b.names;

    let empty = String::new();
    let a_iter: Vec<&String> = if a_names.is_empty() {
        vec![&empty]
    } else {
        a_names.iter().collect()
    };
    let b_iter: Vec<&String> = if b_names.is_empty() {
        vec![&empty]
    } else {
        b_names.iter().collect()
    };

    for an in &a_iter {
        for bn in &b_iter {
            if partition_name_matches(an, bn) || partition_name_matches(bn, an) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::Duration;
    use crate::qos::{
        Deadline, Durability, Liveliness, LivelinessKind, Ownership, OwnershipKind, Partition,
        Presentation, PresentationAccessScope, Qos, Reliability,
    };

    #[test]
    fn test_default_pair_compatible() {
        assert!(check(&Qos::default(), &Qos::default()).is_empty());
    }

    #[test]
    fn test_reliable_writer_satisfies_best_effort_reader() {
        assert!(check(&Qos::reliable(), &Qos::default()).is_empty());
        let failed = check(&Qos::default(), &Qos::reliable());
        assert_eq!(failed, vec![PolicyId::Reliability]);
    }

    #[test]
    fn test_durability_ordering() {
        let offered = Qos {
            durability: Durability::TransientLocal,
            ..Qos::default()
        };
        let requested = Qos {
            durability: Durability::Persistent,
            ..Qos::default()
        };
        assert!(check(&offered, &Qos::default()).is_empty());
        assert!(check(&offered, &requested).contains(&PolicyId::Durability));
    }

    #[test]
    fn test_deadline_writer_must_be_faster() {
        let slow_writer = Qos {
            deadline: Deadline {
                period: Duration::from_millis(200),
            },
            ..Qos::default()
        };
        let fast_reader = Qos {
            deadline: Deadline {
                period: Duration::from_millis(100),
            },
            ..Qos::default()
        };
        assert!(check(&slow_writer, &fast_reader).contains(&PolicyId::Deadline));
        assert!(check(&fast_reader, &slow_writer).is_empty());
    }

    #[test]
    fn test_liveliness_kind_and_lease() {
        let offered = Qos {
            liveliness: Liveliness {
                kind: LivelinessKind::Automatic,
                lease_duration: Duration::from_secs(5),
            },
            ..Qos::default()
        };
        let requested = Qos {
            liveliness: Liveliness {
                kind: LivelinessKind::ManualByTopic,
                lease_duration: Duration::from_secs(10),
            },
            ..Qos::default()
        };
        assert!(check(&offered, &requested).contains(&PolicyId::Liveliness));
        // stronger kind, shorter lease: fine
        assert!(check(&requested, &offered).is_empty());
    }

    #[test]
    fn test_ownership_must_match() {
        let exclusive = Qos {
            ownership: Ownership {
                kind: OwnershipKind::Exclusive,
            },
            ..Qos::default()
        };
        assert!(check(&exclusive, &Qos::default()).contains(&PolicyId::Ownership));
        assert!(check(&exclusive, &exclusive).is_empty());
    }

    #[test]
    fn test_presentation_no_regress() {
        let offered = Qos {
            presentation: Presentation {
                access_scope: PresentationAccessScope::Instance,
                coherent_access: false,
                ordered_access: false,
            },
            ..Qos::default()
        };
        let requested = Qos {
            presentation: Presentation {
                access_scope: PresentationAccessScope::Topic,
                coherent_access: true,
                ordered_access: false,
            },
            ..Qos::default()
        };
        assert!(check(&offered, &requested).contains(&PolicyId::Presentation));
    }

    #[test]
    fn test_partition_empty_matches_empty_only() {
        let empty = Partition::default();
        let named = Partition::single("sensors");
        assert!(partitions_match(&empty, &empty));
        assert!(!partitions_match(&empty, &named));
        assert!(partitions_match(&named, &named));
    }

    #[test]
    fn test_partition_wildcard() {
        let star = Partition::single("*");
        let named = Partition::single("sensors");
        let empty = Partition::default();
        assert!(partitions_match(&star, &named));
        // "*" matches the implicit empty partition as well
        assert!(partitions_match(&star, &empty));

        let prefix = Partition::single("sen*");
        assert!(partitions_match(&prefix, &named));
        assert!(!partitions_match(&prefix, &Partition::single("actuators")));

        let question = Partition::single("sensor?");
        assert!(partitions_match(&question, &Partition::single("sensors")));
        assert!(!partitions_match(&question, &Partition::single("sensor")));
    }

    #[test]
    fn test_partition_intersection() {
        let a = Partition {
            names: vec!["red".into(), "green".into()],
        };
        let b = Partition {
            names: vec!["green".into(), "blue".into()],
        };
        let c = Partition {
            names: vec!["yellow".into()],
        };
        assert!(partitions_match(&a, &b));
        assert!(!partitions_match(&a, &c));
    }

    #[test]
    fn test_multiple_failures_reported() {
        let offered = Qos {
            reliability: Reliability::default(),
            ownership: Ownership {
                kind: OwnershipKind::Shared,
            },
            ..Qos::default()
        };
        let requested = Qos {
            reliability: crate::qos::Reliability {
                kind: ReliabilityKind::Reliable,
                ..Reliability::default()
            },
            ownership: Ownership {
                kind: OwnershipKind::Exclusive,
            },
            ..Qos::default()
        };
        let failed = check(&offered, &requested);
        assert!(failed.contains(&PolicyId::Reliability));
        assert!(failed.contains(&PolicyId::Ownership));
    }
}
