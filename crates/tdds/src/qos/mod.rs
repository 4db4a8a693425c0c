// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS (Quality of Service) policies for DDS entities.
//!
//! The `Qos` record carries every standard policy the matching engine and
//! the cache honor. Records are interned: identical policy sets share one
//! refcounted instance through `QosRegistry`.

/// Offered/requested compatibility rules and partition matching.
pub mod compat;

use crate::core::time::{Duration, DURATION_INFINITE, DURATION_ZERO};
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Reliability policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReliabilityKind {
    #[default]
    BestEffort,
    Reliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reliability {
    pub kind: ReliabilityKind,
    /// Upper bound on `write` blocking when the history is full (Reliable
    /// KEEP_ALL only).
    pub max_blocking_time: Duration,
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability {
            kind: ReliabilityKind::BestEffort,
            max_blocking_time: Duration::from_millis(100),
        }
    }
}

/// Durability policy, ordered VOLATILE < TRANSIENT_LOCAL < TRANSIENT <
/// PERSISTENT for compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum Durability {
    #[default]
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

/// History policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum History {
    /// Keep the last `depth` alive changes per instance.
    KeepLast(u32),
    /// Keep everything within resource limits.
    KeepAll,
}

impl Default for History {
    fn default() -> Self {
        History::KeepLast(1)
    }
}

/// LENGTH_UNLIMITED marker for resource limits.
pub const LENGTH_UNLIMITED: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceLimits {
    pub max_samples: u32,
    pub max_instances: u32,
    pub max_samples_per_instance: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            max_samples: LENGTH_UNLIMITED,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        }
    }
}

/// Ownership policy kind. Must match exactly between endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OwnershipKind {
    #[default]
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ownership {
    pub kind: OwnershipKind,
}

/// Writer-side strength used for EXCLUSIVE arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OwnershipStrength {
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Deadline {
    pub period: Duration,
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline {
            period: DURATION_INFINITE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LatencyBudget {
    pub duration: Duration,
}

impl Default for LatencyBudget {
    fn default() -> Self {
        LatencyBudget {
            duration: DURATION_ZERO,
        }
    }
}

/// Liveliness kind, ordered AUTOMATIC < MANUAL_BY_PARTICIPANT <
/// MANUAL_BY_TOPIC (a stronger offer satisfies a weaker request).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum LivelinessKind {
    #[default]
    Automatic,
    ManualByParticipant,
    ManualByTopic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    pub lease_duration: Duration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Liveliness {
            kind: LivelinessKind::Automatic,
            lease_duration: DURATION_INFINITE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lifespan {
    pub duration: Duration,
}

impl Default for Lifespan {
    fn default() -> Self {
        Lifespan {
            duration: DURATION_INFINITE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum DestinationOrderKind {
    #[default]
    ByReceptionTimestamp,
    BySourceTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DestinationOrder {
    pub kind: DestinationOrderKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum PresentationAccessScope {
    #[default]
    Instance,
    Topic,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Presentation {
    pub access_scope: PresentationAccessScope,
    pub coherent_access: bool,
    pub ordered_access: bool,
}

/// Partition name set. Empty matches only empty (and the `"*"` wildcard).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Partition {
    pub names: Vec<String>,
}

impl Partition {
    #[must_use]
    pub fn single(name: &str) -> Self {
        Partition {
            names: vec![name.to_string()],
        }
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBasedFilter {
    pub minimum_separation: Duration,
}

impl Default for TimeBasedFilter {
    fn default() -> Self {
        TimeBasedFilter {
            minimum_separation: DURATION_ZERO,
        }
    }
}

/// Opaque octet policies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct UserData {
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TopicData {
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct GroupData {
    pub value: Vec<u8>,
}

/// The full QoS record attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Qos {
    pub durability: Durability,
    pub reliability: Reliability,
    pub history: History,
    pub resource_limits: ResourceLimits,
    pub ownership: Ownership,
    pub ownership_strength: OwnershipStrength,
    pub deadline: Deadline,
    pub latency_budget: LatencyBudget,
    pub liveliness: Liveliness,
    pub lifespan: Lifespan,
    pub destination_order: DestinationOrder,
    pub presentation: Presentation,
    pub partition: Partition,
    pub time_based_filter: TimeBasedFilter,
    pub user_data: UserData,
    pub topic_data: TopicData,
    pub group_data: GroupData,
}

impl Qos {
    /// Reliable delivery with KEEP_LAST(1).
    #[must_use]
    pub fn reliable() -> Self {
        Qos {
            reliability: Reliability {
                kind: ReliabilityKind::Reliable,
                max_blocking_time: Duration::from_millis(100),
            },
            ..Qos::default()
        }
    }

    /// Reliable + TRANSIENT_LOCAL for late joiners.
    #[must_use]
    pub fn transient_local() -> Self {
        Qos {
            durability: Durability::TransientLocal,
            ..Qos::reliable()
        }
    }

    /// Validate the record. Inconsistent combinations return the offending
    /// description.
    pub fn validate(&self) -> Result<(), String> {
        if let History::KeepLast(0) = self.history {
            return Err("History KEEP_LAST requires depth > 0".to_string());
        }
        let rl = &self.resource_limits;
        if rl.max_samples != LENGTH_UNLIMITED
            && rl.max_samples_per_instance != LENGTH_UNLIMITED
            && rl.max_instances != LENGTH_UNLIMITED
        {
            let needed = u64::from(rl.max_samples_per_instance) * u64::from(rl.max_instances);
            if u64::from(rl.max_samples) < needed {
                return Err(format!(
                    "max_samples ({}) < max_samples_per_instance ({}) * max_instances ({})",
                    rl.max_samples, rl.max_samples_per_instance, rl.max_instances
                ));
            }
        }
        if let History::KeepLast(depth) = self.history {
            if rl.max_samples_per_instance != LENGTH_UNLIMITED
                && depth > rl.max_samples_per_instance
            {
                return Err("history depth exceeds max_samples_per_instance".to_string());
            }
        }
        if self.liveliness.lease_duration.is_zero() {
            return Err("liveliness lease_duration must be > 0".to_string());
        }
        Ok(())
    }

    fn hash_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Interning registry: identical QoS records share one Arc.
pub struct QosRegistry {
    interned: DashMap<u64, Vec<Arc<Qos>>>,
}

impl QosRegistry {
    #[must_use]
    pub fn new() -> Self {
        QosRegistry {
            interned: DashMap::new(),
        }
    }

    /// Intern a record, returning the shared instance.
    pub fn intern(&self, qos: Qos) -> Arc<Qos> {
        let key = qos.hash_key();
        let mut bucket = self.interned.entry(key).or_default();
        if let Some(existing) = bucket.iter().find(|q| ***q == qos) {
            return Arc::clone(existing);
        }
        let shared = Arc::new(qos);
        bucket.push(Arc::clone(&shared));
        shared
    }

    /// Drop interned records nobody references anymore.
    pub fn sweep(&self) {
        self.interned.retain(|_, bucket| {
            bucket.retain(|q| Arc::strong_count(q) > 1);
            !bucket.is_empty()
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interned.iter().map(|b| b.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QosRegistry {
    fn default() -> Self {
        Self::new()
    }
}
