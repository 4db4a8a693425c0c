// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher: groups writers and carries the group-level QoS (partition,
//! presentation, group data) its writers inherit.

use crate::core::guid::Guid;
use crate::qos::{GroupData, Partition, Presentation, Qos};
use std::sync::{Arc, Mutex};

/// A publisher grouping entity.
pub struct Publisher {
    /// Entity key inside the participant.
    pub key: u32,
    partition: Mutex<Partition>,
    presentation: Presentation,
    group_data: Mutex<GroupData>,
    default_writer_qos: Mutex<Arc<Qos>>,
    writers: Mutex<Vec<Guid>>,
}

impl Publisher {
    #[must_use]
    pub fn new(key: u32, qos: &Qos) -> Self {
        Publisher {
            key,
            partition: Mutex::new(qos.partition.clone()),
            presentation: qos.presentation,
            group_data: Mutex::new(qos.group_data.clone()),
            default_writer_qos: Mutex::new(Arc::new(Qos::default())),
            writers: Mutex::new(Vec::new()),
        }
    }

    /// Effective writer QoS: the writer's own policies with the group's
    /// partition/presentation/group-data folded in.
    #[must_use]
    pub fn effective_qos(&self, writer_qos: &Qos) -> Qos {
        let mut qos = writer_qos.clone();
        qos.partition = self.partition();
        qos.presentation = self.presentation;
        qos.group_data = match self.group_data.lock() {
            Ok(lock) => lock.clone(),
            Err(e) => e.into_inner().clone(),
        };
        qos
    }

    #[must_use]
    pub fn partition(&self) -> Partition {
        match self.partition.lock() {
            Ok(lock) => lock.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    /// Partition is mutable post-enable; the matcher re-runs afterwards.
    pub fn set_partition(&self, partition: Partition) {
        match self.partition.lock() {
            Ok(mut lock) => *lock = partition,
            Err(e) => *e.into_inner() = partition,
        }
    }

    #[must_use]
    pub fn default_writer_qos(&self) -> Arc<Qos> {
        match self.default_writer_qos.lock() {
            Ok(lock) => Arc::clone(&lock),
            Err(e) => Arc::clone(&e.into_inner()),
        }
    }

    pub fn set_default_writer_qos(&self, qos: Arc<Qos>) {
        match self.default_writer_qos.lock() {
            Ok(mut lock) => *lock = qos,
            Err(e) => *e.into_inner() = qos,
        }
    }

    pub fn register_writer(&self, guid: Guid) {
        match self.writers.lock() {
            Ok(mut lock) => lock.push(guid),
            Err(e) => e.into_inner().push(guid),
        }
    }

    pub fn unregister_writer(&self, guid: &Guid) {
        match self.writers.lock() {
            Ok(mut lock) => lock.retain(|g| g != guid),
            Err(e) => e.into_inner().retain(|g| g != guid),
        }
    }

    #[must_use]
    pub fn writers(&self) -> Vec<Guid> {
        match self.writers.lock() {
            Ok(lock) => lock.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_qos_folds_group_policies() {
        let mut group_qos = Qos::default();
        group_qos.partition = Partition::single("sensors");
        let publisher = Publisher::new(1, &group_qos);

        let effective = publisher.effective_qos(&Qos::reliable());
        assert_eq!(effective.partition, Partition::single("sensors"));
        assert_eq!(
            effective.reliability.kind,
            crate::qos::ReliabilityKind::Reliable
        );
    }

    #[test]
    fn test_partition_mutation() {
        let publisher = Publisher::new(1, &Qos::default());
        publisher.set_partition(Partition::single("north"));
        assert_eq!(publisher.partition(), Partition::single("north"));
    }

    #[test]
    fn test_writer_registry() {
        let publisher = Publisher::new(1, &Qos::default());
        let guid = Guid::UNKNOWN;
        publisher.register_writer(guid);
        assert_eq!(publisher.writers().len(), 1);
        publisher.unregister_writer(&guid);
        assert!(publisher.writers().is_empty());
    }
}
