// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber: groups readers, mirroring `Publisher` on the receive side.

use crate::core::guid::Guid;
use crate::qos::{GroupData, Partition, Presentation, Qos};
use std::sync::{Arc, Mutex};

/// A subscriber grouping entity.
pub struct Subscriber {
    pub key: u32,
    partition: Mutex<Partition>,
    presentation: Presentation,
    group_data: Mutex<GroupData>,
    default_reader_qos: Mutex<Arc<Qos>>,
    readers: Mutex<Vec<Guid>>,
}

impl Subscriber {
    #[must_use]
    pub fn new(key: u32, qos: &Qos) -> Self {
        Subscriber {
            key,
            partition: Mutex::new(qos.partition.clone()),
            presentation: qos.presentation,
            group_data: Mutex::new(qos.group_data.clone()),
            default_reader_qos: Mutex::new(Arc::new(Qos::default())),
            readers: Mutex::new(Vec::new()),
        }
    }

    /// Effective reader QoS with group policies folded in.
    #[must_use]
    pub fn effective_qos(&self, reader_qos: &Qos) -> Qos {
        let mut qos = reader_qos.clone();
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

    pub fn set_partition(&self, partition: Partition) {
        match self.partition.lock() {
            Ok(mut lock) => *lock = partition,
            Err(e) => *e.into_inner() = partition,
        }
    }

    #[must_use]
    pub fn default_reader_qos(&self) -> Arc<Qos> {
        match self.default_reader_qos.lock() {
            Ok(lock) => Arc::clone(&lock),
            Err(e) => Arc::clone(&e.into_inner()),
        }
    }

    pub fn set_default_reader_qos(&self, qos: Arc<Qos>) {
        match self.default_reader_qos.lock() {
            Ok(mut lock) => *lock = qos,
            Err(e) => *e.into_inner() = qos,
        }
    }

    pub fn register_reader(&self, guid: Guid) {
        match self.readers.lock() {
            Ok(mut lock) => lock.push(guid),
            Err(e) => e.into_inner().push(guid),
        }
    }

    pub fn unregister_reader(&self, guid: &Guid) {
        match self.readers.lock() {
            Ok(mut lock) => lock.retain(|g| g != guid),
            Err(e) => e.into_inner().retain(|g| g != guid),
        }
    }

    #[must_use]
    pub fn readers(&self) -> Vec<Guid> {
        match self.readers.lock() {
            Ok(lock) => lock.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_qos() {
        let mut group_qos = Qos::default();
        group_qos.partition = Partition::single("telemetry");
        let subscriber = Subscriber::new(2, &group_qos);
        let effective = subscriber.effective_qos(&Qos::default());
        assert_eq!(effective.partition, Partition::single("telemetry"));
    }

    #[test]
    fn test_reader_registry() {
        let subscriber = Subscriber::new(2, &Qos::default());
        subscriber.register_reader(Guid::UNKNOWN);
        assert_eq!(subscriber.readers().len(), 1);
        subscriber.unregister_reader(&Guid::UNKNOWN);
        assert!(subscriber.readers().is_empty());
    }
}
