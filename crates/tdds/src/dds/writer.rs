// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DataWriter.
//!
//! `write` serializes the sample, appends it to the writer's history cache
//! (blocking per the KEEP_ALL contract) and nudges the RTPS machine so the
//! dispatcher flushes DATA to every matched reader proxy. `dispose` and
//! `unregister` record non-alive changes whose keys stay behind as
//! tombstones until every reader acknowledged.

use super::condition::StatusCondition;
use super::listener::DataWriterListener;
use super::status::{
    OfferedDeadlineMissedStatus, OfferedIncompatibleQosStatus, PublicationMatchedStatus,
    StatusKind,
};
use super::{Error, Result};
use crate::cache::{ChangeKind, HistoryCache};
use crate::core::dbuf::DbChain;
use crate::core::guid::Guid;
use crate::core::time::Time;
use crate::qos::{LivelinessKind, Qos};
use crate::reliability::RtpsWriter;
use crate::xtypes::{self, DynamicValue, TypeDescriptor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Shared writer state: the cache, the protocol machine and the statuses.
pub struct WriterCore {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: Arc<Qos>,
    pub descriptor: Option<Arc<TypeDescriptor>>,
    pub cache: Arc<HistoryCache>,
    pub rtps: Mutex<RtpsWriter>,
    pub status: Arc<StatusCondition>,
    pub listener: Mutex<Option<Arc<dyn DataWriterListener>>>,
    pub matched: Mutex<PublicationMatchedStatus>,
    pub incompatible: Mutex<OfferedIncompatibleQosStatus>,
    pub deadline_missed: Mutex<OfferedDeadlineMissedStatus>,
    pub enabled: AtomicBool,
    /// Last explicit or implicit liveliness assertion.
    pub last_assertion: Mutex<Instant>,
}

impl WriterCore {
    fn lock_rtps(&self) -> std::sync::MutexGuard<'_, RtpsWriter> {
        match self.rtps.lock() {
            Ok(lock) => lock,
            Err(e) => e.into_inner(),
        }
    }

    /// Append one change and feed the protocol machine.
    pub fn write_change(
        &self,
        kind: ChangeKind,
        instance: u64,
        key: Vec<u8>,
        payload: Vec<u8>,
        timestamp: Option<Time>,
    ) -> Result<u64> {
        if !self.enabled.load(Ordering::Acquire) {
            return Err(Error::NotEnabled);
        }
        let ts = timestamp.unwrap_or_else(Time::now);
        let seq = self.cache.add_change(
            self.guid,
            kind,
            instance,
            key,
            DbChain::from_vec(payload),
            ts,
        )?;
        self.lock_rtps().on_change_added(seq);
        match self.last_assertion.lock() {
            Ok(mut at) => *at = Instant::now(),
            Err(e) => *e.into_inner() = Instant::now(),
        }
        Ok(seq)
    }

    /// Post a matched-status transition and wake listeners/conditions.
    pub fn post_match_change(&self, remote: Guid, delta: i32) {
        let status = {
            let mut matched = match self.matched.lock() {
                Ok(lock) => lock,
                Err(e) => e.into_inner(),
            };
            if delta > 0 {
                matched.total_count += delta as u32;
            }
            matched.total_count_change += delta;
            matched.current_count = (matched.current_count as i64 + i64::from(delta)).max(0) as u32;
            matched.current_count_change += delta;
            matched.last_subscription_handle = Some(remote);
            *matched
        };
        self.status.post_status(StatusKind::PublicationMatched as u32);
        let listener = match self.listener.lock() {
            Ok(lock) => lock.clone(),
            Err(e) => e.into_inner().clone(),
        };
        if let Some(listener) = listener {
            listener.on_publication_matched(status);
        }
    }

    /// Periodic deadline check against the offered period.
    pub fn check_deadline(&self) {
        if self.qos.deadline.period.is_infinite() {
            return;
        }
        let overdue = self
            .cache
            .overdue_instances(self.qos.deadline.period.to_std());
        for instance in overdue {
            let status = {
                let mut dm = match self.deadline_missed.lock() {
                    Ok(lock) => lock,
                    Err(e) => e.into_inner(),
                };
                dm.total_count += 1;
                dm.total_count_change += 1;
                dm.last_instance = instance;
                *dm
            };
            self.status
                .post_status(StatusKind::OfferedDeadlineMissed as u32);
            let listener = match self.listener.lock() {
                Ok(lock) => lock.clone(),
                Err(e) => e.into_inner().clone(),
            };
            if let Some(listener) = listener {
                listener.on_offered_deadline_missed(status);
            }
        }
    }

    /// Post an offered-incompatible-QoS status.
    pub fn post_incompatible(&self, policy: crate::qos::compat::PolicyId) {
        let status = {
            let mut inc = match self.incompatible.lock() {
                Ok(lock) => lock,
                Err(e) => e.into_inner(),
            };
            inc.total_count += 1;
            inc.total_count_change += 1;
            inc.last_policy = Some(policy);
            inc.clone()
        };
        self.status
            .post_status(StatusKind::OfferedIncompatibleQos as u32);
        let listener = match self.listener.lock() {
            Ok(lock) => lock.clone(),
            Err(e) => e.into_inner().clone(),
        };
        if let Some(listener) = listener {
            listener.on_offered_incompatible_qos(status);
        }
    }
}

/// Flushes pending protocol work for a writer. The participant installs
/// this so `write` can reach the transport without the API types holding
/// the runtime directly.
pub type FlushFn = Arc<dyn Fn(&WriterCore) + Send + Sync>;

/// The application-facing writer handle.
pub struct DataWriter {
    core: Arc<WriterCore>,
    flush: FlushFn,
    deleted: AtomicBool,
}

impl DataWriter {
    #[must_use]
    pub fn new(core: Arc<WriterCore>, flush: FlushFn) -> Self {
        DataWriter {
            core,
            flush,
            deleted: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn guid(&self) -> Guid {
        self.core.guid
    }

    #[must_use]
    pub fn topic_name(&self) -> &str {
        &self.core.topic_name
    }

    #[must_use]
    pub fn qos(&self) -> Arc<Qos> {
        Arc::clone(&self.core.qos)
    }

    #[must_use]
    pub fn core(&self) -> &Arc<WriterCore> {
        &self.core
    }

    fn check_alive(&self) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            Err(Error::AlreadyDeleted)
        } else {
            Ok(())
        }
    }

    /// Write an already-serialized sample (CDR payload with encapsulation).
    pub fn write_raw(&self, payload: &[u8], timestamp: Option<Time>) -> Result<u64> {
        self.check_alive()?;
        let seq = self.core.write_change(
            ChangeKind::Alive,
            0,
            Vec::new(),
            payload.to_vec(),
            timestamp,
        )?;
        (self.flush)(&self.core);
        Ok(seq)
    }

    /// Serialize and write a dynamic sample against the registered type.
    pub fn write_dynamic(&self, value: &DynamicValue, timestamp: Option<Time>) -> Result<u64> {
        self.check_alive()?;
        let descriptor = self
            .core
            .descriptor
            .as_ref()
            .ok_or_else(|| Error::PreconditionNotMet("writer has no type descriptor".into()))?;
        let payload = xtypes::cdr::encode(descriptor, value)?;
        let (instance, key) = if descriptor.has_key() {
            let hash = xtypes::key_hash(descriptor, value);
            (xtypes::instance_key(&hash), hash.to_vec())
        } else {
            (0, Vec::new())
        };
        let seq =
            self.core
                .write_change(ChangeKind::Alive, instance, key, payload, timestamp)?;
        (self.flush)(&self.core);
        Ok(seq)
    }

    /// Record a dispose for the instance identified by `value`'s key.
    pub fn dispose(&self, value: &DynamicValue, timestamp: Option<Time>) -> Result<u64> {
        self.not_alive(value, ChangeKind::NotAliveDisposed, timestamp)
    }

    /// Record an unregister for the instance identified by `value`'s key.
    pub fn unregister(&self, value: &DynamicValue, timestamp: Option<Time>) -> Result<u64> {
        self.not_alive(value, ChangeKind::NotAliveUnregistered, timestamp)
    }

    fn not_alive(
        &self,
        value: &DynamicValue,
        kind: ChangeKind,
        timestamp: Option<Time>,
    ) -> Result<u64> {
        self.check_alive()?;
        let descriptor = self
            .core
            .descriptor
            .as_ref()
            .ok_or_else(|| Error::PreconditionNotMet("writer has no type descriptor".into()))?;
        if !descriptor.has_key() {
            return Err(Error::PreconditionNotMet(
                "instance operations need a keyed type".into(),
            ));
        }
        let hash = xtypes::key_hash(descriptor, value);
        let seq = self.core.write_change(
            kind,
            xtypes::instance_key(&hash),
            hash.to_vec(),
            Vec::new(),
            timestamp,
        )?;
        (self.flush)(&self.core);
        Ok(seq)
    }

    /// Manual liveliness assertion (MANUAL_BY_TOPIC).
    pub fn assert_liveliness(&self) -> Result<()> {
        self.check_alive()?;
        if self.core.qos.liveliness.kind == LivelinessKind::Automatic {
            return Ok(()); // nothing to do: SPDP covers it
        }
        match self.core.last_assertion.lock() {
            Ok(mut at) => *at = Instant::now(),
            Err(e) => *e.into_inner() = Instant::now(),
        }
        (self.flush)(&self.core);
        Ok(())
    }

    /// Matched-subscription status; reading clears the change counters.
    pub fn publication_matched_status(&self) -> Result<PublicationMatchedStatus> {
        self.check_alive()?;
        let mut matched = match self.core.matched.lock() {
            Ok(lock) => lock,
            Err(e) => e.into_inner(),
        };
        let out = *matched;
        matched.total_count_change = 0;
        matched.current_count_change = 0;
        self.core
            .status
            .clear_status(StatusKind::PublicationMatched as u32);
        Ok(out)
    }

    /// Install or replace the listener.
    pub fn set_listener(&self, listener: Option<Arc<dyn DataWriterListener>>) -> Result<()> {
        self.check_alive()?;
        match self.core.listener.lock() {
            Ok(mut lock) => *lock = listener,
            Err(e) => *e.into_inner() = listener,
        }
        Ok(())
    }

    #[must_use]
    pub fn status_condition(&self) -> Arc<StatusCondition> {
        Arc::clone(&self.core.status)
    }

    /// Mark deleted; subsequent operations fail with `AlreadyDeleted`.
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }
}
