// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DataReader.
//!
//! `read` and `take` drain the reader's history cache under (sample, view,
//! instance) state masks; neither ever suspends. Loaned payloads are
//! refcounted chain references returned with `return_loan` (or simply by
//! dropping the samples). Optional content filtering applies the reader's
//! filter expression to decoded samples before they are handed out.

use super::condition::StatusCondition;
use super::filter::{ContentFilter, FieldValue};
use super::listener::DataReaderListener;
use super::read_condition::{
    QueryCondition, ReadCondition, ANY_INSTANCE_STATE, ANY_SAMPLE_STATE, ANY_VIEW_STATE,
};
use super::status::{
    LivelinessChangedStatus, RequestedDeadlineMissedStatus, RequestedIncompatibleQosStatus,
    SampleLostStatus, SampleRejectedReason, SampleRejectedStatus, StatusKind,
    SubscriptionMatchedStatus,
};
use super::{Error, Result};
use crate::cache::{HistoryCache, InstanceState, ReadEntry, SampleState, ViewState};
use crate::core::guid::Guid;
use crate::core::time::Time;
use crate::qos::Qos;
use crate::reliability::RtpsReader;
use crate::xtypes::{self, DynamicValue, TypeDescriptor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Metadata accompanying each sample.
#[derive(Debug, Clone)]
pub struct SampleInfo {
    pub sample_state: SampleState,
    pub view_state: ViewState,
    pub instance_state: InstanceState,
    pub source_timestamp: Time,
    pub arrival_timestamp: Time,
    pub writer: Guid,
    pub sequence_number: u64,
    pub instance: u64,
    /// Clear for key-only (dispose/unregister) samples.
    pub valid_data: bool,
}

/// One sample as handed to the application.
pub struct Sample {
    pub info: SampleInfo,
    /// Raw serialized payload (loan into the cache chain).
    pub payload: Vec<u8>,
    /// Decoded form, when the reader has a descriptor and decoding
    /// succeeded.
    pub data: Option<DynamicValue>,
}

/// Shared reader state.
pub struct ReaderCore {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: Arc<Qos>,
    pub descriptor: Option<Arc<TypeDescriptor>>,
    pub cache: Arc<HistoryCache>,
    pub rtps: Mutex<RtpsReader>,
    pub status: Arc<StatusCondition>,
    pub listener: Mutex<Option<Arc<dyn DataReaderListener>>>,
    pub matched: Mutex<SubscriptionMatchedStatus>,
    pub incompatible: Mutex<RequestedIncompatibleQosStatus>,
    pub rejected: Mutex<SampleRejectedStatus>,
    pub lost: Mutex<SampleLostStatus>,
    pub liveliness: Mutex<LivelinessChangedStatus>,
    pub deadline_missed: Mutex<RequestedDeadlineMissedStatus>,
    pub read_conditions: Mutex<Vec<Arc<ReadCondition>>>,
    pub query_conditions: Mutex<Vec<Arc<QueryCondition>>>,
    pub filter: Option<ContentFilter>,
    pub enabled: AtomicBool,
}

impl ReaderCore {
    fn listener(&self) -> Option<Arc<dyn DataReaderListener>> {
        match self.listener.lock() {
            Ok(lock) => lock.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    /// Reevaluate attached conditions after any cache mutation.
    pub fn reevaluate_conditions(&self) {
        let read_conditions = match self.read_conditions.lock() {
            Ok(lock) => lock.clone(),
            Err(e) => e.into_inner().clone(),
        };
        for cond in read_conditions {
            cond.reevaluate();
        }
        let query_conditions = match self.query_conditions.lock() {
            Ok(lock) => lock.clone(),
            Err(e) => e.into_inner().clone(),
        };
        for cond in query_conditions {
            cond.reevaluate();
        }
    }

    /// A sample reached the cache: wake statuses, conditions, listener.
    pub fn on_data_available(&self) {
        self.status.post_status(StatusKind::DataAvailable as u32);
        self.reevaluate_conditions();
        if let Some(listener) = self.listener() {
            listener.on_data_available();
        }
    }

    /// Post a matched-status transition.
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
            matched.last_publication_handle = Some(remote);
            *matched
        };
        self.status
            .post_status(StatusKind::SubscriptionMatched as u32);
        if let Some(listener) = self.listener() {
            listener.on_subscription_matched(status);
        }
    }

    /// Post a requested-incompatible-QoS status.
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
            .post_status(StatusKind::RequestedIncompatibleQos as u32);
        if let Some(listener) = self.listener() {
            listener.on_requested_incompatible_qos(status);
        }
    }

    /// Post a sample-rejected status.
    pub fn post_rejected(&self, reason: SampleRejectedReason, instance: u64) {
        let status = {
            let mut rej = match self.rejected.lock() {
                Ok(lock) => lock,
                Err(e) => e.into_inner(),
            };
            rej.total_count += 1;
            rej.total_count_change += 1;
            rej.last_reason = Some(reason);
            rej.last_instance = instance;
            rej.clone()
        };
        self.status.post_status(StatusKind::SampleRejected as u32);
        if let Some(listener) = self.listener() {
            listener.on_sample_rejected(status);
        }
    }

    /// Post a sample-lost status.
    pub fn post_lost(&self) {
        let status = {
            let mut lost = match self.lost.lock() {
                Ok(lock) => lock,
                Err(e) => e.into_inner(),
            };
            lost.total_count += 1;
            lost.total_count_change += 1;
            *lost
        };
        self.status.post_status(StatusKind::SampleLost as u32);
        if let Some(listener) = self.listener() {
            listener.on_sample_lost(status);
        }
    }

    /// Periodic deadline check: instances silent past the requested
    /// period post `RequestedDeadlineMissed` once per lapse.
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
                .post_status(StatusKind::RequestedDeadlineMissed as u32);
            if let Some(listener) = self.listener() {
                listener.on_requested_deadline_missed(status);
            }
        }
    }

    /// Post a liveliness transition for a matched writer.
    pub fn post_liveliness(&self, writer: Guid, alive: bool) {
        let status = {
            let mut lv = match self.liveliness.lock() {
                Ok(lock) => lock,
                Err(e) => e.into_inner(),
            };
            if alive {
                lv.alive_count += 1;
                lv.alive_count_change += 1;
                lv.not_alive_count = lv.not_alive_count.saturating_sub(1);
            } else {
                lv.not_alive_count += 1;
                lv.not_alive_count_change += 1;
                lv.alive_count = lv.alive_count.saturating_sub(1);
            }
            lv.last_publication_handle = Some(writer);
            *lv
        };
        self.status
            .post_status(StatusKind::LivelinessChanged as u32);
        if let Some(listener) = self.listener() {
            listener.on_liveliness_changed(status);
        }
    }
}

/// The application-facing reader handle.
pub struct DataReader {
    core: Arc<ReaderCore>,
    deleted: AtomicBool,
}

impl DataReader {
    #[must_use]
    pub fn new(core: Arc<ReaderCore>) -> Self {
        DataReader {
            core,
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
    pub fn core(&self) -> &Arc<ReaderCore> {
        &self.core
    }

    fn check_alive(&self) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            Err(Error::AlreadyDeleted)
        } else {
            Ok(())
        }
    }

    fn convert(&self, entries: Vec<ReadEntry>) -> Vec<Sample> {
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let payload = entry.change.payload.to_vec();
            let valid_data = entry.change.kind == crate::cache::ChangeKind::Alive;
            let data = if valid_data {
                self.core
                    .descriptor
                    .as_ref()
                    .and_then(|d| xtypes::cdr::decode(d, &payload).ok())
            } else {
                None
            };

            // content filter gates delivery on decoded fields
            if let (Some(filter), Some(value)) = (&self.core.filter, &data) {
                if let Some(fields) = extract_fields(self.core.descriptor.as_deref(), value) {
                    match filter.evaluate(&fields) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            log::debug!("[DataReader] filter error: {}", e);
                        }
                    }
                }
            }

            out.push(Sample {
                info: SampleInfo {
                    sample_state: entry.sample_state,
                    view_state: entry.view_state,
                    instance_state: entry.instance_state,
                    source_timestamp: entry.change.source_ts,
                    arrival_timestamp: entry.change.arrival_ts,
                    writer: entry.change.writer,
                    sequence_number: entry.change.seq,
                    instance: entry.change.instance,
                    valid_data,
                },
                payload,
                data,
            });
        }
        out
    }

    /// Read without consuming.
    pub fn read(
        &self,
        sample_mask: u8,
        view_mask: u8,
        instance_mask: u8,
        max_samples: usize,
    ) -> Result<Vec<Sample>> {
        self.check_alive()?;
        let entries = self
            .core
            .cache
            .read(sample_mask, view_mask, instance_mask, max_samples);
        if entries.is_empty() {
            return Err(Error::NoData);
        }
        self.core.status.clear_status(StatusKind::DataAvailable as u32);
        Ok(self.convert(entries))
    }

    /// Take: read and remove.
    pub fn take(
        &self,
        sample_mask: u8,
        view_mask: u8,
        instance_mask: u8,
        max_samples: usize,
    ) -> Result<Vec<Sample>> {
        self.check_alive()?;
        let entries = self
            .core
            .cache
            .take(sample_mask, view_mask, instance_mask, max_samples);
        if entries.is_empty() {
            return Err(Error::NoData);
        }
        self.core.status.clear_status(StatusKind::DataAvailable as u32);
        self.core.reevaluate_conditions();
        Ok(self.convert(entries))
    }

    /// Take everything, any state.
    pub fn take_all(&self) -> Result<Vec<Sample>> {
        self.take(
            ANY_SAMPLE_STATE,
            ANY_VIEW_STATE,
            ANY_INSTANCE_STATE,
            usize::MAX,
        )
    }

    /// Return loaned samples. The loan is refcount-backed, so dropping the
    /// vector is equivalent; the explicit call exists for API symmetry and
    /// releases the borrowed chain references eagerly.
    pub fn return_loan(&self, samples: Vec<Sample>) -> Result<()> {
        self.check_alive()?;
        drop(samples);
        Ok(())
    }

    /// Create a read condition attached to this reader's cache.
    pub fn create_read_condition(
        &self,
        sample_mask: u8,
        view_mask: u8,
        instance_mask: u8,
    ) -> Result<Arc<ReadCondition>> {
        self.check_alive()?;
        let cond = ReadCondition::new(
            Arc::clone(&self.core.cache),
            sample_mask,
            view_mask,
            instance_mask,
        );
        match self.core.read_conditions.lock() {
            Ok(mut lock) => lock.push(Arc::clone(&cond)),
            Err(e) => e.into_inner().push(Arc::clone(&cond)),
        }
        Ok(cond)
    }

    /// Create a query condition with an expression over sample fields.
    pub fn create_query_condition(
        &self,
        sample_mask: u8,
        view_mask: u8,
        instance_mask: u8,
        expression: &str,
    ) -> Result<Arc<QueryCondition>> {
        self.check_alive()?;
        let cond = QueryCondition::new(
            Arc::clone(&self.core.cache),
            sample_mask,
            view_mask,
            instance_mask,
            expression,
        )
        .map_err(|e| Error::BadParameter(e.to_string()))?;
        match self.core.query_conditions.lock() {
            Ok(mut lock) => lock.push(Arc::clone(&cond)),
            Err(e) => e.into_inner().push(Arc::clone(&cond)),
        }
        Ok(cond)
    }

    /// Matched-publication status; reading clears the change counters.
    pub fn subscription_matched_status(&self) -> Result<SubscriptionMatchedStatus> {
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
            .clear_status(StatusKind::SubscriptionMatched as u32);
        Ok(out)
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn DataReaderListener>>) -> Result<()> {
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

    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }
}

/// Flatten a decoded struct into named scalar fields for filtering.
fn extract_fields(
    descriptor: Option<&TypeDescriptor>,
    value: &DynamicValue,
) -> Option<HashMap<String, FieldValue>> {
    use crate::xtypes::TypeCode;
    let descriptor = descriptor?;
    let TypeCode::Struct(st) = &descriptor.code else {
        return None;
    };
    let DynamicValue::Struct(values) = value else {
        return None;
    };
    let mut out = HashMap::new();
    for (field, fv) in st.fields.iter().zip(values) {
        let converted = match fv {
            DynamicValue::Boolean(v) => Some(FieldValue::Boolean(*v)),
            DynamicValue::Char(v) | DynamicValue::Octet(v) => {
                Some(FieldValue::Integer(i64::from(*v)))
            }
            DynamicValue::Short(v) => Some(FieldValue::Integer(i64::from(*v))),
            DynamicValue::UShort(v) => Some(FieldValue::Integer(i64::from(*v))),
            DynamicValue::Long(v) => Some(FieldValue::Integer(i64::from(*v))),
            DynamicValue::ULong(v) | DynamicValue::Enum(v) => {
                Some(FieldValue::Integer(i64::from(*v)))
            }
            DynamicValue::LongLong(v) => Some(FieldValue::Integer(*v)),
            DynamicValue::ULongLong(v) => i64::try_from(*v).ok().map(FieldValue::Integer),
            DynamicValue::Float(v) => Some(FieldValue::Float(f64::from(*v))),
            DynamicValue::Double(v) | DynamicValue::LongDouble(v) => Some(FieldValue::Float(*v)),
            DynamicValue::String(s) => Some(FieldValue::Text(s.clone())),
            _ => None,
        };
        if let Some(cv) = converted {
            out.insert(field.name.clone(), cv);
        }
    }
    Some(out)
}
