// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read and query conditions.
//!
//! Gated by a reader's (sample, view, instance) state masks; the query
//! variant additionally evaluates a content-filter expression over the
//! sample fields.

use super::condition::{Condition, SignalSet, WaitSignal};
use super::filter::ContentFilter;
use crate::cache::{HistoryCache, InstanceState, SampleState, ViewState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sample-state mask bits.
pub type SampleStateMask = u8;
/// View-state mask bits.
pub type ViewStateMask = u8;
/// Instance-state mask bits.
pub type InstanceStateMask = u8;

pub const READ_SAMPLE_STATE: SampleStateMask = 0x01;
pub const NOT_READ_SAMPLE_STATE: SampleStateMask = 0x02;
pub const ANY_SAMPLE_STATE: SampleStateMask = 0x03;

pub const NEW_VIEW_STATE: ViewStateMask = 0x01;
pub const NOT_NEW_VIEW_STATE: ViewStateMask = 0x02;
pub const ANY_VIEW_STATE: ViewStateMask = 0x03;

pub const ALIVE_INSTANCE_STATE: InstanceStateMask = 0x01;
pub const NOT_ALIVE_DISPOSED_INSTANCE_STATE: InstanceStateMask = 0x02;
pub const NOT_ALIVE_NO_WRITERS_INSTANCE_STATE: InstanceStateMask = 0x04;
pub const ANY_INSTANCE_STATE: InstanceStateMask = 0x07;

/// Bit for a concrete sample state.
#[must_use]
pub fn sample_state_bit(state: SampleState) -> SampleStateMask {
    match state {
        SampleState::Read => READ_SAMPLE_STATE,
        SampleState::NotRead => NOT_READ_SAMPLE_STATE,
    }
}

/// Bit for a concrete view state.
#[must_use]
pub fn view_state_bit(state: ViewState) -> ViewStateMask {
    match state {
        ViewState::New => NEW_VIEW_STATE,
        ViewState::NotNew => NOT_NEW_VIEW_STATE,
    }
}

/// Bit for a concrete instance state.
#[must_use]
pub fn instance_state_bit(state: InstanceState) -> InstanceStateMask {
    match state {
        InstanceState::Alive => ALIVE_INSTANCE_STATE,
        InstanceState::NotAliveDisposed => NOT_ALIVE_DISPOSED_INSTANCE_STATE,
        InstanceState::NotAliveNoWriters => NOT_ALIVE_NO_WRITERS_INSTANCE_STATE,
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1 << 32);

/// Condition triggered while the reader cache holds samples matching the
/// state masks.
pub struct ReadCondition {
    id: u64,
    cache: Arc<HistoryCache>,
    pub sample_mask: SampleStateMask,
    pub view_mask: ViewStateMask,
    pub instance_mask: InstanceStateMask,
    signals: SignalSet,
}

impl ReadCondition {
    #[must_use]
    pub fn new(
        cache: Arc<HistoryCache>,
        sample_mask: SampleStateMask,
        view_mask: ViewStateMask,
        instance_mask: InstanceStateMask,
    ) -> Arc<Self> {
        Arc::new(ReadCondition {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            cache,
            sample_mask,
            view_mask,
            instance_mask,
            signals: SignalSet::default(),
        })
    }

    /// Called by the reader when cache contents change.
    pub fn reevaluate(&self) {
        if self.trigger_value() {
            self.signals.raise_all();
        }
    }
}

impl Condition for ReadCondition {
    fn condition_id(&self) -> u64 {
        self.id
    }

    fn trigger_value(&self) -> bool {
        self.cache
            .matching_count(self.sample_mask, self.view_mask, self.instance_mask)
            > 0
    }

    fn add_signal(&self, signal: Arc<WaitSignal>) {
        if self.trigger_value() {
            signal.raise();
        }
        self.signals.add(signal);
    }

    fn remove_signal(&self, signal: &Arc<WaitSignal>) {
        self.signals.remove(signal);
    }
}

/// ReadCondition plus a query expression over sample fields.
pub struct QueryCondition {
    id: u64,
    cache: Arc<HistoryCache>,
    pub sample_mask: SampleStateMask,
    pub view_mask: ViewStateMask,
    pub instance_mask: InstanceStateMask,
    pub filter: ContentFilter,
    signals: SignalSet,
}

impl QueryCondition {
    pub fn new(
        cache: Arc<HistoryCache>,
        sample_mask: SampleStateMask,
        view_mask: ViewStateMask,
        instance_mask: InstanceStateMask,
        expression: &str,
    ) -> Result<Arc<Self>, super::filter::FilterError> {
        Ok(Arc::new(QueryCondition {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            cache,
            sample_mask,
            view_mask,
            instance_mask,
            filter: ContentFilter::parse(expression)?,
            signals: SignalSet::default(),
        }))
    }

    pub fn reevaluate(&self) {
        if self.trigger_value() {
            self.signals.raise_all();
        }
    }
}

impl Condition for QueryCondition {
    fn condition_id(&self) -> u64 {
        self.id
    }

    fn trigger_value(&self) -> bool {
        // state-mask gate; expression evaluation happens on read_w_condition
        self.cache
            .matching_count(self.sample_mask, self.view_mask, self.instance_mask)
            > 0
    }

    fn add_signal(&self, signal: Arc<WaitSignal>) {
        if self.trigger_value() {
            signal.raise();
        }
        self.signals.add(signal);
    }

    fn remove_signal(&self, signal: &Arc<WaitSignal>) {
        self.signals.remove(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, Change, ChangeKind};
    use crate::core::dbuf::DbChain;
    use crate::core::guid::Guid;
    use crate::core::time::Time;
    use crate::qos::Qos;

    fn empty_cache() -> Arc<HistoryCache> {
        Arc::new(HistoryCache::new(CacheConfig::from_qos(&Qos::default())))
    }

    fn push_one(cache: &HistoryCache) {
        let change = Arc::new(Change {
            seq: 1,
            writer: Guid::UNKNOWN,
            instance: 0,
            key: Vec::new(),
            kind: ChangeKind::Alive,
            payload: DbChain::from_vec(vec![1]),
            source_ts: Time::now(),
            arrival_ts: Time::now(),
        });
        cache.receive_change(change, 0).expect("receive");
    }

    #[test]
    fn test_read_condition_triggers_on_data() {
        let cache = empty_cache();
        let cond = ReadCondition::new(
            Arc::clone(&cache),
            NOT_READ_SAMPLE_STATE,
            ANY_VIEW_STATE,
            ANY_INSTANCE_STATE,
        );
        assert!(!cond.trigger_value());
        push_one(&cache);
        assert!(cond.trigger_value());

        // reading consumes the NOT_READ state
        cache.read(ANY_SAMPLE_STATE, ANY_VIEW_STATE, ANY_INSTANCE_STATE, 10);
        assert!(!cond.trigger_value());
    }

    #[test]
    fn test_query_condition_parses_expression() {
        let cache = empty_cache();
        let cond = QueryCondition::new(
            cache,
            ANY_SAMPLE_STATE,
            ANY_VIEW_STATE,
            ANY_INSTANCE_STATE,
            "x > 50 and y < 100",
        )
        .expect("expression should parse");
        assert!(!cond.trigger_value());
        assert!(QueryCondition::new(
            empty_cache(),
            ANY_SAMPLE_STATE,
            ANY_VIEW_STATE,
            ANY_INSTANCE_STATE,
            "x >",
        )
        .is_err());
    }
}
