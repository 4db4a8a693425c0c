// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-endpoint history cache.
//!
//! Writers and readers each own a `HistoryCache` holding `Change` records,
//! indexed two ways: by 64-bit sequence number (a skiplist) and by instance
//! key hash (a second skiplist whose nodes list that instance's changes).
//!
//! Writer-side contract: `add_change` assigns the next dense sequence
//! number, enforces KEEP_LAST depth per instance, and for KEEP_ALL blocks
//! up to `max_blocking_time` when resource limits are hit. Changes leave
//! the cache only after every matched reliable reader acknowledged them.
//!
//! Reader-side contract: `receive_change` inserts at the sequence position,
//! rejects on instance/sample limits, arbitrates EXCLUSIVE ownership, and
//! tracks (sample, view, instance) states for `read`/`take` masks.
//!
//! A change is freed when its last reference drops; caches and proxies
//! share changes through `Arc`.

use crate::core::dbuf::DbChain;
use crate::core::guid::Guid;
use crate::core::skiplist::SkipList;
use crate::core::time::Time;
use crate::dds::{Error, Result};
use crate::qos::{
    DestinationOrderKind, History, OwnershipKind, Qos, ResourceLimits, LENGTH_UNLIMITED,
};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Kind of a cache change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Alive,
    NotAliveDisposed,
    NotAliveUnregistered,
}

/// Sample state as seen by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    Read,
    NotRead,
}

/// View state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    New,
    NotNew,
}

/// Instance lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

/// One published sample plus its metadata. Immutable once created; shared
/// by refcount between caches and proxies.
#[derive(Debug)]
pub struct Change {
    /// Writer-scoped, dense, strictly increasing.
    pub seq: u64,
    pub writer: Guid,
    /// Instance key hash (0 for unkeyed topics).
    pub instance: u64,
    /// Serialized key value, kept as a tombstone after dispose.
    pub key: Vec<u8>,
    pub kind: ChangeKind,
    pub payload: DbChain,
    pub source_ts: Time,
    pub arrival_ts: Time,
}

struct CachedChange {
    change: Arc<Change>,
    sample_state: SampleState,
}

struct InstanceRec {
    state: InstanceState,
    view: ViewState,
    /// Order keys of this instance's changes, oldest first.
    seqs: Vec<OrderKey>,
    /// EXCLUSIVE arbitration: current owner (strength, writer guid).
    owner: Option<(i32, Guid)>,
    /// Generation counters for view-state transitions.
    disposed_generation: u32,
    no_writers_generation: u32,
    /// Last sample arrival, for time-based filtering and deadline checks.
    last_arrival: Option<Instant>,
    /// Deadline already reported for the current silence window.
    deadline_notified: bool,
}

impl InstanceRec {
    fn new() -> Self {
        InstanceRec {
            state: InstanceState::Alive,
            view: ViewState::New,
            seqs: Vec::new(),
            owner: None,
            disposed_generation: 0,
            no_writers_generation: 0,
            last_arrival: None,
            deadline_notified: false,
        }
    }
}

/// Why `receive_change` rejected a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InstanceLimit,
    SampleLimit,
    SamplePerInstanceLimit,
}

/// Cache behavior derived from the endpoint QoS.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub history: History,
    pub limits: ResourceLimits,
    pub destination_order: DestinationOrderKind,
    pub exclusive_ownership: bool,
    pub max_blocking_time: Duration,
    /// Samples older than this (by source timestamp) expire unread.
    pub lifespan: Option<Duration>,
    /// Reader-side minimum separation between delivered samples of one
    /// instance (TIME_BASED_FILTER).
    pub min_separation: Duration,
    /// PRESENTATION coherent_access: staged delivery per writer.
    pub coherent_access: bool,
}

impl CacheConfig {
    #[must_use]
    pub fn from_qos(qos: &Qos) -> Self {
        CacheConfig {
            history: qos.history,
            limits: qos.resource_limits,
            destination_order: qos.destination_order.kind,
            exclusive_ownership: qos.ownership.kind == OwnershipKind::Exclusive,
            max_blocking_time: qos.reliability.max_blocking_time.to_std(),
            lifespan: if qos.lifespan.duration.is_infinite() {
                None
            } else {
                Some(qos.lifespan.duration.to_std())
            },
            min_separation: qos.time_based_filter.minimum_separation.to_std(),
            coherent_access: qos.presentation.coherent_access,
        }
    }
}

/// Primary-index key: `(sort, tiebreak)`.
///
/// Writer caches use `(seq, 0)`. Reader caches use the source timestamp or
/// the reception counter as the sort component and a monotonic counter as
/// the tiebreak, so two distinct changes can never collide on one key.
type OrderKey = (u64, u64);

struct CacheInner {
    /// Primary index: sequence number (writer caches) or delivery order
    /// token (reader caches).
    changes: SkipList<OrderKey, CachedChange>,
    /// Secondary index: instance key hash.
    instances: SkipList<u64, InstanceRec>,
    next_seq: u64,
    /// Reader-side delivery-order counter.
    order_counter: u64,
    total: usize,
    /// Coherent-set staging: per-writer buffered samples awaiting the
    /// closing marker.
    staging: std::collections::HashMap<Guid, Vec<(Arc<Change>, i32)>>,
}

/// The history cache.
pub struct HistoryCache {
    inner: Mutex<CacheInner>,
    space: Condvar,
    cfg: CacheConfig,
}

/// One entry returned by `read`/`take`.
pub struct ReadEntry {
    pub change: Arc<Change>,
    pub sample_state: SampleState,
    pub view_state: ViewState,
    pub instance_state: InstanceState,
}

impl HistoryCache {
    #[must_use]
    pub fn new(cfg: CacheConfig) -> Self {
        HistoryCache {
            inner: Mutex::new(CacheInner {
                changes: SkipList::new(),
                instances: SkipList::new(),
                next_seq: 0,
                order_counter: 0,
                total: 0,
                staging: std::collections::HashMap::new(),
            }),
            space: Condvar::new(),
            cfg,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        match self.inner.lock() {
            Ok(lock) => lock,
            Err(e) => {
                log::debug!("[HistoryCache] Lock poisoned, recovering");
                e.into_inner()
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().total
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.lock().instances.len()
    }

    /// Oldest cached sequence number.
    #[must_use]
    pub fn first_seq(&self) -> Option<u64> {
        self.lock().changes.head_entry().map(|(key, _)| key.0)
    }

    /// Newest cached sequence number.
    #[must_use]
    pub fn last_seq(&self) -> Option<u64> {
        let inner = self.lock();
        let mut last = None;
        inner.changes.walk(|key, _| {
            last = Some(key.0);
            true
        });
        last
    }

    /// Next sequence number the writer will assign.
    #[must_use]
    pub fn next_writer_seq(&self) -> u64 {
        self.lock().next_seq + 1
    }

    // ========================================================================
    // WRITER SIDE
    // ========================================================================

    /// Append a change with the next sequence number.
    ///
    /// KEEP_LAST evicts the oldest alive change of the instance beyond the
    /// depth. KEEP_ALL blocks up to `max_blocking_time` while resource
    /// limits are exceeded and returns `Timeout` when space never frees.
    /// Under concurrent writers the cache lock serializes them; each waiter
    /// keeps its own deadline.
    pub fn add_change(
        &self,
        writer: Guid,
        kind: ChangeKind,
        instance: u64,
        key: Vec<u8>,
        payload: DbChain,
        source_ts: Time,
    ) -> Result<u64> {
        let mut inner = self.lock();

        // instance admission
        let is_new_instance = inner.instances.search(&instance).is_none();
        if is_new_instance
            && self.cfg.limits.max_instances != LENGTH_UNLIMITED
            && inner.instances.len() as u32 >= self.cfg.limits.max_instances
        {
            return Err(Error::OutOfResources);
        }

        match self.cfg.history {
            History::KeepLast(depth) => {
                let evict = {
                    let (rec, _) = inner.instances.insert_or_get(instance, InstanceRec::new);
                    if kind == ChangeKind::Alive && rec.seqs.len() as u32 >= depth {
                        Some(rec.seqs[0])
                    } else {
                        None
                    }
                };
                if let Some(old_seq) = evict {
                    Self::remove_locked(&mut inner, old_seq);
                }
            }
            History::KeepAll => {
                let deadline = Instant::now() + self.cfg.max_blocking_time;
                loop {
                    let full = self.is_full_locked(&inner, instance);
                    if !full {
                        break;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    let (guard, timeout) = self
                        .space
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    inner = guard;
                    if timeout.timed_out() && self.is_full_locked(&inner, instance) {
                        return Err(Error::Timeout);
                    }
                }
            }
        }

        inner.next_seq += 1;
        let seq = inner.next_seq;
        let change = Arc::new(Change {
            seq,
            writer,
            instance,
            key,
            kind,
            payload,
            source_ts,
            arrival_ts: Time::now(),
        });

        let inserted = Self::insert_locked(&mut inner, (seq, 0), change, kind, instance);
        debug_assert!(inserted, "writer sequence numbers never repeat");
        Ok(seq)
    }

    fn is_full_locked(&self, inner: &CacheInner, instance: u64) -> bool {
        if self.cfg.limits.max_samples != LENGTH_UNLIMITED
            && inner.total as u32 >= self.cfg.limits.max_samples
        {
            return true;
        }
        if self.cfg.limits.max_samples_per_instance != LENGTH_UNLIMITED {
            if let Some(rec) = inner.instances.search(&instance) {
                if rec.seqs.len() as u32 >= self.cfg.limits.max_samples_per_instance {
                    return true;
                }
            }
        }
        false
    }

    /// Insert one change under its order key. Returns false (and leaves
    /// every index untouched) when the key is already present, so the
    /// instance list and the total count can never drift from the primary
    /// index.
    fn insert_locked(
        inner: &mut CacheInner,
        order_key: OrderKey,
        change: Arc<Change>,
        kind: ChangeKind,
        instance: u64,
    ) -> bool {
        let (_, allocated) = inner.changes.insert_or_get(order_key, || CachedChange {
            change,
            sample_state: SampleState::NotRead,
        });
        if !allocated {
            log::debug!(
                "[HistoryCache] duplicate order key {:?}, dropping change",
                order_key
            );
            return false;
        }
        inner.total += 1;

        let (rec, _) = inner.instances.insert_or_get(instance, InstanceRec::new);
        rec.seqs.push(order_key);
        rec.last_arrival = Some(Instant::now());
        rec.deadline_notified = false;
        match kind {
            ChangeKind::Alive => {
                if rec.state != InstanceState::Alive {
                    // instance reborn: NEW again for readers
                    rec.view = ViewState::New;
                }
                rec.state = InstanceState::Alive;
            }
            ChangeKind::NotAliveDisposed => {
                rec.state = InstanceState::NotAliveDisposed;
                rec.disposed_generation += 1;
            }
            ChangeKind::NotAliveUnregistered => {
                rec.state = InstanceState::NotAliveNoWriters;
                rec.no_writers_generation += 1;
            }
        }
        true
    }

    fn remove_locked(inner: &mut CacheInner, order_key: OrderKey) -> Option<Arc<Change>> {
        let cached = inner.changes.delete(&order_key)?;
        inner.total -= 1;
        let instance = cached.change.instance;
        let empty = {
            if let Some(rec) = inner.instances.search_mut(&instance) {
                rec.seqs.retain(|s| *s != order_key);
                // tombstone: a not-alive instance keeps its record until
                // every change drained
                rec.seqs.is_empty() && rec.state != InstanceState::Alive
            } else {
                false
            }
        };
        if empty {
            inner.instances.delete(&instance);
        }
        Some(cached.change)
    }

    /// Remove one change (used after every matched reader acknowledged).
    pub fn remove_change(&self, seq: u64) -> Option<Arc<Change>> {
        let out = Self::remove_locked(&mut self.lock(), (seq, 0));
        if out.is_some() {
            self.space.notify_all();
        }
        out
    }

    /// Purge every change at or below `acked`. Returns the removed count.
    pub fn remove_acknowledged(&self, acked: u64) -> usize {
        let mut removed = 0;
        let mut inner = self.lock();
        loop {
            let head = inner.changes.head_entry().map(|(key, _)| *key);
            match head {
                Some(key) if key.0 <= acked => {
                    Self::remove_locked(&mut inner, key);
                    removed += 1;
                }
                _ => break,
            }
        }
        drop(inner);
        if removed > 0 {
            self.space.notify_all();
        }
        removed
    }

    /// Fetch one change by sequence number (writer retransmit path).
    #[must_use]
    pub fn get_change(&self, seq: u64) -> Option<Arc<Change>> {
        self.lock()
            .changes
            .search(&(seq, 0))
            .map(|c| Arc::clone(&c.change))
    }

    /// Snapshot alive changes in sequence order for durability replay.
    #[must_use]
    pub fn alive_snapshot(&self) -> Vec<Arc<Change>> {
        let inner = self.lock();
        let mut out = Vec::new();
        inner.changes.walk(|_, cached| {
            if cached.change.kind == ChangeKind::Alive {
                out.push(Arc::clone(&cached.change));
            }
            true
        });
        out
    }

    // ========================================================================
    // READER SIDE
    // ========================================================================

    /// Insert a change received from a matched writer.
    ///
    /// Ownership arbitration happens here: on an EXCLUSIVE topic a sample
    /// from a writer weaker than the current owner is silently suppressed
    /// (`Ok(false)`), per the DDS ownership rules.
    pub fn receive_change(&self, change: Arc<Change>, strength: i32) -> Result<bool> {
        let mut inner = self.lock();

        // coherent staging: buffer until the closing marker arrives
        if self.cfg.coherent_access {
            if let Some(staged) = inner.staging.get_mut(&change.writer) {
                staged.push((change, strength));
                return Ok(false);
            }
        }

        // time-based filter: drop alive samples arriving inside the
        // instance's minimum separation window
        if !self.cfg.min_separation.is_zero() && change.kind == ChangeKind::Alive {
            if let Some(rec) = inner.instances.search(&change.instance) {
                if let Some(last) = rec.last_arrival {
                    if last.elapsed() < self.cfg.min_separation {
                        return Ok(false);
                    }
                }
            }
        }

        let is_new_instance = inner.instances.search(&change.instance).is_none();
        if is_new_instance
            && self.cfg.limits.max_instances != LENGTH_UNLIMITED
            && inner.instances.len() as u32 >= self.cfg.limits.max_instances
        {
            return Err(Error::OutOfResources);
        }
        if self.cfg.limits.max_samples != LENGTH_UNLIMITED
            && inner.total as u32 >= self.cfg.limits.max_samples
        {
            return Err(Error::OutOfResources);
        }

        // EXCLUSIVE ownership: strongest writer wins, GuidPrefix breaks ties
        if self.cfg.exclusive_ownership {
            let (rec, _) = inner.instances.insert_or_get(change.instance, InstanceRec::new);
            let candidate = (strength, change.writer);
            match rec.owner {
                None => rec.owner = Some(candidate),
                Some((cur_strength, cur_writer)) if cur_writer != change.writer => {
                    let stronger = strength > cur_strength
                        || (strength == cur_strength && change.writer.prefix > cur_writer.prefix);
                    if stronger && change.kind == ChangeKind::Alive {
                        rec.owner = Some(candidate);
                    } else if change.kind == ChangeKind::Alive {
                        return Ok(false); // suppressed: weaker writer
                    }
                }
                _ => {}
            }
            // owner going not-alive releases the instance
            if change.kind != ChangeKind::Alive {
                if let Some((_, owner)) = rec.owner {
                    if owner == change.writer {
                        rec.owner = None;
                    }
                }
            }
        }

        // KEEP_LAST depth on the reader side as well
        if let History::KeepLast(depth) = self.cfg.history {
            let evict = inner
                .instances
                .search(&change.instance)
                .filter(|rec| change.kind == ChangeKind::Alive && rec.seqs.len() as u32 >= depth)
                .map(|rec| rec.seqs[0]);
            if let Some(old) = evict {
                Self::remove_locked(&mut inner, old);
            }
        } else if self.cfg.limits.max_samples_per_instance != LENGTH_UNLIMITED {
            if let Some(rec) = inner.instances.search(&change.instance) {
                if rec.seqs.len() as u32 >= self.cfg.limits.max_samples_per_instance {
                    return Err(Error::OutOfResources);
                }
            }
        }

        // delivery-order token: sort by source timestamp or reception
        // order; the monotonic counter breaks ties so keys never collide
        inner.order_counter += 1;
        let order_key = match self.cfg.destination_order {
            DestinationOrderKind::BySourceTimestamp => {
                (change.source_ts.to_nanos(), inner.order_counter)
            }
            DestinationOrderKind::ByReceptionTimestamp => (inner.order_counter, 0),
        };

        let kind = change.kind;
        let instance = change.instance;
        Ok(Self::insert_locked(&mut inner, order_key, change, kind, instance))
    }

    /// Open a coherent set for one writer: subsequent samples from it are
    /// staged instead of delivered.
    pub fn begin_coherent(&self, writer: Guid) {
        if !self.cfg.coherent_access {
            return;
        }
        self.lock().staging.entry(writer).or_default();
    }

    /// Close a coherent set: staged samples enter the cache as one batch,
    /// with no reader-visible interleaving gap. Returns the flushed count.
    pub fn end_coherent(&self, writer: Guid) -> usize {
        let staged = {
            let mut inner = self.lock();
            inner.staging.remove(&writer).unwrap_or_default()
        };
        let count = staged.len();
        for (change, strength) in staged {
            if let Err(e) = self.receive_change(change, strength) {
                log::debug!("[HistoryCache] coherent flush dropped a sample: {}", e);
            }
        }
        count
    }

    /// Instances whose deadline period elapsed without a new sample.
    /// Each lapse is reported once until the instance receives data again.
    pub fn overdue_instances(&self, period: Duration) -> Vec<u64> {
        let mut inner = self.lock();
        let mut overdue = Vec::new();
        let mut keys: Vec<u64> = Vec::new();
        inner.instances.walk(|key, rec| {
            if rec.state == InstanceState::Alive && !rec.deadline_notified {
                if let Some(last) = rec.last_arrival {
                    if last.elapsed() > period {
                        keys.push(*key);
                    }
                }
            }
            true
        });
        for key in keys {
            if let Some(rec) = inner.instances.search_mut(&key) {
                rec.deadline_notified = true;
                overdue.push(key);
            }
        }
        overdue
    }

    /// Drop samples whose lifespan expired. Returns the number removed.
    pub fn expire_lifespan(&self) -> usize {
        let Some(lifespan) = self.cfg.lifespan else {
            return 0;
        };
        let cutoff = Time::now()
            .to_nanos()
            .saturating_sub(lifespan.as_nanos() as u64);
        let mut inner = self.lock();
        let mut expired: Vec<OrderKey> = Vec::new();
        inner.changes.walk(|order_key, cached| {
            if cached.change.kind == ChangeKind::Alive
                && cached.change.source_ts.to_nanos() < cutoff
            {
                expired.push(*order_key);
            }
            true
        });
        let count = expired.len();
        for key in expired {
            Self::remove_locked(&mut inner, key);
        }
        drop(inner);
        if count > 0 {
            self.space.notify_all();
        }
        count
    }

    /// A matched writer went away: instances it owned alone flip to
    /// NOT_ALIVE_NO_WRITERS and EXCLUSIVE arbitration is released.
    pub fn writer_not_alive(&self, writer: Guid) {
        let mut inner = self.lock();
        let mut touched: Vec<u64> = Vec::new();
        inner.instances.walk(|key, rec| {
            if let Some((_, owner)) = rec.owner {
                if owner == writer {
                    touched.push(*key);
                }
            }
            true
        });
        for key in touched {
            if let Some(rec) = inner.instances.search_mut(&key) {
                rec.owner = None;
                rec.state = InstanceState::NotAliveNoWriters;
                rec.no_writers_generation += 1;
            }
        }
    }

    /// Read matching samples without consuming them; marks them READ.
    pub fn read(
        &self,
        sample_mask: u8,
        view_mask: u8,
        instance_mask: u8,
        max_samples: usize,
    ) -> Vec<ReadEntry> {
        self.collect(sample_mask, view_mask, instance_mask, max_samples, false)
    }

    /// Take matching samples, removing them from the cache.
    pub fn take(
        &self,
        sample_mask: u8,
        view_mask: u8,
        instance_mask: u8,
        max_samples: usize,
    ) -> Vec<ReadEntry> {
        let out = self.collect(sample_mask, view_mask, instance_mask, max_samples, true);
        if !out.is_empty() {
            self.space.notify_all();
        }
        out
    }

    fn collect(
        &self,
        sample_mask: u8,
        view_mask: u8,
        instance_mask: u8,
        max_samples: usize,
        take: bool,
    ) -> Vec<ReadEntry> {
        use crate::dds::read_condition::{
            instance_state_bit, sample_state_bit, view_state_bit,
        };

        let mut inner = self.lock();
        let mut out: Vec<ReadEntry> = Vec::new();

        // first pass: select order keys under the lock
        let mut selections: Vec<(OrderKey, SampleState, ViewState, InstanceState, u64)> =
            Vec::new();
        inner.changes.walk(|order_key, cached| {
            if selections.len() >= max_samples {
                return false;
            }
            let instance = cached.change.instance;
            let (view, istate) = match inner.instances.search(&instance) {
                Some(rec) => (rec.view, rec.state),
                None => (ViewState::NotNew, InstanceState::Alive),
            };
            if sample_state_bit(cached.sample_state) & sample_mask == 0 {
                return true;
            }
            if view_state_bit(view) & view_mask == 0 {
                return true;
            }
            if instance_state_bit(istate) & instance_mask == 0 {
                return true;
            }
            selections.push((*order_key, cached.sample_state, view, istate, instance));
            true
        });

        // the walk yields strictly ascending keys; a repeated key would
        // mean a corrupted index, so skip rather than double-process
        let mut last_key: Option<OrderKey> = None;
        for (order_key, sample_state, view, istate, instance) in selections {
            if last_key == Some(order_key) {
                continue;
            }
            last_key = Some(order_key);
            if take {
                if let Some(change) = Self::remove_locked(&mut inner, order_key) {
                    out.push(ReadEntry {
                        change,
                        sample_state,
                        view_state: view,
                        instance_state: istate,
                    });
                }
            } else if let Some(cached) = inner.changes.search_mut(&order_key) {
                cached.sample_state = SampleState::Read;
                out.push(ReadEntry {
                    change: Arc::clone(&cached.change),
                    sample_state,
                    view_state: view,
                    instance_state: istate,
                });
            }
            // accessed instances are no longer NEW
            if let Some(rec) = inner.instances.search_mut(&instance) {
                rec.view = ViewState::NotNew;
            }
        }

        out
    }

    /// Count samples currently matching the given state masks.
    #[must_use]
    pub fn matching_count(&self, sample_mask: u8, view_mask: u8, instance_mask: u8) -> usize {
        use crate::dds::read_condition::{
            instance_state_bit, sample_state_bit, view_state_bit,
        };
        let inner = self.lock();
        let mut count = 0;
        inner.changes.walk(|_, cached| {
            let (view, istate) = match inner.instances.search(&cached.change.instance) {
                Some(rec) => (rec.view, rec.state),
                None => (ViewState::NotNew, InstanceState::Alive),
            };
            if sample_state_bit(cached.sample_state) & sample_mask != 0
                && view_state_bit(view) & view_mask != 0
                && instance_state_bit(istate) & instance_mask != 0
            {
                count += 1;
            }
            true
        });
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dds::read_condition::{ANY_INSTANCE_STATE, ANY_SAMPLE_STATE, ANY_VIEW_STATE};
    use crate::qos::Reliability;

    fn writer_guid(n: u8) -> Guid {
        let mut prefix = [0u8; 12];
        prefix[11] = n;
        Guid::new(crate::core::guid::GuidPrefix(prefix), crate::core::guid::EntityId([0, 0, 1, 0x02]))
    }

    fn cache(history: History, limits: ResourceLimits) -> HistoryCache {
        HistoryCache::new(CacheConfig {
            history,
            limits,
            destination_order: DestinationOrderKind::ByReceptionTimestamp,
            exclusive_ownership: false,
            max_blocking_time: Duration::from_millis(20),
            lifespan: None,
            min_separation: Duration::ZERO,
            coherent_access: false,
        })
    }

    fn add(c: &HistoryCache, instance: u64) -> u64 {
        c.add_change(
            writer_guid(1),
            ChangeKind::Alive,
            instance,
            Vec::new(),
            DbChain::from_vec(vec![1, 2, 3]),
            Time::now(),
        )
        .expect("add_change should succeed")
    }

    #[test]
    fn test_sequence_numbers_dense_and_increasing() {
        let c = cache(History::KeepAll, ResourceLimits::default());
        for expected in 1..=10u64 {
            assert_eq!(add(&c, 0), expected);
        }
        assert_eq!(c.first_seq(), Some(1));
        assert_eq!(c.last_seq(), Some(10));
    }

    #[test]
    fn test_keep_last_depth_per_instance() {
        let c = cache(History::KeepLast(3), ResourceLimits::default());
        for _ in 0..5 {
            add(&c, 7);
        }
        // other instance unaffected
        add(&c, 8);
        assert_eq!(c.len(), 4);
        assert_eq!(c.first_seq(), Some(3));
    }

    #[test]
    fn test_keep_all_blocks_then_times_out() {
        let limits = ResourceLimits {
            max_samples: 2,
            ..ResourceLimits::default()
        };
        let c = cache(History::KeepAll, limits);
        add(&c, 0);
        add(&c, 0);
        let start = Instant::now();
        let err = c
            .add_change(
                writer_guid(1),
                ChangeKind::Alive,
                0,
                Vec::new(),
                DbChain::from_vec(vec![0]),
                Time::now(),
            )
            .expect_err("full KEEP_ALL cache must time out");
        assert!(matches!(err, Error::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_keep_all_unblocks_on_ack_purge() {
        let limits = ResourceLimits {
            max_samples: 2,
            ..ResourceLimits::default()
        };
        let c = Arc::new(HistoryCache::new(CacheConfig {
            history: History::KeepAll,
            limits,
            destination_order: DestinationOrderKind::ByReceptionTimestamp,
            exclusive_ownership: false,
            max_blocking_time: Duration::from_millis(500),
            lifespan: None,
            min_separation: Duration::ZERO,
            coherent_access: false,
        }));
        add(&c, 0);
        add(&c, 0);

        let c2 = Arc::clone(&c);
        let unblocker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            assert_eq!(c2.remove_acknowledged(1), 1);
        });

        let seq = add(&c, 0);
        assert_eq!(seq, 3);
        unblocker.join().expect("unblocker thread");
    }

    #[test]
    fn test_ack_purge_invariant() {
        let c = cache(History::KeepAll, ResourceLimits::default());
        for _ in 0..5 {
            add(&c, 0);
        }
        assert_eq!(c.remove_acknowledged(3), 3);
        assert_eq!(c.first_seq(), Some(4));
        assert!(c.get_change(3).is_none());
        assert!(c.get_change(4).is_some());
    }

    #[test]
    fn test_max_instances_enforced() {
        let limits = ResourceLimits {
            max_instances: 2,
            ..ResourceLimits::default()
        };
        let c = cache(History::KeepAll, limits);
        add(&c, 1);
        add(&c, 2);
        let err = c
            .add_change(
                writer_guid(1),
                ChangeKind::Alive,
                3,
                Vec::new(),
                DbChain::from_vec(vec![0]),
                Time::now(),
            )
            .expect_err("third instance must be rejected");
        assert!(matches!(err, Error::OutOfResources));
    }

    #[test]
    fn test_dispose_keeps_tombstone() {
        let c = cache(History::KeepAll, ResourceLimits::default());
        add(&c, 9);
        c.add_change(
            writer_guid(1),
            ChangeKind::NotAliveDisposed,
            9,
            vec![0xAA],
            DbChain::from_vec(Vec::new()),
            Time::now(),
        )
        .expect("dispose change");

        assert_eq!(c.instance_count(), 1);
        // draining all changes removes the tombstone too
        c.remove_acknowledged(u64::MAX);
        assert_eq!(c.instance_count(), 0);
    }

    #[test]
    fn test_reader_read_take_masks() {
        let c = cache(History::KeepAll, ResourceLimits::default());
        let ch = Arc::new(Change {
            seq: 1,
            writer: writer_guid(1),
            instance: 0,
            key: Vec::new(),
            kind: ChangeKind::Alive,
            payload: DbChain::from_vec(vec![5]),
            source_ts: Time::now(),
            arrival_ts: Time::now(),
        });
        assert!(c.receive_change(ch, 0).expect("receive"));

        let fresh = c.read(ANY_SAMPLE_STATE, ANY_VIEW_STATE, ANY_INSTANCE_STATE, 10);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].sample_state, SampleState::NotRead);
        assert_eq!(fresh[0].view_state, ViewState::New);

        // second read: sample is now READ, view NOT_NEW
        let again = c.read(ANY_SAMPLE_STATE, ANY_VIEW_STATE, ANY_INSTANCE_STATE, 10);
        assert_eq!(again[0].sample_state, SampleState::Read);
        assert_eq!(again[0].view_state, ViewState::NotNew);

        let taken = c.take(ANY_SAMPLE_STATE, ANY_VIEW_STATE, ANY_INSTANCE_STATE, 10);
        assert_eq!(taken.len(), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn test_exclusive_ownership_arbitration() {
        let c = HistoryCache::new(CacheConfig {
            history: History::KeepAll,
            limits: ResourceLimits::default(),
            destination_order: DestinationOrderKind::ByReceptionTimestamp,
            exclusive_ownership: true,
            max_blocking_time: Duration::from_millis(10),
            lifespan: None,
            min_separation: Duration::ZERO,
            coherent_access: false,
        });

        let strong = writer_guid(2);
        let weak = writer_guid(1);
        let mk = |writer: Guid, seq: u64| {
            Arc::new(Change {
                seq,
                writer,
                instance: 42,
                key: Vec::new(),
                kind: ChangeKind::Alive,
                payload: DbChain::from_vec(vec![seq as u8]),
                source_ts: Time::now(),
                arrival_ts: Time::now(),
            })
        };

        assert!(c.receive_change(mk(strong, 1), 20).expect("strong sample"));
        // weaker writer suppressed
        assert!(!c.receive_change(mk(weak, 1), 10).expect("weak sample"));

        // owner disappears: weak writer becomes visible
        c.writer_not_alive(strong);
        assert!(c.receive_change(mk(weak, 2), 10).expect("weak after owner loss"));
    }

    #[test]
    fn test_change_refcount_shared_with_proxy() {
        let c = cache(History::KeepAll, ResourceLimits::default());
        add(&c, 0);
        let held = c.get_change(1).expect("change present");
        assert_eq!(Arc::strong_count(&held), 2);
        c.remove_change(1);
        // our reference keeps the change alive until dropped
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[test]
    fn test_source_timestamp_collisions_keep_every_sample() {
        let qos = Qos {
            destination_order: crate::qos::DestinationOrder {
                kind: DestinationOrderKind::BySourceTimestamp,
            },
            history: History::KeepAll,
            ..Qos::default()
        };
        let c = HistoryCache::new(CacheConfig::from_qos(&qos));

        // many samples sharing one source timestamp: the tiebreak counter
        // must keep them all distinct in the primary index
        let stamp = Time::from_nanos(1_700_000_000_000_000_000);
        for seq in 1..=64u64 {
            let change = Arc::new(Change {
                seq,
                writer: writer_guid(1),
                instance: seq,
                key: Vec::new(),
                kind: ChangeKind::Alive,
                payload: DbChain::from_vec(vec![seq as u8]),
                source_ts: stamp,
                arrival_ts: Time::now(),
            });
            assert!(c.receive_change(change, 0).expect("receive"));
        }
        assert_eq!(c.len(), 64);

        let taken = c.take(ANY_SAMPLE_STATE, ANY_VIEW_STATE, ANY_INSTANCE_STATE, 128);
        assert_eq!(taken.len(), 64);
        assert!(c.is_empty());
        assert_eq!(c.instance_count(), 0);
    }

    #[test]
    fn test_time_based_filter_drops_rapid_samples() {
        let qos = Qos {
            time_based_filter: crate::qos::TimeBasedFilter {
                minimum_separation: crate::core::time::Duration::from_millis(100),
            },
            ..Qos::default()
        };
        let c = HistoryCache::new(CacheConfig::from_qos(&qos));
        let mk = |seq: u64| {
            Arc::new(Change {
                seq,
                writer: writer_guid(1),
                instance: 5,
                key: Vec::new(),
                kind: ChangeKind::Alive,
                payload: DbChain::from_vec(vec![seq as u8]),
                source_ts: Time::now(),
                arrival_ts: Time::now(),
            })
        };
        assert!(c.receive_change(mk(1), 0).expect("first sample"));
        // second sample inside the separation window: filtered
        assert!(!c.receive_change(mk(2), 0).expect("filtered sample"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_coherent_staging_delivers_atomically() {
        let qos = Qos {
            presentation: crate::qos::Presentation {
                coherent_access: true,
                ..Default::default()
            },
            history: History::KeepLast(8),
            ..Qos::default()
        };
        let c = HistoryCache::new(CacheConfig::from_qos(&qos));
        let w = writer_guid(1);
        let mk = |seq: u64| {
            Arc::new(Change {
                seq,
                writer: w,
                instance: seq,
                key: Vec::new(),
                kind: ChangeKind::Alive,
                payload: DbChain::from_vec(vec![seq as u8]),
                source_ts: Time::now(),
                arrival_ts: Time::now(),
            })
        };

        c.begin_coherent(w);
        assert!(!c.receive_change(mk(1), 0).expect("staged"));
        assert!(!c.receive_change(mk(2), 0).expect("staged"));
        assert_eq!(c.len(), 0, "staged samples must stay invisible");

        assert_eq!(c.end_coherent(w), 2);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_deadline_overdue_reported_once() {
        let c = cache(History::KeepAll, ResourceLimits::default());
        add(&c, 3);
        std::thread::sleep(Duration::from_millis(30));

        let overdue = c.overdue_instances(Duration::from_millis(10));
        assert_eq!(overdue, vec![3]);
        // no repeat until a new sample arrives
        assert!(c.overdue_instances(Duration::from_millis(10)).is_empty());
        add(&c, 3);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(c.overdue_instances(Duration::from_millis(10)), vec![3]);
    }

    #[test]
    fn test_lifespan_expiry() {
        let qos = Qos {
            lifespan: crate::qos::Lifespan {
                duration: crate::core::time::Duration::from_millis(10),
            },
            ..Qos::default()
        };
        let c = HistoryCache::new(CacheConfig::from_qos(&qos));
        c.add_change(
            writer_guid(1),
            ChangeKind::Alive,
            0,
            Vec::new(),
            DbChain::from_vec(vec![1]),
            Time::from_nanos(Time::now().to_nanos() - 1_000_000_000),
        )
        .expect("add");
        assert_eq!(c.expire_lifespan(), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn test_reliability_qos_feeds_config() {
        let qos = Qos {
            reliability: Reliability {
                kind: crate::qos::ReliabilityKind::Reliable,
                max_blocking_time: crate::core::time::Duration::from_millis(250),
            },
            ..Qos::default()
        };
        let cfg = CacheConfig::from_qos(&qos);
        assert_eq!(cfg.max_blocking_time, Duration::from_millis(250));
    }
}
