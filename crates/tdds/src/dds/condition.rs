// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Conditions: the trigger primitives WaitSets block on.
//!
//! A `StatusCondition` triggers when any status in its mask is active on
//! its entity; a `GuardCondition` is a plain user-settable bit. Trigger
//! recomputation notifies every waitset signal registered on the
//! condition, which is how a blocked `wait` wakes immediately.

use super::status::StatusMask;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

static NEXT_CONDITION_ID: AtomicU64 = AtomicU64::new(1);

/// Wake signal a waitset registers on each attached condition.
pub struct WaitSignal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl WaitSignal {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(WaitSignal {
            flag: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Raise the signal, waking any blocked waiter.
    pub fn raise(&self) {
        let mut flag = match self.flag.lock() {
            Ok(lock) => lock,
            Err(e) => e.into_inner(),
        };
        *flag = true;
        self.cond.notify_all();
    }

    /// Block until raised or the timeout elapses; clears the flag.
    /// Returns true when raised.
    pub fn wait(&self, timeout: std::time::Duration) -> bool {
        let mut flag = match self.flag.lock() {
            Ok(lock) => lock,
            Err(e) => e.into_inner(),
        };
        let deadline = std::time::Instant::now() + timeout;
        while !*flag {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(flag, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            flag = guard;
        }
        *flag = false;
        true
    }
}

/// A condition a WaitSet can hold.
pub trait Condition: Send + Sync {
    /// Stable identity for attach/detach bookkeeping.
    fn condition_id(&self) -> u64;

    /// Current trigger value.
    fn trigger_value(&self) -> bool;

    /// Register a waitset signal to notify on trigger transitions.
    fn add_signal(&self, signal: Arc<WaitSignal>);

    /// Remove a previously registered signal.
    fn remove_signal(&self, signal: &Arc<WaitSignal>);
}

/// Shared signal list used by the concrete conditions.
#[derive(Default)]
pub struct SignalSet {
    signals: Mutex<Vec<Arc<WaitSignal>>>,
}

impl SignalSet {
    pub fn add(&self, signal: Arc<WaitSignal>) {
        match self.signals.lock() {
            Ok(mut lock) => lock.push(signal),
            Err(e) => e.into_inner().push(signal),
        }
    }

    pub fn remove(&self, signal: &Arc<WaitSignal>) {
        let mut lock = match self.signals.lock() {
            Ok(lock) => lock,
            Err(e) => e.into_inner(),
        };
        lock.retain(|s| !Arc::ptr_eq(s, signal));
    }

    pub fn raise_all(&self) {
        let signals: Vec<Arc<WaitSignal>> = match self.signals.lock() {
            Ok(lock) => lock.clone(),
            Err(e) => e.into_inner().clone(),
        };
        for s in signals {
            s.raise();
        }
    }
}

/// Status-mask-gated condition owned by every entity.
pub struct StatusCondition {
    id: u64,
    enabled_mask: AtomicU32,
    active: AtomicU32,
    signals: SignalSet,
}

impl StatusCondition {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(StatusCondition {
            id: NEXT_CONDITION_ID.fetch_add(1, Ordering::Relaxed),
            enabled_mask: AtomicU32::new(u32::MAX),
            active: AtomicU32::new(0),
            signals: SignalSet::default(),
        })
    }

    /// Restrict which statuses trigger this condition.
    pub fn set_enabled_statuses(&self, mask: StatusMask) {
        self.enabled_mask.store(mask, Ordering::Release);
        if self.trigger_value() {
            self.signals.raise_all();
        }
    }

    #[must_use]
    pub fn enabled_statuses(&self) -> StatusMask {
        self.enabled_mask.load(Ordering::Acquire)
    }

    /// Entity-side: mark a status active (edge raises the waitsets).
    pub fn post_status(&self, bit: StatusMask) {
        let prev = self.active.fetch_or(bit, Ordering::AcqRel);
        let newly = prev & bit != bit;
        if newly && bit & self.enabled_mask.load(Ordering::Acquire) != 0 {
            self.signals.raise_all();
        }
    }

    /// Entity-side: clear a status after the application read it.
    pub fn clear_status(&self, bit: StatusMask) {
        self.active.fetch_and(!bit, Ordering::AcqRel);
    }

    #[must_use]
    pub fn active_statuses(&self) -> StatusMask {
        self.active.load(Ordering::Acquire)
    }
}

impl Condition for StatusCondition {
    fn condition_id(&self) -> u64 {
        self.id
    }

    fn trigger_value(&self) -> bool {
        self.active.load(Ordering::Acquire) & self.enabled_mask.load(Ordering::Acquire) != 0
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

/// User-triggered condition.
pub struct GuardCondition {
    id: u64,
    triggered: AtomicBool,
    signals: SignalSet,
}

impl GuardCondition {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(GuardCondition {
            id: NEXT_CONDITION_ID.fetch_add(1, Ordering::Relaxed),
            triggered: AtomicBool::new(false),
            signals: SignalSet::default(),
        })
    }

    pub fn set_trigger_value(&self, value: bool) {
        let prev = self.triggered.swap(value, Ordering::AcqRel);
        if value && !prev {
            self.signals.raise_all();
        }
    }
}

impl Condition for GuardCondition {
    fn condition_id(&self) -> u64 {
        self.id
    }

    fn trigger_value(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
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
