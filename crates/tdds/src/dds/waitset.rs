// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WaitSet - blocking wait for Condition triggers.
//!
//! A WaitSet holds a set of conditions and blocks the calling thread until
//! at least one trigger is set. The wake path is edge-sensitive: conditions
//! raise the waitset's signal on the transition to triggered, so `wait`
//! never polls.

use super::condition::{Condition, WaitSignal};
use crate::dds::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// WaitSet - wait for multiple conditions.
pub struct WaitSet {
    signal: Arc<WaitSignal>,
    conditions: Mutex<Vec<Arc<dyn Condition>>>,
    /// Set when an attached entity is being deleted; pending waits return
    /// `AlreadyDeleted`.
    deleted: Arc<AtomicBool>,
}

impl WaitSet {
    #[must_use]
    pub fn new() -> Self {
        WaitSet {
            signal: WaitSignal::new(),
            conditions: Mutex::new(Vec::new()),
            deleted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Condition>>> {
        match self.conditions.lock() {
            Ok(lock) => lock,
            Err(e) => e.into_inner(),
        }
    }

    /// Attach a condition. Attaching the same condition twice is an error.
    pub fn attach_condition(&self, condition: Arc<dyn Condition>) -> Result<()> {
        let mut conditions = self.lock();
        if conditions
            .iter()
            .any(|c| c.condition_id() == condition.condition_id())
        {
            return Err(Error::PreconditionNotMet(
                "condition already attached".to_string(),
            ));
        }
        condition.add_signal(Arc::clone(&self.signal));
        conditions.push(condition);
        Ok(())
    }

    /// Detach a condition.
    pub fn detach_condition(&self, condition: &Arc<dyn Condition>) -> Result<()> {
        let mut conditions = self.lock();
        let before = conditions.len();
        conditions.retain(|c| c.condition_id() != condition.condition_id());
        if conditions.len() == before {
            return Err(Error::PreconditionNotMet("condition not attached".to_string()));
        }
        condition.remove_signal(&self.signal);
        Ok(())
    }

    /// Currently attached conditions.
    #[must_use]
    pub fn conditions(&self) -> Vec<Arc<dyn Condition>> {
        self.lock().clone()
    }

    /// Handle used by entity teardown to abort pending waits.
    #[must_use]
    pub fn deletion_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.deleted)
    }

    /// Wake any pending wait with `AlreadyDeleted` (entity teardown).
    pub fn abort_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
        self.signal.raise();
    }

    /// Block until at least one condition triggers. Returns the triggered
    /// conditions, `Timeout` when the timeout elapses first, or
    /// `AlreadyDeleted` when an attached entity was torn down.
    pub fn wait(&self, timeout: Duration) -> Result<Vec<Arc<dyn Condition>>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.deleted.load(Ordering::Acquire) {
                return Err(Error::AlreadyDeleted);
            }

            let triggered: Vec<Arc<dyn Condition>> = self
                .lock()
                .iter()
                .filter(|c| c.trigger_value())
                .cloned()
                .collect();
            if !triggered.is_empty() {
                return Ok(triggered);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            self.signal.wait(deadline - now);
        }
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dds::condition::GuardCondition;

    #[test]
    fn test_wait_timeout() {
        let ws = WaitSet::new();
        let guard = GuardCondition::new();
        ws.attach_condition(guard).expect("attach");
        let err = match ws.wait(Duration::from_millis(20)) {
            Err(e) => e,
            Ok(_) => panic!("nothing triggered"),
        };
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn test_wait_returns_triggered_condition() {
        let ws = Arc::new(WaitSet::new());
        let guard = GuardCondition::new();
        ws.attach_condition(guard.clone()).expect("attach");

        let trigger = Arc::clone(&guard);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            trigger.set_trigger_value(true);
        });

        let triggered = ws.wait(Duration::from_secs(2)).expect("wait should wake");
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].condition_id(), guard.condition_id());
        t.join().expect("trigger thread");
    }

    #[test]
    fn test_double_attach_rejected() {
        let ws = WaitSet::new();
        let guard = GuardCondition::new();
        ws.attach_condition(guard.clone()).expect("first attach");
        assert!(ws.attach_condition(guard).is_err());
    }

    #[test]
    fn test_detach() {
        let ws = WaitSet::new();
        let guard = GuardCondition::new();
        ws.attach_condition(guard.clone()).expect("attach");
        let as_condition: Arc<dyn Condition> = guard;
        ws.detach_condition(&as_condition).expect("detach");
        assert!(ws.detach_condition(&as_condition).is_err());
        assert!(ws.conditions().is_empty());
    }

    #[test]
    fn test_abort_deleted_wakes_wait() {
        let ws = Arc::new(WaitSet::new());
        let guard = GuardCondition::new();
        ws.attach_condition(guard).expect("attach");

        let ws2 = Arc::clone(&ws);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            ws2.abort_deleted();
        });

        let err = match ws.wait(Duration::from_secs(5)) {
            Err(e) => e,
            Ok(_) => panic!("must abort"),
        };
        assert!(matches!(err, Error::AlreadyDeleted));
        t.join().expect("abort thread");
    }
}
