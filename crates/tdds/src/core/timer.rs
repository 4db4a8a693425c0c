// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named one-shot timers.
//!
//! Timers are created once, then armed with `start(ms, user)` and disarmed
//! with `stop`. Re-starting an armed timer is a logical reset: the old
//! deadline is abandoned. Expiry callbacks run on the dispatcher thread
//! that drives `poll_due`.
//!
//! Lease timeouts, heartbeat cadence, nack-response delays and liveliness
//! assertions all run on this wheel.

use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Opaque timer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Callback invoked on expiry with the `user` word passed to `start`.
pub type TimerFn = Box<dyn FnMut(usize) + Send>;

struct TimerEntry {
    name: String,
    callback: TimerFn,
    user: usize,
    /// Generation guard: bumped on every (re)start and stop, so stale heap
    /// entries are ignored when they pop.
    generation: u64,
    armed: bool,
}

struct HeapItem {
    deadline: Instant,
    id: TimerId,
    generation: u64,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse for earliest-deadline-first
        other.deadline.cmp(&self.deadline)
    }
}

struct WheelInner {
    timers: HashMap<TimerId, TimerEntry>,
    heap: BinaryHeap<HeapItem>,
    next_id: u64,
}

/// The timer service. Clone-able handle; the dispatcher thread calls
/// `poll_due` in its loop.
#[derive(Clone)]
pub struct TimerWheel {
    inner: Arc<Mutex<WheelInner>>,
}

impl TimerWheel {
    #[must_use]
    pub fn new() -> Self {
        TimerWheel {
            inner: Arc::new(Mutex::new(WheelInner {
                timers: HashMap::new(),
                heap: BinaryHeap::new(),
                next_id: 1,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WheelInner> {
        match self.inner.lock() {
            Ok(lock) => lock,
            Err(e) => {
                log::debug!("[TimerWheel] Lock poisoned, recovering");
                e.into_inner()
            }
        }
    }

    /// Create a named timer in the disarmed state.
    pub fn create(&self, name: &str, callback: TimerFn) -> TimerId {
        let mut inner = self.lock();
        let id = TimerId(inner.next_id);
        inner.next_id += 1;
        inner.timers.insert(
            id,
            TimerEntry {
                name: name.to_string(),
                callback,
                user: 0,
                generation: 0,
                armed: false,
            },
        );
        id
    }

    /// (Re)arm a timer to fire after `ms` milliseconds with the given user
    /// word. An already-armed timer is reset.
    pub fn start(&self, id: TimerId, ms: u64, user: usize) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.timers.get_mut(&id) else {
            return false;
        };
        entry.generation += 1;
        entry.user = user;
        entry.armed = true;
        let generation = entry.generation;
        inner.heap.push(HeapItem {
            deadline: Instant::now() + Duration::from_millis(ms),
            id,
            generation,
        });
        true
    }

    /// Disarm a timer without deleting it.
    pub fn stop(&self, id: TimerId) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.timers.get_mut(&id) else {
            return false;
        };
        entry.generation += 1;
        entry.armed = false;
        true
    }

    /// Delete a timer entirely.
    pub fn delete(&self, id: TimerId) -> bool {
        self.lock().timers.remove(&id).is_some()
    }

    /// Deadline of the next armed timer, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut inner = self.lock();
        while let Some(top) = inner.heap.peek() {
            let live = inner
                .timers
                .get(&top.id)
                .is_some_and(|e| e.armed && e.generation == top.generation);
            if live {
                return Some(top.deadline);
            }
            inner.heap.pop();
        }
        None
    }

    /// Fire every timer whose deadline is in the past. Callbacks run on the
    /// caller's thread with the timer lock released. Returns the number of
    /// timers fired.
    pub fn poll_due(&self, now: Instant) -> usize {
        let mut fired = 0;
        loop {
            let due = {
                let mut inner = self.lock();
                let Some(top) = inner.heap.peek() else {
                    break;
                };
                if top.deadline > now {
                    break;
                }
                let item = inner
                    .heap
                    .pop()
                    .unwrap_or_else(|| unreachable!("peek returned Some"));
                let Some(entry) = inner.timers.get_mut(&item.id) else {
                    continue;
                };
                if !entry.armed || entry.generation != item.generation {
                    continue; // stale heap entry from a reset or stop
                }
                entry.armed = false;
                let user = entry.user;
                // temporarily take the callback to run it without the lock
                let mut callback = std::mem::replace(&mut entry.callback, Box::new(|_| {}));
                drop(inner);
                callback(user);
                let mut inner = self.lock();
                if let Some(entry) = inner.timers.get_mut(&item.id) {
                    entry.callback = callback;
                }
                true
            };
            if due {
                fired += 1;
            }
        }
        fired
    }

    /// Name of a timer (diagnostics).
    #[must_use]
    pub fn name(&self, id: TimerId) -> Option<String> {
        self.lock().timers.get(&id).map(|e| e.name.clone())
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}
