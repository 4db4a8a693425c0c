// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer liveliness tracking.
//!
//! AUTOMATIC liveliness rides on SPDP refreshes: every announcement from a
//! participant asserts all of its automatic writers. MANUAL_BY_PARTICIPANT
//! is asserted by the builtin participant-message writer whenever any
//! local writer writes; MANUAL_BY_TOPIC needs an explicit
//! `assert_liveliness` on the writer. Readers track the last assertion per
//! matched writer and flip instances to NOT_ALIVE_NO_WRITERS when a lease
//! lapses.

use crate::core::guid::{Guid, GuidPrefix};
use crate::qos::LivelinessKind;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct TrackedWriter {
    kind: LivelinessKind,
    lease: Duration,
    last_assert: Instant,
    alive: bool,
}

/// Tracks matched remote writers' liveliness on the reader side.
pub struct LivelinessTracker {
    writers: HashMap<Guid, TrackedWriter>,
}

/// One liveliness transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivelinessChange {
    pub writer: Guid,
    pub alive: bool,
}

impl LivelinessTracker {
    #[must_use]
    pub fn new() -> Self {
        LivelinessTracker {
            writers: HashMap::new(),
        }
    }

    /// Start tracking a matched writer.
    pub fn track(&mut self, writer: Guid, kind: LivelinessKind, lease: Duration, now: Instant) {
        self.writers.insert(
            writer,
            TrackedWriter {
                kind,
                lease,
                last_assert: now,
                alive: true,
            },
        );
    }

    /// Stop tracking (proxy removed).
    pub fn untrack(&mut self, writer: &Guid) {
        self.writers.remove(writer);
    }

    #[must_use]
    pub fn is_alive(&self, writer: &Guid) -> bool {
        self.writers.get(writer).map(|w| w.alive).unwrap_or(false)
    }

    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.writers.len()
    }

    /// SPDP refresh from a participant asserts its AUTOMATIC writers.
    pub fn assert_participant_automatic(
        &mut self,
        prefix: &GuidPrefix,
        now: Instant,
    ) -> Vec<LivelinessChange> {
        self.assert_matching(now, |guid, w| {
            guid.prefix == *prefix && w.kind == LivelinessKind::Automatic
        })
    }

    /// Participant-message token: asserts AUTOMATIC and
    /// MANUAL_BY_PARTICIPANT writers of that participant.
    pub fn assert_participant_manual(
        &mut self,
        prefix: &GuidPrefix,
        now: Instant,
    ) -> Vec<LivelinessChange> {
        self.assert_matching(now, |guid, w| {
            guid.prefix == *prefix && w.kind != LivelinessKind::ManualByTopic
        })
    }

    /// Data or explicit assertion from one writer (any kind).
    pub fn assert_writer(&mut self, writer: &Guid, now: Instant) -> Vec<LivelinessChange> {
        self.assert_matching(now, |guid, _| guid == writer)
    }

    fn assert_matching(
        &mut self,
        now: Instant,
        pred: impl Fn(&Guid, &TrackedWriter) -> bool,
    ) -> Vec<LivelinessChange> {
        let mut changes = Vec::new();
        for (guid, w) in self.writers.iter_mut() {
            if pred(guid, w) {
                w.last_assert = now;
                if !w.alive {
                    w.alive = true;
                    changes.push(LivelinessChange {
                        writer: *guid,
                        alive: true,
                    });
                }
            }
        }
        changes
    }

    /// Check leases; writers whose lease lapsed flip to not-alive.
    pub fn check(&mut self, now: Instant) -> Vec<LivelinessChange> {
        let mut changes = Vec::new();
        for (guid, w) in self.writers.iter_mut() {
            if w.alive && now.duration_since(w.last_assert) > w.lease {
                w.alive = false;
                log::debug!("[Liveliness] writer {} lease lapsed", guid);
                changes.push(LivelinessChange {
                    writer: *guid,
                    alive: false,
                });
            }
        }
        changes
    }

    /// Earliest upcoming lease deadline (dispatcher sleep hint).
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.writers
            .values()
            .filter(|w| w.alive)
            .map(|w| w.last_assert + w.lease)
            .min()
    }
}

impl Default for LivelinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer-side assertion bookkeeping: which of the participant's writers
/// use manual liveliness and when the participant token must go out.
pub struct LivelinessAnnouncer {
    manual_by_participant: Vec<Guid>,
    last_token: Option<Instant>,
    shortest_lease: Option<Duration>,
}

impl LivelinessAnnouncer {
    #[must_use]
    pub fn new() -> Self {
        LivelinessAnnouncer {
            manual_by_participant: Vec::new(),
            last_token: None,
            shortest_lease: None,
        }
    }

    /// Register a local MANUAL_BY_PARTICIPANT writer.
    pub fn register(&mut self, writer: Guid, lease: Duration) {
        if !self.manual_by_participant.contains(&writer) {
            self.manual_by_participant.push(writer);
        }
        self.shortest_lease = Some(match self.shortest_lease {
            Some(cur) => cur.min(lease),
            None => lease,
        });
    }

    pub fn unregister(&mut self, writer: &Guid) {
        self.manual_by_participant.retain(|w| w != writer);
    }

    /// Any local writer wrote: the participant token becomes due if a
    /// third of the shortest lease elapsed since the last one.
    #[must_use]
    pub fn token_due_on_write(&self, now: Instant) -> bool {
        if self.manual_by_participant.is_empty() {
            return false;
        }
        let Some(lease) = self.shortest_lease else {
            return false;
        };
        match self.last_token {
            None => true,
            Some(at) => now.duration_since(at) >= lease / 3,
        }
    }

    pub fn mark_token_sent(&mut self, now: Instant) {
        self.last_token = Some(now);
    }
}

impl Default for LivelinessAnnouncer {
    fn default() -> Self {
        Self::new()
    }
}
