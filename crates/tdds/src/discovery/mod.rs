// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery engine.
//!
//! SPDP finds participants, SEDP exchanges endpoint descriptors, the
//! matcher pairs compatible endpoints, and the liveliness tracker watches
//! writer assertions. The peer set here is the ground truth for "who is
//! out there": every peer carries its lease and last-seen timestamp, and
//! `expire` enforces the invariant that a peer is either fresh
//! (`now - last_seen <= lease`) or absent.

/// Writer liveliness tracking and assertion.
pub mod liveliness;
/// The endpoint matching engine.
pub mod matcher;
/// SEDP endpoint exchange.
pub mod sedp;
/// SPDP participant announcements.
pub mod spdp;

pub use liveliness::{LivelinessAnnouncer, LivelinessTracker};
pub use matcher::{LocalEndpoint, MatchEvent, Matcher};
pub use sedp::SedpEngine;
pub use spdp::SpdpEngine;

use crate::core::guid::GuidPrefix;
use crate::protocol::builtin::ParticipantData;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// A remote participant as discovery sees it.
#[derive(Debug, Clone)]
pub struct DiscoveredParticipant {
    pub data: ParticipantData,
    pub last_seen: Instant,
    pub ignored: bool,
}

impl DiscoveredParticipant {
    #[must_use]
    pub fn lease(&self) -> Duration {
        let ms = self.data.lease_duration.to_millis();
        Duration::from_millis(ms.min(u64::from(u32::MAX)))
    }
}

/// The domain's peer set, keyed by GuidPrefix.
pub struct PeerSet {
    peers: DashMap<GuidPrefix, DiscoveredParticipant>,
}

impl PeerSet {
    #[must_use]
    pub fn new() -> Self {
        PeerSet {
            peers: DashMap::new(),
        }
    }

    /// Insert or refresh a peer from an SPDP announcement.
    ///
    /// Returns `true` when the participant is new (first announcement).
    pub fn upsert(&self, data: ParticipantData, now: Instant) -> bool {
        let prefix = data.guid.prefix;
        match self.peers.get_mut(&prefix) {
            Some(mut peer) => {
                peer.last_seen = now;
                peer.data = data;
                false
            }
            None => {
                log::info!("[Discovery] new participant {}", prefix);
                self.peers.insert(
                    prefix,
                    DiscoveredParticipant {
                        data,
                        last_seen: now,
                        ignored: false,
                    },
                );
                true
            }
        }
    }

    /// Drop peers whose lease expired. Returns the evicted prefixes.
    pub fn expire(&self, now: Instant) -> Vec<GuidPrefix> {
        let mut dead = Vec::new();
        for entry in self.peers.iter() {
            if now.duration_since(entry.last_seen) > entry.lease() {
                dead.push(*entry.key());
            }
        }
        for prefix in &dead {
            log::info!("[Discovery] participant {} lease expired", prefix);
            self.peers.remove(prefix);
        }
        dead
    }

    /// Remove a peer explicitly (announced departure).
    pub fn remove(&self, prefix: &GuidPrefix) -> bool {
        self.peers.remove(prefix).is_some()
    }

    /// Mark a peer ignored; its endpoints stop matching.
    pub fn ignore(&self, prefix: &GuidPrefix) -> bool {
        match self.peers.get_mut(prefix) {
            Some(mut peer) => {
                peer.ignored = true;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_ignored(&self, prefix: &GuidPrefix) -> bool {
        self.peers.get(prefix).map(|p| p.ignored).unwrap_or(false)
    }

    #[must_use]
    pub fn contains(&self, prefix: &GuidPrefix) -> bool {
        self.peers.contains_key(prefix)
    }

    #[must_use]
    pub fn get(&self, prefix: &GuidPrefix) -> Option<DiscoveredParticipant> {
        self.peers.get(prefix).map(|p| p.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of every live prefix.
    #[must_use]
    pub fn prefixes(&self) -> Vec<GuidPrefix> {
        self.peers.iter().map(|e| *e.key()).collect()
    }
}

impl Default for PeerSet {
    fn default() -> Self {
        Self::new()
    }
}
