// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The endpoint matching engine.
//!
//! Fires on every edge that can change the match set: local endpoint
//! created or deleted, remote endpoint discovered, updated or removed,
//! participant ignored, QoS changed. For each candidate (local, remote)
//! pair it checks topic name, type name, ignore flags, partition
//! intersection and QoS compatibility, then emits the proxy add/remove
//! events the RTPS layer consumes. Incompatible-QoS outcomes surface as
//! status events rather than errors.

use crate::core::guid::{Guid, GuidPrefix};
use crate::protocol::builtin::EndpointData;
use crate::qos::compat::{self, PolicyId};
use crate::qos::Qos;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A local endpoint's matching-relevant view.
#[derive(Debug, Clone)]
pub struct LocalEndpoint {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: Arc<Qos>,
    pub is_writer: bool,
}

/// Output of the matcher: proxy maintenance + status posts.
#[derive(Debug)]
pub enum MatchEvent {
    /// A local writer gained a remote reader.
    ReaderProxyAdd {
        local_writer: Guid,
        remote: EndpointData,
    },
    /// A local writer lost a remote reader.
    ReaderProxyRemove { local_writer: Guid, remote: Guid },
    /// A local reader gained a remote writer.
    WriterProxyAdd {
        local_reader: Guid,
        remote: EndpointData,
    },
    /// A local reader lost a remote writer.
    WriterProxyRemove { local_reader: Guid, remote: Guid },
    /// Local writer offered QoS a remote reader cannot accept.
    OfferedIncompatible {
        local_writer: Guid,
        remote: Guid,
        policies: Vec<PolicyId>,
    },
    /// Local reader requested QoS a remote writer does not offer.
    RequestedIncompatible {
        local_reader: Guid,
        remote: Guid,
        policies: Vec<PolicyId>,
    },
}

struct RemoteEndpoint {
    data: EndpointData,
    is_writer: bool,
}

/// The matching engine for one participant.
pub struct Matcher {
    locals: HashMap<Guid, LocalEndpoint>,
    remotes: HashMap<Guid, RemoteEndpoint>,
    ignored_participants: HashSet<GuidPrefix>,
    /// Established (local, remote) pairs.
    matches: HashSet<(Guid, Guid)>,
}

impl Matcher {
    #[must_use]
    pub fn new() -> Self {
        Matcher {
            locals: HashMap::new(),
            remotes: HashMap::new(),
            ignored_participants: HashSet::new(),
            matches: HashSet::new(),
        }
    }

    #[must_use]
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    #[must_use]
    pub fn is_matched(&self, local: &Guid, remote: &Guid) -> bool {
        self.matches.contains(&(*local, *remote))
    }

    /// A local endpoint was created or enabled.
    pub fn add_local(&mut self, endpoint: LocalEndpoint) -> Vec<MatchEvent> {
        let guid = endpoint.guid;
        self.locals.insert(guid, endpoint);
        self.recompute_for_local(guid)
    }

    /// A local endpoint's QoS changed.
    pub fn update_local_qos(&mut self, guid: Guid, qos: Arc<Qos>) -> Vec<MatchEvent> {
        if let Some(local) = self.locals.get_mut(&guid) {
            local.qos = qos;
            self.recompute_for_local(guid)
        } else {
            Vec::new()
        }
    }

    /// A local endpoint is being deleted.
    pub fn remove_local(&mut self, guid: &Guid) -> Vec<MatchEvent> {
        let mut events = Vec::new();
        let Some(local) = self.locals.remove(guid) else {
            return events;
        };
        let stale: Vec<(Guid, Guid)> = self
            .matches
            .iter()
            .filter(|(l, _)| l == guid)
            .copied()
            .collect();
        for (l, r) in stale {
            self.matches.remove(&(l, r));
            events.push(if local.is_writer {
                MatchEvent::ReaderProxyRemove {
                    local_writer: l,
                    remote: r,
                }
            } else {
                MatchEvent::WriterProxyRemove {
                    local_reader: l,
                    remote: r,
                }
            });
        }
        events
    }

    /// A remote endpoint appeared or changed (SEDP).
    pub fn upsert_remote(&mut self, data: EndpointData, is_writer: bool) -> Vec<MatchEvent> {
        let guid = data.endpoint_guid;
        self.remotes.insert(guid, RemoteEndpoint { data, is_writer });
        self.recompute_for_remote(guid)
    }

    /// A remote endpoint was disposed.
    pub fn remove_remote(&mut self, guid: &Guid) -> Vec<MatchEvent> {
        self.remotes.remove(guid);
        self.drop_matches_with_remote(|r| r == guid)
    }

    /// Every endpoint of a lost or departed participant goes away at once.
    pub fn remove_participant(&mut self, prefix: &GuidPrefix) -> Vec<MatchEvent> {
        self.remotes.retain(|guid, _| guid.prefix != *prefix);
        self.drop_matches_with_remote(|r| r.prefix == *prefix)
    }

    /// Ignore a participant: existing matches dissolve, future endpoints
    /// never match.
    pub fn ignore_participant(&mut self, prefix: GuidPrefix) -> Vec<MatchEvent> {
        self.ignored_participants.insert(prefix);
        self.drop_matches_with_remote(|r| r.prefix == prefix)
    }

    fn drop_matches_with_remote(&mut self, pred: impl Fn(&Guid) -> bool) -> Vec<MatchEvent> {
        let stale: Vec<(Guid, Guid)> = self
            .matches
            .iter()
            .filter(|(_, r)| pred(r))
            .copied()
            .collect();
        let mut events = Vec::new();
        for (l, r) in stale {
            self.matches.remove(&(l, r));
            let local_is_writer = self.locals.get(&l).map(|e| e.is_writer).unwrap_or(false);
            events.push(if local_is_writer {
                MatchEvent::ReaderProxyRemove {
                    local_writer: l,
                    remote: r,
                }
            } else {
                MatchEvent::WriterProxyRemove {
                    local_reader: l,
                    remote: r,
                }
            });
        }
        events
    }

    fn recompute_for_local(&mut self, local_guid: Guid) -> Vec<MatchEvent> {
        let remote_guids: Vec<Guid> = self.remotes.keys().copied().collect();
        let mut events = Vec::new();
        for remote_guid in remote_guids {
            events.extend(self.evaluate_pair(local_guid, remote_guid));
        }
        events
    }

    fn recompute_for_remote(&mut self, remote_guid: Guid) -> Vec<MatchEvent> {
        let local_guids: Vec<Guid> = self.locals.keys().copied().collect();
        let mut events = Vec::new();
        for local_guid in local_guids {
            events.extend(self.evaluate_pair(local_guid, remote_guid));
        }
        events
    }

    /// Evaluate one candidate pair and reconcile with the current match
    /// set, emitting add/remove/incompatible events on transitions.
    fn evaluate_pair(&mut self, local_guid: Guid, remote_guid: Guid) -> Vec<MatchEvent> {
        let mut events = Vec::new();
        let (Some(local), Some(remote)) =
            (self.locals.get(&local_guid), self.remotes.get(&remote_guid))
        else {
            return events;
        };

        // a writer pairs with remote readers and vice versa
        let direction_ok = local.is_writer != remote.is_writer;
        let names_ok = direction_ok
            && local.topic_name == remote.data.topic_name
            && local.type_name == remote.data.type_name;
        let ignored = self.ignored_participants.contains(&remote_guid.prefix);

        let was_matched = self.matches.contains(&(local_guid, remote_guid));

        if !names_ok || ignored {
            if was_matched {
                self.matches.remove(&(local_guid, remote_guid));
                events.push(Self::removal_event(local, local_guid, remote_guid));
            }
            return events;
        }

        // QoS gate: offered comes from the writer side
        let (offered, requested) = if local.is_writer {
            (local.qos.as_ref(), &remote.data.qos)
        } else {
            (&remote.data.qos, local.qos.as_ref())
        };
        let failed = compat::check(offered, requested);
        let partitions_ok = compat::partitions_match(&offered.partition, &requested.partition);

        let compatible = failed.is_empty() && partitions_ok;

        match (was_matched, compatible) {
            (false, true) => {
                self.matches.insert((local_guid, remote_guid));
                log::debug!(
                    "[Matcher] {} <-> {} matched on '{}'",
                    local_guid,
                    remote_guid,
                    local.topic_name
                );
                events.push(if local.is_writer {
                    MatchEvent::ReaderProxyAdd {
                        local_writer: local_guid,
                        remote: remote.data.clone(),
                    }
                } else {
                    MatchEvent::WriterProxyAdd {
                        local_reader: local_guid,
                        remote: remote.data.clone(),
                    }
                });
            }
            (true, false) => {
                self.matches.remove(&(local_guid, remote_guid));
                events.push(Self::removal_event(local, local_guid, remote_guid));
            }
            (true, true) => {
                // refresh: proxy update with possibly new locators
                events.push(if local.is_writer {
                    MatchEvent::ReaderProxyAdd {
                        local_writer: local_guid,
                        remote: remote.data.clone(),
                    }
                } else {
                    MatchEvent::WriterProxyAdd {
                        local_reader: local_guid,
                        remote: remote.data.clone(),
                    }
                });
            }
            (false, false) => {}
        }

        // partition mismatch is "no match", not "incompatible"
        if !failed.is_empty() && partitions_ok {
            events.push(if local.is_writer {
                MatchEvent::OfferedIncompatible {
                    local_writer: local_guid,
                    remote: remote_guid,
                    policies: failed,
                }
            } else {
                MatchEvent::RequestedIncompatible {
                    local_reader: local_guid,
                    remote: remote_guid,
                    policies: failed,
                }
            });
        }

        events
    }

    fn removal_event(local: &LocalEndpoint, local_guid: Guid, remote_guid: Guid) -> MatchEvent {
        if local.is_writer {
            MatchEvent::ReaderProxyRemove {
                local_writer: local_guid,
                remote: remote_guid,
            }
        } else {
            MatchEvent::WriterProxyRemove {
                local_reader: local_guid,
                remote: remote_guid,
            }
        }
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{EntityId, EntityKind, ENTITYID_PARTICIPANT};
    use crate::qos::{Partition, ReliabilityKind};

    fn local(n: u8, topic: &str, writer: bool, qos: Qos) -> LocalEndpoint {
        let kind = if writer {
            EntityKind::UserWriter
        } else {
            EntityKind::UserReader
        };
        LocalEndpoint {
            guid: Guid::new(GuidPrefix([n; 12]), EntityId::user(u32::from(n), kind)),
            topic_name: topic.to_string(),
            type_name: "ShapeType".to_string(),
            qos: Arc::new(qos),
            is_writer: writer,
        }
    }

    fn remote(n: u8, topic: &str, writer: bool, qos: Qos) -> EndpointData {
        let kind = if writer {
            EntityKind::UserWriter
        } else {
            EntityKind::UserReader
        };
        EndpointData {
            endpoint_guid: Guid::new(GuidPrefix([n; 12]), EntityId::user(u32::from(n), kind)),
            participant_guid: Guid::new(GuidPrefix([n; 12]), ENTITYID_PARTICIPANT),
            topic_name: topic.to_string(),
            type_name: "ShapeType".to_string(),
            qos,
            unicast: Vec::new(),
            multicast: Vec::new(),
            expects_inline_qos: false,
        }
    }

    #[test]
    fn test_writer_matches_remote_reader() {
        let mut m = Matcher::new();
        let w = local(1, "Square", true, Qos::reliable());
        let w_guid = w.guid;
        assert!(m.add_local(w).is_empty());

        let events = m.upsert_remote(remote(2, "Square", false, Qos::default()), false);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MatchEvent::ReaderProxyAdd { .. }));
        assert_eq!(m.match_count(), 1);
        assert!(m.is_matched(&w_guid, &remote(2, "Square", false, Qos::default()).endpoint_guid));
    }

    #[test]
    fn test_topic_and_type_gate() {
        let mut m = Matcher::new();
        m.add_local(local(1, "Square", true, Qos::default()));
        assert!(m
            .upsert_remote(remote(2, "Circle", false, Qos::default()), false)
            .is_empty());

        let mut wrong_type = remote(3, "Square", false, Qos::default());
        wrong_type.type_name = "OtherType".to_string();
        assert!(m.upsert_remote(wrong_type, false).is_empty());
        assert_eq!(m.match_count(), 0);
    }

    #[test]
    fn test_direction_gate() {
        let mut m = Matcher::new();
        m.add_local(local(1, "Square", true, Qos::default()));
        // a remote writer cannot match a local writer
        assert!(m
            .upsert_remote(remote(2, "Square", true, Qos::default()), true)
            .is_empty());
    }

    #[test]
    fn test_incompatible_qos_posts_status() {
        let mut m = Matcher::new();
        // best-effort local writer, reliable remote reader
        m.add_local(local(1, "Square", true, Qos::default()));
        let events = m.upsert_remote(remote(2, "Square", false, Qos::reliable()), false);

        assert_eq!(events.len(), 1);
        match &events[0] {
            MatchEvent::OfferedIncompatible { policies, .. } => {
                assert!(policies.contains(&PolicyId::Reliability));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(m.match_count(), 0);
    }

    #[test]
    fn test_reader_side_requested_incompatible() {
        let mut m = Matcher::new();
        m.add_local(local(1, "Square", false, Qos::reliable()));
        let events = m.upsert_remote(remote(2, "Square", true, Qos::default()), true);
        assert!(matches!(
            events[0],
            MatchEvent::RequestedIncompatible { .. }
        ));
    }

    #[test]
    fn test_partition_mismatch_is_silent() {
        let mut m = Matcher::new();
        let mut qos_a = Qos::default();
        qos_a.partition = Partition::single("red");
        let mut qos_b = Qos::default();
        qos_b.partition = Partition::single("blue");

        m.add_local(local(1, "Square", true, qos_a));
        let events = m.upsert_remote(remote(2, "Square", false, qos_b), false);
        // no match, and no incompatible-qos status either
        assert!(events.is_empty());
    }

    #[test]
    fn test_qos_change_rematches() {
        let mut m = Matcher::new();
        let w = local(1, "Square", true, Qos::default());
        let w_guid = w.guid;
        m.add_local(w);
        let r = remote(2, "Square", false, Qos::reliable());
        let r_guid = r.endpoint_guid;
        let _ = m.upsert_remote(r, false);
        assert_eq!(m.match_count(), 0);

        // upgrading the writer to reliable flips the pair to matched
        let events = m.update_local_qos(w_guid, Arc::new(Qos::reliable()));
        assert!(events
            .iter()
            .any(|e| matches!(e, MatchEvent::ReaderProxyAdd { .. })));
        assert!(m.is_matched(&w_guid, &r_guid));
    }

    #[test]
    fn test_remove_remote_unmatches() {
        let mut m = Matcher::new();
        m.add_local(local(1, "Square", true, Qos::reliable()));
        let r = remote(2, "Square", false, Qos::default());
        let r_guid = r.endpoint_guid;
        let _ = m.upsert_remote(r, false);
        assert_eq!(m.match_count(), 1);

        let events = m.remove_remote(&r_guid);
        assert!(matches!(events[0], MatchEvent::ReaderProxyRemove { .. }));
        assert_eq!(m.match_count(), 0);
    }

    #[test]
    fn test_remove_participant_sweeps_endpoints() {
        let mut m = Matcher::new();
        m.add_local(local(1, "Square", true, Qos::reliable()));
        m.add_local(local(3, "Square", false, Qos::default()));
        let _ = m.upsert_remote(remote(2, "Square", false, Qos::default()), false);
        let mut w2 = remote(2, "Square", true, Qos::reliable());
        w2.endpoint_guid = Guid::new(GuidPrefix([2; 12]), EntityId::user(99, EntityKind::UserWriter));
        let _ = m.upsert_remote(w2, true);
        assert_eq!(m.match_count(), 2);

        let events = m.remove_participant(&GuidPrefix([2; 12]));
        assert_eq!(events.len(), 2);
        assert_eq!(m.match_count(), 0);
    }

    #[test]
    fn test_ignored_participant_never_matches() {
        let mut m = Matcher::new();
        m.add_local(local(1, "Square", true, Qos::reliable()));
        let _ = m.ignore_participant(GuidPrefix([2; 12]));
        assert!(m
            .upsert_remote(remote(2, "Square", false, Qos::default()), false)
            .is_empty());
        assert_eq!(m.match_count(), 0);
    }

    #[test]
    fn test_steady_state_proxy_set() {
        // invariant: the match set equals exactly the compatible,
        // non-ignored, topic/type-aligned remote set
        let mut m = Matcher::new();
        m.add_local(local(1, "Square", false, Qos::default()));

        let _ = m.upsert_remote(remote(2, "Square", true, Qos::reliable()), true); // match
        let _ = m.upsert_remote(remote(3, "Circle", true, Qos::reliable()), true); // topic mismatch
        let _ = m.ignore_participant(GuidPrefix([4; 12]));
        let _ = m.upsert_remote(remote(4, "Square", true, Qos::reliable()), true); // ignored

        assert_eq!(m.match_count(), 1);
    }
}
