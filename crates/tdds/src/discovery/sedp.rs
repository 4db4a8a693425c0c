// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SEDP - Simple Endpoint Discovery Protocol.
//!
//! Two reliable builtin endpoint pairs per participant (publications and
//! subscriptions) on fixed entity ids. When SPDP reports a new peer, the
//! local SEDP writers publish every local user endpoint to it; incoming
//! SEDP records flow to the matching engine. Endpoint removal is a
//! key-only DATA (dispose) carrying the endpoint GUID.

use crate::core::guid::{
    Guid, GuidPrefix, ENTITYID_SEDP_PUB_READER, ENTITYID_SEDP_PUB_WRITER,
    ENTITYID_SEDP_SUB_READER, ENTITYID_SEDP_SUB_WRITER,
};
use crate::protocol::builtin::{decode_endpoint_data, encode_endpoint_data, EndpointData};
use crate::protocol::submsg::{Data, Submessage};
use crate::protocol::Message;
use std::collections::HashMap;

/// Which builtin pair a record travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SedpKind {
    Publications,
    Subscriptions,
}

/// What an incoming SEDP submessage meant.
#[derive(Debug)]
pub enum SedpEvent {
    /// A remote endpoint appeared or changed.
    Endpoint { kind: SedpKind, data: EndpointData },
    /// A remote endpoint was disposed.
    Removed { kind: SedpKind, guid: Guid },
}

/// The SEDP engine for one participant.
pub struct SedpEngine {
    prefix: GuidPrefix,
    pub_seq: u64,
    sub_seq: u64,
    /// Local endpoint records, re-announced to late-joining peers.
    published: HashMap<Guid, (SedpKind, EndpointData)>,
}

impl SedpEngine {
    #[must_use]
    pub fn new(prefix: GuidPrefix) -> Self {
        SedpEngine {
            prefix,
            pub_seq: 0,
            sub_seq: 0,
            published: HashMap::new(),
        }
    }

    fn next_seq(&mut self, kind: SedpKind) -> u64 {
        match kind {
            SedpKind::Publications => {
                self.pub_seq += 1;
                self.pub_seq
            }
            SedpKind::Subscriptions => {
                self.sub_seq += 1;
                self.sub_seq
            }
        }
    }

    /// Announce a local endpoint: returns the datagram to send to every
    /// matched peer's metatraffic locators.
    pub fn announce_endpoint(&mut self, kind: SedpKind, data: EndpointData) -> Vec<u8> {
        let seq = self.next_seq(kind);
        self.published.insert(data.endpoint_guid, (kind, data.clone()));
        let (writer_id, reader_id) = match kind {
            SedpKind::Publications => (ENTITYID_SEDP_PUB_WRITER, ENTITYID_SEDP_PUB_READER),
            SedpKind::Subscriptions => (ENTITYID_SEDP_SUB_WRITER, ENTITYID_SEDP_SUB_READER),
        };
        let mut msg = Message::new(self.prefix);
        msg.push(Submessage::Data(Data {
            reader_id,
            writer_id,
            seq,
            inline_qos: None,
            payload: encode_endpoint_data(&data),
            key_flag: false,
        }));
        msg.encode()
    }

    /// Dispose a local endpoint: key-only DATA carrying the GUID.
    pub fn retract_endpoint(&mut self, guid: Guid) -> Option<Vec<u8>> {
        let (kind, _) = self.published.remove(&guid)?;
        let seq = self.next_seq(kind);
        let (writer_id, reader_id) = match kind {
            SedpKind::Publications => (ENTITYID_SEDP_PUB_WRITER, ENTITYID_SEDP_PUB_READER),
            SedpKind::Subscriptions => (ENTITYID_SEDP_SUB_WRITER, ENTITYID_SEDP_SUB_READER),
        };
        let mut msg = Message::new(self.prefix);
        msg.push(Submessage::Data(Data {
            reader_id,
            writer_id,
            seq,
            inline_qos: None,
            payload: guid.to_bytes().to_vec(),
            key_flag: true,
        }));
        Some(msg.encode())
    }

    /// Replay every published endpoint (new peer joined). One datagram per
    /// endpoint, in announcement order.
    pub fn replay_for_new_peer(&mut self) -> Vec<Vec<u8>> {
        let records: Vec<(SedpKind, EndpointData)> =
            self.published.values().cloned().collect();
        records
            .into_iter()
            .map(|(kind, data)| self.announce_endpoint(kind, data))
            .collect()
    }

    /// Classify + decode an incoming builtin DATA submessage. `None` when
    /// it is not SEDP traffic or fails to parse.
    #[must_use]
    pub fn on_data(&self, data: &Data) -> Option<SedpEvent> {
        let kind = match data.writer_id {
            id if id == ENTITYID_SEDP_PUB_WRITER => SedpKind::Publications,
            id if id == ENTITYID_SEDP_SUB_WRITER => SedpKind::Subscriptions,
            _ => return None,
        };
        if data.key_flag {
            let bytes: [u8; 16] = data.payload.get(0..16)?.try_into().ok()?;
            return Some(SedpEvent::Removed {
                kind,
                guid: Guid::from_bytes(bytes),
            });
        }
        let record = decode_endpoint_data(&data.payload)?;
        Some(SedpEvent::Endpoint { kind, data: record })
    }

    /// Number of locally published endpoint records.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.published.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{EntityId, EntityKind, ENTITYID_PARTICIPANT};
    use crate::qos::Qos;

    fn endpoint(n: u8, topic: &str, writer: bool) -> EndpointData {
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
            qos: Qos::reliable(),
            unicast: Vec::new(),
            multicast: Vec::new(),
            expects_inline_qos: false,
        }
    }

    fn extract_data(datagram: &[u8]) -> Data {
        let msg = Message::decode(datagram).expect("decode");
        msg.submessages
            .into_iter()
            .find_map(|s| match s {
                Submessage::Data(d) => Some(d),
                _ => None,
            })
            .expect("data submessage")
    }

    #[test]
    fn test_announce_and_receive() {
        let mut a = SedpEngine::new(GuidPrefix([1; 12]));
        let b = SedpEngine::new(GuidPrefix([2; 12]));

        let datagram = a.announce_endpoint(SedpKind::Publications, endpoint(1, "Square", true));
        let data = extract_data(&datagram);
        match b.on_data(&data).expect("sedp event") {
            SedpEvent::Endpoint { kind, data } => {
                assert_eq!(kind, SedpKind::Publications);
                assert_eq!(data.topic_name, "Square");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_retract_is_key_only_dispose() {
        let mut a = SedpEngine::new(GuidPrefix([1; 12]));
        let ep = endpoint(1, "Square", false);
        let guid = ep.endpoint_guid;
        let _ = a.announce_endpoint(SedpKind::Subscriptions, ep);
        assert_eq!(a.published_count(), 1);

        let datagram = a.retract_endpoint(guid).expect("retract");
        assert_eq!(a.published_count(), 0);
        let data = extract_data(&datagram);
        assert!(data.key_flag);

        let b = SedpEngine::new(GuidPrefix([2; 12]));
        match b.on_data(&data).expect("event") {
            SedpEvent::Removed { kind, guid: g } => {
                assert_eq!(kind, SedpKind::Subscriptions);
                assert_eq!(g, guid);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_retract_unknown_endpoint() {
        let mut a = SedpEngine::new(GuidPrefix([1; 12]));
        assert!(a
            .retract_endpoint(Guid::new(GuidPrefix([9; 12]), EntityId([1, 2, 3, 0x02])))
            .is_none());
    }

    #[test]
    fn test_replay_for_late_joiner() {
        let mut a = SedpEngine::new(GuidPrefix([1; 12]));
        let _ = a.announce_endpoint(SedpKind::Publications, endpoint(1, "Square", true));
        let _ = a.announce_endpoint(SedpKind::Subscriptions, endpoint(1, "Circle", false));

        let datagrams = a.replay_for_new_peer();
        assert_eq!(datagrams.len(), 2);
        let b = SedpEngine::new(GuidPrefix([2; 12]));
        for datagram in &datagrams {
            assert!(b.on_data(&extract_data(datagram)).is_some());
        }
    }

    #[test]
    fn test_non_sedp_traffic_ignored() {
        let b = SedpEngine::new(GuidPrefix([2; 12]));
        let data = Data {
            reader_id: EntityId([0; 4]),
            writer_id: EntityId([0, 0, 1, 0x02]), // user writer
            seq: 1,
            inline_qos: None,
            payload: vec![1, 2, 3],
            key_flag: false,
        };
        assert!(b.on_data(&data).is_none());
    }
}
