// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DomainParticipant: the entry point to a DDS domain and the factory for
//! every other entity.
//!
//! The participant owns the domain runtime: config store, dispatcher
//! thread, UDP transport, SPDP/SEDP engines, the matcher and the local
//! endpoint registries. Ingress datagrams are parsed once and routed by
//! target entity id: builtin traffic feeds discovery, user traffic feeds
//! the reader state machines. All listener callbacks fire on the
//! dispatcher thread.

use super::publisher::Publisher;
use super::reader::{DataReader, ReaderCore};
use super::status::SampleRejectedReason;
use super::subscriber::Subscriber;
use super::topic::Topic;
use super::writer::{DataWriter, WriterCore};
use super::{Error, Qos, Result};
use crate::cache::{CacheConfig, Change, ChangeKind, HistoryCache};
use crate::config::{Group, ParamStore};
use crate::core::dbuf::DbChain;
use crate::core::guid::{
    EntityId, EntityKind, Guid, GuidPrefix, ENTITYID_P2P_MESSAGE_READER,
    ENTITYID_P2P_MESSAGE_WRITER, ENTITYID_SPDP_WRITER,
};
use crate::core::strtab::StringTable;
use crate::core::time::{Duration as DdsDuration, Time};
use crate::discovery::matcher::{LocalEndpoint, MatchEvent, Matcher};
use crate::discovery::sedp::{SedpEngine, SedpEvent, SedpKind};
use crate::discovery::spdp::SpdpEngine;
use crate::discovery::{LivelinessAnnouncer, LivelinessTracker, PeerSet};
use crate::dynip::DynIpMonitor;
use crate::engine::Dispatcher;
use crate::protocol::builtin::{EndpointData, ParticipantData};
use crate::protocol::locator::{Locator, PortMapping};
use crate::protocol::submsg::{
    AckNack, Data, DataFrag, FragNumSet, Gap, Heartbeat, InfoDst, InfoTs, SeqNumSet, Submessage,
};
use crate::protocol::Message;
use crate::qos::{LivelinessKind, QosRegistry, ReliabilityKind};
use crate::reliability::{
    ReaderEvent, ReaderProxy, ReliabilityConfig, RtpsReader, RtpsWriter, WriterEvent, WriterProxy,
};
use crate::security::{AllowAll, PolicyDecision};
use crate::transport::udp::{UdpTransport, RECV_BUFFER_SIZE};
use crate::transport::Transport;
use crate::xtypes::TypeRegistry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Highest usable domain id with the default port gains.
pub const MAX_DOMAIN_ID: u32 = 231;

static PREFIX_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Shared state of one participant's domain membership.
pub struct DomainRuntime {
    pub domain_id: u32,
    pub prefix: GuidPrefix,
    pub config: Arc<ParamStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub transport: Arc<UdpTransport>,
    pub peers: Arc<PeerSet>,
    pub types: Arc<TypeRegistry>,
    pub qos_registry: Arc<QosRegistry>,
    pub strings: Arc<StringTable>,
    rel_cfg: ReliabilityConfig,
    matcher: Mutex<Matcher>,
    sedp: Mutex<SedpEngine>,
    spdp: Mutex<SpdpEngine>,
    liveliness: Mutex<LivelinessTracker>,
    liveliness_announcer: Mutex<LivelinessAnnouncer>,
    writers: Mutex<HashMap<Guid, Arc<WriterCore>>>,
    readers: Mutex<HashMap<Guid, Arc<ReaderCore>>>,
    /// Where a remote endpoint (or its participant) can be reached.
    remote_locators: DashMap<Guid, Vec<Locator>>,
    policy: Arc<dyn PolicyDecision>,
    purge_delay_ms: u64,
    next_entity_key: AtomicU32,
    closed: AtomicBool,
}

macro_rules! lock_or_recover {
    ($mutex:expr) => {
        match $mutex.lock() {
            Ok(lock) => lock,
            Err(e) => e.into_inner(),
        }
    };
}

impl DomainRuntime {
    fn writers_snapshot(&self) -> Vec<Arc<WriterCore>> {
        lock_or_recover!(self.writers).values().cloned().collect()
    }

    fn readers_snapshot(&self) -> Vec<Arc<ReaderCore>> {
        lock_or_recover!(self.readers).values().cloned().collect()
    }

    fn writer_by_entity(&self, entity_id: EntityId) -> Option<Arc<WriterCore>> {
        lock_or_recover!(self.writers)
            .values()
            .find(|w| w.guid.entity_id == entity_id)
            .cloned()
    }

    /// Readers whose proxy set contains the given remote writer.
    fn readers_matched_to(&self, writer: &Guid) -> Vec<Arc<ReaderCore>> {
        lock_or_recover!(self.readers)
            .values()
            .filter(|r| lock_or_recover!(r.rtps).proxy(writer).is_some())
            .cloned()
            .collect()
    }

    fn locators_for(&self, remote: &Guid) -> Vec<Locator> {
        if let Some(found) = self.remote_locators.get(remote) {
            if !found.is_empty() {
                return found.clone();
            }
        }
        // fall back to the peer participant's metatraffic locators
        self.peers
            .get(&remote.prefix)
            .map(|p| {
                let mut locs = p.data.default_unicast.clone();
                locs.extend(p.data.metatraffic_unicast.clone());
                locs
            })
            .unwrap_or_default()
    }

    fn send_to_remote(&self, remote: &Guid, datagram: &[u8]) {
        for locator in self.locators_for(remote) {
            if locator.is_multicast() {
                continue;
            }
            if let Err(e) = self.transport.send_to(datagram, &locator) {
                log::debug!("[Participant] send to {} failed: {}", remote, e);
            }
        }
    }

    fn send_to_peer_metatraffic(&self, prefix: &GuidPrefix, datagram: &[u8]) {
        let Some(peer) = self.peers.get(prefix) else {
            return;
        };
        for locator in peer
            .data
            .metatraffic_unicast
            .iter()
            .chain(peer.data.default_unicast.iter())
        {
            if locator.is_multicast() {
                continue;
            }
            if let Err(e) = self.transport.send_to(datagram, locator) {
                log::debug!("[Participant] metatraffic send failed: {}", e);
            }
            break; // one reachable locator suffices
        }
    }

    /// Build one SPDP announcement datagram for this participant.
    ///
    /// The dispatcher multicasts these on its own cadence; the method is
    /// public so multicast-free deployments (and tests) can bootstrap
    /// discovery by carrying announcements over another channel and
    /// feeding them to `handle_datagram`.
    #[must_use]
    pub fn spdp_announcement(&self) -> Vec<u8> {
        lock_or_recover!(self.spdp).build_announcement()
    }

    // ========================================================================
    // EGRESS
    // ========================================================================

    /// Flush one writer's protocol work onto the wire.
    pub fn flush_writer(&self, core: &WriterCore) {
        let events = lock_or_recover!(core.rtps).poll(Instant::now());
        self.dispatch_writer_events(core, events);
    }

    fn dispatch_writer_events(&self, core: &WriterCore, events: Vec<WriterEvent>) {
        for event in events {
            match event {
                WriterEvent::SendData { reader, change } => {
                    let datagram = self.build_data_message(core, &change, Some(reader.prefix));
                    self.send_to_remote(&reader, &datagram);
                }
                WriterEvent::SendDataFrag {
                    reader,
                    change,
                    frag_start,
                    frag_count,
                } => {
                    let datagram = self.build_datafrag_message(
                        core,
                        &change,
                        frag_start,
                        frag_count,
                        reader.prefix,
                    );
                    self.send_to_remote(&reader, &datagram);
                }
                WriterEvent::SendHeartbeat {
                    reader,
                    first_sn,
                    last_sn,
                    count,
                    final_flag,
                } => {
                    let mut msg = Message::new(self.prefix);
                    msg.push(Submessage::Heartbeat(Heartbeat {
                        reader_id: EntityId::default(),
                        writer_id: core.guid.entity_id,
                        first_sn,
                        last_sn,
                        count,
                        final_flag,
                        liveliness_flag: false,
                    }));
                    let datagram = msg.encode();
                    match reader {
                        Some(target) => self.send_to_remote(&target, &datagram),
                        None => {
                            // announce to every matched proxy
                            let proxies: Vec<Guid> = {
                                let rtps = lock_or_recover!(core.rtps);
                                let mut out = Vec::new();
                                for r in self.remote_locators.iter() {
                                    if rtps.proxy(r.key()).is_some() {
                                        out.push(*r.key());
                                    }
                                }
                                out
                            };
                            for proxy in proxies {
                                self.send_to_remote(&proxy, &datagram);
                            }
                        }
                    }
                }
                WriterEvent::SendGap {
                    reader,
                    gap_start,
                    sequences,
                } => {
                    let base = sequences.first().copied().unwrap_or(gap_start + 1);
                    let Some(gap_list) = SeqNumSet::from_sequences(base, &sequences) else {
                        continue;
                    };
                    let mut msg = Message::new(self.prefix);
                    msg.push(Submessage::InfoDst(InfoDst {
                        guid_prefix: reader.prefix,
                    }));
                    msg.push(Submessage::Gap(Gap {
                        reader_id: reader.entity_id,
                        writer_id: core.guid.entity_id,
                        gap_start,
                        gap_list,
                    }));
                    self.send_to_remote(&reader, &msg.encode());
                }
            }
        }
    }

    fn build_data_message(
        &self,
        core: &WriterCore,
        change: &Change,
        dst: Option<GuidPrefix>,
    ) -> Vec<u8> {
        let mut msg = Message::new(self.prefix);
        if let Some(prefix) = dst {
            msg.push(Submessage::InfoDst(InfoDst {
                guid_prefix: prefix,
            }));
        }
        msg.push(Submessage::InfoTs(InfoTs {
            timestamp: Some(change.source_ts),
        }));
        let key_flag = change.kind != ChangeKind::Alive;
        msg.push(Submessage::Data(Data {
            reader_id: EntityId::default(),
            writer_id: core.guid.entity_id,
            seq: change.seq,
            inline_qos: None,
            payload: if key_flag {
                change.key.clone()
            } else {
                change.payload.to_vec()
            },
            key_flag,
        }));
        msg.encode()
    }

    fn build_datafrag_message(
        &self,
        core: &WriterCore,
        change: &Change,
        frag_start: u32,
        frag_count: u16,
        dst: GuidPrefix,
    ) -> Vec<u8> {
        let payload = change.payload.to_vec();
        let frag_size = self.rel_cfg.frag_size;
        let from = (frag_start as usize - 1) * frag_size;
        let to = (from + frag_size * frag_count as usize).min(payload.len());

        let mut msg = Message::new(self.prefix);
        msg.push(Submessage::InfoDst(InfoDst { guid_prefix: dst }));
        msg.push(Submessage::InfoTs(InfoTs {
            timestamp: Some(change.source_ts),
        }));
        msg.push(Submessage::DataFrag(DataFrag {
            reader_id: EntityId::default(),
            writer_id: core.guid.entity_id,
            seq: change.seq,
            frag_start,
            frags_in_submessage: frag_count,
            frag_size: frag_size as u16,
            sample_size: payload.len() as u32,
            payload: payload[from..to].to_vec(),
        }));
        msg.encode()
    }

    fn dispatch_reader_events(&self, core: &ReaderCore, events: Vec<ReaderEvent>) {
        for event in events {
            match event {
                ReaderEvent::Deliver(sample) => {
                    let strength = lock_or_recover!(core.rtps)
                        .proxy(&sample.writer)
                        .map(|p| p.strength)
                        .unwrap_or(0);
                    let (instance, key) = if sample.key_only {
                        let hash: [u8; 16] = sample
                            .payload
                            .get(0..16)
                            .and_then(|b| b.try_into().ok())
                            .unwrap_or([0u8; 16]);
                        (crate::xtypes::instance_key(&hash), sample.payload.clone())
                    } else {
                        self.instance_of(core, &sample.payload)
                    };
                    let change = Arc::new(Change {
                        seq: sample.seq,
                        writer: sample.writer,
                        instance,
                        key,
                        kind: if sample.key_only {
                            ChangeKind::NotAliveDisposed
                        } else {
                            ChangeKind::Alive
                        },
                        payload: DbChain::from_vec(sample.payload),
                        source_ts: sample.source_ts,
                        arrival_ts: Time::now(),
                    });
                    match core.cache.receive_change(change, strength) {
                        Ok(true) => core.on_data_available(),
                        Ok(false) => {} // suppressed by ownership
                        Err(Error::OutOfResources) => {
                            core.post_rejected(SampleRejectedReason::SamplesLimit, instance);
                        }
                        Err(e) => {
                            log::debug!("[Participant] receive_change failed: {}", e);
                        }
                    }
                    // any data from a writer asserts its liveliness
                    let revived = lock_or_recover!(self.liveliness)
                        .assert_writer(&sample.writer, Instant::now());
                    for change in revived {
                        core.post_liveliness(change.writer, change.alive);
                    }
                }
                ReaderEvent::SendAckNack {
                    writer,
                    base,
                    missing,
                    count,
                    final_flag,
                } => {
                    let Some(sn_state) = SeqNumSet::from_sequences(base, &missing) else {
                        continue;
                    };
                    let mut msg = Message::new(self.prefix);
                    msg.push(Submessage::InfoDst(InfoDst {
                        guid_prefix: writer.prefix,
                    }));
                    msg.push(Submessage::AckNack(AckNack {
                        reader_id: core.guid.entity_id,
                        writer_id: writer.entity_id,
                        sn_state,
                        count,
                        final_flag,
                    }));
                    self.send_to_remote(&writer, &msg.encode());
                }
                ReaderEvent::SendNackFrag {
                    writer,
                    seq,
                    fragments,
                    count,
                } => {
                    let base = fragments.first().copied().unwrap_or(1);
                    let Some(frag_state) = FragNumSet::from_fragments(base, &fragments) else {
                        continue;
                    };
                    let mut msg = Message::new(self.prefix);
                    msg.push(Submessage::NackFrag(crate::protocol::submsg::NackFrag {
                        reader_id: core.guid.entity_id,
                        writer_id: writer.entity_id,
                        seq,
                        frag_state,
                        count,
                    }));
                    self.send_to_remote(&writer, &msg.encode());
                }
                ReaderEvent::SampleLost { .. } => {
                    core.post_lost();
                }
            }
        }
    }

    fn instance_of(&self, core: &ReaderCore, payload: &[u8]) -> (u64, Vec<u8>) {
        let Some(descriptor) = core.descriptor.as_ref() else {
            return (0, Vec::new());
        };
        if !descriptor.has_key() {
            return (0, Vec::new());
        }
        match crate::xtypes::cdr::decode(descriptor, payload) {
            Ok(value) => {
                let hash = crate::xtypes::key_hash(descriptor, &value);
                (crate::xtypes::instance_key(&hash), hash.to_vec())
            }
            Err(_) => (0, Vec::new()),
        }
    }

    // ========================================================================
    // INGRESS
    // ========================================================================

    /// Parse and route one received datagram.
    pub fn handle_datagram(self: &Arc<Self>, data: &[u8]) {
        let Some(message) = Message::decode(data) else {
            return;
        };
        let source_prefix = message.header.guid_prefix;
        if source_prefix == self.prefix {
            return; // our own multicast loopback
        }

        let mut source_ts = Time::now();
        let now = Instant::now();

        for sub in message.submessages {
            match sub {
                Submessage::InfoTs(ts) => {
                    if let Some(t) = ts.timestamp {
                        source_ts = t;
                    }
                }
                Submessage::InfoDst(dst) => {
                    if !dst.guid_prefix.is_unknown() && dst.guid_prefix != self.prefix {
                        return; // addressed to someone else
                    }
                }
                Submessage::InfoSrc(_) | Submessage::InfoReply(_) | Submessage::Pad => {}
                Submessage::Data(data) => {
                    self.route_data(source_prefix, data, source_ts, now);
                }
                Submessage::DataFrag(frag) => {
                    let writer = Guid::new(source_prefix, frag.writer_id);
                    for core in self.readers_matched_to(&writer) {
                        let events = lock_or_recover!(core.rtps).on_datafrag(
                            writer,
                            frag.seq,
                            frag.frag_start,
                            frag.frags_in_submessage,
                            frag.frag_size,
                            frag.sample_size,
                            &frag.payload,
                            source_ts,
                            now,
                        );
                        self.dispatch_reader_events(&core, events);
                    }
                }
                Submessage::Heartbeat(hb) => {
                    let writer = Guid::new(source_prefix, hb.writer_id);
                    for core in self.readers_matched_to(&writer) {
                        let events = lock_or_recover!(core.rtps).on_heartbeat(
                            writer,
                            hb.first_sn,
                            hb.last_sn,
                            hb.count,
                            hb.final_flag,
                            now,
                        );
                        self.dispatch_reader_events(&core, events);
                    }
                }
                Submessage::AckNack(ack) => {
                    if let Some(core) = self.writer_by_entity(ack.writer_id) {
                        let reader = Guid::new(source_prefix, ack.reader_id);
                        let requested = ack.sn_state.sequences();
                        lock_or_recover!(core.rtps).on_acknack(
                            reader,
                            ack.sn_state.base,
                            &requested,
                            ack.count,
                            now,
                        );
                        self.flush_writer(&core);
                    }
                }
                Submessage::Gap(gap) => {
                    let writer = Guid::new(source_prefix, gap.writer_id);
                    for core in self.readers_matched_to(&writer) {
                        let events = lock_or_recover!(core.rtps).on_gap(
                            writer,
                            gap.gap_start,
                            &gap.gap_list.sequences(),
                        );
                        self.dispatch_reader_events(&core, events);
                    }
                }
                Submessage::NackFrag(nack) => {
                    if let Some(core) = self.writer_by_entity(nack.writer_id) {
                        let reader = Guid::new(source_prefix, nack.reader_id);
                        let events = lock_or_recover!(core.rtps).on_nackfrag(
                            reader,
                            nack.seq,
                            &nack.frag_state.fragments(),
                        );
                        self.dispatch_writer_events(&core, events);
                    }
                }
                Submessage::HeartbeatFrag(hbf) => {
                    let writer = Guid::new(source_prefix, hbf.writer_id);
                    for core in self.readers_matched_to(&writer) {
                        let events = lock_or_recover!(core.rtps).on_heartbeatfrag(
                            writer,
                            hbf.seq,
                            hbf.last_frag,
                        );
                        self.dispatch_reader_events(&core, events);
                    }
                }
            }
        }
    }

    fn route_data(self: &Arc<Self>, source_prefix: GuidPrefix, data: Data, source_ts: Time, now: Instant) {
        // SPDP participant announcements
        if data.writer_id == ENTITYID_SPDP_WRITER {
            self.on_spdp_data(&data.payload, now);
            return;
        }

        // SEDP endpoint records
        let sedp_event = lock_or_recover!(self.sedp).on_data(&data);
        if let Some(event) = sedp_event {
            self.on_sedp_event(event);
            return;
        }

        // participant-message liveliness token
        if data.writer_id == ENTITYID_P2P_MESSAGE_WRITER {
            let revived = lock_or_recover!(self.liveliness)
                .assert_participant_manual(&source_prefix, now);
            for change in revived {
                for core in self.readers_matched_to(&change.writer) {
                    core.post_liveliness(change.writer, change.alive);
                }
            }
            return;
        }

        // user data
        let writer = Guid::new(source_prefix, data.writer_id);
        for core in self.readers_matched_to(&writer) {
            let events = lock_or_recover!(core.rtps).on_data(crate::reliability::reader::ReceivedSample {
                writer,
                seq: data.seq,
                payload: data.payload.clone(),
                source_ts,
                key_only: data.key_flag,
            });
            self.dispatch_reader_events(&core, events);
        }
    }

    fn on_spdp_data(self: &Arc<Self>, payload: &[u8], now: Instant) {
        let result = {
            let spdp = lock_or_recover!(self.spdp);
            spdp.on_announcement(payload, &self.peers, now)
        };
        let Some((data, is_new)) = result else {
            return;
        };
        let prefix = data.guid.prefix;

        if is_new {
            if !self
                .policy
                .check_remote_participant(self.domain_id, &prefix)
                .is_allowed()
            {
                log::warn!("[Participant] policy denied remote participant {}", prefix);
                self.peers.remove(&prefix);
                return;
            }
            // new peer: replay our endpoint records at it
            let datagrams = lock_or_recover!(self.sedp).replay_for_new_peer();
            for datagram in datagrams {
                self.send_to_peer_metatraffic(&prefix, &datagram);
            }
            // answer with our own announcement so the peer learns us fast
            let announcement = lock_or_recover!(self.spdp).build_announcement();
            self.send_to_peer_metatraffic(&prefix, &announcement);
        }

        // every announcement asserts the peer's automatic-liveliness writers
        let revived = lock_or_recover!(self.liveliness).assert_participant_automatic(&prefix, now);
        for change in revived {
            for core in self.readers_matched_to(&change.writer) {
                core.post_liveliness(change.writer, change.alive);
            }
        }
    }

    fn on_sedp_event(self: &Arc<Self>, event: SedpEvent) {
        match event {
            SedpEvent::Endpoint { kind, data } => {
                let prefix = data.endpoint_guid.prefix;
                if self.peers.is_ignored(&prefix) {
                    return;
                }
                let is_writer = kind == SedpKind::Publications;
                if !self
                    .policy
                    .check_remote_endpoint(self.domain_id, &prefix, &data.topic_name, is_writer)
                    .is_allowed()
                {
                    return;
                }
                if !data.unicast.is_empty() {
                    self.remote_locators
                        .insert(data.endpoint_guid, data.unicast.clone());
                }
                let events = lock_or_recover!(self.matcher).upsert_remote(data, is_writer);
                self.apply_match_events(events);
            }
            SedpEvent::Removed { guid, .. } => {
                self.remote_locators.remove(&guid);
                let events = lock_or_recover!(self.matcher).remove_remote(&guid);
                self.apply_match_events(events);
            }
        }
    }

    /// Apply matcher output: proxy maintenance + statuses + replay.
    fn apply_match_events(self: &Arc<Self>, events: Vec<MatchEvent>) {
        for event in events {
            match event {
                MatchEvent::ReaderProxyAdd {
                    local_writer,
                    remote,
                } => {
                    let Some(core) = lock_or_recover!(self.writers).get(&local_writer).cloned()
                    else {
                        continue;
                    };
                    if !remote.unicast.is_empty() {
                        self.remote_locators
                            .insert(remote.endpoint_guid, remote.unicast.clone());
                    }
                    let newly = {
                        let mut rtps = lock_or_recover!(core.rtps);
                        let newly = rtps.proxy(&remote.endpoint_guid).is_none();
                        if newly {
                            rtps.add_reader(ReaderProxy::new(
                                remote.endpoint_guid,
                                remote.unicast.clone(),
                                remote.multicast.clone(),
                                remote.qos.reliability.kind == ReliabilityKind::Reliable,
                            ));
                        }
                        newly
                    };
                    if newly {
                        core.post_match_change(remote.endpoint_guid, 1);
                        self.flush_writer(&core); // durability replay goes out now
                    }
                }
                MatchEvent::ReaderProxyRemove {
                    local_writer,
                    remote,
                } => {
                    let Some(core) = lock_or_recover!(self.writers).get(&local_writer).cloned()
                    else {
                        continue;
                    };
                    if lock_or_recover!(core.rtps).remove_reader(&remote) {
                        core.post_match_change(remote, -1);
                    }
                }
                MatchEvent::WriterProxyAdd {
                    local_reader,
                    remote,
                } => {
                    let Some(core) = lock_or_recover!(self.readers).get(&local_reader).cloned()
                    else {
                        continue;
                    };
                    if !remote.unicast.is_empty() {
                        self.remote_locators
                            .insert(remote.endpoint_guid, remote.unicast.clone());
                    }
                    let newly = {
                        let mut rtps = lock_or_recover!(core.rtps);
                        let newly = rtps.proxy(&remote.endpoint_guid).is_none();
                        if newly {
                            rtps.add_writer(WriterProxy::new(
                                remote.endpoint_guid,
                                remote.qos.reliability.kind == ReliabilityKind::Reliable,
                                remote.qos.ownership_strength.value,
                            ));
                        }
                        newly
                    };
                    if newly {
                        lock_or_recover!(self.liveliness).track(
                            remote.endpoint_guid,
                            remote.qos.liveliness.kind,
                            remote.qos.liveliness.lease_duration.to_std(),
                            Instant::now(),
                        );
                        core.post_match_change(remote.endpoint_guid, 1);
                    }
                }
                MatchEvent::WriterProxyRemove {
                    local_reader,
                    remote,
                } => {
                    let Some(core) = lock_or_recover!(self.readers).get(&local_reader).cloned()
                    else {
                        continue;
                    };
                    if lock_or_recover!(core.rtps).remove_writer(&remote) {
                        lock_or_recover!(self.liveliness).untrack(&remote);
                        core.cache.writer_not_alive(remote);
                        core.post_match_change(remote, -1);
                    }
                }
                MatchEvent::OfferedIncompatible {
                    local_writer,
                    policies,
                    ..
                } => {
                    if let Some(core) = lock_or_recover!(self.writers).get(&local_writer).cloned() {
                        if let Some(policy) = policies.first() {
                            core.post_incompatible(*policy);
                        }
                    }
                }
                MatchEvent::RequestedIncompatible {
                    local_reader,
                    policies,
                    ..
                } => {
                    if let Some(core) = lock_or_recover!(self.readers).get(&local_reader).cloned() {
                        if let Some(policy) = policies.first() {
                            core.post_incompatible(*policy);
                        }
                    }
                }
            }
        }
    }

    // ========================================================================
    // PERIODIC WORK
    // ========================================================================

    /// One tick of housekeeping, driven by the dispatcher timer.
    pub fn tick(self: &Arc<Self>, now: Instant) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        // SPDP cadence
        let announcement = {
            let mut spdp = lock_or_recover!(self.spdp);
            if spdp.announce_due(now) {
                spdp.mark_announced(now);
                Some(spdp.build_announcement())
            } else {
                None
            }
        };
        if let Some(datagram) = announcement {
            if let Err(e) = self.transport.send_multicast(&datagram) {
                log::debug!("[Participant] SPDP multicast failed: {}", e);
            }
            // unicast refresh keeps leases alive on multicast-hostile nets
            for prefix in self.peers.prefixes() {
                self.send_to_peer_metatraffic(&prefix, &datagram);
            }
        }

        // lease expiry
        for prefix in self.peers.expire(now) {
            let events = lock_or_recover!(self.matcher).remove_participant(&prefix);
            self.apply_match_events(events);
        }

        // liveliness leases
        let lapsed = lock_or_recover!(self.liveliness).check(now);
        for change in lapsed {
            for core in self.readers_matched_to(&change.writer) {
                core.cache.writer_not_alive(change.writer);
                core.post_liveliness(change.writer, change.alive);
                core.reevaluate_conditions();
            }
        }

        // protocol machines + per-endpoint QoS housekeeping
        for core in self.writers_snapshot() {
            self.flush_writer(&core);
            core.check_deadline();
            core.cache.expire_lifespan();
        }
        for core in self.readers_snapshot() {
            let events = lock_or_recover!(core.rtps).poll(now);
            self.dispatch_reader_events(&core, events);
            core.check_deadline();
            if core.cache.expire_lifespan() > 0 {
                core.reevaluate_conditions();
            }
        }
    }

    fn next_entity_id(&self, kind: EntityKind) -> EntityId {
        EntityId::user(self.next_entity_key.fetch_add(1, Ordering::Relaxed), kind)
    }

    fn local_endpoint_record(
        &self,
        guid: Guid,
        topic: &Topic,
        qos: &Qos,
        _is_writer: bool,
    ) -> EndpointData {
        EndpointData {
            endpoint_guid: guid,
            participant_guid: Guid::new(self.prefix, crate::core::guid::ENTITYID_PARTICIPANT),
            topic_name: topic.name().to_string(),
            type_name: topic.type_name().to_string(),
            qos: qos.clone(),
            unicast: vec![self.transport.user_locator(), self.transport.metatraffic_locator()],
            multicast: Vec::new(),
            expects_inline_qos: false,
        }
    }

    fn announce_local_endpoint(self: &Arc<Self>, kind: SedpKind, record: EndpointData) {
        let datagram = lock_or_recover!(self.sedp).announce_endpoint(kind, record);
        for prefix in self.peers.prefixes() {
            self.send_to_peer_metatraffic(&prefix, &datagram);
        }
    }
}

/// Builder for `DomainParticipant`.
pub struct ParticipantBuilder {
    name: String,
    domain_id: u32,
    policy: Arc<dyn PolicyDecision>,
    config: Option<Arc<ParamStore>>,
}

impl ParticipantBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        ParticipantBuilder {
            name: name.to_string(),
            domain_id: 0,
            policy: Arc::new(AllowAll),
            config: None,
        }
    }

    #[must_use]
    pub fn domain_id(mut self, domain_id: u32) -> Self {
        self.domain_id = domain_id;
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn PolicyDecision>) -> Self {
        self.policy = policy;
        self
    }

    /// Supply a preloaded config store (tests, embedded deployments).
    #[must_use]
    pub fn config(mut self, config: Arc<ParamStore>) -> Self {
        self.config = Some(config);
        self
    }

    /// Create the participant: bind sockets, start the dispatcher, begin
    /// announcing.
    pub fn build(self) -> Result<DomainParticipant> {
        if self.domain_id > MAX_DOMAIN_ID {
            return Err(Error::BadParameter(format!(
                "domain id {} exceeds {}",
                self.domain_id, MAX_DOMAIN_ID
            )));
        }
        if !self.policy.check_create_participant(self.domain_id).is_allowed() {
            return Err(Error::PreconditionNotMet(
                "policy denied participant creation".into(),
            ));
        }

        let config = self.config.unwrap_or_else(|| {
            let store = Arc::new(ParamStore::new());
            store.load();
            store
        });
        let lease_ms = config
            .get_num(Group::Rtps, "LEASE_TIME")
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(90_000);
        if lease_ms == 0 {
            return Err(Error::BadParameter("lease_duration must be > 0".into()));
        }
        let purge_delay_ms = config
            .get_num(Group::Common, "PURGE_DELAY")
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(50);

        let dynip = DynIpMonitor::new(&config);
        let _ = dynip.rescan();
        let local_ip = dynip.primary_address();

        let ports = PortMapping::from_config(&config, Group::Udp);
        let (transport, participant_id) =
            UdpTransport::bind(&config, &ports, self.domain_id, 0, local_ip)
                .map_err(Error::IoError)?;
        let transport = Arc::new(transport);

        let prefix = GuidPrefix::generate(
            crate::protocol::VENDOR_ID,
            u32::from_be_bytes(local_ip.octets()),
            std::process::id(),
            PREFIX_COUNTER.fetch_add(1, Ordering::Relaxed),
        );

        let mut participant_data = ParticipantData::new(prefix, self.domain_id);
        participant_data.lease_duration = DdsDuration::from_millis(lease_ms);
        participant_data.metatraffic_unicast = vec![transport.metatraffic_locator()];
        participant_data.default_unicast = vec![transport.user_locator()];
        participant_data.metatraffic_multicast = vec![transport.spdp_multicast_locator()];

        let dispatcher = Dispatcher::spawn().map_err(Error::IoError)?;
        let rel_cfg = ReliabilityConfig::from_config(&config);

        let runtime = Arc::new(DomainRuntime {
            domain_id: self.domain_id,
            prefix,
            config: Arc::clone(&config),
            dispatcher: Arc::clone(&dispatcher),
            transport: Arc::clone(&transport),
            peers: Arc::new(PeerSet::new()),
            types: Arc::new(TypeRegistry::new()),
            qos_registry: Arc::new(QosRegistry::new()),
            strings: Arc::new(StringTable::new()),
            rel_cfg,
            matcher: Mutex::new(Matcher::new()),
            sedp: Mutex::new(SedpEngine::new(prefix)),
            spdp: Mutex::new(SpdpEngine::new(participant_data, &config)),
            liveliness: Mutex::new(LivelinessTracker::new()),
            liveliness_announcer: Mutex::new(LivelinessAnnouncer::new()),
            writers: Mutex::new(HashMap::new()),
            readers: Mutex::new(HashMap::new()),
            remote_locators: DashMap::new(),
            policy: self.policy,
            purge_delay_ms,
            next_entity_key: AtomicU32::new(1),
            closed: AtomicBool::new(false),
        });

        // ingress: register the three sockets with the dispatcher
        let mut ingress_sockets = Vec::new();
        for socket in [
            transport.metatraffic_unicast_socket(),
            transport.metatraffic_multicast_socket(),
            transport.user_socket(),
        ] {
            let std_clone = socket.try_clone().map_err(Error::IoError)?;
            let mut mio_socket = mio::net::UdpSocket::from_std(
                socket.try_clone().map_err(Error::IoError)?,
            );
            let rt = Arc::clone(&runtime);
            dispatcher
                .handle_attach(
                    &mut mio_socket,
                    mio::Interest::READABLE,
                    Box::new(move || {
                        let mut buf = [0u8; RECV_BUFFER_SIZE];
                        let _ = UdpTransport::drain(&std_clone, &mut buf, |incoming| {
                            rt.handle_datagram(&incoming.data);
                        });
                    }),
                )
                .map_err(Error::IoError)?;
            // registration vessel; must stay alive with the participant
            ingress_sockets.push(mio_socket);
        }

        // periodic housekeeping tick (one-shot timer, re-armed for the
        // participant's lifetime)
        {
            let rt = Arc::clone(&runtime);
            let timers = dispatcher.timers().clone();
            let tick_id = timers.create(
                "rtps-tick",
                Box::new(move |_| {
                    rt.tick(Instant::now());
                }),
            );
            timers.start(tick_id, 10, 0);
            spawn_tick_rearm(Arc::clone(&runtime), timers, tick_id);
        }

        // first announcement goes out immediately
        {
            let datagram = lock_or_recover!(runtime.spdp).build_announcement();
            lock_or_recover!(runtime.spdp).mark_announced(Instant::now());
            let _ = transport.send_multicast(&datagram);
        }

        log::info!(
            "[Participant] '{}' up: domain {} participant_id {} prefix {}",
            self.name,
            self.domain_id,
            participant_id,
            prefix
        );

        Ok(DomainParticipant {
            name: self.name,
            runtime,
            topics: Mutex::new(HashMap::new()),
            publishers: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            deleted: AtomicBool::new(false),
            _ingress_sockets: ingress_sockets,
        })
    }
}

/// Keep the housekeeping timer armed for the runtime's lifetime.
fn spawn_tick_rearm(
    runtime: Arc<DomainRuntime>,
    timers: crate::core::timer::TimerWheel,
    id: crate::core::timer::TimerId,
) {
    std::thread::Builder::new()
        .name("tdds-tick".to_string())
        .spawn(move || {
            while !runtime.closed.load(Ordering::Acquire) {
                std::thread::sleep(std::time::Duration::from_millis(10));
                timers.start(id, 0, 0);
            }
        })
        .ok();
}

/// The DDS domain participant.
pub struct DomainParticipant {
    name: String,
    runtime: Arc<DomainRuntime>,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    publishers: Mutex<Vec<Arc<Publisher>>>,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    deleted: AtomicBool,
    /// Keeps the dispatcher's socket registrations alive.
    _ingress_sockets: Vec<mio::net::UdpSocket>,
}

impl DomainParticipant {
    /// Start building a participant.
    #[must_use]
    pub fn builder(name: &str) -> ParticipantBuilder {
        ParticipantBuilder::new(name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn domain_id(&self) -> u32 {
        self.runtime.domain_id
    }

    #[must_use]
    pub fn guid_prefix(&self) -> GuidPrefix {
        self.runtime.prefix
    }

    /// The shared runtime (advanced integrations and tests).
    #[must_use]
    pub fn runtime(&self) -> &Arc<DomainRuntime> {
        &self.runtime
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.runtime.peers.len()
    }

    fn check_alive(&self) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            Err(Error::AlreadyDeleted)
        } else {
            Ok(())
        }
    }

    /// Register a type descriptor (idempotent).
    pub fn register_type(
        &self,
        descriptor: crate::xtypes::TypeDescriptor,
    ) -> Result<Arc<crate::xtypes::TypeDescriptor>> {
        self.check_alive()?;
        Ok(self.runtime.types.register(descriptor))
    }

    /// Create (or find) a topic.
    pub fn create_topic(&self, name: &str, type_name: &str, qos: Qos) -> Result<Arc<Topic>> {
        self.check_alive()?;
        qos.validate().map_err(Error::InconsistentPolicy)?;
        let mut topics = lock_or_recover!(self.topics);
        if let Some(existing) = topics.get(name) {
            if existing.type_name() != type_name {
                return Err(Error::PreconditionNotMet(format!(
                    "topic '{}' already exists with type '{}'",
                    name,
                    existing.type_name()
                )));
            }
            return Ok(Arc::clone(existing));
        }
        let descriptor = self.runtime.types.lookup(type_name);
        let topic = Arc::new(Topic::new(
            self.runtime.strings.str_new(name, false),
            self.runtime.strings.str_new(type_name, false),
            descriptor,
            self.runtime.qos_registry.intern(qos),
        )?);
        topics.insert(name.to_string(), Arc::clone(&topic));
        Ok(topic)
    }

    /// Delete a topic; fails while endpoints still reference it.
    pub fn delete_topic(&self, name: &str) -> Result<()> {
        self.check_alive()?;
        let mut topics = lock_or_recover!(self.topics);
        let Some(topic) = topics.get(name) else {
            return Err(Error::AlreadyDeleted);
        };
        if topic.in_use() {
            return Err(Error::PreconditionNotMet(format!(
                "topic '{}' still has {} references",
                name,
                topic.ref_count()
            )));
        }
        topics.remove(name);
        Ok(())
    }

    /// Create a publisher.
    pub fn create_publisher(&self, qos: Qos) -> Result<Arc<Publisher>> {
        self.check_alive()?;
        let key = self.runtime.next_entity_key.fetch_add(1, Ordering::Relaxed);
        let publisher = Arc::new(Publisher::new(key, &qos));
        lock_or_recover!(self.publishers).push(Arc::clone(&publisher));
        Ok(publisher)
    }

    /// Create a subscriber.
    pub fn create_subscriber(&self, qos: Qos) -> Result<Arc<Subscriber>> {
        self.check_alive()?;
        let key = self.runtime.next_entity_key.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber::new(key, &qos));
        lock_or_recover!(self.subscribers).push(Arc::clone(&subscriber));
        Ok(subscriber)
    }

    /// Create a writer on the participant's implicit publisher.
    pub fn create_writer(&self, topic: &Arc<Topic>, qos: Qos) -> Result<DataWriter> {
        self.create_writer_in(None, topic, qos)
    }

    /// Create a writer grouped under a publisher.
    pub fn create_writer_with(
        &self,
        publisher: &Arc<Publisher>,
        topic: &Arc<Topic>,
        qos: Qos,
    ) -> Result<DataWriter> {
        self.create_writer_in(Some(publisher), topic, qos)
    }

    fn create_writer_in(
        &self,
        publisher: Option<&Arc<Publisher>>,
        topic: &Arc<Topic>,
        qos: Qos,
    ) -> Result<DataWriter> {
        self.check_alive()?;
        let effective = match publisher {
            Some(p) => p.effective_qos(&qos),
            None => qos,
        };
        effective.validate().map_err(Error::InconsistentPolicy)?;
        if !self
            .runtime
            .policy
            .check_local_endpoint(self.runtime.domain_id, topic.name(), true)
            .is_allowed()
        {
            return Err(Error::PreconditionNotMet("policy denied writer".into()));
        }

        let runtime = Arc::clone(&self.runtime);
        let qos = runtime.qos_registry.intern(effective);
        let guid = Guid::new(runtime.prefix, runtime.next_entity_id(EntityKind::UserWriter));
        let cache = Arc::new(HistoryCache::new(CacheConfig::from_qos(&qos)));
        let durable = qos.durability >= crate::qos::Durability::TransientLocal;
        let rtps = RtpsWriter::new(guid, Arc::clone(&cache), runtime.rel_cfg, durable);

        let core = Arc::new(WriterCore {
            guid,
            topic_name: topic.name().to_string(),
            type_name: topic.type_name().to_string(),
            qos: Arc::clone(&qos),
            descriptor: topic.descriptor(),
            cache,
            rtps: Mutex::new(rtps),
            status: super::condition::StatusCondition::new(),
            listener: Mutex::new(None),
            matched: Mutex::new(Default::default()),
            incompatible: Mutex::new(Default::default()),
            deadline_missed: Mutex::new(Default::default()),
            enabled: AtomicBool::new(true),
            last_assertion: Mutex::new(Instant::now()),
        });

        topic.add_ref();
        lock_or_recover!(runtime.writers).insert(guid, Arc::clone(&core));
        if let Some(p) = publisher {
            p.register_writer(guid);
        }
        if qos.liveliness.kind == LivelinessKind::ManualByParticipant {
            lock_or_recover!(runtime.liveliness_announcer)
                .register(guid, qos.liveliness.lease_duration.to_std());
        }

        // local matching + discovery announcement
        let events = lock_or_recover!(runtime.matcher).add_local(LocalEndpoint {
            guid,
            topic_name: topic.name().to_string(),
            type_name: topic.type_name().to_string(),
            qos: Arc::clone(&qos),
            is_writer: true,
        });
        runtime.apply_match_events(events);
        let record = runtime.local_endpoint_record(guid, topic, &qos, true);
        runtime.announce_local_endpoint(SedpKind::Publications, record);

        let flush_rt = Arc::clone(&runtime);
        Ok(DataWriter::new(
            core,
            Arc::new(move |core: &WriterCore| flush_rt.flush_writer(core)),
        ))
    }

    /// Create a reader on the participant's implicit subscriber.
    pub fn create_reader(&self, topic: &Arc<Topic>, qos: Qos) -> Result<DataReader> {
        self.create_reader_in(None, topic, qos, None)
    }

    /// Create a reader grouped under a subscriber.
    pub fn create_reader_with(
        &self,
        subscriber: &Arc<Subscriber>,
        topic: &Arc<Topic>,
        qos: Qos,
    ) -> Result<DataReader> {
        self.create_reader_in(Some(subscriber), topic, qos, None)
    }

    /// Create a content-filtered reader: only samples matching the
    /// expression reach `read`/`take`.
    pub fn create_filtered_reader(
        &self,
        topic: &Arc<Topic>,
        qos: Qos,
        expression: &str,
    ) -> Result<DataReader> {
        self.create_reader_in(None, topic, qos, Some(expression))
    }

    fn create_reader_in(
        &self,
        subscriber: Option<&Arc<Subscriber>>,
        topic: &Arc<Topic>,
        qos: Qos,
        filter: Option<&str>,
    ) -> Result<DataReader> {
        self.check_alive()?;
        let effective = match subscriber {
            Some(s) => s.effective_qos(&qos),
            None => qos,
        };
        effective.validate().map_err(Error::InconsistentPolicy)?;
        if !self
            .runtime
            .policy
            .check_local_endpoint(self.runtime.domain_id, topic.name(), false)
            .is_allowed()
        {
            return Err(Error::PreconditionNotMet("policy denied reader".into()));
        }
        let filter = match filter {
            Some(expr) => Some(
                super::filter::ContentFilter::parse(expr)
                    .map_err(|e| Error::BadParameter(e.to_string()))?,
            ),
            None => None,
        };

        let runtime = Arc::clone(&self.runtime);
        let qos = runtime.qos_registry.intern(effective);
        let guid = Guid::new(runtime.prefix, runtime.next_entity_id(EntityKind::UserReader));
        let cache = Arc::new(HistoryCache::new(CacheConfig::from_qos(&qos)));
        let rtps = RtpsReader::new(guid, runtime.rel_cfg);

        let core = Arc::new(ReaderCore {
            guid,
            topic_name: topic.name().to_string(),
            type_name: topic.type_name().to_string(),
            qos: Arc::clone(&qos),
            descriptor: topic.descriptor(),
            cache,
            rtps: Mutex::new(rtps),
            status: super::condition::StatusCondition::new(),
            listener: Mutex::new(None),
            matched: Mutex::new(Default::default()),
            incompatible: Mutex::new(Default::default()),
            rejected: Mutex::new(Default::default()),
            lost: Mutex::new(Default::default()),
            liveliness: Mutex::new(Default::default()),
            deadline_missed: Mutex::new(Default::default()),
            read_conditions: Mutex::new(Vec::new()),
            query_conditions: Mutex::new(Vec::new()),
            filter,
            enabled: AtomicBool::new(true),
        });

        topic.add_ref();
        lock_or_recover!(runtime.readers).insert(guid, Arc::clone(&core));
        if let Some(s) = subscriber {
            s.register_reader(guid);
        }

        let events = lock_or_recover!(runtime.matcher).add_local(LocalEndpoint {
            guid,
            topic_name: topic.name().to_string(),
            type_name: topic.type_name().to_string(),
            qos: Arc::clone(&qos),
            is_writer: false,
        });
        runtime.apply_match_events(events);
        let record = runtime.local_endpoint_record(guid, topic, &qos, false);
        runtime.announce_local_endpoint(SedpKind::Subscriptions, record);

        Ok(DataReader::new(core))
    }

    /// Delete a writer: retract from discovery and drop the proxy state.
    pub fn delete_writer(&self, writer: &DataWriter) -> Result<()> {
        self.check_alive()?;
        let guid = writer.guid();
        writer.mark_deleted();
        let runtime = &self.runtime;
        let events = lock_or_recover!(runtime.matcher).remove_local(&guid);
        runtime.apply_match_events(events);
        if let Some(datagram) = lock_or_recover!(runtime.sedp).retract_endpoint(guid) {
            for prefix in runtime.peers.prefixes() {
                runtime.send_to_peer_metatraffic(&prefix, &datagram);
            }
        }
        lock_or_recover!(runtime.liveliness_announcer).unregister(&guid);
        if let Some(core) = lock_or_recover!(runtime.writers).remove(&guid) {
            core.enabled.store(false, Ordering::Release);
        }
        if let Some(topic) = lock_or_recover!(self.topics)
            .values()
            .find(|t| t.name() == writer.topic_name())
        {
            topic.release_ref();
        }
        Ok(())
    }

    /// Delete a reader.
    pub fn delete_reader(&self, reader: &DataReader) -> Result<()> {
        self.check_alive()?;
        let guid = reader.guid();
        reader.mark_deleted();
        let runtime = &self.runtime;
        let events = lock_or_recover!(runtime.matcher).remove_local(&guid);
        runtime.apply_match_events(events);
        if let Some(datagram) = lock_or_recover!(runtime.sedp).retract_endpoint(guid) {
            for prefix in runtime.peers.prefixes() {
                runtime.send_to_peer_metatraffic(&prefix, &datagram);
            }
        }
        if let Some(core) = lock_or_recover!(runtime.readers).remove(&guid) {
            core.enabled.store(false, Ordering::Release);
        }
        if let Some(topic) = lock_or_recover!(self.topics)
            .values()
            .find(|t| t.name() == reader.topic_name())
        {
            topic.release_ref();
        }
        Ok(())
    }

    /// Stop seeing a remote participant: its endpoints unmatch and stay
    /// unmatched.
    pub fn ignore_participant(&self, prefix: GuidPrefix) -> Result<()> {
        self.check_alive()?;
        self.runtime.peers.ignore(&prefix);
        let events = lock_or_recover!(self.runtime.matcher).ignore_participant(prefix);
        self.runtime.apply_match_events(events);
        Ok(())
    }

    /// Assert MANUAL_BY_PARTICIPANT liveliness for every local writer that
    /// uses it (the participant-message token goes out).
    pub fn assert_liveliness(&self) -> Result<()> {
        self.check_alive()?;
        let runtime = &self.runtime;
        let due = {
            let announcer = lock_or_recover!(runtime.liveliness_announcer);
            announcer.token_due_on_write(Instant::now())
        };
        if due {
            let mut msg = Message::new(runtime.prefix);
            msg.push(Submessage::Data(Data {
                reader_id: ENTITYID_P2P_MESSAGE_READER,
                writer_id: ENTITYID_P2P_MESSAGE_WRITER,
                seq: 1,
                inline_qos: None,
                payload: runtime.prefix.as_bytes().to_vec(),
                key_flag: false,
            }));
            let datagram = msg.encode();
            let _ = runtime.transport.send_multicast(&datagram);
            lock_or_recover!(runtime.liveliness_announcer).mark_token_sent(Instant::now());
        }
        Ok(())
    }

    /// Tear down every contained entity, honoring the purge delay so
    /// outstanding protocol work can drain first.
    pub fn delete_contained_entities(&self) -> Result<()> {
        self.check_alive()?;
        std::thread::sleep(std::time::Duration::from_millis(
            self.runtime.purge_delay_ms,
        ));

        let runtime = &self.runtime;
        let writer_guids: Vec<Guid> = lock_or_recover!(runtime.writers).keys().copied().collect();
        for guid in writer_guids {
            let events = lock_or_recover!(runtime.matcher).remove_local(&guid);
            runtime.apply_match_events(events);
            if let Some(datagram) = lock_or_recover!(runtime.sedp).retract_endpoint(guid) {
                for prefix in runtime.peers.prefixes() {
                    runtime.send_to_peer_metatraffic(&prefix, &datagram);
                }
            }
        }
        let reader_guids: Vec<Guid> = lock_or_recover!(runtime.readers).keys().copied().collect();
        for guid in reader_guids {
            let events = lock_or_recover!(runtime.matcher).remove_local(&guid);
            runtime.apply_match_events(events);
            if let Some(datagram) = lock_or_recover!(runtime.sedp).retract_endpoint(guid) {
                for prefix in runtime.peers.prefixes() {
                    runtime.send_to_peer_metatraffic(&prefix, &datagram);
                }
            }
        }
        lock_or_recover!(runtime.writers).clear();
        lock_or_recover!(runtime.readers).clear();
        lock_or_recover!(self.topics).clear();
        lock_or_recover!(self.publishers).clear();
        lock_or_recover!(self.subscribers).clear();
        Ok(())
    }

    /// Close the participant: delete everything and stop the dispatcher.
    pub fn close(&self) -> Result<()> {
        self.check_alive()?;
        self.delete_contained_entities()?;
        self.deleted.store(true, Ordering::Release);
        self.runtime.closed.store(true, Ordering::Release);
        self.runtime.dispatcher.shutdown();
        Ok(())
    }
}

impl Drop for DomainParticipant {
    fn drop(&mut self) {
        if !self.deleted.load(Ordering::Acquire) {
            let _ = self.close();
        }
    }
}
