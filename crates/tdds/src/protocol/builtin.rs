// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Builtin-topic discovery payloads.
//!
//! SPDP announces `ParticipantData`, SEDP exchanges `EndpointData`
//! (publications and subscriptions, full effective QoS included). Both are
//! parameter lists: `(pid, length, value)` triples closed by a sentinel,
//! wrapped in a PL_CDR_LE encapsulation. Unknown pids are skipped, which
//! is what keeps discovery forward-compatible across vendors.

use crate::core::guid::{Guid, GuidPrefix, ENTITYID_PARTICIPANT};
use crate::core::time::Duration;
use crate::protocol::locator::Locator;
use crate::protocol::{PROTOCOL_VERSION, VENDOR_ID};
use crate::qos::{
    Deadline, DestinationOrderKind, Durability, History, LatencyBudget, Lifespan, Liveliness,
    LivelinessKind, Ownership, OwnershipKind, OwnershipStrength, Partition, Presentation,
    PresentationAccessScope, Qos, Reliability, ReliabilityKind, ResourceLimits, TimeBasedFilter,
    LENGTH_UNLIMITED,
};

// Parameter ids (DDS-RTPS v2.5 Sec.9.6.2.2.2).
pub const PID_SENTINEL: u16 = 0x0001;
pub const PID_PARTICIPANT_LEASE_DURATION: u16 = 0x0002;
pub const PID_TIME_BASED_FILTER: u16 = 0x0004;
pub const PID_TOPIC_NAME: u16 = 0x0005;
pub const PID_OWNERSHIP_STRENGTH: u16 = 0x0006;
pub const PID_TYPE_NAME: u16 = 0x0007;
pub const PID_DOMAIN_ID: u16 = 0x000f;
pub const PID_PROTOCOL_VERSION: u16 = 0x0015;
pub const PID_VENDORID: u16 = 0x0016;
pub const PID_RELIABILITY: u16 = 0x001a;
pub const PID_LIVELINESS: u16 = 0x001b;
pub const PID_DURABILITY: u16 = 0x001d;
pub const PID_OWNERSHIP: u16 = 0x001f;
pub const PID_PRESENTATION: u16 = 0x0021;
pub const PID_DEADLINE: u16 = 0x0023;
pub const PID_DESTINATION_ORDER: u16 = 0x0025;
pub const PID_LATENCY_BUDGET: u16 = 0x0027;
pub const PID_PARTITION: u16 = 0x0029;
pub const PID_LIFESPAN: u16 = 0x002b;
pub const PID_USER_DATA: u16 = 0x002c;
pub const PID_GROUP_DATA: u16 = 0x002d;
pub const PID_TOPIC_DATA: u16 = 0x002e;
pub const PID_UNICAST_LOCATOR: u16 = 0x002f;
pub const PID_MULTICAST_LOCATOR: u16 = 0x0030;
pub const PID_DEFAULT_UNICAST_LOCATOR: u16 = 0x0031;
pub const PID_METATRAFFIC_UNICAST_LOCATOR: u16 = 0x0032;
pub const PID_METATRAFFIC_MULTICAST_LOCATOR: u16 = 0x0033;
pub const PID_HISTORY: u16 = 0x0040;
pub const PID_RESOURCE_LIMITS: u16 = 0x0041;
pub const PID_EXPECTS_INLINE_QOS: u16 = 0x0043;
pub const PID_DEFAULT_MULTICAST_LOCATOR: u16 = 0x0048;
pub const PID_PARTICIPANT_GUID: u16 = 0x0050;
pub const PID_BUILTIN_ENDPOINT_SET: u16 = 0x0058;
pub const PID_ENDPOINT_GUID: u16 = 0x005a;
pub const PID_KEY_HASH: u16 = 0x0070;

// Builtin endpoint availability bits.
pub const BUILTIN_PARTICIPANT_ANNOUNCER: u32 = 1 << 0;
pub const BUILTIN_PARTICIPANT_DETECTOR: u32 = 1 << 1;
pub const BUILTIN_PUBLICATIONS_ANNOUNCER: u32 = 1 << 2;
pub const BUILTIN_PUBLICATIONS_DETECTOR: u32 = 1 << 3;
pub const BUILTIN_SUBSCRIPTIONS_ANNOUNCER: u32 = 1 << 4;
pub const BUILTIN_SUBSCRIPTIONS_DETECTOR: u32 = 1 << 5;
pub const BUILTIN_P2P_MESSAGE_WRITER: u32 = 1 << 10;
pub const BUILTIN_P2P_MESSAGE_READER: u32 = 1 << 11;

/// Everything a default participant carries.
pub const BUILTIN_ENDPOINTS_DEFAULT: u32 = BUILTIN_PARTICIPANT_ANNOUNCER
    | BUILTIN_PARTICIPANT_DETECTOR
    | BUILTIN_PUBLICATIONS_ANNOUNCER
    | BUILTIN_PUBLICATIONS_DETECTOR
    | BUILTIN_SUBSCRIPTIONS_ANNOUNCER
    | BUILTIN_SUBSCRIPTIONS_DETECTOR
    | BUILTIN_P2P_MESSAGE_WRITER
    | BUILTIN_P2P_MESSAGE_READER;

/// SPDP participant announcement content.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantData {
    pub guid: Guid,
    pub protocol_version: [u8; 2],
    pub vendor: [u8; 2],
    pub domain_id: u32,
    pub builtin_endpoints: u32,
    pub default_unicast: Vec<Locator>,
    pub default_multicast: Vec<Locator>,
    pub metatraffic_unicast: Vec<Locator>,
    pub metatraffic_multicast: Vec<Locator>,
    pub lease_duration: Duration,
}

impl ParticipantData {
    #[must_use]
    pub fn new(prefix: GuidPrefix, domain_id: u32) -> Self {
        ParticipantData {
            guid: Guid::new(prefix, ENTITYID_PARTICIPANT),
            protocol_version: PROTOCOL_VERSION,
            vendor: VENDOR_ID,
            domain_id,
            builtin_endpoints: BUILTIN_ENDPOINTS_DEFAULT,
            default_unicast: Vec::new(),
            default_multicast: Vec::new(),
            metatraffic_unicast: Vec::new(),
            metatraffic_multicast: Vec::new(),
            lease_duration: Duration::from_secs(90),
        }
    }
}

/// SEDP endpoint descriptor (publication or subscription).
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointData {
    pub endpoint_guid: Guid,
    pub participant_guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: Qos,
    pub unicast: Vec<Locator>,
    pub multicast: Vec<Locator>,
    pub expects_inline_qos: bool,
}

// ============================================================================
// PARAMETER LIST ENCODING
// ============================================================================

struct ParamWriter {
    buf: Vec<u8>,
}

impl ParamWriter {
    fn new() -> Self {
        // PL_CDR_LE encapsulation
        ParamWriter {
            buf: vec![0x00, 0x03, 0x00, 0x00],
        }
    }

    fn param(&mut self, pid: u16, body: &[u8]) {
        let mut padded = body.len();
        while padded % 4 != 0 {
            padded += 1;
        }
        self.buf.extend_from_slice(&pid.to_le_bytes());
        self.buf.extend_from_slice(&(padded as u16).to_le_bytes());
        self.buf.extend_from_slice(body);
        self.buf.resize(self.buf.len() + (padded - body.len()), 0);
    }

    fn u32_param(&mut self, pid: u16, v: u32) {
        self.param(pid, &v.to_le_bytes());
    }

    fn duration_param(&mut self, pid: u16, d: Duration) {
        let mut body = [0u8; 8];
        body[0..4].copy_from_slice(&d.seconds.to_le_bytes());
        body[4..8].copy_from_slice(&d.fraction.to_le_bytes());
        self.param(pid, &body);
    }

    fn string_param(&mut self, pid: u16, s: &str) {
        let mut body = Vec::with_capacity(4 + s.len() + 1);
        body.extend_from_slice(&(s.len() as u32 + 1).to_le_bytes());
        body.extend_from_slice(s.as_bytes());
        body.push(0);
        self.param(pid, &body);
    }

    fn locators(&mut self, pid: u16, locators: &[Locator]) {
        for loc in locators {
            self.param(pid, &loc.encode());
        }
    }

    fn octets_param(&mut self, pid: u16, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut body = Vec::with_capacity(4 + data.len());
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(data);
        self.param(pid, &body);
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(&PID_SENTINEL.to_le_bytes());
        self.buf.extend_from_slice(&0u16.to_le_bytes());
        self.buf
    }
}

struct ParamReader<'a> {
    buf: &'a [u8],
    pos: usize,
    little: bool,
}

struct Param<'a> {
    pid: u16,
    body: &'a [u8],
    little: bool,
}

impl<'a> Param<'a> {
    fn u32_at(&self, offset: usize) -> Option<u32> {
        let b = self.body.get(offset..offset + 4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(b);
        Some(if self.little {
            u32::from_le_bytes(arr)
        } else {
            u32::from_be_bytes(arr)
        })
    }

    fn i32_at(&self, offset: usize) -> Option<i32> {
        self.u32_at(offset).map(|v| v as i32)
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration {
            seconds: self.i32_at(0)?,
            fraction: self.u32_at(4)?,
        })
    }

    fn string(&self) -> Option<String> {
        let len = self.u32_at(0)? as usize;
        if len == 0 {
            return Some(String::new());
        }
        let bytes = self.body.get(4..4 + len - 1)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn guid(&self) -> Option<Guid> {
        let b = self.body.get(0..16)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(b);
        Some(Guid::from_bytes(arr))
    }
}

impl<'a> ParamReader<'a> {
    /// Start reading a parameter list; checks the encapsulation header.
    fn new(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < 4 {
            return None;
        }
        let encap = u16::from_be_bytes([buf[0], buf[1]]);
        let little = match encap {
            0x0003 | 0x0001 => true,
            0x0002 | 0x0000 => false,
            _ => return None,
        };
        Some(ParamReader {
            buf: &buf[4..],
            pos: 0,
            little,
        })
    }

    fn next(&mut self) -> Option<Param<'a>> {
        while self.pos % 4 != 0 {
            self.pos += 1;
        }
        let header = self.buf.get(self.pos..self.pos + 4)?;
        let (pid, len) = if self.little {
            (
                u16::from_le_bytes([header[0], header[1]]),
                u16::from_le_bytes([header[2], header[3]]) as usize,
            )
        } else {
            (
                u16::from_be_bytes([header[0], header[1]]),
                u16::from_be_bytes([header[2], header[3]]) as usize,
            )
        };
        self.pos += 4;
        if pid == PID_SENTINEL {
            return None;
        }
        let body = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(Param {
            pid,
            body,
            little: self.little,
        })
    }
}

// ============================================================================
// PARTICIPANT DATA
// ============================================================================

/// Serialize an SPDP participant announcement.
#[must_use]
pub fn encode_participant_data(data: &ParticipantData) -> Vec<u8> {
    let mut w = ParamWriter::new();
    w.param(
        PID_PROTOCOL_VERSION,
        &[data.protocol_version[0], data.protocol_version[1], 0, 0],
    );
    w.param(PID_VENDORID, &[data.vendor[0], data.vendor[1], 0, 0]);
    w.u32_param(PID_DOMAIN_ID, data.domain_id);
    w.param(PID_PARTICIPANT_GUID, &data.guid.to_bytes());
    w.u32_param(PID_BUILTIN_ENDPOINT_SET, data.builtin_endpoints);
    w.locators(PID_DEFAULT_UNICAST_LOCATOR, &data.default_unicast);
    w.locators(PID_DEFAULT_MULTICAST_LOCATOR, &data.default_multicast);
    w.locators(PID_METATRAFFIC_UNICAST_LOCATOR, &data.metatraffic_unicast);
    w.locators(
        PID_METATRAFFIC_MULTICAST_LOCATOR,
        &data.metatraffic_multicast,
    );
    w.duration_param(PID_PARTICIPANT_LEASE_DURATION, data.lease_duration);
    w.finish()
}

/// Parse an SPDP participant announcement. Unknown pids are skipped.
#[must_use]
pub fn decode_participant_data(buf: &[u8]) -> Option<ParticipantData> {
    let mut reader = ParamReader::new(buf)?;
    let mut guid = None;
    let mut data = ParticipantData::new(GuidPrefix::UNKNOWN, 0);

    while let Some(param) = reader.next() {
        match param.pid {
            PID_PROTOCOL_VERSION => {
                if param.body.len() >= 2 {
                    data.protocol_version = [param.body[0], param.body[1]];
                }
            }
            PID_VENDORID => {
                if param.body.len() >= 2 {
                    data.vendor = [param.body[0], param.body[1]];
                }
            }
            PID_DOMAIN_ID => data.domain_id = param.u32_at(0)?,
            PID_PARTICIPANT_GUID => guid = param.guid(),
            PID_BUILTIN_ENDPOINT_SET => data.builtin_endpoints = param.u32_at(0)?,
            PID_DEFAULT_UNICAST_LOCATOR => {
                data.default_unicast.push(Locator::decode(param.body)?);
            }
            PID_DEFAULT_MULTICAST_LOCATOR => {
                data.default_multicast.push(Locator::decode(param.body)?);
            }
            PID_METATRAFFIC_UNICAST_LOCATOR => {
                data.metatraffic_unicast.push(Locator::decode(param.body)?);
            }
            PID_METATRAFFIC_MULTICAST_LOCATOR => {
                data.metatraffic_multicast
                    .push(Locator::decode(param.body)?);
            }
            PID_PARTICIPANT_LEASE_DURATION => data.lease_duration = param.duration()?,
            _ => {}
        }
    }

    data.guid = guid?;
    Some(data)
}

// ============================================================================
// ENDPOINT DATA (full QoS)
// ============================================================================

/// Serialize an SEDP endpoint record with its full effective QoS.
#[must_use]
pub fn encode_endpoint_data(data: &EndpointData) -> Vec<u8> {
    let mut w = ParamWriter::new();
    w.string_param(PID_TOPIC_NAME, &data.topic_name);
    w.string_param(PID_TYPE_NAME, &data.type_name);
    w.param(PID_ENDPOINT_GUID, &data.endpoint_guid.to_bytes());
    w.param(PID_PARTICIPANT_GUID, &data.participant_guid.to_bytes());
    w.param(
        PID_EXPECTS_INLINE_QOS,
        &[u8::from(data.expects_inline_qos), 0, 0, 0],
    );
    w.locators(PID_UNICAST_LOCATOR, &data.unicast);
    w.locators(PID_MULTICAST_LOCATOR, &data.multicast);

    let qos = &data.qos;
    // reliability kind on the wire: 1 = best effort, 2 = reliable
    {
        let mut body = [0u8; 12];
        let kind: u32 = match qos.reliability.kind {
            ReliabilityKind::BestEffort => 1,
            ReliabilityKind::Reliable => 2,
        };
        body[0..4].copy_from_slice(&kind.to_le_bytes());
        body[4..8].copy_from_slice(&qos.reliability.max_blocking_time.seconds.to_le_bytes());
        body[8..12].copy_from_slice(&qos.reliability.max_blocking_time.fraction.to_le_bytes());
        w.param(PID_RELIABILITY, &body);
    }
    w.u32_param(
        PID_DURABILITY,
        match qos.durability {
            Durability::Volatile => 0,
            Durability::TransientLocal => 1,
            Durability::Transient => 2,
            Durability::Persistent => 3,
        },
    );
    {
        let (kind, depth): (u32, i32) = match qos.history {
            History::KeepLast(d) => (0, d as i32),
            History::KeepAll => (1, -1),
        };
        let mut body = [0u8; 8];
        body[0..4].copy_from_slice(&kind.to_le_bytes());
        body[4..8].copy_from_slice(&depth.to_le_bytes());
        w.param(PID_HISTORY, &body);
    }
    {
        let unl = |v: u32| -> i32 {
            if v == LENGTH_UNLIMITED {
                -1
            } else {
                v as i32
            }
        };
        let mut body = [0u8; 12];
        body[0..4].copy_from_slice(&unl(qos.resource_limits.max_samples).to_le_bytes());
        body[4..8].copy_from_slice(&unl(qos.resource_limits.max_instances).to_le_bytes());
        body[8..12]
            .copy_from_slice(&unl(qos.resource_limits.max_samples_per_instance).to_le_bytes());
        w.param(PID_RESOURCE_LIMITS, &body);
    }
    w.u32_param(
        PID_OWNERSHIP,
        match qos.ownership.kind {
            OwnershipKind::Shared => 0,
            OwnershipKind::Exclusive => 1,
        },
    );
    w.param(
        PID_OWNERSHIP_STRENGTH,
        &qos.ownership_strength.value.to_le_bytes(),
    );
    w.duration_param(PID_DEADLINE, qos.deadline.period);
    w.duration_param(PID_LATENCY_BUDGET, qos.latency_budget.duration);
    {
        let mut body = [0u8; 12];
        let kind: u32 = match qos.liveliness.kind {
            LivelinessKind::Automatic => 0,
            LivelinessKind::ManualByParticipant => 1,
            LivelinessKind::ManualByTopic => 2,
        };
        body[0..4].copy_from_slice(&kind.to_le_bytes());
        body[4..8].copy_from_slice(&qos.liveliness.lease_duration.seconds.to_le_bytes());
        body[8..12].copy_from_slice(&qos.liveliness.lease_duration.fraction.to_le_bytes());
        w.param(PID_LIVELINESS, &body);
    }
    w.duration_param(PID_LIFESPAN, qos.lifespan.duration);
    w.u32_param(
        PID_DESTINATION_ORDER,
        match qos.destination_order.kind {
            DestinationOrderKind::ByReceptionTimestamp => 0,
            DestinationOrderKind::BySourceTimestamp => 1,
        },
    );
    {
        let scope: u32 = match qos.presentation.access_scope {
            PresentationAccessScope::Instance => 0,
            PresentationAccessScope::Topic => 1,
            PresentationAccessScope::Group => 2,
        };
        let body = [
            scope.to_le_bytes()[0],
            scope.to_le_bytes()[1],
            scope.to_le_bytes()[2],
            scope.to_le_bytes()[3],
            u8::from(qos.presentation.coherent_access),
            u8::from(qos.presentation.ordered_access),
            0,
            0,
        ];
        w.param(PID_PRESENTATION, &body);
    }
    if !qos.partition.names.is_empty() {
        let mut body = Vec::new();
        body.extend_from_slice(&(qos.partition.names.len() as u32).to_le_bytes());
        for name in &qos.partition.names {
            while body.len() % 4 != 0 {
                body.push(0);
            }
            body.extend_from_slice(&(name.len() as u32 + 1).to_le_bytes());
            body.extend_from_slice(name.as_bytes());
            body.push(0);
        }
        w.param(PID_PARTITION, &body);
    }
    w.duration_param(PID_TIME_BASED_FILTER, qos.time_based_filter.minimum_separation);
    w.octets_param(PID_USER_DATA, &qos.user_data.value);
    w.octets_param(PID_TOPIC_DATA, &qos.topic_data.value);
    w.octets_param(PID_GROUP_DATA, &qos.group_data.value);

    w.finish()
}

/// Parse an SEDP endpoint record.
#[must_use]
pub fn decode_endpoint_data(buf: &[u8]) -> Option<EndpointData> {
    let mut reader = ParamReader::new(buf)?;
    let mut endpoint_guid = None;
    let mut participant_guid = None;
    let mut topic_name = None;
    let mut type_name = None;
    let mut qos = Qos::default();
    let mut unicast = Vec::new();
    let mut multicast = Vec::new();
    let mut expects_inline_qos = false;

    while let Some(param) = reader.next() {
        match param.pid {
            PID_TOPIC_NAME => topic_name = param.string(),
            PID_TYPE_NAME => type_name = param.string(),
            PID_ENDPOINT_GUID => endpoint_guid = param.guid(),
            PID_PARTICIPANT_GUID => participant_guid = param.guid(),
            PID_EXPECTS_INLINE_QOS => expects_inline_qos = param.body.first() == Some(&1),
            PID_UNICAST_LOCATOR => unicast.push(Locator::decode(param.body)?),
            PID_MULTICAST_LOCATOR => multicast.push(Locator::decode(param.body)?),
            PID_RELIABILITY => {
                let kind = param.u32_at(0)?;
                qos.reliability = Reliability {
                    kind: if kind >= 2 {
                        ReliabilityKind::Reliable
                    } else {
                        ReliabilityKind::BestEffort
                    },
                    max_blocking_time: Duration {
                        seconds: param.i32_at(4)?,
                        fraction: param.u32_at(8)?,
                    },
                };
            }
            PID_DURABILITY => {
                qos.durability = match param.u32_at(0)? {
                    0 => Durability::Volatile,
                    1 => Durability::TransientLocal,
                    2 => Durability::Transient,
                    _ => Durability::Persistent,
                };
            }
            PID_HISTORY => {
                let kind = param.u32_at(0)?;
                let depth = param.i32_at(4)?;
                qos.history = if kind == 0 {
                    History::KeepLast(u32::try_from(depth.max(1)).unwrap_or(1))
                } else {
                    History::KeepAll
                };
            }
            PID_RESOURCE_LIMITS => {
                let unl = |v: i32| -> u32 {
                    if v < 0 {
                        LENGTH_UNLIMITED
                    } else {
                        v as u32
                    }
                };
                qos.resource_limits = ResourceLimits {
                    max_samples: unl(param.i32_at(0)?),
                    max_instances: unl(param.i32_at(4)?),
                    max_samples_per_instance: unl(param.i32_at(8)?),
                };
            }
            PID_OWNERSHIP => {
                qos.ownership = Ownership {
                    kind: if param.u32_at(0)? == 1 {
                        OwnershipKind::Exclusive
                    } else {
                        OwnershipKind::Shared
                    },
                };
            }
            PID_OWNERSHIP_STRENGTH => {
                qos.ownership_strength = OwnershipStrength {
                    value: param.i32_at(0)?,
                };
            }
            PID_DEADLINE => {
                qos.deadline = Deadline {
                    period: param.duration()?,
                };
            }
            PID_LATENCY_BUDGET => {
                qos.latency_budget = LatencyBudget {
                    duration: param.duration()?,
                };
            }
            PID_LIVELINESS => {
                qos.liveliness = Liveliness {
                    kind: match param.u32_at(0)? {
                        0 => LivelinessKind::Automatic,
                        1 => LivelinessKind::ManualByParticipant,
                        _ => LivelinessKind::ManualByTopic,
                    },
                    lease_duration: Duration {
                        seconds: param.i32_at(4)?,
                        fraction: param.u32_at(8)?,
                    },
                };
            }
            PID_LIFESPAN => {
                qos.lifespan = Lifespan {
                    duration: param.duration()?,
                };
            }
            PID_DESTINATION_ORDER => {
                qos.destination_order.kind = if param.u32_at(0)? == 1 {
                    DestinationOrderKind::BySourceTimestamp
                } else {
                    DestinationOrderKind::ByReceptionTimestamp
                };
            }
            PID_PRESENTATION => {
                qos.presentation = Presentation {
                    access_scope: match param.u32_at(0)? {
                        0 => PresentationAccessScope::Instance,
                        1 => PresentationAccessScope::Topic,
                        _ => PresentationAccessScope::Group,
                    },
                    coherent_access: param.body.get(4) == Some(&1),
                    ordered_access: param.body.get(5) == Some(&1),
                };
            }
            PID_PARTITION => {
                let count = param.u32_at(0)? as usize;
                if count > 256 {
                    return None;
                }
                let mut names = Vec::with_capacity(count);
                let mut pos = 4;
                for _ in 0..count {
                    while pos % 4 != 0 {
                        pos += 1;
                    }
                    let len = param.u32_at(pos)? as usize;
                    pos += 4;
                    if len == 0 {
                        names.push(String::new());
                        continue;
                    }
                    let bytes = param.body.get(pos..pos + len - 1)?;
                    names.push(String::from_utf8(bytes.to_vec()).ok()?);
                    pos += len;
                }
                qos.partition = Partition { names };
            }
            PID_TIME_BASED_FILTER => {
                qos.time_based_filter = TimeBasedFilter {
                    minimum_separation: param.duration()?,
                };
            }
            PID_USER_DATA => {
                let len = param.u32_at(0)? as usize;
                qos.user_data.value = param.body.get(4..4 + len)?.to_vec();
            }
            PID_TOPIC_DATA => {
                let len = param.u32_at(0)? as usize;
                qos.topic_data.value = param.body.get(4..4 + len)?.to_vec();
            }
            PID_GROUP_DATA => {
                let len = param.u32_at(0)? as usize;
                qos.group_data.value = param.body.get(4..4 + len)?.to_vec();
            }
            _ => {}
        }
    }

    Some(EndpointData {
        endpoint_guid: endpoint_guid?,
        participant_guid: participant_guid?,
        topic_name: topic_name?,
        type_name: type_name?,
        qos,
        unicast,
        multicast,
        expects_inline_qos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{EntityId, EntityKind};
    use std::net::Ipv4Addr;

    fn prefix() -> GuidPrefix {
        GuidPrefix([0xA; 12])
    }

    #[test]
    fn test_participant_data_roundtrip() {
        let mut data = ParticipantData::new(prefix(), 7);
        data.metatraffic_unicast
            .push(Locator::udpv4(Ipv4Addr::new(10, 0, 0, 5), 7410));
        data.default_unicast
            .push(Locator::udpv4(Ipv4Addr::new(10, 0, 0, 5), 7411));
        data.default_multicast
            .push(Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7401));
        data.lease_duration = Duration::from_secs(30);

        let bytes = encode_participant_data(&data);
        let back = decode_participant_data(&bytes).expect("decode");
        assert_eq!(back, data);
    }

    #[test]
    fn test_participant_data_missing_guid_rejected() {
        // sentinel-only list
        let buf = [0x00, 0x03, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        assert!(decode_participant_data(&buf).is_none());
    }

    #[test]
    fn test_endpoint_data_roundtrip_full_qos() {
        let qos = Qos {
            durability: Durability::TransientLocal,
            reliability: Reliability {
                kind: ReliabilityKind::Reliable,
                max_blocking_time: Duration::from_millis(150),
            },
            history: History::KeepLast(5),
            ownership: Ownership {
                kind: OwnershipKind::Exclusive,
            },
            ownership_strength: OwnershipStrength { value: 20 },
            partition: Partition {
                names: vec!["sensors".to_string(), "north".to_string()],
            },
            ..Qos::default()
        };
        let data = EndpointData {
            endpoint_guid: Guid::new(prefix(), EntityId::user(4, EntityKind::UserWriter)),
            participant_guid: Guid::new(prefix(), ENTITYID_PARTICIPANT),
            topic_name: "Square".to_string(),
            type_name: "ShapeType".to_string(),
            qos,
            unicast: vec![Locator::udpv4(Ipv4Addr::new(192, 168, 0, 2), 7411)],
            multicast: Vec::new(),
            expects_inline_qos: false,
        };

        let bytes = encode_endpoint_data(&data);
        let back = decode_endpoint_data(&bytes).expect("decode");
        assert_eq!(back.topic_name, "Square");
        assert_eq!(back.type_name, "ShapeType");
        assert_eq!(back.qos, data.qos);
        assert_eq!(back.endpoint_guid, data.endpoint_guid);
        assert_eq!(back.unicast, data.unicast);
    }

    #[test]
    fn test_unknown_pid_skipped() {
        let data = ParticipantData::new(prefix(), 0);
        let mut bytes = encode_participant_data(&data);
        // splice an unknown parameter before the sentinel
        let sentinel_at = bytes.len() - 4;
        let mut unknown = vec![0x99u8, 0x7f, 0x04, 0x00, 1, 2, 3, 4];
        bytes.splice(sentinel_at..sentinel_at, unknown.drain(..));
        let back = decode_participant_data(&bytes).expect("decode tolerates unknown pid");
        assert_eq!(back.guid, data.guid);
    }

    #[test]
    fn test_big_endian_participant_decode() {
        // hand-build a minimal PL_CDR_BE list holding only the GUID
        let mut buf = vec![0x00, 0x02, 0x00, 0x00];
        buf.extend_from_slice(&PID_PARTICIPANT_GUID.to_be_bytes());
        buf.extend_from_slice(&16u16.to_be_bytes());
        let guid = Guid::new(prefix(), ENTITYID_PARTICIPANT);
        buf.extend_from_slice(&guid.to_bytes());
        buf.extend_from_slice(&PID_SENTINEL.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());

        let back = decode_participant_data(&buf).expect("decode");
        assert_eq!(back.guid, guid);
    }
}
