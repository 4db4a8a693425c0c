// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS submessages (DDS-RTPS v2.5 Sec.8.3.7 / Sec.9.4.5).
//!
//! Every submessage the stack handles: DATA, DATAFRAG, HEARTBEAT, ACKNACK,
//! GAP, NACKFRAG, HEARTBEATFRAG, INFO_DST, INFO_TS, INFO_SRC, INFO_REPLY
//! and PAD. Encoding always emits little-endian (E flag set); decoding
//! honors the flag.

use crate::core::guid::{EntityId, GuidPrefix, ENTITY_ID_LEN, GUID_PREFIX_LEN};
use crate::core::time::Time;
use crate::protocol::locator::Locator;

/// Submessage ids.
pub const SUBMSG_PAD: u8 = 0x01;
pub const SUBMSG_ACKNACK: u8 = 0x06;
pub const SUBMSG_HEARTBEAT: u8 = 0x07;
pub const SUBMSG_GAP: u8 = 0x08;
pub const SUBMSG_INFO_TS: u8 = 0x09;
pub const SUBMSG_INFO_SRC: u8 = 0x0c;
pub const SUBMSG_INFO_REPLY_IP4: u8 = 0x0d;
pub const SUBMSG_INFO_DST: u8 = 0x0e;
pub const SUBMSG_INFO_REPLY: u8 = 0x0f;
pub const SUBMSG_NACK_FRAG: u8 = 0x12;
pub const SUBMSG_HEARTBEAT_FRAG: u8 = 0x13;
pub const SUBMSG_DATA: u8 = 0x15;
pub const SUBMSG_DATA_FRAG: u8 = 0x16;

/// Endianness flag (bit 0): set = little-endian.
const FLAG_ENDIAN: u8 = 0x01;

// ============================================================================
// SEQUENCE NUMBER SET
// ============================================================================

const MAX_BITMAP_BITS: u32 = 256;
const WORD_BITS: u32 = 32;
const BITMAP_WORDS: usize = 8;

/// SequenceNumberSet used by ACKNACK and GAP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqNumSet {
    pub base: u64,
    num_bits: u32,
    bitmap: [u32; BITMAP_WORDS],
}

impl SeqNumSet {
    /// Maximum representable offsets above the base.
    pub const MAX_BITS: u32 = MAX_BITMAP_BITS;

    #[must_use]
    pub fn empty(base: u64) -> Self {
        SeqNumSet {
            base,
            num_bits: 0,
            bitmap: [0; BITMAP_WORDS],
        }
    }

    /// Build from explicit sequence numbers; all must fall inside
    /// `[base, base + 256)`.
    #[must_use]
    pub fn from_sequences(base: u64, sequences: &[u64]) -> Option<Self> {
        let mut set = Self::empty(base);
        let mut max_offset = 0u32;
        for &seq in sequences {
            if seq < base {
                return None;
            }
            let offset = seq - base;
            if offset >= u64::from(MAX_BITMAP_BITS) {
                return None;
            }
            let offset = offset as u32;
            set.bitmap[(offset / WORD_BITS) as usize] |= 1 << (31 - offset % WORD_BITS);
            max_offset = max_offset.max(offset);
        }
        set.num_bits = if sequences.is_empty() {
            0
        } else {
            ((max_offset / WORD_BITS) + 1) * WORD_BITS
        };
        Some(set)
    }

    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    #[must_use]
    pub fn contains(&self, seq: u64) -> bool {
        if seq < self.base {
            return false;
        }
        let offset = seq - self.base;
        if offset >= u64::from(self.num_bits) {
            return false;
        }
        let offset = offset as u32;
        self.bitmap[(offset / WORD_BITS) as usize] & (1 << (31 - offset % WORD_BITS)) != 0
    }

    /// Every sequence number set in the bitmap.
    #[must_use]
    pub fn sequences(&self) -> Vec<u64> {
        let mut out = Vec::new();
        for offset in 0..self.num_bits {
            if self.bitmap[(offset / WORD_BITS) as usize] & (1 << (31 - offset % WORD_BITS)) != 0 {
                out.push(self.base + u64::from(offset));
            }
        }
        out
    }

    fn word_count(&self) -> usize {
        self.num_bits.div_ceil(WORD_BITS) as usize
    }

    fn encode_into(&self, w: &mut Writer) {
        w.seq(self.base);
        w.u32(self.num_bits);
        for i in 0..self.word_count() {
            w.u32(self.bitmap[i]);
        }
    }

    fn decode(r: &mut Reader) -> Option<Self> {
        let base = r.seq()?;
        let num_bits = r.u32()?;
        if num_bits > MAX_BITMAP_BITS {
            return None;
        }
        let mut bitmap = [0u32; BITMAP_WORDS];
        for word in bitmap.iter_mut().take(num_bits.div_ceil(WORD_BITS) as usize) {
            *word = r.u32()?;
        }
        Some(SeqNumSet {
            base,
            num_bits,
            bitmap,
        })
    }
}

/// FragmentNumberSet used by NACKFRAG (fragment numbers are 32-bit, base 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragNumSet {
    pub base: u32,
    num_bits: u32,
    bitmap: [u32; BITMAP_WORDS],
}

impl FragNumSet {
    #[must_use]
    pub fn from_fragments(base: u32, fragments: &[u32]) -> Option<Self> {
        let mut set = FragNumSet {
            base,
            num_bits: 0,
            bitmap: [0; BITMAP_WORDS],
        };
        let mut max_offset = 0u32;
        for &f in fragments {
            if f < base {
                return None;
            }
            let offset = f - base;
            if offset >= MAX_BITMAP_BITS {
                return None;
            }
            set.bitmap[(offset / WORD_BITS) as usize] |= 1 << (31 - offset % WORD_BITS);
            max_offset = max_offset.max(offset);
        }
        set.num_bits = if fragments.is_empty() {
            0
        } else {
            ((max_offset / WORD_BITS) + 1) * WORD_BITS
        };
        Some(set)
    }

    #[must_use]
    pub fn fragments(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for offset in 0..self.num_bits {
            if self.bitmap[(offset / WORD_BITS) as usize] & (1 << (31 - offset % WORD_BITS)) != 0 {
                out.push(self.base + offset);
            }
        }
        out
    }

    fn encode_into(&self, w: &mut Writer) {
        w.u32(self.base);
        w.u32(self.num_bits);
        for i in 0..self.num_bits.div_ceil(WORD_BITS) as usize {
            w.u32(self.bitmap[i]);
        }
    }

    fn decode(r: &mut Reader) -> Option<Self> {
        let base = r.u32()?;
        let num_bits = r.u32()?;
        if num_bits > MAX_BITMAP_BITS {
            return None;
        }
        let mut bitmap = [0u32; BITMAP_WORDS];
        for word in bitmap.iter_mut().take(num_bits.div_ceil(WORD_BITS) as usize) {
            *word = r.u32()?;
        }
        Some(FragNumSet {
            base,
            num_bits,
            bitmap,
        })
    }
}

// ============================================================================
// SUBMESSAGE BODIES
// ============================================================================

/// DATA: one serialized sample (or serialized key when `key_flag`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub seq: u64,
    pub inline_qos: Option<Vec<u8>>,
    /// Serialized payload with encapsulation header; empty for gap-only DATA.
    pub payload: Vec<u8>,
    /// Payload holds the serialized key, not the data (dispose/unregister).
    pub key_flag: bool,
}

/// DATAFRAG: one burst of fragments of a large sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub seq: u64,
    /// First fragment number in this submessage (1-based).
    pub frag_start: u32,
    pub frags_in_submessage: u16,
    pub frag_size: u16,
    pub sample_size: u32,
    pub payload: Vec<u8>,
}

/// HEARTBEAT: writer availability announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub first_sn: u64,
    pub last_sn: u64,
    pub count: u32,
    /// Final flag: reader need not respond.
    pub final_flag: bool,
    pub liveliness_flag: bool,
}

/// ACKNACK: reader acknowledgment + requested resends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckNack {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    /// Base acknowledges everything below it; set bits request resends.
    pub sn_state: SeqNumSet,
    pub count: u32,
    pub final_flag: bool,
}

/// GAP: sequence numbers the reader should stop waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub gap_start: u64,
    pub gap_list: SeqNumSet,
}

/// NACKFRAG: fragment-level retransmit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub seq: u64,
    pub frag_state: FragNumSet,
    pub count: u32,
}

/// HEARTBEATFRAG: fragment availability announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub seq: u64,
    pub last_frag: u32,
    pub count: u32,
}

/// INFO_TS: source timestamp for subsequent submessages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoTs {
    /// `None` means the invalidate flag was set.
    pub timestamp: Option<Time>,
}

/// INFO_DST: target participant for subsequent submessages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoDst {
    pub guid_prefix: GuidPrefix,
}

/// INFO_SRC: overrides the message header's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoSrc {
    pub version: [u8; 2],
    pub vendor: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

/// INFO_REPLY: where replies should be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoReply {
    pub unicast: Vec<Locator>,
    pub multicast: Vec<Locator>,
}

/// A parsed submessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submessage {
    Data(Data),
    DataFrag(DataFrag),
    Heartbeat(Heartbeat),
    AckNack(AckNack),
    Gap(Gap),
    NackFrag(NackFrag),
    HeartbeatFrag(HeartbeatFrag),
    InfoTs(InfoTs),
    InfoDst(InfoDst),
    InfoSrc(InfoSrc),
    InfoReply(InfoReply),
    Pad,
}

// ============================================================================
// WIRE HELPERS
// ============================================================================

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    fn align(&mut self, n: usize) {
        while self.buf.len() % n != 0 {
            self.buf.push(0);
        }
    }

    fn u16(&mut self, v: u16) {
        self.align(2);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.align(4);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn entity(&mut self, id: EntityId) {
        self.buf.extend_from_slice(id.as_bytes());
    }

    fn prefix(&mut self, p: &GuidPrefix) {
        self.buf.extend_from_slice(p.as_bytes());
    }

    /// Sequence number: i32 high + u32 low.
    fn seq(&mut self, v: u64) {
        self.u32((v >> 32) as u32);
        self.u32((v & 0xffff_ffff) as u32);
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    little: bool,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], little: bool) -> Self {
        Reader {
            buf,
            pos: 0,
            little,
        }
    }

    fn align(&mut self, n: usize) {
        while self.pos % n != 0 {
            self.pos += 1;
        }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    fn u16(&mut self) -> Option<u16> {
        self.align(2);
        let b = self.take(2)?;
        Some(if self.little {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        })
    }

    fn u32(&mut self) -> Option<u32> {
        self.align(4);
        let b = self.take(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(b);
        Some(if self.little {
            u32::from_le_bytes(arr)
        } else {
            u32::from_be_bytes(arr)
        })
    }

    fn entity(&mut self) -> Option<EntityId> {
        let b = self.take(ENTITY_ID_LEN)?;
        let mut id = [0u8; ENTITY_ID_LEN];
        id.copy_from_slice(b);
        Some(EntityId(id))
    }

    fn prefix(&mut self) -> Option<GuidPrefix> {
        let b = self.take(GUID_PREFIX_LEN)?;
        let mut p = [0u8; GUID_PREFIX_LEN];
        p.copy_from_slice(b);
        Some(GuidPrefix(p))
    }

    fn seq(&mut self) -> Option<u64> {
        let high = self.u32()?;
        let low = self.u32()?;
        Some((u64::from(high) << 32) | u64::from(low))
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

impl Submessage {
    /// Serialize with the 4-byte submessage header into `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut w = Writer::new();
        let (id, flags) = match self {
            Submessage::Data(d) => {
                // flags: E | Q(0x02, inline qos) | D(0x04, data) | K(0x08, key)
                let mut f = FLAG_ENDIAN;
                if d.inline_qos.is_some() {
                    f |= 0x02;
                }
                if d.key_flag {
                    f |= 0x08;
                } else if !d.payload.is_empty() {
                    f |= 0x04;
                }
                w.u16(0); // extraFlags
                w.u16(16); // octetsToInlineQos
                w.entity(d.reader_id);
                w.entity(d.writer_id);
                w.seq(d.seq);
                if let Some(qos) = &d.inline_qos {
                    w.bytes(qos);
                }
                if !d.payload.is_empty() {
                    w.bytes(&d.payload);
                }
                (SUBMSG_DATA, f)
            }
            Submessage::DataFrag(d) => {
                w.u16(0);
                w.u16(28); // octetsToInlineQos
                w.entity(d.reader_id);
                w.entity(d.writer_id);
                w.seq(d.seq);
                w.u32(d.frag_start);
                w.u16(d.frags_in_submessage);
                w.u16(d.frag_size);
                w.u32(d.sample_size);
                w.bytes(&d.payload);
                (SUBMSG_DATA_FRAG, FLAG_ENDIAN)
            }
            Submessage::Heartbeat(h) => {
                let mut f = FLAG_ENDIAN;
                if h.final_flag {
                    f |= 0x02;
                }
                if h.liveliness_flag {
                    f |= 0x04;
                }
                w.entity(h.reader_id);
                w.entity(h.writer_id);
                w.seq(h.first_sn);
                w.seq(h.last_sn);
                w.u32(h.count);
                (SUBMSG_HEARTBEAT, f)
            }
            Submessage::AckNack(a) => {
                let mut f = FLAG_ENDIAN;
                if a.final_flag {
                    f |= 0x02;
                }
                w.entity(a.reader_id);
                w.entity(a.writer_id);
                a.sn_state.encode_into(&mut w);
                w.u32(a.count);
                (SUBMSG_ACKNACK, f)
            }
            Submessage::Gap(g) => {
                w.entity(g.reader_id);
                w.entity(g.writer_id);
                w.seq(g.gap_start);
                g.gap_list.encode_into(&mut w);
                (SUBMSG_GAP, FLAG_ENDIAN)
            }
            Submessage::NackFrag(n) => {
                w.entity(n.reader_id);
                w.entity(n.writer_id);
                w.seq(n.seq);
                n.frag_state.encode_into(&mut w);
                w.u32(n.count);
                (SUBMSG_NACK_FRAG, FLAG_ENDIAN)
            }
            Submessage::HeartbeatFrag(h) => {
                w.entity(h.reader_id);
                w.entity(h.writer_id);
                w.seq(h.seq);
                w.u32(h.last_frag);
                w.u32(h.count);
                (SUBMSG_HEARTBEAT_FRAG, FLAG_ENDIAN)
            }
            Submessage::InfoTs(ts) => match ts.timestamp {
                Some(t) => {
                    w.u32(t.seconds as u32);
                    w.u32(t.fraction);
                    (SUBMSG_INFO_TS, FLAG_ENDIAN)
                }
                None => (SUBMSG_INFO_TS, FLAG_ENDIAN | 0x02),
            },
            Submessage::InfoDst(d) => {
                w.prefix(&d.guid_prefix);
                (SUBMSG_INFO_DST, FLAG_ENDIAN)
            }
            Submessage::InfoSrc(s) => {
                w.u32(0); // unused
                w.bytes(&s.version);
                w.bytes(&s.vendor);
                w.prefix(&s.guid_prefix);
                (SUBMSG_INFO_SRC, FLAG_ENDIAN)
            }
            Submessage::InfoReply(r) => {
                let mut f = FLAG_ENDIAN;
                w.u32(r.unicast.len() as u32);
                for loc in &r.unicast {
                    w.bytes(&loc.encode());
                }
                if !r.multicast.is_empty() {
                    f |= 0x02;
                    w.u32(r.multicast.len() as u32);
                    for loc in &r.multicast {
                        w.bytes(&loc.encode());
                    }
                }
                (SUBMSG_INFO_REPLY, f)
            }
            Submessage::Pad => (SUBMSG_PAD, FLAG_ENDIAN),
        };
        // submessages are 4-byte aligned on the wire
        w.align(4);
        debug_assert!(w.buf.len() <= u16::MAX as usize, "submessage body too large");
        out.push(id);
        out.push(flags);
        out.extend_from_slice(&(w.buf.len() as u16).to_le_bytes());
        out.extend_from_slice(&w.buf);
    }

    /// Decode one submessage body. `None` for unknown ids or malformed
    /// bodies (the caller skips them).
    #[must_use]
    pub fn decode(id: u8, flags: u8, body: &[u8]) -> Option<Submessage> {
        let little = flags & FLAG_ENDIAN != 0;
        let mut r = Reader::new(body, little);
        match id {
            SUBMSG_DATA => {
                let _extra = r.u16()?;
                let octets_to_inline_qos = r.u16()? as usize;
                let reader_id = r.entity()?;
                let writer_id = r.entity()?;
                let seq = r.seq()?;
                // skip any extension octets before inline qos / payload
                let consumed_after_header = 16; // readerId + writerId + seq
                if octets_to_inline_qos > consumed_after_header {
                    r.take(octets_to_inline_qos - consumed_after_header)?;
                }
                let has_qos = flags & 0x02 != 0;
                let has_data = flags & 0x04 != 0;
                let key_flag = flags & 0x08 != 0;
                let inline_qos = if has_qos {
                    Some(read_inline_qos(&mut r, little)?)
                } else {
                    None
                };
                let payload = if has_data || key_flag {
                    r.rest().to_vec()
                } else {
                    Vec::new()
                };
                Some(Submessage::Data(Data {
                    reader_id,
                    writer_id,
                    seq,
                    inline_qos,
                    payload,
                    key_flag,
                }))
            }
            SUBMSG_DATA_FRAG => {
                let _extra = r.u16()?;
                let _octets = r.u16()?;
                let reader_id = r.entity()?;
                let writer_id = r.entity()?;
                let seq = r.seq()?;
                let frag_start = r.u32()?;
                let frags_in_submessage = r.u16()?;
                let frag_size = r.u16()?;
                let sample_size = r.u32()?;
                let payload = r.rest().to_vec();
                Some(Submessage::DataFrag(DataFrag {
                    reader_id,
                    writer_id,
                    seq,
                    frag_start,
                    frags_in_submessage,
                    frag_size,
                    sample_size,
                    payload,
                }))
            }
            SUBMSG_HEARTBEAT => {
                let reader_id = r.entity()?;
                let writer_id = r.entity()?;
                let first_sn = r.seq()?;
                let last_sn = r.seq()?;
                let count = r.u32()?;
                Some(Submessage::Heartbeat(Heartbeat {
                    reader_id,
                    writer_id,
                    first_sn,
                    last_sn,
                    count,
                    final_flag: flags & 0x02 != 0,
                    liveliness_flag: flags & 0x04 != 0,
                }))
            }
            SUBMSG_ACKNACK => {
                let reader_id = r.entity()?;
                let writer_id = r.entity()?;
                let sn_state = SeqNumSet::decode(&mut r)?;
                let count = r.u32()?;
                Some(Submessage::AckNack(AckNack {
                    reader_id,
                    writer_id,
                    sn_state,
                    count,
                    final_flag: flags & 0x02 != 0,
                }))
            }
            SUBMSG_GAP => {
                let reader_id = r.entity()?;
                let writer_id = r.entity()?;
                let gap_start = r.seq()?;
                let gap_list = SeqNumSet::decode(&mut r)?;
                Some(Submessage::Gap(Gap {
                    reader_id,
                    writer_id,
                    gap_start,
                    gap_list,
                }))
            }
            SUBMSG_NACK_FRAG => {
                let reader_id = r.entity()?;
                let writer_id = r.entity()?;
                let seq = r.seq()?;
                let frag_state = FragNumSet::decode(&mut r)?;
                let count = r.u32()?;
                Some(Submessage::NackFrag(NackFrag {
                    reader_id,
                    writer_id,
                    seq,
                    frag_state,
                    count,
                }))
            }
            SUBMSG_HEARTBEAT_FRAG => {
                let reader_id = r.entity()?;
                let writer_id = r.entity()?;
                let seq = r.seq()?;
                let last_frag = r.u32()?;
                let count = r.u32()?;
                Some(Submessage::HeartbeatFrag(HeartbeatFrag {
                    reader_id,
                    writer_id,
                    seq,
                    last_frag,
                    count,
                }))
            }
            SUBMSG_INFO_TS => {
                if flags & 0x02 != 0 {
                    Some(Submessage::InfoTs(InfoTs { timestamp: None }))
                } else {
                    let seconds = r.u32()? as i32;
                    let fraction = r.u32()?;
                    Some(Submessage::InfoTs(InfoTs {
                        timestamp: Some(Time { seconds, fraction }),
                    }))
                }
            }
            SUBMSG_INFO_DST => Some(Submessage::InfoDst(InfoDst {
                guid_prefix: r.prefix()?,
            })),
            SUBMSG_INFO_SRC => {
                let _unused = r.u32()?;
                let v = r.take(2)?;
                let version = [v[0], v[1]];
                let ven = r.take(2)?;
                let vendor = [ven[0], ven[1]];
                let guid_prefix = r.prefix()?;
                Some(Submessage::InfoSrc(InfoSrc {
                    version,
                    vendor,
                    guid_prefix,
                }))
            }
            SUBMSG_INFO_REPLY | SUBMSG_INFO_REPLY_IP4 => {
                let n = r.u32()? as usize;
                if n > 64 {
                    return None;
                }
                let mut unicast = Vec::with_capacity(n);
                for _ in 0..n {
                    unicast.push(Locator::decode(r.take(24)?)?);
                }
                let mut multicast = Vec::new();
                if flags & 0x02 != 0 {
                    let m = r.u32()? as usize;
                    if m > 64 {
                        return None;
                    }
                    for _ in 0..m {
                        multicast.push(Locator::decode(r.take(24)?)?);
                    }
                }
                Some(Submessage::InfoReply(InfoReply { unicast, multicast }))
            }
            SUBMSG_PAD => Some(Submessage::Pad),
            _ => None,
        }
    }
}

/// Consume an inline-qos parameter list (pid/len pairs up to the sentinel)
/// and return its raw bytes.
fn read_inline_qos(r: &mut Reader, little: bool) -> Option<Vec<u8>> {
    let start = r.pos;
    loop {
        r.align(4);
        let pid_bytes = r.take(2)?;
        let pid = if little {
            u16::from_le_bytes([pid_bytes[0], pid_bytes[1]])
        } else {
            u16::from_be_bytes([pid_bytes[0], pid_bytes[1]])
        };
        let len_bytes = r.take(2)?;
        let len = if little {
            u16::from_le_bytes([len_bytes[0], len_bytes[1]])
        } else {
            u16::from_be_bytes([len_bytes[0], len_bytes[1]])
        } as usize;
        if pid == 0x0001 {
            // PID_SENTINEL
            return Some(r.buf[start..r.pos].to_vec());
        }
        r.take(len)?;
    }
}
