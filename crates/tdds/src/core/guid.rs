// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS identifiers: `GuidPrefix` (12 bytes), `EntityId` (4 bytes) and the
//! combined 16-byte `Guid` (DDS-RTPS v2.5 Sec.8.2.4).
//!
//! Entity identifiers carry a kind octet in their last byte; the well-known
//! builtin endpoints (SPDP/SEDP/liveliness) use the constants below.

use std::fmt;

/// GUID prefix length (12 bytes).
pub const GUID_PREFIX_LEN: usize = 12;
/// Entity ID length (4 bytes).
pub const ENTITY_ID_LEN: usize = 4;

/// 12-byte participant prefix, unique per participant per domain.
///
/// Ordering is lexicographic over the raw bytes; EXCLUSIVE ownership ties
/// are broken with this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GuidPrefix(pub [u8; GUID_PREFIX_LEN]);

impl GuidPrefix {
    /// The all-zero prefix (GUIDPREFIX_UNKNOWN).
    pub const UNKNOWN: GuidPrefix = GuidPrefix([0; GUID_PREFIX_LEN]);

    /// Build a fresh prefix from host id, process id and a per-process counter.
    ///
    /// Layout follows the common vendor convention: 2 bytes vendor, 4 bytes
    /// host, 4 bytes process, 2 bytes counter.
    #[must_use]
    pub fn generate(vendor: [u8; 2], host_id: u32, process_id: u32, counter: u16) -> Self {
        let mut p = [0u8; GUID_PREFIX_LEN];
        p[0..2].copy_from_slice(&vendor);
        p[2..6].copy_from_slice(&host_id.to_be_bytes());
        p[6..10].copy_from_slice(&process_id.to_be_bytes());
        p[10..12].copy_from_slice(&counter.to_be_bytes());
        GuidPrefix(p)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; GUID_PREFIX_LEN] {
        &self.0
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.0 == [0; GUID_PREFIX_LEN]
    }
}

impl fmt::Display for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Entity kind octet (last byte of an `EntityId`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Builtin participant (0xc1).
    BuiltinParticipant,
    /// Builtin writer with key (0xc2).
    BuiltinWriter,
    /// Builtin reader with key (0xc7).
    BuiltinReader,
    /// User-defined writer with key (0x02).
    UserWriter,
    /// User-defined writer without key (0x03).
    UserWriterNoKey,
    /// User-defined reader with key (0x07).
    UserReader,
    /// User-defined reader without key (0x04).
    UserReaderNoKey,
    /// Anything else.
    Unknown(u8),
}

impl EntityKind {
    #[must_use]
    pub fn from_octet(b: u8) -> Self {
        match b {
            0xc1 => EntityKind::BuiltinParticipant,
            0xc2 => EntityKind::BuiltinWriter,
            0xc7 => EntityKind::BuiltinReader,
            0x02 => EntityKind::UserWriter,
            0x03 => EntityKind::UserWriterNoKey,
            0x07 => EntityKind::UserReader,
            0x04 => EntityKind::UserReaderNoKey,
            other => EntityKind::Unknown(other),
        }
    }

    /// True for every writer kind (builtin or user).
    #[must_use]
    pub fn is_writer(&self) -> bool {
        matches!(
            self,
            EntityKind::BuiltinWriter | EntityKind::UserWriter | EntityKind::UserWriterNoKey
        )
    }

    /// True for every reader kind (builtin or user).
    #[must_use]
    pub fn is_reader(&self) -> bool {
        matches!(
            self,
            EntityKind::BuiltinReader | EntityKind::UserReader | EntityKind::UserReaderNoKey
        )
    }

    /// True for the builtin (0xcX) kinds.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        matches!(
            self,
            EntityKind::BuiltinParticipant | EntityKind::BuiltinWriter | EntityKind::BuiltinReader
        )
    }
}

/// 4-byte entity identifier, unique within one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntityId(pub [u8; ENTITY_ID_LEN]);

/// ENTITYID_UNKNOWN.
pub const ENTITYID_UNKNOWN: EntityId = EntityId([0x00, 0x00, 0x00, 0x00]);
/// Builtin participant entity.
pub const ENTITYID_PARTICIPANT: EntityId = EntityId([0x00, 0x00, 0x01, 0xc1]);
/// SPDP builtin participant announcement writer.
pub const ENTITYID_SPDP_WRITER: EntityId = EntityId([0x00, 0x01, 0x00, 0xc2]);
/// SPDP builtin participant announcement reader.
pub const ENTITYID_SPDP_READER: EntityId = EntityId([0x00, 0x01, 0x00, 0xc7]);
/// SEDP builtin publications writer.
pub const ENTITYID_SEDP_PUB_WRITER: EntityId = EntityId([0x00, 0x00, 0x03, 0xc2]);
/// SEDP builtin publications reader.
pub const ENTITYID_SEDP_PUB_READER: EntityId = EntityId([0x00, 0x00, 0x03, 0xc7]);
/// SEDP builtin subscriptions writer.
pub const ENTITYID_SEDP_SUB_WRITER: EntityId = EntityId([0x00, 0x00, 0x04, 0xc2]);
/// SEDP builtin subscriptions reader.
pub const ENTITYID_SEDP_SUB_READER: EntityId = EntityId([0x00, 0x00, 0x04, 0xc7]);
/// SEDP builtin topics writer.
pub const ENTITYID_SEDP_TOPIC_WRITER: EntityId = EntityId([0x00, 0x00, 0x02, 0xc2]);
/// SEDP builtin topics reader.
pub const ENTITYID_SEDP_TOPIC_READER: EntityId = EntityId([0x00, 0x00, 0x02, 0xc7]);
/// Builtin participant message (liveliness) writer.
pub const ENTITYID_P2P_MESSAGE_WRITER: EntityId = EntityId([0x00, 0x02, 0x00, 0xc2]);
/// Builtin participant message (liveliness) reader.
pub const ENTITYID_P2P_MESSAGE_READER: EntityId = EntityId([0x00, 0x02, 0x00, 0xc7]);

impl EntityId {
    /// Build a user entity id from a 24-bit key and a kind octet.
    #[must_use]
    pub fn user(key: u32, kind: EntityKind) -> Self {
        let kind_octet = match kind {
            EntityKind::UserWriter => 0x02,
            EntityKind::UserWriterNoKey => 0x03,
            EntityKind::UserReader => 0x07,
            EntityKind::UserReaderNoKey => 0x04,
            EntityKind::BuiltinParticipant => 0xc1,
            EntityKind::BuiltinWriter => 0xc2,
            EntityKind::BuiltinReader => 0xc7,
            EntityKind::Unknown(b) => b,
        };
        let k = key.to_be_bytes();
        EntityId([k[1], k[2], k[3], kind_octet])
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        EntityKind::from_octet(self.0[3])
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ENTITY_ID_LEN] {
        &self.0
    }

    /// True when this entity id names one of the builtin discovery or
    /// liveliness endpoints.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.kind().is_builtin()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}.{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Full 16-byte GUID: participant prefix + entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Guid {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl Guid {
    /// GUID_UNKNOWN.
    pub const UNKNOWN: Guid = Guid {
        prefix: GuidPrefix::UNKNOWN,
        entity_id: ENTITYID_UNKNOWN,
    };

    #[must_use]
    pub fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Guid { prefix, entity_id }
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        prefix.copy_from_slice(&bytes[0..12]);
        let mut eid = [0u8; ENTITY_ID_LEN];
        eid.copy_from_slice(&bytes[12..16]);
        Guid {
            prefix: GuidPrefix(prefix),
            entity_id: EntityId(eid),
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..12].copy_from_slice(&self.prefix.0);
        out[12..16].copy_from_slice(&self.entity_id.0);
        out
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix, self.entity_id)
    }
}
