// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SPDP - Simple Participant Discovery Protocol.
//!
//! A best-effort builtin writer on `ENTITYID_SPDP_WRITER` multicasts the
//! local `ParticipantData` every resend period (lease / 3 by default).
//! Receipt refreshes the peer set; lease expiry evicts.

use super::PeerSet;
use crate::config::{Group, ParamStore};
use crate::core::guid::{GuidPrefix, ENTITYID_SPDP_READER, ENTITYID_SPDP_WRITER};
use crate::core::time::{Duration as DdsDuration, Time};
use crate::protocol::builtin::{
    decode_participant_data, encode_participant_data, ParticipantData,
};
use crate::protocol::submsg::{Data, InfoTs, Submessage};
use crate::protocol::Message;
use std::time::Instant;

/// The SPDP announcer + receiver for one participant.
pub struct SpdpEngine {
    local: ParticipantData,
    seq: u64,
    resend_period_ms: u64,
    next_announce: Instant,
}

impl SpdpEngine {
    /// Build from the local participant data and the RTPS config group
    /// (`RESEND_TIME`, `LEASE_TIME`).
    #[must_use]
    pub fn new(mut local: ParticipantData, store: &ParamStore) -> Self {
        let lease_ms = store
            .get_num(Group::Rtps, "LEASE_TIME")
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(90_000);
        local.lease_duration = DdsDuration::from_millis(lease_ms);

        let resend_period_ms = store
            .get_num(Group::Rtps, "RESEND_TIME")
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(lease_ms / 3)
            .min(lease_ms / 3);

        SpdpEngine {
            local,
            seq: 0,
            resend_period_ms,
            next_announce: Instant::now(),
        }
    }

    #[must_use]
    pub fn local(&self) -> &ParticipantData {
        &self.local
    }

    #[must_use]
    pub fn resend_period_ms(&self) -> u64 {
        self.resend_period_ms
    }

    /// Update the advertised locators (dynamic IP changes).
    pub fn set_locators(&mut self, data: ParticipantData) {
        self.local = data;
    }

    /// Build the announcement datagram: INFO_TS + DATA on the SPDP writer.
    pub fn build_announcement(&mut self) -> Vec<u8> {
        self.seq += 1;
        let mut msg = Message::new(self.local.guid.prefix);
        msg.push(Submessage::InfoTs(InfoTs {
            timestamp: Some(Time::now()),
        }));
        msg.push(Submessage::Data(Data {
            reader_id: ENTITYID_SPDP_READER,
            writer_id: ENTITYID_SPDP_WRITER,
            seq: self.seq,
            inline_qos: None,
            payload: encode_participant_data(&self.local),
            key_flag: false,
        }));
        msg.encode()
    }

    /// Announcement due? (called from the dispatcher timer path)
    #[must_use]
    pub fn announce_due(&self, now: Instant) -> bool {
        now >= self.next_announce
    }

    /// Mark an announcement sent and rearm the resend timer.
    pub fn mark_announced(&mut self, now: Instant) {
        self.next_announce = now + std::time::Duration::from_millis(self.resend_period_ms);
    }

    /// Ingest a received SPDP DATA payload.
    ///
    /// Returns the participant data when it names a peer (announcements
    /// from ourselves are dropped). The caller feeds the peer set and, for
    /// new peers, wires the SEDP endpoints.
    pub fn on_announcement(
        &self,
        payload: &[u8],
        peers: &PeerSet,
        now: Instant,
    ) -> Option<(ParticipantData, bool)> {
        let data = decode_participant_data(payload)?;
        if data.guid.prefix == self.local.guid.prefix {
            return None;
        }
        if data.lease_duration.is_zero() {
            log::warn!(
                "[Spdp] participant {} announced zero lease, dropping",
                data.guid.prefix
            );
            return None;
        }
        let is_new = peers.upsert(data.clone(), now);
        Some((data, is_new))
    }
}

/// Check whether a GUID prefix belongs to the local participant.
#[must_use]
pub fn is_self(local: &GuidPrefix, other: &GuidPrefix) -> bool {
    local == other
}
