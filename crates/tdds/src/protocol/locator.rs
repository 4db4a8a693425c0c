// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS locators and the standard port mapping.
//!
//! Ports derive from the domain id and participant id per DDS-RTPS v2.5
//! Sec.9.6.1.1:
//!
//! ```text
//! metatraffic multicast = PB + DG * domainId + d0
//! metatraffic unicast   = PB + DG * domainId + d1 + PG * participantId
//! user multicast        = PB + DG * domainId + d2
//! user unicast          = PB + DG * domainId + d3 + PG * participantId
//! ```
//!
//! The gains come from the UDP/TCP config group (`PB`, `DG`, `PG`,
//! `D0..D3`); the multicast group defaults to 239.255.0.1 and can be
//! overridden with `IP GROUP` / `IPV6 GROUP`.

use crate::config::{Group, ParamStore};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Locator kind values from the RTPS spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorKind {
    Invalid,
    Reserved,
    Udpv4,
    Udpv6,
    Tcpv4,
    Tcpv6,
}

impl LocatorKind {
    #[must_use]
    pub fn to_wire(self) -> i32 {
        match self {
            LocatorKind::Invalid => -1,
            LocatorKind::Reserved => 0,
            LocatorKind::Udpv4 => 1,
            LocatorKind::Udpv6 => 2,
            LocatorKind::Tcpv4 => 4,
            LocatorKind::Tcpv6 => 8,
        }
    }

    #[must_use]
    pub fn from_wire(v: i32) -> Self {
        match v {
            0 => LocatorKind::Reserved,
            1 => LocatorKind::Udpv4,
            2 => LocatorKind::Udpv6,
            4 => LocatorKind::Tcpv4,
            8 => LocatorKind::Tcpv6,
            _ => LocatorKind::Invalid,
        }
    }
}

/// RTPS locator: kind + port + 16-byte address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    pub kind: LocatorKind,
    pub port: u32,
    pub address: [u8; 16],
}

impl Locator {
    /// An invalid locator.
    pub const INVALID: Locator = Locator {
        kind: LocatorKind::Invalid,
        port: 0,
        address: [0; 16],
    };

    #[must_use]
    pub fn udpv4(addr: Ipv4Addr, port: u16) -> Self {
        let mut address = [0u8; 16];
        address[12..16].copy_from_slice(&addr.octets());
        Locator {
            kind: LocatorKind::Udpv4,
            port: u32::from(port),
            address,
        }
    }

    #[must_use]
    pub fn udpv6(addr: Ipv6Addr, port: u16) -> Self {
        Locator {
            kind: LocatorKind::Udpv6,
            port: u32::from(port),
            address: addr.octets(),
        }
    }

    #[must_use]
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(v4) => Locator::udpv4(v4, addr.port()),
            IpAddr::V6(v6) => Locator::udpv6(v6, addr.port()),
        }
    }

    /// Convert to a socket address (UDP kinds only).
    #[must_use]
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let port = u16::try_from(self.port).ok()?;
        match self.kind {
            LocatorKind::Udpv4 | LocatorKind::Tcpv4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.address[12..16]);
                Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
            }
            LocatorKind::Udpv6 | LocatorKind::Tcpv6 => {
                Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(self.address)), port))
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_multicast(&self) -> bool {
        match self.kind {
            LocatorKind::Udpv4 => self.address[12] >= 224 && self.address[12] <= 239,
            LocatorKind::Udpv6 => self.address[0] == 0xff,
            _ => false,
        }
    }

    /// Wire encoding: kind (4), port (4), address (16), little-endian.
    #[must_use]
    pub fn encode(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[0..4].copy_from_slice(&self.kind.to_wire().to_le_bytes());
        out[4..8].copy_from_slice(&self.port.to_le_bytes());
        out[8..24].copy_from_slice(&self.address);
        out
    }

    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 24 {
            return None;
        }
        let kind = LocatorKind::from_wire(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]));
        let port = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let mut address = [0u8; 16];
        address.copy_from_slice(&buf[8..24]);
        Some(Locator {
            kind,
            port,
            address,
        })
    }
}

/// Default RTPS multicast group.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// Port-mapping parameters, loaded from the UDP (or TCP) config group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub pb: u16,
    pub dg: u16,
    pub pg: u16,
    pub d0: u16,
    pub d1: u16,
    pub d2: u16,
    pub d3: u16,
}

impl Default for PortMapping {
    fn default() -> Self {
        PortMapping {
            pb: 7400,
            dg: 250,
            pg: 2,
            d0: 0,
            d1: 10,
            d2: 1,
            d3: 11,
        }
    }
}

impl PortMapping {
    /// Read the mapping from a config group (UDP or TCP).
    #[must_use]
    pub fn from_config(store: &ParamStore, group: Group) -> Self {
        let num = |name: &str, fallback: u16| {
            store
                .get_num(group, name)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(fallback)
        };
        let d = PortMapping::default();
        PortMapping {
            pb: num("PB", d.pb),
            dg: num("DG", d.dg),
            pg: num("PG", d.pg),
            d0: num("D0", d.d0),
            d1: num("D1", d.d1),
            d2: num("D2", d.d2),
            d3: num("D3", d.d3),
        }
    }

    #[must_use]
    pub fn metatraffic_multicast_port(&self, domain_id: u32) -> u16 {
        self.pb + self.dg * (domain_id as u16) + self.d0
    }

    #[must_use]
    pub fn metatraffic_unicast_port(&self, domain_id: u32, participant_id: u8) -> u16 {
        self.pb + self.dg * (domain_id as u16) + self.d1 + self.pg * u16::from(participant_id)
    }

    #[must_use]
    pub fn user_multicast_port(&self, domain_id: u32) -> u16 {
        self.pb + self.dg * (domain_id as u16) + self.d2
    }

    #[must_use]
    pub fn user_unicast_port(&self, domain_id: u32, participant_id: u8) -> u16 {
        self.pb + self.dg * (domain_id as u16) + self.d3 + self.pg * u16::from(participant_id)
    }

    /// Highest domain id whose ports still fit in 16 bits with these gains.
    #[must_use]
    pub fn max_domain_id(&self) -> u32 {
        let headroom = u32::from(u16::MAX) - u32::from(self.pb) - u32::from(self.d3) - 255;
        headroom / u32::from(self.dg)
    }
}
