// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP transport.
//!
//! Three sockets per participant: metatraffic unicast, metatraffic
//! multicast (joined to the discovery group) and user-data unicast. Ports
//! come from the standard mapping; the multicast group is overridable via
//! the IP config group. Sockets are built with `socket2` (reuse-address on
//! the multicast port) and registered non-blocking with the dispatcher.

use super::{Incoming, Transport};
use crate::config::{Group, Mode, ParamStore};
use crate::protocol::locator::{Locator, PortMapping, DEFAULT_MULTICAST_GROUP};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Mutex;

/// Receive buffer size per datagram (max RTPS message we accept).
pub const RECV_BUFFER_SIZE: usize = 65536;

/// The UDP transport for one participant.
pub struct UdpTransport {
    metatraffic_unicast: UdpSocket,
    metatraffic_multicast: UdpSocket,
    user_unicast: UdpSocket,
    /// Address the unicast sockets are reachable at.
    local_ip: Ipv4Addr,
    multicast_group: Ipv4Addr,
    meta_unicast_port: u16,
    meta_multicast_port: u16,
    user_port: u16,
    mcast_enabled: bool,
    send_lock: Mutex<()>,
}

impl UdpTransport {
    /// Bind the participant's sockets for `(domain_id, participant_id)`.
    ///
    /// Walks participant ids upward when a port is taken, the standard way
    /// multiple participants share one host.
    pub fn bind(
        store: &ParamStore,
        ports: &PortMapping,
        domain_id: u32,
        participant_id: u8,
        local_ip: Ipv4Addr,
    ) -> std::io::Result<(Self, u8)> {
        let mcast_enabled = store.get_num(Group::Ip, "NO_MCAST").unwrap_or(0) == 0
            && store.get_mode(Group::Udp, "MODE") != Some(Mode::Disabled);
        let group = store
            .get_str(Group::Ip, "GROUP")
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<Ipv4Addr>().ok())
            .unwrap_or(DEFAULT_MULTICAST_GROUP);
        let ttl = store
            .get_num(Group::Ip, "MCAST_TTL")
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(1);

        // participant id walks upward until both unicast ports bind
        let mut pid = participant_id;
        let (meta_unicast, user_unicast) = loop {
            let meta_port = ports.metatraffic_unicast_port(domain_id, pid);
            let user_port = ports.user_unicast_port(domain_id, pid);
            let meta = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), meta_port));
            let user = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), user_port));
            match (meta, user) {
                (Ok(m), Ok(u)) => break (m, u),
                _ => {
                    if pid == u8::MAX {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::AddrInUse,
                            "no free participant id",
                        ));
                    }
                    pid += 1;
                }
            }
        };

        let meta_multicast_port = ports.metatraffic_multicast_port(domain_id);
        let multicast = Self::bind_multicast(group, meta_multicast_port, local_ip, ttl)?;

        meta_unicast.set_nonblocking(true)?;
        user_unicast.set_nonblocking(true)?;
        multicast.set_nonblocking(true)?;

        let transport = UdpTransport {
            meta_unicast_port: meta_unicast.local_addr()?.port(),
            user_port: user_unicast.local_addr()?.port(),
            metatraffic_unicast: meta_unicast,
            metatraffic_multicast: multicast,
            user_unicast,
            local_ip,
            multicast_group: group,
            meta_multicast_port,
            mcast_enabled,
            send_lock: Mutex::new(()),
        };
        log::info!(
            "[Udp] bound domain {} participant {} (meta {}, user {}, mcast {}:{})",
            domain_id,
            pid,
            transport.meta_unicast_port,
            transport.user_port,
            group,
            meta_multicast_port
        );
        Ok((transport, pid))
    }

    fn bind_multicast(
        group: Ipv4Addr,
        port: u16,
        local_ip: Ipv4Addr,
        ttl: u32,
    ) -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port).into())?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_ttl_v4(ttl)?;
        socket.set_multicast_loop_v4(true)?;
        let _ = local_ip; // interface selection is the dynip layer's call
        Ok(socket.into())
    }

    /// The discovery multicast destination.
    #[must_use]
    pub fn spdp_multicast_locator(&self) -> Locator {
        Locator::udpv4(self.multicast_group, self.meta_multicast_port)
    }

    /// Metatraffic unicast locator peers should answer to.
    #[must_use]
    pub fn metatraffic_locator(&self) -> Locator {
        Locator::udpv4(self.local_ip, self.meta_unicast_port)
    }

    /// User-data unicast locator.
    #[must_use]
    pub fn user_locator(&self) -> Locator {
        Locator::udpv4(self.local_ip, self.user_port)
    }

    #[must_use]
    pub fn multicast_enabled(&self) -> bool {
        self.mcast_enabled
    }

    /// Send the SPDP announcement to the multicast group.
    pub fn send_multicast(&self, data: &[u8]) -> std::io::Result<()> {
        let _guard = self.send_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.metatraffic_unicast.send_to(
            data,
            SocketAddr::new(IpAddr::V4(self.multicast_group), self.meta_multicast_port),
        )?;
        Ok(())
    }

    /// Drain one socket; calls `handle` per datagram until `WouldBlock`.
    pub fn drain(
        socket: &UdpSocket,
        buf: &mut [u8],
        mut handle: impl FnMut(Incoming),
    ) -> std::io::Result<usize> {
        let mut count = 0;
        loop {
            match socket.recv_from(buf) {
                Ok((len, source)) => {
                    count += 1;
                    handle(Incoming {
                        data: buf[..len].to_vec(),
                        source,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(count),
                Err(e) => return Err(e),
            }
        }
    }

    #[must_use]
    pub fn metatraffic_unicast_socket(&self) -> &UdpSocket {
        &self.metatraffic_unicast
    }

    #[must_use]
    pub fn metatraffic_multicast_socket(&self) -> &UdpSocket {
        &self.metatraffic_multicast
    }

    #[must_use]
    pub fn user_socket(&self) -> &UdpSocket {
        &self.user_unicast
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, data: &[u8], locator: &Locator) -> std::io::Result<()> {
        let Some(addr) = locator.to_socket_addr() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "locator is not addressable",
            ));
        };
        let _guard = self.send_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.metatraffic_unicast.send_to(data, addr)?;
        Ok(())
    }

    fn listen_locators(&self) -> Vec<Locator> {
        vec![self.metatraffic_locator(), self.user_locator()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(domain: u32) -> (UdpTransport, u8) {
        let store = ParamStore::new();
        let ports = PortMapping::default();
        UdpTransport::bind(&store, &ports, domain, 0, Ipv4Addr::LOCALHOST)
            .expect("bind should succeed")
    }

    #[test]
    fn test_bind_and_locators() {
        let (t, pid) = transport(120);
        let meta = t.metatraffic_locator();
        assert_eq!(
            meta.port,
            u32::from(PortMapping::default().metatraffic_unicast_port(120, pid))
        );
        assert!(t.spdp_multicast_locator().is_multicast());
    }

    #[test]
    fn test_second_participant_gets_next_id() {
        let (_a, pid_a) = transport(121);
        let (_b, pid_b) = transport(121);
        assert!(pid_b > pid_a);
    }

    #[test]
    fn test_unicast_send_receive() {
        let (a, _) = transport(122);
        let (b, _) = transport(122);

        let payload = b"RTPS test datagram";
        a.send_to(payload, &b.metatraffic_locator())
            .expect("send should succeed");

        // non-blocking receive with a short retry loop
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let mut got = Vec::new();
        for _ in 0..50 {
            let n = UdpTransport::drain(b.metatraffic_unicast_socket(), &mut buf, |incoming| {
                got.push(incoming.data);
            })
            .expect("drain");
            if n > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], payload);
    }
}
