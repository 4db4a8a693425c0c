// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP transport surface.
//!
//! RTPS over TCP frames each message with a 4-byte little-endian length
//! prefix. The transport is disabled by default (`TCP MODE = DISABLED`);
//! when enabled it either listens on `TCP PORT` or dials `TCP SERVER`.
//! Locator exchange still happens through discovery; the stream only
//! replaces the datagram path.

use super::{Incoming, Transport};
use crate::config::{Group, Mode, ParamStore};
use crate::protocol::locator::{Locator, LocatorKind};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Mutex;

/// TCP config group snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    pub mode: Mode,
    pub port: u16,
    /// Remote server to dial (client role) as "host:port".
    pub server: Option<String>,
    /// Address advertised to peers (NAT'd deployments).
    pub public: Option<String>,
}

impl TcpConfig {
    #[must_use]
    pub fn from_config(store: &ParamStore) -> Self {
        TcpConfig {
            mode: store.get_mode(Group::Tcp, "MODE").unwrap_or(Mode::Disabled),
            port: store
                .get_num(Group::Tcp, "PORT")
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(7400),
            server: store
                .get_str(Group::Tcp, "SERVER")
                .filter(|s| !s.is_empty()),
            public: store
                .get_str(Group::Tcp, "PUBLIC")
                .filter(|s| !s.is_empty()),
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.mode != Mode::Disabled
    }
}

/// Stream transport: one listener plus per-peer connections.
pub struct TcpTransport {
    listener: TcpListener,
    connections: Mutex<HashMap<SocketAddr, TcpStream>>,
    local_ip: Ipv4Addr,
}

impl TcpTransport {
    /// Bind the listener (server role). Fails when the config disables TCP.
    pub fn bind(config: &TcpConfig, local_ip: Ipv4Addr) -> std::io::Result<Self> {
        if !config.enabled() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "TCP transport disabled by config",
            ));
        }
        let listener = TcpListener::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            config.port,
        ))?;
        listener.set_nonblocking(true)?;
        log::info!("[Tcp] listening on {}", listener.local_addr()?);
        Ok(TcpTransport {
            listener,
            connections: Mutex::new(HashMap::new()),
            local_ip,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, TcpStream>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accept pending connections (dispatcher readiness path).
    pub fn accept_pending(&self) -> std::io::Result<usize> {
        let mut accepted = 0;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nodelay(true)?;
                    stream.set_nonblocking(true)?;
                    log::debug!("[Tcp] accepted {}", peer);
                    self.lock().insert(peer, stream);
                    accepted += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(accepted),
                Err(e) => return Err(e),
            }
        }
    }

    fn connect(&self, addr: SocketAddr) -> std::io::Result<()> {
        if self.lock().contains_key(&addr) {
            return Ok(());
        }
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        self.lock().insert(addr, stream);
        Ok(())
    }

    /// Read every complete frame currently buffered on one peer stream.
    pub fn drain_peer(
        &self,
        peer: SocketAddr,
        mut handle: impl FnMut(Incoming),
    ) -> std::io::Result<usize> {
        let mut connections = self.lock();
        let Some(stream) = connections.get_mut(&peer) else {
            return Ok(0);
        };
        let mut count = 0;
        loop {
            let mut len_buf = [0u8; 4];
            match stream.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(count),
                Err(e) => {
                    connections.remove(&peer);
                    return Err(e);
                }
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > 1 << 24 {
                connections.remove(&peer);
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "oversized TCP frame",
                ));
            }
            let mut data = vec![0u8; len];
            stream.read_exact(&mut data)?;
            count += 1;
            handle(Incoming { data, source: peer });
        }
    }

    #[must_use]
    pub fn listener_socket(&self) -> &TcpListener {
        &self.listener
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }
}

impl Transport for TcpTransport {
    fn send_to(&self, data: &[u8], locator: &Locator) -> std::io::Result<()> {
        let Some(addr) = locator.to_socket_addr() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "locator is not addressable",
            ));
        };
        self.connect(addr)?;
        let mut connections = self.lock();
        let Some(stream) = connections.get_mut(&addr) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection vanished",
            ));
        };
        stream.write_all(&(data.len() as u32).to_le_bytes())?;
        stream.write_all(data)?;
        Ok(())
    }

    fn listen_locators(&self) -> Vec<Locator> {
        let port = self
            .listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or_default();
        vec![Locator {
            kind: LocatorKind::Tcpv4,
            port: u32::from(port),
            address: Locator::udpv4(self.local_ip, port).address,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config(port: u16) -> TcpConfig {
        TcpConfig {
            mode: Mode::Enabled,
            port,
            server: None,
            public: None,
        }
    }

    #[test]
    fn test_disabled_by_default() {
        let store = ParamStore::new();
        let config = TcpConfig::from_config(&store);
        assert!(!config.enabled());
        assert!(TcpTransport::bind(&config, Ipv4Addr::LOCALHOST).is_err());
    }

    #[test]
    fn test_frame_roundtrip() {
        let server =
            TcpTransport::bind(&enabled_config(0), Ipv4Addr::LOCALHOST).expect("bind server");
        let server_port = server
            .listener_socket()
            .local_addr()
            .expect("local addr")
            .port();

        let client =
            TcpTransport::bind(&enabled_config(0), Ipv4Addr::LOCALHOST).expect("bind client");
        let target = Locator {
            kind: LocatorKind::Tcpv4,
            port: u32::from(server_port),
            address: Locator::udpv4(Ipv4Addr::LOCALHOST, server_port).address,
        };

        let payload = b"framed rtps message";
        client.send_to(payload, &target).expect("send");

        // accept, then read the frame
        let mut got = Vec::new();
        for _ in 0..100 {
            let _ = server.accept_pending().expect("accept");
            let peers: Vec<SocketAddr> = {
                server.lock().keys().copied().collect()
            };
            for peer in peers {
                let _ = server.drain_peer(peer, |incoming| got.push(incoming.data));
            }
            if !got.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], payload);
    }

    #[test]
    fn test_config_from_store() {
        let store = ParamStore::new();
        store.set_text(Group::Tcp, "MODE", "ENABLED");
        store.set_text(Group::Tcp, "PORT", "9310");
        store.set_text(Group::Tcp, "SERVER", "relay.example:9310");
        let config = TcpConfig::from_config(&store);
        assert!(config.enabled());
        assert_eq!(config.port, 9310);
        assert_eq!(config.server.as_deref(), Some("relay.example:9310"));
    }
}
