// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dynamic interface/address monitor.
//!
//! Periodically enumerates host interfaces, filters them through the IP
//! config group (`INTF` name filter, `ADDRESS` literal filter, `NO_MCAST`)
//! and publishes the resulting locator list through an `ArcSwap` the
//! transport reads lock-free. A change notification fires when the list
//! differs from the previous scan, so SPDP can re-announce with fresh
//! locators.

use crate::config::{Group, ParamStore};
use crate::protocol::locator::Locator;
use arc_swap::ArcSwap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Callback invoked when the locator list changes.
pub type AddressChangeFn = Box<dyn Fn(&[Ipv4Addr]) + Send + Sync>;

/// The monitor. `rescan` is driven from a dispatcher timer.
pub struct DynIpMonitor {
    addresses: ArcSwap<Vec<Ipv4Addr>>,
    intf_filter: Option<String>,
    addr_filter: Option<Ipv4Addr>,
    observers: parking_lot::Mutex<Vec<AddressChangeFn>>,
}

impl DynIpMonitor {
    #[must_use]
    pub fn new(store: &ParamStore) -> Self {
        DynIpMonitor {
            addresses: ArcSwap::from_pointee(Vec::new()),
            intf_filter: store.get_str(Group::Ip, "INTF").filter(|s| !s.is_empty()),
            addr_filter: store
                .get_str(Group::Ip, "ADDRESS")
                .filter(|s| !s.is_empty())
                .and_then(|s| s.parse().ok()),
            observers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Register a change callback.
    pub fn notify(&self, callback: AddressChangeFn) {
        self.observers.lock().push(callback);
    }

    /// Current usable addresses (lock-free snapshot).
    #[must_use]
    pub fn addresses(&self) -> Arc<Vec<Ipv4Addr>> {
        self.addresses.load_full()
    }

    /// The address a participant should advertise, preferring non-loopback.
    #[must_use]
    pub fn primary_address(&self) -> Ipv4Addr {
        self.addresses()
            .iter()
            .copied()
            .find(|a| !a.is_loopback())
            .or_else(|| self.addresses().first().copied())
            .unwrap_or(Ipv4Addr::LOCALHOST)
    }

    /// Enumerate interfaces and apply the config filters. Returns true
    /// when the address list changed.
    pub fn rescan(&self) -> bool {
        let mut found: Vec<Ipv4Addr> = Vec::new();
        match local_ip_address::list_afinet_netifas() {
            Ok(interfaces) => {
                for (name, addr) in interfaces {
                    let IpAddr::V4(v4) = addr else {
                        continue; // IPv6 handled by its own group
                    };
                    if let Some(filter) = &self.intf_filter {
                        if &name != filter {
                            continue;
                        }
                    }
                    if let Some(only) = self.addr_filter {
                        if v4 != only {
                            continue;
                        }
                    }
                    if !found.contains(&v4) {
                        found.push(v4);
                    }
                }
            }
            Err(e) => {
                log::warn!("[DynIp] interface enumeration failed: {}", e);
                return false;
            }
        }
        found.sort();

        let previous = self.addresses.load();
        if **previous == found {
            return false;
        }
        log::info!("[DynIp] address list changed: {:?}", found);
        self.addresses.store(Arc::new(found.clone()));
        let observers = self.observers.lock();
        for notify in observers.iter() {
            notify(&found);
        }
        true
    }

    /// Locators for a given port on every usable address.
    #[must_use]
    pub fn locators_for_port(&self, port: u16) -> Vec<Locator> {
        self.addresses()
            .iter()
            .map(|addr| Locator::udpv4(*addr, port))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_rescan_populates_addresses() {
        let store = ParamStore::new();
        let monitor = DynIpMonitor::new(&store);
        // first scan on any host with at least loopback must change the list
        let changed = monitor.rescan();
        if changed {
            assert!(!monitor.addresses().is_empty());
        }
        // a second identical scan is a no-op
        assert!(!monitor.rescan());
    }

    #[test]
    fn test_change_notification_fires_once() {
        let store = ParamStore::new();
        let monitor = DynIpMonitor::new(&store);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        monitor.notify(Box::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        let first = monitor.rescan();
        let _ = monitor.rescan();
        if first {
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_address_filter_limits_list() {
        let store = ParamStore::new();
        store.set_text(Group::Ip, "ADDRESS", "127.0.0.1");
        let monitor = DynIpMonitor::new(&store);
        let _ = monitor.rescan();
        for addr in monitor.addresses().iter() {
            assert_eq!(*addr, Ipv4Addr::LOCALHOST);
        }
    }

    #[test]
    fn test_primary_address_fallback() {
        let store = ParamStore::new();
        store.set_text(Group::Ip, "ADDRESS", "203.0.113.7"); // TEST-NET: never present
        let monitor = DynIpMonitor::new(&store);
        let _ = monitor.rescan();
        assert_eq!(monitor.primary_address(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_locators_for_port() {
        let store = ParamStore::new();
        let monitor = DynIpMonitor::new(&store);
        let _ = monitor.rescan();
        for loc in monitor.locators_for_port(7411) {
            assert_eq!(loc.port, 7411);
        }
    }
}
