// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named parameter store.
//!
//! All runtime tunables live here, grouped as COMMON/POOL/RTPS/IP/IPV6/UDP/
//! TCP. Values come from, in order of increasing precedence:
//!
//! 1. `/etc/tdds.conf`
//! 2. `~/.tddsconf`
//! 3. `./tdds.conf`
//! 4. the file named by `$TDDS_CONFIG`
//! 5. environment variables `TDDS_[GROUP_]NAME` (COMMON drops the group)
//!
//! File syntax is `[GROUP]` section headers, `NAME = VALUE` lines and `#`
//! comments. Four value kinds exist: string, number, range (`lo..hi`) and
//! mode (`DISABLED|ENABLED|PREFERRED`).
//!
//! Setters that change a value invoke the registered notification callbacks
//! on the caller's thread *after* releasing the store lock, so the RTPS and
//! IP layers can reconfigure live without deadlocking.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Parameter group. COMMON parameters have no group prefix in env vars or
/// config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Common,
    Pool,
    Rtps,
    Ip,
    Ipv6,
    Udp,
    Tcp,
}

impl Group {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Group::Common => "COMMON",
            Group::Pool => "POOL",
            Group::Rtps => "RTPS",
            Group::Ip => "IP",
            Group::Ipv6 => "IPV6",
            Group::Udp => "UDP",
            Group::Tcp => "TCP",
        }
    }

    fn from_name(s: &str) -> Option<Group> {
        match s.to_ascii_uppercase().as_str() {
            "COMMON" => Some(Group::Common),
            "POOL" => Some(Group::Pool),
            "RTPS" => Some(Group::Rtps),
            "IP" => Some(Group::Ip),
            "IPV6" => Some(Group::Ipv6),
            "UDP" => Some(Group::Udp),
            "TCP" => Some(Group::Tcp),
            _ => None,
        }
    }
}

/// Three-valued transport/feature mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Disabled,
    #[default]
    Enabled,
    Preferred,
}

impl Mode {
    fn parse(s: &str) -> Option<Mode> {
        match s.to_ascii_uppercase().as_str() {
            "DISABLED" => Some(Mode::Disabled),
            "ENABLED" => Some(Mode::Enabled),
            "PREFERRED" => Some(Mode::Preferred),
            _ => None,
        }
    }
}

/// A parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Num(i64),
    Range(i64, i64),
    Mode(Mode),
}

impl Value {
    /// Parse text into the same kind as `like`.
    fn parse_as(like: &Value, text: &str) -> Option<Value> {
        match like {
            Value::Str(_) => Some(Value::Str(text.to_string())),
            Value::Num(_) => parse_number(text).map(Value::Num),
            Value::Range(_, _) => {
                let (lo, hi) = text.split_once("..")?;
                Some(Value::Range(
                    parse_number(lo.trim())?,
                    parse_number(hi.trim())?,
                ))
            }
            Value::Mode(_) => Mode::parse(text).map(Value::Mode),
        }
    }
}

/// Numbers accept an optional `k`/`m` suffix (1024-based).
fn parse_number(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (body, mult) = match s.as_bytes()[s.len() - 1] {
        b'k' | b'K' => (&s[..s.len() - 1], 1024),
        b'm' | b'M' => (&s[..s.len() - 1], 1024 * 1024),
        _ => (s, 1),
    };
    body.parse::<i64>().ok().map(|n| n * mult)
}

/// Fully qualified parameter key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamKey {
    pub group: Group,
    pub name: &'static str,
}

struct ParamEntry {
    default: Value,
    value: Option<Value>,
}

/// Change-notification callback: receives the key and the new value.
pub type NotifyFn = Arc<dyn Fn(&ParamKey, &Value) + Send + Sync>;

/// The store itself. One per runtime.
pub struct ParamStore {
    params: RwLock<HashMap<ParamKey, ParamEntry>>,
    observers: RwLock<Vec<NotifyFn>>,
}

macro_rules! def_params {
    ($map:ident, $group:expr, [ $( ($name:literal, $default:expr) ),* $(,)? ]) => {
        $(
            $map.insert(
                ParamKey { group: $group, name: $name },
                ParamEntry { default: $default, value: None },
            );
        )*
    };
}

impl ParamStore {
    /// Create a store populated with the closed parameter set and built-in
    /// defaults. Nothing is read from the environment yet; call `load`.
    #[must_use]
    pub fn new() -> Self {
        use Value::{Mode as M, Num, Range, Str};
        let mut map = HashMap::new();

        def_params!(map, Group::Common, [
            ("NAME", Str(String::new())),
            ("ENVIRONMENT", Str(String::new())),
            ("PURGE_DELAY", Num(50)),
            ("MAX_SAMPLE", Num(65536)),
            ("FORWARD", Num(0)),
            ("LOG_DIR", Str(String::new())),
        ]);

        // POOL group: reserve/extra per pool class, plus growth percentage.
        def_params!(map, Group::Pool, [
            ("DOMAINS", Range(4, 4)),
            ("SUBSCRIBERS", Range(8, i64::MAX)),
            ("PUBLISHERS", Range(8, i64::MAX)),
            ("READERS", Range(16, i64::MAX)),
            ("WRITERS", Range(16, i64::MAX)),
            ("TOPICS", Range(16, i64::MAX)),
            ("FILTERED", Range(8, i64::MAX)),
            ("TYPES", Range(16, i64::MAX)),
            ("RPROXIES", Range(32, i64::MAX)),
            ("WPROXIES", Range(32, i64::MAX)),
            ("RPARTICIPANTS", Range(16, i64::MAX)),
            ("RREADERS", Range(32, i64::MAX)),
            ("RWRITERS", Range(32, i64::MAX)),
            ("POOL_DATA", Range(16384, i64::MAX)),
            ("RX_BUFFERS", Range(64, i64::MAX)),
            ("CHANGES", Range(128, i64::MAX)),
            ("INSTANCES", Range(128, i64::MAX)),
            ("SAMPLES", Range(256, i64::MAX)),
            ("CACHE_XFER", Range(32, i64::MAX)),
            ("CACHE_WAIT", Range(16, i64::MAX)),
            ("TIME_FILTERS", Range(8, i64::MAX)),
            ("TIME_INSTS", Range(16, i64::MAX)),
            ("STRINGS", Range(256, i64::MAX)),
            ("STRING_DATA", Range(16384, i64::MAX)),
            ("LOCATORS", Range(64, i64::MAX)),
            ("QOS", Range(32, i64::MAX)),
            ("LISTS", Range(64, i64::MAX)),
            ("LIST_NODES", Range(512, i64::MAX)),
            ("TIMERS", Range(32, i64::MAX)),
            ("WAITSETS", Range(8, i64::MAX)),
            ("STATUSCONDS", Range(16, i64::MAX)),
            ("READCONDS", Range(16, i64::MAX)),
            ("QUERYCONDS", Range(8, i64::MAX)),
            ("GUARDCONDS", Range(8, i64::MAX)),
            ("NOTIFICATIONS", Range(16, i64::MAX)),
            ("TOPIC_WAITING", Range(8, i64::MAX)),
            ("GUARDS", Range(16, i64::MAX)),
            ("DYN_TYPES", Range(16, i64::MAX)),
            ("DYN_SAMPLES", Range(32, i64::MAX)),
            ("GROWTH", Num(25)),
        ]);

        def_params!(map, Group::Rtps, [
            ("MODE", M(Mode::Enabled)),
            ("SL_RETRIES", Num(4)),
            ("RESEND_TIME", Num(30_000)),
            ("HB_TIME", Num(100)),
            ("NACK_RESP_TIME", Num(10)),
            ("NACK_SUPP_TIME", Num(0)),
            ("LEASE_TIME", Num(90_000)),
            ("HB_RESP_TIME", Num(5)),
            ("HB_SUPP_TIME", Num(25)),
            ("MSG_SIZE", Num(1452)),
            ("FRAG_SIZE", Num(1344)),
            ("FRAG_BURST", Num(16)),
            ("FRAG_DELAY", Num(0)),
        ]);

        for group in [Group::Ip, Group::Ipv6] {
            def_params!(map, group, [
                ("SOCKETS", Num(16)),
                ("MODE", M(if group == Group::Ip { Mode::Preferred } else { Mode::Enabled })),
                ("SCOPE", Range(0, 15)),
                ("INTF", Str(String::new())),
                ("ADDRESS", Str(String::new())),
                ("NETWORK", Str(String::new())),
                ("NO_MCAST", Num(0)),
                ("MCAST_DEST", Str(String::new())),
                ("MCAST_SRC", Str(String::new())),
                ("MCAST_INTF", Str(String::new())),
                ("GROUP", Str(String::new())),
            ]);
        }
        map.insert(
            ParamKey { group: Group::Ip, name: "MCAST_TTL" },
            ParamEntry { default: Num(1), value: None },
        );
        map.insert(
            ParamKey { group: Group::Ipv6, name: "MCAST_HOPS" },
            ParamEntry { default: Num(1), value: None },
        );

        for group in [Group::Udp, Group::Tcp] {
            def_params!(map, group, [
                ("MODE", M(if group == Group::Udp { Mode::Preferred } else { Mode::Disabled })),
                ("PB", Num(7400)),
                ("DG", Num(250)),
                ("PG", Num(2)),
                ("D0", Num(0)),
                ("D1", Num(10)),
                ("D2", Num(1)),
                ("D3", Num(11)),
            ]);
        }

        def_params!(map, Group::Tcp, [
            ("PORT", Num(7400)),
            ("SERVER", Str(String::new())),
            ("PUBLIC", Str(String::new())),
            ("PRIVATE", Num(0)),
            ("SEC_PORT", Num(0)),
            ("SEC_SERVER", Str(String::new())),
        ]);

        ParamStore {
            params: RwLock::new(map),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Load values from config files and the environment, lowest precedence
    /// first so later sources override earlier ones.
    pub fn load(&self) {
        if let Some(home) = std::env::var_os("HOME") {
            let home_conf = Path::new(&home).join(".tddsconf");
            self.load_file(Path::new("/etc/tdds.conf"));
            self.load_file(&home_conf);
        } else {
            self.load_file(Path::new("/etc/tdds.conf"));
        }
        self.load_file(Path::new("./tdds.conf"));
        if let Ok(explicit) = std::env::var("TDDS_CONFIG") {
            self.load_file(Path::new(&explicit));
        }
        self.load_env();
    }

    /// Parse one config file. Missing files are silently skipped.
    pub fn load_file(&self, path: &Path) {
        let Ok(text) = std::fs::read_to_string(path) else {
            return;
        };
        log::debug!("[Config] loading {}", path.display());

        let mut group = Group::Common;
        for raw_line in text.lines() {
            let line = match raw_line.split_once('#') {
                Some((before, _)) => before.trim(),
                None => raw_line.trim(),
            };
            if line.is_empty() {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                match Group::from_name(section.trim()) {
                    Some(g) => group = g,
                    None => log::warn!("[Config] {}: unknown group [{}]", path.display(), section),
                }
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                log::warn!("[Config] {}: malformed line '{}'", path.display(), line);
                continue;
            };
            let name = name.trim().to_ascii_uppercase();
            if !self.set_text(group, &name, value.trim()) {
                log::warn!(
                    "[Config] {}: unknown or invalid parameter {}_{}",
                    path.display(),
                    group.name(),
                    name
                );
            }
        }
    }

    /// Scan `TDDS_*` environment variables over the known parameter set.
    pub fn load_env(&self) {
        let keys: Vec<ParamKey> = self.params.read().keys().cloned().collect();
        for key in keys {
            let env_name = if key.group == Group::Common {
                format!("TDDS_{}", key.name)
            } else {
                format!("TDDS_{}_{}", key.group.name(), key.name)
            };
            if let Ok(text) = std::env::var(&env_name) {
                self.set_text(key.group, key.name, &text);
            }
        }
    }

    /// Set a parameter from text; returns false for unknown names or
    /// unparseable values. Fires notifications when the value changes.
    pub fn set_text(&self, group: Group, name: &str, text: &str) -> bool {
        let (key, new_value) = {
            let params = self.params.read();
            let Some((key, entry)) = params.get_key_value(&lookup_key(group, name)) else {
                return false;
            };
            let Some(parsed) = Value::parse_as(&entry.default, text) else {
                return false;
            };
            (key.clone(), parsed)
        };
        self.set(key, new_value);
        true
    }

    /// Set a parameter to an explicit value, firing notifications on change.
    pub fn set(&self, key: ParamKey, value: Value) {
        let changed = {
            let mut params = self.params.write();
            match params.get_mut(&key) {
                Some(entry) => {
                    let current = entry.value.as_ref().unwrap_or(&entry.default);
                    if *current == value {
                        false
                    } else {
                        entry.value = Some(value.clone());
                        true
                    }
                }
                None => false,
            }
        };
        // lock released before observers run
        if changed {
            let observers = self.observers.read().clone();
            for notify in observers {
                notify(&key, &value);
            }
        }
    }

    /// Current value (set or default).
    #[must_use]
    pub fn get(&self, group: Group, name: &str) -> Option<Value> {
        let params = self.params.read();
        params
            .get(&lookup_key(group, name))
            .map(|e| e.value.clone().unwrap_or_else(|| e.default.clone()))
    }

    /// Numeric accessor with fallback to the default kind.
    #[must_use]
    pub fn get_num(&self, group: Group, name: &str) -> Option<i64> {
        match self.get(group, name)? {
            Value::Num(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_str(&self, group: Group, name: &str) -> Option<String> {
        match self.get(group, name)? {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_mode(&self, group: Group, name: &str) -> Option<Mode> {
        match self.get(group, name)? {
            Value::Mode(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_range(&self, group: Group, name: &str) -> Option<(i64, i64)> {
        match self.get(group, name)? {
            Value::Range(lo, hi) => Some((lo, hi)),
            _ => None,
        }
    }

    /// Register a change-notification callback.
    pub fn notify(&self, callback: NotifyFn) {
        self.observers.write().push(callback);
    }
}

/// Build a key for map lookup. The map's keys use `&'static str` names; the
/// lookup leaks nothing because `HashMap::get` hashes by value.
fn lookup_key(group: Group, name: &str) -> ParamKey {
    // known parameter names are interned in the table below; unknown names
    // fall through to a miss
    static NAMES: &[&str] = &[
        "NAME", "ENVIRONMENT", "PURGE_DELAY", "MAX_SAMPLE", "FORWARD", "LOG_DIR", "DOMAINS",
        "SUBSCRIBERS", "PUBLISHERS", "READERS", "WRITERS", "TOPICS", "FILTERED", "TYPES",
        "RPROXIES", "WPROXIES", "RPARTICIPANTS", "RREADERS", "RWRITERS", "POOL_DATA", "RX_BUFFERS",
        "CHANGES", "INSTANCES", "SAMPLES", "CACHE_XFER", "CACHE_WAIT", "TIME_FILTERS",
        "TIME_INSTS", "STRINGS", "STRING_DATA", "LOCATORS", "QOS", "LISTS", "LIST_NODES",
        "TIMERS", "WAITSETS", "STATUSCONDS", "READCONDS", "QUERYCONDS", "GUARDCONDS",
        "NOTIFICATIONS", "TOPIC_WAITING", "GUARDS", "DYN_TYPES", "DYN_SAMPLES", "GROWTH", "MODE",
        "SL_RETRIES", "RESEND_TIME", "HB_TIME", "NACK_RESP_TIME", "NACK_SUPP_TIME", "LEASE_TIME",
        "HB_RESP_TIME", "HB_SUPP_TIME", "MSG_SIZE", "FRAG_SIZE", "FRAG_BURST", "FRAG_DELAY",
        "SOCKETS", "SCOPE", "INTF", "ADDRESS", "NETWORK", "NO_MCAST", "MCAST_TTL", "MCAST_HOPS",
        "MCAST_DEST", "MCAST_SRC", "MCAST_INTF", "GROUP", "PB", "DG", "PG", "D0", "D1", "D2",
        "D3", "PORT", "SERVER", "PUBLIC", "PRIVATE", "SEC_PORT", "SEC_SERVER",
    ];
    let interned = NAMES
        .iter()
        .find(|n| n.eq_ignore_ascii_case(name))
        .copied()
        .unwrap_or("");
    ParamKey {
        group,
        name: interned,
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults_present() {
        let store = ParamStore::new();
        assert_eq!(store.get_num(Group::Common, "PURGE_DELAY"), Some(50));
        assert_eq!(store.get_num(Group::Rtps, "HB_TIME"), Some(100));
        assert_eq!(store.get_mode(Group::Udp, "MODE"), Some(Mode::Preferred));
        assert_eq!(store.get_mode(Group::Tcp, "MODE"), Some(Mode::Disabled));
        assert_eq!(store.get_range(Group::Ip, "SCOPE"), Some((0, 15)));
    }

    #[test]
    fn test_set_text_parses_by_kind() {
        let store = ParamStore::new();
        assert!(store.set_text(Group::Rtps, "HB_TIME", "250"));
        assert_eq!(store.get_num(Group::Rtps, "HB_TIME"), Some(250));

        assert!(store.set_text(Group::Ip, "SCOPE", "2..8"));
        assert_eq!(store.get_range(Group::Ip, "SCOPE"), Some((2, 8)));

        assert!(store.set_text(Group::Tcp, "MODE", "enabled"));
        assert_eq!(store.get_mode(Group::Tcp, "MODE"), Some(Mode::Enabled));

        assert!(!store.set_text(Group::Rtps, "HB_TIME", "soon"));
        assert!(!store.set_text(Group::Rtps, "NOT_A_PARAM", "1"));
    }

    #[test]
    fn test_number_suffixes() {
        let store = ParamStore::new();
        assert!(store.set_text(Group::Common, "MAX_SAMPLE", "64k"));
        assert_eq!(store.get_num(Group::Common, "MAX_SAMPLE"), Some(65536));
    }

    #[test]
    fn test_notification_fires_on_change_only() {
        let store = ParamStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        store.notify(Arc::new(move |key, _| {
            assert_eq!(key.name, "HB_TIME");
            c.fetch_add(1, Ordering::SeqCst);
        }));

        store.set_text(Group::Rtps, "HB_TIME", "200");
        store.set_text(Group::Rtps, "HB_TIME", "200"); // unchanged: no notify
        store.set_text(Group::Rtps, "HB_TIME", "300");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_config_file_parsing() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "# tdds test config\nPURGE_DELAY = 75\n[RTPS]\nHB_TIME = 42  # fast\nLEASE_TIME = 10k\n[TCP]\nMODE = PREFERRED\nSERVER = host.example:7400\n"
        )
        .expect("write config");

        let store = ParamStore::new();
        store.load_file(file.path());

        assert_eq!(store.get_num(Group::Common, "PURGE_DELAY"), Some(75));
        assert_eq!(store.get_num(Group::Rtps, "HB_TIME"), Some(42));
        assert_eq!(store.get_num(Group::Rtps, "LEASE_TIME"), Some(10 * 1024));
        assert_eq!(store.get_mode(Group::Tcp, "MODE"), Some(Mode::Preferred));
        assert_eq!(
            store.get_str(Group::Tcp, "SERVER").as_deref(),
            Some("host.example:7400")
        );
    }
}
