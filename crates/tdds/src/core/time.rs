// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS time representation (DDS-RTPS v2.5 Sec.8.3.3.2).
//!
//! `Time` is seconds + 2^-32 fraction, the wire format used by INFO_TS and
//! the source timestamps carried with cache changes. `Duration` shares the
//! layout and adds the DDS sentinel values (infinite, zero).

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds + 2^-32 fraction timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time {
    pub seconds: i32,
    pub fraction: u32,
}

/// TIME_INVALID sentinel (RTPS: seconds = -1, fraction = 0xffffffff).
pub const TIME_INVALID: Time = Time {
    seconds: -1,
    fraction: 0xffff_ffff,
};

impl Time {
    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Time::from_nanos(since_epoch.as_nanos() as u64)
    }

    /// Build from nanoseconds since the Unix epoch.
    #[must_use]
    pub fn from_nanos(nanos: u64) -> Self {
        let seconds = (nanos / 1_000_000_000) as i32;
        let remainder = nanos % 1_000_000_000;
        // fraction = remainder * 2^32 / 10^9
        let fraction = ((remainder << 32) / 1_000_000_000) as u32;
        Time { seconds, fraction }
    }

    /// Convert back to nanoseconds since the Unix epoch.
    #[must_use]
    pub fn to_nanos(&self) -> u64 {
        let secs = self.seconds.max(0) as u64 * 1_000_000_000;
        let frac = (u64::from(self.fraction) * 1_000_000_000) >> 32;
        secs + frac
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        *self != TIME_INVALID
    }
}

/// DDS duration with the same wire layout as `Time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    pub seconds: i32,
    pub fraction: u32,
}

/// DURATION_INFINITE sentinel.
pub const DURATION_INFINITE: Duration = Duration {
    seconds: 0x7fff_ffff,
    fraction: 0xffff_ffff,
};

/// DURATION_ZERO.
pub const DURATION_ZERO: Duration = Duration {
    seconds: 0,
    fraction: 0,
};

impl Duration {
    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        let seconds = (ms / 1000) as i32;
        let fraction = (((ms % 1000) << 32) / 1000) as u32;
        Duration { seconds, fraction }
    }

    #[must_use]
    pub fn from_secs(secs: u32) -> Self {
        Duration {
            seconds: secs as i32,
            fraction: 0,
        }
    }

    #[must_use]
    pub fn to_millis(&self) -> u64 {
        if self.is_infinite() {
            return u64::MAX;
        }
        let secs_ms = self.seconds.max(0) as u64 * 1000;
        let frac_ms = (u64::from(self.fraction) * 1000) >> 32;
        secs_ms + frac_ms
    }

    #[must_use]
    pub fn is_infinite(&self) -> bool {
        *self == DURATION_INFINITE
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.fraction == 0
    }

    /// Convert to `std::time::Duration`, clamping the infinite sentinel.
    #[must_use]
    pub fn to_std(&self) -> std::time::Duration {
        if self.is_infinite() {
            std::time::Duration::from_secs(u64::from(u32::MAX))
        } else {
            std::time::Duration::from_millis(self.to_millis())
        }
    }
}

impl Default for Duration {
    fn default() -> Self {
        DURATION_INFINITE
    }
}

/// Nanosecond timestamp pair kept with every cache change: when the sample
/// was produced and when it arrived locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub source: Time,
    pub arrival: Time,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_nanos_roundtrip() {
        let t = Time::from_nanos(1_700_000_123_456_789_000);
        let back = t.to_nanos();
        // fraction conversion loses < 1 ns
        assert!(back.abs_diff(1_700_000_123_456_789_000) <= 1);
    }

    #[test]
    fn test_duration_millis_roundtrip() {
        let d = Duration::from_millis(1250);
        assert_eq!(d.seconds, 1);
        assert_eq!(d.to_millis(), 1250);
    }

    #[test]
    fn test_duration_sentinels() {
        assert!(DURATION_INFINITE.is_infinite());
        assert!(DURATION_ZERO.is_zero());
        assert!(!Duration::from_millis(1).is_zero());
    }

    #[test]
    fn test_time_ordering() {
        let a = Time::from_nanos(1_000);
        let b = Time::from_nanos(2_000_000_000);
        assert!(a < b);
    }
}
