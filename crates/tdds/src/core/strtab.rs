// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interned, refcounted string table.
//!
//! Topic names, type names and partition names recur constantly across
//! entities and discovery records. Immutable strings entered here are
//! hashed and deduplicated; every caller shares one refcounted allocation.
//! Mutable strings bypass the table and get a unique allocation. Strings
//! longer than the arena threshold are flagged `dynamic` so release
//! accounting stays correct.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Strings at or below this length come from the interning arena; longer
/// ones spill to the process heap and set the `dynamic` flag.
pub const ARENA_STR_MAX: usize = 128;

struct StrEntry {
    text: Box<str>,
    dynamic: bool,
}

/// A shared handle to an interned (or unique) string.
#[derive(Clone)]
pub struct InternedStr {
    entry: Arc<StrEntry>,
}

impl InternedStr {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.entry.text
    }

    /// True when the backing storage came from the heap rather than the
    /// interning arena.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.entry.dynamic
    }

    /// Outstanding references, the table's weak slot included.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.entry)
    }
}

impl std::fmt::Debug for InternedStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for InternedStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for InternedStr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry) || self.as_str() == other.as_str()
    }
}

impl Eq for InternedStr {}

impl std::ops::Deref for InternedStr {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

/// The deduplicating table. One instance per runtime.
pub struct StringTable {
    map: Mutex<HashMap<Box<str>, Weak<StrEntry>>>,
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        StringTable {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Enter a string.
    ///
    /// Immutable strings are deduplicated: a second `str_new` of the same
    /// text returns a handle to the same allocation. Mutable strings always
    /// get a fresh unique allocation and never enter the table.
    pub fn str_new(&self, s: &str, mutable: bool) -> InternedStr {
        let dynamic = s.len() > ARENA_STR_MAX;

        if mutable {
            return InternedStr {
                entry: Arc::new(StrEntry {
                    text: s.into(),
                    dynamic,
                }),
            };
        }

        let mut map = self.map.lock();
        if let Some(weak) = map.get(s) {
            if let Some(entry) = weak.upgrade() {
                return InternedStr { entry };
            }
        }
        let entry = Arc::new(StrEntry {
            text: s.into(),
            dynamic,
        });
        map.insert(s.into(), Arc::downgrade(&entry));
        InternedStr { entry }
    }

    /// Drop table slots whose strings no longer have any live reference.
    pub fn sweep(&self) {
        let mut map = self.map.lock();
        map.retain(|_, weak| weak.strong_count() > 0);
    }

    /// Number of distinct live entries (stale slots included until sweep).
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immutable_dedup() {
        let table = StringTable::new();
        let a = table.str_new("ShapeType", false);
        let b = table.str_new("ShapeType", false);
        assert!(Arc::ptr_eq(&a.entry, &b.entry));
        assert_eq!(a.ref_count(), 2);
    }

    #[test]
    fn test_mutable_is_unique() {
        let table = StringTable::new();
        let a = table.str_new("value", true);
        let b = table.str_new("value", true);
        assert!(!Arc::ptr_eq(&a.entry, &b.entry));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_dynamic_flag_for_long_strings() {
        let table = StringTable::new();
        let long = "x".repeat(ARENA_STR_MAX + 1);
        let s = table.str_new(&long, false);
        assert!(s.is_dynamic());
        assert!(!table.str_new("short", false).is_dynamic());
    }

    #[test]
    fn test_sweep_releases_dead_entries() {
        let table = StringTable::new();
        {
            let _tmp = table.str_new("transient", false);
        }
        assert_eq!(table.len(), 1);
        table.sweep();
        assert_eq!(table.len(), 0);
    }
}
