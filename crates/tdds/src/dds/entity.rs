// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity flags, instance handles and the generation-checked handle store.
//!
//! Cross-references between participants, topics and endpoints are handles
//! resolved through a store, not pointers. Deleting a slot bumps its
//! generation, so stale handles surface as `AlreadyDeleted` instead of
//! dangling.

use crate::dds::{Error, Result};
use std::sync::Mutex;

/// Entity flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityFlags(pub u8);

impl EntityFlags {
    pub const LOCAL: u8 = 0x01;
    pub const BUILTIN: u8 = 0x02;
    pub const ENABLED: u8 = 0x04;
    pub const IGNORED: u8 = 0x08;

    #[must_use]
    pub fn local() -> Self {
        EntityFlags(Self::LOCAL)
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0 & Self::LOCAL != 0
    }

    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.0 & Self::BUILTIN != 0
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.0 & Self::ENABLED != 0
    }

    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.0 & Self::IGNORED != 0
    }

    pub fn set_enabled(&mut self) {
        self.0 |= Self::ENABLED;
    }

    pub fn set_ignored(&mut self) {
        self.0 |= Self::IGNORED;
    }

    pub fn set_builtin(&mut self) {
        self.0 |= Self::BUILTIN;
    }
}

/// Opaque entity/instance handle: slot index + generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InstanceHandle {
    pub index: u32,
    pub generation: u32,
}

impl InstanceHandle {
    /// The nil handle.
    pub const NIL: InstanceHandle = InstanceHandle {
        index: u32::MAX,
        generation: 0,
    };

    #[must_use]
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Free { generation: u32, next_free: Option<u32> },
}

/// Generation-checked slot store.
///
/// `get`/`remove` with a stale handle return `AlreadyDeleted`; slots are
/// reused with a bumped generation.
pub struct HandleStore<T> {
    slots: Mutex<StoreInner<T>>,
}

struct StoreInner<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> HandleStore<T> {
    #[must_use]
    pub fn new() -> Self {
        HandleStore {
            slots: Mutex::new(StoreInner {
                slots: Vec::new(),
                free_head: None,
                len: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner<T>> {
        match self.slots.lock() {
            Ok(lock) => lock,
            Err(e) => e.into_inner(),
        }
    }

    /// Insert a value, returning its handle.
    pub fn insert(&self, value: T) -> InstanceHandle {
        let mut inner = self.lock();
        inner.len += 1;
        if let Some(index) = inner.free_head {
            let slot = &mut inner.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Free {
                    generation,
                    next_free,
                } => (*generation + 1, *next_free),
                Slot::Occupied { .. } => unreachable!("free list points at occupied slot"),
            };
            inner.free_head = next_free;
            inner.slots[index as usize] = Slot::Occupied { generation, value };
            InstanceHandle { index, generation }
        } else {
            let index = inner.slots.len() as u32;
            inner.slots.push(Slot::Occupied {
                generation: 1,
                value,
            });
            InstanceHandle {
                index,
                generation: 1,
            }
        }
    }

    /// Resolve a handle through a closure (the value never escapes the
    /// store lock).
    pub fn with<R>(&self, handle: InstanceHandle, f: impl FnOnce(&T) -> R) -> Result<R> {
        let inner = self.lock();
        match inner.slots.get(handle.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == handle.generation => {
                Ok(f(value))
            }
            _ => Err(Error::AlreadyDeleted),
        }
    }

    /// Mutable resolution.
    pub fn with_mut<R>(&self, handle: InstanceHandle, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut inner = self.lock();
        match inner.slots.get_mut(handle.index as usize) {
            Some(Slot::Occupied { generation, value }) if *generation == handle.generation => {
                Ok(f(value))
            }
            _ => Err(Error::AlreadyDeleted),
        }
    }

    /// Remove a slot; the handle is dead afterwards.
    pub fn remove(&self, handle: InstanceHandle) -> Result<T> {
        let mut inner = self.lock();
        let free_head = inner.free_head;
        let slot = inner
            .slots
            .get_mut(handle.index as usize)
            .ok_or(Error::AlreadyDeleted)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {
                let generation = *generation;
                let old = std::mem::replace(
                    slot,
                    Slot::Free {
                        generation,
                        next_free: free_head,
                    },
                );
                inner.free_head = Some(handle.index);
                inner.len -= 1;
                match old {
                    Slot::Occupied { value, .. } => Ok(value),
                    Slot::Free { .. } => unreachable!("matched occupied above"),
                }
            }
            _ => Err(Error::AlreadyDeleted),
        }
    }

    /// Visit every live entry.
    pub fn for_each(&self, mut f: impl FnMut(InstanceHandle, &T)) {
        let inner = self.lock();
        for (index, slot) in inner.slots.iter().enumerate() {
            if let Slot::Occupied { generation, value } = slot {
                f(
                    InstanceHandle {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                );
            }
        }
    }

    /// Handles of every live entry.
    #[must_use]
    pub fn handles(&self) -> Vec<InstanceHandle> {
        let mut out = Vec::new();
        self.for_each(|h, _| out.push(h));
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_resolve_remove() {
        let store: HandleStore<String> = HandleStore::new();
        let h = store.insert("alpha".to_string());
        assert_eq!(store.with(h, |v| v.clone()).expect("resolve"), "alpha");
        assert_eq!(store.remove(h).expect("remove"), "alpha");
        assert!(matches!(store.with(h, |_| ()), Err(Error::AlreadyDeleted)));
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let store: HandleStore<u32> = HandleStore::new();
        let h1 = store.insert(1);
        store.remove(h1).expect("remove");
        let h2 = store.insert(2);
        // same slot, new generation
        assert_eq!(h1.index, h2.index);
        assert_ne!(h1.generation, h2.generation);
        assert!(matches!(store.with(h1, |_| ()), Err(Error::AlreadyDeleted)));
        assert_eq!(store.with(h2, |v| *v).expect("resolve"), 2);
    }

    #[test]
    fn test_for_each_and_len() {
        let store: HandleStore<u32> = HandleStore::new();
        let a = store.insert(10);
        let _b = store.insert(20);
        store.remove(a).expect("remove");
        let mut seen = Vec::new();
        store.for_each(|_, v| seen.push(*v));
        assert_eq!(seen, vec![20]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_flags() {
        let mut flags = EntityFlags::local();
        assert!(flags.is_local());
        assert!(!flags.is_enabled());
        flags.set_enabled();
        assert!(flags.is_enabled());
        flags.set_ignored();
        assert!(flags.is_ignored());
    }
}
