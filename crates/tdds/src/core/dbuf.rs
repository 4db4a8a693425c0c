// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference-counted chained data buffers.
//!
//! Received packets travel the stack as segment chains: the receive path
//! fills pool segments, and every cache or proxy that needs to keep the
//! payload holds a clone of the chain head. The segments return to their
//! pool when the last reference drops; nothing copies into application
//! memory until `read`/`take`.

use std::sync::{Arc, Mutex, Weak};

/// Segment payload size for pooled buffers.
pub const SEGMENT_SIZE: usize = 2048;

struct SegmentStore {
    free: Mutex<Vec<Vec<u8>>>,
    max_retained: usize,
}

/// Pool of fixed-size byte segments backing `DbChain`s.
pub struct DataBufferPool {
    store: Arc<SegmentStore>,
}

impl DataBufferPool {
    #[must_use]
    pub fn new(reserved: usize, max_retained: usize) -> Self {
        let mut free = Vec::with_capacity(reserved);
        for _ in 0..reserved {
            free.push(vec![0u8; SEGMENT_SIZE]);
        }
        DataBufferPool {
            store: Arc::new(SegmentStore {
                free: Mutex::new(free),
                max_retained,
            }),
        }
    }

    fn take_segment(&self) -> Vec<u8> {
        let mut free = match self.store.free.lock() {
            Ok(lock) => lock,
            Err(e) => e.into_inner(),
        };
        free.pop().unwrap_or_else(|| vec![0u8; SEGMENT_SIZE])
    }

    /// Allocate a chain holding at least `n` bytes.
    ///
    /// With `linear` set the chain is a single segment of exactly `n`
    /// capacity (heap-allocated when `n` exceeds the pooled segment size);
    /// otherwise the chain is built from pooled segments.
    #[must_use]
    pub fn alloc_data(&self, n: usize, linear: bool) -> DbChain {
        let segments = if linear {
            if n <= SEGMENT_SIZE {
                vec![self.take_segment()]
            } else {
                vec![vec![0u8; n]]
            }
        } else {
            let count = n.div_ceil(SEGMENT_SIZE).max(1);
            (0..count).map(|_| self.take_segment()).collect()
        };

        DbChain {
            inner: Arc::new(ChainInner {
                segments,
                len: n,
                pool: Arc::downgrade(&self.store),
            }),
        }
    }

    /// Number of segments currently free in the pool.
    #[must_use]
    pub fn free_segments(&self) -> usize {
        match self.store.free.lock() {
            Ok(lock) => lock.len(),
            Err(e) => e.into_inner().len(),
        }
    }
}

struct ChainInner {
    segments: Vec<Vec<u8>>,
    len: usize,
    pool: Weak<SegmentStore>,
}

impl Drop for ChainInner {
    fn drop(&mut self) {
        let Some(store) = self.pool.upgrade() else {
            return;
        };
        let mut free = match store.free.lock() {
            Ok(lock) => lock,
            Err(e) => e.into_inner(),
        };
        for seg in self.segments.drain(..) {
            if seg.len() == SEGMENT_SIZE && free.len() < store.max_retained {
                free.push(seg);
            }
        }
    }
}

/// A refcounted chain of byte segments with a logical length.
///
/// Cloning is cheap (refcount bump); the chain is immutable after
/// publication and the segments go back to the pool on the last drop.
#[derive(Clone)]
pub struct DbChain {
    inner: Arc<ChainInner>,
}

impl DbChain {
    /// Build a single-owner chain from an existing byte vector (no pool).
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        DbChain {
            inner: Arc::new(ChainInner {
                segments: vec![data],
                len,
                pool: Weak::new(),
            }),
        }
    }

    /// Logical payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Number of outstanding references to this chain.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Copy `src` into the chain starting at `offset`.
    ///
    /// Returns the number of bytes written (clipped to the chain length).
    /// Only valid before the chain is shared; panics in debug builds if the
    /// chain already has other references.
    pub fn put_data(&mut self, offset: usize, src: &[u8]) -> usize {
        debug_assert_eq!(self.ref_count(), 1, "put_data on a shared chain");
        let Some(inner) = Arc::get_mut(&mut self.inner) else {
            return 0;
        };
        let mut written = 0usize;
        let mut pos = 0usize;
        let limit = inner.len;
        for seg in inner.segments.iter_mut() {
            let seg_len = seg.len();
            let seg_end = pos + seg_len;
            if seg_end > offset && written < src.len() {
                let start_in_seg = offset.saturating_sub(pos).min(seg_len);
                let avail = seg_len - start_in_seg;
                let remaining_chain = limit.saturating_sub(offset + written);
                let n = avail.min(src.len() - written).min(remaining_chain);
                seg[start_in_seg..start_in_seg + n].copy_from_slice(&src[written..written + n]);
                written += n;
            }
            pos = seg_end;
            if written == src.len() {
                break;
            }
        }
        written
    }

    /// Copy from the chain starting at `offset` into `dst`.
    ///
    /// Returns the number of bytes read.
    pub fn get_data(&self, offset: usize, dst: &mut [u8]) -> usize {
        let mut read = 0usize;
        let mut pos = 0usize;
        let limit = self.inner.len;
        for seg in &self.inner.segments {
            let seg_len = seg.len();
            let seg_end = pos + seg_len;
            if seg_end > offset && read < dst.len() {
                let start_in_seg = offset.saturating_sub(pos).min(seg_len);
                let avail = seg_len - start_in_seg;
                let remaining_chain = limit.saturating_sub(offset + read);
                let n = avail.min(dst.len() - read).min(remaining_chain);
                dst[read..read + n].copy_from_slice(&seg[start_in_seg..start_in_seg + n]);
                read += n;
            }
            pos = seg_end;
            if read == dst.len() {
                break;
            }
        }
        read
    }

    /// Collect the whole payload into one vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.inner.len];
        let n = self.get_data(0, &mut out);
        out.truncate(n);
        out
    }
}

impl std::fmt::Debug for DbChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbChain")
            .field("len", &self.inner.len)
            .field("segments", &self.inner.segments.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}
