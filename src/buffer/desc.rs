//! Buffer descriptors
//!
//! A buffer is split in two halves with different protection:
//! * `BufMeta` (identity, reference count, recency stamp) lives inside the
//!   bucket that currently owns the buffer and is only touched under that
//!   bucket's lock.
//! * `BufferSlot` (block bytes, valid flag) lives at a fixed index of the
//!   pool and is governed by the slot's content lock.

use crate::infrastructure::lwlock::SleepLock;
use crate::types::{BlockNo, DeviceId, Tick};
use std::sync::atomic::{AtomicBool, Ordering};

/// Block identity: the cache key
pub type BlockKey = (DeviceId, BlockNo);

/// Per-buffer bookkeeping, owned by exactly one bucket at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BufMeta {
    /// Index of the buffer's slot in the pool
    pub slot: usize,
    /// Cached block, None until the buffer is first recycled
    pub identity: Option<BlockKey>,
    /// Number of consumers holding a reference
    pub refcnt: u32,
    /// Tick at which `refcnt` last dropped to zero
    pub last_used: Tick,
}

impl BufMeta {
    /// Creates bookkeeping for a fresh, unused buffer
    pub fn new(slot: usize) -> Self {
        BufMeta {
            slot,
            identity: None,
            refcnt: 0,
            last_used: 0,
        }
    }

    #[inline]
    pub fn is(&self, dev: DeviceId, blockno: BlockNo) -> bool {
        self.identity == Some((dev, blockno))
    }

    /// Returns true if the buffer may be recycled
    #[inline]
    pub fn is_free(&self) -> bool {
        self.refcnt == 0
    }
}

/// Block storage for one buffer
///
/// Aligned to cache line size to prevent false sharing between neighbouring
/// slots' lock words.
#[cfg_attr(any(target_arch = "x86", target_arch = "x86_64"), repr(align(64)))]
#[cfg_attr(any(target_arch = "arm", target_arch = "aarch64"), repr(align(128)))]
pub(crate) struct BufferSlot {
    /// Content lock guarding the block bytes
    pub content: SleepLock<Box<[u8]>>,
    /// Whether `content` reflects the device
    ///
    /// Written by the recycler (under bucket + eviction locks, while no one
    /// can hold `content`) and by `read_through` (under `content`).
    valid: AtomicBool,
}

impl BufferSlot {
    pub fn new(block_size: usize) -> Self {
        BufferSlot {
            content: SleepLock::new(vec![0u8; block_size].into_boxed_slice(), "buffer"),
            valid: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }
}
