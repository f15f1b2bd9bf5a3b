//! Eviction coordinator
//!
//! Serializes cache-miss handling behind one global lock so that concurrent
//! misses on the same block never recycle two buffers for it, and so that a
//! least-recently-used choice can be made across all buckets without holding
//! every bucket lock at once.
//!
//! Lock order: eviction lock, then bucket locks. During the scan at most two
//! bucket locks are held: the one being inspected and the one retaining the
//! best candidate so far.

use super::bucket::{Bucket, BucketTable};
use super::desc::{BlockKey, BufferSlot};
use super::error::{FatalError, fatal};
use crate::infrastructure::lwlock::SpinLock;
use crate::types::{BlockNo, DeviceId, Tick};
use parking_lot::MutexGuard;

/// Outcome of miss handling; either way the caller owns one reference on `slot`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Another thread cached the block first
    Raced { slot: usize },
    /// A free buffer was re-identified for the block
    Recycled {
        slot: usize,
        previous: Option<BlockKey>,
        /// Bucket the buffer was taken from
        from_bucket: usize,
    },
}

impl Resolution {
    pub fn slot(&self) -> usize {
        match *self {
            Resolution::Raced { slot } | Resolution::Recycled { slot, .. } => slot,
        }
    }
}

/// Best recycling candidate seen so far, with its bucket still locked
struct Candidate<'a> {
    bucket: usize,
    pos: usize,
    last_used: Tick,
    guard: MutexGuard<'a, Bucket>,
}

pub(crate) struct EvictionCoordinator {
    lock: SpinLock<()>,
}

impl EvictionCoordinator {
    pub fn new() -> Self {
        EvictionCoordinator {
            lock: SpinLock::new((), "evict_lock"),
        }
    }

    /// Resolves a miss on (dev, blockno)
    ///
    /// Returns with no lock held. The buffer's identity is set and its
    /// reference count includes the caller; its content lock is not taken.
    ///
    /// # Panics
    /// Aborts with `ResourceExhausted` if every buffer is referenced.
    pub fn resolve_miss(
        &self,
        table: &BucketTable,
        slots: &[BufferSlot],
        dev: DeviceId,
        blockno: BlockNo,
    ) -> Resolution {
        let _evicting = self.lock.lock();
        let target = table.index_of(dev, blockno);

        // A racer may have finished the same miss while we waited
        {
            let mut bucket = table.lock(target);
            if let Some(meta) = bucket.find_mut(dev, blockno) {
                meta.refcnt += 1;
                return Resolution::Raced { slot: meta.slot };
            }
        }

        let Some(candidate) = Self::scan(table) else {
            fatal(FatalError::ResourceExhausted { dev, blockno });
        };

        let Candidate {
            bucket: from_bucket,
            pos,
            mut guard,
            ..
        } = candidate;

        if from_bucket == target {
            // Already home: re-identify in place
            let meta = guard.get_mut(pos);
            let previous = meta.identity.replace((dev, blockno));
            meta.refcnt = 1;
            slots[meta.slot].set_valid(false);
            return Resolution::Recycled {
                slot: meta.slot,
                previous,
                from_bucket,
            };
        }

        let mut meta = guard.unlink(pos);
        drop(guard);

        // Unlinked and unreachable: no one else can observe it until relinked
        let previous = meta.identity.replace((dev, blockno));
        meta.refcnt = 1;
        let slot = meta.slot;
        slots[slot].set_valid(false);
        table.lock(target).link(meta);

        Resolution::Recycled {
            slot,
            previous,
            from_bucket,
        }
    }

    /// Cross-bucket LRU scan, visiting buckets in index order
    ///
    /// The bucket holding the best candidate stays locked so the candidate
    /// cannot be referenced before it is recycled.
    fn scan(table: &BucketTable) -> Option<Candidate<'_>> {
        let mut best: Option<Candidate<'_>> = None;

        for index in 0..table.len() {
            let guard = table.lock(index);
            let Some((pos, last_used)) = guard.oldest_free() else {
                continue;
            };
            let better = match &best {
                Some(current) => last_used < current.last_used,
                None => true,
            };
            if better {
                // Replacing drops the previous candidate's guard
                best = Some(Candidate {
                    bucket: index,
                    pos,
                    last_used,
                    guard,
                });
            }
        }

        best
    }
}
