//! Bucket table
//!
//! A fixed number of buckets indexed by a hash of the block identity. Every
//! buffer of the pool belongs to exactly one bucket at all times, whether it
//! is referenced or free; there is no separate free list.

use super::desc::BufMeta;
use crate::infrastructure::hash::bucket_index;
use crate::infrastructure::lwlock::SpinLock;
use crate::types::{BlockNo, DeviceId, Tick};
use parking_lot::MutexGuard;

/// One partition of the pool
pub(crate) struct Bucket {
    entries: Vec<BufMeta>,
}

impl Bucket {
    /// Creates an empty bucket sized for its round-robin share of the pool
    fn with_capacity(capacity: usize) -> Self {
        Bucket {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Returns the entry caching (dev, blockno)
    pub fn find_mut(&mut self, dev: DeviceId, blockno: BlockNo) -> Option<&mut BufMeta> {
        self.entries.iter_mut().find(|meta| meta.is(dev, blockno))
    }

    /// Returns the entry for `slot` if it still caches (dev, blockno)
    pub fn find_slot_mut(
        &mut self,
        slot: usize,
        dev: DeviceId,
        blockno: BlockNo,
    ) -> Option<&mut BufMeta> {
        self.entries
            .iter_mut()
            .find(|meta| meta.slot == slot && meta.is(dev, blockno))
    }

    /// Finds the free entry with the smallest `last_used`
    ///
    /// Ties go to the entry that comes first in list order.
    pub fn oldest_free(&self) -> Option<(usize, Tick)> {
        let mut best: Option<(usize, Tick)> = None;
        for (pos, meta) in self.entries.iter().enumerate() {
            if !meta.is_free() {
                continue;
            }
            match best {
                Some((_, tick)) if tick <= meta.last_used => {}
                _ => best = Some((pos, meta.last_used)),
            }
        }
        best
    }

    #[inline]
    pub fn get_mut(&mut self, pos: usize) -> &mut BufMeta {
        &mut self.entries[pos]
    }

    /// Unlinks the entry at `pos`
    #[inline]
    pub fn unlink(&mut self, pos: usize) -> BufMeta {
        self.entries.remove(pos)
    }

    /// Links an entry into this bucket
    #[inline]
    pub fn link(&mut self, meta: BufMeta) {
        self.entries.push(meta);
    }

    pub fn entries(&self) -> &[BufMeta] {
        &self.entries
    }

    #[cfg(test)]
    pub fn reserved(&self) -> usize {
        self.entries.capacity()
    }
}

/// Fixed-size array of locked buckets; never resized
pub(crate) struct BucketTable {
    buckets: Box<[SpinLock<Bucket>]>,
}

impl BucketTable {
    /// Builds `bucket_count` buckets and distributes `pool_size` buffers over
    /// them round-robin (slot i goes to bucket i % bucket_count)
    pub fn new(bucket_count: usize, pool_size: usize) -> Self {
        // Re-homing may grow a bucket past its share; that happens under the
        // eviction lock and only reallocates a small vector
        let share = pool_size / bucket_count + 1;
        let mut buckets: Vec<Bucket> = (0..bucket_count)
            .map(|_| Bucket::with_capacity(share))
            .collect();
        for slot in 0..pool_size {
            buckets[slot % bucket_count].link(BufMeta::new(slot));
        }

        BucketTable {
            buckets: buckets
                .into_iter()
                .map(|bucket| SpinLock::new(bucket, "bcache_bucket"))
                .collect(),
        }
    }

    /// Number of buckets
    #[inline]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket a block identity hashes to
    #[inline]
    pub fn index_of(&self, dev: DeviceId, blockno: BlockNo) -> usize {
        bucket_index(dev, blockno, self.buckets.len())
    }

    /// Locks bucket `index`
    #[inline]
    pub fn lock(&self, index: usize) -> MutexGuard<'_, Bucket> {
        self.buckets[index].lock()
    }

    /// Fast path: takes a reference on (dev, blockno) if it is cached
    ///
    /// Holds only the owning bucket's lock, never the eviction lock.
    pub fn acquire_cached(&self, dev: DeviceId, blockno: BlockNo) -> Option<usize> {
        let mut bucket = self.lock(self.index_of(dev, blockno));
        bucket.find_mut(dev, blockno).map(|meta| {
            meta.refcnt += 1;
            meta.slot
        })
    }
}
