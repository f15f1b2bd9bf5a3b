//! Buffer cache
//!
//! A fixed pool of block buffers shared by every consumer of the block device.
//! Buffers are partitioned into hash buckets, each guarded by a short spin
//! lock; cache hits touch a single bucket. Misses are resolved by the
//! eviction coordinator, which recycles the least recently used free buffer
//! from anywhere in the pool.
//!
//! Each buffer also carries a blocking content lock. `read_through` returns a
//! [`Buf`] holding it; the lock (and the reference) is given back by
//! [`BufCache::release`] or by dropping the `Buf`.
//!
//! Lock order: eviction lock → bucket lock. Content locks are never acquired
//! while a bucket or eviction lock is held.

mod bucket;
mod desc;
pub mod error;
mod evict;

use crate::device::BlockDevice;
use crate::infrastructure::lwlock::SleepLockGuard;
use crate::types::{BlockNo, CacheConfig, ConfigError, ConfigResult, DeviceId, Tick};
use bucket::BucketTable;
use desc::BufferSlot;
use error::fatal;
use evict::{EvictionCoordinator, Resolution};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use desc::BlockKey;
pub use error::{BufferError, BufferResult, FatalError};

/// Handle naming one resident buffer, used to pin it across release cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    slot: usize,
    dev: DeviceId,
    blockno: BlockNo,
}

impl BlockRef {
    pub fn device(&self) -> DeviceId {
        self.dev
    }

    pub fn block_no(&self) -> BlockNo {
        self.blockno
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fetches satisfied by the bucket fast path
    pub hits: u64,
    /// Fetches that went through miss handling
    pub misses: u64,
    /// Buffers re-identified for a new block
    pub recycles: u64,
    /// Successful device reads
    pub device_reads: u64,
    /// Successful device writes
    pub device_writes: u64,
}

impl CacheStats {
    /// Fraction of fetches served by the fast path
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    recycles: AtomicU64,
    device_reads: AtomicU64,
    device_writes: AtomicU64,
}

impl StatCounters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
            device_reads: self.device_reads.load(Ordering::Relaxed),
            device_writes: self.device_writes.load(Ordering::Relaxed),
        }
    }
}

/// The buffer cache
pub struct BufCache {
    config: CacheConfig,
    /// Block storage, indexed by slot; never grows
    slots: Box<[BufferSlot]>,
    table: BucketTable,
    evictor: EvictionCoordinator,
    /// Logical clock for `last_used` stamps
    clock: AtomicU64,
    device: Arc<dyn BlockDevice>,
    stats: StatCounters,
}

impl BufCache {
    /// Builds the cache: `pool_size` buffers spread over `bucket_count` buckets
    ///
    /// # Arguments
    /// * `config` - Pool geometry; `block_size` must match the device
    /// * `device` - Device used to fill and persist buffers
    pub fn init(config: CacheConfig, device: Arc<dyn BlockDevice>) -> ConfigResult<Self> {
        config.validate()?;
        if device.block_size() != config.block_size {
            return Err(ConfigError::InvalidValue(format!(
                "block_size {} does not match device block size {}",
                config.block_size,
                device.block_size()
            )));
        }

        let slots = (0..config.pool_size)
            .map(|_| BufferSlot::new(config.block_size))
            .collect();
        let table = BucketTable::new(config.bucket_count, config.pool_size);

        log::debug!(
            "bcache: {} buffers of {} bytes in {} buckets",
            config.pool_size,
            config.block_size,
            config.bucket_count
        );

        Ok(BufCache {
            config,
            slots,
            table,
            evictor: EvictionCoordinator::new(),
            clock: AtomicU64::new(0),
            device,
            stats: StatCounters::default(),
        })
    }

    /// Returns a buffer for (dev, blockno) holding its content lock
    ///
    /// The contents may not be loaded yet; see `Buf::is_valid`.
    fn fetch(&self, dev: DeviceId, blockno: BlockNo) -> Buf<'_> {
        let slot = match self.table.acquire_cached(dev, blockno) {
            Some(slot) => {
                StatCounters::bump(&self.stats.hits);
                log::trace!("bcache: hit dev={} blockno={} slot={}", dev, blockno, slot);
                slot
            }
            None => {
                StatCounters::bump(&self.stats.misses);
                let resolution = self
                    .evictor
                    .resolve_miss(&self.table, &self.slots, dev, blockno);
                if let Resolution::Recycled {
                    slot,
                    previous,
                    from_bucket,
                } = resolution
                {
                    StatCounters::bump(&self.stats.recycles);
                    log::debug!(
                        "bcache: recycled slot {} ({:?} from bucket {}) for dev={} blockno={}",
                        slot,
                        previous,
                        from_bucket,
                        dev,
                        blockno
                    );
                }
                resolution.slot()
            }
        };

        // The reference is taken; dropping it on any path below gives it back
        let reference = BufRef {
            cache: self,
            slot,
            dev,
            blockno,
        };

        let lock = &self.slots[slot].content;
        if lock.holding() {
            fatal(FatalError::ProtocolViolation(format!(
                "content lock of dev={} blockno={} is already held by this thread",
                dev, blockno
            )));
        }
        let content = lock.lock();

        Buf { content, reference }
    }

    /// Returns the block (dev, blockno) with its content loaded, holding its content lock
    ///
    /// Reads from the device only if the buffer is not valid. On a device
    /// error the buffer is released and stays invalid.
    pub fn read_through(&self, dev: DeviceId, blockno: BlockNo) -> BufferResult<Buf<'_>> {
        let mut buf = self.fetch(dev, blockno);
        let slot = &self.slots[buf.reference.slot];

        if !slot.is_valid() {
            if let Err(source) = self.device.read_block(dev, blockno, &mut buf.content[..]) {
                log::warn!(
                    "bcache: read of dev={} blockno={} failed: {}",
                    dev,
                    blockno,
                    source
                );
                return Err(BufferError::DeviceIo {
                    dev,
                    blockno,
                    source,
                });
            }
            slot.set_valid(true);
            StatCounters::bump(&self.stats.device_reads);
            log::debug!("bcache: read dev={} blockno={}", dev, blockno);
        }

        Ok(buf)
    }

    /// Writes the buffer's contents to the device
    ///
    /// The caller must hold the buffer's content lock; lock and reference
    /// state are unchanged.
    pub fn persist(&self, buf: &Buf<'_>) -> BufferResult<()> {
        self.check_held(buf, "persist");

        let (dev, blockno) = (buf.device(), buf.block_no());
        self.device
            .write_block(dev, blockno, &buf.content[..])
            .map_err(|source| {
                log::warn!(
                    "bcache: write of dev={} blockno={} failed: {}",
                    dev,
                    blockno,
                    source
                );
                BufferError::DeviceIo {
                    dev,
                    blockno,
                    source,
                }
            })?;

        StatCounters::bump(&self.stats.device_writes);
        log::debug!("bcache: wrote dev={} blockno={}", dev, blockno);
        Ok(())
    }

    /// Releases the content lock and the reference held by `buf`
    ///
    /// When the last reference goes, the buffer is stamped with the current
    /// tick and becomes eligible for recycling.
    pub fn release(&self, buf: Buf<'_>) {
        self.check_held(&buf, "release");
        drop(buf);
    }

    /// Adds a reference to a resident buffer without touching its content lock
    ///
    /// A pinned buffer is never recycled.
    pub fn pin(&self, block: BlockRef) {
        let mut bucket = self.table.lock(self.table.index_of(block.dev, block.blockno));
        match bucket.find_slot_mut(block.slot, block.dev, block.blockno) {
            Some(meta) => meta.refcnt += 1,
            None => {
                fatal(FatalError::ProtocolViolation(format!(
                    "pin of dev={} blockno={} which is no longer cached",
                    block.dev, block.blockno
                )));
            }
        }
    }

    /// Drops a reference taken with `pin`
    pub fn unpin(&self, block: BlockRef) {
        self.put_ref(block.slot, block.dev, block.blockno, "unpin");
    }

    /// Returns a snapshot of the cache counters
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Number of buffers in the pool
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Number of hash buckets
    pub fn bucket_count(&self) -> usize {
        self.table.len()
    }

    /// Block size in bytes
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Bucket a block identity hashes to
    pub fn bucket_of(&self, dev: DeviceId, blockno: BlockNo) -> usize {
        self.table.index_of(dev, blockno)
    }

    /// Returns true if some buffer currently carries (dev, blockno)
    pub fn is_cached(&self, dev: DeviceId, blockno: BlockNo) -> bool {
        let mut bucket = self.table.lock(self.bucket_of(dev, blockno));
        bucket.find_mut(dev, blockno).is_some()
    }

    /// Reference count of the buffer carrying (dev, blockno), if cached
    pub fn ref_count(&self, dev: DeviceId, blockno: BlockNo) -> Option<u32> {
        let mut bucket = self.table.lock(self.bucket_of(dev, blockno));
        bucket.find_mut(dev, blockno).map(|meta| meta.refcnt)
    }

    /// Tick at which the buffer carrying (dev, blockno) last became free, if cached
    pub fn last_used(&self, dev: DeviceId, blockno: BlockNo) -> Option<Tick> {
        let mut bucket = self.table.lock(self.bucket_of(dev, blockno));
        bucket.find_mut(dev, blockno).map(|meta| meta.last_used)
    }

    /// Buckets whose lists contain a buffer carrying (dev, blockno)
    ///
    /// Inspects one bucket at a time, so the answer is only exact while no
    /// miss is being resolved concurrently.
    pub fn buckets_holding(&self, dev: DeviceId, blockno: BlockNo) -> Vec<usize> {
        (0..self.table.len())
            .filter(|&index| {
                self.table
                    .lock(index)
                    .entries()
                    .iter()
                    .any(|meta| meta.is(dev, blockno))
            })
            .collect()
    }

    /// Identities of every buffer that has been assigned a block
    pub fn resident_blocks(&self) -> Vec<BlockKey> {
        let mut blocks: Vec<BlockKey> = (0..self.table.len())
            .flat_map(|index| {
                self.table
                    .lock(index)
                    .entries()
                    .iter()
                    .filter_map(|meta| meta.identity)
                    .collect::<Vec<_>>()
            })
            .collect();
        blocks.sort_unstable();
        blocks
    }

    /// Advances the logical clock
    #[inline]
    fn tick(&self) -> Tick {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Verifies that `buf` belongs to this cache and that the calling thread
    /// holds its content lock
    fn check_held(&self, buf: &Buf<'_>, op: &str) {
        let BufRef {
            cache,
            slot,
            dev,
            blockno,
        } = &buf.reference;
        if !std::ptr::eq(*cache, self) || !self.slots[*slot].content.holding() {
            fatal(FatalError::ProtocolViolation(format!(
                "{} of dev={} blockno={} without holding its content lock",
                op, dev, blockno
            )));
        }
    }

    /// Drops one reference; stamps the buffer when it becomes free
    fn put_ref(&self, slot: usize, dev: DeviceId, blockno: BlockNo, op: &str) {
        let mut bucket = self.table.lock(self.table.index_of(dev, blockno));
        let Some(meta) = bucket.find_slot_mut(slot, dev, blockno) else {
            fatal(FatalError::ProtocolViolation(format!(
                "{} of dev={} blockno={} which is no longer cached",
                op, dev, blockno
            )));
        };
        if meta.refcnt == 0 {
            fatal(FatalError::ProtocolViolation(format!(
                "{} of dev={} blockno={} with no outstanding reference",
                op, dev, blockno
            )));
        }
        meta.refcnt -= 1;
        if meta.refcnt == 0 {
            meta.last_used = self.tick();
        }
    }
}

impl fmt::Debug for BufCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufCache")
            .field("pool_size", &self.config.pool_size)
            .field("bucket_count", &self.table.len())
            .field("block_size", &self.config.block_size)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// One reference on a buffer; dropping it returns the reference
struct BufRef<'a> {
    cache: &'a BufCache,
    slot: usize,
    dev: DeviceId,
    blockno: BlockNo,
}

/// A buffer held by the current thread
///
/// Holds both a reference and the content lock. Dropping it releases the
/// content lock first and then the reference.
pub struct Buf<'a> {
    // Field order is drop order: the content lock must be released before
    // the reference count can drop to zero
    content: SleepLockGuard<'a, Box<[u8]>>,
    reference: BufRef<'a>,
}

impl Drop for BufRef<'_> {
    fn drop(&mut self) {
        self.cache
            .put_ref(self.slot, self.dev, self.blockno, "release");
    }
}

impl<'a> Buf<'a> {
    /// Device number of the cached block
    pub fn device(&self) -> DeviceId {
        self.reference.dev
    }

    /// Block number of the cached block
    pub fn block_no(&self) -> BlockNo {
        self.reference.blockno
    }

    /// Index of the underlying buffer in the pool
    pub fn slot(&self) -> usize {
        self.reference.slot
    }

    /// Whether the contents reflect the device
    pub fn is_valid(&self) -> bool {
        self.reference.cache.slots[self.reference.slot].is_valid()
    }

    /// Block contents
    pub fn data(&self) -> &[u8] {
        &self.content[..]
    }

    /// Mutable block contents; call `BufCache::persist` to write them back
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.content[..]
    }

    /// Handle for `pin`/`unpin`
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            slot: self.reference.slot,
            dev: self.reference.dev,
            blockno: self.reference.blockno,
        }
    }
}

impl fmt::Debug for Buf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("dev", &self.device())
            .field("blockno", &self.block_no())
            .field("slot", &self.slot())
            .field("valid", &self.is_valid())
            .finish()
    }
}
