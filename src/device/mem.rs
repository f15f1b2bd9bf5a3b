//! In-memory block device
//!
//! Blocks that were never written read back as zeros. Every transfer is
//! counted (globally and per block) and failures can be injected per block,
//! which is what the cache's tests lean on.

use crate::device::error::{DeviceError, DeviceResult};
use crate::device::interface::BlockDevice;
use crate::types::{BlockNo, DeviceId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

type BlockKey = (DeviceId, BlockNo);

/// In-memory device
pub struct MemDevice {
    block_size: usize,
    /// Blocks beyond this number are out of range (None = unbounded)
    max_blocks: Option<BlockNo>,
    /// Artificial delay applied to every transfer
    latency: Duration,
    blocks: Mutex<HashMap<BlockKey, Box<[u8]>>>,
    read_counts: Mutex<HashMap<BlockKey, u64>>,
    failing_reads: Mutex<HashSet<BlockKey>>,
    failing_writes: Mutex<HashSet<BlockKey>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemDevice {
    /// Creates an unbounded device with the given block size
    pub fn new(block_size: usize) -> Self {
        MemDevice {
            block_size,
            max_blocks: None,
            latency: Duration::ZERO,
            blocks: Mutex::new(HashMap::new()),
            read_counts: Mutex::new(HashMap::new()),
            failing_reads: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Limits every device to `max_blocks` blocks
    pub fn with_max_blocks(mut self, max_blocks: BlockNo) -> Self {
        self.max_blocks = Some(max_blocks);
        self
    }

    /// Delays every transfer by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Total number of successful block reads
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Total number of successful block writes
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of successful reads of one block
    pub fn reads_of(&self, dev: DeviceId, blockno: BlockNo) -> u64 {
        self.read_counts
            .lock()
            .get(&(dev, blockno))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the stored contents of a block, if it was ever written
    pub fn peek(&self, dev: DeviceId, blockno: BlockNo) -> Option<Vec<u8>> {
        self.blocks.lock().get(&(dev, blockno)).map(|b| b.to_vec())
    }

    /// Stores block contents directly, bypassing counters and fault injection
    pub fn poke(&self, dev: DeviceId, blockno: BlockNo, data: &[u8]) -> DeviceResult<()> {
        self.check_len(data.len())?;
        self.blocks
            .lock()
            .insert((dev, blockno), data.to_vec().into_boxed_slice());
        Ok(())
    }

    /// Makes subsequent reads of a block fail
    pub fn fail_reads(&self, dev: DeviceId, blockno: BlockNo) {
        self.failing_reads.lock().insert((dev, blockno));
    }

    /// Makes subsequent writes of a block fail
    pub fn fail_writes(&self, dev: DeviceId, blockno: BlockNo) {
        self.failing_writes.lock().insert((dev, blockno));
    }

    /// Removes every injected failure
    pub fn clear_failures(&self) {
        self.failing_reads.lock().clear();
        self.failing_writes.lock().clear();
    }

    fn check_len(&self, len: usize) -> DeviceResult<()> {
        if len != self.block_size {
            return Err(DeviceError::InvalidArgument(format!(
                "buffer of {} bytes, block size is {}",
                len, self.block_size
            )));
        }
        Ok(())
    }

    fn check_range(&self, dev: DeviceId, blockno: BlockNo) -> DeviceResult<()> {
        match self.max_blocks {
            Some(max) if blockno >= max => Err(DeviceError::OutOfRange { dev, blockno }),
            _ => Ok(()),
        }
    }

    fn delay(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }
}

impl BlockDevice for MemDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut [u8]) -> DeviceResult<()> {
        self.check_len(buf.len())?;
        self.check_range(dev, blockno)?;
        self.delay();

        if self.failing_reads.lock().contains(&(dev, blockno)) {
            return Err(DeviceError::Injected { dev, blockno });
        }

        match self.blocks.lock().get(&(dev, blockno)) {
            Some(stored) => buf.copy_from_slice(stored),
            None => buf.fill(0),
        }

        *self.read_counts.lock().entry((dev, blockno)).or_insert(0) += 1;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &[u8]) -> DeviceResult<()> {
        self.check_len(buf.len())?;
        self.check_range(dev, blockno)?;
        self.delay();

        if self.failing_writes.lock().contains(&(dev, blockno)) {
            return Err(DeviceError::Injected { dev, blockno });
        }

        self.blocks
            .lock()
            .insert((dev, blockno), buf.to_vec().into_boxed_slice());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
