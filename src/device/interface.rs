//! Block device interface definitions

use crate::device::error::DeviceResult;
use crate::types::{BlockNo, DeviceId};

/// Block device trait
///
/// Transfers whole blocks addressed by (device, block number). Calls are
/// synchronous and may block; the cache invokes them while holding only the
/// buffer's content lock.
pub trait BlockDevice: Send + Sync {
    /// Size of one block in bytes
    fn block_size(&self) -> usize;

    /// Read one block
    ///
    /// # Arguments
    /// * `dev` - Device number
    /// * `blockno` - Block number on that device
    /// * `buf` - Destination, exactly `block_size()` bytes
    ///
    /// # Returns
    /// * `Ok(())` if the whole block was read
    /// * `Err(DeviceError)` if an error occurred; `buf` contents are then unspecified
    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut [u8]) -> DeviceResult<()>;

    /// Write one block
    ///
    /// # Arguments
    /// * `dev` - Device number
    /// * `blockno` - Block number on that device
    /// * `buf` - Source, exactly `block_size()` bytes
    ///
    /// # Returns
    /// * `Ok(())` once the block is durable on the device
    /// * `Err(DeviceError)` if an error occurred
    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &[u8]) -> DeviceResult<()>;
}
