// Hash functions for block identities

use crate::types::{BlockNo, DeviceId};

/// Weight applied to the device number so that equal block numbers on
/// different devices land in different buckets
const DEVICE_WEIGHT: u64 = 17;

/// Mixes a (device, block number) pair into a 64-bit value
///
/// The mapping is fixed and deterministic: the same pair always yields the
/// same value, across runs and across cache instances.
#[inline]
pub fn block_hash(dev: DeviceId, blockno: BlockNo) -> u64 {
    DEVICE_WEIGHT
        .wrapping_mul(dev as u64)
        .wrapping_add(blockno as u64)
}

/// Maps a (device, block number) pair onto one of `bucket_count` buckets
#[inline]
pub fn bucket_index(dev: DeviceId, blockno: BlockNo, bucket_count: usize) -> usize {
    debug_assert!(bucket_count > 0, "bucket_count must be > 0");
    (block_hash(dev, blockno) % bucket_count as u64) as usize
}
