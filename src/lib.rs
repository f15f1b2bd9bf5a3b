//! bcache: sharded block buffer cache

// Global type definitions
pub mod types;

// Import various modules
pub mod buffer;
pub mod device;
pub mod infrastructure;

// Re-export cache items for easier access
pub use buffer::{
    BlockKey, BlockRef, Buf, BufCache, BufferError, BufferResult, CacheStats, FatalError,
};

// Re-export device items for easier access
pub use device::{BlockDevice, DeviceError, DeviceResult, FileDevice, MemDevice};

pub use types::{BLOCK_SIZE, BlockNo, CacheConfig, ConfigError, ConfigResult, DeviceId};
