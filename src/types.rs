//! Global type definitions
//!
//! Aliases, constants and the configuration struct shared by the cache and
//! its device collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Device number type
pub type DeviceId = u32;

/// Block number type (index of a block within its device)
pub type BlockNo = u32;

/// Logical timestamp used for LRU comparison
pub type Tick = u64;

/// Block size (1KB)
pub const BLOCK_SIZE: usize = 1024;

/// Default number of buffers in the pool
pub const NBUF: usize = 30;

/// Default number of hash buckets (prime, independent of pool size)
pub const NBUF_BUCKET: usize = 13;

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// A field holds a value the cache cannot be built with
    InvalidValue(String),
    /// Reading the configuration file failed
    Io(std::io::Error),
    /// Configuration text is not valid JSON for `CacheConfig`
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::Io(err) => write!(f, "I/O error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            ConfigError::InvalidValue(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Result type for configuration handling
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Buffer cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of buffers in the pool (fixed for the lifetime of the cache)
    pub pool_size: usize,
    /// Number of hash buckets
    pub bucket_count: usize,
    /// Size of each block in bytes, must match the device
    pub block_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pool_size: NBUF,
            bucket_count: NBUF_BUCKET,
            block_size: BLOCK_SIZE,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with the given pool and bucket counts and the default block size
    pub fn new(pool_size: usize, bucket_count: usize) -> Self {
        Self {
            pool_size,
            bucket_count,
            ..Self::default()
        }
    }

    /// Returns a copy with a different block size
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Parses a configuration from JSON text; missing fields take their defaults
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: CacheConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks that every field is usable
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue("pool_size must be > 0".to_string()));
        }
        if self.bucket_count == 0 {
            return Err(ConfigError::InvalidValue(
                "bucket_count must be > 0".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(ConfigError::InvalidValue(
                "block_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
