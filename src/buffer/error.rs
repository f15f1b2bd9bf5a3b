//! Buffer cache errors
//!
//! Two classes: `BufferError` is returned to the caller (device failures);
//! `FatalError` describes conditions that must never occur in correct usage
//! and is only ever raised through [`fatal`], which does not return.

use crate::device::DeviceError;
use crate::types::{BlockNo, DeviceId};
use std::error::Error;
use std::fmt;

/// Recoverable buffer cache errors
#[derive(Debug)]
pub enum BufferError {
    /// The device failed to read or write a block
    DeviceIo {
        dev: DeviceId,
        blockno: BlockNo,
        source: DeviceError,
    },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::DeviceIo {
                dev,
                blockno,
                source,
            } => write!(
                f,
                "Device I/O error on device {} block {}: {}",
                dev, blockno, source
            ),
        }
    }
}

impl Error for BufferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BufferError::DeviceIo { source, .. } => Some(source),
        }
    }
}

/// Result type for buffer cache operations
pub type BufferResult<T> = Result<T, BufferError>;

/// Unrecoverable conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// A miss found no buffer with a zero reference count
    ResourceExhausted { dev: DeviceId, blockno: BlockNo },
    /// A caller broke the locking or reference protocol
    ProtocolViolation(String),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::ResourceExhausted { dev, blockno } => write!(
                f,
                "resource exhausted: no evictable buffer for device {} block {}",
                dev, blockno
            ),
            FatalError::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl Error for FatalError {}

/// Reports a fatal condition and aborts the calling context
#[cold]
#[track_caller]
pub(crate) fn fatal(err: FatalError) -> ! {
    log::error!("bcache: {}", err);
    panic!("bcache: {}", err);
}
