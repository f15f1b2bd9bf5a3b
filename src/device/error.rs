//! Device error definitions

use crate::types::{BlockNo, DeviceId};
use std::error::Error;
use std::fmt;

/// Device error types
#[derive(Debug)]
pub enum DeviceError {
    /// I/O error reported by the standard library
    IoError(std::io::Error),
    /// System call error with error code
    SystemError(i32, String),
    /// Block number beyond the end of the device
    OutOfRange { dev: DeviceId, blockno: BlockNo },
    /// Transfer moved fewer bytes than a full block
    ShortTransfer {
        dev: DeviceId,
        blockno: BlockNo,
        expected: usize,
        actual: usize,
    },
    /// Failure injected for testing
    Injected { dev: DeviceId, blockno: BlockNo },
    /// Invalid argument error
    InvalidArgument(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::IoError(err) => write!(f, "I/O error: {}", err),
            DeviceError::SystemError(errno, msg) => {
                write!(f, "System error (errno {}): {}", errno, msg)
            }
            DeviceError::OutOfRange { dev, blockno } => {
                write!(f, "Block {} out of range on device {}", blockno, dev)
            }
            DeviceError::ShortTransfer {
                dev,
                blockno,
                expected,
                actual,
            } => write!(
                f,
                "Short transfer on device {} block {}: {} of {} bytes",
                dev, blockno, actual, expected
            ),
            DeviceError::Injected { dev, blockno } => {
                write!(f, "Injected failure on device {} block {}", dev, blockno)
            }
            DeviceError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl Error for DeviceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DeviceError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::IoError(err)
    }
}

impl From<std::ffi::NulError> for DeviceError {
    fn from(err: std::ffi::NulError) -> Self {
        DeviceError::InvalidArgument(err.to_string())
    }
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
