//! Device module
//!
//! The block device collaborator the buffer cache reads invalid buffers from
//! and persists buffers to. `BlockDevice` is the seam; two implementations are
//! provided: an instrumented in-memory device and a file-backed device that
//! keeps one image file per device number.

// Re-export error types and result type
pub mod error;
pub use error::{DeviceError, DeviceResult};

// Re-export interface trait
pub mod interface;
pub use interface::BlockDevice;

// In-memory device
pub mod mem;
pub use mem::MemDevice;

// File-backed device
pub mod file;
pub use file::FileDevice;
