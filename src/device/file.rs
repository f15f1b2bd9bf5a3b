//! File-backed block device using libc pread/pwrite/fsync
//!
//! Each device number maps to one image file `dev<N>.img` inside a base
//! directory. Image files are created on first use and grow as blocks are
//! written; a write returns once the image has been synced. Reading past the
//! end of an image yields zeros.

use crate::device::error::{DeviceError, DeviceResult};
use crate::device::interface::BlockDevice;
use crate::types::{BlockNo, DeviceId};
use libc::{self, c_int, c_void, mode_t, off_t, size_t};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Permission bits for newly created image files
const IMAGE_MODE: mode_t = 0o644;

/// File-backed device
pub struct FileDevice {
    base_dir: PathBuf,
    block_size: usize,
    /// Open image descriptors, by device number
    fds: Mutex<HashMap<DeviceId, c_int>>,
}

impl FileDevice {
    /// Create a device rooted at `base_dir`; the directory must already exist
    pub fn open<P: AsRef<Path>>(base_dir: P, block_size: usize) -> DeviceResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.is_dir() {
            return Err(DeviceError::InvalidArgument(format!(
                "not a directory: {}",
                base_dir.display()
            )));
        }
        if block_size == 0 {
            return Err(DeviceError::InvalidArgument(
                "block size must be > 0".to_string(),
            ));
        }
        Ok(FileDevice {
            base_dir,
            block_size,
            fds: Mutex::new(HashMap::new()),
        })
    }

    /// Path of the image file backing a device number
    pub fn image_path(&self, dev: DeviceId) -> PathBuf {
        self.base_dir.join(format!("dev{}.img", dev))
    }

    /// Returns the descriptor for a device image, opening (and creating) it on first use
    fn fd_for(&self, dev: DeviceId) -> DeviceResult<c_int> {
        let mut fds = self.fds.lock();
        if let Some(&fd) = fds.get(&dev) {
            return Ok(fd);
        }

        let path = self.image_path(dev);
        let c_path = std::ffi::CString::new(path.to_string_lossy().as_bytes())?;
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_CREAT | libc::O_RDWR, IMAGE_MODE as libc::c_uint) };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            return Err(DeviceError::SystemError(
                err.raw_os_error().unwrap_or(0),
                format!("open failed for '{}': {}", path.display(), err),
            ));
        }

        log::debug!("opened image {} for device {}", path.display(), dev);
        fds.insert(dev, fd);
        Ok(fd)
    }

    fn offset(&self, blockno: BlockNo) -> off_t {
        (blockno as u64 * self.block_size as u64) as off_t
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
}

impl BlockDevice for FileDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut [u8]) -> DeviceResult<()> {
        self.check_len(buf.len())?;
        let fd = self.fd_for(dev)?;

        let result = unsafe {
            libc::pread(
                fd,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as size_t,
                self.offset(blockno),
            )
        };

        if result < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(DeviceError::SystemError(errno, "pread failed".to_string()));
        }

        // Past the end of the image: the rest of the block reads as zeros
        let read = result as usize;
        if read < buf.len() {
            buf[read..].fill(0);
        }
        Ok(())
    }

    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &[u8]) -> DeviceResult<()> {
        self.check_len(buf.len())?;
        let fd = self.fd_for(dev)?;

        let result = unsafe {
            libc::pwrite(
                fd,
                buf.as_ptr() as *const c_void,
                buf.len() as size_t,
                self.offset(blockno),
            )
        };

        if result < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(DeviceError::SystemError(errno, "pwrite failed".to_string()));
        }

        let written = result as usize;
        if written != buf.len() {
            return Err(DeviceError::ShortTransfer {
                dev,
                blockno,
                expected: buf.len(),
                actual: written,
            });
        }

        if unsafe { libc::fsync(fd) } < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(DeviceError::SystemError(errno, "fsync failed".to_string()));
        }
        Ok(())
    }
}

impl Drop for FileDevice {
    fn drop(&mut self) {
        for (_, fd) in self.fds.get_mut().drain() {
            let _ = unsafe { libc::close(fd) };
        }
    }
}
