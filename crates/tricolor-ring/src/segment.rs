//! Named POSIX shared-memory segments.

use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use crate::region::Region;

/// Owner-only read/write.
const SHM_MODE: libc::mode_t = 0o600;

/// A mapped shared-memory object.
///
/// Dropping the segment unmaps it and closes the descriptor. The name stays
/// resolvable until [`ShmSegment::unlink`] is called.
pub struct ShmSegment {
    base: NonNull<u8>,
    len: usize,
    name: String,
    /// Kept open for the lifetime of the mapping.
    _file: File,
}

// SAFETY: the mapping is only accessed through Region, whose users
// synchronise via the ring protocol.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Open the object, creating it if absent, size it to `len` and map it.
    pub fn create(name: &str, len: usize) -> Result<Self, SegmentError> {
        let file = shm_open(name, libc::O_CREAT | libc::O_RDWR).map_err(SegmentError::Open)?;
        file.set_len(len as u64).map_err(SegmentError::Resize)?;
        let base = map(&file, len).map_err(SegmentError::Map)?;
        tracing::debug!(name, len, "created shared memory segment");
        Ok(Self {
            base,
            len,
            name: name.to_owned(),
            _file: file,
        })
    }

    /// Map an existing object, which must be at least `len` bytes.
    pub fn open(name: &str, len: usize) -> Result<Self, SegmentError> {
        let file = shm_open(name, libc::O_RDWR).map_err(SegmentError::Open)?;
        let found = file.metadata().map_err(SegmentError::Open)?.len() as usize;
        if found < len {
            return Err(SegmentError::TooSmall {
                expected: len,
                found,
            });
        }
        let base = map(&file, len).map_err(SegmentError::Map)?;
        tracing::debug!(name, len, "attached shared memory segment");
        Ok(Self {
            base,
            len,
            name: name.to_owned(),
            _file: file,
        })
    }

    /// Remove a name. Returns `false` if it did not exist.
    pub fn unlink(name: &str) -> io::Result<bool> {
        let c_name = c_name(name)?;
        // SAFETY: c_name is a valid C string.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(true)
    }

    /// A view of the mapping. Valid while `self` is alive.
    pub fn region(&self) -> Region {
        // SAFETY: base is mapped for len bytes until drop.
        unsafe { Region::from_raw(self.base, self.len) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unmap and close now, reporting an `munmap` failure instead of
    /// logging it.
    pub fn close(self) -> io::Result<()> {
        let this = ManuallyDrop::new(self);
        let result = this.unmap();
        // SAFETY: `this` is never used or dropped again, so each field is
        // dropped exactly once here.
        unsafe {
            drop(ptr::read(&this.name));
            drop(ptr::read(&this._file));
        }
        result
    }

    fn unmap(&self) -> io::Result<()> {
        // SAFETY: base and len describe a live mapping created by map().
        if unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        if let Err(error) = self.unmap() {
            tracing::warn!(name = %self.name, %error, "munmap failed");
        }
    }
}

impl fmt::Debug for ShmSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmSegment")
            .field("name", &self.name)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "IPC name contains an interior NUL byte",
        )
    })
}

fn shm_open(name: &str, oflag: libc::c_int) -> io::Result<File> {
    let c_name = c_name(name)?;
    // SAFETY: c_name is a valid C string.
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), oflag, SHM_MODE) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly opened descriptor we exclusively own.
    Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
}

fn map(file: &File, len: usize) -> io::Result<NonNull<u8>> {
    // SAFETY: fd is valid; a null hint lets the kernel pick the address.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr as *mut u8).ok_or_else(|| io::Error::other("mmap returned null"))
}

/// Errors from creating or attaching a segment.
#[derive(Debug)]
pub enum SegmentError {
    /// `shm_open` (or `fstat`) failed.
    Open(io::Error),
    /// `ftruncate` failed.
    Resize(io::Error),
    /// `mmap` failed.
    Map(io::Error),
    /// The object exists but is smaller than the layout needs.
    TooSmall { expected: usize, found: usize },
}

impl SegmentError {
    /// Whether the object simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Open(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "shm_open failed: {}", e),
            Self::Resize(e) => write!(f, "ftruncate failed: {}", e),
            Self::Map(e) => write!(f, "mmap failed: {}", e),
            Self::TooSmall { expected, found } => write!(
                f,
                "segment too small: need {} bytes, found {}",
                expected, found
            ),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(e) | Self::Resize(e) | Self::Map(e) => Some(e),
            Self::TooSmall { .. } => None,
        }
    }
}
