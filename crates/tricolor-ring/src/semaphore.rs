//! Counting semaphores.
//!
//! [`NamedSemaphore`] wraps a POSIX named semaphore and is what the
//! supervisor and generators share. [`LocalSemaphore`] is an in-process
//! equivalent so the ring protocol can be driven across threads.

use std::ffi::CString;
use std::fmt;
use std::io;
use std::ptr::NonNull;

use parking_lot::{Condvar, Mutex};

/// A counting semaphore as the ring protocol sees it.
pub trait Semaphore {
    /// Take one unit, blocking while the count is zero.
    fn wait(&self) -> Result<(), WaitError>;

    /// Take one unit if one is available. Returns `false` if the count was zero.
    fn try_wait(&self) -> Result<bool, WaitError>;

    /// Return one unit, waking a waiter if there is one.
    fn post(&self) -> io::Result<()>;

    /// Current count. Racy by nature; diagnostics and tests only.
    fn value(&self) -> io::Result<u32>;
}

/// Errors from a semaphore wait.
#[derive(Debug)]
pub enum WaitError {
    /// The wait was interrupted by a signal before a unit was taken.
    Interrupted,
    /// Any other OS failure.
    Os(io::Error),
}

impl WaitError {
    fn last_os_error() -> Self {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            Self::Interrupted
        } else {
            Self::Os(err)
        }
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => write!(f, "semaphore wait interrupted"),
            Self::Os(e) => write!(f, "semaphore wait failed: {}", e),
        }
    }
}

impl std::error::Error for WaitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Os(e) => Some(e),
            Self::Interrupted => None,
        }
    }
}

// =============================================================================
// Named (POSIX) semaphores
// =============================================================================

/// Owner-only read/write.
const SEM_MODE: libc::c_uint = 0o600;

/// A POSIX named semaphore handle.
///
/// Dropping the handle closes it. The name stays resolvable until someone
/// calls [`NamedSemaphore::unlink`].
pub struct NamedSemaphore {
    sem: NonNull<libc::sem_t>,
    name: String,
}

// SAFETY: sem_t operations are thread-safe; the handle is only closed on drop.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create a new semaphore. Fails with `AlreadyExists` if the name is taken.
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        let c_name = c_name(name)?;
        // SAFETY: c_name is a valid C string; the variadic args are (mode, value).
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                SEM_MODE,
                initial as libc::c_uint,
            )
        };
        let sem = Self::check(sem)?;
        tracing::debug!(name, initial, "created semaphore");
        Ok(Self {
            sem,
            name: name.to_owned(),
        })
    }

    /// Open an existing semaphore.
    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = c_name(name)?;
        // SAFETY: c_name is a valid C string; no O_CREAT, so no variadic args.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        let sem = Self::check(sem)?;
        tracing::debug!(name, "opened semaphore");
        Ok(Self {
            sem,
            name: name.to_owned(),
        })
    }

    /// Remove a name. Returns `false` if it did not exist.
    pub fn unlink(name: &str) -> io::Result<bool> {
        let c_name = c_name(name)?;
        // SAFETY: c_name is a valid C string.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(true)
    }

    /// Close the handle, reporting failure instead of swallowing it.
    pub fn close(mut self) -> io::Result<()> {
        let sem = self.sem;
        drop(std::mem::take(&mut self.name));
        std::mem::forget(self);
        // SAFETY: sem came from a successful sem_open and is closed exactly once.
        if unsafe { libc::sem_close(sem.as_ptr()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw handle, for async-signal-safe posting from a signal handler.
    pub fn as_ptr(&self) -> *mut libc::sem_t {
        self.sem.as_ptr()
    }

    fn check(sem: *mut libc::sem_t) -> io::Result<NonNull<libc::sem_t>> {
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(sem).ok_or_else(io::Error::last_os_error)
    }
}

impl Semaphore for NamedSemaphore {
    fn wait(&self) -> Result<(), WaitError> {
        // SAFETY: sem is open for the lifetime of self.
        if unsafe { libc::sem_wait(self.sem.as_ptr()) } == -1 {
            return Err(WaitError::last_os_error());
        }
        Ok(())
    }

    fn try_wait(&self) -> Result<bool, WaitError> {
        // SAFETY: sem is open for the lifetime of self.
        if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock => Ok(false),
                io::ErrorKind::Interrupted => Err(WaitError::Interrupted),
                _ => Err(WaitError::Os(err)),
            };
        }
        Ok(true)
    }

    fn post(&self) -> io::Result<()> {
        // SAFETY: sem is open for the lifetime of self.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn value(&self) -> io::Result<u32> {
        let mut value: libc::c_int = 0;
        // SAFETY: sem is open; value is a valid out-pointer.
        if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } == -1 {
            return Err(io::Error::last_os_error());
        }
        // Some platforms report waiters as a negative count.
        Ok(value.max(0) as u32)
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: sem came from a successful sem_open and is closed exactly once.
        if unsafe { libc::sem_close(self.sem.as_ptr()) } == -1 {
            tracing::warn!(
                name = %self.name,
                error = %io::Error::last_os_error(),
                "sem_close failed"
            );
        }
    }
}

impl fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
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

// =============================================================================
// In-process semaphores
// =============================================================================

/// An in-process counting semaphore.
///
/// Behaves like a named semaphore that only threads of this process can see.
/// [`LocalSemaphore::interrupt`] stands in for a signal landing on a waiter.
#[derive(Debug, Default)]
pub struct LocalSemaphore {
    state: Mutex<LocalState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct LocalState {
    count: u32,
    pending_interrupts: u32,
}

impl LocalSemaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            state: Mutex::new(LocalState {
                count: initial,
                pending_interrupts: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Make the next wait (or the current blocked one) fail with
    /// [`WaitError::Interrupted`].
    pub fn interrupt(&self) {
        self.state.lock().pending_interrupts += 1;
        self.cond.notify_all();
    }
}

impl Semaphore for LocalSemaphore {
    fn wait(&self) -> Result<(), WaitError> {
        let mut state = self.state.lock();
        loop {
            if state.pending_interrupts > 0 {
                state.pending_interrupts -= 1;
                return Err(WaitError::Interrupted);
            }
            if state.count > 0 {
                state.count -= 1;
                return Ok(());
            }
            self.cond.wait(&mut state);
        }
    }

    fn try_wait(&self) -> Result<bool, WaitError> {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn post(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.count = state
            .count
            .checked_add(1)
            .ok_or_else(|| io::Error::other("semaphore count overflow"))?;
        drop(state);
        self.cond.notify_one();
        Ok(())
    }

    fn value(&self) -> io::Result<u32> {
        Ok(self.state.lock().count)
    }
}
