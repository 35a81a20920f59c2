//! SIGINT/SIGTERM handling.
//!
//! The handler does only async-signal-safe work: it sets [`STOP`] and, if a
//! wake-up semaphore has been published with [`arm_wakeup`], posts it once so
//! a thread blocked on that semaphore returns. Cleanup happens on the main
//! thread after the blocking call comes back.

use std::io;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use tricolor_ring::NamedSemaphore;

/// Set by the handler. Never cleared.
static STOP: AtomicBool = AtomicBool::new(false);

/// Semaphore the handler posts, or null.
static WAKE: AtomicPtr<libc::sem_t> = AtomicPtr::new(ptr::null_mut());

extern "C" fn on_signal(_signum: libc::c_int) {
    // SAFETY: errno is thread-local; the handler runs on the interrupted
    // thread and puts back what it found.
    let errno = unsafe { errno_location() };
    let saved = unsafe { *errno };

    STOP.store(true, Ordering::SeqCst);
    let sem = WAKE.load(Ordering::SeqCst);
    if !sem.is_null() {
        // SAFETY: sem_post is async-signal-safe, and WakeGuard clears WAKE
        // before the semaphore can be closed.
        unsafe {
            libc::sem_post(sem);
        }
    }

    unsafe { *errno = saved };
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__error() }
}

/// Install the handler for SIGINT and SIGTERM.
///
/// `SA_RESTART` is left off so blocking semaphore waits return `EINTR`.
pub fn install() -> io::Result<()> {
    for signum in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: a zeroed sigaction is a valid starting point; every field we
        // rely on is set below.
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = 0;
        // SAFETY: action is a valid, exclusively borrowed sigaction.
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signum, &action, ptr::null_mut()) == -1 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    tracing::debug!("signal handlers installed");
    Ok(())
}

/// The flag the handler sets.
pub fn stop_flag() -> &'static AtomicBool {
    &STOP
}

/// Whether a stop signal has arrived.
pub fn stop_requested() -> bool {
    STOP.load(Ordering::SeqCst)
}

/// Publish `sem` to the handler until the guard drops.
///
/// The guard borrows the semaphore, so it cannot be closed while the handler
/// might still post it.
pub fn arm_wakeup(sem: &NamedSemaphore) -> WakeGuard<'_> {
    WAKE.store(sem.as_ptr(), Ordering::SeqCst);
    WakeGuard {
        _sem: PhantomData,
    }
}

/// Clears the published wake-up semaphore on drop.
#[must_use = "the wake-up semaphore is unpublished when the guard drops"]
#[derive(Debug)]
pub struct WakeGuard<'a> {
    _sem: PhantomData<&'a NamedSemaphore>,
}

impl Drop for WakeGuard<'_> {
    fn drop(&mut self) {
        WAKE.store(ptr::null_mut(), Ordering::SeqCst);
    }
}
