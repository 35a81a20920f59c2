//! The handler must leave `errno` as it found it, even when its own
//! `sem_post` fails. Separate binary: the stop flag is process-wide.

use std::io;

use tricolor::signals;
use tricolor_ring::{NamedSemaphore, Semaphore};

#[cfg(target_os = "linux")]
#[test]
fn handler_preserves_errno_when_post_overflows() {
    signals::install().unwrap();

    // glibc's SEM_VALUE_MAX is INT_MAX, so one more post fails with EOVERFLOW.
    let name = format!("/tcerr{}", std::process::id());
    let sem = NamedSemaphore::create(&name, libc::c_int::MAX as u32).unwrap();
    NamedSemaphore::unlink(&name).unwrap();
    assert_eq!(
        sem.post().unwrap_err().raw_os_error(),
        Some(libc::EOVERFLOW)
    );

    let _wake = signals::arm_wakeup(&sem);
    // SAFETY: writing errno on the current thread.
    unsafe { *libc::__errno_location() = libc::EXDEV };
    // SAFETY: raise(3) delivers to this thread; the handler is installed.
    unsafe { libc::raise(libc::SIGTERM) };

    assert_eq!(io::Error::last_os_error().raw_os_error(), Some(libc::EXDEV));
    assert!(signals::stop_requested());
    assert_eq!(sem.value().unwrap(), libc::c_int::MAX as u32);
}
