//! Signal handler behaviour. Kept in its own test binary because the stop
//! flag is process-wide and never cleared.

use tricolor::signals;
use tricolor_ring::{NamedSemaphore, Semaphore};

#[test]
fn handler_sets_flag_and_posts_only_while_armed() {
    signals::install().unwrap();

    let name = format!("/tcsig{}", std::process::id());
    let sem = NamedSemaphore::create(&name, 0).unwrap();
    NamedSemaphore::unlink(&name).unwrap();
    assert!(!signals::stop_requested());

    {
        let _wake = signals::arm_wakeup(&sem);
        // SAFETY: raise(3) delivers to this thread; the handler is installed.
        assert_eq!(unsafe { libc::raise(libc::SIGTERM) }, 0);
        assert!(signals::stop_requested());
        assert_eq!(sem.value().unwrap(), 1);
        assert!(sem.try_wait().unwrap());
    }

    // SAFETY: as above.
    assert_eq!(unsafe { libc::raise(libc::SIGINT) }, 0);
    assert!(signals::stop_flag().load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(sem.value().unwrap(), 0);
}
