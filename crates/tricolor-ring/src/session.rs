//! Host and peer sessions.
//!
//! - `RingHost`: created by the supervisor; owns the names and unlinks them
//! - `RingPeer`: used by generators to attach to an existing ring

use std::fmt;
use std::io;
use std::mem::ManuallyDrop;

use crate::layout::{CAPACITY, RingHeader, SEGMENT_SIZE};
use crate::ring::{Ring, RingConsumer, RingProducer, RingStatus, Semaphores};
use crate::segment::{SegmentError, ShmSegment};
use crate::semaphore::NamedSemaphore;

/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "/graph_coloring";

/// Longest name accepted for any object (Linux `NAME_MAX` minus the `sem.` prefix).
const MAX_NAME_LEN: usize = 251;

/// The four named objects of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcNames {
    pub shm: String,
    pub sem_free: String,
    pub sem_used: String,
    pub sem_mutex: String,
}

impl IpcNames {
    /// Derive all names from a prefix such as `/graph_coloring`.
    pub fn with_prefix(prefix: &str) -> Result<Self, SessionError> {
        let invalid = |reason| SessionError::InvalidName {
            name: prefix.to_owned(),
            reason,
        };
        let Some(rest) = prefix.strip_prefix('/') else {
            return Err(invalid("must start with '/'"));
        };
        if rest.is_empty() {
            return Err(invalid("must not be empty after '/'"));
        }
        if rest.contains('/') {
            return Err(invalid("must not contain '/' after the first character"));
        }
        if rest.contains('\0') {
            return Err(invalid("must not contain NUL"));
        }
        let names = Self {
            shm: format!("{prefix}_shm"),
            sem_free: format!("{prefix}_sem_free"),
            sem_used: format!("{prefix}_sem_used"),
            sem_mutex: format!("{prefix}_sem_mutex"),
        };
        if names.all().iter().any(|n| n.len() > MAX_NAME_LEN) {
            return Err(invalid("too long"));
        }
        Ok(names)
    }

    pub fn semaphores(&self) -> [&str; 3] {
        [&self.sem_free, &self.sem_used, &self.sem_mutex]
    }

    pub fn all(&self) -> [&str; 4] {
        [&self.shm, &self.sem_free, &self.sem_used, &self.sem_mutex]
    }
}

impl Default for IpcNames {
    fn default() -> Self {
        Self {
            shm: format!("{DEFAULT_PREFIX}_shm"),
            sem_free: format!("{DEFAULT_PREFIX}_sem_free"),
            sem_used: format!("{DEFAULT_PREFIX}_sem_used"),
            sem_mutex: format!("{DEFAULT_PREFIX}_sem_mutex"),
        }
    }
}

// =============================================================================
// Host
// =============================================================================

/// Supervisor-side session.
///
/// Creates every named object and is the only party that unlinks them.
/// [`RingHost::shutdown`] (or drop) runs the full teardown:
///
/// 1. set `terminate`
/// 2. post `free_slots` `CAPACITY` times
/// 3. close and unlink the semaphores
/// 4. unmap and unlink the segment
pub struct RingHost {
    // Both taken exactly once, by `teardown`.
    ring: ManuallyDrop<Ring<NamedSemaphore>>,
    segment: ManuallyDrop<ShmSegment>,
    names: IpcNames,
    shut_down: bool,
}

impl RingHost {
    /// Create the segment and semaphores and initialise the ring.
    ///
    /// On failure, every object created so far is unlinked again.
    pub fn create(names: IpcNames) -> Result<Self, SessionError> {
        // Leftovers from a crashed run would keep their old counts. A crashed
        // run and a live one look the same from here: if another supervisor
        // is still using this prefix, its session is broken from now on.
        for name in names.semaphores() {
            match NamedSemaphore::unlink(name) {
                Ok(true) => tracing::warn!(
                    name,
                    "removed stale semaphore (any supervisor still running with this prefix is now broken)"
                ),
                Ok(false) => {}
                Err(source) => return Err(SessionError::semaphore(name, source)),
            }
        }

        let mut guard = CreateGuard::new(&names);

        let segment = match ShmSegment::create(&names.shm, SEGMENT_SIZE) {
            Ok(segment) => segment,
            Err(source) => {
                guard.shm = !matches!(source, SegmentError::Open(_));
                return Err(SessionError::segment(&names.shm, source));
            }
        };
        guard.shm = true;

        // Zero the control block before any semaphore exists, so no peer
        // can attach to a half-initialised ring.
        // SAFETY: we just mapped the segment and nobody else can use it yet.
        unsafe { segment.region().get_mut::<RingHeader>(0).init() };

        let free_slots = NamedSemaphore::create(&names.sem_free, CAPACITY)
            .map_err(|source| SessionError::semaphore(&names.sem_free, source))?;
        guard.sems += 1;
        let used_slots = NamedSemaphore::create(&names.sem_used, 0)
            .map_err(|source| SessionError::semaphore(&names.sem_used, source))?;
        guard.sems += 1;
        let write_mutex = NamedSemaphore::create(&names.sem_mutex, 1)
            .map_err(|source| SessionError::semaphore(&names.sem_mutex, source))?;
        guard.sems += 1;

        let sems = Semaphores {
            free_slots,
            used_slots,
            write_mutex,
        };
        // SAFETY: the header is initialised and teardown drops the ring
        // before the segment.
        let ring = unsafe { Ring::attach(segment.region(), sems) };

        guard.disarm();
        tracing::info!(shm = %names.shm, capacity = CAPACITY, "ring created");

        Ok(Self {
            ring: ManuallyDrop::new(ring),
            segment: ManuallyDrop::new(segment),
            names,
            shut_down: false,
        })
    }

    pub fn ring(&self) -> &Ring<NamedSemaphore> {
        &self.ring
    }

    /// The consumer handle, or `None` if one is already out.
    pub fn consumer(&self) -> Option<RingConsumer<'_, NamedSemaphore>> {
        self.ring.consumer()
    }

    pub fn names(&self) -> &IpcNames {
        &self.names
    }

    /// Tear everything down and report what happened.
    pub fn shutdown(mut self) -> ShutdownReport {
        self.teardown()
    }

    fn teardown(&mut self) -> ShutdownReport {
        if self.shut_down {
            return ShutdownReport::default();
        }
        self.shut_down = true;

        // SAFETY: guarded by `shut_down`, so both fields are taken once and
        // never touched again.
        let (ring, segment) = unsafe {
            (
                ManuallyDrop::take(&mut self.ring),
                ManuallyDrop::take(&mut self.segment),
            )
        };

        let mut report = ShutdownReport {
            final_status: Some(ring.status()),
            ..ShutdownReport::default()
        };

        ring.request_terminate();
        report.producers_woken = ring.wake_producers();

        let Semaphores {
            free_slots,
            used_slots,
            write_mutex,
        } = ring.into_semaphores();
        for sem in [free_slots, used_slots, write_mutex] {
            let name = sem.name().to_owned();
            report.record_close(&name, sem.close());
            report.record_unlink(&name, NamedSemaphore::unlink(&name));
        }

        let name = segment.name().to_owned();
        report.record_close(&name, segment.close());
        report.record_unlink(&name, ShmSegment::unlink(&name));

        tracing::info!(
            closed = report.closed,
            unlinked = report.unlinked,
            failures = report.failures,
            "ring shut down"
        );
        report
    }
}

impl Drop for RingHost {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for RingHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingHost")
            .field("names", &self.names)
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

/// Unlinks partially created objects unless disarmed.
struct CreateGuard<'a> {
    names: &'a IpcNames,
    shm: bool,
    /// How many semaphores (in `names.semaphores()` order) were created.
    sems: usize,
    armed: bool,
}

impl<'a> CreateGuard<'a> {
    fn new(names: &'a IpcNames) -> Self {
        Self {
            names,
            shm: false,
            sems: 0,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CreateGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for name in self.names.semaphores().iter().take(self.sems) {
            if let Err(error) = NamedSemaphore::unlink(name) {
                tracing::warn!(name, %error, "failed to unlink semaphore after setup failure");
            }
        }
        if self.shm {
            if let Err(error) = ShmSegment::unlink(&self.names.shm) {
                tracing::warn!(name = %self.names.shm, %error, "failed to unlink segment after setup failure");
            }
        }
    }
}

/// What [`RingHost::shutdown`] did.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Ring state just before `terminate` was set.
    pub final_status: Option<RingStatus>,
    /// Successful `free_slots` posts made to release producers.
    pub producers_woken: u32,
    /// Semaphore handles and the mapping released.
    pub closed: u32,
    /// Names removed.
    pub unlinked: u32,
    /// Failed closes and unlinks (already-missing names are not failures).
    pub failures: u32,
}

impl ShutdownReport {
    fn record_close(&mut self, name: &str, result: io::Result<()>) {
        match result {
            Ok(()) => self.closed += 1,
            Err(error) => {
                self.failures += 1;
                tracing::warn!(name, %error, "close failed");
            }
        }
    }

    fn record_unlink(&mut self, name: &str, result: io::Result<bool>) {
        match result {
            Ok(true) => self.unlinked += 1,
            Ok(false) => tracing::debug!(name, "already unlinked"),
            Err(error) => {
                self.failures += 1;
                tracing::warn!(name, %error, "unlink failed");
            }
        }
    }
}

// =============================================================================
// Peer
// =============================================================================

/// Generator-side session.
///
/// Attaches to objects the supervisor created. Dropping only closes and
/// unmaps; names are never unlinked from here.
pub struct RingPeer {
    ring: Ring<NamedSemaphore>,
    _segment: ShmSegment,
}

impl RingPeer {
    /// Attach to an existing ring.
    pub fn attach(names: &IpcNames) -> Result<Self, SessionError> {
        let segment = ShmSegment::open(&names.shm, SEGMENT_SIZE).map_err(|source| {
            if source.is_not_found() {
                SessionError::SupervisorNotRunning {
                    name: names.shm.clone(),
                }
            } else {
                SessionError::segment(&names.shm, source)
            }
        })?;

        let open = |name: &str| {
            NamedSemaphore::open(name).map_err(|source| SessionError::semaphore(name, source))
        };
        let sems = Semaphores {
            free_slots: open(&names.sem_free)?,
            used_slots: open(&names.sem_used)?,
            write_mutex: open(&names.sem_mutex)?,
        };

        // SAFETY: the supervisor initialised the header before creating the
        // semaphores we just opened; the segment outlives the ring.
        let ring = unsafe { Ring::attach(segment.region(), sems) };
        tracing::debug!(shm = %names.shm, "attached to ring");

        Ok(Self {
            ring,
            _segment: segment,
        })
    }

    pub fn ring(&self) -> &Ring<NamedSemaphore> {
        &self.ring
    }

    pub fn producer(&self) -> RingProducer<'_, NamedSemaphore> {
        self.ring.producer()
    }
}

impl fmt::Debug for RingPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingPeer").finish_non_exhaustive()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors from session setup.
#[derive(Debug)]
pub enum SessionError {
    /// The configured prefix cannot name POSIX IPC objects.
    InvalidName { name: String, reason: &'static str },
    /// Creating or mapping the shared-memory segment failed.
    Segment { name: String, source: SegmentError },
    /// Creating or opening a semaphore failed.
    Semaphore { name: String, source: io::Error },
    /// The shared-memory object does not exist yet.
    SupervisorNotRunning { name: String },
}

impl SessionError {
    fn segment(name: &str, source: SegmentError) -> Self {
        Self::Segment {
            name: name.to_owned(),
            source,
        }
    }

    fn semaphore(name: &str, source: io::Error) -> Self {
        Self::Semaphore {
            name: name.to_owned(),
            source,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName { name, reason } => {
                write!(f, "invalid IPC name {:?}: {}", name, reason)
            }
            Self::Segment { name, source } => write!(f, "segment {}: {}", name, source),
            Self::Semaphore { name, source } => write!(f, "semaphore {}: {}", name, source),
            Self::SupervisorNotRunning { name } => write!(
                f,
                "shared memory object {} does not exist (supervisor must be running)",
                name
            ),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Segment { source, .. } => Some(source),
            Self::Semaphore { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Edge, Solution};
    use crate::ring::{PopOutcome, PushOutcome};
    use crate::semaphore::Semaphore;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    fn unique_names() -> IpcNames {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let prefix = format!(
            "/trs_sess_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        IpcNames::with_prefix(&prefix).unwrap()
    }

    fn resolvable(names: &IpcNames) -> Vec<String> {
        let mut found = Vec::new();
        if ShmSegment::open(&names.shm, 1).is_ok() {
            found.push(names.shm.clone());
        }
        for name in names.semaphores() {
            if NamedSemaphore::open(name).is_ok() {
                found.push(name.to_owned());
            }
        }
        found
    }

    #[test]
    fn test_names_from_prefix() {
        let names = IpcNames::with_prefix("/graph_coloring").unwrap();
        assert_eq!(names, IpcNames::default());
        assert_eq!(names.shm, "/graph_coloring_shm");
        assert_eq!(names.sem_free, "/graph_coloring_sem_free");
        assert_eq!(names.sem_used, "/graph_coloring_sem_used");
        assert_eq!(names.sem_mutex, "/graph_coloring_sem_mutex");
    }

    #[test]
    fn test_invalid_prefixes() {
        for prefix in ["graph", "/", "/a/b", ""] {
            assert!(
                matches!(
                    IpcNames::with_prefix(prefix),
                    Err(SessionError::InvalidName { .. })
                ),
                "{prefix:?} accepted"
            );
        }
        let long = format!("/{}", "x".repeat(300));
        assert!(IpcNames::with_prefix(&long).is_err());
    }

    #[test]
    fn test_host_peer_exchange() {
        let names = unique_names();
        let host = RingHost::create(names.clone()).unwrap();
        let peer = RingPeer::attach(&names).unwrap();

        let solution = Solution::from_edges(&[Edge::new(0, 1), Edge::new(2, 3)]).unwrap();
        assert_eq!(
            peer.producer().push(&solution).unwrap(),
            PushOutcome::Enqueued
        );

        let stop = AtomicBool::new(false);
        let mut consumer = host.consumer().unwrap();
        assert_eq!(
            consumer.pop(&stop).unwrap(),
            PopOutcome::Solution(solution)
        );
        drop(consumer);

        drop(peer);
        let report = host.shutdown();
        assert_eq!(report.closed, 4);
        assert_eq!(report.unlinked, 4);
        assert_eq!(report.failures, 0);
        assert!(resolvable(&names).is_empty());
    }

    #[test]
    fn test_initial_state() {
        let names = unique_names();
        let host = RingHost::create(names.clone()).unwrap();
        let status = host.ring().status();
        assert!(!status.terminated);
        assert_eq!(status.write_index, 0);
        assert_eq!(status.read_index, 0);
        assert_eq!(status.free_slots, Some(CAPACITY));
        assert_eq!(status.used_slots, Some(0));
    }

    #[test]
    fn test_attach_before_create_fails_cleanly() {
        let names = unique_names();
        let err = RingPeer::attach(&names).unwrap_err();
        assert!(matches!(err, SessionError::SupervisorNotRunning { .. }));
        assert!(err.to_string().contains("does not exist"));
        assert!(resolvable(&names).is_empty());
    }

    #[test]
    fn test_shutdown_counts_missing_names_as_already_gone() {
        let names = unique_names();
        let host = RingHost::create(names.clone()).unwrap();
        assert!(NamedSemaphore::unlink(&names.sem_used).unwrap());
        assert!(ShmSegment::unlink(&names.shm).unwrap());

        let report = host.shutdown();
        assert_eq!(report.closed, 4);
        assert_eq!(report.unlinked, 2);
        assert_eq!(report.failures, 0);
        assert!(report.final_status.is_some_and(|s| !s.terminated));
        assert!(resolvable(&names).is_empty());
    }

    #[test]
    fn test_drop_runs_teardown() {
        let names = unique_names();
        let host = RingHost::create(names.clone()).unwrap();
        assert_eq!(resolvable(&names).len(), 4);
        drop(host);
        assert!(resolvable(&names).is_empty());
    }

    #[test]
    fn test_stale_semaphores_are_replaced() {
        let names = unique_names();
        let stale = NamedSemaphore::create(&names.sem_free, 0).unwrap();
        drop(stale);

        let host = RingHost::create(names.clone()).unwrap();
        assert_eq!(
            host.ring().semaphores().free_slots.value().unwrap(),
            CAPACITY
        );
    }

    #[test]
    fn test_second_host_takes_over_names() {
        let names = unique_names();
        let first = RingHost::create(names.clone()).unwrap();
        let second = RingHost::create(names.clone()).unwrap();

        let report = second.shutdown();
        assert_eq!(report.unlinked, 4);
        assert!(resolvable(&names).is_empty());

        let report = first.shutdown();
        assert_eq!(report.closed, 4);
        assert_eq!(report.unlinked, 0);
        assert_eq!(report.failures, 0);
    }

    #[test]
    fn test_failed_setup_unlinks_what_it_created() {
        let names = unique_names();
        // Pretend setup died after the segment and two semaphores existed.
        let first = RingHost::create(names.clone()).unwrap();
        let mut guard = CreateGuard::new(&names);
        guard.shm = true;
        guard.sems = 2;
        drop(guard);
        let remaining = resolvable(&names);
        assert_eq!(remaining, vec![names.sem_mutex.clone()]);
        drop(first);
        assert!(resolvable(&names).is_empty());
    }

    #[test]
    fn test_shutdown_releases_blocked_peer() {
        let names = unique_names();
        let host = RingHost::create(names.clone()).unwrap();

        let producer_names = names.clone();
        let producer = thread::spawn(move || {
            let peer = RingPeer::attach(&producer_names).unwrap();
            let solution = Solution::new();
            loop {
                match peer.producer().push(&solution).unwrap() {
                    PushOutcome::Enqueued => continue,
                    outcome => return outcome,
                }
            }
        });

        // Let the producer fill the ring and block on free_slots.
        while host.ring().status().used_slots != Some(CAPACITY) {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(20));

        let report = host.shutdown();
        assert_eq!(report.producers_woken, CAPACITY);
        assert_eq!(
            report.final_status.unwrap().used_slots,
            Some(CAPACITY)
        );
        assert_eq!(producer.join().unwrap(), PushOutcome::Terminated);
        assert!(resolvable(&names).is_empty());
    }
}
