//! The bounded-buffer protocol.
//!
//! Producer enqueue:
//!
//! 1. wait `free_slots`, then re-check `terminate`
//! 2. wait `write_mutex`
//! 3. copy into `slots[write_index]`, advance `write_index`
//! 4. post `write_mutex`
//! 5. post `used_slots`
//!
//! Consumer dequeue:
//!
//! 1. wait `used_slots` (interruption means stop)
//! 2. copy out `slots[read_index]`, advance `read_index`
//! 3. post `free_slots`
//!
//! The producer's `used_slots` post synchronises with the consumer's wait, so
//! the slot write happens-before the slot read. `free_slots` gives the same
//! edge in the other direction.

use std::fmt;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::layout::{CAPACITY, RingHeader, SEGMENT_SIZE, SLOTS_OFFSET, Solution, next_index};
use crate::region::Region;
use crate::semaphore::{LocalSemaphore, Semaphore, WaitError};

/// The three semaphores guarding one ring.
#[derive(Debug)]
pub struct Semaphores<S> {
    /// Counts empty slots. Starts at [`CAPACITY`].
    pub free_slots: S,
    /// Counts unread slots. Starts at 0.
    pub used_slots: S,
    /// Serialises producers. Starts at 1.
    pub write_mutex: S,
}

impl Semaphores<LocalSemaphore> {
    /// In-process semaphores at their initial values.
    pub fn local() -> Self {
        Self {
            free_slots: LocalSemaphore::new(CAPACITY),
            used_slots: LocalSemaphore::new(0),
            write_mutex: LocalSemaphore::new(1),
        }
    }
}

/// A ring laid out at offset 0 of a region.
pub struct Ring<S> {
    region: Region,
    sems: Semaphores<S>,
    consumer_taken: AtomicBool,
}

impl<S: Semaphore> Ring<S> {
    /// Zero the control block and take ownership of the semaphores.
    ///
    /// # Safety
    ///
    /// The region must stay valid for the lifetime of the ring and nobody may
    /// be using the control block during initialisation.
    pub unsafe fn init(region: Region, sems: Semaphores<S>) -> Self {
        assert!(region.len() >= SEGMENT_SIZE, "region too small for ring");
        let header = unsafe { region.get_mut::<RingHeader>(0) };
        header.init();
        Self::new(region, sems)
    }

    /// Use a ring that someone else initialised.
    ///
    /// # Safety
    ///
    /// The region must hold an initialised ring and stay valid for the
    /// lifetime of the returned value.
    pub unsafe fn attach(region: Region, sems: Semaphores<S>) -> Self {
        assert!(region.len() >= SEGMENT_SIZE, "region too small for ring");
        Self::new(region, sems)
    }

    fn new(region: Region, sems: Semaphores<S>) -> Self {
        Self {
            region,
            sems,
            consumer_taken: AtomicBool::new(false),
        }
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: init/attach checked the size; the header is only mutated
        // through its atomics.
        unsafe { self.region.get::<RingHeader>(0) }
    }

    /// Pointer to slot `index`.
    ///
    /// # Safety
    ///
    /// `index` must be `< CAPACITY`.
    #[inline]
    unsafe fn slot_ptr(&self, index: u32) -> *mut Solution {
        debug_assert!(index < CAPACITY);
        let base = self.region.offset(SLOTS_OFFSET) as *mut Solution;
        unsafe { base.add(index as usize) }
    }

    /// Whether the consumer has asked everyone to stop.
    #[inline]
    pub fn terminate_requested(&self) -> bool {
        self.header().is_terminated()
    }

    /// Set the terminate flag. It is never cleared.
    pub fn request_terminate(&self) {
        self.header().set_terminated();
    }

    /// Post `free_slots` [`CAPACITY`] times so every producer blocked on it
    /// wakes at least once and sees the terminate flag.
    ///
    /// Returns how many posts succeeded.
    pub fn wake_producers(&self) -> u32 {
        let mut posted = 0;
        for _ in 0..CAPACITY {
            match self.sems.free_slots.post() {
                Ok(()) => posted += 1,
                Err(error) => {
                    tracing::warn!(%error, "failed to post free_slots during wake-up");
                    break;
                }
            }
        }
        tracing::debug!(posted, "woke producers");
        posted
    }

    pub fn semaphores(&self) -> &Semaphores<S> {
        &self.sems
    }

    /// Give back the semaphores, e.g. to close them in a fixed order.
    pub fn into_semaphores(self) -> Semaphores<S> {
        self.sems
    }

    /// Snapshot of indices, flag and semaphore counts.
    pub fn status(&self) -> RingStatus {
        let header = self.header();
        RingStatus {
            terminated: header.is_terminated(),
            write_index: header.write_index.load(Ordering::Relaxed),
            read_index: header.read_index.load(Ordering::Relaxed),
            free_slots: self.sems.free_slots.value().ok(),
            used_slots: self.sems.used_slots.value().ok(),
        }
    }

    /// A producer handle. Any number may exist.
    pub fn producer(&self) -> RingProducer<'_, S> {
        RingProducer { ring: self }
    }

    /// The consumer handle, or `None` if one is already out.
    pub fn consumer(&self) -> Option<RingConsumer<'_, S>> {
        if self.consumer_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(RingConsumer { ring: self })
    }
}

impl<S> fmt::Debug for Ring<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Producer
// =============================================================================

/// Result of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The solution is in the ring.
    Enqueued,
    /// The terminate flag was set; the producer should exit.
    Terminated,
    /// A signal interrupted the `free_slots` wait. Go back to the top of the
    /// loop and re-check `terminate`.
    Interrupted,
    /// No free slot (non-blocking push only).
    WouldBlock,
}

/// Producer handle for the ring.
pub struct RingProducer<'a, S> {
    ring: &'a Ring<S>,
}

impl<S> Clone for RingProducer<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for RingProducer<'_, S> {}

impl<'a, S: Semaphore> RingProducer<'a, S> {
    /// Enqueue a solution, blocking while the ring is full.
    pub fn push(&self, solution: &Solution) -> Result<PushOutcome, RingError> {
        check_outgoing(solution)?;
        match self.ring.sems.free_slots.wait() {
            Ok(()) => {}
            Err(WaitError::Interrupted) => return Ok(PushOutcome::Interrupted),
            Err(WaitError::Os(source)) => return Err(RingError::wait("free_slots", source)),
        }
        // The supervisor over-posts free_slots on shutdown, so the unit we
        // took does not need to go back.
        if self.ring.terminate_requested() {
            return Ok(PushOutcome::Terminated);
        }
        self.write_locked(solution)
    }

    /// Enqueue a solution if a slot is free right now.
    pub fn try_push(&self, solution: &Solution) -> Result<PushOutcome, RingError> {
        check_outgoing(solution)?;
        match self.ring.sems.free_slots.try_wait() {
            Ok(true) => {}
            Ok(false) => return Ok(PushOutcome::WouldBlock),
            Err(WaitError::Interrupted) => return Ok(PushOutcome::Interrupted),
            Err(WaitError::Os(source)) => return Err(RingError::wait("free_slots", source)),
        }
        if self.ring.terminate_requested() {
            return Ok(PushOutcome::Terminated);
        }
        self.write_locked(solution)
    }

    /// Steps 2–5, with one free slot already reserved.
    fn write_locked(&self, solution: &Solution) -> Result<PushOutcome, RingError> {
        let sems = &self.ring.sems;
        loop {
            match sems.write_mutex.wait() {
                Ok(()) => break,
                Err(WaitError::Interrupted) if self.ring.terminate_requested() => {
                    return Ok(PushOutcome::Terminated);
                }
                Err(WaitError::Interrupted) => continue,
                Err(WaitError::Os(source)) => return Err(RingError::wait("write_mutex", source)),
            }
        }

        if self.ring.terminate_requested() {
            sems.write_mutex
                .post()
                .map_err(|source| RingError::post("write_mutex", source))?;
            return Ok(PushOutcome::Terminated);
        }

        let header = self.ring.header();
        let index = header.write_index.load(Ordering::Relaxed);
        if index >= CAPACITY {
            sems.write_mutex
                .post()
                .map_err(|source| RingError::post("write_mutex", source))?;
            return Err(RingError::CorruptIndex { index });
        }

        // SAFETY: index < CAPACITY, we hold write_mutex, and free_slots
        // guarantees the consumer is not reading this slot.
        unsafe { ptr::write(self.ring.slot_ptr(index), *solution) };
        header.write_index.store(next_index(index), Ordering::Relaxed);

        sems.write_mutex
            .post()
            .map_err(|source| RingError::post("write_mutex", source))?;
        sems.used_slots
            .post()
            .map_err(|source| RingError::post("used_slots", source))?;

        tracing::trace!(index, edges = solution.edge_count(), "enqueued solution");
        Ok(PushOutcome::Enqueued)
    }

    /// Whether the consumer has asked everyone to stop.
    #[inline]
    pub fn terminate_requested(&self) -> bool {
        self.ring.terminate_requested()
    }
}

fn check_outgoing(solution: &Solution) -> Result<(), RingError> {
    if !solution.is_valid() {
        return Err(RingError::Oversized {
            edge_count: solution.edge_count(),
        });
    }
    Ok(())
}

// =============================================================================
// Consumer
// =============================================================================

/// Result of a dequeue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome {
    Solution(Solution),
    /// Interrupted, or asked to stop while waiting. No slot was consumed.
    Stopped,
    /// Nothing to read (non-blocking pop only).
    Empty,
}

/// The single consumer handle for the ring.
pub struct RingConsumer<'a, S> {
    ring: &'a Ring<S>,
}

impl<'a, S: Semaphore> RingConsumer<'a, S> {
    /// Dequeue one solution, blocking while the ring is empty.
    ///
    /// `stop` is checked after the wait returns, before touching the slot, so
    /// a signal handler can set it and post `used_slots` to break the wait.
    pub fn pop(&mut self, stop: &AtomicBool) -> Result<PopOutcome, RingError> {
        match self.ring.sems.used_slots.wait() {
            Ok(()) => {}
            Err(WaitError::Interrupted) => return Ok(PopOutcome::Stopped),
            Err(WaitError::Os(source)) => return Err(RingError::wait("used_slots", source)),
        }
        if stop.load(Ordering::Acquire) || self.ring.terminate_requested() {
            return Ok(PopOutcome::Stopped);
        }
        self.take_slot()
    }

    /// Dequeue one solution if one is ready.
    pub fn try_pop(&mut self) -> Result<PopOutcome, RingError> {
        match self.ring.sems.used_slots.try_wait() {
            Ok(true) => self.take_slot(),
            Ok(false) => Ok(PopOutcome::Empty),
            Err(WaitError::Interrupted) => Ok(PopOutcome::Stopped),
            Err(WaitError::Os(source)) => Err(RingError::wait("used_slots", source)),
        }
    }

    /// Steps 2–3, with one used slot already claimed.
    fn take_slot(&mut self) -> Result<PopOutcome, RingError> {
        let header = self.ring.header();
        let index = header.read_index.load(Ordering::Relaxed);
        if index >= CAPACITY {
            return Err(RingError::CorruptIndex { index });
        }

        // SAFETY: index < CAPACITY; used_slots guarantees a producer finished
        // writing this slot and no producer will touch it until we post
        // free_slots.
        let solution = unsafe { ptr::read(self.ring.slot_ptr(index)) };
        header.read_index.store(next_index(index), Ordering::Relaxed);

        self.ring
            .sems
            .free_slots
            .post()
            .map_err(|source| RingError::post("free_slots", source))?;

        if !solution.is_valid() {
            return Err(RingError::CorruptSlot {
                index,
                edge_count: solution.edge_count(),
            });
        }

        tracing::trace!(index, edges = solution.edge_count(), "dequeued solution");
        Ok(PopOutcome::Solution(solution))
    }
}

impl<S> Drop for RingConsumer<'_, S> {
    fn drop(&mut self) {
        self.ring.consumer_taken.store(false, Ordering::Release);
    }
}

// =============================================================================
// Status & errors
// =============================================================================

/// Status snapshot of a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStatus {
    pub terminated: bool,
    pub write_index: u32,
    pub read_index: u32,
    /// `None` where the platform cannot report semaphore values.
    pub free_slots: Option<u32>,
    pub used_slots: Option<u32>,
}

impl fmt::Display for RingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn count(v: Option<u32>) -> String {
            v.map_or_else(|| "?".to_owned(), |v| v.to_string())
        }
        write!(
            f,
            "write={} read={} free={} used={}/{}{}",
            self.write_index,
            self.read_index,
            count(self.free_slots),
            count(self.used_slots),
            CAPACITY,
            if self.terminated { " (terminated)" } else { "" }
        )
    }
}

/// Errors from ring operations.
#[derive(Debug)]
pub enum RingError {
    /// A semaphore operation failed for a reason other than interruption.
    Semaphore {
        sem: &'static str,
        op: &'static str,
        source: io::Error,
    },
    /// The solution carries more edges than a slot can hold.
    Oversized { edge_count: u32 },
    /// A dequeued slot holds an impossible edge count.
    CorruptSlot { index: u32, edge_count: u32 },
    /// An index in the control block is out of range.
    CorruptIndex { index: u32 },
    /// A consumer handle is already out for this ring.
    ConsumerTaken,
}

impl RingError {
    fn wait(sem: &'static str, source: io::Error) -> Self {
        Self::Semaphore {
            sem,
            op: "wait",
            source,
        }
    }

    fn post(sem: &'static str, source: io::Error) -> Self {
        Self::Semaphore {
            sem,
            op: "post",
            source,
        }
    }
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semaphore { sem, op, source } => {
                write!(f, "{} on {} failed: {}", op, sem, source)
            }
            Self::Oversized { edge_count } => write!(
                f,
                "solution has {} edges, a slot holds at most {}",
                edge_count,
                crate::MAX_REMOVED
            ),
            Self::CorruptSlot { index, edge_count } => {
                write!(f, "slot {} holds invalid edge count {}", index, edge_count)
            }
            Self::CorruptIndex { index } => write!(f, "ring index {} out of range", index),
            Self::ConsumerTaken => write!(f, "ring already has a consumer"),
        }
    }
}

impl std::error::Error for RingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Semaphore { source, .. } => Some(source),
            _ => None,
        }
    }
}
