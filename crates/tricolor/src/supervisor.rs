//! Consumer loop: read candidates, keep the best, stop on a proper colouring.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tricolor_ring::{MAX_REMOVED, PopOutcome, Ring, RingError, Semaphore, Solution};

/// How long one slice of an interruptible sleep lasts.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Supervisor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupervisorConfig {
    /// Stop after this many solutions. `None` reads until stopped.
    pub limit: Option<u64>,
    /// Sleep before the first read.
    pub delay: Duration,
}

/// Something the supervisor reports to its user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice<'a> {
    Sleeping { delay: Duration },
    NewBest {
        edge_count: u32,
        solution: &'a Solution,
        read_count: u64,
    },
    Colourable,
}

impl fmt::Display for Notice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sleeping { delay } => write!(f, "Sleeping for {} seconds...", delay.as_secs()),
            Self::NewBest { edge_count, .. } => {
                write!(f, "New best solution found! Removed edges: {}", edge_count)
            }
            Self::Colourable => write!(f, "Graph is 3-colourable! Terminating."),
        }
    }
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `limit` solutions were read.
    Limit,
    /// A solution with no conflict edges arrived.
    Colourable,
    /// A stop signal arrived, or a wait was interrupted.
    Signalled,
    /// The ring's terminate flag was already set.
    Terminated,
}

/// Outcome of a supervisor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub read_count: u64,
    /// `MAX_REMOVED + 1` until the first solution arrives.
    pub best_count: u32,
    pub best: Option<Solution>,
    /// Slots dropped because their contents were out of range.
    pub corrupt: u64,
    pub reason: StopReason,
}

impl Summary {
    fn new() -> Self {
        Self {
            read_count: 0,
            best_count: MAX_REMOVED as u32 + 1,
            best: None,
            corrupt: 0,
            reason: StopReason::Terminated,
        }
    }

    pub fn is_colourable(&self) -> bool {
        self.best_count == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.best {
            Some(best) => write!(
                f,
                "Finished after {} solutions. Best solution removes {} edges: {}",
                self.read_count, self.best_count, best
            ),
            None => write!(
                f,
                "Finished after {} solutions. No solution received.",
                self.read_count
            ),
        }
    }
}

/// Sleep for `delay`, waking early if `stop` is set.
///
/// Returns `false` if the sleep was cut short.
pub fn sleep_unless_stopped(delay: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// Run the consumer side until a stop condition holds.
///
/// The caller is responsible for the shutdown sequence afterwards.
pub fn run<S: Semaphore>(
    ring: &Ring<S>,
    config: &SupervisorConfig,
    stop: &AtomicBool,
    mut on_notice: impl FnMut(Notice<'_>),
) -> Result<Summary, RingError> {
    let mut summary = Summary::new();
    let mut consumer = ring.consumer().ok_or(RingError::ConsumerTaken)?;

    if !config.delay.is_zero() {
        on_notice(Notice::Sleeping {
            delay: config.delay,
        });
        if !sleep_unless_stopped(config.delay, stop) {
            tracing::info!("stop requested during initial delay");
            summary.reason = StopReason::Signalled;
            return Ok(summary);
        }
    }

    loop {
        if stop.load(Ordering::Acquire) {
            summary.reason = StopReason::Signalled;
            break;
        }
        if ring.terminate_requested() {
            summary.reason = StopReason::Terminated;
            break;
        }
        if config.limit.is_some_and(|limit| summary.read_count >= limit) {
            summary.reason = StopReason::Limit;
            break;
        }

        let solution = match consumer.pop(stop) {
            Ok(PopOutcome::Solution(solution)) => solution,
            Ok(PopOutcome::Stopped) => {
                summary.reason = if !stop.load(Ordering::Acquire) && ring.terminate_requested() {
                    StopReason::Terminated
                } else {
                    StopReason::Signalled
                };
                break;
            }
            Ok(PopOutcome::Empty) => continue,
            Err(RingError::CorruptSlot { index, edge_count }) => {
                tracing::warn!(index, edge_count, "dropping corrupt slot");
                summary.corrupt += 1;
                continue;
            }
            Err(error) => return Err(error),
        };

        summary.read_count += 1;
        let edge_count = solution.edge_count();
        if edge_count < summary.best_count {
            summary.best_count = edge_count;
            summary.best = Some(solution);
            tracing::debug!(edge_count, read_count = summary.read_count, %solution, "new best");
            on_notice(Notice::NewBest {
                edge_count,
                solution: &solution,
                read_count: summary.read_count,
            });
        }
        if summary.is_colourable() {
            on_notice(Notice::Colourable);
            summary.reason = StopReason::Colourable;
            break;
        }
    }

    tracing::info!(
        read_count = summary.read_count,
        best_count = summary.best_count,
        reason = ?summary.reason,
        "supervisor loop finished"
    );
    Ok(summary)
}
