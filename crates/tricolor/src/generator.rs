//! Producer loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use tricolor_ring::{PushOutcome, RingError, RingProducer, Semaphore};

use crate::graph::{Candidates, Graph};

/// Why a generator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeneratorExit {
    /// The supervisor set `terminate`.
    #[default]
    Terminated,
    /// The local stop flag was set, normally by a signal.
    Stopped,
}

/// Counters for one generator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneratorStats {
    /// Candidates placed in the ring.
    pub enqueued: u64,
    /// Colourings dropped for having too many conflicts.
    pub discarded: u64,
    /// Pushes cut short by a signal.
    pub interrupted: u64,
    pub exit: GeneratorExit,
}

impl fmt::Display for GeneratorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enqueued={} discarded={} interrupted={} exit={:?}",
            self.enqueued, self.discarded, self.interrupted, self.exit
        )
    }
}

/// Generate and enqueue candidates until the ring is terminated or `stop`
/// is set.
///
/// Both are checked at the top of every iteration, so an interrupted wait
/// always comes back here before anything else happens.
pub fn run<S, R>(
    producer: RingProducer<'_, S>,
    graph: &Graph,
    rng: &mut R,
    stop: &AtomicBool,
) -> Result<GeneratorStats, RingError>
where
    S: Semaphore,
    R: Rng + ?Sized,
{
    let mut candidates = Candidates::new(graph);
    let mut stats = GeneratorStats::default();

    loop {
        if producer.terminate_requested() {
            stats.exit = GeneratorExit::Terminated;
            break;
        }
        if stop.load(Ordering::Acquire) {
            stats.exit = GeneratorExit::Stopped;
            break;
        }

        let Some(solution) = candidates.next(rng) else {
            stats.discarded += 1;
            continue;
        };

        match producer.push(&solution)? {
            PushOutcome::Enqueued => stats.enqueued += 1,
            PushOutcome::Interrupted => stats.interrupted += 1,
            PushOutcome::Terminated => {
                stats.exit = GeneratorExit::Terminated;
                break;
            }
            // Blocking pushes never report this.
            PushOutcome::WouldBlock => {}
        }
    }

    tracing::debug!(%stats, "generator finished");
    Ok(stats)
}
