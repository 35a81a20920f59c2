//! Ring operations checked against a queue model.

use std::collections::VecDeque;

use tricolor_ring::{
    CAPACITY, Edge, HeapRegion, LocalSemaphore, MAX_REMOVED, PopOutcome, PushOutcome, Ring,
    SEGMENT_SIZE, Semaphore, Semaphores, Solution,
};

#[derive(Debug, Clone, Copy)]
pub enum RingOp {
    /// Non-blocking push of a solution with `edges % (MAX_REMOVED + 1)`
    /// edges, tagged so it can be recognised on the way out.
    Push { edges: u8, tag: u32 },
    Pop,
    /// Set the terminate flag and over-post `free_slots`.
    Terminate,
}

impl RingOp {
    pub fn from_raw(kind: u8, edges: u8, tag: u32) -> Self {
        match kind % 8 {
            0..=3 => Self::Push { edges, tag },
            7 => Self::Terminate,
            _ => Self::Pop,
        }
    }
}

fn tagged(edges: u8, tag: u32) -> Solution {
    let count = edges as usize % (MAX_REMOVED + 1);
    let edges: Vec<Edge> = (0..count as u32).map(|i| Edge::new(tag, i)).collect();
    Solution::from_edges(&edges).expect("count is within MAX_REMOVED")
}

/// Run `ops` on a fresh ring and check it against the model after every step.
pub fn execute_and_verify(ops: &[RingOp]) -> Result<(), String> {
    let region = HeapRegion::new_zeroed(SEGMENT_SIZE);
    // SAFETY: the region is sized for the layout and outlives the ring.
    let ring: Ring<LocalSemaphore> = unsafe { Ring::init(region.region(), Semaphores::local()) };
    let producer = ring.producer();
    let mut consumer = ring.consumer().ok_or("consumer unavailable")?;

    let mut queued: VecDeque<Solution> = VecDeque::new();
    let mut free = CAPACITY;
    let mut terminated = false;
    let mut pushed: u64 = 0;
    let mut popped: u64 = 0;

    for (i, op) in ops.iter().enumerate() {
        match *op {
            RingOp::Push { edges, tag } => {
                let solution = tagged(edges, tag);
                let outcome = producer
                    .try_push(&solution)
                    .map_err(|e| format!("op {i}: push failed: {e}"))?;
                let expected = match (free > 0, terminated) {
                    (false, _) => PushOutcome::WouldBlock,
                    (true, true) => PushOutcome::Terminated,
                    (true, false) => PushOutcome::Enqueued,
                };
                if outcome != expected {
                    return Err(format!("op {i}: push gave {outcome:?}, expected {expected:?}"));
                }
                match outcome {
                    PushOutcome::Enqueued => {
                        free -= 1;
                        pushed += 1;
                        queued.push_back(solution);
                    }
                    PushOutcome::Terminated => free -= 1,
                    _ => {}
                }
            }
            RingOp::Pop => {
                let outcome = consumer
                    .try_pop()
                    .map_err(|e| format!("op {i}: pop failed: {e}"))?;
                match (outcome, queued.pop_front()) {
                    (PopOutcome::Solution(got), Some(want)) => {
                        if got != want {
                            return Err(format!("op {i}: popped {got}, expected {want}"));
                        }
                        free += 1;
                        popped += 1;
                    }
                    (PopOutcome::Empty, None) => {}
                    (got, want) => {
                        return Err(format!("op {i}: popped {got:?}, expected {want:?}"));
                    }
                }
            }
            RingOp::Terminate => {
                ring.request_terminate();
                free += ring.wake_producers();
                terminated = true;
            }
        }

        let status = ring.status();
        let used = queued.len() as u32;
        if status.used_slots != Some(used) {
            return Err(format!("op {i}: used_slots {:?}, model {used}", status.used_slots));
        }
        if status.free_slots != Some(free) {
            return Err(format!("op {i}: free_slots {:?}, model {free}", status.free_slots));
        }
        if !terminated && used + free != CAPACITY {
            return Err(format!("op {i}: used {used} + free {free} != {CAPACITY}"));
        }
        if u64::from(status.write_index) != pushed % u64::from(CAPACITY)
            || u64::from(status.read_index) != popped % u64::from(CAPACITY)
        {
            return Err(format!("op {i}: indices drifted: {status}"));
        }
        if status.terminated != terminated {
            return Err(format!("op {i}: terminate flag {}", status.terminated));
        }
        if ring.semaphores().write_mutex.value().ok() != Some(1) {
            return Err(format!("op {i}: write_mutex left taken"));
        }
    }

    Ok(())
}
