//! Shared-memory layout definitions.
//!
//! These `repr(C)` structures are the wire format between the supervisor and
//! every generator. Both sides must be built against the same [`CAPACITY`]
//! and [`MAX_REMOVED`]; a mismatch is undefined behaviour.
//!
//! | Offset | Field         | Semantics                              |
//! |--------|---------------|----------------------------------------|
//! | 0      | `terminate`   | 32-bit flag, 0 = run, non-zero = stop  |
//! | 4      | `write_index` | 32-bit index into the slot array       |
//! | 8      | `read_index`  | 32-bit index into the slot array       |
//! | 12     | slots         | `CAPACITY` contiguous [`Solution`]s    |

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Number of solution slots in the ring.
pub const CAPACITY: u32 = 20;

/// Maximum number of conflict edges a solution may carry.
pub const MAX_REMOVED: usize = 8;

/// Byte offset of the first slot.
pub const SLOTS_OFFSET: usize = size_of::<RingHeader>();

/// Total size of the shared-memory segment.
pub const SEGMENT_SIZE: usize = SLOTS_OFFSET + CAPACITY as usize * size_of::<Solution>();

// =============================================================================
// Ring Header
// =============================================================================

/// Control block at offset 0 of the segment.
///
/// The indices are only ever touched under the semaphore discipline: the
/// write index under `write_mutex`, the read index by the single consumer.
/// They are atomics so that concurrent views of the mapping stay sound; the
/// happens-before edges come from the semaphores, not from these loads.
#[repr(C)]
pub struct RingHeader {
    /// Set once by the consumer, polled by every producer. Never cleared.
    pub terminate: AtomicU32,
    /// Producers' head, in `[0, CAPACITY)`.
    pub write_index: AtomicU32,
    /// Consumer's tail, in `[0, CAPACITY)`.
    pub read_index: AtomicU32,
}

const _: () = assert!(size_of::<RingHeader>() == 12);
const _: () = assert!(SLOTS_OFFSET % align_of::<Solution>() == 0);

impl RingHeader {
    /// Reset the control block to its zero state.
    pub fn init(&mut self) {
        self.terminate = AtomicU32::new(0);
        self.write_index = AtomicU32::new(0);
        self.read_index = AtomicU32::new(0);
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire) != 0
    }

    #[inline]
    pub fn set_terminated(&self) {
        self.terminate.store(1, Ordering::Release);
    }
}

/// Advance a ring index by one slot.
#[inline]
pub fn next_index(index: u32) -> u32 {
    (index + 1) % CAPACITY
}

// =============================================================================
// Solutions
// =============================================================================

/// An unordered pair of vertex ids.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Edge {
    pub u: u32,
    pub v: u32,
}

impl Edge {
    pub const fn new(u: u32, v: u32) -> Self {
        Self { u, v }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.u, self.v)
    }
}

/// One candidate: the edges a random colouring leaves in conflict.
///
/// Fewer edges is better; zero means the colouring is proper. Pairs past
/// `edge_count` are garbage and are never exposed.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Solution {
    edge_count: u32,
    edges: [Edge; MAX_REMOVED],
}

const _: () = assert!(size_of::<Solution>() == 4 + MAX_REMOVED * 8);
const _: () = assert!(align_of::<Solution>() == 4);

/// Returned when a solution already holds [`MAX_REMOVED`] edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolutionFull;

impl fmt::Display for SolutionFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "solution already holds {MAX_REMOVED} edges")
    }
}

impl std::error::Error for SolutionFull {}

impl Solution {
    /// A solution with no conflict edges.
    pub const fn new() -> Self {
        Self {
            edge_count: 0,
            edges: [Edge::new(0, 0); MAX_REMOVED],
        }
    }

    /// Build a solution from a slice of edges.
    pub fn from_edges(edges: &[Edge]) -> Result<Self, SolutionFull> {
        let mut solution = Self::new();
        for edge in edges {
            solution.try_push(*edge)?;
        }
        Ok(solution)
    }

    /// Append a conflict edge.
    pub fn try_push(&mut self, edge: Edge) -> Result<(), SolutionFull> {
        let len = self.edge_count as usize;
        if len >= MAX_REMOVED {
            return Err(SolutionFull);
        }
        self.edges[len] = edge;
        self.edge_count += 1;
        Ok(())
    }

    /// Number of conflict edges, as stored.
    #[inline]
    pub fn edge_count(&self) -> u32 {
        self.edge_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.edge_count == 0
    }

    /// Whether the stored count is within bounds.
    ///
    /// Always true for solutions built through this API. A slot read back
    /// from shared memory may fail this if a peer was built with different
    /// constants.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.edge_count as usize <= MAX_REMOVED
    }

    /// The conflict edges.
    pub fn edges(&self) -> &[Edge] {
        let len = (self.edge_count as usize).min(MAX_REMOVED);
        &self.edges[..len]
    }

    /// Overwrite the stored count. Only used to fabricate corrupt slots.
    #[cfg(test)]
    pub(crate) fn set_raw_edge_count(&mut self, count: u32) {
        self.edge_count = count;
    }
}

impl Default for Solution {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Solution {
    fn eq(&self, other: &Self) -> bool {
        self.edge_count == other.edge_count && self.edges() == other.edges()
    }
}

impl Eq for Solution {}

impl fmt::Debug for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solution")
            .field("edge_count", &self.edge_count)
            .field("edges", &self.edges())
            .finish()
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, edge) in self.edges().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{edge}")?;
        }
        write!(f, "]")
    }
}
