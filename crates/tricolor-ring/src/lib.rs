//! Semaphore-guarded bounded ring in POSIX shared memory.
//!
//! One consumer (the supervisor) and any number of producers (generators)
//! exchange candidate [`Solution`]s through a fixed-capacity ring that lives
//! in a named shared-memory segment, synchronised by three named semaphores.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  RingHeader (12 bytes)                       │
//! │    terminate | write_index | read_index      │
//! ├──────────────────────────────────────────────┤
//! │  Slots (CAPACITY × 68 bytes)                 │
//! │    edge_count | MAX_REMOVED × (u, v)         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Semaphores
//!
//! - `free_slots`: counting, starts at [`CAPACITY`]
//! - `used_slots`: counting, starts at 0
//! - `write_mutex`: binary, starts at 1, serialises producers
//!
//! The consumer takes no lock: it is the only reader, and the semaphore
//! counts keep producers off the slot it is reading.
//!
//! # Host vs Peer
//!
//! - [`RingHost`] creates every named object, owns the consumer side, and
//!   unlinks everything on shutdown.
//! - [`RingPeer`] attaches to existing objects and only ever produces. It
//!   never creates and never unlinks.
//!
//! The protocol itself ([`Ring`]) is generic over [`Semaphore`], so the same
//! code runs across processes ([`NamedSemaphore`]) or across threads over a
//! [`HeapRegion`] ([`LocalSemaphore`]).

pub mod layout;
pub mod region;
pub mod ring;
pub mod segment;
pub mod semaphore;
pub mod session;

pub use layout::{
    CAPACITY, Edge, MAX_REMOVED, RingHeader, SEGMENT_SIZE, SLOTS_OFFSET, Solution, SolutionFull,
};
pub use region::{HeapRegion, Region};
pub use ring::{
    PopOutcome, PushOutcome, Ring, RingConsumer, RingError, RingProducer, RingStatus, Semaphores,
};
pub use segment::{SegmentError, ShmSegment};
pub use semaphore::{LocalSemaphore, NamedSemaphore, Semaphore, WaitError};
pub use session::{DEFAULT_PREFIX, IpcNames, RingHost, RingPeer, SessionError, ShutdownReport};
