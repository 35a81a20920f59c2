//! Randomised 3-colouring search over a shared-memory ring.
//!
//! Generators colour a graph at random and send the edges each colouring
//! leaves in conflict. The supervisor keeps the smallest such set and stops
//! once one is empty, i.e. the graph is 3-colourable.
//!
//! The transport lives in [`tricolor_ring`]; this crate holds the graph
//! model, the producer and consumer loops, signal handling and the
//! command-line surfaces of the `supervisor` and `generator` binaries.

pub mod config;
pub mod generator;
pub mod graph;
pub mod signals;
pub mod supervisor;

pub use generator::{GeneratorExit, GeneratorStats};
pub use graph::{Candidates, Graph, GraphError, MAX_VERTEX_ID, parse_edge};
pub use supervisor::{Notice, StopReason, Summary, SupervisorConfig};
