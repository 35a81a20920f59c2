//! Property harnesses for the ring protocol and the candidate filter.
//!
//! The ring harness drives a real [`tricolor_ring::Ring`] over heap memory
//! with in-process semaphores, so no shared-memory names are touched.

pub mod conflict_model;
pub mod ring_model;
