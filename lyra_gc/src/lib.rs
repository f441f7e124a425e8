//! Garbage collector contract for the Lyra object model.
//!
//! The collector itself lives outside this workspace; this crate defines
//! the two seams the object model must honor to stay safe under a tracing
//! collector that marks concurrently with mutation:
//!
//! - **Write barriers** (`barrier`): every pointer-bearing store into
//!   shared slot metadata or object storage reports the store through
//!   [`GcHooks::write_barrier`] so a concurrent marker never loses an edge.
//! - **Trace traversal** (`trace`): every structure with pointer fields
//!   implements [`Trace`], enumerating each reachable heap pointer for the
//!   marker.
//!
//! Neither seam allocates, blocks, or performs I/O.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod barrier;
pub mod trace;

pub use barrier::{BarrierStats, GcHooks, HeapPtr, MarkingPhase};
pub use trace::{CountingTracer, Trace, Tracer};
