//! Marking traversal contract.
//!
//! The external collector drives marking by calling [`Trace::trace`] on
//! roots; each structure enumerates every heap pointer it holds to the
//! supplied [`Tracer`]. The traversal must be complete - a pointer field
//! skipped here is a pointer the collector can reclaim out from under the
//! mutator.
//!
//! This crate only defines the contract plus a counting tracer used by
//! tests to assert reachability; the real marker lives with the host.

use rustc_hash::FxHashSet;

// =============================================================================
// Contract Traits
// =============================================================================

/// Sink for heap pointers discovered during marking.
pub trait Tracer {
    /// Mark one reachable heap pointer.
    fn mark(&mut self, ptr: *const ());
}

/// Structures with pointer fields the collector must see.
///
/// Implementations enumerate every heap pointer reachable in one step:
/// a shape reports its prototype, transition children, and shared
/// metadata buffers; an object reports its shape and slot values.
pub trait Trace {
    /// Enumerate directly held heap pointers to `tracer`.
    fn trace(&self, tracer: &mut dyn Tracer);
}

// =============================================================================
// CountingTracer
// =============================================================================

/// Test tracer that deduplicates and counts marked pointers.
#[derive(Debug, Default)]
pub struct CountingTracer {
    seen: FxHashSet<usize>,
}

impl CountingTracer {
    /// Create an empty tracer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct pointers marked.
    pub fn marked(&self) -> usize {
        self.seen.len()
    }

    /// Whether a specific pointer was marked.
    pub fn saw(&self, ptr: *const ()) -> bool {
        self.seen.contains(&(ptr as usize))
    }
}

impl Tracer for CountingTracer {
    fn mark(&mut self, ptr: *const ()) {
        if !ptr.is_null() {
            self.seen.insert(ptr as usize);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
