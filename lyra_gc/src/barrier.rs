//! Write barriers for concurrent marking.
//!
//! The object model mutates while an external collector may be marking.
//! To keep the marker's view consistent, every store of a heap-managed
//! pointer into shared shape metadata or object storage is reported
//! through a barrier hook before the mutator proceeds.
//!
//! # Fast Path
//!
//! When no hook is registered and the value carries no heap pointer, the
//! barrier is a null check plus a branch. The barrier never allocates.
//!
//! # Contract
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ 1. Mutator stores value into holder's field    │
//! │ 2. hooks.write_barrier(holder, value_ptr)      │
//! │    └─ host-registered sink records the edge    │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! The host (the collector's embedding) registers the sink via
//! [`GcHooks::with_barrier`]; the default hooks count stores but forward
//! nowhere, which is the correct behavior when no collector is attached.

use lyra_core::InternedString;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

// =============================================================================
// Heap Pointer Extraction
// =============================================================================

/// Types that may carry a heap-managed pointer.
///
/// The barrier only fires for stores whose value actually points into the
/// managed heap; plain data (attribute bits, integers) returns `None`.
pub trait HeapPtr {
    /// The heap pointer carried by this value, if any.
    fn heap_ptr(&self) -> Option<*const ()>;
}

/// Interned keys are heap-resident and shared; the marker must see
/// key stores into shape metadata.
impl HeapPtr for InternedString {
    #[inline]
    fn heap_ptr(&self) -> Option<*const ()> {
        Some(self.as_ptr() as *const ())
    }
}

// =============================================================================
// Marking Phase
// =============================================================================

/// Collector phase, published by the host so the mutator can cheapen
/// barriers outside of marking windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarkingPhase {
    /// No collection in progress.
    Idle = 0,
    /// Concurrent marking active; barriers must forward edges.
    Marking = 1,
}

/// Atomic cell holding the current [`MarkingPhase`].
#[derive(Debug, Default)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    /// Create a cell in the `Idle` phase.
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicU8::new(MarkingPhase::Idle as u8))
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> MarkingPhase {
        match self.0.load(Ordering::Acquire) {
            1 => MarkingPhase::Marking,
            _ => MarkingPhase::Idle,
        }
    }

    /// Enter the marking phase.
    #[inline]
    pub fn start_marking(&self) {
        self.0.store(MarkingPhase::Marking as u8, Ordering::Release);
    }

    /// Return to idle.
    #[inline]
    pub fn finish_marking(&self) {
        self.0.store(MarkingPhase::Idle as u8, Ordering::Release);
    }

    /// Check whether marking is active.
    #[inline]
    pub fn is_marking(&self) -> bool {
        self.phase() == MarkingPhase::Marking
    }
}

// =============================================================================
// Barrier Statistics
// =============================================================================

/// Counters for barrier activity, used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct BarrierStats {
    /// Pointer-bearing stores reported to the barrier.
    recorded: AtomicU64,
}

impl BarrierStats {
    /// Create zeroed stats.
    #[inline]
    pub const fn new() -> Self {
        Self {
            recorded: AtomicU64::new(0),
        }
    }

    /// Number of pointer stores the barrier has seen.
    #[inline]
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    #[inline]
    fn bump(&self) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// GcHooks
// =============================================================================

/// Barrier sink registered by the host collector.
type BarrierSink = dyn Fn(*const (), *const ()) + Send + Sync;

/// The write-barrier seam between the object model and the collector.
///
/// The object model calls [`write_barrier`](GcHooks::write_barrier) on
/// every pointer-bearing store; the hooks forward the `(holder, target)`
/// edge to the host-registered sink and keep counters for tests.
pub struct GcHooks {
    /// Collector phase published by the host.
    phase: PhaseCell,
    /// Host-registered edge sink, if a collector is attached.
    sink: Option<Box<BarrierSink>>,
    /// Activity counters.
    stats: BarrierStats,
}

impl GcHooks {
    /// Hooks with no collector attached: stores are counted, not forwarded.
    pub fn new() -> Self {
        Self {
            phase: PhaseCell::new(),
            sink: None,
            stats: BarrierStats::new(),
        }
    }

    /// Hooks forwarding every pointer store to `sink`.
    pub fn with_barrier<F>(sink: F) -> Self
    where
        F: Fn(*const (), *const ()) + Send + Sync + 'static,
    {
        Self {
            phase: PhaseCell::new(),
            sink: Some(Box::new(sink)),
            stats: BarrierStats::new(),
        }
    }

    /// The collector phase cell.
    #[inline]
    pub fn phase(&self) -> &PhaseCell {
        &self.phase
    }

    /// Barrier counters.
    #[inline]
    pub fn stats(&self) -> &BarrierStats {
        &self.stats
    }

    /// Report a pointer-bearing store.
    ///
    /// `holder` is the address of the structure being mutated; `target`
    /// is the heap pointer carried by the stored value. Non-pointer
    /// stores must not reach this function (callers filter through
    /// [`HeapPtr::heap_ptr`]).
    #[inline(always)]
    pub fn write_barrier(&self, holder: *const (), target: *const ()) {
        if target.is_null() {
            return;
        }
        self.stats.bump();
        if let Some(sink) = &self.sink {
            sink(holder, target);
        }
    }

    /// Report a store of any [`HeapPtr`] value; no-op for plain data.
    #[inline(always)]
    pub fn record_store<T: HeapPtr>(&self, holder: *const (), value: &T) {
        if let Some(target) = value.heap_ptr() {
            self.write_barrier(holder, target);
        }
    }
}

impl Default for GcHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GcHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcHooks")
            .field("phase", &self.phase.phase())
            .field("has_sink", &self.sink.is_some())
            .field("recorded", &self.stats.recorded())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lyra_core::intern;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_default_hooks_count_only() {
        let hooks = GcHooks::new();
        let holder = 0x1000 as *const ();
        let target = 0x2000 as *const ();

        hooks.write_barrier(holder, target);
        hooks.write_barrier(holder, target);

        assert_eq!(hooks.stats().recorded(), 2);
    }

    #[test]
    fn test_null_target_ignored() {
        let hooks = GcHooks::new();
        hooks.write_barrier(0x1000 as *const (), std::ptr::null());
        assert_eq!(hooks.stats().recorded(), 0);
    }

    #[test]
    fn test_sink_receives_edges() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let hooks = GcHooks::with_barrier(move |_holder, _target| {
            seen_clone.fetch_add(1, Ordering::Relaxed);
        });

        hooks.write_barrier(0x10 as *const (), 0x20 as *const ());
        hooks.write_barrier(0x10 as *const (), 0x30 as *const ());

        assert_eq!(seen.load(Ordering::Relaxed), 2);
        assert_eq!(hooks.stats().recorded(), 2);
    }

    #[test]
    fn test_record_store_interned_key() {
        let hooks = GcHooks::new();
        let key = intern("barrier_key");

        hooks.record_store(0x1 as *const (), &key);
        assert_eq!(hooks.stats().recorded(), 1);
    }

    #[test]
    fn test_phase_cell() {
        let cell = PhaseCell::new();
        assert!(!cell.is_marking());

        cell.start_marking();
        assert_eq!(cell.phase(), MarkingPhase::Marking);

        cell.finish_marking();
        assert_eq!(cell.phase(), MarkingPhase::Idle);
    }
}
