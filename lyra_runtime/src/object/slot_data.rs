//! Copy-on-write shared slot metadata.
//!
//! Shapes describe per-slot metadata (interned keys, attribute flags) in
//! growable arrays. Many shapes share one backing buffer: a memoized
//! transition chain reuses its ancestors' metadata wholesale, and
//! attribute-only derivations (seal, prototype change) share the key
//! array outright. `SlotData<T>` is the owner handle for one such array.
//!
//! # Sharing Rules
//!
//! - Reads (`at`) never detach and never allocate.
//! - `push`/`set` first check uniqueness; a shared buffer is detached
//!   (private copy, old refcount decremented, new refcount 1) before the
//!   write lands. Appends on a uniquely-owned buffer are O(1) amortized.
//! - Every pointer-bearing store reports through the GC write barrier.
//!
//! The refcount is observable (`refcount`, `shares_buffer_with`) so tests
//! can assert exact detach accounting.

use lyra_gc::{GcHooks, HeapPtr};
use std::sync::Arc;

// =============================================================================
// SlotData
// =============================================================================

/// Owner handle for a copy-on-write slot-metadata array.
///
/// Cloning the handle shares the backing buffer (refcount + 1); writing
/// through a handle whose buffer is shared detaches a private copy first.
#[derive(Debug)]
pub struct SlotData<T> {
    buf: Arc<Vec<T>>,
}

impl<T> SlotData<T> {
    /// Create an empty array.
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Vec::new()),
        }
    }

    /// Create with room for `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Arc::new(Vec::with_capacity(capacity)),
        }
    }

    /// Read the slot at `index`. Never detaches.
    #[inline]
    pub fn at(&self, index: usize) -> &T {
        &self.buf[index]
    }

    /// Logical size of the array.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check for an empty array.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of live owners of the backing buffer.
    #[inline]
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.buf)
    }

    /// Whether two handles share one backing buffer.
    #[inline]
    pub fn shares_buffer_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buf, &other.buf)
    }

    /// Address of the backing buffer, for GC bookkeeping.
    #[inline]
    pub fn buffer_ptr(&self) -> *const () {
        Arc::as_ptr(&self.buf) as *const ()
    }

    /// Iterate the slots in order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.buf.iter()
    }
}

impl<T: Clone + HeapPtr> SlotData<T> {
    /// Append at the logical end.
    ///
    /// O(1) amortized when this handle uniquely owns the buffer; a shared
    /// buffer is detached first.
    pub fn push(&mut self, value: T, hooks: &GcHooks) {
        self.detach_if_shared();
        hooks.record_store(self.buffer_ptr(), &value);
        self.unique_buf().push(value);
    }

    /// Overwrite the slot at `index`.
    ///
    /// Always checks uniqueness first; a shared buffer is detached so the
    /// other owners keep their observed values.
    pub fn set(&mut self, index: usize, value: T, hooks: &GcHooks) {
        debug_assert!(index < self.len(), "slot index out of bounds");
        self.detach_if_shared();
        hooks.record_store(self.buffer_ptr(), &value);
        self.unique_buf()[index] = value;
    }

    /// Detach: allocate a private buffer, copy all elements, drop this
    /// handle's claim on the shared one.
    fn detach_if_shared(&mut self) {
        if Arc::strong_count(&self.buf) > 1 {
            self.buf = Arc::new((*self.buf).clone());
        }
    }

    #[inline]
    fn unique_buf(&mut self) -> &mut Vec<T> {
        Arc::get_mut(&mut self.buf).expect("buffer is uniquely owned after detach")
    }
}

impl<T> Clone for SlotData<T> {
    /// Share the backing buffer: a new owner, no copy.
    fn clone(&self) -> Self {
        Self {
            buf: Arc::clone(&self.buf),
        }
    }
}

impl<T> Default for SlotData<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lyra_core::{intern, InternedString};

    /// Plain data: no barrier traffic.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Plain(u32);

    impl HeapPtr for Plain {
        fn heap_ptr(&self) -> Option<*const ()> {
            None
        }
    }

    #[test]
    fn test_push_and_read() {
        let hooks = GcHooks::new();
        let mut data = SlotData::new();
        data.push(Plain(1), &hooks);
        data.push(Plain(2), &hooks);

        assert_eq!(data.len(), 2);
        assert_eq!(*data.at(0), Plain(1));
        assert_eq!(*data.at(1), Plain(2));
    }

    #[test]
    fn test_clone_shares_buffer() {
        let hooks = GcHooks::new();
        let mut a = SlotData::new();
        a.push(Plain(7), &hooks);

        let b = a.clone();
        assert!(a.shares_buffer_with(&b));
        assert_eq!(a.refcount(), 2);
        assert_eq!(b.refcount(), 2);
    }

    #[test]
    fn test_cow_isolation_on_set() {
        let hooks = GcHooks::new();
        let mut a = SlotData::new();
        a.push(Plain(1), &hooks);
        a.push(Plain(2), &hooks);

        let mut b = a.clone();
        b.set(0, Plain(99), &hooks);

        // Writer sees the new value, the other owner is untouched.
        assert_eq!(*b.at(0), Plain(99));
        assert_eq!(*a.at(0), Plain(1));

        // Exactly one detach: both buffers now uniquely owned.
        assert!(!a.shares_buffer_with(&b));
        assert_eq!(a.refcount(), 1);
        assert_eq!(b.refcount(), 1);
    }

    #[test]
    fn test_cow_isolation_on_push() {
        let hooks = GcHooks::new();
        let mut a = SlotData::new();
        a.push(Plain(1), &hooks);

        let mut b = a.clone();
        b.push(Plain(2), &hooks);

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 2);
        assert!(!a.shares_buffer_with(&b));
    }

    #[test]
    fn test_unique_push_does_not_reallocate_handle() {
        let hooks = GcHooks::new();
        let mut data: SlotData<Plain> = SlotData::with_capacity(8);
        let before = data.buffer_ptr();
        data.push(Plain(1), &hooks);
        data.push(Plain(2), &hooks);

        // Uniquely owned with spare capacity: same buffer throughout.
        assert_eq!(data.buffer_ptr(), before);
    }

    #[test]
    fn test_reads_never_detach() {
        let hooks = GcHooks::new();
        let mut a = SlotData::new();
        a.push(Plain(5), &hooks);
        let b = a.clone();

        let _ = a.at(0);
        let _ = b.at(0);
        assert!(a.shares_buffer_with(&b));
        assert_eq!(a.refcount(), 2);
    }

    #[test]
    fn test_barrier_fires_for_interned_keys() {
        let hooks = GcHooks::new();
        let mut keys: SlotData<InternedString> = SlotData::new();
        keys.push(intern("x"), &hooks);
        keys.push(intern("y"), &hooks);

        assert_eq!(hooks.stats().recorded(), 2);
    }

    #[test]
    fn test_barrier_silent_for_plain_data() {
        let hooks = GcHooks::new();
        let mut data = SlotData::new();
        data.push(Plain(1), &hooks);
        data.set(0, Plain(2), &hooks);

        assert_eq!(hooks.stats().recorded(), 0);
    }
}
