//! Process-wide string interning.
//!
//! Every property name used by the object model is interned into a global
//! pool. The pool guarantees that two equal strings intern to the same
//! allocation, so `InternedString` equality and hashing are pointer
//! operations - O(1) with no character comparison.
//!
//! # Performance
//!
//! - `intern` on a hit: one hash + one map probe, no allocation
//! - Equality between interned strings: single pointer compare
//! - Hashing: pointer value fed to the hasher, no string walk
//!
//! # Thread Safety
//!
//! The pool is guarded by an `RwLock`; interning from multiple threads is
//! safe. Interned strings live for the process lifetime (the pool never
//! evicts), which is what makes pointer identity a valid equality proxy.

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

// =============================================================================
// InternedString
// =============================================================================

/// A string interned in the global pool.
///
/// Cheap to clone (one refcount bump). Equality and hashing use pointer
/// identity, which is sound because the pool deduplicates: equal contents
/// always yield the same allocation.
#[derive(Clone)]
pub struct InternedString(Arc<str>);

impl InternedString {
    /// Get the string contents.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable address of the interned allocation.
    ///
    /// Used as the identity key for hashing and for GC bookkeeping.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        Arc::as_ptr(&self.0) as *const u8
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check for the empty string.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for InternedString {
    /// Pointer identity - valid because the pool deduplicates.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for InternedString {}

impl Hash for InternedString {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const u8 as usize).hash(state);
    }
}

impl fmt::Debug for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternedString({:?})", self.as_str())
    }
}

impl fmt::Display for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for InternedString {
    #[inline]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

// =============================================================================
// Global Pool
// =============================================================================

/// The global intern pool.
///
/// A set of `Arc<str>` keyed by contents; `Arc<str>: Borrow<str>` lets us
/// probe with a borrowed `&str` without allocating.
static POOL: OnceLock<RwLock<FxHashSet<Arc<str>>>> = OnceLock::new();

#[inline]
fn pool() -> &'static RwLock<FxHashSet<Arc<str>>> {
    POOL.get_or_init(|| RwLock::new(FxHashSet::default()))
}

/// Intern a string in the global pool.
///
/// Returns the canonical `InternedString` for these contents. Repeated
/// calls with equal contents return pointer-identical results.
pub fn intern(s: &str) -> InternedString {
    // Fast path: already interned, read lock only.
    {
        let pool = pool().read();
        if let Some(existing) = pool.get(s) {
            return InternedString(Arc::clone(existing));
        }
    }

    // Slow path: insert under the write lock. Re-check after acquiring it
    // since another thread may have interned the same string in between.
    let mut pool = pool().write();
    if let Some(existing) = pool.get(s) {
        return InternedString(Arc::clone(existing));
    }
    let arc: Arc<str> = Arc::from(s);
    pool.insert(Arc::clone(&arc));
    InternedString(arc)
}

/// Number of distinct strings interned so far.
pub fn pool_len() -> usize {
    pool().read().len()
}

// =============================================================================
// Tests
// =============================================================================
