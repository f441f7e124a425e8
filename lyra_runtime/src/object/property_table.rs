//! Per-shape property table.
//!
//! Each shape owns one open-addressing table mapping an interned key to
//! the slot indices of its property. Keys hash and compare by pointer
//! identity, so a probe is a handful of word comparisons. The table is
//! grow-only: entries are tombstoned on removal and reclaimed on the
//! next growth rehash, which keeps probe chains valid without back-shift
//! bookkeeping.
//!
//! Absence is `None`, never an error: the table is queried on every
//! cache miss and most misses are legitimate proto-chain walks.

use lyra_core::InternedString;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

// =============================================================================
// Entries
// =============================================================================

/// Sentinel for "no slot": accessor-less properties have no setter slot,
/// and resolution code treats the sentinel as absent.
pub const NO_SLOT: u16 = u16::MAX;

/// One property's slot assignment inside a shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    /// Interned property key.
    pub key: InternedString,
    /// Slot holding the data value, or the getter of an accessor pair.
    pub value_slot: u16,
    /// Slot holding the setter of an accessor pair, or [`NO_SLOT`].
    pub setter_slot: u16,
}

impl PropertyEntry {
    /// Data property occupying one slot.
    #[inline]
    pub fn data(key: InternedString, value_slot: u16) -> Self {
        Self {
            key,
            value_slot,
            setter_slot: NO_SLOT,
        }
    }

    /// Accessor property occupying a getter slot and a setter slot.
    #[inline]
    pub fn accessor(key: InternedString, getter_slot: u16, setter_slot: u16) -> Self {
        Self {
            key,
            value_slot: getter_slot,
            setter_slot,
        }
    }

    /// Whether this entry reserves a setter slot.
    #[inline]
    pub fn is_accessor(&self) -> bool {
        self.setter_slot != NO_SLOT
    }
}

// =============================================================================
// PropertyTable
// =============================================================================

#[derive(Debug, Clone)]
enum Bucket {
    Empty,
    /// Removed entry; probes continue past it, inserts may reuse it.
    Deleted,
    Occupied(PropertyEntry),
}

/// Open-addressing key → slot table scoped to one shape.
///
/// Linear probing over a power-of-two capacity; grows at 3/4 load.
#[derive(Debug, Clone)]
pub struct PropertyTable {
    buckets: Vec<Bucket>,
    /// Occupied entries (tombstones excluded).
    len: usize,
    /// Occupied + tombstoned, bounds the probe load.
    used: usize,
}

const INITIAL_CAPACITY: usize = 8;

impl PropertyTable {
    /// Empty table; allocates no buckets until the first insert.
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
            len: 0,
            used: 0,
        }
    }

    /// Table pre-sized for `n` entries.
    pub fn with_capacity(n: usize) -> Self {
        let cap = (n * 4 / 3 + 1).next_power_of_two().max(INITIAL_CAPACITY);
        Self {
            buckets: vec![Bucket::Empty; cap],
            len: 0,
            used: 0,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check for an empty table.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn bucket_index(&self, key: &InternedString) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.buckets.len() - 1)
    }

    /// Look up a key. O(1) expected, no allocation.
    pub fn find(&self, key: &InternedString) -> Option<&PropertyEntry> {
        if self.buckets.is_empty() {
            return None;
        }
        let mask = self.buckets.len() - 1;
        let mut idx = self.bucket_index(key);
        loop {
            match &self.buckets[idx] {
                Bucket::Empty => return None,
                Bucket::Deleted => {}
                Bucket::Occupied(entry) => {
                    if entry.key == *key {
                        return Some(entry);
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Insert an entry. The key must not already be present.
    pub fn insert(&mut self, entry: PropertyEntry) {
        debug_assert!(
            self.find(&entry.key).is_none(),
            "duplicate property key {:?}",
            entry.key
        );
        if self.buckets.is_empty() || (self.used + 1) * 4 > self.buckets.len() * 3 {
            self.grow();
        }
        let mask = self.buckets.len() - 1;
        let mut idx = self.bucket_index(&entry.key);
        loop {
            match &self.buckets[idx] {
                Bucket::Empty => {
                    self.buckets[idx] = Bucket::Occupied(entry);
                    self.len += 1;
                    self.used += 1;
                    return;
                }
                Bucket::Deleted => {
                    self.buckets[idx] = Bucket::Occupied(entry);
                    self.len += 1;
                    return;
                }
                Bucket::Occupied(_) => {}
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Remove a key, leaving a tombstone. Returns the removed entry.
    pub fn erase(&mut self, key: &InternedString) -> Option<PropertyEntry> {
        if self.buckets.is_empty() {
            return None;
        }
        let mask = self.buckets.len() - 1;
        let mut idx = self.bucket_index(key);
        loop {
            match &self.buckets[idx] {
                Bucket::Empty => return None,
                Bucket::Deleted => {}
                Bucket::Occupied(entry) => {
                    if entry.key == *key {
                        let taken = std::mem::replace(&mut self.buckets[idx], Bucket::Deleted);
                        self.len -= 1;
                        match taken {
                            Bucket::Occupied(entry) => return Some(entry),
                            _ => unreachable!(),
                        }
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Iterate live entries in bucket order (not insertion order; shapes
    /// keep insertion order in their key array).
    pub fn iter(&self) -> impl Iterator<Item = &PropertyEntry> {
        self.buckets.iter().filter_map(|b| match b {
            Bucket::Occupied(entry) => Some(entry),
            _ => None,
        })
    }

    /// Double capacity and rehash, dropping tombstones.
    fn grow(&mut self) {
        let new_cap = if self.buckets.is_empty() {
            INITIAL_CAPACITY
        } else {
            self.buckets.len() * 2
        };
        let old = std::mem::replace(&mut self.buckets, vec![Bucket::Empty; new_cap]);
        self.len = 0;
        self.used = 0;
        for bucket in old {
            if let Bucket::Occupied(entry) = bucket {
                self.insert(entry);
            }
        }
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
