//! Per-call-site inline caches.
//!
//! A `Lookup` is allocated once per static property-access site and
//! amortizes shape resolution across repeated accesses there. It is a
//! small state machine keyed on observed shape identity:
//!
//! ```text
//!   Uninitialized ──► monomorphic ──► two-shape ──► Generic (permanent)
//!                     (Direct/Proto/        (second distinct   (third distinct
//!                      Accessor/...)         shape)             shape)
//! ```
//!
//! Every fast path re-validates before trusting its cached resolution:
//! the receiver's live `ShapeId` must match, and prototype-relative
//! states additionally check the remembered holder's `ShapeId` and the
//! process-wide prototype generation. A failed validation is never an
//! error: the access falls back to full resolution and the cache
//! re-primes. Staleness under an unchanged receiver shape (a prototype
//! was swapped somewhere) re-primes in place without burning a
//! degradation step.
//!
//! Setter sites support an `Insertion` state that pre-resolves one add
//! transition, making repeated "add the same property to a fresh object"
//! stores O(1). A `Native` state bypasses every fast path and routes to a
//! host-supplied getter/setter pair; hosts use it to expose foreign
//! properties without teaching this crate their layout.
//!
//! Caches hold shape identity non-owningly (ids and weak handles); shapes
//! stay alive through objects and the transition tree, never through a
//! cache.

use crate::object::shape::{proto_generation, PropertyFlags, Shape, ShapeId, ShapeRegistry};
use crate::object::shaped_object::{
    call_getter, call_setter, resolve_property, ObjectRef, PropertyLocation, WeakObjectRef,
};
use crate::value::{FunctionRef, Value};
use lyra_core::InternedString;
use std::sync::{Arc, Weak};

// =============================================================================
// Native Property Seam
// =============================================================================

/// Host-supplied getter/setter pair for a foreign property.
///
/// A lookup primed with one of these never consults shapes at all.
#[derive(Clone)]
pub struct NativeAccessor {
    getter: FunctionRef,
    setter: Option<FunctionRef>,
}

impl NativeAccessor {
    /// Pair up a host getter and optional setter.
    pub fn new(getter: FunctionRef, setter: Option<FunctionRef>) -> Self {
        Self { getter, setter }
    }

    /// Invoke the host getter.
    #[inline]
    pub fn get(&self, receiver: &ObjectRef) -> Value {
        self.getter.call(receiver, &[])
    }

    /// Invoke the host setter; false if the property is read-only.
    #[inline]
    pub fn set(&self, receiver: &ObjectRef, value: Value) -> bool {
        match &self.setter {
            Some(setter) => {
                setter.call(receiver, &[value]);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for NativeAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeAccessor")
            .field("has_setter", &self.setter.is_some())
            .finish()
    }
}

// =============================================================================
// Cache States
// =============================================================================

/// One validated prototype-chain resolution.
#[derive(Clone, Debug)]
struct ProtoHit {
    /// Receiver shape this resolution was made under.
    shape: ShapeId,
    /// The chain object holding the property.
    holder: WeakObjectRef,
    /// The holder's shape at resolution time.
    holder_shape: ShapeId,
    /// Resolved slot on the holder.
    slot: u16,
    /// Prototype generation at resolution time.
    generation: u64,
}

impl ProtoHit {
    /// Revalidate against a live receiver shape. Returns the holder only
    /// if every remembered identity still stands.
    fn validate(&self, shape_id: ShapeId) -> Option<ObjectRef> {
        if self.shape != shape_id || self.generation != proto_generation() {
            return None;
        }
        let holder = self.holder.upgrade()?;
        if holder.shape_id() != self.holder_shape {
            return None;
        }
        Some(holder)
    }
}

#[derive(Clone, Debug)]
enum LookupState {
    /// No access observed yet.
    Uninitialized,
    /// One receiver shape, data slot on the receiver. `writable` is the
    /// store admissibility under that shape (attribute bit and frozen
    /// flag), captured at prime time; a shape id pins both, so the bit
    /// can never go stale while the id still matches.
    Direct {
        shape: ShapeId,
        slot: u16,
        writable: bool,
    },
    /// Two receiver shapes, data slots on the receiver.
    DirectTwo { entries: [(ShapeId, u16, bool); 2] },
    /// One receiver shape, data slot on a prototype-chain holder.
    Proto(ProtoHit),
    /// Two receiver shapes, each with its own chain resolution.
    ProtoTwo { entries: [ProtoHit; 2] },
    /// One receiver shape, accessor pair on the receiver.
    Accessor {
        shape: ShapeId,
        getter_slot: u16,
        setter_slot: u16,
    },
    /// One receiver shape, accessor pair on a chain holder.
    ProtoAccessor {
        shape: ShapeId,
        holder: WeakObjectRef,
        holder_shape: ShapeId,
        getter_slot: u16,
        setter_slot: u16,
        generation: u64,
    },
    /// Pre-resolved add transition for a setter site.
    Insertion {
        from: ShapeId,
        to: Weak<Shape>,
        slot: u16,
    },
    /// Host-routed property; permanent.
    Native(NativeAccessor),
    /// Megamorphic; always full resolution, permanent.
    Generic,
}

/// Observable state tag, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStateKind {
    Uninitialized,
    Direct,
    DirectTwo,
    Proto,
    ProtoTwo,
    Accessor,
    ProtoAccessor,
    Insertion,
    Native,
    Generic,
}

// =============================================================================
// Lookup
// =============================================================================

/// Inline cache bound to one static property-access site.
///
/// Shape ids are unique within one [`ShapeRegistry`] but restart across
/// registries, and validation compares bare ids. A site must therefore
/// only ever observe receivers from a single registry; feeding it
/// objects from two registries can false-match a recycled id. An engine
/// owns one registry and all of its access sites together, so this
/// holds by construction.
#[derive(Debug)]
pub struct Lookup {
    name: InternedString,
    state: LookupState,
    hits: u64,
    misses: u64,
}

/// Owned fast-path decision extracted from the state under `&self`, so
/// acting on it can take `&mut self`.
enum GetFast {
    Slot(u16),
    ProtoSlot(ObjectRef, u16),
    Getter(u16),
    ProtoGetter(ObjectRef, u16),
    Native(NativeAccessor),
    Generic,
    Miss,
}

enum SetFast {
    Slot(u16),
    Setter(u16),
    Insert(Arc<Shape>, ShapeId, u16),
    Native(NativeAccessor),
    Generic,
    Miss,
}

impl Lookup {
    /// Cache for one access site naming `name`.
    pub fn new(name: InternedString) -> Self {
        Self {
            name,
            state: LookupState::Uninitialized,
            hits: 0,
            misses: 0,
        }
    }

    /// Cache permanently routed to a host getter/setter pair.
    pub fn native(name: InternedString, accessor: NativeAccessor) -> Self {
        Self {
            name,
            state: LookupState::Native(accessor),
            hits: 0,
            misses: 0,
        }
    }

    /// The property name this site accesses.
    #[inline]
    pub fn name(&self) -> &InternedString {
        &self.name
    }

    /// Current state tag.
    pub fn state_kind(&self) -> LookupStateKind {
        match &self.state {
            LookupState::Uninitialized => LookupStateKind::Uninitialized,
            LookupState::Direct { .. } => LookupStateKind::Direct,
            LookupState::DirectTwo { .. } => LookupStateKind::DirectTwo,
            LookupState::Proto(_) => LookupStateKind::Proto,
            LookupState::ProtoTwo { .. } => LookupStateKind::ProtoTwo,
            LookupState::Accessor { .. } => LookupStateKind::Accessor,
            LookupState::ProtoAccessor { .. } => LookupStateKind::ProtoAccessor,
            LookupState::Insertion { .. } => LookupStateKind::Insertion,
            LookupState::Native(_) => LookupStateKind::Native,
            LookupState::Generic => LookupStateKind::Generic,
        }
    }

    /// Fast-path validations that succeeded.
    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Accesses that fell back to full resolution.
    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Fraction of accesses answered by a fast path.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Read the property through this site. `None` means absent; absence
    /// is never cached.
    pub fn get(&mut self, obj: &ObjectRef) -> Option<Value> {
        let shape_id = obj.shape_id();
        match self.probe_get(shape_id) {
            GetFast::Slot(slot) => {
                self.hits += 1;
                Some(obj.read_slot(slot))
            }
            GetFast::ProtoSlot(holder, slot) => {
                self.hits += 1;
                Some(holder.read_slot(slot))
            }
            GetFast::Getter(getter_slot) => {
                self.hits += 1;
                Some(call_getter(obj.read_slot(getter_slot), obj))
            }
            GetFast::ProtoGetter(holder, getter_slot) => {
                self.hits += 1;
                Some(call_getter(holder.read_slot(getter_slot), obj))
            }
            GetFast::Native(accessor) => {
                self.hits += 1;
                Some(accessor.get(obj))
            }
            GetFast::Generic => {
                self.misses += 1;
                obj.get(&self.name)
            }
            GetFast::Miss => {
                self.misses += 1;
                self.get_slow(obj, shape_id)
            }
        }
    }

    fn probe_get(&self, shape_id: ShapeId) -> GetFast {
        match &self.state {
            LookupState::Direct { shape, slot, .. } if *shape == shape_id => GetFast::Slot(*slot),
            LookupState::DirectTwo { entries } => {
                for (shape, slot, _) in entries {
                    if *shape == shape_id {
                        return GetFast::Slot(*slot);
                    }
                }
                GetFast::Miss
            }
            LookupState::Proto(hit) => match hit.validate(shape_id) {
                Some(holder) => GetFast::ProtoSlot(holder, hit.slot),
                None => GetFast::Miss,
            },
            LookupState::ProtoTwo { entries } => {
                for hit in entries {
                    if let Some(holder) = hit.validate(shape_id) {
                        return GetFast::ProtoSlot(holder, hit.slot);
                    }
                }
                GetFast::Miss
            }
            LookupState::Accessor {
                shape, getter_slot, ..
            } if *shape == shape_id => GetFast::Getter(*getter_slot),
            LookupState::ProtoAccessor {
                shape,
                holder,
                holder_shape,
                getter_slot,
                generation,
                ..
            } if *shape == shape_id && *generation == proto_generation() => {
                match holder.upgrade() {
                    Some(live) if live.shape_id() == *holder_shape => {
                        GetFast::ProtoGetter(live, *getter_slot)
                    }
                    _ => GetFast::Miss,
                }
            }
            LookupState::Native(accessor) => GetFast::Native(accessor.clone()),
            LookupState::Generic => GetFast::Generic,
            _ => GetFast::Miss,
        }
    }

    fn get_slow(&mut self, obj: &ObjectRef, shape_id: ShapeId) -> Option<Value> {
        match resolve_property(obj, &self.name) {
            PropertyLocation::Own { slot, attrs } => {
                let writable =
                    attrs.contains(PropertyFlags::WRITABLE) && !obj.shape().is_frozen();
                self.note_direct(shape_id, slot, writable);
                Some(obj.read_slot(slot))
            }
            PropertyLocation::OwnAccessor {
                getter_slot,
                setter_slot,
                ..
            } => {
                self.note_accessor(shape_id, getter_slot, setter_slot);
                Some(call_getter(obj.read_slot(getter_slot), obj))
            }
            PropertyLocation::Proto { holder, slot, .. } => {
                let value = holder.read_slot(slot);
                self.note_proto(shape_id, &holder, slot);
                Some(value)
            }
            PropertyLocation::ProtoAccessor {
                holder,
                getter_slot,
                setter_slot,
                ..
            } => {
                self.note_proto_accessor(shape_id, &holder, getter_slot, setter_slot);
                Some(call_getter(holder.read_slot(getter_slot), obj))
            }
            PropertyLocation::Absent => None,
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Write the property through this site. Returns false when the
    /// store is rejected; rejections are never cached.
    pub fn set(&mut self, obj: &ObjectRef, value: Value, registry: &ShapeRegistry) -> bool {
        let shape_id = obj.shape_id();
        match self.probe_set(shape_id) {
            SetFast::Slot(slot) => {
                self.hits += 1;
                obj.write_slot(slot, value, registry.hooks());
                true
            }
            SetFast::Setter(setter_slot) => {
                self.hits += 1;
                call_setter(obj.read_slot(setter_slot), obj, value)
            }
            SetFast::Insert(target, from, slot) => {
                if obj.apply_insertion(from, target, slot, value.clone(), registry.hooks()) {
                    self.hits += 1;
                    true
                } else {
                    self.misses += 1;
                    self.set_slow(obj, value, registry, shape_id)
                }
            }
            SetFast::Native(accessor) => {
                self.hits += 1;
                accessor.set(obj, value)
            }
            SetFast::Generic => {
                self.misses += 1;
                obj.put(registry, &self.name, value)
            }
            SetFast::Miss => {
                self.misses += 1;
                self.set_slow(obj, value, registry, shape_id)
            }
        }
    }

    fn probe_set(&self, shape_id: ShapeId) -> SetFast {
        match &self.state {
            // A matching shape whose property is not writable routes to
            // the slow path, which rejects without re-priming.
            LookupState::Direct {
                shape,
                slot,
                writable,
            } if *shape == shape_id && *writable => SetFast::Slot(*slot),
            LookupState::DirectTwo { entries } => {
                for (shape, slot, writable) in entries {
                    if *shape == shape_id {
                        return if *writable {
                            SetFast::Slot(*slot)
                        } else {
                            SetFast::Miss
                        };
                    }
                }
                SetFast::Miss
            }
            LookupState::Accessor {
                shape, setter_slot, ..
            } if *shape == shape_id => SetFast::Setter(*setter_slot),
            LookupState::Insertion { from, to, slot } if *from == shape_id => {
                match to.upgrade() {
                    Some(target) => SetFast::Insert(target, *from, *slot),
                    None => SetFast::Miss,
                }
            }
            LookupState::Native(accessor) => SetFast::Native(accessor.clone()),
            LookupState::Generic => SetFast::Generic,
            _ => SetFast::Miss,
        }
    }

    fn set_slow(
        &mut self,
        obj: &ObjectRef,
        value: Value,
        registry: &ShapeRegistry,
        shape_id: ShapeId,
    ) -> bool {
        match resolve_property(obj, &self.name) {
            PropertyLocation::Own { slot, attrs } => {
                if obj.shape().is_frozen() || !attrs.contains(PropertyFlags::WRITABLE) {
                    return false;
                }
                obj.write_slot(slot, value, registry.hooks());
                self.note_direct(shape_id, slot, true);
                true
            }
            PropertyLocation::OwnAccessor {
                getter_slot,
                setter_slot,
                ..
            } => {
                let ok = call_setter(obj.read_slot(setter_slot), obj, value);
                if ok {
                    self.note_accessor(shape_id, getter_slot, setter_slot);
                }
                ok
            }
            PropertyLocation::ProtoAccessor {
                holder,
                getter_slot,
                setter_slot,
                ..
            } => {
                let ok = call_setter(holder.read_slot(setter_slot), obj, value);
                if ok {
                    self.note_proto_accessor(shape_id, &holder, getter_slot, setter_slot);
                }
                ok
            }
            PropertyLocation::Proto { .. } | PropertyLocation::Absent => {
                if !obj.put(registry, &self.name, value) {
                    return false;
                }
                // The put added an own property; pre-resolve the same
                // transition for the next identically shaped receiver.
                let grown = obj.shape();
                if let Some((entry, _)) = grown.find(&self.name) {
                    if !entry.is_accessor() {
                        self.note_insertion(shape_id, &grown, entry.value_slot);
                    }
                }
                true
            }
        }
    }

    // -------------------------------------------------------------------------
    // Re-priming
    // -------------------------------------------------------------------------

    fn note_direct(&mut self, shape: ShapeId, slot: u16, writable: bool) {
        let old = std::mem::replace(&mut self.state, LookupState::Generic);
        self.state = match old {
            LookupState::Uninitialized | LookupState::Insertion { .. } => LookupState::Direct {
                shape,
                slot,
                writable,
            },
            LookupState::Direct {
                shape: seen,
                slot: seen_slot,
                writable: seen_writable,
            } => {
                if seen == shape {
                    LookupState::Direct {
                        shape,
                        slot,
                        writable,
                    }
                } else {
                    LookupState::DirectTwo {
                        entries: [(seen, seen_slot, seen_writable), (shape, slot, writable)],
                    }
                }
            }
            // Third distinct shape, or a flavor change: megamorphic.
            _ => LookupState::Generic,
        };
    }

    fn note_proto(&mut self, shape: ShapeId, holder: &ObjectRef, slot: u16) {
        let hit = ProtoHit {
            shape,
            holder: holder.downgrade(),
            holder_shape: holder.shape_id(),
            slot,
            generation: proto_generation(),
        };
        let old = std::mem::replace(&mut self.state, LookupState::Generic);
        self.state = match old {
            LookupState::Uninitialized => LookupState::Proto(hit),
            // Same receiver shape means the chain moved under us, not a
            // new polymorphic shape: re-prime in place.
            LookupState::Proto(seen) if seen.shape == shape => LookupState::Proto(hit),
            LookupState::Proto(seen) => LookupState::ProtoTwo {
                entries: [seen, hit],
            },
            LookupState::ProtoTwo { mut entries }
                if entries.iter().any(|e| e.shape == shape) =>
            {
                for entry in entries.iter_mut() {
                    if entry.shape == shape {
                        *entry = hit.clone();
                    }
                }
                LookupState::ProtoTwo { entries }
            }
            _ => LookupState::Generic,
        };
    }

    fn note_accessor(&mut self, shape: ShapeId, getter_slot: u16, setter_slot: u16) {
        let old = std::mem::replace(&mut self.state, LookupState::Generic);
        self.state = match old {
            LookupState::Uninitialized => LookupState::Accessor {
                shape,
                getter_slot,
                setter_slot,
            },
            LookupState::Accessor { shape: seen, .. } if seen == shape => LookupState::Accessor {
                shape,
                getter_slot,
                setter_slot,
            },
            _ => LookupState::Generic,
        };
    }

    fn note_proto_accessor(
        &mut self,
        shape: ShapeId,
        holder: &ObjectRef,
        getter_slot: u16,
        setter_slot: u16,
    ) {
        let primed = LookupState::ProtoAccessor {
            shape,
            holder: holder.downgrade(),
            holder_shape: holder.shape_id(),
            getter_slot,
            setter_slot,
            generation: proto_generation(),
        };
        let old = std::mem::replace(&mut self.state, LookupState::Generic);
        self.state = match old {
            LookupState::Uninitialized => primed,
            LookupState::ProtoAccessor { shape: seen, .. } if seen == shape => primed,
            _ => LookupState::Generic,
        };
    }

    fn note_insertion(&mut self, from: ShapeId, to: &Arc<Shape>, slot: u16) {
        let old = std::mem::replace(&mut self.state, LookupState::Generic);
        self.state = match old {
            LookupState::Uninitialized | LookupState::Insertion { .. } => LookupState::Insertion {
                from,
                to: Arc::downgrade(to),
                slot,
            },
            _ => LookupState::Generic,
        };
    }
}

// =============================================================================
// Tests
// =============================================================================
