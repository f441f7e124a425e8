//! Shape system for hidden class optimization.
//!
//! Implements V8-style hidden classes (called Shapes) for O(1) property
//! access. Objects with the same sequence of property definitions share a
//! Shape. Each Shape describes the complete slot layout of its objects,
//! enabling inline caching keyed on shape identity.
//!
//! # Shape Transitions
//!
//! A structural edit never mutates a shape. It consults the shape's
//! transition table and either reuses a memoized child or builds a new
//! one, extending the copy-on-write metadata arrays by one slot. Shapes
//! form a transition tree:
//!
//! ```text
//!     EmptyShape
//!         |
//!     +---+---+
//!     |       |
//!   "x"     "y"
//!     |       |
//!  Shape1  Shape2
//!     |
//!   "y"
//!     |
//!  Shape3 (has both x and y)
//! ```
//!
//! ## Saturation
//!
//! A shape that accumulates more transition edges than the registry's
//! configured limit stops memoizing: further children belong to an
//! uncached "generic" family, trading cache-hit rate for bounded memory.
//!
//! ## Removal
//!
//! Property removal is assumed rare and is not a memoized transition: it
//! rebuilds a fresh shape from the surviving ordered property list and
//! renumbers slots. Re-adding the removed property does not reconverge to
//! the pre-removal shape identity.
//!
//! ## Prototypes
//!
//! A shape holds its objects' prototype. Prototype replacement takes a
//! dedicated non-memoized path and bumps a process-wide generation
//! counter, which forces every prototype-relative inline cache to
//! revalidate on its next access.

use crate::object::property_table::{PropertyEntry, PropertyTable};
use crate::object::shaped_object::ObjectRef;
use crate::object::slot_data::SlotData;
use lyra_core::InternedString;
use lyra_gc::{GcHooks, HeapPtr, Trace, Tracer};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

// =============================================================================
// Property Attributes
// =============================================================================

bitflags::bitflags! {
    /// Property descriptor attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u8 {
        /// Property value can be changed.
        const WRITABLE = 1 << 0;
        /// Property appears in enumeration.
        const ENUMERABLE = 1 << 1;
        /// Property can be deleted or have attributes changed.
        const CONFIGURABLE = 1 << 2;
        /// Property is a data property (vs accessor).
        const DATA = 1 << 3;
        /// Property has a getter.
        const HAS_GETTER = 1 << 4;
        /// Property has a setter.
        const HAS_SETTER = 1 << 5;
    }
}

impl Default for PropertyFlags {
    /// Default attributes: writable, enumerable, configurable, data.
    #[inline]
    fn default() -> Self {
        Self::WRITABLE | Self::ENUMERABLE | Self::CONFIGURABLE | Self::DATA
    }
}

impl PropertyFlags {
    /// Read-only data property.
    #[inline]
    pub const fn read_only() -> Self {
        Self::ENUMERABLE.union(Self::CONFIGURABLE).union(Self::DATA)
    }

    /// Accessor property with both getter and setter.
    #[inline]
    pub const fn accessor() -> Self {
        Self::HAS_GETTER
            .union(Self::HAS_SETTER)
            .union(Self::ENUMERABLE)
            .union(Self::CONFIGURABLE)
    }

    /// Whether these attributes describe an accessor property.
    #[inline]
    pub fn is_accessor(&self) -> bool {
        self.intersects(Self::HAS_GETTER | Self::HAS_SETTER)
    }
}

/// Attribute bits are plain data; the barrier never fires for them.
impl HeapPtr for PropertyFlags {
    #[inline]
    fn heap_ptr(&self) -> Option<*const ()> {
        None
    }
}

// =============================================================================
// Shape Flags
// =============================================================================

bitflags::bitflags! {
    /// Whole-shape state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShapeFlags: u8 {
        /// No new properties may be added to objects of this shape.
        const NOT_EXTENSIBLE = 1 << 0;
        /// Not extensible and no property may be removed or reconfigured.
        const SEALED = 1 << 1;
        /// Sealed and no data property may be written.
        const FROZEN = 1 << 2;
        /// Some object of this shape serves as a prototype.
        const USED_AS_PROTO = 1 << 3;
        /// Member of the uncached shape family; transitions from this
        /// shape are never memoized.
        const GENERIC = 1 << 4;
    }
}

impl ShapeFlags {
    /// Flags a child shape inherits from its parent. `USED_AS_PROTO` is a
    /// per-shape marker and stays behind.
    #[inline]
    fn inherited(self) -> Self {
        self & !Self::USED_AS_PROTO
    }
}

// =============================================================================
// Shape Identity
// =============================================================================

/// Compact shape identity, the comparison key of every inline cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(u32);

impl ShapeId {
    /// Identity of a registry's empty shape.
    pub const EMPTY: ShapeId = ShapeId(0);

    /// Raw numeric identity.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

// =============================================================================
// Prototype Generation
// =============================================================================

/// Bumped whenever any shape changes its prototype. Prototype-relative
/// cache states remember the generation they resolved under and
/// revalidate when it moves.
static PROTO_GENERATION: AtomicU64 = AtomicU64::new(0);

/// Current process-wide prototype generation.
#[inline]
pub fn proto_generation() -> u64 {
    PROTO_GENERATION.load(Ordering::Acquire)
}

#[inline]
fn bump_proto_generation() {
    PROTO_GENERATION.fetch_add(1, Ordering::AcqRel);
}

// =============================================================================
// Transitions
// =============================================================================

/// Key of one memoized edge in the transition tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TransitionKey {
    /// Property addition with these attributes.
    Add(InternedString, PropertyFlags),
    /// Attribute change of an existing property.
    Reconfigure(InternedString, PropertyFlags),
    /// `prevent_extensions` derivation.
    PreventExtensions,
    /// `seal` derivation.
    Seal,
    /// `freeze` derivation.
    Freeze,
    /// `USED_AS_PROTO` marking.
    UsedAsProto,
}

// =============================================================================
// Shape
// =============================================================================

/// A hidden class: immutable descriptor of an object's property layout.
///
/// The only interior mutability is the transition table, which memoizes
/// structural edits. Everything else is fixed at construction; edits
/// produce child shapes.
pub struct Shape {
    /// Registry-unique identity.
    id: ShapeId,
    /// Whole-shape state bits.
    flags: ShapeFlags,
    /// Occupied slot count. No key maps to a slot index at or past it.
    size: u16,
    /// Per-slot interned keys, shared copy-on-write with related shapes.
    /// An accessor's setter slot repeats the key.
    keys: SlotData<InternedString>,
    /// Per-slot attributes. An accessor's setter slot holds an empty
    /// placeholder, which enumeration skips.
    attrs: SlotData<PropertyFlags>,
    /// Key → slot table for this shape.
    table: PropertyTable,
    /// Shape this one was derived from. Removal rebuilds have no parent.
    parent: Option<Arc<Shape>>,
    /// Prototype of objects carrying this shape.
    prototype: Option<ObjectRef>,
    /// Memoized structural edits. Children publish here only after full
    /// construction.
    transitions: RwLock<FxHashMap<TransitionKey, Arc<Shape>>>,
}

impl Shape {
    /// Shape identity.
    #[inline]
    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Whole-shape state bits.
    #[inline]
    pub fn flags(&self) -> ShapeFlags {
        self.flags
    }

    /// Occupied slot count.
    #[inline]
    pub fn size(&self) -> u16 {
        self.size
    }

    /// Parent in the transition tree.
    #[inline]
    pub fn parent(&self) -> Option<&Arc<Shape>> {
        self.parent.as_ref()
    }

    /// Prototype of objects carrying this shape.
    #[inline]
    pub fn prototype(&self) -> Option<&ObjectRef> {
        self.prototype.as_ref()
    }

    /// Whether objects of this shape accept new properties.
    #[inline]
    pub fn is_extensible(&self) -> bool {
        !self.flags.contains(ShapeFlags::NOT_EXTENSIBLE)
    }

    /// Whether this shape is sealed.
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.flags.contains(ShapeFlags::SEALED)
    }

    /// Whether this shape is frozen.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.flags.contains(ShapeFlags::FROZEN)
    }

    /// Whether this shape belongs to the uncached family.
    #[inline]
    pub fn is_generic(&self) -> bool {
        self.flags.contains(ShapeFlags::GENERIC)
    }

    /// Whether some object of this shape serves as a prototype.
    #[inline]
    pub fn is_used_as_proto(&self) -> bool {
        self.flags.contains(ShapeFlags::USED_AS_PROTO)
    }

    /// Look up a property. O(1), no allocation.
    #[inline]
    pub fn find(&self, key: &InternedString) -> Option<(&PropertyEntry, PropertyFlags)> {
        let entry = self.table.find(key)?;
        Some((entry, *self.attrs.at(entry.value_slot as usize)))
    }

    /// Key stored at a slot.
    #[inline]
    pub fn key_at(&self, slot: u16) -> &InternedString {
        self.keys.at(slot as usize)
    }

    /// Attributes stored at a slot.
    #[inline]
    pub fn attributes_at(&self, slot: u16) -> PropertyFlags {
        *self.attrs.at(slot as usize)
    }

    /// Live properties ordered by value slot. Accessor setter-slot
    /// placeholders are not separate properties and are skipped.
    pub fn ordered_properties(&self) -> Vec<(PropertyEntry, PropertyFlags)> {
        let mut props: Vec<_> = self
            .table
            .iter()
            .map(|e| (e.clone(), *self.attrs.at(e.value_slot as usize)))
            .collect();
        props.sort_by_key(|(e, _)| e.value_slot);
        props
    }

    /// Number of memoized transition edges on this shape.
    pub fn transition_count(&self) -> usize {
        self.transitions
            .read()
            .expect("transition table lock poisoned")
            .len()
    }

    fn get_transition(&self, key: &TransitionKey) -> Option<Arc<Shape>> {
        self.transitions
            .read()
            .expect("transition table lock poisoned")
            .get(key)
            .cloned()
    }

    /// Publish a fully built child. If another mutator raced us to the
    /// same edge, their child wins and ours is dropped.
    fn publish_transition(&self, key: TransitionKey, child: Arc<Shape>) -> Arc<Shape> {
        let mut table = self
            .transitions
            .write()
            .expect("transition table lock poisoned");
        table.entry(key).or_insert(child).clone()
    }

    /// Internal access for the storage layer.
    pub(crate) fn slot_keys(&self) -> &SlotData<InternedString> {
        &self.keys
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id.raw())
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("transitions", &self.transition_count())
            .finish()
    }
}

impl Trace for Shape {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(proto) = &self.prototype {
            tracer.mark(proto.as_ptr());
        }
        if let Some(parent) = &self.parent {
            tracer.mark(Arc::as_ptr(parent) as *const ());
        }
        tracer.mark(self.keys.buffer_ptr());
        tracer.mark(self.attrs.buffer_ptr());
        for key in self.keys.iter() {
            tracer.mark(key.as_ptr() as *const ());
        }
        let transitions = self
            .transitions
            .read()
            .expect("transition table lock poisoned");
        for child in transitions.values() {
            tracer.mark(Arc::as_ptr(child) as *const ());
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Tuning knobs for a [`ShapeRegistry`].
#[derive(Debug, Clone)]
pub struct ShapeConfig {
    /// Memoized transition edges allowed per shape before additions
    /// route through the uncached generic family.
    pub transition_limit: usize,
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            transition_limit: 64,
        }
    }
}

// =============================================================================
// Registry Statistics
// =============================================================================

/// Registry activity counters.
#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
    /// Shapes allocated, the empty shape included.
    pub shapes: u32,
    /// Structural edits answered from a transition table.
    pub transition_hits: u64,
    /// Structural edits that built a new shape.
    pub transition_misses: u64,
}

// =============================================================================
// Shape Registry
// =============================================================================

/// Allocates shape identities and performs every structural edit.
///
/// One registry per engine instance. The registry owns the GC hook seam:
/// all metadata stores it performs report through the same [`GcHooks`]
/// the object storage layer uses.
pub struct ShapeRegistry {
    next_id: AtomicU32,
    empty_shape: Arc<Shape>,
    config: ShapeConfig,
    hooks: Arc<GcHooks>,
    transition_hits: AtomicU64,
    transition_misses: AtomicU64,
}

impl ShapeRegistry {
    /// Registry with default configuration and unattached GC hooks.
    pub fn new() -> Self {
        Self::with_hooks(ShapeConfig::default(), Arc::new(GcHooks::new()))
    }

    /// Registry with a custom configuration.
    pub fn with_config(config: ShapeConfig) -> Self {
        Self::with_hooks(config, Arc::new(GcHooks::new()))
    }

    /// Registry sharing the host collector's hook seam.
    pub fn with_hooks(config: ShapeConfig, hooks: Arc<GcHooks>) -> Self {
        let empty_shape = Arc::new(Shape {
            id: ShapeId::EMPTY,
            flags: ShapeFlags::empty(),
            size: 0,
            keys: SlotData::new(),
            attrs: SlotData::new(),
            table: PropertyTable::new(),
            parent: None,
            prototype: None,
            transitions: RwLock::new(FxHashMap::default()),
        });
        Self {
            next_id: AtomicU32::new(1),
            empty_shape,
            config,
            hooks,
            transition_hits: AtomicU64::new(0),
            transition_misses: AtomicU64::new(0),
        }
    }

    /// The GC hook seam shared by this registry and its objects.
    #[inline]
    pub fn hooks(&self) -> &Arc<GcHooks> {
        &self.hooks
    }

    /// Registry configuration.
    #[inline]
    pub fn config(&self) -> &ShapeConfig {
        &self.config
    }

    /// The root shape every object starts from.
    #[inline]
    pub fn empty_shape(&self) -> Arc<Shape> {
        Arc::clone(&self.empty_shape)
    }

    /// Total shapes allocated, the empty shape included.
    pub fn shape_count(&self) -> u32 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Activity counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            shapes: self.shape_count(),
            transition_hits: self.transition_hits.load(Ordering::Relaxed),
            transition_misses: self.transition_misses.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn next_id(&self) -> ShapeId {
        ShapeId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    fn hit(&self) {
        self.transition_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn miss(&self) {
        self.transition_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Derive the shape with `key` added under `attrs`.
    ///
    /// Memoized through the transition table unless the parent is part of
    /// the generic family or its table is saturated. Accessor attributes
    /// reserve two slots: the getter slot and the setter slot.
    ///
    /// Adding a key the shape already has is a programmer error.
    pub fn add_property(
        &self,
        shape: &Arc<Shape>,
        key: InternedString,
        attrs: PropertyFlags,
    ) -> Arc<Shape> {
        debug_assert!(
            shape.find(&key).is_none(),
            "duplicate property key {key:?}"
        );
        let edge = TransitionKey::Add(key.clone(), attrs);
        if !shape.is_generic() {
            if let Some(child) = shape.get_transition(&edge) {
                self.hit();
                return child;
            }
        }
        self.miss();
        let saturated =
            shape.is_generic() || shape.transition_count() >= self.config.transition_limit;
        let child = self.build_added(shape, key, attrs, saturated);
        if saturated {
            child
        } else {
            shape.publish_transition(edge, child)
        }
    }

    fn build_added(
        &self,
        parent: &Arc<Shape>,
        key: InternedString,
        attrs: PropertyFlags,
        generic: bool,
    ) -> Arc<Shape> {
        let mut keys = parent.keys.clone();
        let mut attr_data = parent.attrs.clone();
        let mut table = parent.table.clone();
        let slot = parent.size;

        keys.push(key.clone(), &self.hooks);
        attr_data.push(attrs, &self.hooks);
        let size = if attrs.is_accessor() {
            // Setter slot: same key, placeholder attributes.
            keys.push(key.clone(), &self.hooks);
            attr_data.push(PropertyFlags::empty(), &self.hooks);
            table.insert(PropertyEntry::accessor(key, slot, slot + 1));
            parent.size + 2
        } else {
            table.insert(PropertyEntry::data(key, slot));
            parent.size + 1
        };

        let mut flags = parent.flags.inherited();
        if generic {
            flags |= ShapeFlags::GENERIC;
        }
        Arc::new(Shape {
            id: self.next_id(),
            flags,
            size,
            keys,
            attrs: attr_data,
            table,
            parent: Some(Arc::clone(parent)),
            prototype: parent.prototype.clone(),
            transitions: RwLock::new(FxHashMap::default()),
        })
    }

    /// Derive the shape with `key`'s attributes replaced. Memoized; slots
    /// are not renumbered. The key must be present.
    pub fn change_attributes(
        &self,
        shape: &Arc<Shape>,
        key: &InternedString,
        attrs: PropertyFlags,
    ) -> Arc<Shape> {
        let slot = match shape.find(key) {
            Some((entry, old)) => {
                if old == attrs {
                    return Arc::clone(shape);
                }
                entry.value_slot
            }
            None => {
                debug_assert!(false, "change_attributes on absent key {key:?}");
                return Arc::clone(shape);
            }
        };
        let edge = TransitionKey::Reconfigure(key.clone(), attrs);
        if !shape.is_generic() {
            if let Some(child) = shape.get_transition(&edge) {
                self.hit();
                return child;
            }
        }
        self.miss();

        let mut attr_data = shape.attrs.clone();
        attr_data.set(slot as usize, attrs, &self.hooks);
        let child = Arc::new(Shape {
            id: self.next_id(),
            flags: shape.flags.inherited(),
            size: shape.size,
            keys: shape.keys.clone(),
            attrs: attr_data,
            table: shape.table.clone(),
            parent: Some(Arc::clone(shape)),
            prototype: shape.prototype.clone(),
            transitions: RwLock::new(FxHashMap::default()),
        });
        if shape.is_generic() {
            child
        } else {
            shape.publish_transition(edge, child)
        }
    }

    /// Derive the shape with `key` removed.
    ///
    /// Not memoized: rebuilds a fresh shape from the surviving ordered
    /// property list, renumbering slots. The result has no transition
    /// parent and is not guaranteed to reconverge with any prior shape,
    /// even if the property set matches one seen before.
    pub fn remove_property(&self, shape: &Arc<Shape>, key: &InternedString) -> Arc<Shape> {
        debug_assert!(
            shape.find(key).is_some(),
            "remove_property on absent key {key:?}"
        );
        let mut keys = SlotData::new();
        let mut attr_data = SlotData::new();
        let mut table = PropertyTable::with_capacity(shape.table.len().saturating_sub(1));
        let mut size: u16 = 0;

        for (entry, attrs) in shape.ordered_properties() {
            if entry.key == *key {
                continue;
            }
            let slot = size;
            keys.push(entry.key.clone(), &self.hooks);
            attr_data.push(attrs, &self.hooks);
            if entry.is_accessor() {
                keys.push(entry.key.clone(), &self.hooks);
                attr_data.push(PropertyFlags::empty(), &self.hooks);
                table.insert(PropertyEntry::accessor(entry.key, slot, slot + 1));
                size += 2;
            } else {
                table.insert(PropertyEntry::data(entry.key, slot));
                size += 1;
            }
        }

        Arc::new(Shape {
            id: self.next_id(),
            flags: shape.flags.inherited(),
            size,
            keys,
            attrs: attr_data,
            table,
            parent: None,
            prototype: shape.prototype.clone(),
            transitions: RwLock::new(FxHashMap::default()),
        })
    }

    /// Derived shape with extensions prevented.
    pub fn prevent_extensions(&self, shape: &Arc<Shape>) -> Arc<Shape> {
        self.derive_flagged(
            shape,
            TransitionKey::PreventExtensions,
            ShapeFlags::NOT_EXTENSIBLE,
        )
    }

    /// Derived sealed shape.
    pub fn seal(&self, shape: &Arc<Shape>) -> Arc<Shape> {
        self.derive_flagged(
            shape,
            TransitionKey::Seal,
            ShapeFlags::SEALED | ShapeFlags::NOT_EXTENSIBLE,
        )
    }

    /// Derived frozen shape.
    pub fn freeze(&self, shape: &Arc<Shape>) -> Arc<Shape> {
        self.derive_flagged(
            shape,
            TransitionKey::Freeze,
            ShapeFlags::FROZEN | ShapeFlags::SEALED | ShapeFlags::NOT_EXTENSIBLE,
        )
    }

    /// Derived shape marked as serving prototype duty.
    pub fn mark_used_as_proto(&self, shape: &Arc<Shape>) -> Arc<Shape> {
        self.derive_flagged(shape, TransitionKey::UsedAsProto, ShapeFlags::USED_AS_PROTO)
    }

    /// Memoized flag-only derivation sharing all slot data.
    fn derive_flagged(
        &self,
        shape: &Arc<Shape>,
        edge: TransitionKey,
        add: ShapeFlags,
    ) -> Arc<Shape> {
        if shape.flags.contains(add) {
            return Arc::clone(shape);
        }
        if !shape.is_generic() {
            if let Some(child) = shape.get_transition(&edge) {
                self.hit();
                return child;
            }
        }
        self.miss();
        let child = Arc::new(Shape {
            id: self.next_id(),
            flags: shape.flags | add,
            size: shape.size,
            keys: shape.keys.clone(),
            attrs: shape.attrs.clone(),
            table: shape.table.clone(),
            parent: Some(Arc::clone(shape)),
            prototype: shape.prototype.clone(),
            transitions: RwLock::new(FxHashMap::default()),
        });
        if shape.is_generic() {
            child
        } else {
            shape.publish_transition(edge, child)
        }
    }

    /// Derived shape with the prototype replaced.
    ///
    /// Dedicated non-memoized path; bumps the process-wide prototype
    /// generation so prototype-relative caches revalidate.
    pub fn change_prototype(&self, shape: &Arc<Shape>, proto: Option<ObjectRef>) -> Arc<Shape> {
        self.miss();
        let child = Arc::new(Shape {
            id: self.next_id(),
            flags: shape.flags.inherited(),
            size: shape.size,
            keys: shape.keys.clone(),
            attrs: shape.attrs.clone(),
            table: shape.table.clone(),
            parent: Some(Arc::clone(shape)),
            prototype: proto,
            transitions: RwLock::new(FxHashMap::default()),
        });
        if let Some(proto) = child.prototype() {
            self.hooks
                .write_barrier(Arc::as_ptr(&child) as *const (), proto.as_ptr());
        }
        bump_proto_generation();
        child
    }
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShapeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeRegistry")
            .field("shapes", &self.shape_count())
            .field("config", &self.config)
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
    use lyra_gc::CountingTracer;

    fn registry() -> ShapeRegistry {
        ShapeRegistry::new()
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    #[test]
    fn test_property_flags_default() {
        let flags = PropertyFlags::default();
        assert!(flags.contains(PropertyFlags::WRITABLE));
        assert!(flags.contains(PropertyFlags::ENUMERABLE));
        assert!(flags.contains(PropertyFlags::CONFIGURABLE));
        assert!(flags.contains(PropertyFlags::DATA));
        assert!(!flags.is_accessor());
    }

    #[test]
    fn test_property_flags_accessor() {
        let flags = PropertyFlags::accessor();
        assert!(flags.is_accessor());
        assert!(!flags.contains(PropertyFlags::DATA));
    }

    // -------------------------------------------------------------------------
    // Basic transitions
    // -------------------------------------------------------------------------

    #[test]
    fn test_empty_shape_finds_nothing() {
        let reg = registry();
        let empty = reg.empty_shape();
        assert_eq!(empty.id(), ShapeId::EMPTY);
        assert_eq!(empty.size(), 0);
        assert!(empty.find(&intern("x")).is_none());
    }

    #[test]
    fn test_add_property_assigns_next_slot() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let s1 = reg.add_property(&s0, intern("x"), PropertyFlags::default());
        let s2 = reg.add_property(&s1, intern("y"), PropertyFlags::default());

        assert_eq!(s1.size(), 1);
        assert_eq!(s2.size(), 2);

        let (x, x_attrs) = s2.find(&intern("x")).unwrap();
        let (y, _) = s2.find(&intern("y")).unwrap();
        assert_eq!(x.value_slot, 0);
        assert_eq!(y.value_slot, 1);
        assert!(x.value_slot < s2.size());
        assert_eq!(x_attrs, PropertyFlags::default());
    }

    #[test]
    fn test_structural_sharing() {
        let reg = registry();
        let s0 = reg.empty_shape();

        let a1 = reg.add_property(&s0, intern("x"), PropertyFlags::default());
        let a2 = reg.add_property(&a1, intern("y"), PropertyFlags::default());

        let b1 = reg.add_property(&s0, intern("x"), PropertyFlags::default());
        let b2 = reg.add_property(&b1, intern("y"), PropertyFlags::default());

        // Identical histories reuse the identical shape instances.
        assert!(Arc::ptr_eq(&a1, &b1));
        assert!(Arc::ptr_eq(&a2, &b2));
        assert_eq!(reg.stats().transition_hits, 2);
        assert_eq!(reg.stats().transition_misses, 2);
    }

    #[test]
    fn test_different_attrs_are_different_edges() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let a = reg.add_property(&s0, intern("x"), PropertyFlags::default());
        let b = reg.add_property(&s0, intern("x"), PropertyFlags::read_only());
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_sibling_shapes_have_isolated_metadata() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let s1 = reg.add_property(&s0, intern("x"), PropertyFlags::default());
        let s2 = reg.add_property(&s1, intern("y"), PropertyFlags::default());

        // Each append detaches from the still-live parent buffer, so a
        // sibling never observes the other branch's key.
        let sibling = reg.add_property(&s1, intern("z"), PropertyFlags::default());
        assert!(!sibling.slot_keys().shares_buffer_with(s2.slot_keys()));
        assert_eq!(*s2.key_at(0), intern("x"));
        assert_eq!(*s2.key_at(1), intern("y"));
        assert_eq!(*sibling.key_at(1), intern("z"));
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[test]
    fn test_accessor_reserves_two_slots() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let s1 = reg.add_property(&s0, intern("prop"), PropertyFlags::accessor());

        assert_eq!(s1.size(), 2);
        let (entry, attrs) = s1.find(&intern("prop")).unwrap();
        assert!(entry.is_accessor());
        assert_eq!(entry.value_slot, 0);
        assert_eq!(entry.setter_slot, 1);
        assert!(attrs.is_accessor());
        // Placeholder attrs on the setter slot.
        assert_eq!(s1.attributes_at(1), PropertyFlags::empty());
    }

    #[test]
    fn test_ordered_properties_skip_setter_slots() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let s1 = reg.add_property(&s0, intern("a"), PropertyFlags::default());
        let s2 = reg.add_property(&s1, intern("acc"), PropertyFlags::accessor());
        let s3 = reg.add_property(&s2, intern("b"), PropertyFlags::default());

        let props = s3.ordered_properties();
        let names: Vec<_> = props.iter().map(|(e, _)| e.key.as_str().to_owned()).collect();
        assert_eq!(names, ["a", "acc", "b"]);
        assert_eq!(props[2].0.value_slot, 3);
    }

    // -------------------------------------------------------------------------
    // Reconfiguration
    // -------------------------------------------------------------------------

    #[test]
    fn test_change_attributes_memoized_no_new_slot() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let s1 = reg.add_property(&s0, intern("x"), PropertyFlags::default());

        let a = reg.change_attributes(&s1, &intern("x"), PropertyFlags::read_only());
        let b = reg.change_attributes(&s1, &intern("x"), PropertyFlags::read_only());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.size(), s1.size());
        let (entry, attrs) = a.find(&intern("x")).unwrap();
        assert_eq!(entry.value_slot, 0);
        assert_eq!(attrs, PropertyFlags::read_only());
        // Original shape untouched.
        assert_eq!(s1.find(&intern("x")).unwrap().1, PropertyFlags::default());
    }

    #[test]
    fn test_change_attributes_same_attrs_is_identity() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let s1 = reg.add_property(&s0, intern("x"), PropertyFlags::default());
        let same = reg.change_attributes(&s1, &intern("x"), PropertyFlags::default());
        assert!(Arc::ptr_eq(&s1, &same));
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    #[test]
    fn test_remove_renumbers_slots() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let s1 = reg.add_property(&s0, intern("a"), PropertyFlags::default());
        let s2 = reg.add_property(&s1, intern("b"), PropertyFlags::default());
        let s3 = reg.add_property(&s2, intern("c"), PropertyFlags::default());

        let removed = reg.remove_property(&s3, &intern("b"));
        assert_eq!(removed.size(), 2);
        assert!(removed.find(&intern("b")).is_none());
        assert_eq!(removed.find(&intern("a")).unwrap().0.value_slot, 0);
        assert_eq!(removed.find(&intern("c")).unwrap().0.value_slot, 1);
        assert!(removed.parent().is_none());
    }

    #[test]
    fn test_remove_then_readd_does_not_reconverge() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let s1 = reg.add_property(&s0, intern("x"), PropertyFlags::default());
        let s2 = reg.add_property(&s1, intern("y"), PropertyFlags::default());

        let without_y = reg.remove_property(&s2, &intern("y"));
        let readded = reg.add_property(&without_y, intern("y"), PropertyFlags::default());

        // Same property set, different identity: removal is a fresh
        // rebuild, not a walk back up the transition tree.
        assert!(!Arc::ptr_eq(&readded, &s2));
        assert_eq!(readded.find(&intern("y")).unwrap().0.value_slot, 1);
    }

    // -------------------------------------------------------------------------
    // Seal / freeze / extensions
    // -------------------------------------------------------------------------

    #[test]
    fn test_seal_freeze_flags_memoized() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let s1 = reg.add_property(&s0, intern("x"), PropertyFlags::default());

        let sealed = reg.seal(&s1);
        assert!(sealed.is_sealed());
        assert!(!sealed.is_extensible());
        assert!(!sealed.is_frozen());
        assert!(Arc::ptr_eq(&sealed, &reg.seal(&s1)));
        // Slot data shared wholesale.
        assert!(sealed.slot_keys().shares_buffer_with(s1.slot_keys()));

        let frozen = reg.freeze(&s1);
        assert!(frozen.is_frozen());
        assert!(frozen.is_sealed());

        // Already-flagged shapes derive to themselves.
        assert!(Arc::ptr_eq(&frozen, &reg.freeze(&frozen)));
    }

    #[test]
    fn test_prevent_extensions() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let ne = reg.prevent_extensions(&s0);
        assert!(!ne.is_extensible());
        assert!(!ne.is_sealed());
    }

    #[test]
    fn test_used_as_proto_not_inherited() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let proto_shape = reg.mark_used_as_proto(&s0);
        assert!(proto_shape.is_used_as_proto());

        let child = reg.add_property(&proto_shape, intern("x"), PropertyFlags::default());
        assert!(!child.is_used_as_proto());
    }

    // -------------------------------------------------------------------------
    // Prototype changes
    // -------------------------------------------------------------------------

    #[test]
    fn test_change_prototype_bumps_generation() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let before = proto_generation();

        let a = reg.change_prototype(&s0, None);
        let b = reg.change_prototype(&s0, None);

        // Dedicated path: never memoized, always bumps.
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(proto_generation() >= before + 2);
    }

    // -------------------------------------------------------------------------
    // Saturation
    // -------------------------------------------------------------------------

    #[test]
    fn test_saturation_routes_to_generic_family() {
        let reg = ShapeRegistry::with_config(ShapeConfig {
            transition_limit: 4,
        });
        let s0 = reg.empty_shape();
        for i in 0..4 {
            reg.add_property(&s0, intern(&format!("memo{i}")), PropertyFlags::default());
        }
        assert_eq!(s0.transition_count(), 4);

        // Past the limit: children are generic and unmemoized.
        let g1 = reg.add_property(&s0, intern("over"), PropertyFlags::default());
        let g2 = reg.add_property(&s0, intern("over"), PropertyFlags::default());
        assert!(g1.is_generic());
        assert!(!Arc::ptr_eq(&g1, &g2));
        assert_eq!(s0.transition_count(), 4);

        // Generic is sticky: descendants stay uncached and correct.
        let g3 = reg.add_property(&g1, intern("more"), PropertyFlags::default());
        assert!(g3.is_generic());
        assert_eq!(g3.find(&intern("more")).unwrap().0.value_slot, 1);
        assert_eq!(g1.transition_count(), 0);
    }

    // -------------------------------------------------------------------------
    // Tracing
    // -------------------------------------------------------------------------

    #[test]
    fn test_trace_reaches_shape_edges() {
        let reg = registry();
        let s0 = reg.empty_shape();
        let key = intern("traced");
        let s1 = reg.add_property(&s0, key.clone(), PropertyFlags::default());

        let mut tracer = CountingTracer::new();
        s1.trace(&mut tracer);
        assert!(tracer.saw(Arc::as_ptr(&s0) as *const ()));
        assert!(tracer.saw(key.as_ptr() as *const ()));
        assert!(tracer.saw(s1.slot_keys().buffer_ptr()));

        let mut parent_tracer = CountingTracer::new();
        s0.trace(&mut parent_tracer);
        assert!(parent_tracer.saw(Arc::as_ptr(&s1) as *const ()));
    }
}
