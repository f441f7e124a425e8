//! Shape-addressed object storage.
//!
//! A `ShapedObject` holds no layout information of its own: its shape
//! decides which slot index belongs to which property key. The first
//! [`INLINE_SLOT_COUNT`] slots live in a fixed array next to the header
//! for cache locality; the rest spill to a growable overflow block
//! addressed by `slot - INLINE_SLOT_COUNT`.
//!
//! Slot indices are stable across append-only shape transitions. Only the
//! removal path renumbers, and it rewrites storage in the same step.
//!
//! `ObjectRef` is the shared handle the rest of the engine passes around;
//! all mutator-facing operations (`get`, `put`, `define_property`, ...)
//! live on it. Host callbacks (accessor getters and setters) are always
//! invoked with every internal lock released, so a getter may re-enter
//! the object model freely.

use crate::object::shape::{PropertyFlags, Shape, ShapeId, ShapeRegistry};
use crate::value::{FunctionRef, Value};
use lyra_core::InternedString;
use lyra_gc::{GcHooks, Trace, Tracer};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::fmt;
use std::sync::{Arc, Weak};

/// Slots stored directly in the object header.
pub const INLINE_SLOT_COUNT: usize = 4;

// =============================================================================
// Indexed Storage Seam
// =============================================================================

/// Opaque array-element storage attached to an object.
///
/// Element layout is none of this crate's business; the host plugs in
/// whatever representation its arrays use. Named-property resolution
/// never consults it.
pub trait IndexedElements: Send + Sync {
    /// Number of elements.
    fn len(&self) -> usize;

    /// Read one element.
    fn element(&self, index: usize) -> Option<Value>;

    /// Write one element. Returns false if the store was rejected.
    fn set_element(&mut self, index: usize, value: Value) -> bool;
}

// =============================================================================
// ShapedObject
// =============================================================================

/// Per-instance property storage, addressed through the object's shape.
pub struct ShapedObject {
    /// Layout descriptor. Replaced, never mutated, on structural change.
    shape: Arc<Shape>,
    /// First slots, contiguous with the header.
    inline_slots: [Value; INLINE_SLOT_COUNT],
    /// Slots past the inline count, addressed by `slot - INLINE_SLOT_COUNT`.
    overflow: Vec<Value>,
    /// Host-owned array-element storage, opaque here.
    indexed: Option<Box<dyn IndexedElements>>,
}

impl ShapedObject {
    fn new(shape: Arc<Shape>) -> Self {
        Self {
            shape,
            inline_slots: Default::default(),
            overflow: Vec::new(),
            indexed: None,
        }
    }

    /// The object's current shape.
    #[inline]
    pub fn shape(&self) -> &Arc<Shape> {
        &self.shape
    }

    /// Read a slot. Slots never written read as `Undefined`.
    pub fn read_slot(&self, slot: u16) -> Value {
        let slot = slot as usize;
        if slot < INLINE_SLOT_COUNT {
            self.inline_slots[slot].clone()
        } else {
            self.overflow
                .get(slot - INLINE_SLOT_COUNT)
                .cloned()
                .unwrap_or_default()
        }
    }

    /// Write a slot, reporting pointer-bearing values to the barrier.
    pub fn write_slot(&mut self, slot: u16, value: Value, hooks: &GcHooks) {
        hooks.record_store(self as *const Self as *const (), &value);
        let slot = slot as usize;
        if slot < INLINE_SLOT_COUNT {
            self.inline_slots[slot] = value;
        } else {
            let index = slot - INLINE_SLOT_COUNT;
            if index >= self.overflow.len() {
                self.overflow.resize(index + 1, Value::Undefined);
            }
            self.overflow[index] = value;
        }
    }

    /// Swap in a new shape. The shape is itself a heap edge.
    pub(crate) fn replace_shape(&mut self, shape: Arc<Shape>, hooks: &GcHooks) {
        hooks.write_barrier(
            self as *const Self as *const (),
            Arc::as_ptr(&shape) as *const (),
        );
        self.shape = shape;
    }

    /// Reset every slot at or past `size` to `Undefined`; used by the
    /// removal rebuild after renumbering.
    fn truncate_slots(&mut self, size: u16) {
        let size = size as usize;
        for slot in size..INLINE_SLOT_COUNT {
            self.inline_slots[slot] = Value::Undefined;
        }
        self.overflow.truncate(size.saturating_sub(INLINE_SLOT_COUNT));
    }

    /// Attach host array-element storage.
    pub fn set_indexed(&mut self, elements: Box<dyn IndexedElements>) {
        self.indexed = Some(elements);
    }

    /// Host array-element storage, if attached.
    pub fn indexed(&self) -> Option<&dyn IndexedElements> {
        self.indexed.as_deref()
    }

    /// Host array-element storage, mutable.
    pub fn indexed_mut(&mut self) -> Option<&mut (dyn IndexedElements + 'static)> {
        self.indexed.as_deref_mut()
    }
}

impl fmt::Debug for ShapedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapedObject")
            .field("shape", &self.shape.id())
            .field("size", &self.shape.size())
            .field("has_indexed", &self.indexed.is_some())
            .finish()
    }
}

impl Trace for ShapedObject {
    fn trace(&self, tracer: &mut dyn Tracer) {
        use lyra_gc::HeapPtr;
        tracer.mark(Arc::as_ptr(&self.shape) as *const ());
        let size = self.shape.size() as usize;
        for slot in 0..size.min(INLINE_SLOT_COUNT) {
            if let Some(ptr) = self.inline_slots[slot].heap_ptr() {
                tracer.mark(ptr);
            }
        }
        for value in &self.overflow {
            if let Some(ptr) = value.heap_ptr() {
                tracer.mark(ptr);
            }
        }
    }
}

// =============================================================================
// Object Handles
// =============================================================================

/// Shared handle to a [`ShapedObject`].
///
/// Equality and hashing throughout the engine use handle identity
/// (`ptr_eq`), never structure.
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<ShapedObject>>);

/// Non-owning handle; inline caches hold these so a cache never keeps an
/// object alive.
#[derive(Clone)]
pub struct WeakObjectRef(Weak<RwLock<ShapedObject>>);

impl WeakObjectRef {
    /// Reacquire a strong handle if the object is still live.
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }

    /// Identity comparison against a live handle.
    pub fn is(&self, other: &ObjectRef) -> bool {
        Weak::as_ptr(&self.0) == Arc::as_ptr(&other.0)
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObjectRef({:p})", Weak::as_ptr(&self.0))
    }
}

impl ObjectRef {
    /// Allocate an object with the registry's empty shape.
    pub fn new(registry: &ShapeRegistry) -> Self {
        Self(Arc::new(RwLock::new(ShapedObject::new(
            registry.empty_shape(),
        ))))
    }

    /// Allocate an object with a specific starting shape.
    pub fn with_shape(shape: Arc<Shape>) -> Self {
        Self(Arc::new(RwLock::new(ShapedObject::new(shape))))
    }

    /// Handle identity.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the object cell, for GC bookkeeping and identity.
    #[inline]
    pub fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }

    /// Non-owning handle to this object.
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }

    /// The object's current shape.
    pub fn shape(&self) -> Arc<Shape> {
        Arc::clone(self.0.read().shape())
    }

    /// The object's current shape identity.
    #[inline]
    pub fn shape_id(&self) -> ShapeId {
        self.0.read().shape().id()
    }

    /// The object's prototype.
    pub fn prototype(&self) -> Option<ObjectRef> {
        self.0.read().shape().prototype().cloned()
    }

    /// Read a slot directly. The caller is responsible for having
    /// resolved the slot against this object's current shape.
    pub fn read_slot(&self, slot: u16) -> Value {
        self.0.read().read_slot(slot)
    }

    /// Write a slot directly; same contract as [`read_slot`](Self::read_slot).
    pub fn write_slot(&self, slot: u16, value: Value, hooks: &GcHooks) {
        self.0.write().write_slot(slot, value, hooks)
    }

    /// Run `f` against the object's storage under its lock.
    pub fn with<R>(&self, f: impl FnOnce(&ShapedObject) -> R) -> R {
        f(&self.0.read())
    }

    // -------------------------------------------------------------------------
    // Property operations
    // -------------------------------------------------------------------------

    /// Read a property, walking the prototype chain. Accessor getters run
    /// with the original receiver and no lock held.
    pub fn get(&self, key: &InternedString) -> Option<Value> {
        match resolve_property(self, key) {
            PropertyLocation::Own { slot, .. } => Some(self.read_slot(slot)),
            PropertyLocation::OwnAccessor { getter_slot, .. } => {
                Some(call_getter(self.read_slot(getter_slot), self))
            }
            PropertyLocation::Proto { holder, slot, .. } => Some(holder.read_slot(slot)),
            PropertyLocation::ProtoAccessor {
                holder, getter_slot, ..
            } => Some(call_getter(holder.read_slot(getter_slot), self)),
            PropertyLocation::Absent => None,
        }
    }

    /// Write a property.
    ///
    /// An own data property is written in place; an accessor (own or on
    /// the chain) routes through its setter; a data property found only
    /// on the chain is shadowed by a fresh own property. Returns false
    /// when the write is rejected (frozen shape, read-only property,
    /// getter-only accessor, non-extensible addition).
    pub fn put(&self, registry: &ShapeRegistry, key: &InternedString, value: Value) -> bool {
        match resolve_property(self, key) {
            PropertyLocation::Own { slot, attrs } => {
                if self.shape().is_frozen() || !attrs.contains(PropertyFlags::WRITABLE) {
                    return false;
                }
                self.write_slot(slot, value, registry.hooks());
                true
            }
            PropertyLocation::OwnAccessor { setter_slot, .. } => {
                call_setter(self.read_slot(setter_slot), self, value)
            }
            PropertyLocation::ProtoAccessor {
                holder, setter_slot, ..
            } => call_setter(holder.read_slot(setter_slot), self, value),
            PropertyLocation::Proto { attrs, .. } => {
                // A read-only data property on the chain blocks shadowing.
                if !attrs.contains(PropertyFlags::WRITABLE) {
                    return false;
                }
                self.define_property(registry, key.clone(), value, PropertyFlags::default())
            }
            PropertyLocation::Absent => {
                self.define_property(registry, key.clone(), value, PropertyFlags::default())
            }
        }
    }

    /// Define or redefine an own data property with explicit attributes.
    pub fn define_property(
        &self,
        registry: &ShapeRegistry,
        key: InternedString,
        value: Value,
        attrs: PropertyFlags,
    ) -> bool {
        let hooks = registry.hooks();
        let mut obj = self.0.write();
        let existing = obj.shape().find(&key).map(|(e, a)| (e.value_slot, a));
        if let Some((slot, old_attrs)) = existing {
            if old_attrs.is_accessor() != attrs.is_accessor() {
                // Changing property flavor changes the slot layout (an
                // accessor owns two slots), so the entry is removed and
                // rebuilt rather than reattributed in place.
                if !old_attrs.contains(PropertyFlags::CONFIGURABLE) || obj.shape().is_sealed() {
                    return false;
                }
                rebuild_without(&mut obj, registry, &key);
                let grown = registry.add_property(obj.shape(), key.clone(), attrs);
                let slot = match grown.find(&key) {
                    Some((entry, _)) => entry.value_slot,
                    None => return false,
                };
                obj.replace_shape(grown, hooks);
                obj.write_slot(slot, value, hooks);
                return true;
            }
            if old_attrs != attrs {
                if !old_attrs.contains(PropertyFlags::CONFIGURABLE) || obj.shape().is_sealed() {
                    return false;
                }
                let reshaped = registry.change_attributes(obj.shape(), &key, attrs);
                obj.replace_shape(reshaped, hooks);
            } else if obj.shape().is_frozen() {
                return false;
            }
            obj.write_slot(slot, value, hooks);
            return true;
        }
        if !obj.shape().is_extensible() {
            return false;
        }
        let grown = registry.add_property(obj.shape(), key.clone(), attrs);
        let slot = match grown.find(&key) {
            Some((entry, _)) => entry.value_slot,
            None => return false,
        };
        obj.replace_shape(grown, hooks);
        obj.write_slot(slot, value, hooks);
        true
    }

    /// Define an own accessor property. The getter and setter occupy two
    /// adjacent slots; a missing half reads as `Undefined` and rejects
    /// the corresponding access direction. Redefining an existing
    /// configurable property replaces it.
    pub fn define_accessor(
        &self,
        registry: &ShapeRegistry,
        key: InternedString,
        getter: Option<FunctionRef>,
        setter: Option<FunctionRef>,
    ) -> bool {
        let mut attrs = PropertyFlags::ENUMERABLE | PropertyFlags::CONFIGURABLE;
        if getter.is_some() {
            attrs |= PropertyFlags::HAS_GETTER;
        }
        if setter.is_some() {
            attrs |= PropertyFlags::HAS_SETTER;
        }
        let hooks = registry.hooks();
        let mut obj = self.0.write();
        match obj.shape().find(&key).map(|(_, a)| a) {
            Some(old_attrs) => {
                if !old_attrs.contains(PropertyFlags::CONFIGURABLE) || obj.shape().is_sealed() {
                    return false;
                }
                rebuild_without(&mut obj, registry, &key);
            }
            None => {
                if !obj.shape().is_extensible() {
                    return false;
                }
            }
        }
        let grown = registry.add_property(obj.shape(), key.clone(), attrs);
        let (getter_slot, setter_slot) = match grown.find(&key) {
            Some((entry, _)) => (entry.value_slot, entry.setter_slot),
            None => return false,
        };
        obj.replace_shape(grown, hooks);
        let getter_value = getter.map(Value::Function).unwrap_or_default();
        let setter_value = setter.map(Value::Function).unwrap_or_default();
        obj.write_slot(getter_slot, getter_value, hooks);
        obj.write_slot(setter_slot, setter_value, hooks);
        true
    }

    /// Remove an own property. Rebuilds the shape from the survivors and
    /// rewrites storage to the renumbered slots in the same step.
    pub fn remove_property(&self, registry: &ShapeRegistry, key: &InternedString) -> bool {
        let mut obj = self.0.write();
        let attrs = match obj.shape().find(key) {
            Some((_, attrs)) => attrs,
            None => return false,
        };
        if obj.shape().is_sealed() || !attrs.contains(PropertyFlags::CONFIGURABLE) {
            return false;
        }
        rebuild_without(&mut obj, registry, key);
        true
    }

    /// Replace the object's prototype. Rejects prototype cycles. The new
    /// prototype's shape is marked as serving prototype duty.
    pub fn set_prototype(&self, registry: &ShapeRegistry, proto: Option<ObjectRef>) -> bool {
        if let Some(candidate) = &proto {
            let mut cursor = Some(candidate.clone());
            while let Some(link) = cursor {
                if link.ptr_eq(self) {
                    return false;
                }
                cursor = link.prototype();
            }
            let proto_shape = candidate.shape();
            if !proto_shape.is_used_as_proto() {
                let marked = registry.mark_used_as_proto(&proto_shape);
                candidate.0.write().replace_shape(marked, registry.hooks());
            }
        }
        let mut obj = self.0.write();
        let reshaped = registry.change_prototype(obj.shape(), proto);
        obj.replace_shape(reshaped, registry.hooks());
        true
    }

    /// Apply a pre-resolved add transition: swap in the target shape and
    /// write the new slot in one step. Fails if the object moved off the
    /// expected source shape, in which case the caller re-resolves.
    pub(crate) fn apply_insertion(
        &self,
        from: ShapeId,
        to: Arc<Shape>,
        slot: u16,
        value: Value,
        hooks: &GcHooks,
    ) -> bool {
        let mut obj = self.0.write();
        if obj.shape().id() != from {
            return false;
        }
        obj.replace_shape(to, hooks);
        obj.write_slot(slot, value, hooks);
        true
    }

    /// Prevent further property additions.
    pub fn prevent_extensions(&self, registry: &ShapeRegistry) {
        let mut obj = self.0.write();
        let reshaped = registry.prevent_extensions(obj.shape());
        obj.replace_shape(reshaped, registry.hooks());
    }

    /// Seal: no additions, removals, or reconfigurations.
    pub fn seal(&self, registry: &ShapeRegistry) {
        let mut obj = self.0.write();
        let reshaped = registry.seal(obj.shape());
        obj.replace_shape(reshaped, registry.hooks());
    }

    /// Freeze: sealed plus no data writes.
    pub fn freeze(&self, registry: &ShapeRegistry) {
        let mut obj = self.0.write();
        let reshaped = registry.freeze(obj.shape());
        obj.replace_shape(reshaped, registry.hooks());
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p}, {:?})", self.as_ptr(), self.shape_id())
    }
}

/// Drop `key` from the object, rebuilding the shape from the survivors
/// and rewriting storage to the renumbered slots in the same step. The
/// caller holds the object's write lock and has already checked the
/// removal preconditions.
fn rebuild_without(obj: &mut ShapedObject, registry: &ShapeRegistry, key: &InternedString) {
    let hooks = registry.hooks();
    let old_shape = Arc::clone(obj.shape());
    let rebuilt = registry.remove_property(&old_shape, key);

    // Pull every surviving value out of its old slot before the
    // renumbered shape goes live.
    let mut moved: SmallVec<[(u16, Value); 8]> = SmallVec::new();
    for (entry, _) in rebuilt.ordered_properties() {
        if let Some((old_entry, _)) = old_shape.find(&entry.key) {
            moved.push((entry.value_slot, obj.read_slot(old_entry.value_slot)));
            if entry.is_accessor() {
                moved.push((entry.setter_slot, obj.read_slot(old_entry.setter_slot)));
            }
        }
    }
    let size = rebuilt.size();
    obj.replace_shape(rebuilt, hooks);
    obj.truncate_slots(size);
    for (slot, value) in moved {
        obj.write_slot(slot, value, hooks);
    }
}

pub(crate) fn call_getter(getter: Value, receiver: &ObjectRef) -> Value {
    match getter.as_function() {
        Some(f) => f.call(receiver, &[]),
        None => Value::Undefined,
    }
}

pub(crate) fn call_setter(setter: Value, receiver: &ObjectRef, value: Value) -> bool {
    match setter.as_function() {
        Some(f) => {
            f.call(receiver, &[value]);
            true
        }
        None => false,
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Where a property lives relative to a receiver.
#[derive(Debug)]
pub enum PropertyLocation {
    /// Data property on the receiver itself.
    Own { slot: u16, attrs: PropertyFlags },
    /// Accessor pair on the receiver itself.
    OwnAccessor {
        getter_slot: u16,
        setter_slot: u16,
        attrs: PropertyFlags,
    },
    /// Data property on an object along the prototype chain.
    Proto {
        holder: ObjectRef,
        slot: u16,
        attrs: PropertyFlags,
    },
    /// Accessor pair along the prototype chain.
    ProtoAccessor {
        holder: ObjectRef,
        getter_slot: u16,
        setter_slot: u16,
        attrs: PropertyFlags,
    },
    /// Not found on the receiver or its chain.
    Absent,
}

/// Resolve `key` against `obj`'s shape, then its prototype chain.
///
/// The slow path behind every inline-cache miss. Each chain link is
/// inspected under its own lock, released before moving on; no lock is
/// held in the returned location.
pub fn resolve_property(obj: &ObjectRef, key: &InternedString) -> PropertyLocation {
    {
        let guard = obj.0.read();
        if let Some((entry, attrs)) = guard.shape().find(key) {
            return if entry.is_accessor() {
                PropertyLocation::OwnAccessor {
                    getter_slot: entry.value_slot,
                    setter_slot: entry.setter_slot,
                    attrs,
                }
            } else {
                PropertyLocation::Own {
                    slot: entry.value_slot,
                    attrs,
                }
            };
        }
    }
    let mut cursor = obj.prototype();
    while let Some(holder) = cursor {
        let found = {
            let guard = holder.0.read();
            guard
                .shape()
                .find(key)
                .map(|(entry, attrs)| (entry.clone(), attrs))
        };
        if let Some((entry, attrs)) = found {
            return if entry.is_accessor() {
                PropertyLocation::ProtoAccessor {
                    holder,
                    getter_slot: entry.value_slot,
                    setter_slot: entry.setter_slot,
                    attrs,
                }
            } else {
                PropertyLocation::Proto {
                    holder,
                    slot: entry.value_slot,
                    attrs,
                }
            };
        }
        cursor = holder.prototype();
    }
    PropertyLocation::Absent
}

// =============================================================================
// Tests
// =============================================================================
