//! Shape-based object model for a dynamically-typed scripting engine.
//!
//! This crate provides:
//! - Dynamic values (`Value`) and host function references
//! - Hidden classes (`Shape`) with memoized transitions
//! - Per-shape open-addressing property tables
//! - Copy-on-write shared slot metadata (`SlotData`)
//! - Shape-addressed object storage (`ShapedObject`, `ObjectRef`)
//! - Per-call-site inline caches (`Lookup`)
//!
//! # Architecture
//!
//! Objects with the same sequence of property definitions share a `Shape`.
//! A property access resolves `name → slot` through the object's shape once,
//! then an inline cache bound to the access site replays the resolved slot
//! for as long as the observed shape identity stays stable:
//!
//! ```text
//!   access site ── Lookup ── shape id match? ──► direct slot read   O(1)
//!                     │
//!                     └─ mismatch ──► Shape → PropertyTable → proto chain
//!                                     (then re-prime the cache)
//! ```
//!
//! Structural edits (add / reconfigure / seal / prototype change) never
//! mutate a shape; they produce or reuse a child shape, sharing slot
//! metadata copy-on-write through `SlotData`.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod object;
pub mod value;

pub use object::lookup::{Lookup, LookupStateKind, NativeAccessor};
pub use object::property_table::{PropertyEntry, PropertyTable, NO_SLOT};
pub use object::shape::{
    proto_generation, PropertyFlags, RegistryStats, Shape, ShapeConfig, ShapeFlags, ShapeId,
    ShapeRegistry,
};
pub use object::shaped_object::{
    resolve_property, IndexedElements, ObjectRef, PropertyLocation, ShapedObject, WeakObjectRef,
    INLINE_SLOT_COUNT,
};
pub use object::slot_data::SlotData;
pub use value::{FunctionRef, Value};
