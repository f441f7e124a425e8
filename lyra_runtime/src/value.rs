//! Dynamic values stored in object slots.
//!
//! `Value` is the slot payload of the object model. It is deliberately a
//! plain enum rather than a NaN-boxed word: this crate specifies layout
//! through shapes and caches, not through value packing, and an enum keeps
//! ownership of heap references (`ObjectRef`, interned strings) explicit
//! for the GC contract.

use crate::object::shaped_object::ObjectRef;
use lyra_core::InternedString;
use lyra_gc::HeapPtr;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Host Functions
// =============================================================================

/// Signature of host-provided callables (accessors, methods).
pub type NativeFn = dyn Fn(&ObjectRef, &[Value]) -> Value + Send + Sync;

/// Shared reference to a host function.
///
/// Getter and setter slots of accessor properties hold these. Cheap to
/// clone; equality is function identity.
#[derive(Clone)]
pub struct FunctionRef(Arc<NativeFn>);

impl FunctionRef {
    /// Wrap a host closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ObjectRef, &[Value]) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke with a receiver and arguments.
    #[inline]
    pub fn call(&self, this: &ObjectRef, args: &[Value]) -> Value {
        (self.0)(this, args)
    }

    /// Function identity comparison.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef({:p})", Arc::as_ptr(&self.0))
    }
}

// =============================================================================
// Value
// =============================================================================

/// A dynamically-typed value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absent / never written.
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Interned string.
    Str(InternedString),
    /// Reference to a heap object.
    Object(ObjectRef),
    /// Host function (accessor getter/setter, method).
    Function(FunctionRef),
}

impl Value {
    /// Check for `Undefined`.
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Extract an integer.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract a bool.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract a float.
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Extract an interned string.
    #[inline]
    pub fn as_str(&self) -> Option<&InternedString> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Extract an object reference.
    #[inline]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Extract a host function.
    #[inline]
    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// The barrier fires for values that reference the managed heap: objects
/// and interned strings. Host functions are plain Rust state, not heap
/// cells the collector moves or frees.
impl HeapPtr for Value {
    #[inline]
    fn heap_ptr(&self) -> Option<*const ()> {
        match self {
            Value::Object(o) => Some(o.as_ptr()),
            Value::Str(s) => Some(s.as_ptr() as *const ()),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
