//! Core primitives shared by the Lyra object-model crates.
//!
//! This crate provides:
//! - Process-wide string interning (`intern`, `InternedString`)
//!
//! Interned strings are the key type of the whole property system: every
//! property name is interned exactly once, so name equality and hashing
//! reduce to pointer comparisons on the hot path.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod intern;

pub use intern::{intern, InternedString};
