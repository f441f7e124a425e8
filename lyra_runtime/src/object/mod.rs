//! The shape-based object model.
//!
//! Module map, leaves first:
//! - [`slot_data`] — copy-on-write shared arrays backing shape metadata
//! - [`property_table`] — per-shape open-addressing key → slot table
//! - [`shape`] — hidden classes, the transition graph, the registry
//! - [`shaped_object`] — per-instance slot storage addressed by shapes
//! - [`lookup`] — per-call-site inline caches over all of the above

pub mod lookup;
pub mod property_table;
pub mod shape;
pub mod shaped_object;
pub mod slot_data;
