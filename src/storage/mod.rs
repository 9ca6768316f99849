//! Storage layer: segment-file I/O.
//!
//! This module provides the abstraction for reading and writing pages to
//! disk. Allocation and free-space tracking are not this layer's job: they
//! belong to whatever owns a segment's page 0 (the B+-tree, or the tuple
//! store's free-space inventory).

mod segment_store;

pub use segment_store::{SegmentFileStore, SegmentStore};
