//! A disk-based B+-tree: point lookups, inserts with cascading splits,
//! tombstoning deletes, and range scans over one buffer-pool segment.

pub mod node;
mod tree;

pub use tree::{BTree, TreeRole};
