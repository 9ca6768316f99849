//! Generic slotted-page layout.
//!
//! A slotted page packs a forward-growing array of fixed-size slot
//! descriptors against the front of the page and a backward-growing
//! payload region against the back; free space sits in the middle and
//! shrinks as either array grows. This is the same silhouette the
//! B+-tree's own node layout uses (see [`crate::btree::node`]), but the
//! two are independent formats: this one is the generic page the tuple
//! store uses to hold opaque fixed-content records addressed by slot
//! index, with no notion of keys or ordering.

pub mod slotted;

pub use slotted::{SlottedPage, SlottedPageMut};
