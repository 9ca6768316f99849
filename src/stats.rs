//! Explicit, shareable counters for the storage engine.
//!
//! Earlier revisions of this engine kept counters behind a process-global
//! singleton, which made it impossible to run two databases side by side in
//! the same process (tests included) without their counters bleeding into
//! each other. `Stats` is instead an ordinary value: a database owns one,
//! hands out clones of the `Arc` to whichever layers need to bump a
//! counter, and a caller reads a consistent point-in-time copy through
//! [`Stats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

macro_rules! counters {
    ($($(#[$meta:meta])* $field:ident),* $(,)?) => {
        /// Atomic counters describing buffer pool and tree activity.
        ///
        /// All fields are monotonically increasing for the lifetime of the
        /// `Stats` value, except `b_tree_height` and `delta_tree_height`
        /// which are gauges set to the current height on every root change.
        #[derive(Default)]
        pub struct Stats {
            $($(#[$meta])* $field: AtomicU64,)*
        }

        /// A consistent point-in-time copy of a [`Stats`]'s counters.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct StatsSnapshot {
            $($(#[$meta])* pub $field: u64,)*
        }

        impl Stats {
            /// Take a plain-data copy of every counter.
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    /// Times a leaf node was split because an insert found no room.
    leaf_node_splits,
    /// Times an inner node was split propagating a pivot upward.
    inner_node_splits,
    /// Bytes written to pages, counted at the logical (deltas plus live
    /// slot data) level rather than physical I/O.
    bytes_written_logically,
    /// Bytes actually written to segment files.
    bytes_written_physically,
    /// Frames evicted from the buffer pool.
    pages_evicted,
    /// Pages written back to disk, whether via eviction or an explicit
    /// flush.
    pages_written,
    /// Evictions whose changes were summarized into the delta tree instead
    /// of triggering a page write.
    pages_write_deferred,
    /// Pages newly allocated via `fix_new`.
    pages_created,
    /// Current height of the primary B+-tree (0 for a single leaf root).
    b_tree_height,
    /// Current height of the delta tree, if a buffered-delta tree is in
    /// use.
    delta_tree_height,
}

impl Stats {
    /// Create a fresh, zeroed set of counters wrapped for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr_leaf_node_splits(&self) {
        self.leaf_node_splits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_inner_node_splits(&self) {
        self.inner_node_splits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_written_logically(&self, n: u64) {
        self.bytes_written_logically.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_written_physically(&self, n: u64) {
        self.bytes_written_physically
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_pages_evicted(&self) {
        self.pages_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_pages_written(&self) {
        self.pages_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_pages_write_deferred(&self) {
        self.pages_write_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_pages_created(&self) {
        self.pages_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_b_tree_height(&self, height: u64) {
        self.b_tree_height.store(height, Ordering::Relaxed);
    }

    pub fn set_delta_tree_height(&self, height: u64) {
        self.delta_tree_height.store(height, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_instances_do_not_share_counters() {
        let a = Stats::shared();
        let b = Stats::shared();
        a.incr_pages_evicted();
        assert_eq!(a.snapshot().pages_evicted, 1);
        assert_eq!(b.snapshot().pages_evicted, 0);
    }

    #[test]
    fn snapshot_is_a_plain_copy() {
        let s = Stats::shared();
        s.incr_leaf_node_splits();
        let snap1 = s.snapshot();
        s.incr_leaf_node_splits();
        let snap2 = s.snapshot();
        assert_eq!(snap1.leaf_node_splits, 1);
        assert_eq!(snap2.leaf_node_splits, 2);
    }
}
