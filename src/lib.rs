//! # bbbtree-storage
//!
//! A disk-resident key-value index engine built around a *buffered-delta
//! B-tree* (BBB-tree): a B+-tree whose dirty pages, when evicted, may have
//! their logical changes written into a secondary delta tree rather than
//! flushed in full to their home pages. This trades a small amount of
//! read-side replay work for reduced write amplification on workloads
//! dominated by scattered small updates.
//!
//! ## Architecture
//!
//! Dependency order, leaves first:
//!
//! - **Storage** (`storage`): one append-capable file per segment id,
//!   fixed-size page I/O.
//! - **Buffer pool** (`buffer`): a fixed pool of page-sized frames mapping
//!   `(segment, page)` to frames, with a pluggable per-page *page logic*
//!   callback deciding what happens on eviction and load.
//! - **Page** (`page`): the slotted-page layout primitive the non-tree
//!   collaborators build on.
//! - **B+-tree** (`btree`): a variable-key ordered index over one segment's
//!   pages, using its own slotted node layout (forward-growing slot array
//!   of inner/leaf entries, backward-growing payload).
//! - **Delta tree** (`delta`): a `BTree` keyed by page id, valued by a
//!   serialized `Deltas` blob.
//! - **BBB-tree** (`bbbtree`): a `BTree` whose page logic redirects
//!   qualifying evictions into a delta tree instead of a full page write.
//!
//! `database` ties a `BTree` index to a slotted-pages tuple store; it is
//! named in the design as an out-of-scope collaborator kept only at
//! minimal fidelity.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bbbtree_storage::{Config, Stats};
//! use bbbtree_storage::bbbtree::BbbTree;
//! use bbbtree_storage::types::SegmentId;
//! use std::sync::Arc;
//!
//! let config = Config::new("/tmp/my-index").page_count(256).wa_threshold(0.25);
//! let stats = Stats::shared();
//! let pool = Arc::new(config.open_pool(stats.clone())?);
//! let index = BbbTree::new(SegmentId(0), SegmentId(1), pool, stats, config.wa_threshold)?;
//!
//! index.insert(b"hello", b"world")?;
//! assert_eq!(index.lookup(b"hello")?, Some(b"world".to_vec()));
//! # Ok::<(), bbbtree_storage::error::StorageError>(())
//! ```

pub mod bbbtree;
pub mod btree;
pub mod buffer;
pub mod database;
pub mod delta;
pub mod error;
pub mod page;
pub mod stats;
pub mod storage;
pub mod types;

pub use bbbtree::BbbTree;
pub use btree::BTree;
pub use buffer::BufferPool;
pub use database::Database;
pub use delta::DeltaTree;
pub use error::{Result, StorageError};
pub use stats::{Stats, StatsSnapshot};
pub use storage::{SegmentFileStore, SegmentStore};
pub use types::{BufferPoolConfig, PageId, SegmentId, DEFAULT_PAGE_SIZE};

use std::path::PathBuf;
use std::sync::Arc;

/// Process-level bootstrap configuration (spec §6): where segment files
/// live and the pool/tree knobs every segment in this process shares.
///
/// Mirrors the teacher's `Config`/`BTreeConfig` builder pair, but does not
/// hardcode a single database file or a single tree: a BBB-tree process
/// owns at least two segments (primary tree, delta tree), and the
/// `database` collaborator adds a third (tuple storage) plus a
/// free-space-inventory segment. `Config` only decides the shared
/// knobs — the caller still picks which `SegmentId` is which.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory under which one file per segment id is created.
    pub base_dir: PathBuf,
    /// Size in bytes of every page in every segment.
    pub page_size: usize,
    /// Buffer pool capacity, in frames.
    pub page_count: usize,
    /// BBB-tree write-amplification threshold `omega`, in `[0, 1]`. A page's
    /// eviction defers into the delta tree when its serialized deltas
    /// exceed this fraction of the page; otherwise it is flushed in full.
    pub wa_threshold: f64,
    /// If true, every segment file is truncated to empty the first time
    /// this process opens it.
    pub clear: bool,
}

impl Config {
    /// Defaults: 4 KiB pages, 1024 frames, `omega = 0.25`, no clear.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            page_size: types::DEFAULT_PAGE_SIZE,
            page_count: types::DEFAULT_PAGE_COUNT,
            wa_threshold: types::DEFAULT_WA_THRESHOLD,
            clear: false,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn page_count(mut self, page_count: usize) -> Self {
        self.page_count = page_count;
        self
    }

    pub fn wa_threshold(mut self, wa_threshold: f64) -> Self {
        self.wa_threshold = wa_threshold.clamp(0.0, 1.0);
        self
    }

    pub fn clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    fn pool_config(&self) -> BufferPoolConfig {
        BufferPoolConfig {
            page_size: self.page_size,
            page_count: self.page_count,
            wa_threshold: self.wa_threshold,
            clear: self.clear,
        }
    }

    /// Open the segment-file store and buffer pool this configuration
    /// describes. Every `BTree`/`BbbTree`/`Database` the caller then
    /// constructs on top shares this one pool.
    pub fn open_pool(&self, stats: Arc<Stats>) -> Result<BufferPool> {
        let store = Arc::new(SegmentFileStore::new(
            &self.base_dir,
            self.page_size,
            self.clear,
        )?);
        Ok(BufferPool::new(store, self.pool_config(), stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_applies_overrides() {
        let config = Config::new("/tmp/does-not-matter")
            .page_size(2048)
            .page_count(64)
            .wa_threshold(5.0)
            .clear(true);
        assert_eq!(config.page_size, 2048);
        assert_eq!(config.page_count, 64);
        assert_eq!(config.wa_threshold, 1.0, "threshold must clamp into [0,1]");
        assert!(config.clear);
    }

    #[test]
    fn config_wires_a_usable_pool_for_a_bbb_tree() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).page_size(512).page_count(8).wa_threshold(0.5);
        let stats = Stats::shared();
        let pool = Arc::new(config.open_pool(stats.clone()).unwrap());
        let tree = BbbTree::new(
            SegmentId(0),
            SegmentId(1),
            pool,
            stats,
            config.wa_threshold,
        )
        .unwrap();

        tree.insert(b"a", b"1").unwrap();
        tree.insert(b"b", b"2").unwrap();
        assert_eq!(tree.lookup(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tree.lookup(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(tree.size().unwrap(), 2);
    }
}
