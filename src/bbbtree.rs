//! The buffered-delta B-tree: a [`BTree`] whose dirty-page evictions may be
//! redirected into a secondary delta tree instead of a full page write.
//!
//! `BbbTree` owns two trees sharing one buffer pool: the primary tree,
//! which installs [`BbbPageLogic`] as its eviction hook, and a [`DeltaTree`]
//! on its own segment. On eviction, the hook inspects which slots changed
//! since load and either writes the page in full or summarizes the change
//! as a [`Deltas`] blob and skips the write; on reload, it replays any
//! pending deltas onto the stale page image before handing it back.

use std::sync::Arc;

use tracing::error;

use crate::btree::node::{self, LeafInsertOutcome};
use crate::btree::{BTree, TreeRole};
use crate::buffer::{BufferPool, FrameState, PageLogic};
use crate::delta::{Delta, DeltaTree, Deltas, OpCode};
use crate::error::{Result, StorageError};
use crate::stats::Stats;
use crate::types::{PageId, SegmentId, SlotState};

fn clean_slots(data: &mut [u8]) {
    let count = node::slot_count(data);
    if node::is_leaf(data) {
        for i in 0..count {
            node::leaf_set_state(data, i, SlotState::Unchanged);
        }
    } else {
        for i in 0..count {
            node::inner_set_state(data, i, SlotState::Unchanged);
        }
    }
}

/// Collect every slot marked `Inserted` into a `Deltas` blob. Slots marked
/// `Updated` or `Deleted` are skipped — the B+-tree never produces the
/// former, and a tombstoned slot's change is only ever captured correctly
/// by a full page write (see the module-level limitation noted in
/// `DESIGN.md`).
fn extract_deltas(data: &[u8]) -> Deltas {
    let count = node::slot_count(data);
    let mut records = Vec::new();
    if node::is_leaf(data) {
        for i in 0..count {
            if node::leaf_state(data, i) == SlotState::Inserted {
                records.push(Delta {
                    op: OpCode::Insert,
                    key: node::leaf_key(data, i).to_vec(),
                    value: node::leaf_value(data, i).to_vec(),
                });
            }
        }
    } else {
        for i in 0..count {
            if node::inner_state(data, i) == SlotState::Inserted {
                records.push(Delta {
                    op: OpCode::Insert,
                    key: node::inner_key(data, i).to_vec(),
                    value: node::inner_child(data, i).to_le_bytes().to_vec(),
                });
            }
        }
    }
    Deltas(records)
}

/// Reapply a [`Deltas`] blob onto a page's bytes after it has been loaded
/// from its (possibly stale) on-disk image.
fn replay_deltas(data: &mut [u8], deltas: &Deltas) -> Result<()> {
    let is_leaf = node::is_leaf(data);
    for delta in &deltas.0 {
        if delta.op != OpCode::Insert {
            return Err(StorageError::invariant(
                "only insert deltas are implemented for replay",
            ));
        }
        if is_leaf {
            match node::leaf_insert(data, &delta.key, &delta.value, SlotState::Inserted)? {
                LeafInsertOutcome::Inserted | LeafInsertOutcome::Revived => {}
                LeafInsertOutcome::AlreadyExists => {
                    return Err(StorageError::invariant(
                        "replayed insert found a live key already present",
                    ));
                }
            }
        } else {
            if delta.value.len() != 8 {
                return Err(StorageError::corruption(
                    "inner delta value is not an 8-byte child pointer",
                ));
            }
            let child = u64::from_le_bytes(delta.value[..8].try_into().unwrap());
            node::inner_insert(data, &delta.key, child, SlotState::Inserted)?;
        }
    }
    Ok(())
}

/// The page logic a [`BbbTree`] installs on its primary tree.
struct BbbPageLogic {
    delta_tree: Arc<DeltaTree>,
    stats: Arc<Stats>,
    wa_threshold: f64,
}

impl PageLogic for BbbPageLogic {
    fn before_unload(
        &self,
        data: &mut [u8],
        state: FrameState,
        page_id: PageId,
        page_size: usize,
    ) -> (bool, bool) {
        match state {
            FrameState::New => {
                clean_slots(data);
                (true, false)
            }
            FrameState::Dirty => {
                let deltas = extract_deltas(data);
                if deltas.is_empty() {
                    // Spurious dirty (e.g. only tombstoned slots changed):
                    // nothing worth deferring, write the page in full.
                    return (true, false);
                }

                // Fraction of the page the serialized deltas would occupy.
                // Deferral is only worthwhile when that fraction exceeds
                // `wa_threshold`: below the threshold, the change is cheap
                // enough that writing the full page back is not worth the
                // extra delta-tree lookup on the next load. At
                // `wa_threshold == 0` every non-spurious change defers; at
                // `wa_threshold == 1` no change ever does, since a
                // fraction can never exceed 1.
                let fraction = deltas.serialized_size() as f64 / page_size as f64;
                if fraction <= self.wa_threshold {
                    // Below the cutoff: write the page in full. Drop
                    // whatever stale entry might already be sitting in the
                    // delta tree for this page before the full page makes
                    // it redundant. A failure here must not pass silently:
                    // a surviving stale entry would be replayed onto this
                    // page's current contents on its next load.
                    if let Err(err) = self.delta_tree.take(page_id) {
                        error!(%page_id, %err, "failed to erase stale delta-tree entry before full flush");
                    }
                    self.stats.add_bytes_written_logically(page_size as u64);
                    return (true, true);
                }

                match self.delta_tree.insert(page_id, &deltas) {
                    Ok(()) => {
                        self.stats
                            .add_bytes_written_logically(deltas.serialized_size() as u64);
                        (false, false)
                    }
                    Err(err) => {
                        // The delta tree already holds an un-replayed entry
                        // for this page (see DESIGN.md's note on the
                        // original's unimplemented "remove before
                        // re-storing" step). Falling back to a full flush
                        // loses no data, unlike leaving the stale entry in
                        // place.
                        error!(%page_id, %err, "delta tree insert failed, forcing full flush");
                        let _ = self.delta_tree.take(page_id);
                        (true, true)
                    }
                }
            }
            FrameState::Clean | FrameState::Undefined => (true, false),
        }
    }

    fn after_load(&self, data: &mut [u8], page_id: PageId) {
        match self.delta_tree.take(page_id) {
            Ok(Some(deltas)) => {
                if let Err(err) = replay_deltas(data, &deltas) {
                    error!(%page_id, %err, "failed to replay buffered deltas");
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!(%page_id, %err, "delta tree lookup failed while loading page");
            }
        }
    }
}

/// A B+-tree whose evicted dirty pages may be summarized into a delta tree
/// instead of rewritten in full, bounded by a write-amplification
/// threshold `wa_threshold` in `[0, 1]`.
///
/// Public surface mirrors [`BTree`]: lookups and scans are indistinguishable
/// from a plain tree, since `after_load` reconstructs the current page
/// state before any caller sees it.
pub struct BbbTree {
    tree: BTree,
    delta_tree: Arc<DeltaTree>,
}

impl BbbTree {
    /// `primary_segment` holds the tree's own pages; `delta_segment` holds
    /// the delta tree keyed by page id. The two must be distinct segments
    /// sharing `pool`.
    pub fn new(
        primary_segment: SegmentId,
        delta_segment: SegmentId,
        pool: Arc<BufferPool>,
        stats: Arc<Stats>,
        wa_threshold: f64,
    ) -> Result<Self> {
        let delta_tree = Arc::new(DeltaTree::new(delta_segment, pool.clone(), stats.clone())?);
        let logic: Arc<dyn PageLogic> = Arc::new(BbbPageLogic {
            delta_tree: delta_tree.clone(),
            stats: stats.clone(),
            wa_threshold: wa_threshold.clamp(0.0, 1.0),
        });
        let tree = BTree::new(primary_segment, pool, stats, Some(logic), TreeRole::Primary)?;
        Ok(Self { tree, delta_tree })
    }

    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tree.lookup(key)
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.tree.insert(key, value)
    }

    pub fn erase(&self, key: &[u8]) -> Result<bool> {
        self.tree.erase(key)
    }

    pub fn size(&self) -> Result<usize> {
        self.tree.size()
    }

    pub fn scan(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.scan(start, end)
    }

    pub fn iter(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.iter()
    }

    /// Number of pages currently holding un-replayed deltas. Exposed for
    /// tests and diagnostics, not part of the write-amplification contract.
    pub fn deferred_page_count(&self) -> Result<usize> {
        self.delta_tree.size()
    }

    pub fn close(&self) -> Result<()> {
        self.tree.close()?;
        self.delta_tree.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SegmentFileStore;
    use crate::types::BufferPoolConfig;

    fn bbbtree(page_count: usize, wa_threshold: f64) -> (tempfile::TempDir, BbbTree) {
        let (dir, tree, _stats) = bbbtree_with_stats(page_count, wa_threshold);
        (dir, tree)
    }

    /// Like [`bbbtree`], but also returns the one `Stats` instance shared by
    /// the pool and the tree, so a test can assert on telemetry counters
    /// that span both (spec P7 ties `bytes_written_physically` /
    /// `bytes_written_logically` / `pages_write_deferred` together, which
    /// only holds if pool and tree are bumping the same counters).
    fn bbbtree_with_stats(page_count: usize, wa_threshold: f64) -> (tempfile::TempDir, BbbTree, Arc<Stats>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SegmentFileStore::new(dir.path(), 512, false).unwrap());
        let config = BufferPoolConfig::new(page_count).with_page_size(512);
        let stats = Stats::shared();
        let pool = Arc::new(BufferPool::new(store, config, stats.clone()));
        let tree = BbbTree::new(SegmentId(0), SegmentId(1), pool, stats.clone(), wa_threshold).unwrap();
        (dir, tree, stats)
    }

    #[test]
    fn insert_then_lookup_roundtrips_under_eviction_pressure() {
        // Only four frames shared by the primary tree and the delta tree:
        // inserting enough keys to force several pages is guaranteed to
        // evict pages that are not currently pinned.
        let (_dir, tree) = bbbtree(4, 0.5);
        for i in 0..40u32 {
            let key = format!("key{i:03}");
            tree.insert(key.as_bytes(), format!("value{i}").as_bytes()).unwrap();
        }
        for i in 0..40u32 {
            let key = format!("key{i:03}");
            let expected = format!("value{i}");
            assert_eq!(
                tree.lookup(key.as_bytes()).unwrap(),
                Some(expected.into_bytes()),
                "key{i:03} should round-trip through eviction"
            );
        }
        assert_eq!(tree.size().unwrap(), 40);
    }

    #[test]
    fn wa_threshold_zero_always_defers() {
        let (_dir, tree) = bbbtree(4, 0.0);
        for i in 0..20u32 {
            let key = format!("k{i:02}");
            tree.insert(key.as_bytes(), b"v").unwrap();
        }
        // omega = 0: any non-spurious dirty eviction has a delta fraction
        // strictly greater than 0, so every one of them defers.
        assert!(tree.deferred_page_count().unwrap() > 0);
        for i in 0..20u32 {
            let key = format!("k{i:02}");
            assert_eq!(tree.lookup(key.as_bytes()).unwrap(), Some(b"v".to_vec()));
        }
    }

    #[test]
    fn wa_threshold_one_never_defers() {
        let (_dir, tree) = bbbtree(4, 1.0);
        for i in 0..20u32 {
            let key = format!("k{i:02}");
            tree.insert(key.as_bytes(), b"v").unwrap();
        }
        // omega = 1: a delta fraction can never exceed 1, so every
        // eviction falls back to a full flush and the delta tree stays
        // empty.
        assert_eq!(
            tree.deferred_page_count().unwrap(),
            0,
            "wa_threshold of 1 must force every eviction to a full flush"
        );
    }

    #[test]
    fn reloading_then_immediately_reevicting_an_unmodified_page_is_idempotent() {
        let (_dir, tree) = bbbtree(3, 0.0);
        for i in 0..15u32 {
            let key = format!("a{i:02}");
            tree.insert(key.as_bytes(), b"x").unwrap();
        }
        // Force reloads of whatever got evicted, with no further writes.
        for i in 0..15u32 {
            let key = format!("a{i:02}");
            assert_eq!(tree.lookup(key.as_bytes()).unwrap(), Some(b"x".to_vec()));
        }
        // A second pass, re-triggering eviction of pages that were just
        // reloaded and not modified, must not error and must still see
        // every key.
        for i in 0..15u32 {
            let key = format!("a{i:02}");
            assert_eq!(tree.lookup(key.as_bytes()).unwrap(), Some(b"x".to_vec()));
        }
        assert_eq!(tree.size().unwrap(), 15);
    }

    #[test]
    fn wa_threshold_zero_defers_and_logs_logical_bytes() {
        let (_dir, tree, stats) = bbbtree_with_stats(4, 0.0);
        for i in 0..40u32 {
            let key = format!("key{i:03}");
            tree.insert(key.as_bytes(), format!("value{i}").as_bytes()).unwrap();
        }
        let snap = stats.snapshot();
        // omega=0 forces every non-spurious dirty eviction to defer: both
        // counters should reflect that, regardless of how much physical
        // I/O the new-page flushes and metadata writes the same workload
        // also requires end up costing (spec P7's `+ Theta(D.pages)` slack
        // term exists precisely to account for that, so this test does not
        // assert physical bytes are strictly less than logical ones).
        assert!(snap.pages_write_deferred > 0);
        assert!(snap.bytes_written_logically > 0);
    }

    #[test]
    fn empty_tree_reports_no_deferred_pages() {
        let (_dir, tree) = bbbtree(4, 0.5);
        assert_eq!(tree.deferred_page_count().unwrap(), 0);
        assert_eq!(tree.size().unwrap(), 0);
    }
}
