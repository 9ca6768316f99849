//! The core B+-tree: descent, insert-with-split, tombstoning erase, and a
//! page-0 metadata page that survives a close/reopen cycle.
//!
//! One `BTree` owns one segment. Page 0 of that segment is never a node —
//! it holds `(root: u64, next_free_page: u64)` — and data pages start at 1.
//! A tree installs a [`PageLogic`] (or none, for the default always-write
//! behavior) once at construction and passes it to every `fix`/`fix_mut`
//! call; the buffered-delta tree is the motivating caller that needs this
//! seam (see [`crate::bbbtree`]).
//!
//! All public methods take `&self`, not `&mut self`: a buffered-delta
//! tree's page logic runs its delta tree's own `insert` from inside
//! `before_unload`, which the buffer pool only ever hands a shared
//! reference to. Interior mutability (one [`Mutex`] guarding the root and
//! next-free-page counter) is the seam that makes that possible, the same
//! way the buffer pool itself serializes frame bookkeeping behind one lock
//! rather than trying to hand out `&mut` access to shared state.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{BufferPool, PageLogic};
use crate::error::{Result, StorageError};
use crate::stats::Stats;
use crate::types::{max_key_size, max_value_size, PageId, SegmentId, SlotState};

use super::node::{self, InnerEntry, LeafEntry};

const META_PAGE: u64 = 0;
const INITIAL_ROOT_PAGE: u64 = 1;

/// Which height gauge a tree reports into. A process typically has one
/// primary tree and, if it is wrapped in a [`crate::bbbtree::BbbTree`], one
/// delta tree sharing the same buffer pool; `Stats` keeps separate gauges
/// for the two (spec's `b_tree_height` / `delta_tree_height`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeRole {
    Primary,
    Delta,
}

impl TreeRole {
    fn report(self, stats: &Stats, height: u64) {
        match self {
            TreeRole::Primary => stats.set_b_tree_height(height),
            TreeRole::Delta => stats.set_delta_tree_height(height),
        }
    }
}

struct TreeMeta {
    root: u64,
    next_free_page: u64,
}

enum InsertResult {
    Duplicate,
    Done,
    Split { pivot: Vec<u8>, new_page: u64 },
}

/// A disk-resident, variable-key B+-tree over one segment.
pub struct BTree {
    pool: Arc<BufferPool>,
    segment: SegmentId,
    stats: Arc<Stats>,
    page_logic: Option<Arc<dyn PageLogic>>,
    role: TreeRole,
    meta: Mutex<TreeMeta>,
}

impl BTree {
    /// Open (or initialize) a tree on `segment`. If the segment's metadata
    /// page has never been written, the root is created as an empty leaf
    /// at page 1 and the metadata page is written immediately.
    pub fn new(
        segment: SegmentId,
        pool: Arc<BufferPool>,
        stats: Arc<Stats>,
        page_logic: Option<Arc<dyn PageLogic>>,
        role: TreeRole,
    ) -> Result<Self> {
        let (root, next_free_page) = Self::read_meta(&pool, segment)?;
        let (root, next_free_page) = if next_free_page == 0 {
            {
                let guard = pool.fix_new(segment, PageId::new(INITIAL_ROOT_PAGE), page_logic.clone())?;
                let mut data = guard.write();
                node::init_leaf(&mut data);
            }
            Self::write_meta(&pool, segment, INITIAL_ROOT_PAGE, INITIAL_ROOT_PAGE + 1)?;
            (INITIAL_ROOT_PAGE, INITIAL_ROOT_PAGE + 1)
        } else {
            (root, next_free_page)
        };

        let tree = Self {
            pool,
            segment,
            stats,
            page_logic,
            role,
            meta: Mutex::new(TreeMeta { root, next_free_page }),
        };
        tree.report_height()?;
        Ok(tree)
    }

    fn read_meta(pool: &BufferPool, segment: SegmentId) -> Result<(u64, u64)> {
        let guard = pool.fix(segment, PageId::new(META_PAGE), None)?;
        let data = guard.read();
        let root = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let next_free_page = u64::from_le_bytes(data[8..16].try_into().unwrap());
        Ok((root, next_free_page))
    }

    fn write_meta(pool: &BufferPool, segment: SegmentId, root: u64, next_free_page: u64) -> Result<()> {
        let guard = pool.fix_mut(segment, PageId::new(META_PAGE), None)?;
        {
            let mut data = guard.write();
            data[0..8].copy_from_slice(&root.to_le_bytes());
            data[8..16].copy_from_slice(&next_free_page.to_le_bytes());
        }
        Ok(())
    }

    fn persist_meta(&self) -> Result<()> {
        let (root, next_free_page) = {
            let m = self.meta.lock();
            (m.root, m.next_free_page)
        };
        Self::write_meta(&self.pool, self.segment, root, next_free_page)
    }

    fn report_height(&self) -> Result<()> {
        let root = self.meta.lock().root;
        let guard = self.pool.fix(self.segment, PageId::new(root), self.page_logic.clone())?;
        let level = node::level(&guard.read());
        self.role.report(&self.stats, level as u64);
        Ok(())
    }

    fn alloc_page(&self) -> u64 {
        let mut m = self.meta.lock();
        let p = m.next_free_page;
        m.next_free_page += 1;
        p
    }

    /// Segment id this tree is backed by.
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// Current root page id.
    pub fn root(&self) -> u64 {
        self.meta.lock().root
    }

    /// Flush the metadata page and every dirty frame in the shared pool.
    /// The buffer pool is shared across however many trees a process has
    /// opened, so this flushes all of them, not just `self` — matching
    /// spec's "close flushes metadata and outstanding dirty frames" at a
    /// process boundary rather than a per-tree one.
    pub fn close(&self) -> Result<()> {
        self.persist_meta()?;
        self.pool.flush_all()
    }

    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let root = self.root();
        self.lookup_from(root, key)
    }

    fn lookup_from(&self, page: u64, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let guard = self.pool.fix(self.segment, PageId::new(page), self.page_logic.clone())?;
        let data = guard.read();
        if node::is_leaf(&data) {
            Ok(node::leaf_find(&data, key).map(|i| node::leaf_value(&data, i).to_vec()))
        } else {
            let child = node::inner_find_child(&data, key);
            drop(data);
            drop(guard);
            self.lookup_from(child, key)
        }
    }

    /// Insert `(key, value)` if `key` is absent. Returns `false` without
    /// writing anything if `key` is already present.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let page_size = self.pool.page_size();
        let max_key = max_key_size(page_size);
        let max_value = max_value_size(page_size);
        if key.len() > max_key {
            return Err(StorageError::KeyTooLarge { size: key.len(), max: max_key });
        }
        if value.len() > max_value {
            return Err(StorageError::ValueTooLarge { size: value.len(), max: max_value });
        }

        let root = self.root();
        match self.insert_recursive(root, key, value)? {
            InsertResult::Duplicate => Ok(false),
            InsertResult::Done => Ok(true),
            InsertResult::Split { pivot, new_page } => {
                self.grow_root(root, pivot, new_page)?;
                Ok(true)
            }
        }
    }

    fn insert_recursive(&self, page: u64, key: &[u8], value: &[u8]) -> Result<InsertResult> {
        let is_leaf = {
            let guard = self.pool.fix(self.segment, PageId::new(page), self.page_logic.clone())?;
            node::is_leaf(&guard.read())
        };
        if is_leaf {
            return self.insert_into_leaf(page, key, value);
        }

        let child = {
            let guard = self.pool.fix(self.segment, PageId::new(page), self.page_logic.clone())?;
            node::inner_find_child(&guard.read(), key)
        };
        match self.insert_recursive(child, key, value)? {
            InsertResult::Duplicate => Ok(InsertResult::Duplicate),
            InsertResult::Done => Ok(InsertResult::Done),
            InsertResult::Split { pivot, new_page } => self.insert_into_inner(page, child, pivot, new_page),
        }
    }

    fn insert_into_leaf(&self, page: u64, key: &[u8], value: &[u8]) -> Result<InsertResult> {
        let guard = self.pool.fix_mut(self.segment, PageId::new(page), self.page_logic.clone())?;

        let outcome = {
            let data = guard.read();
            let pos = node::leaf_lower_bound(&data, key);
            let count = node::slot_count(&data);
            let matches = pos < count && node::leaf_key(&data, pos) == key;
            if matches && node::leaf_state(&data, pos) != SlotState::Deleted {
                None
            } else {
                let needed = key.len() + value.len();
                let required = if matches {
                    needed
                } else {
                    needed + node::LEAF_SLOT_SIZE
                };
                Some(node::free_space(&data) >= required)
            }
        };

        match outcome {
            None => Ok(InsertResult::Duplicate),
            Some(true) => {
                let mut data = guard.write();
                node::leaf_insert(&mut data, key, value, SlotState::Inserted)?;
                Ok(InsertResult::Done)
            }
            Some(false) => {
                drop(guard);
                self.split_leaf_and_insert(page, key, value)
            }
        }
    }

    fn split_leaf_and_insert(&self, page: u64, key: &[u8], value: &[u8]) -> Result<InsertResult> {
        let guard = self.pool.fix_mut(self.segment, PageId::new(page), self.page_logic.clone())?;
        let mut entries = node::leaf_entries(&guard.read());

        match entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
            Ok(idx) => {
                entries[idx] = LeafEntry {
                    key: key.to_vec(),
                    value: value.to_vec(),
                    state: SlotState::Inserted,
                };
            }
            Err(idx) => entries.insert(
                idx,
                LeafEntry {
                    key: key.to_vec(),
                    value: value.to_vec(),
                    state: SlotState::Inserted,
                },
            ),
        }

        let mid = (entries.len() + 1) / 2;
        let right_entries = entries.split_off(mid);
        let left_entries = entries;
        let pivot = left_entries
            .last()
            .expect("left half of a leaf split is never empty")
            .key
            .clone();

        let new_page = self.alloc_page();
        {
            let new_guard = self.pool.fix_new(self.segment, PageId::new(new_page), self.page_logic.clone())?;
            node::rebuild_leaf(&mut new_guard.write(), &right_entries)?;
        }
        node::rebuild_leaf(&mut guard.write(), &left_entries)?;
        drop(guard);

        self.stats.incr_leaf_node_splits();
        self.persist_meta()?;
        Ok(InsertResult::Split { pivot, new_page })
    }

    fn insert_into_inner(
        &self,
        page: u64,
        child_that_split: u64,
        pivot: Vec<u8>,
        new_page: u64,
    ) -> Result<InsertResult> {
        let guard = self.pool.fix_mut(self.segment, PageId::new(page), self.page_logic.clone())?;
        node::inner_retarget(&mut guard.write(), child_that_split, new_page);

        let fits = node::free_space(&guard.read()) >= pivot.len() + node::INNER_SLOT_SIZE;
        if fits {
            node::inner_insert(&mut guard.write(), &pivot, child_that_split, SlotState::Inserted)?;
            return Ok(InsertResult::Done);
        }

        drop(guard);
        self.split_inner_and_insert(page, pivot, child_that_split)
    }

    fn split_inner_and_insert(&self, page: u64, pivot: Vec<u8>, pivot_child: u64) -> Result<InsertResult> {
        let guard = self.pool.fix_mut(self.segment, PageId::new(page), self.page_logic.clone())?;
        let (level, old_upper, mut entries) = {
            let data = guard.read();
            (node::level(&data), node::upper(&data), node::inner_entries(&data))
        };

        let pos = entries.partition_point(|e| e.key.as_slice() < pivot.as_slice());
        entries.insert(
            pos,
            InnerEntry {
                key: pivot,
                child: pivot_child,
                state: SlotState::Inserted,
            },
        );

        let mid = entries.len() / 2;
        let right_entries = entries.split_off(mid + 1);
        let consumed = entries.remove(mid);
        let left_entries = entries;
        // Unlike a leaf split, the promoted key is consumed rather than kept:
        // `consumed.child` already owns every key up to it, so it becomes the
        // left half's `upper` and the slot itself is dropped. Keeping it on
        // the left as well would leave two child pointers into the same
        // subtree, double-counting it in `size`/`scan`.
        let left_upper = consumed.child;
        let promoted = consumed.key;

        let new_page = self.alloc_page();
        {
            let new_guard = self.pool.fix_new(self.segment, PageId::new(new_page), self.page_logic.clone())?;
            node::rebuild_inner(&mut new_guard.write(), level, old_upper, &right_entries)?;
        }
        node::rebuild_inner(&mut guard.write(), level, left_upper, &left_entries)?;
        drop(guard);

        self.stats.incr_inner_node_splits();
        self.persist_meta()?;
        Ok(InsertResult::Split { pivot: promoted, new_page })
    }

    fn grow_root(&self, old_root: u64, pivot: Vec<u8>, new_page: u64) -> Result<()> {
        let old_level = {
            let guard = self.pool.fix(self.segment, PageId::new(old_root), self.page_logic.clone())?;
            node::level(&guard.read())
        };

        let new_root = self.alloc_page();
        {
            let guard = self.pool.fix_new(self.segment, PageId::new(new_root), self.page_logic.clone())?;
            let mut data = guard.write();
            node::init_inner(&mut data, old_level + 1, new_page);
            node::inner_insert(&mut data, &pivot, old_root, SlotState::Inserted)?;
        }

        {
            let mut m = self.meta.lock();
            m.root = new_root;
        }
        self.stats.incr_inner_node_splits();
        self.persist_meta()?;
        self.report_height()
    }

    /// Tombstone a key. No merge or space reclamation happens in v1; the
    /// slot stays in the leaf's array with its value dropped.
    pub fn erase(&self, key: &[u8]) -> Result<bool> {
        let root = self.root();
        self.erase_from(root, key)
    }

    fn erase_from(&self, page: u64, key: &[u8]) -> Result<bool> {
        let is_leaf = {
            let guard = self.pool.fix(self.segment, PageId::new(page), self.page_logic.clone())?;
            node::is_leaf(&guard.read())
        };
        if !is_leaf {
            let child = {
                let guard = self.pool.fix(self.segment, PageId::new(page), self.page_logic.clone())?;
                node::inner_find_child(&guard.read(), key)
            };
            return self.erase_from(child, key);
        }

        let found = {
            let guard = self.pool.fix(self.segment, PageId::new(page), self.page_logic.clone())?;
            node::leaf_find(&guard.read(), key)
        };
        match found {
            None => Ok(false),
            Some(idx) => {
                let guard = self.pool.fix_mut(self.segment, PageId::new(page), self.page_logic.clone())?;
                node::leaf_erase(&mut guard.write(), idx);
                Ok(true)
            }
        }
    }

    /// Number of live (non-tombstoned) entries, aggregated across every
    /// leaf. Not cached: this walks the tree once per call.
    pub fn size(&self) -> Result<usize> {
        let root = self.root();
        let mut total = 0usize;
        self.size_from(root, &mut total)?;
        Ok(total)
    }

    fn size_from(&self, page: u64, total: &mut usize) -> Result<()> {
        let guard = self.pool.fix(self.segment, PageId::new(page), self.page_logic.clone())?;
        let data = guard.read();
        if node::is_leaf(&data) {
            for i in 0..node::slot_count(&data) {
                if node::leaf_state(&data, i) != SlotState::Deleted {
                    *total += 1;
                }
            }
            Ok(())
        } else {
            let mut children: Vec<u64> = (0..node::slot_count(&data)).map(|i| node::inner_child(&data, i)).collect();
            children.push(node::upper(&data));
            drop(data);
            drop(guard);
            for child in children {
                self.size_from(child, total)?;
            }
            Ok(())
        }
    }

    /// All entries with `start <= key < end`, each bound optional. Leaves
    /// carry no sibling pointers in v1, so a full scan is a plain in-order
    /// descent rather than a leaf-to-leaf walk.
    pub fn scan(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let root = self.root();
        let mut out = Vec::new();
        self.scan_from(root, start, end, &mut out)?;
        Ok(out)
    }

    pub fn iter(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.scan(None, None)
    }

    fn scan_from(
        &self,
        page: u64,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        out: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        let guard = self.pool.fix(self.segment, PageId::new(page), self.page_logic.clone())?;
        let data = guard.read();
        if node::is_leaf(&data) {
            for i in 0..node::slot_count(&data) {
                if node::leaf_state(&data, i) == SlotState::Deleted {
                    continue;
                }
                let key = node::leaf_key(&data, i);
                if let Some(s) = start {
                    if key < s {
                        continue;
                    }
                }
                if let Some(e) = end {
                    if key >= e {
                        break;
                    }
                }
                out.push((key.to_vec(), node::leaf_value(&data, i).to_vec()));
            }
            Ok(())
        } else {
            let mut children: Vec<u64> = (0..node::slot_count(&data)).map(|i| node::inner_child(&data, i)).collect();
            children.push(node::upper(&data));
            drop(data);
            drop(guard);
            for child in children {
                self.scan_from(child, start, end, out)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SegmentFileStore;
    use crate::types::{BufferPoolConfig, SegmentId};
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn tree(page_size: usize, page_count: usize) -> (tempfile::TempDir, BTree) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SegmentFileStore::new(dir.path(), page_size, false).unwrap());
        let config = BufferPoolConfig::new(page_count).with_page_size(page_size);
        let stats = Stats::shared();
        let pool = Arc::new(BufferPool::new(store, config, stats.clone()));
        let tree = BTree::new(SegmentId(0), pool, stats, None, TreeRole::Primary).unwrap();
        (dir, tree)
    }

    #[test]
    fn single_node_lookup() {
        let (_dir, t) = tree(4096, 16);
        assert!(t.insert(&1u64.to_le_bytes(), &2u64.to_le_bytes()).unwrap());
        assert!(t.insert(&3u64.to_le_bytes(), &4u64.to_le_bytes()).unwrap());
        assert!(t.insert(&2u64.to_le_bytes(), &6u64.to_le_bytes()).unwrap());

        assert_eq!(t.lookup(&1u64.to_le_bytes()).unwrap(), Some(2u64.to_le_bytes().to_vec()));
        assert_eq!(t.lookup(&3u64.to_le_bytes()).unwrap(), Some(4u64.to_le_bytes().to_vec()));
        assert_eq!(t.lookup(&2u64.to_le_bytes()).unwrap(), Some(6u64.to_le_bytes().to_vec()));

        assert!(!t.insert(&2u64.to_le_bytes(), &7u64.to_le_bytes()).unwrap());
    }

    #[test]
    fn leaf_split_with_many_random_keys() {
        let (_dir, t) = tree(256, 256);
        let mut keys: Vec<u64> = (0..50).collect();
        keys.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));

        for &k in &keys {
            assert!(t.insert(&k.to_le_bytes(), &k.to_le_bytes()).unwrap());
        }

        assert_eq!(t.size().unwrap(), 50);
        for &k in &keys {
            assert_eq!(t.lookup(&k.to_le_bytes()).unwrap(), Some(k.to_le_bytes().to_vec()));
        }
        assert!(t.stats.snapshot().leaf_node_splits >= 4);
    }

    #[test]
    fn inner_split_grows_height() {
        let (_dir, t) = tree(256, 512);
        for k in 0..2000u64 {
            t.insert(&k.to_le_bytes(), &k.to_le_bytes()).unwrap();
        }
        assert!(t.stats.snapshot().b_tree_height >= 2);
        for k in 0..2000u64 {
            assert_eq!(t.lookup(&k.to_le_bytes()).unwrap(), Some(k.to_le_bytes().to_vec()));
        }
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SegmentFileStore::new(dir.path(), 4096, false).unwrap());
        let config = BufferPoolConfig::new(16);
        let stats = Stats::shared();
        let pool = Arc::new(BufferPool::new(store, config, stats.clone()));
        {
            let t = BTree::new(SegmentId(0), pool.clone(), stats.clone(), None, TreeRole::Primary).unwrap();
            t.insert(b"1", b"2").unwrap();
            t.insert(b"5", b"6").unwrap();
            t.insert(b"3", b"4").unwrap();
            t.close().unwrap();
        }
        pool.clear_all(false).unwrap();
        {
            let store2 = Arc::new(SegmentFileStore::new(dir.path(), 4096, false).unwrap());
            let config2 = BufferPoolConfig::new(16);
            let stats2 = Stats::shared();
            let pool2 = Arc::new(BufferPool::new(store2, config2, stats2.clone()));
            let t = BTree::new(SegmentId(0), pool2, stats2, None, TreeRole::Primary).unwrap();
            assert_eq!(t.lookup(b"1").unwrap(), Some(b"2".to_vec()));
            assert_eq!(t.lookup(b"5").unwrap(), Some(b"6".to_vec()));
            assert_eq!(t.lookup(b"3").unwrap(), Some(b"4".to_vec()));
        }
    }

    #[test]
    fn erase_is_a_tombstone_not_a_space_reclaim() {
        let (_dir, t) = tree(4096, 16);
        t.insert(b"key", b"value").unwrap();
        assert!(t.erase(b"key").unwrap());
        assert_eq!(t.lookup(b"key").unwrap(), None);
        assert!(!t.erase(b"key").unwrap());
        assert_eq!(t.size().unwrap(), 0);

        assert!(t.insert(b"key", b"value2").unwrap());
        assert_eq!(t.lookup(b"key").unwrap(), Some(b"value2".to_vec()));
    }

    /// Max key reachable from `page`'s subtree, following `upper` down to a
    /// leaf's last live entry.
    fn subtree_max_key(t: &BTree, page: u64) -> Vec<u8> {
        let guard = t
            .pool
            .fix(t.segment, PageId::new(page), t.page_logic.clone())
            .unwrap();
        let data = guard.read();
        if node::is_leaf(&data) {
            (0..node::slot_count(&data))
                .rev()
                .find_map(|i| {
                    if node::leaf_state(&data, i) != SlotState::Deleted {
                        Some(node::leaf_key(&data, i).to_vec())
                    } else {
                        None
                    }
                })
                .expect("leaf reachable from an inner pivot must have a live entry")
        } else {
            let upper = node::upper(&data);
            drop(data);
            drop(guard);
            subtree_max_key(t, upper)
        }
    }

    /// P6: every inner-node pivot equals the maximum key in its left
    /// subtree, recursively.
    fn assert_pivots_match_left_subtree_max(t: &BTree, page: u64) {
        let guard = t
            .pool
            .fix(t.segment, PageId::new(page), t.page_logic.clone())
            .unwrap();
        let data = guard.read();
        if node::is_leaf(&data) {
            return;
        }
        let children: Vec<(Vec<u8>, u64)> = (0..node::slot_count(&data))
            .map(|i| (node::inner_key(&data, i).to_vec(), node::inner_child(&data, i)))
            .collect();
        let upper = node::upper(&data);
        drop(data);
        drop(guard);

        for (pivot, child) in &children {
            assert_eq!(
                subtree_max_key(t, *child),
                *pivot,
                "pivot must equal the max key of its left subtree"
            );
            assert_pivots_match_left_subtree_max(t, *child);
        }
        assert_pivots_match_left_subtree_max(t, upper);
    }

    #[test]
    fn split_preserves_ordering_and_pivot_invariant() {
        let (_dir, t) = tree(256, 512);
        let mut keys: Vec<u64> = (0..3000).collect();
        keys.shuffle(&mut rand::rngs::StdRng::seed_from_u64(42));
        for &k in &keys {
            assert!(t.insert(&k.to_le_bytes(), &k.to_le_bytes()).unwrap());
        }

        let all = t.iter().unwrap();
        assert_eq!(all.len(), 3000);
        for w in all.windows(2) {
            assert!(w[0].0 < w[1].0, "ordered traversal must yield strictly increasing keys");
        }

        assert_pivots_match_left_subtree_max(&t, t.root());
    }

    #[test]
    fn oversized_key_or_value_is_rejected_not_split() {
        let (_dir, t) = tree(256, 32);
        let huge_key = vec![0u8; 200];
        let err = t.insert(&huge_key, b"v").unwrap_err();
        assert!(matches!(err, StorageError::KeyTooLarge { .. }));

        let huge_value = vec![0u8; 200];
        let err = t.insert(b"k", &huge_value).unwrap_err();
        assert!(matches!(err, StorageError::ValueTooLarge { .. }));

        assert_eq!(t.size().unwrap(), 0);
    }

    #[test]
    fn scan_respects_bounds_and_skips_tombstones() {
        let (_dir, t) = tree(4096, 16);
        for (k, v) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")] {
            t.insert(k, v).unwrap();
        }
        t.erase(b"b").unwrap();

        let all = t.iter().unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|(k, _)| k != b"b"));

        let range = t.scan(Some(b"b"), Some(b"d")).unwrap();
        assert_eq!(range, vec![(b"c".to_vec(), b"3".to_vec())]);
    }
}
