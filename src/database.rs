//! The free-space inventory, the slotted-pages tuple store, and a thin
//! `Database` facade tying a B+-tree index to fixed-size tuple storage.
//!
//! This is the "toy" collaborator the core storage design treats as
//! out of scope: the hard part is the buffer pool and the B+-tree it backs
//! (see [`crate::btree`], [`crate::bbbtree`]). What follows is the minimal
//! wiring needed to store actual tuples behind an index rather than bare
//! key/value byte strings.

use std::sync::Arc;

use crate::btree::{BTree, TreeRole};
use crate::buffer::BufferPool;
use crate::error::{Result, StorageError};
use crate::page::slotted;
use crate::page::{SlottedPage, SlottedPageMut};
use crate::stats::Stats;
use crate::types::{PageId, SegmentId, Tid};

/// Append-only free-space inventory for a slotted-pages segment.
///
/// Tracks only the count of allocated pages and the free space left on the
/// most recently allocated one. Earlier pages are never revisited, so
/// space freed by an `erase` on anything but the last page is not
/// reclaimed by this inventory. Not meant for index bootstrapping, and
/// does not maintain itself across more than the one segment it is
/// constructed for.
pub struct FreeSpaceInventory {
    segment: SegmentId,
    pool: Arc<BufferPool>,
}

impl FreeSpaceInventory {
    /// `segment` holds nothing but this inventory's own header page (page
    /// 0); it must be distinct from the segment the pages it tracks live
    /// in.
    pub fn new(segment: SegmentId, pool: Arc<BufferPool>) -> Self {
        Self { segment, pool }
    }

    fn read_header(&self) -> Result<(u64, u64)> {
        let guard = self.pool.fix(self.segment, PageId::new(0), None)?;
        let data = guard.read();
        let allocated_pages = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let free_space = u64::from_le_bytes(data[8..16].try_into().unwrap());
        Ok((allocated_pages, free_space))
    }

    fn write_header(&self, allocated_pages: u64, free_space: u64) -> Result<()> {
        let guard = self.pool.fix_mut(self.segment, PageId::new(0), None)?;
        let mut data = guard.write();
        data[0..8].copy_from_slice(&allocated_pages.to_le_bytes());
        data[8..16].copy_from_slice(&free_space.to_le_bytes());
        Ok(())
    }

    /// The most recently allocated page, if it has at least
    /// `required_space` bytes free.
    pub fn find(&self, required_space: usize) -> Result<Option<PageId>> {
        let (allocated_pages, free_space) = self.read_header()?;
        if allocated_pages == 0 || (free_space as usize) < required_space {
            return Ok(None);
        }
        Ok(Some(PageId::new(allocated_pages)))
    }

    /// Record a page's free space after an allocation or erase on it.
    pub fn update(&self, _target_page: PageId, free_space: usize) -> Result<()> {
        let (allocated_pages, _) = self.read_header()?;
        self.write_header(allocated_pages, free_space as u64)
    }

    /// Record a new page as the inventory's latest. Pages in the tracked
    /// segment are numbered starting at 1 (page 0 there is free for the
    /// caller to use as it likes, since this inventory lives on its own
    /// segment).
    pub fn create_new_page(&self, initial_free_space: usize) -> Result<PageId> {
        let (allocated_pages, _) = self.read_header()?;
        let new_page_id = allocated_pages + 1;
        self.write_header(new_page_id, initial_free_space as u64)?;
        Ok(PageId::new(new_page_id))
    }
}

/// A segment of slotted pages holding opaque fixed-content tuples,
/// addressed by [`Tid`]. Allocation consults a [`FreeSpaceInventory`] for
/// an existing page with room before creating a new one.
pub struct TupleStore {
    segment: SegmentId,
    pool: Arc<BufferPool>,
    space_inventory: Arc<FreeSpaceInventory>,
}

impl TupleStore {
    pub fn new(segment: SegmentId, pool: Arc<BufferPool>, space_inventory: Arc<FreeSpaceInventory>) -> Self {
        Self { segment, pool, space_inventory }
    }

    /// Write `payload` into a fresh slot, creating a new page if none of
    /// the inventory's pages has room.
    pub fn allocate(&self, payload: &[u8]) -> Result<Tid> {
        if let Some(page_id) = self.space_inventory.find(payload.len())? {
            let guard = self.pool.fix_mut(self.segment, page_id, None)?;
            let (slot, free) = {
                let mut data = guard.write();
                let mut page = SlottedPageMut::new(&mut data);
                let slot = page.allocate(payload)?;
                (slot, page.free_space())
            };
            drop(guard);
            self.space_inventory.update(page_id, free)?;
            return Ok(Tid::new(page_id, slot));
        }

        let page_size = self.pool.page_size();
        let page_id = self.space_inventory.create_new_page(page_size)?;
        let guard = self.pool.fix_new(self.segment, page_id, None)?;
        let (slot, free) = {
            let mut data = guard.write();
            slotted::init(&mut data);
            let mut page = SlottedPageMut::new(&mut data);
            let slot = page.allocate(payload)?;
            (slot, page.free_space())
        };
        drop(guard);
        self.space_inventory.update(page_id, free)?;
        Ok(Tid::new(page_id, slot))
    }

    /// Read a tuple's bytes back.
    pub fn read(&self, tid: Tid) -> Result<Vec<u8>> {
        let guard = self.pool.fix(self.segment, tid.page(), None)?;
        let data = guard.read();
        SlottedPage::new(&data)
            .read(tid.slot())
            .map(|b| b.to_vec())
            .ok_or_else(|| StorageError::invalid_operation(format!("tid {tid} has no tuple")))
    }

    /// Overwrite a tuple in place. `payload` must be exactly the size it
    /// was allocated with.
    pub fn write(&self, tid: Tid, payload: &[u8]) -> Result<()> {
        let guard = self.pool.fix_mut(self.segment, tid.page(), None)?;
        let mut data = guard.write();
        SlottedPageMut::new(&mut data).write(tid.slot(), payload)
    }

    /// Tombstone a tuple's slot. The free-space inventory is updated for
    /// `tid`'s page, but only benefits future allocations if it happens to
    /// still be the inventory's most recently allocated page.
    pub fn erase(&self, tid: Tid) -> Result<()> {
        let guard = self.pool.fix_mut(self.segment, tid.page(), None)?;
        let free = {
            let mut data = guard.write();
            let mut page = SlottedPageMut::new(&mut data);
            page.erase(tid.slot())?;
            page.free_space()
        };
        drop(guard);
        self.space_inventory.update(tid.page(), free)
    }
}

/// A fixed-schema tuple: a `u64` key and a `u64` value, matching the
/// collaborator's compile-time-fixed schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuple {
    pub key: u64,
    pub value: u64,
}

impl Tuple {
    pub fn new(key: u64, value: u64) -> Self {
        Self { key, value }
    }

    fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..8].copy_from_slice(&self.key.to_le_bytes());
        out[8..16].copy_from_slice(&self.value.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 16 {
            return Err(StorageError::corruption(format!(
                "tuple record is {} bytes, expected 16",
                bytes.len()
            )));
        }
        Ok(Self {
            key: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            value: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        })
    }
}

/// Ties a [`BTree`] index (keyed by a tuple's `u64` key, valued by the
/// [`Tid`] of its record) to a [`TupleStore`]. The schema is fixed at
/// compile time to one `u64`-keyed, `u64`-valued tuple shape.
pub struct Database {
    index: BTree,
    records: TupleStore,
}

impl Database {
    /// `index_segment` and `fsi_segment` and `records_segment` must all be
    /// distinct segment ids sharing `pool`.
    pub fn new(
        pool: Arc<BufferPool>,
        stats: Arc<Stats>,
        index_segment: SegmentId,
        fsi_segment: SegmentId,
        records_segment: SegmentId,
    ) -> Result<Self> {
        let index = BTree::new(index_segment, pool.clone(), stats, None, TreeRole::Primary)?;
        let space_inventory = Arc::new(FreeSpaceInventory::new(fsi_segment, pool.clone()));
        let records = TupleStore::new(records_segment, pool, space_inventory);
        Ok(Self { index, records })
    }

    /// Insert a tuple. Fails if its key is already present; the record
    /// written for it is erased again so a failed insert leaves no trace.
    pub fn insert(&self, tuple: Tuple) -> Result<()> {
        let tid = self.records.allocate(&tuple.to_bytes())?;
        let key_bytes = tuple.key.to_le_bytes();
        let inserted = self.index.insert(&key_bytes, &tid.to_bytes())?;
        if !inserted {
            self.records.erase(tid)?;
            return Err(StorageError::invalid_operation(format!(
                "key {} already in database",
                tuple.key
            )));
        }
        Ok(())
    }

    /// Insert many tuples in order. Keys must not already be present.
    pub fn insert_all(&self, tuples: impl IntoIterator<Item = Tuple>) -> Result<()> {
        for tuple in tuples {
            self.insert(tuple)?;
        }
        Ok(())
    }

    pub fn get(&self, key: u64) -> Result<Option<Tuple>> {
        let key_bytes = key.to_le_bytes();
        match self.index.lookup(&key_bytes)? {
            None => Ok(None),
            Some(tid_bytes) => {
                let tid = Tid::from_bytes(&tid_bytes);
                let record = self.records.read(tid)?;
                Ok(Some(Tuple::from_bytes(&record)?))
            }
        }
    }

    /// Not implemented: the collaborator this is grounded on never
    /// finished wiring reclaiming an index entry to also erasing its
    /// record, and this crate does not invent that behavior.
    pub fn erase(&self, _key: u64) -> Result<()> {
        Err(StorageError::invalid_operation("erase not implemented"))
    }

    pub fn size(&self) -> Result<usize> {
        self.index.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SegmentFileStore;
    use crate::types::BufferPoolConfig;

    fn database() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SegmentFileStore::new(dir.path(), 1024, false).unwrap());
        let config = BufferPoolConfig::new(32).with_page_size(1024);
        let stats = Stats::shared();
        let pool = Arc::new(BufferPool::new(store, config, stats.clone()));
        let db = Database::new(
            pool,
            stats,
            SegmentId(0),
            SegmentId(1),
            SegmentId(2),
        )
        .unwrap();
        (dir, db)
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let (_dir, db) = database();
        db.insert(Tuple::new(1, 100)).unwrap();
        db.insert(Tuple::new(2, 200)).unwrap();

        assert_eq!(db.get(1).unwrap(), Some(Tuple::new(1, 100)));
        assert_eq!(db.get(2).unwrap(), Some(Tuple::new(2, 200)));
        assert_eq!(db.get(3).unwrap(), None);
        assert_eq!(db.size().unwrap(), 2);
    }

    #[test]
    fn duplicate_key_insert_is_rejected_and_record_is_cleaned_up() {
        let (_dir, db) = database();
        db.insert(Tuple::new(1, 100)).unwrap();
        assert!(db.insert(Tuple::new(1, 999)).is_err());
        assert_eq!(db.get(1).unwrap(), Some(Tuple::new(1, 100)));
    }

    #[test]
    fn many_tuples_span_multiple_pages() {
        let (_dir, db) = database();
        for k in 0..200u64 {
            db.insert(Tuple::new(k, k * 10)).unwrap();
        }
        assert_eq!(db.size().unwrap(), 200);
        for k in 0..200u64 {
            assert_eq!(db.get(k).unwrap(), Some(Tuple::new(k, k * 10)));
        }
    }

    #[test]
    fn erase_is_not_implemented() {
        let (_dir, db) = database();
        db.insert(Tuple::new(1, 1)).unwrap();
        assert!(db.erase(1).is_err());
    }
}
