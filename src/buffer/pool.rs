//! The buffer pool: a fixed-size page cache with a pluggable eviction
//! hook.
//!
//! The pool pre-allocates `page_count` frames up front and never grows or
//! shrinks that set; each frame permanently owns one `page_size`-sized
//! byte buffer for the life of the pool. `fix`/`fix_mut` bind a frame to a
//! `(segment, page)` key, reading it from the segment store on a miss and
//! pinning it so it cannot be evicted while the caller holds the
//! returned guard. Eviction of unpinned frames runs least-recently-used,
//! and is detoured through whatever [`PageLogic`] was bound to the frame
//! at fix time, which is the seam a buffered-delta tree hooks into.
//!
//! Concurrency here is single-threaded and cooperative: one internal lock
//! serializes all frame bookkeeping, and `fix`/`fix_mut` distinguish
//! shared from exclusive access only at the level of the pin count, not
//! via a true per-frame reader-writer lock. Splitting the one lock into
//! one per frame, for genuine concurrent access, is future work.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::{Result, StorageError};
use crate::storage::SegmentStore;
use crate::types::{BufferPoolConfig, FrameKey, PageId, SegmentId};

use super::frame::{FrameState, NullPageLogic, PageLogic};
use super::lru::LruCache;
use crate::stats::Stats;

struct Frame {
    data: Box<[u8]>,
    key: Option<FrameKey>,
    state: FrameState,
    pin_count: u32,
    page_logic: Option<Arc<dyn PageLogic>>,
}

impl Frame {
    fn empty(page_size: usize) -> Self {
        Self {
            data: vec![0u8; page_size].into_boxed_slice(),
            key: None,
            state: FrameState::Undefined,
            pin_count: 0,
            page_logic: None,
        }
    }

    fn logic(&self) -> Arc<dyn PageLogic> {
        self.page_logic
            .clone()
            .unwrap_or_else(|| Arc::new(NullPageLogic))
    }
}

struct Inner {
    frames: Vec<Frame>,
    frame_map: HashMap<FrameKey, usize>,
    free_frames: Vec<usize>,
    lru: LruCache,
}

/// A fixed-capacity pool of page frames backed by a [`SegmentStore`].
pub struct BufferPool {
    store: Arc<dyn SegmentStore>,
    stats: Arc<Stats>,
    page_size: usize,
    inner: Mutex<Inner>,
}

impl BufferPool {
    pub fn new(store: Arc<dyn SegmentStore>, config: BufferPoolConfig, stats: Arc<Stats>) -> Self {
        let page_size = config.page_size;
        let frames: Vec<Frame> = (0..config.page_count).map(|_| Frame::empty(page_size)).collect();
        let free_frames: Vec<usize> = (0..frames.len()).collect();
        Self {
            store,
            stats,
            page_size,
            inner: Mutex::new(Inner {
                frames,
                frame_map: HashMap::new(),
                free_frames,
                lru: LruCache::new(config.page_count),
            }),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Fix a page for shared access, reading it from disk on a miss.
    pub fn fix(
        &self,
        segment: SegmentId,
        page: PageId,
        logic: Option<Arc<dyn PageLogic>>,
    ) -> Result<PageGuard<'_>> {
        let frame_idx = self.fix_internal(segment, page, logic)?;
        Ok(PageGuard {
            pool: self,
            frame_idx,
            segment,
            page_id: page,
        })
    }

    /// Fix a page for exclusive access. Any borrow taken through the
    /// returned guard's [`PageGuardMut::write`] marks the frame dirty
    /// (unless it is already `New`).
    pub fn fix_mut(
        &self,
        segment: SegmentId,
        page: PageId,
        logic: Option<Arc<dyn PageLogic>>,
    ) -> Result<PageGuardMut<'_>> {
        let frame_idx = self.fix_internal(segment, page, logic)?;
        {
            let mut inner = self.inner.lock();
            let frame = &mut inner.frames[frame_idx];
            if frame.state != FrameState::New {
                frame.state = FrameState::Dirty;
            }
        }
        Ok(PageGuardMut {
            pool: self,
            frame_idx,
            segment,
            page_id: page,
        })
    }

    /// Allocate a brand-new page with no on-disk image yet. The frame
    /// starts zeroed and in the `New` state.
    pub fn fix_new(
        &self,
        segment: SegmentId,
        page: PageId,
        logic: Option<Arc<dyn PageLogic>>,
    ) -> Result<PageGuardMut<'_>> {
        let mut inner = self.inner.lock();
        let key = FrameKey::new(segment, page);
        if inner.frame_map.contains_key(&key) {
            return Err(StorageError::invalid_operation(format!(
                "fix_new called for already-resident page {key}"
            )));
        }

        let frame_idx = self.acquire_frame(&mut inner)?;
        {
            let frame = &mut inner.frames[frame_idx];
            frame.data.fill(0);
            frame.key = Some(key);
            frame.state = FrameState::New;
            frame.pin_count = 1;
            frame.page_logic = logic;
        }
        inner.frame_map.insert(key, frame_idx);
        self.stats.incr_pages_created();
        trace!(page = %page, segment = %segment, "fix_new");

        Ok(PageGuardMut {
            pool: self,
            frame_idx,
            segment,
            page_id: page,
        })
    }

    fn fix_internal(
        &self,
        segment: SegmentId,
        page: PageId,
        logic: Option<Arc<dyn PageLogic>>,
    ) -> Result<usize> {
        let key = FrameKey::new(segment, page);
        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.frame_map.get(&key) {
            let frame = &mut inner.frames[idx];
            if frame.pin_count == 0 {
                inner.lru.remove(idx);
            }
            frame.pin_count += 1;
            return Ok(idx);
        }

        let frame_idx = self.acquire_frame(&mut inner)?;
        self.store
            .read_page(segment, page, &mut inner.frames[frame_idx].data)?;
        {
            let frame = &mut inner.frames[frame_idx];
            frame.key = Some(key);
            frame.state = FrameState::Clean;
            frame.pin_count = 1;
            frame.page_logic = logic;
        }
        // page_logic must be bound before after_load runs: the hook that
        // matters (the buffered-delta tree's replay) is keyed off the
        // logic the caller just supplied, not whatever was left over from
        // this frame's previous occupant.
        let logic = inner.frames[frame_idx].logic();
        logic.after_load(&mut inner.frames[frame_idx].data, page);
        inner.frame_map.insert(key, frame_idx);
        Ok(frame_idx)
    }

    /// Obtain an unbound frame index, evicting the least-recently-used
    /// unpinned frame if the pool is full.
    fn acquire_frame(&self, inner: &mut Inner) -> Result<usize> {
        if let Some(idx) = inner.free_frames.pop() {
            return Ok(idx);
        }

        let victim = inner
            .lru
            .pop_lru()
            .ok_or(StorageError::BufferPoolExhausted)?;
        self.unload(inner, victim)?;
        Ok(victim)
    }

    /// Run a frame's page logic and, if it says to, write it back, then
    /// unbind it from its key so it can be reused.
    fn unload(&self, inner: &mut Inner, idx: usize) -> Result<()> {
        let key = {
            let frame = &inner.frames[idx];
            frame.key.expect("lru/free candidate must be bound")
        };
        debug_assert_eq!(inner.frames[idx].pin_count, 0);

        self.write_through(inner, idx, key)?;

        let frame = &mut inner.frames[idx];
        inner.frame_map.remove(&key);
        frame.key = None;
        frame.state = FrameState::Undefined;
        frame.page_logic = None;
        self.stats.incr_pages_evicted();
        Ok(())
    }

    /// Invoke `before_unload` and write the page back if it asks to,
    /// without unbinding the frame. Leaves the frame `Clean`.
    fn write_through(&self, inner: &mut Inner, idx: usize, key: FrameKey) -> Result<()> {
        let frame = &mut inner.frames[idx];
        if frame.state == FrameState::Undefined || frame.state == FrameState::Clean {
            return Ok(());
        }

        let logic = frame.logic();
        let (should_write, force_flush) =
            logic.before_unload(&mut frame.data, frame.state, key.page(), self.page_size);

        if force_flush || should_write {
            self.store.write_page(key.segment(), key.page(), &frame.data)?;
            self.stats.incr_pages_written();
            self.stats
                .add_bytes_written_physically(self.page_size as u64);
        } else {
            self.stats.incr_pages_write_deferred();
        }
        frame.state = FrameState::Clean;
        Ok(())
    }

    /// Write back every dirty or new resident frame without evicting it,
    /// then sync every touched segment file.
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let bound: Vec<(usize, FrameKey)> = inner
            .frames
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.key.map(|k| (i, k)))
            .collect();
        for (idx, key) in bound {
            self.write_through(&mut inner, idx, key)?;
        }
        drop(inner);
        self.store.sync_all()?;
        debug!("flush_all complete");
        Ok(())
    }

    /// Flush a single resident page, if bound, leaving it cached.
    pub fn flush_page(&self, segment: SegmentId, page: PageId) -> Result<()> {
        let key = FrameKey::new(segment, page);
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.frame_map.get(&key) {
            self.write_through(&mut inner, idx, key)?;
        }
        Ok(())
    }

    /// Reset the pool to its freshly constructed state. If `write_back`
    /// is true, every dirty or new frame is flushed first; otherwise
    /// in-memory changes that were never written are silently discarded.
    pub fn clear_all(&self, write_back: bool) -> Result<()> {
        if write_back {
            self.flush_all()?;
        }
        let mut inner = self.inner.lock();
        for frame in inner.frames.iter_mut() {
            frame.data.fill(0);
            frame.key = None;
            frame.state = FrameState::Undefined;
            frame.pin_count = 0;
            frame.page_logic = None;
        }
        inner.frame_map.clear();
        inner.free_frames = (0..inner.frames.len()).collect();
        inner.lru = LruCache::new(inner.frames.len());
        Ok(())
    }

    fn unfix(&self, frame_idx: usize) {
        let mut inner = self.inner.lock();
        let frame = &mut inner.frames[frame_idx];
        debug_assert!(frame.pin_count > 0);
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            inner.lru.access(frame_idx);
        }
    }
}

/// A shared-access handle to a fixed page. Dropping it unpins the frame.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    frame_idx: usize,
    segment: SegmentId,
    page_id: PageId,
}

impl<'a> PageGuard<'a> {
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Borrow the page's raw bytes. Internally this takes the pool's
    /// bookkeeping lock for as long as the returned guard lives.
    pub fn read(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.pool.inner.lock(), |inner: &mut Inner| {
            &mut *inner.frames[self.frame_idx].data
        })
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unfix(self.frame_idx);
    }
}

/// An exclusive-access handle to a fixed page. Dropping it unpins the
/// frame.
pub struct PageGuardMut<'a> {
    pool: &'a BufferPool,
    frame_idx: usize,
    segment: SegmentId,
    page_id: PageId,
}

impl<'a> PageGuardMut<'a> {
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.pool.inner.lock(), |inner: &mut Inner| {
            &mut *inner.frames[self.frame_idx].data
        })
    }

    /// Borrow the page's raw bytes mutably.
    pub fn write(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.pool.inner.lock(), |inner: &mut Inner| {
            &mut *inner.frames[self.frame_idx].data
        })
    }

    /// Mark the frame dirty even if the caller only read through
    /// [`PageGuardMut::read`]. `fix_mut`/`fix_new` already set the initial
    /// state; this exists for code paths that want to be explicit.
    pub fn mark_dirty(&self) {
        let mut inner = self.pool.inner.lock();
        let frame = &mut inner.frames[self.frame_idx];
        if frame.state != FrameState::New {
            frame.state = FrameState::Dirty;
        }
    }
}

impl Drop for PageGuardMut<'_> {
    fn drop(&mut self) {
        self.pool.unfix(self.frame_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SegmentFileStore;
    use crate::types::BufferPoolConfig;

    fn pool(page_count: usize) -> (tempfile::TempDir, BufferPool) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SegmentFileStore::new(dir.path(), 64, false).unwrap());
        let config = BufferPoolConfig::new(page_count).with_page_size(64);
        let pool = BufferPool::new(store, config, Stats::shared());
        (dir, pool)
    }

    #[test]
    fn fix_new_then_read_back_after_eviction() {
        let (_dir, pool) = pool(1);
        {
            let guard = pool.fix_new(SegmentId(0), PageId::new(0), None).unwrap();
            guard.write()[0] = 42;
        }
        // Only one frame: fixing a second page must evict the first.
        {
            let _second = pool.fix_new(SegmentId(0), PageId::new(1), None).unwrap();
        }
        let guard = pool.fix(SegmentId(0), PageId::new(0), None).unwrap();
        assert_eq!(guard.read()[0], 42);
    }

    #[test]
    fn exhausted_when_everything_pinned() {
        let (_dir, pool) = pool(1);
        let _held = pool.fix_new(SegmentId(0), PageId::new(0), None).unwrap();
        let err = pool.fix_new(SegmentId(0), PageId::new(1), None);
        assert!(matches!(err, Err(StorageError::BufferPoolExhausted)));
    }

    #[test]
    fn buffer_full_then_retry_succeeds_after_unfix() {
        let (_dir, pool) = pool(1);
        let held = pool.fix_mut(SegmentId(348), PageId::new(1), None).unwrap();
        let err = pool.fix_mut(SegmentId(348), PageId::new(2), None);
        assert!(matches!(err, Err(StorageError::BufferPoolExhausted)));
        drop(held);
        let retried = pool.fix_mut(SegmentId(348), PageId::new(2), None);
        assert!(retried.is_ok(), "retry after releasing the pin must succeed");
    }

    #[test]
    fn flush_all_persists_without_evicting() {
        let (_dir, pool) = pool(2);
        {
            let guard = pool.fix_new(SegmentId(0), PageId::new(0), None).unwrap();
            guard.write()[0] = 7;
        }
        pool.flush_all().unwrap();
        let guard = pool.fix(SegmentId(0), PageId::new(0), None).unwrap();
        assert_eq!(guard.read()[0], 7);
    }
}
