//! Segment-file storage: one random-access file per segment.
//!
//! Unlike a single whole-database file, a segment store never needs a
//! shared file-level header: each segment is just a flat array of
//! fixed-size pages, and whatever metadata a segment's contents carry (the
//! B+-tree's root and free-page counter, for instance) lives on page 0 of
//! that segment like any other page. This mirrors the `SegmentId` address
//! space the buffer pool already works in, so the only thing this layer
//! owns is turning `(segment, page)` into bytes on disk.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, StorageError};
use crate::types::{PageId, SegmentId};

/// Abstraction over segment-file I/O, so the buffer pool can be tested
/// against an in-memory stand-in without touching a filesystem.
pub trait SegmentStore: Send + Sync {
    /// Size in bytes of every page this store serves.
    fn page_size(&self) -> usize;

    /// Read one page's worth of bytes. Pages past the current end of the
    /// segment file read back as zero, so a freshly created segment can be
    /// addressed before anything has been written to it.
    fn read_page(&self, segment: SegmentId, page: PageId, buf: &mut [u8]) -> Result<()>;

    /// Write one page's worth of bytes, extending the segment file if
    /// necessary.
    fn write_page(&self, segment: SegmentId, page: PageId, buf: &[u8]) -> Result<()>;

    /// Flush a single segment's file to disk.
    fn sync(&self, segment: SegmentId) -> Result<()>;

    /// Flush every segment file this store has touched.
    fn sync_all(&self) -> Result<()>;
}

/// A [`SegmentStore`] backed by one file per segment under a base
/// directory, named `seg_<id>.db`.
pub struct SegmentFileStore {
    base_dir: PathBuf,
    page_size: usize,
    clear: bool,
    files: RwLock<HashMap<SegmentId, Arc<Mutex<File>>>>,
}

impl SegmentFileStore {
    /// Open (creating if necessary) a segment-file store rooted at
    /// `base_dir`. When `clear` is true, any segment file opened for the
    /// first time by this store instance is truncated to empty before
    /// use.
    pub fn new(base_dir: impl Into<PathBuf>, page_size: usize, clear: bool) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            page_size,
            clear,
            files: RwLock::new(HashMap::new()),
        })
    }

    fn segment_path(&self, segment: SegmentId) -> PathBuf {
        self.base_dir.join(format!("seg_{}.db", segment.value()))
    }

    fn file_for(&self, segment: SegmentId) -> Result<Arc<Mutex<File>>> {
        if let Some(file) = self.files.read().get(&segment) {
            return Ok(file.clone());
        }

        let mut files = self.files.write();
        if let Some(file) = files.get(&segment) {
            return Ok(file.clone());
        }

        let path = self.segment_path(segment);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(self.clear)
            .open(&path)?;
        let file = Arc::new(Mutex::new(file));
        files.insert(segment, file.clone());
        Ok(file)
    }

    /// Directory this store writes segment files into.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl SegmentStore for SegmentFileStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, segment: SegmentId, page: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        let file = self.file_for(segment)?;
        let mut file = file.lock();
        let offset = page.value() * self.page_size as u64;
        file.seek(SeekFrom::Start(offset))?;

        buf.fill(0);
        let mut read_so_far = 0;
        loop {
            match file.read(&mut buf[read_so_far..]) {
                Ok(0) => break,
                Ok(n) => read_so_far += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(())
    }

    fn write_page(&self, segment: SegmentId, page: PageId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        let file = self.file_for(segment)?;
        let mut file = file.lock();
        let offset = page.value() * self.page_size as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn sync(&self, segment: SegmentId) -> Result<()> {
        let file = self.file_for(segment)?;
        file.lock().sync_all()?;
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        let segments: Vec<SegmentId> = self.files.read().keys().copied().collect();
        for segment in segments {
            self.sync(segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_past_eof_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentFileStore::new(dir.path(), 64, false).unwrap();
        let mut buf = vec![0xAAu8; 64];
        store
            .read_page(SegmentId(0), PageId::new(3), &mut buf)
            .unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentFileStore::new(dir.path(), 64, false).unwrap();
        let mut page = vec![0u8; 64];
        page[0] = 7;
        page[63] = 9;
        store.write_page(SegmentId(1), PageId::new(2), &page).unwrap();

        let mut buf = vec![0u8; 64];
        store
            .read_page(SegmentId(1), PageId::new(2), &mut buf)
            .unwrap();
        assert_eq!(buf, page);
    }

    #[test]
    fn segments_are_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentFileStore::new(dir.path(), 64, false).unwrap();
        store
            .write_page(SegmentId(0), PageId::new(0), &vec![1u8; 64])
            .unwrap();
        store
            .write_page(SegmentId(1), PageId::new(0), &vec![2u8; 64])
            .unwrap();

        let mut buf = vec![0u8; 64];
        store.read_page(SegmentId(0), PageId::new(0), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 1));
        store.read_page(SegmentId(1), PageId::new(0), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 2));
    }

    #[test]
    fn clear_truncates_existing_segment() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SegmentFileStore::new(dir.path(), 64, false).unwrap();
            store
                .write_page(SegmentId(0), PageId::new(0), &vec![5u8; 64])
                .unwrap();
        }
        let store = SegmentFileStore::new(dir.path(), 64, true).unwrap();
        let mut buf = vec![0xFFu8; 64];
        store.read_page(SegmentId(0), PageId::new(0), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }
}
