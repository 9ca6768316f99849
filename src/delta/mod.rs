//! Delta records and the page-keyed tree that stores them.
//!
//! A `Deltas` blob captures the logical effect of a dirty page without
//! rewriting the page itself: one record per changed slot, each an op code
//! plus the slot's (key, value). The delta tree maps page id to this blob
//! using the same [`BTree`] as everything else, just with an 8-byte
//! natural-order key and the default (always-write) page logic — see
//! [`crate::bbbtree`] for the eviction hook that populates it.

use std::sync::Arc;

use crate::buffer::BufferPool;
use crate::error::{Result, StorageError};
use crate::stats::Stats;
use crate::types::{PageId, SegmentId};

use crate::btree::{BTree, TreeRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Insert,
    Update,
    Delete,
}

impl OpCode {
    fn as_byte(self) -> u8 {
        match self {
            OpCode::Insert => 0,
            OpCode::Update => 1,
            OpCode::Delete => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(OpCode::Insert),
            1 => Ok(OpCode::Update),
            2 => Ok(OpCode::Delete),
            other => Err(StorageError::corruption(format!("unknown delta op code {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub op: OpCode,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Delta {
    pub fn serialized_size(&self) -> usize {
        1 + 2 + 2 + self.key.len() + self.value.len()
    }
}

/// A length-prefixed sequence of [`Delta`] records, in the order they were
/// applied. Wire format: `u16 count` then, per record, `(u8 op, u16
/// key_size, u16 value_size, key_bytes, value_bytes)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deltas(pub Vec<Delta>);

impl Deltas {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn serialized_size(&self) -> usize {
        2 + self.0.iter().map(Delta::serialized_size).sum::<usize>()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        out.extend_from_slice(&(self.0.len() as u16).to_le_bytes());
        for d in &self.0 {
            out.push(d.op.as_byte());
            out.extend_from_slice(&(d.key.len() as u16).to_le_bytes());
            out.extend_from_slice(&(d.value.len() as u16).to_le_bytes());
            out.extend_from_slice(&d.key);
            out.extend_from_slice(&d.value);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(StorageError::corruption("deltas blob shorter than its count prefix"));
        }
        let count = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        let mut pos = 2;
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            if bytes.len() < pos + 5 {
                return Err(StorageError::corruption("deltas blob truncated in record header"));
            }
            let op = OpCode::from_byte(bytes[pos])?;
            let key_size = u16::from_le_bytes([bytes[pos + 1], bytes[pos + 2]]) as usize;
            let value_size = u16::from_le_bytes([bytes[pos + 3], bytes[pos + 4]]) as usize;
            pos += 5;
            if bytes.len() < pos + key_size + value_size {
                return Err(StorageError::corruption("deltas blob truncated in record payload"));
            }
            let key = bytes[pos..pos + key_size].to_vec();
            pos += key_size;
            let value = bytes[pos..pos + value_size].to_vec();
            pos += value_size;
            records.push(Delta { op, key, value });
        }
        Ok(Deltas(records))
    }
}

fn encode_page_id(page_id: u64) -> [u8; 8] {
    page_id.to_le_bytes()
}

/// A B+-tree keyed by page id, valued by a serialized [`Deltas`] blob, with
/// at most one entry per page id.
pub struct DeltaTree {
    inner: BTree,
}

impl DeltaTree {
    pub fn new(segment: SegmentId, pool: Arc<BufferPool>, stats: Arc<Stats>) -> Result<Self> {
        let inner = BTree::new(segment, pool, stats, None, TreeRole::Delta)?;
        Ok(Self { inner })
    }

    /// Insert the deltas for `page_id`. A page id already present is a
    /// caller bug: the previous entry should have been erased on load.
    pub fn insert(&self, page_id: PageId, deltas: &Deltas) -> Result<()> {
        let key = encode_page_id(page_id.value());
        let inserted = self.inner.insert(&key, &deltas.serialize())?;
        if !inserted {
            return Err(StorageError::DeltaAlreadyExists(page_id));
        }
        Ok(())
    }

    /// Look up and remove the deltas for `page_id`, if any.
    pub fn take(&self, page_id: PageId) -> Result<Option<Deltas>> {
        let key = encode_page_id(page_id.value());
        match self.inner.lookup(&key)? {
            None => Ok(None),
            Some(bytes) => {
                self.inner.erase(&key)?;
                Ok(Some(Deltas::deserialize(&bytes)?))
            }
        }
    }

    pub fn contains(&self, page_id: PageId) -> Result<bool> {
        let key = encode_page_id(page_id.value());
        Ok(self.inner.lookup(&key)?.is_some())
    }

    pub fn size(&self) -> Result<usize> {
        self.inner.size()
    }

    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_roundtrips_through_serialize() {
        let deltas = Deltas(vec![
            Delta { op: OpCode::Insert, key: b"k1".to_vec(), value: b"v1".to_vec() },
            Delta { op: OpCode::Delete, key: b"k2".to_vec(), value: Vec::new() },
        ]);
        let bytes = deltas.serialize();
        assert_eq!(bytes.len(), deltas.serialized_size());
        let back = Deltas::deserialize(&bytes).unwrap();
        assert_eq!(back, deltas);
    }

    #[test]
    fn empty_deltas_roundtrip() {
        let deltas = Deltas::default();
        let bytes = deltas.serialize();
        assert_eq!(bytes, vec![0u8, 0u8]);
        assert_eq!(Deltas::deserialize(&bytes).unwrap(), deltas);
    }

    #[test]
    fn truncated_blob_is_corruption() {
        let err = Deltas::deserialize(&[3, 0, 1]).unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }

    fn fresh_delta_tree() -> (tempfile::TempDir, DeltaTree) {
        use crate::storage::SegmentFileStore;
        use crate::types::BufferPoolConfig;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SegmentFileStore::new(dir.path(), 4096, false).unwrap());
        let config = BufferPoolConfig::new(32);
        let stats = Stats::shared();
        let pool = Arc::new(BufferPool::new(store, config, stats.clone()));
        let tree = DeltaTree::new(SegmentId(0), pool, stats).unwrap();
        (dir, tree)
    }

    #[test]
    fn insert_then_take_roundtrips() {
        let (_dir, tree) = fresh_delta_tree();
        let page = PageId::new(7);
        let deltas = Deltas(vec![Delta { op: OpCode::Insert, key: b"a".to_vec(), value: b"1".to_vec() }]);
        tree.insert(page, &deltas).unwrap();
        assert!(tree.contains(page).unwrap());

        let taken = tree.take(page).unwrap().unwrap();
        assert_eq!(taken, deltas);
        assert!(!tree.contains(page).unwrap());
        assert_eq!(tree.take(page).unwrap(), None);
    }

    #[test]
    fn double_insert_for_same_page_is_an_error() {
        let (_dir, tree) = fresh_delta_tree();
        let page = PageId::new(3);
        let deltas = Deltas(vec![Delta { op: OpCode::Insert, key: b"a".to_vec(), value: b"1".to_vec() }]);
        tree.insert(page, &deltas).unwrap();
        let err = tree.insert(page, &deltas).unwrap_err();
        assert!(matches!(err, StorageError::DeltaAlreadyExists(_)));
    }
}
