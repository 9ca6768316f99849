//! B+-tree node layout, overlaid directly on a buffer-pool frame's bytes.
//!
//! This is a different slot shape from [`crate::page::slotted`]: a generic
//! slotted page holds opaque payloads behind an `(offset, size)` descriptor,
//! while a tree node's slots carry the extra fields spec'd for pivots and
//! leaf entries (child pointers, split key/value sizes, and the
//! buffered-delta tree's per-slot dirty state byte). The two share the same
//! silhouette — forward-growing descriptor array, backward-growing payload
//! region — but are read and written through separate code paths.
//!
//! ```text
//! [ slot_count:u16 | data_start:u32 | level:u16 | upper:u64 ][ slots... ]  free  [ ...payloads ]
//! ```
//!
//! `level == 0` marks a leaf. Inner nodes route keys strictly greater than
//! every pivot through `upper`; leaves have no use for it and leave it zero.

use crate::error::{Result, StorageError};
use crate::types::SlotState;

pub const HEADER_SIZE: usize = 16;
pub const LEAF_SLOT_SIZE: usize = 9;
pub const INNER_SLOT_SIZE: usize = 15;

fn slot_count_raw(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

fn set_slot_count_raw(data: &mut [u8], n: u16) {
    data[0..2].copy_from_slice(&n.to_le_bytes());
}

fn data_start_raw(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[2..6].try_into().unwrap())
}

fn set_data_start_raw(data: &mut [u8], v: u32) {
    data[2..6].copy_from_slice(&v.to_le_bytes());
}

pub fn level(data: &[u8]) -> u16 {
    u16::from_le_bytes(data[6..8].try_into().unwrap())
}

fn set_level(data: &mut [u8], level: u16) {
    data[6..8].copy_from_slice(&level.to_le_bytes());
}

pub fn upper(data: &[u8]) -> u64 {
    u64::from_le_bytes(data[8..16].try_into().unwrap())
}

pub fn set_upper(data: &mut [u8], child: u64) {
    data[8..16].copy_from_slice(&child.to_le_bytes());
}

pub fn is_leaf(data: &[u8]) -> bool {
    level(data) == 0
}

pub fn slot_count(data: &[u8]) -> usize {
    slot_count_raw(data) as usize
}

fn slot_size(data: &[u8]) -> usize {
    if is_leaf(data) {
        LEAF_SLOT_SIZE
    } else {
        INNER_SLOT_SIZE
    }
}

/// Bytes available for one more slot descriptor plus its payload, per
/// spec's `data_start - header_size - slot_count*slot_size` formula.
pub fn free_space(data: &[u8]) -> usize {
    let used = HEADER_SIZE + slot_count(data) * slot_size(data);
    (data_start_raw(data) as usize).saturating_sub(used)
}

pub fn init_leaf(data: &mut [u8]) {
    set_slot_count_raw(data, 0);
    set_data_start_raw(data, data.len() as u32);
    set_level(data, 0);
    set_upper(data, 0);
}

pub fn init_inner(data: &mut [u8], level_value: u16, upper_child: u64) {
    debug_assert!(level_value > 0, "level 0 is reserved for leaves");
    set_slot_count_raw(data, 0);
    set_data_start_raw(data, data.len() as u32);
    set_level(data, level_value);
    set_upper(data, upper_child);
}

fn leaf_slot_at(data: &[u8], i: usize) -> usize {
    HEADER_SIZE + i * LEAF_SLOT_SIZE
}

fn inner_slot_at(data: &[u8], i: usize) -> usize {
    let _ = data;
    HEADER_SIZE + i * INNER_SLOT_SIZE
}

fn read_leaf_slot(data: &[u8], i: usize) -> (u32, u16, u16, u8) {
    let at = leaf_slot_at(data, i);
    let offset = u32::from_le_bytes(data[at..at + 4].try_into().unwrap());
    let key_size = u16::from_le_bytes(data[at + 4..at + 6].try_into().unwrap());
    let value_size = u16::from_le_bytes(data[at + 6..at + 8].try_into().unwrap());
    let state = data[at + 8];
    (offset, key_size, value_size, state)
}

fn write_leaf_slot(data: &mut [u8], i: usize, offset: u32, key_size: u16, value_size: u16, state: u8) {
    let at = leaf_slot_at(data, i);
    data[at..at + 4].copy_from_slice(&offset.to_le_bytes());
    data[at + 4..at + 6].copy_from_slice(&key_size.to_le_bytes());
    data[at + 6..at + 8].copy_from_slice(&value_size.to_le_bytes());
    data[at + 8] = state;
}

fn read_inner_slot(data: &[u8], i: usize) -> (u64, u32, u16, u8) {
    let at = inner_slot_at(data, i);
    let child = u64::from_le_bytes(data[at..at + 8].try_into().unwrap());
    let offset = u32::from_le_bytes(data[at + 8..at + 12].try_into().unwrap());
    let key_size = u16::from_le_bytes(data[at + 12..at + 14].try_into().unwrap());
    let state = data[at + 14];
    (child, offset, key_size, state)
}

fn write_inner_slot(data: &mut [u8], i: usize, child: u64, offset: u32, key_size: u16, state: u8) {
    let at = inner_slot_at(data, i);
    data[at..at + 8].copy_from_slice(&child.to_le_bytes());
    data[at + 8..at + 12].copy_from_slice(&offset.to_le_bytes());
    data[at + 12..at + 14].copy_from_slice(&key_size.to_le_bytes());
    data[at + 14] = state;
}

pub fn leaf_key(data: &[u8], i: usize) -> &[u8] {
    let (offset, key_size, _, _) = read_leaf_slot(data, i);
    &data[offset as usize..offset as usize + key_size as usize]
}

pub fn leaf_value(data: &[u8], i: usize) -> &[u8] {
    let (offset, key_size, value_size, _) = read_leaf_slot(data, i);
    let start = offset as usize + key_size as usize;
    &data[start..start + value_size as usize]
}

pub fn leaf_state(data: &[u8], i: usize) -> SlotState {
    SlotState::from_byte(read_leaf_slot(data, i).3)
}

pub fn inner_key(data: &[u8], i: usize) -> &[u8] {
    let (_, offset, key_size, _) = read_inner_slot(data, i);
    &data[offset as usize..offset as usize + key_size as usize]
}

pub fn inner_child(data: &[u8], i: usize) -> u64 {
    read_inner_slot(data, i).0
}

pub fn inner_state(data: &[u8], i: usize) -> SlotState {
    SlotState::from_byte(read_inner_slot(data, i).3)
}

/// Smallest index whose key is `>=` target, or `slot_count` if none.
pub fn leaf_lower_bound(data: &[u8], key: &[u8]) -> usize {
    let mut lo = 0usize;
    let mut hi = slot_count(data);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if leaf_key(data, mid) < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Smallest index whose key is `>=` target, or `slot_count` if none.
pub fn inner_lower_bound(data: &[u8], key: &[u8]) -> usize {
    let mut lo = 0usize;
    let mut hi = slot_count(data);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if inner_key(data, mid) < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Look up a live (non-tombstoned) leaf entry.
pub fn leaf_find(data: &[u8], key: &[u8]) -> Option<usize> {
    let i = leaf_lower_bound(data, key);
    if i < slot_count(data) && leaf_key(data, i) == key && leaf_state(data, i) != SlotState::Deleted {
        Some(i)
    } else {
        None
    }
}

/// Route a descent through an inner node: child of the smallest pivot `>=`
/// key, or `upper` if every pivot is smaller.
pub fn inner_find_child(data: &[u8], key: &[u8]) -> u64 {
    let i = inner_lower_bound(data, key);
    if i < slot_count(data) {
        inner_child(data, i)
    } else {
        upper(data)
    }
}

pub enum LeafInsertOutcome {
    Inserted,
    Revived,
    AlreadyExists,
}

/// Insert `(key, value)` at its sorted position, reviving a tombstoned slot
/// in place if the key matches one. Returns `AlreadyExists` without writing
/// anything if a live entry for `key` is already present.
///
/// Caller must have already confirmed (via [`free_space`]) that the page has
/// room; this never itself decides to split.
pub fn leaf_insert(data: &mut [u8], key: &[u8], value: &[u8], state: SlotState) -> Result<LeafInsertOutcome> {
    let pos = leaf_lower_bound(data, key);
    let count = slot_count(data);

    if pos < count && leaf_key(data, pos) == key {
        if leaf_state(data, pos) != SlotState::Deleted {
            return Ok(LeafInsertOutcome::AlreadyExists);
        }
        // Revive: reuse the descriptor index, allocate a fresh payload.
        let needed = key.len() + value.len();
        if free_space(data) < needed {
            return Err(StorageError::invalid_operation("leaf page has no room to revive slot"));
        }
        let data_start = data_start_raw(data) as usize;
        let new_start = data_start - needed;
        data[new_start..new_start + key.len()].copy_from_slice(key);
        data[new_start + key.len()..new_start + needed].copy_from_slice(value);
        set_data_start_raw(data, new_start as u32);
        write_leaf_slot(data, pos, new_start as u32, key.len() as u16, value.len() as u16, state.as_byte());
        return Ok(LeafInsertOutcome::Revived);
    }

    let needed = key.len() + value.len();
    if free_space(data) < needed + LEAF_SLOT_SIZE {
        return Err(StorageError::invalid_operation("leaf page has no room for insert"));
    }

    // Shift descriptors [pos, count) to [pos+1, count+1) to keep the array
    // sorted, then write the new slot and its payload.
    let src_start = leaf_slot_at(data, pos);
    let src_end = leaf_slot_at(data, count);
    data.copy_within(src_start..src_end, src_start + LEAF_SLOT_SIZE);

    let data_start = data_start_raw(data) as usize;
    let new_start = data_start - needed;
    data[new_start..new_start + key.len()].copy_from_slice(key);
    data[new_start + key.len()..new_start + needed].copy_from_slice(value);
    set_data_start_raw(data, new_start as u32);
    write_leaf_slot(data, pos, new_start as u32, key.len() as u16, value.len() as u16, state.as_byte());
    set_slot_count_raw(data, (count + 1) as u16);
    Ok(LeafInsertOutcome::Inserted)
}

/// Tombstone a live leaf entry: the value is dropped but the key and slot
/// index are retained (no merge/compaction in v1).
pub fn leaf_erase(data: &mut [u8], i: usize) {
    let (offset, key_size, _, _) = read_leaf_slot(data, i);
    write_leaf_slot(data, i, offset, key_size, 0, SlotState::Deleted.as_byte());
}

pub fn leaf_set_state(data: &mut [u8], i: usize, state: SlotState) {
    let (offset, key_size, value_size, _) = read_leaf_slot(data, i);
    write_leaf_slot(data, i, offset, key_size, value_size, state.as_byte());
}

pub fn inner_set_state(data: &mut [u8], i: usize, state: SlotState) {
    let (child, offset, key_size, _) = read_inner_slot(data, i);
    write_inner_slot(data, i, child, offset, key_size, state.as_byte());
}

/// Retarget the child pointer of the slot that currently routes to
/// `old_child`, or `upper` if none of the pivots do. Used after a split to
/// point the parent at the new right sibling before the new pivot for the
/// left half is inserted (see [`crate::btree::tree`]).
pub fn inner_retarget(data: &mut [u8], old_child: u64, new_child: u64) {
    if upper(data) == old_child {
        set_upper(data, new_child);
        return;
    }
    for i in 0..slot_count(data) {
        if inner_child(data, i) == old_child {
            let (_, offset, key_size, state) = read_inner_slot(data, i);
            write_inner_slot(data, i, new_child, offset, key_size, state);
            return;
        }
    }
}

pub fn inner_insert(data: &mut [u8], key: &[u8], child: u64, state: SlotState) -> Result<()> {
    let pos = inner_lower_bound(data, key);
    let count = slot_count(data);
    let needed = key.len();
    if free_space(data) < needed + INNER_SLOT_SIZE {
        return Err(StorageError::invalid_operation("inner page has no room for insert"));
    }

    let src_start = inner_slot_at(data, pos);
    let src_end = inner_slot_at(data, count);
    data.copy_within(src_start..src_end, src_start + INNER_SLOT_SIZE);

    let data_start = data_start_raw(data) as usize;
    let new_start = data_start - needed;
    data[new_start..new_start + needed].copy_from_slice(key);
    set_data_start_raw(data, new_start as u32);
    write_inner_slot(data, pos, child, new_start as u32, key.len() as u16, state.as_byte());
    set_slot_count_raw(data, (count + 1) as u16);
    Ok(())
}

/// One decoded leaf entry, used only by the split path where materializing
/// the whole node is simpler than juggling in-place shifts across two
/// buffers at once.
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub state: SlotState,
}

pub struct InnerEntry {
    pub key: Vec<u8>,
    pub child: u64,
    pub state: SlotState,
}

pub fn leaf_entries(data: &[u8]) -> Vec<LeafEntry> {
    (0..slot_count(data))
        .map(|i| LeafEntry {
            key: leaf_key(data, i).to_vec(),
            value: leaf_value(data, i).to_vec(),
            state: leaf_state(data, i),
        })
        .collect()
}

pub fn inner_entries(data: &[u8]) -> Vec<InnerEntry> {
    (0..slot_count(data))
        .map(|i| InnerEntry {
            key: inner_key(data, i).to_vec(),
            child: inner_child(data, i),
            state: inner_state(data, i),
        })
        .collect()
}

/// Reinitialize `data` as a leaf and bulk-load `entries` in order. Entries
/// must already be sorted by key; used to rebuild both halves of a split.
pub fn rebuild_leaf(data: &mut [u8], entries: &[LeafEntry]) -> Result<()> {
    init_leaf(data);
    for e in entries {
        match leaf_insert(data, &e.key, &e.value, e.state)? {
            LeafInsertOutcome::Inserted => {}
            _ => {
                return Err(StorageError::invariant(
                    "rebuild_leaf expects fresh inserts only",
                ))
            }
        }
    }
    Ok(())
}

pub fn rebuild_inner(data: &mut [u8], level_value: u16, upper_child: u64, entries: &[InnerEntry]) -> Result<()> {
    init_inner(data, level_value, upper_child);
    for e in entries {
        inner_insert(data, &e.key, e.child, e.state)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_leaf(size: usize) -> Vec<u8> {
        let mut data = vec![0u8; size];
        init_leaf(&mut data);
        data
    }

    #[test]
    fn insert_keeps_sorted_order() {
        let mut data = fresh_leaf(256);
        leaf_insert(&mut data, b"c", b"3", SlotState::Inserted).unwrap();
        leaf_insert(&mut data, b"a", b"1", SlotState::Inserted).unwrap();
        leaf_insert(&mut data, b"b", b"2", SlotState::Inserted).unwrap();

        assert_eq!(leaf_key(&data, 0), b"a");
        assert_eq!(leaf_key(&data, 1), b"b");
        assert_eq!(leaf_key(&data, 2), b"c");
        assert_eq!(leaf_value(&data, 1), b"2");
    }

    #[test]
    fn duplicate_insert_reports_exists() {
        let mut data = fresh_leaf(256);
        leaf_insert(&mut data, b"a", b"1", SlotState::Inserted).unwrap();
        let outcome = leaf_insert(&mut data, b"a", b"2", SlotState::Inserted).unwrap();
        assert!(matches!(outcome, LeafInsertOutcome::AlreadyExists));
        assert_eq!(leaf_value(&data, 0), b"1");
    }

    #[test]
    fn erase_then_reinsert_revives_slot() {
        let mut data = fresh_leaf(256);
        leaf_insert(&mut data, b"a", b"1", SlotState::Inserted).unwrap();
        let idx = leaf_find(&data, b"a").unwrap();
        leaf_erase(&mut data, idx);
        assert_eq!(leaf_find(&data, b"a"), None);

        let outcome = leaf_insert(&mut data, b"a", b"99", SlotState::Inserted).unwrap();
        assert!(matches!(outcome, LeafInsertOutcome::Revived));
        assert_eq!(slot_count(&data), 1, "revive must not grow the slot array");
        assert_eq!(leaf_value(&data, 0), b"99");
    }

    #[test]
    fn inner_find_child_routes_via_upper_and_pivots() {
        let mut data = vec![0u8; 256];
        init_inner(&mut data, 1, 100);
        inner_insert(&mut data, b"m", 10, SlotState::Inserted).unwrap();
        inner_insert(&mut data, b"t", 20, SlotState::Inserted).unwrap();

        assert_eq!(inner_find_child(&data, b"a"), 10);
        assert_eq!(inner_find_child(&data, b"m"), 10);
        assert_eq!(inner_find_child(&data, b"n"), 20);
        assert_eq!(inner_find_child(&data, b"z"), 100);
    }

    #[test]
    fn retarget_moves_upper_or_pivot_child() {
        let mut data = vec![0u8; 256];
        init_inner(&mut data, 1, 100);
        inner_insert(&mut data, b"m", 10, SlotState::Inserted).unwrap();

        inner_retarget(&mut data, 100, 200);
        assert_eq!(upper(&data), 200);

        inner_retarget(&mut data, 10, 30);
        assert_eq!(inner_child(&data, 0), 30);
    }
}
