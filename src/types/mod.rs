//! Common types used throughout the storage engine.

mod ids;

pub use ids::{FrameKey, PageId, SegmentId, SlotId, Tid, INVALID_PAGE_ID, MAX_PAGE_ID};

/// Default page size in bytes, used when a [`BufferPoolConfig`] does not
/// override it. 4 KiB matches a typical filesystem block.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of frames a buffer pool allocates.
pub const DEFAULT_PAGE_COUNT: usize = 1024;

/// Default write-amplification threshold `omega` (see [`BufferPoolConfig::wa_threshold`]).
pub const DEFAULT_WA_THRESHOLD: f64 = 0.25;

/// Largest key a node will accept, relative to a given page size. Keeping
/// this at a quarter of the page guarantees at least two entries fit in an
/// otherwise empty leaf.
pub fn max_key_size(page_size: usize) -> usize {
    page_size / 4
}

/// Largest value a node will store inline, relative to a given page size.
pub fn max_value_size(page_size: usize) -> usize {
    page_size / 2
}

/// One byte per slot tracking whether a B+-tree leaf or inner entry has
/// been logically changed since the page was last loaded from disk. The
/// buffered-delta tree reads this state on eviction to decide whether a
/// page's changes can be summarized as a handful of deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Present on disk and unmodified since load.
    Unchanged = 0,
    /// Created since the page was loaded.
    Inserted = 1,
    /// Present on disk but its value has been overwritten since load.
    Updated = 2,
    /// Logically removed since load; the slot is tombstoned, not yet
    /// compacted out of the slot array.
    Deleted = 3,
}

impl SlotState {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Inserted,
            2 => Self::Updated,
            3 => Self::Deleted,
            _ => Self::Unchanged,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Buffer pool sizing and eviction behavior.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Size in bytes of every page (and frame) in the pool.
    pub page_size: usize,
    /// Number of frames the pool holds.
    pub page_count: usize,
    /// Write-amplification threshold `omega` in `[0, 1]` the buffered-delta
    /// tree uses to decide whether an eviction's deltas are worth
    /// deferring: a page defers when its serialized deltas would occupy a
    /// fraction of the page greater than `omega`, and is flushed in full
    /// otherwise. `omega = 0` defers every non-spurious change; `omega = 1`
    /// never defers, since a fraction can never exceed 1.
    pub wa_threshold: f64,
    /// If true, segment files are truncated to zero length on open instead
    /// of reusing whatever is already on disk.
    pub clear: bool,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_count: DEFAULT_PAGE_COUNT,
            wa_threshold: DEFAULT_WA_THRESHOLD,
            clear: false,
        }
    }
}

impl BufferPoolConfig {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            ..Default::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_wa_threshold(mut self, wa_threshold: f64) -> Self {
        self.wa_threshold = wa_threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wa_threshold_clamped() {
        let cfg = BufferPoolConfig::default().with_wa_threshold(5.0);
        assert_eq!(cfg.wa_threshold, 1.0);
        let cfg = BufferPoolConfig::default().with_wa_threshold(-1.0);
        assert_eq!(cfg.wa_threshold, 0.0);
    }

    #[test]
    fn slot_state_roundtrip() {
        for s in [
            SlotState::Unchanged,
            SlotState::Inserted,
            SlotState::Updated,
            SlotState::Deleted,
        ] {
            assert_eq!(SlotState::from_byte(s.as_byte()), s);
        }
    }
}
