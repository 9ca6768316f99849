//! Buffer frame state machine and the page-logic hook.

use crate::types::PageId;

/// Lifecycle state of one buffer frame.
///
/// `New` is sticky: a freshly allocated page stays `New` until it is
/// evicted or explicitly flushed, even if the caller who holds it writes
/// to it repeatedly. A page never transitions directly from `New` to
/// `Dirty` — eviction logic (see [`PageLogic::before_unload`]) treats a
/// brand-new page specially (it has no on-disk image to diff against, so
/// there is nothing to defer into a delta).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Frame holds no page.
    Undefined,
    /// Matches its on-disk image.
    Clean,
    /// Has been modified since it was loaded from disk.
    Dirty,
    /// Allocated by `fix_new` and never yet written back.
    New,
}

impl FrameState {
    pub fn is_bound(self) -> bool {
        !matches!(self, Self::Undefined)
    }
}

/// Hook a tree installs into the buffer pool to intercept page eviction
/// and reload.
///
/// The buffered-delta tree is the motivating implementation: instead of
/// letting every dirty eviction become a page write, it inspects the
/// page's slot states in `before_unload` and, when the change set is
/// small, redirects it into a secondary delta tree and tells the pool the
/// write can be skipped. `after_load` is the corresponding hook on the
/// read side: it looks up any pending deltas for the page and replays
/// them before the page is handed back to a caller.
///
/// The default implementation is the buffer pool's behavior without any
/// tree installed: always write a dirty page back, never skip a flush,
/// and do nothing extra on load.
pub trait PageLogic: Send + Sync {
    /// Called just before a dirty or new frame is evicted (or flushed).
    ///
    /// Returns `(should_write, force_full_flush)`:
    /// - `should_write`: if false, the pool must not write `data` to disk;
    ///   the page logic has taken responsibility for the change (e.g. by
    ///   recording it as a delta).
    /// - `force_full_flush`: if true, any previously deferred state for
    ///   this page must be discarded and the full page written instead,
    ///   overriding `should_write`.
    fn before_unload(
        &self,
        data: &mut [u8],
        state: FrameState,
        page_id: PageId,
        page_size: usize,
    ) -> (bool, bool) {
        let _ = (data, state, page_id, page_size);
        (true, false)
    }

    /// Called just after a page's bytes have been read from disk, before
    /// the frame is handed to the caller that requested it.
    fn after_load(&self, data: &mut [u8], page_id: PageId) {
        let _ = (data, page_id);
    }
}

/// The buffer pool's behavior with no tree-specific logic installed:
/// every dirty page is written back in full, and loads are passed through
/// untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPageLogic;

impl PageLogic for NullPageLogic {}
