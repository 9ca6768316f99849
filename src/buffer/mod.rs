//! Buffer pool: a fixed-size in-memory page cache with pluggable
//! eviction behavior.

mod frame;
mod lru;
mod pool;

pub use frame::{FrameState, NullPageLogic, PageLogic};
pub use pool::{BufferPool, PageGuard, PageGuardMut};
