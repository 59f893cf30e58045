//! ## safepool-core::alloc
//! **Deterministic variable-size allocation inside one fixed arena**
//!
//! ### Key Submodules:
//! - `header/`: in-arena block headers and the free-list link encoding
//! - `index/`: power-of-two size-class index over the free list
//! - `pool/`: the allocator itself
//! - `shared/`: mutex-guarded pool for multi-threaded callers
//! - `stats/`: allocation counters
//! - `validate/`: consistency checker (tests and the `validate` feature)

pub mod header;
pub mod index;
pub mod pool;
pub mod shared;
pub mod stats;
#[cfg(any(test, feature = "validate"))]
pub mod validate;

pub use header::{AllocHeader, Block, FreeHeader};
pub use index::{FreeIndex, FreeIndexNode};
pub use pool::{MemoryPool, PoolPtr};
pub use shared::SharedPool;
pub use stats::{PoolStats, StatsSnapshot};
#[cfg(any(test, feature = "validate"))]
pub use validate::PoolReport;
