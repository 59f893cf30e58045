//! # safepool-core
//!
//! A deterministic memory pool for environments that may not touch the
//! platform heap after start-up. One arena is reserved at construction and
//! every later allocation is carved out of it.
//!
//! ### Expectations (Production):
//! - Zero heap allocations after `MemoryPool::new`
//! - Bounded work per call: ten index buckets plus local list neighbours
//! - Out-of-memory and foreign frees are return values, never panics
//!
//! ### Key Submodules:
//! - `alloc`: headers, free index, pool, shared wrapper and validator
//! - `error`: construction and validation errors

pub mod alloc;
pub mod error;

pub mod prelude {
    pub use crate::alloc::{MemoryPool, PoolPtr, SharedPool, StatsSnapshot};
    pub use crate::error::{PoolError, ValidationError};
}

pub use alloc::{MemoryPool, PoolPtr, SharedPool};
pub use error::{PoolError, ValidationError};
