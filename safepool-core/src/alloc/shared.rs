//! ## safepool-core::alloc::shared
//! **Mutex-guarded pool with `malloc`/`free` semantics**
//!
//! Every call holds the lock for its whole duration. A failed allocation is
//! handed back to the caller as `None`; there is no fallback heap.

use parking_lot::Mutex;

use super::pool::{MemoryPool, PoolPtr};
use super::stats::{PoolStats, StatsSnapshot};
use crate::error::PoolError;

#[derive(Debug)]
pub struct SharedPool {
    pool: Mutex<MemoryPool>,
    stats: PoolStats,
}

impl SharedPool {
    pub fn new(pool_size: usize, granularity: usize) -> Result<Self, PoolError> {
        Ok(Self::from_pool(MemoryPool::new(pool_size, granularity)?))
    }

    pub fn from_pool(pool: MemoryPool) -> Self {
        Self {
            pool: Mutex::new(pool),
            stats: PoolStats::new(),
        }
    }

    pub fn malloc(&self, size: usize) -> Option<PoolPtr> {
        let ptr = self.pool.lock().pool_alloc(size);
        self.stats.record_alloc(ptr.is_some());
        ptr
    }

    /// Returns `false` for pointers this pool does not own.
    pub fn free(&self, ptr: Option<PoolPtr>) -> bool {
        let accepted = self.pool.lock().pool_free(ptr);
        self.stats.record_free(accepted);
        accepted
    }

    pub fn lwm_free_bytes(&self) -> usize {
        self.pool.lock().lwm_free_bytes()
    }

    /// Runs `f` with exclusive access to the pool.
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut MemoryPool) -> R) -> R {
        f(&mut self.pool.lock())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn into_inner(self) -> MemoryPool {
        self.pool.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_malloc_and_free() {
        let shared = SharedPool::new(4096, 8).unwrap();
        let ptr = shared.malloc(100);
        assert!(ptr.is_some());
        assert!(shared.free(ptr));
        assert!(!shared.free(None));
        assert!(!shared.free(Some(PoolPtr::from_offset(1 << 20))));

        let stats = shared.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.rejected_frees, 2);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let shared = SharedPool::new(256, 8).unwrap();
        assert_eq!(shared.malloc(1024), None);
        assert_eq!(shared.stats().failed_allocations, 1);
    }

    #[test]
    fn test_with_pool_writes_data() {
        let shared = SharedPool::new(1024, 8).unwrap();
        let ptr = shared.malloc(16).unwrap();
        shared.with_pool(|pool| pool.data_mut(ptr).unwrap().copy_from_slice(&[7u8; 16]));
        let sum: u32 = shared.with_pool(|pool| pool.data(ptr).unwrap().iter().map(|b| *b as u32).sum());
        assert_eq!(sum, 7 * 16);
    }

    #[test]
    fn test_concurrent_alloc_free() {
        let shared = Arc::new(SharedPool::new(64 * 1024, 8).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|thread_id| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for round in 0..200 {
                        let size = 16 + (thread_id * 40 + round) % 200;
                        if let Some(ptr) = shared.malloc(size) {
                            assert!(shared.free(Some(ptr)));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = shared.stats();
        assert_eq!(stats.allocations, 800);
        assert_eq!(stats.outstanding(), 0);
        let shared = Arc::try_unwrap(shared).unwrap();
        let pool = shared.into_inner();
        let report = pool.validate().unwrap();
        assert_eq!(report.allocated_bytes, 0);
        assert_eq!(report.free_count, 1);
    }
}
