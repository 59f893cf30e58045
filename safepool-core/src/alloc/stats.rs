//! ## safepool-core::alloc::stats
//! **Allocation counters for shared pools**
//!
//! Atomic so they can be read without taking the pool lock.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PoolStats {
    allocations: AtomicUsize,
    failed_allocations: AtomicUsize,
    frees: AtomicUsize,
    rejected_frees: AtomicUsize,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub allocations: usize,
    pub failed_allocations: usize,
    pub frees: usize,
    pub rejected_frees: usize,
}

impl StatsSnapshot {
    /// Allocations not yet returned.
    pub fn outstanding(&self) -> usize {
        self.allocations.saturating_sub(self.frees)
    }
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_alloc(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.allocations
        } else {
            &self.failed_allocations
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_free(&self, accepted: bool) {
        let counter = if accepted {
            &self.frees
        } else {
            &self.rejected_frees
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            failed_allocations: self.failed_allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            rejected_frees: self.rejected_frees.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_stats_record_and_read() {
        let stats = PoolStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());

        stats.record_alloc(true);
        stats.record_alloc(true);
        stats.record_alloc(false);
        stats.record_free(true);
        stats.record_free(false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.allocations, 2);
        assert_eq!(snapshot.failed_allocations, 1);
        assert_eq!(snapshot.frees, 1);
        assert_eq!(snapshot.rejected_frees, 1);
        assert_eq!(snapshot.outstanding(), 1);
    }

    #[test]
    fn test_pool_stats_many_increments() {
        let stats = PoolStats::new();
        for _ in 0..100 {
            stats.record_alloc(true);
            stats.record_free(true);
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.allocations, 100);
        assert_eq!(snapshot.frees, 100);
        assert_eq!(snapshot.outstanding(), 0);
    }
}
