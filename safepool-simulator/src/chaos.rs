//! Chaos module.
//!
//! Produces pointers the pool never handed out. Every one of them must be
//! declined by `pool_free`.

use rand::Rng;
use safepool_core::{MemoryPool, PoolPtr};

/// Kinds of foreign pointer offered to `pool_free`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForeignPointer {
    Null,
    /// At or past the arena end.
    OutOfRange,
    /// Inside the first header, so no header can precede it.
    BelowHeader,
    /// Too close to the arena end to hold a minimum allocation.
    Tail,
}

impl ForeignPointer {
    const ALL: [ForeignPointer; 4] = [
        ForeignPointer::Null,
        ForeignPointer::OutOfRange,
        ForeignPointer::BelowHeader,
        ForeignPointer::Tail,
    ];

    pub fn pick<R: Rng>(rng: &mut R) -> Self {
        Self::ALL[rng.random_range(0..Self::ALL.len())]
    }

    /// A concrete pointer of this kind for `pool`.
    pub fn generate<R: Rng>(self, rng: &mut R, pool: &MemoryPool) -> Option<PoolPtr> {
        let size = pool.size();
        let offset = match self {
            ForeignPointer::Null => return None,
            ForeignPointer::OutOfRange => size + rng.random_range(0..size),
            ForeignPointer::BelowHeader => rng.random_range(0..pool.header_size()),
            ForeignPointer::Tail => size - rng.random_range(1..pool.min_alloc_size()),
        };
        Some(PoolPtr::from_offset(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_foreign_pointers_are_declined() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut pool = MemoryPool::new(4096, 8).unwrap();
        let live = pool.pool_alloc(128);

        for _ in 0..200 {
            let kind = ForeignPointer::pick(&mut rng);
            let ptr = kind.generate(&mut rng, &pool);
            assert!(!pool.pool_free(ptr), "{kind:?} {ptr:?} accepted");
        }
        assert!(pool.pool_free(live));
        assert_eq!(pool.validate().unwrap().free_count, 1);
    }

    #[test]
    fn test_generated_offsets_match_kind() {
        let mut rng = StdRng::seed_from_u64(3);
        let pool = MemoryPool::new(1024, 8).unwrap();
        assert_eq!(ForeignPointer::Null.generate(&mut rng, &pool), None);

        let out = ForeignPointer::OutOfRange.generate(&mut rng, &pool).unwrap();
        assert!(out.offset() >= pool.size());

        let below = ForeignPointer::BelowHeader.generate(&mut rng, &pool).unwrap();
        assert!(below.offset() < pool.header_size());

        let tail = ForeignPointer::Tail.generate(&mut rng, &pool).unwrap();
        assert!(tail.offset() < pool.size());
        assert!(tail.offset() + pool.min_alloc_size() > pool.size());
    }
}
