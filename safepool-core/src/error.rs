use thiserror::Error;

/// Pool construction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pool of {requested} bytes cannot hold a single block (minimum {minimum})")]
    PoolTooSmall { requested: usize, minimum: usize },

    #[error("pool of {requested} bytes exceeds the block size encoding (maximum {maximum})")]
    PoolTooLarge { requested: usize, maximum: usize },

    #[error("granularity {granularity} exceeds the supported maximum of {maximum}")]
    GranularityTooLarge { granularity: usize, maximum: usize },
}

/// A broken pool invariant found by [`MemoryPool::validate`](crate::alloc::MemoryPool).
///
/// Offsets are header offsets from the arena base.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("block at {offset} has zero size")]
    ZeroSizeBlock { offset: usize },

    #[error("block at {offset} runs past the arena end ({end} > {pool_size})")]
    ChainOverrun {
        offset: usize,
        end: usize,
        pool_size: usize,
    },

    #[error("block at {offset} records prev_size {recorded}, previous block has {actual}")]
    BrokenPrevLink {
        offset: usize,
        recorded: usize,
        actual: usize,
    },

    #[error("free blocks at {first} and {second} are adjacent")]
    AdjacentFree { first: usize, second: usize },

    #[error("allocated {allocated} + free {free} + overhead {overhead} != pool size {pool_size}")]
    Conservation {
        allocated: usize,
        free: usize,
        overhead: usize,
        pool_size: usize,
    },

    #[error("free list reaches {offset}, which is not a free block")]
    UnknownListEntry { offset: usize },

    #[error("free list out of order at {offset}: size {size} after {previous}")]
    ListOrder {
        offset: usize,
        size: usize,
        previous: usize,
    },

    #[error("free list revisits {offset}")]
    ListCycle { offset: usize },

    #[error("free list holds {listed} bytes, arena has {free} free bytes")]
    ListBytes { listed: usize, free: usize },

    #[error("free list ends disagree: walk ended at {found:?}, expected {expected:?}")]
    ListEnds {
        found: Option<usize>,
        expected: Option<usize>,
    },

    #[error("index bucket {bucket} holds block {offset} of size {size} outside [{min}, {limit})")]
    IndexRange {
        bucket: usize,
        offset: usize,
        size: usize,
        min: usize,
        limit: usize,
    },

    #[error("index bucket {bucket} points at {offset}, which is not a free block")]
    IndexNotFree { bucket: usize, offset: usize },

    #[error("find({probe}) returned block {offset} of size {size}")]
    FindTooSmall {
        probe: usize,
        offset: usize,
        size: usize,
    },

    #[error("find({probe}) returned nothing but free block {offset} fits")]
    FindMissed { probe: usize, offset: usize },

    #[error("find({probe}) returned {offset} but a tighter free block exists at {tighter}")]
    FindNotTightest {
        probe: usize,
        offset: usize,
        tighter: usize,
    },
}
