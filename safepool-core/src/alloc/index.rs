//! ## safepool-core::alloc::index
//! **Power-of-two size-class index over the free list**
//!
//! Ten buckets, `[8, 16)` through `[2048, 4096)` plus an open-ended
//! `[4096, ..)` bucket. Each bucket caches a free block within its range
//! that is no larger than any other block the bucket has been told about.
//! The cache is only a starting point: [`FreeIndex::find`] tightens every
//! answer by walking the size-ordered free list toward smaller blocks.

use super::header::{Arena, FreeHeader};

/// log2 of the smallest bucket size.
pub const MIN_POW: u32 = 3;

/// Number of size-class buckets.
pub const NODE_COUNT: usize = 10;

const MAX_IDX: usize = NODE_COUNT - 1;

/// One size-class bucket `[size, limit)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FreeIndexNode {
    size: usize,
    limit: usize,
    ptr: Option<FreeHeader>,
}

impl FreeIndexNode {
    fn set_sizes(&mut self, size: usize, limit: usize) {
        self.size = size;
        self.limit = limit;
    }

    /// Inclusive lower bound of the bucket.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Exclusive upper bound of the bucket.
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn ptr(&self) -> Option<FreeHeader> {
        self.ptr
    }

    pub fn contains(&self, size: usize) -> bool {
        size >= self.size && size < self.limit
    }
}

#[derive(Clone, Debug)]
pub struct FreeIndex {
    nodes: [FreeIndexNode; NODE_COUNT],
}

impl Default for FreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeIndex {
    /// Creates an index with every bucket range set and every bucket empty.
    pub fn new() -> Self {
        let mut nodes = [FreeIndexNode::default(); NODE_COUNT];
        for (idx, node) in nodes.iter_mut().enumerate() {
            let size = 1usize << (MIN_POW as usize + idx);
            let limit = if idx == MAX_IDX { usize::MAX } else { size * 2 };
            node.set_sizes(size, limit);
        }
        Self { nodes }
    }

    /// Resets the index to hold only the pool's initial free block.
    pub fn init(&mut self, first_free: FreeHeader, arena: &Arena) {
        *self = Self::new();
        self.add(first_free, arena);
    }

    pub fn nodes(&self) -> &[FreeIndexNode] {
        &self.nodes
    }

    /// Bucket for a block of `size` bytes.
    #[inline]
    pub fn node_index(size: usize) -> usize {
        match size >> MIN_POW {
            0 | 1 => 0,
            scaled => (scaled.ilog2() as usize).min(MAX_IDX),
        }
    }

    /// Records a newly free block, replacing the bucket's block if the new
    /// one is no larger.
    pub fn add(&mut self, freed: FreeHeader, arena: &Arena) {
        let size = freed.size(arena);
        let node = &mut self.nodes[Self::node_index(size)];
        match node.ptr {
            Some(current) if current.size(arena) < size => {}
            _ => node.ptr = Some(freed),
        }
    }

    /// Forgets `block`, promoting `larger` (its successor in the free list)
    /// when it belongs to the same bucket.
    pub fn remove(&mut self, block: FreeHeader, larger: Option<FreeHeader>, arena: &Arena) {
        let node = &mut self.nodes[Self::node_index(block.size(arena))];
        if node.ptr == Some(block) {
            let promoted = larger.filter(|larger| node.contains(larger.size(arena)));
            node.ptr = promoted;
        }
    }

    /// Smallest free block of at least `search_size` bytes.
    ///
    /// `largest` is the pool's largest free block, which bounds every answer.
    pub fn find(
        &self,
        search_size: usize,
        largest: Option<FreeHeader>,
        arena: &Arena,
    ) -> Option<FreeHeader> {
        let mut result = largest.filter(|largest| largest.size(arena) >= search_size)?;

        // Buckets below search_size hold nothing large enough.
        for node in self.nodes[Self::node_index(search_size)..].iter().rev() {
            if let Some(candidate) = node.ptr {
                if candidate.size(arena) >= search_size {
                    result = candidate;
                }
            }
        }

        while let Some(smaller) = result.smaller_free(arena) {
            if smaller.size(arena) < search_size {
                break;
            }
            result = smaller;
        }
        Some(result)
    }
}
