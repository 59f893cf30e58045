//! ## safepool-core::alloc::pool
//! **Variable-size memory pool over a single fixed arena**
//!
//! Allocation carves the high end off the tightest fitting free block, so
//! the free remainder keeps its header in place. Freeing coalesces with
//! both address neighbours before the block re-enters the size-ordered
//! free list and the [`FreeIndex`].
//!
//! The pool is not synchronized. Wrap it in a
//! [`SharedPool`](super::shared::SharedPool) to share it between threads.

use tracing::{debug, trace, warn};

use super::header::{AllocHeader, Arena, Block, FreeHeader, ALLOC_HEADER_SIZE, FREE_HEADER_SIZE};
use super::index::FreeIndex;
use crate::error::PoolError;

/// Low-water marks under this many bytes are reported with `warn!`.
pub const LWM_WARNING_BYTES: usize = 10_000;

/// Largest pool the signed 32-bit size field can describe.
pub const MAX_POOL_SIZE: usize = i32::MAX as usize;

pub const MAX_GRANULARITY: usize = 4096;

pub const DEFAULT_GRANULARITY: usize = 8;

/// Data offset of an allocation inside its pool's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolPtr(usize);

impl PoolPtr {
    /// Wraps an arbitrary offset. Only pointers returned by
    /// [`MemoryPool::pool_alloc`] are meaningful to the pool.
    pub fn from_offset(offset: usize) -> Self {
        PoolPtr(offset)
    }

    #[inline]
    pub fn offset(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct MemoryPool {
    granularity: usize,
    min_free_size: usize,
    min_alloc_size: usize,
    pool_size: usize,
    lwm_free_bytes: usize,
    arena: Arena,
    largest_free: Option<FreeHeader>,
    free_index: FreeIndex,
}

impl MemoryPool {
    /// Creates a pool whose arena is a single free block.
    ///
    /// `granularity` is rounded up to a multiple of 8 and `pool_size` to a
    /// multiple of the granularity.
    pub fn new(pool_size: usize, granularity: usize) -> Result<Self, PoolError> {
        if granularity > MAX_GRANULARITY {
            return Err(PoolError::GranularityTooLarge {
                granularity,
                maximum: MAX_GRANULARITY,
            });
        }
        let granularity = Self::align(granularity.max(1), ALLOC_HEADER_SIZE);

        let too_large = PoolError::PoolTooLarge {
            requested: pool_size,
            maximum: MAX_POOL_SIZE,
        };
        if pool_size > MAX_POOL_SIZE {
            return Err(too_large);
        }
        let aligned_size = Self::align(pool_size, granularity);
        if aligned_size > MAX_POOL_SIZE {
            return Err(too_large);
        }

        let header_size = Self::align(ALLOC_HEADER_SIZE, granularity);
        let min_alloc_size = Self::align(FREE_HEADER_SIZE - ALLOC_HEADER_SIZE, granularity);
        let min_free_size = header_size + min_alloc_size;
        if aligned_size < min_free_size {
            return Err(PoolError::PoolTooSmall {
                requested: pool_size,
                minimum: min_free_size,
            });
        }

        let mut arena = Arena::new(aligned_size, header_size);
        let first_free = FreeHeader::at(0);
        first_free.init_free_block(&mut arena, aligned_size);
        let mut free_index = FreeIndex::new();
        free_index.init(first_free, &arena);
        let lwm_free_bytes = first_free.size(&arena);

        debug!(
            pool_size = aligned_size,
            granularity, header_size, min_alloc_size, "memory pool created"
        );

        Ok(Self {
            granularity,
            min_free_size,
            min_alloc_size,
            pool_size: aligned_size,
            lwm_free_bytes,
            arena,
            largest_free: Some(first_free),
            free_index,
        })
    }

    /// Rounds `size` up to a multiple of `granularity`, which must be non-zero.
    #[inline]
    pub fn align(size: usize, granularity: usize) -> usize {
        size.next_multiple_of(granularity)
    }

    /// Allocates at least `size` bytes, or returns `None` when no free
    /// block is large enough.
    pub fn pool_alloc(&mut self, size: usize) -> Option<PoolPtr> {
        let block = if size > self.pool_size {
            None
        } else {
            let aligned_size = Self::align(size, self.granularity).max(self.min_alloc_size);
            self.find_free_block(aligned_size)
                .map(|free_block| self.allocate(free_block, aligned_size))
        };

        let largest_free_bytes = self.largest_free_size();
        if largest_free_bytes < self.lwm_free_bytes {
            self.lwm_free_bytes = largest_free_bytes;
            if largest_free_bytes < LWM_WARNING_BYTES {
                warn!(
                    lwm_free_bytes = largest_free_bytes,
                    "free space low-water mark under {LWM_WARNING_BYTES} bytes"
                );
            }
        }

        match block {
            Some(ptr) => trace!(size, offset = ptr.offset(), "pool_alloc"),
            None => warn!("allocation of {size} bytes returning None"),
        }
        block
    }

    /// Returns a block to the pool.
    ///
    /// Declines (`false`, no mutation) `None` and any offset that cannot be
    /// a data offset of this arena. Double frees and forged offsets inside
    /// the arena are not detected.
    pub fn pool_free(&mut self, ptr: Option<PoolPtr>) -> bool {
        let Some(ptr) = ptr else {
            return false;
        };
        let Some(header_offset) = self.header_offset(ptr) else {
            trace!(offset = ptr.offset(), "pool_free declined foreign pointer");
            return false;
        };

        let freed = FreeHeader::at(header_offset);
        freed.set_free(&mut self.arena);
        self.join_free_allocs(freed);
        trace!(offset = ptr.offset(), "pool_free");
        true
    }

    /// Smallest `largest_free_size` seen after any `pool_alloc` call.
    pub fn lwm_free_bytes(&self) -> usize {
        self.lwm_free_bytes
    }

    pub fn includes(&self, ptr: PoolPtr) -> bool {
        ptr.offset() < self.pool_size
    }

    /// Arena size in bytes, after alignment.
    pub fn size(&self) -> usize {
        self.pool_size
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// Stride between a block header and its data.
    pub fn header_size(&self) -> usize {
        self.arena.header_size()
    }

    pub fn min_alloc_size(&self) -> usize {
        self.min_alloc_size
    }

    /// Smallest block that can be split off and tracked as free.
    pub fn min_free_size(&self) -> usize {
        self.min_free_size
    }

    /// Data size of the largest free block, 0 when the pool is full.
    pub fn largest_free_size(&self) -> usize {
        self.largest_free
            .map_or(0, |largest| largest.size(&self.arena))
    }

    /// Data of a live allocation.
    pub fn data(&self, ptr: PoolPtr) -> Option<&[u8]> {
        let size = self.allocated_size(ptr)?;
        Some(self.arena.slice(ptr.offset(), size))
    }

    pub fn data_mut(&mut self, ptr: PoolPtr) -> Option<&mut [u8]> {
        let size = self.allocated_size(ptr)?;
        Some(self.arena.slice_mut(ptr.offset(), size))
    }

    /// Every block in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            arena: &self.arena,
            next: 0,
        }
    }

    #[cfg(any(test, feature = "validate"))]
    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }

    #[cfg(test)]
    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    #[cfg(any(test, feature = "validate"))]
    pub(crate) fn largest_free(&self) -> Option<FreeHeader> {
        self.largest_free
    }

    #[cfg(any(test, feature = "validate"))]
    pub(crate) fn free_index(&self) -> &FreeIndex {
        &self.free_index
    }

    /// Header offset for a data offset, if a block could start there.
    fn header_offset(&self, ptr: PoolPtr) -> Option<usize> {
        let offset = ptr.offset();
        if offset >= self.pool_size || offset + self.min_alloc_size > self.pool_size {
            return None;
        }
        offset.checked_sub(self.header_size())
    }

    fn allocated_size(&self, ptr: PoolPtr) -> Option<usize> {
        let header = AllocHeader::at(self.header_offset(ptr)?);
        if header.is_free(&self.arena) {
            return None;
        }
        let size = header.size(&self.arena);
        (ptr.offset() + size <= self.pool_size).then_some(size)
    }

    fn find_free_block(&self, req_size: usize) -> Option<FreeHeader> {
        match self.largest_free {
            Some(largest) if req_size >= largest.size(&self.arena) => {
                (largest.size(&self.arena) >= req_size).then_some(largest)
            }
            _ => self.free_index.find(req_size, self.largest_free, &self.arena),
        }
    }

    /// Carves `alloc_size` bytes off the high end of `free_block`, or hands
    /// out the whole block when the rest could not be tracked as free.
    fn allocate(&mut self, free_block: FreeHeader, alloc_size: usize) -> PoolPtr {
        let free_block_size = free_block.size(&self.arena);
        let remainder = free_block_size - alloc_size;

        if remainder < self.min_free_size {
            self.remove_free_alloc(free_block);
            free_block.set_alloc(&mut self.arena);
            return PoolPtr(free_block.ptr(&self.arena));
        }

        // Fits: remainder >= min_free_size > header_size.
        let remainder = remainder - self.header_size();

        if let Some(next) = free_block.next_adjacent(&self.arena) {
            next.set_prev_size(&mut self.arena, alloc_size);
        }

        match free_block.smaller_free(&self.arena) {
            Some(smaller) if remainder < smaller.size(&self.arena) => {
                self.remove_free_alloc(free_block);
                free_block.set_size(&mut self.arena, remainder);
                self.insert_free_alloc(free_block);
            }
            _ => {
                // Still no smaller than its list neighbour: only the index moves.
                let larger = free_block.larger_free(&self.arena);
                self.free_index.remove(free_block, larger, &self.arena);
                free_block.set_size(&mut self.arena, remainder);
                self.free_index.add(free_block, &self.arena);
            }
        }

        let alloc_block = AllocHeader::at(free_block.end(&self.arena));
        alloc_block.allocate(&mut self.arena, alloc_size);
        alloc_block.set_prev_size(&mut self.arena, remainder);
        PoolPtr(alloc_block.ptr(&self.arena))
    }

    fn join_free_allocs(&mut self, freed: FreeHeader) {
        if freed.joinable_next(&self.arena) {
            if let Some(next) = freed.next_adjacent(&self.arena) {
                self.remove_free_alloc(FreeHeader::from(next));
                freed.join_next(&mut self.arena);
                self.patch_next_prev_size(freed.header());
            }
        }

        let prev = if freed.joinable_prev(&self.arena) {
            freed.prev_adjacent(&self.arena).map(FreeHeader::from)
        } else {
            None
        };
        match prev {
            Some(prev) => {
                self.remove_free_alloc(prev);
                prev.join_next(&mut self.arena);
                self.insert_free_alloc(prev);
                self.patch_next_prev_size(prev.header());
            }
            None => self.insert_free_alloc(freed),
        }
    }

    fn patch_next_prev_size(&mut self, block: AllocHeader) {
        let size = block.size(&self.arena);
        if let Some(next) = block.next_adjacent(&self.arena) {
            next.set_prev_size(&mut self.arena, size);
        }
    }

    /// Unlinks a free block from the size-ordered list and the index.
    fn remove_free_alloc(&mut self, block: FreeHeader) {
        let arena = &mut self.arena;
        let smaller = block.smaller_free(arena);
        let larger = block.larger_free(arena);

        block.set_smaller_free(arena, None);
        block.set_larger_free(arena, None);

        if self.largest_free == Some(block) {
            self.largest_free = smaller;
        }
        if let Some(larger) = larger {
            larger.set_smaller_free(arena, smaller);
        }
        if let Some(smaller) = smaller {
            smaller.set_larger_free(arena, larger);
        }

        self.free_index.remove(block, larger, arena);
    }

    /// Links an unlinked free block in just below the tightest block that
    /// can hold it, or on top as the new largest.
    fn insert_free_alloc(&mut self, freed: FreeHeader) {
        let size = freed.size(&self.arena);
        match self.free_index.find(size, self.largest_free, &self.arena) {
            Some(alloc) => {
                debug_assert_ne!(alloc, freed, "block {} already listed", freed.offset());
                let arena = &mut self.arena;
                let smaller = alloc.smaller_free(arena);
                freed.set_larger_free(arena, Some(alloc));
                alloc.set_smaller_free(arena, Some(freed));
                if let Some(smaller) = smaller {
                    smaller.set_larger_free(arena, Some(freed));
                    freed.set_smaller_free(arena, Some(smaller));
                }
            }
            None if self.largest_free == Some(freed) => {}
            None => {
                let arena = &mut self.arena;
                freed.set_smaller_free(arena, self.largest_free);
                if let Some(largest) = self.largest_free {
                    largest.set_larger_free(arena, Some(freed));
                }
                self.largest_free = Some(freed);
            }
        }

        self.free_index.add(freed, &self.arena);
    }
}

/// Address-order walk over a pool's blocks.
pub struct Blocks<'a> {
    arena: &'a Arena,
    next: usize,
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.next + self.arena.header_size() > self.arena.len() {
            return None;
        }
        let header = AllocHeader::at(self.next);
        self.next = header.end(self.arena);
        Some(Block::decode(header, self.arena))
    }
}
