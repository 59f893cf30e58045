//! ## safepool-core::alloc::header
//! **Block headers stored inside the arena**
//!
//! Every block starts with an 8 byte header: a signed data size (negative
//! while the block is free) followed by the data size of the block in front
//! of it. Free blocks additionally carry two arena offsets linking them into
//! the pool's size-ordered free list.
//!
//! Headers are never borrowed out of the arena. [`AllocHeader`] and
//! [`FreeHeader`] are `Copy` handles holding the header's byte offset, and
//! every field access goes through the bounds-checked accessors on [`Arena`].
//!
//! ```text
//!  0        4          8                 16                24
//!  | size   | prev_size | smaller offset  | larger offset   |
//!  | i32    | u32       | u64 (free only) | u64 (free only) |
//! ```

use std::fmt;
use std::ops::Deref;

/// Bytes occupied by the size fields every block carries.
pub const ALLOC_HEADER_SIZE: usize = 8;

/// Bytes a free block needs for its size fields plus both list links.
pub const FREE_HEADER_SIZE: usize = 24;

/// Offset value stored in a link field that points nowhere.
pub const NO_LINK: u64 = u64::MAX;

const SIZE_FIELD: usize = 0;
const PREV_SIZE_FIELD: usize = 4;
const SMALLER_FIELD: usize = 8;
const LARGER_FIELD: usize = 16;

/// The pool's single backing buffer.
///
/// `header_size` is the stride between a header and its data. It is
/// [`ALLOC_HEADER_SIZE`] rounded up to the pool granularity, so data offsets
/// stay multiples of the granularity.
pub struct Arena {
    bytes: Box<[u8]>,
    header_size: usize,
}

impl Arena {
    pub(crate) fn new(len: usize, header_size: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
            header_size,
        }
    }

    /// Total arena length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Distance from a block header to its data buffer.
    #[inline]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    #[inline]
    pub(crate) fn slice(&self, start: usize, len: usize) -> &[u8] {
        &self.bytes[start..start + len]
    }

    #[inline]
    pub(crate) fn slice_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        &mut self.bytes[start..start + len]
    }

    #[inline]
    fn read_i32(&self, at: usize) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[at..at + 4]);
        i32::from_ne_bytes(raw)
    }

    #[inline]
    fn write_i32(&mut self, at: usize, value: i32) {
        self.bytes[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }

    #[inline]
    fn read_u32(&self, at: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[at..at + 4]);
        u32::from_ne_bytes(raw)
    }

    #[inline]
    fn write_u32(&mut self, at: usize, value: u32) {
        self.bytes[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }

    #[inline]
    fn read_u64(&self, at: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[at..at + 8]);
        u64::from_ne_bytes(raw)
    }

    #[inline]
    fn write_u64(&mut self, at: usize, value: u64) {
        self.bytes[at..at + 8].copy_from_slice(&value.to_ne_bytes());
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("len", &self.len())
            .field("header_size", &self.header_size)
            .finish()
    }
}

// Sizes are bounded by the pool size, which construction caps at i32::MAX.
#[inline]
fn encode_size(size: usize) -> i32 {
    debug_assert!(size <= i32::MAX as usize, "block size {size} overflows header");
    size as i32
}

/// Header present at the start of every block, allocated or free.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocHeader {
    offset: usize,
}

impl AllocHeader {
    #[inline]
    pub(crate) fn at(offset: usize) -> Self {
        Self { offset }
    }

    /// Offset of this header from the arena base.
    #[inline]
    pub fn offset(self) -> usize {
        self.offset
    }

    /// Data size in bytes, excluding the header.
    #[inline]
    pub fn size(self, arena: &Arena) -> usize {
        arena.read_i32(self.offset + SIZE_FIELD).unsigned_abs() as usize
    }

    /// Data size of the block immediately before this one, 0 for the first block.
    #[inline]
    pub fn prev_size(self, arena: &Arena) -> usize {
        arena.read_u32(self.offset + PREV_SIZE_FIELD) as usize
    }

    #[inline]
    pub fn is_free(self, arena: &Arena) -> bool {
        arena.read_i32(self.offset + SIZE_FIELD) < 0
    }

    /// Offset of the data buffer that follows the header.
    #[inline]
    pub fn ptr(self, arena: &Arena) -> usize {
        self.offset + arena.header_size()
    }

    /// Offset one past the end of this block's data.
    #[inline]
    pub fn end(self, arena: &Arena) -> usize {
        self.ptr(arena) + self.size(arena)
    }

    /// The block that follows this one, or `None` at the end of the arena.
    pub fn next_adjacent(self, arena: &Arena) -> Option<AllocHeader> {
        let next = self.end(arena);
        (next < arena.len()).then(|| AllocHeader::at(next))
    }

    /// The block that precedes this one, or `None` for the first block.
    pub fn prev_adjacent(self, arena: &Arena) -> Option<AllocHeader> {
        match self.prev_size(arena) {
            0 => None,
            prev_size => self
                .offset
                .checked_sub(prev_size + arena.header_size())
                .map(AllocHeader::at),
        }
    }

    /// Writes a fresh allocated header with the given data size.
    ///
    /// The bytes previously at this offset are block data and are ignored.
    pub fn allocate(self, arena: &mut Arena, size: usize) {
        arena.write_i32(self.offset + SIZE_FIELD, encode_size(size));
    }

    pub fn set_alloc(self, arena: &mut Arena) {
        let raw = arena.read_i32(self.offset + SIZE_FIELD);
        if raw < 0 {
            arena.write_i32(self.offset + SIZE_FIELD, -raw);
        }
    }

    /// Stores a new data size, keeping the free/allocated state.
    pub fn set_size(self, arena: &mut Arena, size: usize) {
        let magnitude = encode_size(size);
        let raw = if self.is_free(arena) {
            -magnitude
        } else {
            magnitude
        };
        arena.write_i32(self.offset + SIZE_FIELD, raw);
    }

    pub fn set_prev_size(self, arena: &mut Arena, size: usize) {
        debug_assert!(size <= u32::MAX as usize);
        arena.write_u32(self.offset + PREV_SIZE_FIELD, size as u32);
    }

    /// True if this block and the one after it are both free.
    pub fn joinable_next(self, arena: &Arena) -> bool {
        self.is_free(arena)
            && self
                .next_adjacent(arena)
                .is_some_and(|next| next.is_free(arena))
    }

    /// True if this block and the one before it are both free.
    pub fn joinable_prev(self, arena: &Arena) -> bool {
        self.is_free(arena)
            && self
                .prev_adjacent(arena)
                .is_some_and(|prev| prev.is_free(arena))
    }

    /// Absorbs the following block into this one.
    ///
    /// The caller must already have unlinked the following block from the
    /// free list and index.
    pub fn join_next(self, arena: &mut Arena) {
        if let Some(next) = self.next_adjacent(arena) {
            let joined = self.size(arena) + next.size(arena) + arena.header_size();
            self.set_size(arena, joined);
        }
    }
}

/// A free block's header, carrying its neighbours in the size-ordered free list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FreeHeader(AllocHeader);

impl Deref for FreeHeader {
    type Target = AllocHeader;

    #[inline]
    fn deref(&self) -> &AllocHeader {
        &self.0
    }
}

impl From<AllocHeader> for FreeHeader {
    #[inline]
    fn from(header: AllocHeader) -> Self {
        FreeHeader(header)
    }
}

impl FreeHeader {
    #[inline]
    pub(crate) fn at(offset: usize) -> Self {
        FreeHeader(AllocHeader::at(offset))
    }

    /// The plain header view of this block.
    #[inline]
    pub fn header(self) -> AllocHeader {
        self.0
    }

    /// Turns this header into a single free block covering `pool_size` bytes.
    pub fn init_free_block(self, arena: &mut Arena, pool_size: usize) {
        let data_size = encode_size(pool_size - arena.header_size());
        arena.write_i32(self.offset() + SIZE_FIELD, -data_size);
        self.set_prev_size(arena, 0);
        self.set_smaller_free(arena, None);
        self.set_larger_free(arena, None);
    }

    /// Marks a freshly freed block free and clears its links.
    ///
    /// Does nothing if the block is already free.
    pub fn set_free(self, arena: &mut Arena) {
        let raw = arena.read_i32(self.offset() + SIZE_FIELD);
        if raw >= 0 {
            arena.write_i32(self.offset() + SIZE_FIELD, -raw);
            self.set_smaller_free(arena, None);
            self.set_larger_free(arena, None);
        }
    }

    pub fn smaller_free(self, arena: &Arena) -> Option<FreeHeader> {
        decode_link(arena.read_u64(self.offset() + SMALLER_FIELD))
    }

    pub fn larger_free(self, arena: &Arena) -> Option<FreeHeader> {
        decode_link(arena.read_u64(self.offset() + LARGER_FIELD))
    }

    pub fn set_smaller_free(self, arena: &mut Arena, smaller: Option<FreeHeader>) {
        arena.write_u64(self.offset() + SMALLER_FIELD, encode_link(smaller));
    }

    pub fn set_larger_free(self, arena: &mut Arena, larger: Option<FreeHeader>) {
        arena.write_u64(self.offset() + LARGER_FIELD, encode_link(larger));
    }
}

#[inline]
fn decode_link(raw: u64) -> Option<FreeHeader> {
    (raw != NO_LINK).then(|| FreeHeader::at(raw as usize))
}

#[inline]
fn encode_link(link: Option<FreeHeader>) -> u64 {
    link.map_or(NO_LINK, |block| block.offset() as u64)
}

/// Decoded view of one block, tagged by the header's sign bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Block {
    Allocated {
        offset: usize,
        size: usize,
        prev_size: usize,
    },
    Free {
        offset: usize,
        size: usize,
        prev_size: usize,
        smaller: Option<usize>,
        larger: Option<usize>,
    },
}

impl Block {
    pub fn decode(header: AllocHeader, arena: &Arena) -> Block {
        let offset = header.offset();
        let size = header.size(arena);
        let prev_size = header.prev_size(arena);
        if header.is_free(arena) {
            let free = FreeHeader::from(header);
            Block::Free {
                offset,
                size,
                prev_size,
                smaller: free.smaller_free(arena).map(|block| block.offset()),
                larger: free.larger_free(arena).map(|block| block.offset()),
            }
        } else {
            Block::Allocated {
                offset,
                size,
                prev_size,
            }
        }
    }

    /// Header offset of the block.
    pub fn offset(&self) -> usize {
        match *self {
            Block::Allocated { offset, .. } | Block::Free { offset, .. } => offset,
        }
    }

    pub fn size(&self) -> usize {
        match *self {
            Block::Allocated { size, .. } | Block::Free { size, .. } => size,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Block::Free { .. })
    }
}
