//! ## safepool-core::alloc::validate
//! **Whole-pool consistency checker**
//!
//! Walks the block chain in address order, both directions of the free
//! list and every index bucket. Only blocks found by the address walk are
//! ever dereferenced, so corrupt links produce an error instead of a panic.
//! Compiled for tests and under the `validate` feature.

use std::collections::{BTreeMap, BTreeSet};

use super::header::{AllocHeader, FreeHeader};
use super::index::FreeIndex;
use super::pool::MemoryPool;
use crate::error::ValidationError;

/// Largest probe size checked against [`FreeIndex::find`].
const MAX_PROBE: usize = 4096;

/// Byte accounting of a consistent pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub allocated_bytes: usize,
    pub free_bytes: usize,
    /// Header bytes, one header stride per block.
    pub overhead_bytes: usize,
    pub block_count: usize,
    pub free_count: usize,
    pub largest_free: usize,
}

impl MemoryPool {
    /// Checks every structural invariant of the pool without mutating it.
    pub fn validate(&self) -> Result<PoolReport, ValidationError> {
        let (report, free_blocks) = self.walk_blocks()?;
        self.check_free_list(&report, &free_blocks)?;
        self.check_index(&free_blocks)?;
        Ok(report)
    }

    /// Address-order walk. Returns the report and every free block's size
    /// keyed by header offset.
    fn walk_blocks(&self) -> Result<(PoolReport, BTreeMap<usize, usize>), ValidationError> {
        let arena = self.arena();
        let pool_size = self.size();
        let header_size = self.header_size();

        let mut report = PoolReport {
            largest_free: self.largest_free_size(),
            ..PoolReport::default()
        };
        let mut free_blocks = BTreeMap::new();
        let mut prev: Option<(usize, usize, bool)> = None;
        let mut offset = 0;

        while offset < pool_size {
            if offset + header_size > pool_size {
                return Err(ValidationError::ChainOverrun {
                    offset,
                    end: offset + header_size,
                    pool_size,
                });
            }
            let header = AllocHeader::at(offset);
            let size = header.size(arena);
            if size == 0 {
                return Err(ValidationError::ZeroSizeBlock { offset });
            }
            let end = header.end(arena);
            if end > pool_size {
                return Err(ValidationError::ChainOverrun {
                    offset,
                    end,
                    pool_size,
                });
            }

            let recorded = header.prev_size(arena);
            let actual = prev.map_or(0, |(_, size, _)| size);
            if recorded != actual {
                return Err(ValidationError::BrokenPrevLink {
                    offset,
                    recorded,
                    actual,
                });
            }

            let is_free = header.is_free(arena);
            if let Some((prev_offset, _, true)) = prev {
                if is_free {
                    return Err(ValidationError::AdjacentFree {
                        first: prev_offset,
                        second: offset,
                    });
                }
            }

            if is_free {
                report.free_bytes += size;
                free_blocks.insert(offset, size);
            } else {
                report.allocated_bytes += size;
            }
            report.overhead_bytes += header_size;
            report.block_count += 1;
            prev = Some((offset, size, is_free));
            offset = end;
        }
        report.free_count = free_blocks.len();

        let total = report.allocated_bytes + report.free_bytes + report.overhead_bytes;
        if total != pool_size {
            return Err(ValidationError::Conservation {
                allocated: report.allocated_bytes,
                free: report.free_bytes,
                overhead: report.overhead_bytes,
                pool_size,
            });
        }
        Ok((report, free_blocks))
    }

    fn check_free_list(
        &self,
        report: &PoolReport,
        free_blocks: &BTreeMap<usize, usize>,
    ) -> Result<(), ValidationError> {
        let arena = self.arena();

        let descending = walk_list(self.largest_free(), free_blocks, Order::Descending, |block| {
            block.smaller_free(arena)
        })?;
        if descending.bytes != report.free_bytes || descending.count != free_blocks.len() {
            return Err(ValidationError::ListBytes {
                listed: descending.bytes,
                free: report.free_bytes,
            });
        }

        let ascending = walk_list(descending.last, free_blocks, Order::Ascending, |block| {
            block.larger_free(arena)
        })?;
        if ascending.bytes != report.free_bytes {
            return Err(ValidationError::ListBytes {
                listed: ascending.bytes,
                free: report.free_bytes,
            });
        }

        let expected = self.largest_free().map(|block| block.offset());
        let found = ascending.last.map(|block| block.offset());
        if found != expected {
            return Err(ValidationError::ListEnds { found, expected });
        }
        Ok(())
    }

    fn check_index(&self, free_blocks: &BTreeMap<usize, usize>) -> Result<(), ValidationError> {
        let index = self.free_index();

        for (bucket, node) in index.nodes().iter().enumerate() {
            let Some(block) = node.ptr() else {
                continue;
            };
            let offset = block.offset();
            let Some(&size) = free_blocks.get(&offset) else {
                return Err(ValidationError::IndexNotFree { bucket, offset });
            };
            if !node.contains(size) {
                return Err(ValidationError::IndexRange {
                    bucket,
                    offset,
                    size,
                    min: node.size(),
                    limit: node.limit(),
                });
            }
        }

        let mut probe = 8;
        while probe <= MAX_PROBE {
            let tightest = free_blocks
                .iter()
                .filter(|(_, &size)| size >= probe)
                .min_by_key(|(_, &size)| size);

            match (index.find(probe, self.largest_free(), self.arena()), tightest) {
                (Some(found), _) => {
                    let offset = found.offset();
                    let size = free_blocks.get(&offset).copied().ok_or(
                        ValidationError::IndexNotFree {
                            bucket: FreeIndex::node_index(probe),
                            offset,
                        },
                    )?;
                    if size < probe {
                        return Err(ValidationError::FindTooSmall {
                            probe,
                            offset,
                            size,
                        });
                    }
                    if let Some((&tighter, &tighter_size)) = tightest {
                        if tighter_size < size {
                            return Err(ValidationError::FindNotTightest {
                                probe,
                                offset,
                                tighter,
                            });
                        }
                    }
                }
                (None, Some((&offset, _))) => {
                    return Err(ValidationError::FindMissed { probe, offset });
                }
                (None, None) => {}
            }
            probe *= 2;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Order {
    Descending,
    Ascending,
}

struct ListWalk {
    bytes: usize,
    count: usize,
    last: Option<FreeHeader>,
}

fn walk_list(
    start: Option<FreeHeader>,
    free_blocks: &BTreeMap<usize, usize>,
    order: Order,
    next: impl Fn(FreeHeader) -> Option<FreeHeader>,
) -> Result<ListWalk, ValidationError> {
    let mut seen = BTreeSet::new();
    let mut walk = ListWalk {
        bytes: 0,
        count: 0,
        last: None,
    };
    let mut previous: Option<usize> = None;
    let mut cursor = start;

    while let Some(block) = cursor {
        let offset = block.offset();
        let Some(&size) = free_blocks.get(&offset) else {
            return Err(ValidationError::UnknownListEntry { offset });
        };
        if !seen.insert(offset) {
            return Err(ValidationError::ListCycle { offset });
        }
        if let Some(previous) = previous {
            let out_of_order = match order {
                Order::Descending => size > previous,
                Order::Ascending => size < previous,
            };
            if out_of_order {
                return Err(ValidationError::ListOrder {
                    offset,
                    size,
                    previous,
                });
            }
        }
        walk.bytes += size;
        walk.count += 1;
        walk.last = Some(block);
        previous = Some(size);
        cursor = next(block);
    }
    Ok(walk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::pool::PoolPtr;

    fn busy_pool() -> (MemoryPool, Vec<PoolPtr>) {
        let mut pool = MemoryPool::new(2048, 8).unwrap();
        let ptrs: Vec<_> = [128, 64, 256, 32, 128]
            .into_iter()
            .map(|size| pool.pool_alloc(size).unwrap())
            .collect();
        assert!(pool.pool_free(Some(ptrs[1])));
        assert!(pool.pool_free(Some(ptrs[3])));
        (pool, ptrs)
    }

    #[test]
    fn test_fresh_pool_report() {
        let pool = MemoryPool::new(1024, 8).unwrap();
        let report = pool.validate().unwrap();
        assert_eq!(
            report,
            PoolReport {
                allocated_bytes: 0,
                free_bytes: 1016,
                overhead_bytes: 8,
                block_count: 1,
                free_count: 1,
                largest_free: 1016,
            }
        );
    }

    #[test]
    fn test_busy_pool_report() {
        let (pool, _) = busy_pool();
        let report = pool.validate().unwrap();
        assert_eq!(report.allocated_bytes, 128 + 256 + 128);
        assert_eq!(report.block_count, 6);
        assert_eq!(report.free_count, 3);
        assert_eq!(
            report.allocated_bytes + report.free_bytes + report.overhead_bytes,
            2048
        );
        assert_eq!(pool.blocks().filter(|block| block.is_free()).count(), 3);
    }

    #[test]
    fn test_detects_adjacent_free_blocks() {
        let (mut pool, ptrs) = busy_pool();
        // Flip the block between the two free ones without joining.
        let header = AllocHeader::at(ptrs[2].offset() - pool.header_size());
        FreeHeader::from(header).set_free(pool.arena_mut());
        assert!(matches!(
            pool.validate(),
            Err(ValidationError::AdjacentFree { .. })
        ));
    }

    #[test]
    fn test_detects_broken_prev_size() {
        let (mut pool, ptrs) = busy_pool();
        let header = AllocHeader::at(ptrs[2].offset() - pool.header_size());
        header.set_prev_size(pool.arena_mut(), 1);
        assert!(matches!(
            pool.validate(),
            Err(ValidationError::BrokenPrevLink { recorded: 1, .. })
        ));
    }

    #[test]
    fn test_detects_list_cycle() {
        let (mut pool, _) = busy_pool();
        let largest = pool.largest_free().unwrap();
        let smaller = largest.smaller_free(pool.arena()).unwrap();
        smaller.set_smaller_free(pool.arena_mut(), Some(largest));
        assert!(matches!(
            pool.validate(),
            Err(ValidationError::ListCycle { .. }) | Err(ValidationError::ListOrder { .. })
        ));
    }

    #[test]
    fn test_detects_dangling_list_link() {
        let (mut pool, _) = busy_pool();
        let largest = pool.largest_free().unwrap();
        largest.set_smaller_free(pool.arena_mut(), Some(FreeHeader::at(3)));
        assert_eq!(
            pool.validate(),
            Err(ValidationError::UnknownListEntry { offset: 3 })
        );
    }

    #[test]
    fn test_detects_zero_size_block() {
        let (mut pool, ptrs) = busy_pool();
        let header = AllocHeader::at(ptrs[0].offset() - pool.header_size());
        header.set_size(pool.arena_mut(), 0);
        assert!(matches!(
            pool.validate(),
            Err(ValidationError::ZeroSizeBlock { .. })
        ));
    }
}
