//! Per-disk free-space bookkeeping (spec §4.E). Grounded on STXXL's
//! `include/stxxl/bits/mng/diskallocator.h`: free space is a sorted,
//! disjoint, coalesced list of (start, length) extents; allocation is
//! first-fit over whole blocks, never fragmented across extents.

use crate::block::Bid;
use crate::error::{BlockError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    start: u64,
    length: u64,
}

/// Free-space tracker for a single disk. `disk_index` is baked into every
/// [`Bid`] this allocator produces.
pub struct DiskAllocator {
    disk_index: usize,
    capacity: u64,
    /// Sorted, disjoint, never-adjacent free extents.
    free: Vec<Extent>,
}

impl DiskAllocator {
    /// A fresh allocator over `capacity` bytes, entirely free.
    pub fn new(disk_index: usize, capacity: u64) -> Self {
        Self { disk_index, capacity, free: vec![Extent { start: 0, length: capacity }] }
    }

    pub fn disk_index(&self) -> usize {
        self.disk_index
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn free_bytes(&self) -> u64 {
        self.free.iter().map(|e| e.length).sum()
    }

    /// Allocate `n` blocks of `block_size` bytes each, first-fit, one
    /// extent-carve per block. Fails with `OutOfSpace` as soon as any one
    /// block cannot be carved from a single free extent — no block ever
    /// straddles two extents.
    pub fn new_blocks(&mut self, n: usize, block_size: u64) -> Result<Vec<Bid>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match self.carve_one(block_size) {
                Some(bid) => out.push(bid),
                None => {
                    // Roll back what we've carved so a partial failure
                    // doesn't leak allocated-but-unreturned blocks.
                    for bid in out {
                        self.free_one(bid.offset, bid.size as u64);
                    }
                    return Err(BlockError::out_of_space(
                        self.disk_index,
                        block_size * n as u64,
                        self.free_bytes(),
                    ));
                }
            }
        }
        Ok(out)
    }

    fn carve_one(&mut self, block_size: u64) -> Option<Bid> {
        let idx = self.free.iter().position(|e| e.length >= block_size)?;
        let extent = self.free[idx];
        let bid = Bid::new(self.disk_index, extent.start, block_size as usize);
        if extent.length == block_size {
            self.free.remove(idx);
        } else {
            self.free[idx] = Extent { start: extent.start + block_size, length: extent.length - block_size };
        }
        Some(bid)
    }

    /// Return a set of blocks to the free pool, coalescing with neighbors.
    pub fn delete_blocks(&mut self, bids: &[Bid]) {
        for bid in bids {
            self.free_one(bid.offset, bid.size as u64);
        }
    }

    fn free_one(&mut self, start: u64, length: u64) {
        let pos = self.free.partition_point(|e| e.start < start);
        self.free.insert(pos, Extent { start, length });

        // Merge with the following neighbor first so indices stay valid,
        // then with the preceding one.
        if pos + 1 < self.free.len() {
            let cur = self.free[pos];
            let next = self.free[pos + 1];
            if cur.start + cur.length == next.start {
                self.free[pos] = Extent { start: cur.start, length: cur.length + next.length };
                self.free.remove(pos + 1);
            }
        }
        if pos > 0 {
            let prev = self.free[pos - 1];
            let cur = self.free[pos];
            if prev.start + prev.length == cur.start {
                self.free[pos - 1] = Extent { start: prev.start, length: prev.length + cur.length };
                self.free.remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_restores_single_extent() {
        let mut alloc = DiskAllocator::new(0, 4096 * 4);
        let bids = alloc.new_blocks(4, 4096).unwrap();
        assert_eq!(alloc.free_bytes(), 0);
        alloc.delete_blocks(&bids);
        assert_eq!(alloc.free_bytes(), 4096 * 4);
        assert_eq!(alloc.free.len(), 1);
    }

    #[test]
    fn out_of_space_when_no_single_extent_suffices() {
        let mut alloc = DiskAllocator::new(0, 4096 * 2);
        let bids = alloc.new_blocks(2, 4096).unwrap();
        // free both, but interleave an allocation to fragment the space
        alloc.delete_blocks(&[bids[0]]);
        let err = alloc.new_blocks(1, 8192);
        assert!(err.is_err());
    }

    #[test]
    fn partial_failure_rolls_back_allocated_blocks() {
        let mut alloc = DiskAllocator::new(0, 4096 * 2);
        let result = alloc.new_blocks(3, 4096);
        assert!(result.is_err());
        assert_eq!(alloc.free_bytes(), 4096 * 2);
    }

    #[test]
    fn freed_extents_coalesce_out_of_order() {
        let mut alloc = DiskAllocator::new(0, 4096 * 3);
        let bids = alloc.new_blocks(3, 4096).unwrap();
        alloc.delete_blocks(&[bids[2]]);
        alloc.delete_blocks(&[bids[0]]);
        alloc.delete_blocks(&[bids[1]]);
        assert_eq!(alloc.free.len(), 1);
        assert_eq!(alloc.free_bytes(), 4096 * 3);
    }
}
