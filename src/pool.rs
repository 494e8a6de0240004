//! Prefetch / write-back pool (spec §4.G). Grounded on STXXL's
//! `include/stxxl/bits/mng/read_write_pool.h` and `prefetch_pool.h`/
//! `write_pool.h`: a bounded set of reusable buffers drives look-ahead
//! reads and asynchronous write-back, stealing the least-recently-hinted
//! prefetch when buffers run out and blocking on the oldest in-flight
//! write when the write side is saturated.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use log::{debug, trace, warn};

use crate::block::Bid;
use crate::buffer::{alloc_aligned, AlignedBuf};
use crate::error::{BlockError, Result};
use crate::manager::BlockManager;
use crate::request::{Direction, Request};

struct Prefetched {
    bid: Bid,
    request: Request,
    /// Monotonically increasing hint order; the lowest is stolen first.
    order: u64,
}

struct PoolState {
    free: Vec<AlignedBuf>,
    prefetched: Vec<Prefetched>,
    in_flight_writes: VecDeque<Request>,
    next_order: u64,
    prefetch_cap: usize,
}

/// The bounded pair of prefetch/write-back buffer pools that every
/// streaming container (stack, queue, sort) is built on.
pub struct ReadWritePool {
    manager: Arc<BlockManager>,
    state: Mutex<PoolState>,
    free_cond: Condvar,
    write_cap: usize,
}

impl ReadWritePool {
    /// `prefetch_n` buffers dedicated to look-ahead reads, `write_n` to
    /// outstanding write-back; the pool itself owns `prefetch_n +
    /// write_n` buffers of `block_size` bytes.
    pub fn new(manager: Arc<BlockManager>, block_size: usize, prefetch_n: usize, write_n: usize) -> Self {
        let total = prefetch_n + write_n;
        let free = (0..total).map(|_| alloc_aligned(block_size)).collect();
        Self {
            manager,
            state: Mutex::new(PoolState {
                free,
                prefetched: Vec::new(),
                in_flight_writes: VecDeque::new(),
                next_order: 0,
                prefetch_cap: prefetch_n,
            }),
            free_cond: Condvar::new(),
            write_cap: write_n,
        }
    }

    /// Issue a look-ahead read for `bid` if not already prefetched,
    /// stealing a buffer from the least-recently-hinted prefetch (or
    /// blocking for a free one) when the pool has none spare.
    ///
    /// Stealing/blocking happens with the pool lock held: cancelling or
    /// waiting on a `Request` only ever touches that request's own
    /// locks, never the pool's, so this cannot deadlock against a disk
    /// worker.
    pub fn hint(&self, bid: Bid) -> Result<()> {
        let guard = self.state.lock().unwrap();
        if guard.prefetched.iter().any(|p| p.bid == bid) {
            return Ok(());
        }
        let (buf, mut guard) = self.acquire_free_or_steal(guard)?;
        let order = guard.next_order;
        guard.next_order += 1;
        drop(guard);

        let req = self.issue_read(bid, buf);
        self.state.lock().unwrap().prefetched.push(Prefetched { bid, request: req, order });
        Ok(())
    }

    /// Fetch `bid`, either by completing an already-issued prefetch or by
    /// issuing a fresh synchronous-style read.
    pub fn read(&self, bid: Bid) -> Result<(AlignedBuf, Request)> {
        let existing = {
            let mut guard = self.state.lock().unwrap();
            let pos = guard.prefetched.iter().position(|p| p.bid == bid);
            pos.map(|i| guard.prefetched.remove(i))
        };
        if let Some(entry) = existing {
            entry.request.wait().map_err(|e| (*e).clone())?;
            let buf = entry.request.take_buffer().ok_or_else(|| {
                BlockError::BugAssert(format!("prefetch buffer for {bid:?} already taken"))
            })?;
            return Ok((buf, entry.request));
        }

        let guard = self.state.lock().unwrap();
        let (buf, guard) = self.acquire_free_or_steal(guard)?;
        drop(guard);
        let req = self.issue_read(bid, buf);
        req.wait().map_err(|e| (*e).clone())?;
        let buf = req
            .take_buffer()
            .ok_or_else(|| BlockError::BugAssert(format!("read buffer for {bid:?} already taken")))?;
        Ok((buf, req))
    }

    /// Write `buf` back to `bid`, applying backpressure if `write_n`
    /// writes are already outstanding by waiting for the oldest to land.
    pub fn write(&self, buf: AlignedBuf, bid: Bid) -> Result<Request> {
        loop {
            let oldest = {
                let mut guard = self.state.lock().unwrap();
                if guard.in_flight_writes.len() < self.write_cap {
                    break;
                }
                guard.in_flight_writes.pop_front().unwrap()
            };
            oldest.wait().map_err(|e| (*e).clone())?;
            if let Some(returned) = oldest.take_buffer() {
                self.release(returned);
            }
        }

        let req = self.issue_write(bid, buf);
        self.state.lock().unwrap().in_flight_writes.push_back(req.clone());
        Ok(req)
    }

    /// Clamp the number of outstanding prefetches to `k`, cancelling (or
    /// letting finish and discarding) the excess, oldest first.
    pub fn set_prefetch_aggressiveness(&self, k: usize) {
        let mut guard = self.state.lock().unwrap();
        guard.prefetch_cap = k;
        guard.prefetched.sort_by_key(|p| p.order);
        while guard.prefetched.len() > k {
            let victim = guard.prefetched.remove(0);
            if !victim.request.cancel() {
                let _ = victim.request.wait();
            }
            if let Some(buf) = victim.request.take_buffer() {
                guard.free.push(buf);
                self.free_cond.notify_one();
            }
        }
    }

    /// Pop a free buffer, stealing from the least-recently-hinted
    /// prefetch if the free list is empty, blocking on the free-buffer
    /// condvar as a last resort.
    fn acquire_free_or_steal<'a>(
        &'a self,
        mut guard: MutexGuard<'a, PoolState>,
    ) -> Result<(AlignedBuf, MutexGuard<'a, PoolState>)> {
        loop {
            if let Some(buf) = guard.free.pop() {
                return Ok((buf, guard));
            }
            if let Some(victim_idx) = Self::least_recently_hinted(&guard) {
                let victim = guard.prefetched.remove(victim_idx);
                trace!("pool stealing prefetch buffer from bid {:?}", victim.bid);
                if !victim.request.cancel() {
                    let _ = victim.request.wait();
                }
                if let Some(buf) = victim.request.take_buffer() {
                    return Ok((buf, guard));
                }
                warn!("stolen prefetch for {:?} had no buffer to reclaim", victim.bid);
                continue;
            }
            warn!("pool exhausted with nothing stealable; blocking for a free buffer");
            guard = self.free_cond.wait(guard).unwrap();
        }
    }

    fn least_recently_hinted(state: &PoolState) -> Option<usize> {
        state
            .prefetched
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| p.order)
            .map(|(i, _)| i)
    }

    fn release(&self, buf: AlignedBuf) {
        let mut guard = self.state.lock().unwrap();
        guard.free.push(buf);
        self.free_cond.notify_one();
    }

    fn issue_read(&self, bid: Bid, buf: AlignedBuf) -> Request {
        match self.manager.aread(bid, buf, None) {
            Ok(req) => req,
            Err(e) => {
                let req = Request::new(
                    bid.disk_index,
                    bid.offset,
                    bid.size,
                    Direction::Read,
                    alloc_aligned(bid.size),
                    None,
                    self.manager.stats().clone(),
                );
                req.complete(Err(e));
                req
            }
        }
    }

    fn issue_write(&self, bid: Bid, buf: AlignedBuf) -> Request {
        match self.manager.awrite(bid, buf, None) {
            Ok(req) => req,
            Err(e) => {
                let req = Request::new(
                    bid.disk_index,
                    bid.offset,
                    bid.size,
                    Direction::Write,
                    alloc_aligned(bid.size),
                    None,
                    self.manager.stats().clone(),
                );
                req.complete(Err(e));
                req
            }
        }
    }
}

impl Drop for ReadWritePool {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        debug!(
            "pool teardown: {} prefetches outstanding, {} writes in flight",
            state.prefetched.len(),
            state.in_flight_writes.len()
        );
        for req in state.in_flight_writes.drain(..) {
            let _ = req.wait();
        }
        for p in state.prefetched.drain(..) {
            let _ = p.request.cancel();
            let _ = p.request.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory_backend::MemoryBackend;
    use crate::manager::StripingStrategy;
    use crate::queue::PriorityPolicy;

    fn manager_with_disks(n: usize, block_size: u64, blocks: u64) -> Arc<BlockManager> {
        let disks = (0..n)
            .map(|_| {
                let backend: Arc<dyn crate::io::FileBackend> =
                    Arc::new(MemoryBackend::with_capacity((block_size * blocks) as usize));
                (backend, block_size * blocks, block_size, PriorityPolicy::ReadFirst)
            })
            .collect();
        Arc::new(BlockManager::new(disks))
    }

    #[test]
    fn write_then_read_round_trips_through_pool() {
        let mgr = manager_with_disks(1, 4096, 8);
        let pool = ReadWritePool::new(mgr.clone(), 4096, 2, 2);
        let bid = mgr.new_blocks(StripingStrategy::SingleDisk { disk: 0 }, 1).unwrap()[0];

        let mut buf = alloc_aligned(4096);
        buf[..5].copy_from_slice(b"hello");
        pool.write(buf, bid).unwrap().wait().unwrap();

        let (read_buf, _req) = pool.read(bid).unwrap();
        assert_eq!(&read_buf[..5], b"hello");
    }

    #[test]
    fn hint_then_read_completes_without_reissuing_io() {
        let mgr = manager_with_disks(1, 4096, 8);
        let pool = ReadWritePool::new(mgr.clone(), 4096, 2, 2);
        let bid = mgr.new_blocks(StripingStrategy::SingleDisk { disk: 0 }, 1).unwrap()[0];
        let mut buf = alloc_aligned(4096);
        buf[..3].copy_from_slice(b"abc");
        pool.write(buf, bid).unwrap().wait().unwrap();

        pool.hint(bid).unwrap();
        let (read_buf, _req) = pool.read(bid).unwrap();
        assert_eq!(&read_buf[..3], b"abc");
    }

    #[test]
    fn write_backpressure_blocks_until_oldest_completes() {
        let mgr = manager_with_disks(1, 4096, 8);
        let pool = ReadWritePool::new(mgr.clone(), 4096, 1, 2);
        let bids = mgr.new_blocks(StripingStrategy::SingleDisk { disk: 0 }, 3).unwrap();

        for bid in &bids {
            let buf = alloc_aligned(4096);
            pool.write(buf, *bid).unwrap();
        }
    }

    #[test]
    fn set_prefetch_aggressiveness_cancels_excess() {
        let mgr = manager_with_disks(2, 4096, 8);
        let pool = ReadWritePool::new(mgr.clone(), 4096, 3, 1);
        let bids = mgr.new_blocks(StripingStrategy::Striping { start: 0 }, 3).unwrap();
        for bid in &bids {
            pool.write(alloc_aligned(4096), *bid).unwrap().wait().unwrap();
        }
        for bid in &bids {
            pool.hint(*bid).unwrap();
        }
        pool.set_prefetch_aggressiveness(1);
        let remaining = pool.state.lock().unwrap().prefetched.len();
        assert_eq!(remaining, 1);
    }
}
