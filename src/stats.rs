//! Timing & statistics (spec §4.H): per-process counters plus a scoped timer
//! that records the elapsed time of the region surrounding each `serve()`
//! and each `wait()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide I/O counters. Cheap to read from any thread; every counter
/// is a plain atomic, incremented by the disk queue workers and by
/// [`crate::request::Request::wait`] callers via [`ScopedWaitTimer`].
#[derive(Default)]
pub struct Stats {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    io_wait_ns: AtomicU64,
    alloc_wait_ns: AtomicU64,
    outstanding: AtomicU64,
    peak_outstanding: AtomicU64,
}

/// A snapshot of [`Stats`] at one instant, safe to print or compare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub reads: u64,
    pub writes: u64,
    pub io_wait_ns: u64,
    pub alloc_wait_ns: u64,
    pub peak_outstanding: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, bytes: usize, elapsed_ns: u64) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.io_wait_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize, elapsed_ns: u64) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.io_wait_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    pub fn record_wait(&self, elapsed_ns: u64) {
        self.alloc_wait_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    /// Call when a request is submitted; pairs with [`Stats::request_finished`].
    pub fn request_started(&self) {
        let now = self.outstanding.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_outstanding.fetch_max(now, Ordering::Relaxed);
    }

    pub fn request_finished(&self) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            io_wait_ns: self.io_wait_ns.load(Ordering::Relaxed),
            alloc_wait_ns: self.alloc_wait_ns.load(Ordering::Relaxed),
            peak_outstanding: self.peak_outstanding.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.io_wait_ns.store(0, Ordering::Relaxed);
        self.alloc_wait_ns.store(0, Ordering::Relaxed);
        self.peak_outstanding.store(0, Ordering::Relaxed);
    }
}

/// Starts a clock on construction; on drop (every exit path, including
/// panics unwinding through it) adds the elapsed nanoseconds to `stats`.
pub struct ScopedReadWriteTimer<'a> {
    stats: &'a Stats,
    bytes: usize,
    is_write: bool,
    start: Instant,
}

impl<'a> ScopedReadWriteTimer<'a> {
    pub fn new(stats: &'a Stats, bytes: usize, is_write: bool) -> Self {
        Self { stats, bytes, is_write, start: Instant::now() }
    }
}

impl Drop for ScopedReadWriteTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_nanos() as u64;
        if self.is_write {
            self.stats.record_write(self.bytes, elapsed);
        } else {
            self.stats.record_read(self.bytes, elapsed);
        }
    }
}

/// Scoped timer for the region around `Request::wait`.
pub struct ScopedWaitTimer<'a> {
    stats: &'a Stats,
    start: Instant,
}

impl<'a> ScopedWaitTimer<'a> {
    pub fn new(stats: &'a Stats) -> Self {
        Self { stats, start: Instant::now() }
    }
}

impl Drop for ScopedWaitTimer<'_> {
    fn drop(&mut self) {
        self.stats.record_wait(self.start.elapsed().as_nanos() as u64);
    }
}
