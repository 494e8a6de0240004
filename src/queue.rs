//! Per-disk request queue and worker thread (spec §4.D). Grounded on
//! STXXL's `disk_queues.h`, `request_queue_impl_worker.cpp` and
//! `disk_queued_file.h`: one queue per disk, one worker thread per queue,
//! a counting semaphore wakes the worker exactly once per enqueued
//! request, and shutdown drains whatever is still pending before the
//! thread exits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, trace};

use crate::error::BlockError;
use crate::io::FileBackend;
use crate::request::{Direction, Request};
use crate::stats::{ScopedReadWriteTimer, Stats};

/// Which direction gets first pick when both read and write requests are
/// pending (spec §4.D). STXXL calls this the queue's "priority op".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityPolicy {
    ReadFirst,
    WriteFirst,
    /// Alternate strictly between directions, one request at a time.
    Alternating,
}

/// A basic counting semaphore: `post` increments and wakes one waiter,
/// `wait` blocks until the count is positive then decrements it.
struct Semaphore {
    count: Mutex<isize>,
    cond: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Self { count: Mutex::new(0), cond: Condvar::new() }
    }

    fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }

    fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count <= 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Consume one permit without waiting, for a request that was cancelled
    /// before a worker dequeued it; keeps the semaphore's count in sync
    /// with the number of entries actually still in the deques.
    fn cancel_one(&self) {
        let mut count = self.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
        }
    }
}

struct QueueState {
    reads: VecDeque<Request>,
    writes: VecDeque<Request>,
}

/// One disk's request queue plus its worker thread.
///
/// Construction spawns the worker immediately (lazily, from
/// [`crate::manager::BlockManager`], the first time a disk is touched —
/// see spec §4.D and the manager's disk-queue cache).
pub struct DiskQueue {
    state: Arc<Mutex<QueueState>>,
    sem: Arc<Semaphore>,
    terminating: Arc<AtomicBool>,
    policy: PriorityPolicy,
    worker: Option<JoinHandle<()>>,
}

impl DiskQueue {
    pub fn new(file: Arc<dyn FileBackend>, stats: Arc<Stats>, policy: PriorityPolicy) -> Self {
        let state = Arc::new(Mutex::new(QueueState { reads: VecDeque::new(), writes: VecDeque::new() }));
        let sem = Arc::new(Semaphore::new());
        let terminating = Arc::new(AtomicBool::new(false));

        let worker = {
            let state = state.clone();
            let sem = sem.clone();
            let terminating = terminating.clone();
            std::thread::Builder::new()
                .name("blockstxxl-disk-worker".into())
                .spawn(move || worker_loop(state, sem, terminating, file, stats, policy))
                .expect("failed to spawn disk worker thread")
        };

        Self { state, sem, terminating, policy, worker: Some(worker) }
    }

    /// Enqueue `req`, installing a cancel hook that removes it again before
    /// a worker picks it up.
    pub fn enqueue(&self, req: Request) {
        let direction = req.direction();
        let state = self.state.clone();
        let sem = self.sem.clone();
        let target_id = req.id();

        {
            let mut state = self.state.lock().unwrap();
            match direction {
                Direction::Read => state.reads.push_back(req.clone()),
                Direction::Write => state.writes.push_back(req.clone()),
            }
        }

        req.set_cancel_hook(Box::new(move || {
            let mut state = state.lock().unwrap();
            let deque = match direction {
                Direction::Read => &mut state.reads,
                Direction::Write => &mut state.writes,
            };
            if let Some(pos) = deque.iter().position(|r| r.id() == target_id) {
                deque.remove(pos);
                drop(state);
                sem.cancel_one();
                true
            } else {
                false
            }
        }));

        self.sem.post();
    }

    /// Flip the termination flag and wake the worker so it drains the
    /// remaining queue and exits. Matches STXXL's `stop_thread`.
    pub fn shutdown(&mut self) {
        self.terminating.store(true, Ordering::SeqCst);
        self.sem.post();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    pub fn policy(&self) -> PriorityPolicy {
        self.policy
    }
}

impl Drop for DiskQueue {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

/// Pick the next request according to `policy`, alternating state tracked
/// across calls via `last_was_write`.
fn dequeue_next(state: &mut QueueState, policy: PriorityPolicy, last_was_write: &mut bool) -> Option<Request> {
    let take_read = |state: &mut QueueState| state.reads.pop_front();
    let take_write = |state: &mut QueueState| state.writes.pop_front();

    match policy {
        PriorityPolicy::ReadFirst => take_read(state).or_else(|| take_write(state)),
        PriorityPolicy::WriteFirst => take_write(state).or_else(|| take_read(state)),
        PriorityPolicy::Alternating => {
            if *last_was_write {
                if let Some(r) = take_read(state) {
                    *last_was_write = false;
                    return Some(r);
                }
                take_write(state)
            } else {
                if let Some(w) = take_write(state) {
                    *last_was_write = true;
                    return Some(w);
                }
                take_read(state)
            }
        }
    }
}

fn worker_loop(
    state: Arc<Mutex<QueueState>>,
    sem: Arc<Semaphore>,
    terminating: Arc<AtomicBool>,
    file: Arc<dyn FileBackend>,
    stats: Arc<Stats>,
    policy: PriorityPolicy,
) {
    let mut last_was_write = false;
    loop {
        sem.wait();

        if terminating.load(Ordering::SeqCst) {
            debug!("disk worker draining before exit");
            loop {
                let next = {
                    let mut guard = state.lock().unwrap();
                    dequeue_next(&mut guard, policy, &mut last_was_write)
                };
                match next {
                    Some(req) => serve_one(&req, &*file, &stats),
                    None => break,
                }
            }
            trace!("disk worker exiting");
            return;
        }

        let next = {
            let mut guard = state.lock().unwrap();
            dequeue_next(&mut guard, policy, &mut last_was_write)
        };
        if let Some(req) = next {
            serve_one(&req, &*file, &stats);
        }
    }
}

fn serve_one(req: &Request, file: &dyn FileBackend, stats: &Stats) {
    let direction = req.direction();
    let is_write = direction == Direction::Write;
    let offset = req.offset();
    let bytes = req.bytes();
    let disk = req.disk();

    let result = {
        let _timer = ScopedReadWriteTimer::new(stats, bytes, is_write);
        req.with_buffer(|buf| file.serve(offset, direction, &mut buf[..bytes]))
    };

    req.complete(result.map_err(|e| BlockError::io(disk, offset, e)));
    stats.request_finished();
}
