//! The request object: a handle to a pending transfer (spec §4.C).
//!
//! Grounded on STXXL's `basic_request_state` / `basic_waiters_request`: a
//! request's state only ever moves forward `Op -> Done -> Ready2Die`, the
//! state reaches `Done` *before* the completion callback and waiter
//! notifications run, and any caller that registers a waiter after
//! completion is signalled immediately rather than missing the wakeup.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use log::{trace, warn};
use parking_lot::Mutex as PlMutex;

use crate::buffer::AlignedBuf;
use crate::error::BlockError;
use crate::stats::{ScopedWaitTimer, Stats};

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// The three states a request passes through, strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// In queue or being served.
    Op,
    /// Transfer complete (or cancelled); callback fired, waiters notified.
    Done,
    /// Safe to destroy.
    Ready2Die,
}

/// A one-shot wakeup handle. Multiple waiters may be registered on the same
/// request; each is signalled exactly once.
#[derive(Clone)]
pub struct Waiter(Arc<WaiterInner>);

struct WaiterInner {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Waiter {
    pub fn new() -> Self {
        Self(Arc::new(WaiterInner { signalled: Mutex::new(false), cond: Condvar::new() }))
    }

    /// Block until this waiter is signalled.
    pub fn wait(&self) {
        let mut signalled = self.0.signalled.lock().unwrap();
        while !*signalled {
            signalled = self.0.cond.wait(signalled).unwrap();
        }
    }

    fn signal(&self) {
        let mut signalled = self.0.signalled.lock().unwrap();
        *signalled = true;
        self.0.cond.notify_all();
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

type CompletionCallback = Box<dyn FnOnce(&Request) + Send>;
type CancelHook = Box<dyn FnOnce() -> bool + Send>;

struct Inner {
    disk: usize,
    offset: u64,
    bytes: usize,
    direction: Direction,
    state: Mutex<State>,
    cond: Condvar,
    cancelled: Mutex<bool>,
    waiters: Mutex<HashSet<usize>>,
    waiter_handles: Mutex<Vec<Waiter>>,
    error: Mutex<Option<Arc<BlockError>>>,
    callback: PlMutex<Option<CompletionCallback>>,
    cancel_hook: PlMutex<Option<CancelHook>>,
    /// The buffer this transfer reads into / writes from. Exclusively
    /// owned: only the serving worker touches it while `Op`, and only the
    /// caller retrieves it (via [`Request::take_buffer`]) once finished.
    buf: PlMutex<Option<AlignedBuf>>,
    /// Shared with the owning disk's queue; used to time this request's
    /// `wait()` calls and to balance the `request_finished` side of a
    /// cancellation against the submitter's `request_started`.
    stats: Arc<Stats>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A reference-counted handle to a pending (or completed) transfer.
///
/// Cloning a `Request` shares the same underlying transfer; the transfer
/// itself is only destroyed once every clone has been dropped and the
/// state has reached `Ready2Die` (enforced here by ordinary `Arc` drop
/// semantics plus the `Drop` debug assertion below).
#[derive(Clone)]
pub struct Request {
    id: u64,
    inner: Arc<Inner>,
}

impl Request {
    /// Create a new request in state `Op`. `on_complete` fires once, after
    /// the state has been set to `Done`, unless the request is cancelled.
    /// `stats` is the owning disk's counters, used to time `wait()` and to
    /// balance the submitter's `request_started` call on cancellation.
    pub fn new(
        disk: usize,
        offset: u64,
        bytes: usize,
        direction: Direction,
        buf: AlignedBuf,
        on_complete: Option<CompletionCallback>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(Inner {
                disk,
                offset,
                bytes,
                direction,
                state: Mutex::new(State::Op),
                cond: Condvar::new(),
                cancelled: Mutex::new(false),
                waiters: Mutex::new(HashSet::new()),
                waiter_handles: Mutex::new(Vec::new()),
                buf: PlMutex::new(Some(buf)),
                error: Mutex::new(None),
                callback: PlMutex::new(on_complete),
                cancel_hook: PlMutex::new(None),
                stats,
            }),
        }
    }

    /// Identity of this request, stable across clones; used by disk queues
    /// to find a specific request in a deque without comparing addresses.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn disk(&self) -> usize {
        self.inner.disk
    }

    pub fn offset(&self) -> u64 {
        self.inner.offset
    }

    pub fn bytes(&self) -> usize {
        self.inner.bytes
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock().unwrap()
    }

    /// Registered by the owning [`crate::queue::DiskQueue`] right after this
    /// request is pushed onto the pending list. Lets [`Request::cancel`]
    /// remove it from the queue without the request needing to know about
    /// queue internals.
    pub(crate) fn set_cancel_hook(&self, hook: CancelHook) {
        *self.inner.cancel_hook.lock() = Some(hook);
    }

    /// Block the calling thread until the transfer reaches `Done`, then
    /// raise any captured error. Times the block through a
    /// [`ScopedWaitTimer`] (accumulating into the owning disk's
    /// `alloc_wait_ns`) and logs it to the wait-log (spec §6) if
    /// `BLOCKSTXXL_WAITLOG` is set.
    pub fn wait(&self) -> Result<(), Arc<BlockError>> {
        let start = std::time::Instant::now();
        {
            let _timer = ScopedWaitTimer::new(&self.inner.stats);
            let mut state = self.inner.state.lock().unwrap();
            while *state == State::Op {
                state = self.inner.cond.wait(state).unwrap();
            }
        }
        crate::waitlog::record(self.inner.direction, start.elapsed().as_nanos() as u64);
        self.check_error()
    }

    /// Non-blocking check. Returns `Ok(true)` iff the transfer has finished
    /// (`Done` or `Ready2Die`) and succeeded, `Ok(false)` while still in
    /// flight, and `Err` if it finished with an error.
    pub fn poll(&self) -> Result<bool, Arc<BlockError>> {
        let state = *self.inner.state.lock().unwrap();
        if state == State::Op {
            return Ok(false);
        }
        self.check_error()?;
        Ok(true)
    }

    fn check_error(&self) -> Result<(), Arc<BlockError>> {
        match self.inner.error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Attempt to remove this request from its disk queue before a worker
    /// picks it up. Returns `true` iff the cancellation took effect; once a
    /// worker has started `serve()`, this always returns `false`.
    ///
    /// A successful cancellation never reaches the disk queue's serving
    /// step, so it balances the submitter's `request_started` itself here
    /// rather than leaving `outstanding` permanently elevated.
    pub fn cancel(&self) -> bool {
        let hook = self.inner.cancel_hook.lock().take();
        let Some(hook) = hook else {
            return false;
        };
        if !hook() {
            return false;
        }
        *self.inner.cancelled.lock().unwrap() = true;
        self.finish(true);
        self.inner.stats.request_finished();
        true
    }

    /// Register a waiter. If the request has already finished, the waiter
    /// is signalled immediately rather than parked forever.
    pub fn add_waiter(&self, w: Waiter) {
        let state = self.inner.state.lock().unwrap();
        if *state != State::Op {
            drop(state);
            w.signal();
            return;
        }
        self.inner.waiters.lock().unwrap().insert(w.id());
        self.inner.waiter_handles.lock().unwrap().push(w);
    }

    pub fn delete_waiter(&self, w: &Waiter) {
        self.inner.waiters.lock().unwrap().remove(&w.id());
        self.inner.waiter_handles.lock().unwrap().retain(|h| h.id() != w.id());
    }

    /// Run `f` against the transfer buffer. Used by the serving worker to
    /// hand the backend a mutable byte slice; must only be called while the
    /// request is still `Op`.
    pub(crate) fn with_buffer<R>(&self, f: impl FnOnce(&mut AlignedBuf) -> R) -> R {
        let mut guard = self.inner.buf.lock();
        let buf = guard.as_mut().expect("buffer present while request is Op");
        f(buf)
    }

    /// Take ownership of the buffer back. Returns `None` if already taken.
    /// Intended to be called once the request has reached `Done`.
    pub fn take_buffer(&self) -> Option<AlignedBuf> {
        self.inner.buf.lock().take()
    }

    /// Called by the serving worker once `file.serve()` returns (spec §4.D):
    /// marks `Done`, fires the completion callback, notifies waiters, then
    /// marks `Ready2Die`.
    pub(crate) fn complete(&self, result: Result<(), BlockError>) {
        if let Err(e) = result {
            warn!("request {} on disk {} failed: {e}", self.id, self.inner.disk);
            *self.inner.error.lock().unwrap() = Some(Arc::new(e));
        }
        self.finish(false);
    }

    fn finish(&self, skip_callback: bool) {
        {
            let mut state = self.inner.state.lock().unwrap();
            *state = State::Done;
            self.inner.cond.notify_all();
        }
        if !skip_callback {
            if let Some(cb) = self.inner.callback.lock().take() {
                cb(self);
            }
        }
        let handles = std::mem::take(&mut *self.inner.waiter_handles.lock().unwrap());
        self.inner.waiters.lock().unwrap().clear();
        for w in handles {
            w.signal();
        }
        {
            let mut state = self.inner.state.lock().unwrap();
            *state = State::Ready2Die;
        }
        trace!("request {} reached Ready2Die", self.id);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = *self.state.lock().unwrap();
        debug_assert!(
            matches!(state, State::Done | State::Ready2Die),
            "request dropped while still Op: buffer may still be in flight"
        );
    }
}
