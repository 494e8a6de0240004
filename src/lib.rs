//! External-memory block I/O core: aligned blocks, a uniform asynchronous
//! request object over four file backends, striped allocation across
//! multiple disks, and a prefetch/write-back pool for streaming
//! containers to build on.
//!
//! Nothing in this crate is a container (vector, stack, queue, priority
//! queue) or an algorithm (sort, shuffle) — those are expected to consume
//! the types re-exported here: [`BlockManager`] to get [`Bid`]s,
//! [`ReadWritePool`] to move data, [`Request`] to wait on a transfer.

pub mod allocator;
pub mod block;
pub mod buffer;
pub mod config;
pub mod error;
pub mod io;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod request;
pub mod stats;
mod waitlog;

pub use block::{Bid, TypedBlock};
pub use buffer::{alloc_aligned, AlignedBuf};
pub use config::{BackendKind, Config, DiskConfig};
pub use error::{BlockError, Result};
pub use io::{FileBackend, FileMode};
pub use manager::{BlockManager, StripingStrategy};
pub use pool::ReadWritePool;
pub use queue::{DiskQueue, PriorityPolicy};
pub use request::{Direction, Request, Waiter};
pub use stats::{Stats, StatsSnapshot};

use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "aio")]
use io::aio_backend::AioBackend;
use io::memory_backend::MemoryBackend;
use io::mmap_backend::MmapBackend;
use io::syscall_backend::SyscallBackend;

/// Open the backend named by `cfg.backend` against `cfg.path`, sizing it
/// to `cfg.capacity`. Used by [`open_manager`] to turn a parsed
/// [`Config`] into a live [`BlockManager`].
pub fn open_backend(cfg: &DiskConfig) -> Result<Arc<dyn FileBackend>> {
    let resource_err = |e: std::io::Error| BlockError::Resource(format!("{}: {e}", cfg.path.display()));

    let backend: Arc<dyn FileBackend> = match cfg.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::with_capacity(cfg.capacity as usize)),
        BackendKind::Syscall => {
            let file = SyscallBackend::open(&cfg.path, FileMode::CREAT | FileMode::DIRECT).map_err(resource_err)?;
            file.set_size(cfg.capacity as i64).map_err(resource_err)?;
            Arc::new(file)
        }
        BackendKind::Mmap => {
            let file = MmapBackend::open(&cfg.path, FileMode::CREAT).map_err(resource_err)?;
            file.set_size(cfg.capacity as i64).map_err(resource_err)?;
            Arc::new(file)
        }
        #[cfg(feature = "aio")]
        BackendKind::Aio => {
            let file = AioBackend::open(&cfg.path, FileMode::CREAT | FileMode::DIRECT).map_err(resource_err)?;
            file.set_size(cfg.capacity as i64).map_err(resource_err)?;
            Arc::new(file)
        }
    };
    Ok(backend)
}

/// Build a [`BlockManager`] from a config file at `path` (or resolved via
/// [`Config::resolve_path`] / `BLOCKSTXXL_CONFIG` when `path` is `None`),
/// opening every configured disk's backend and wiring it with the
/// default block size and priority policy.
pub fn open_manager(path: Option<&Path>, block_size: u64) -> Result<BlockManager> {
    let resolved = Config::resolve_path(path);
    let cfg = Config::load(&resolved)?;
    let mut disks = Vec::with_capacity(cfg.disks.len());
    for disk in &cfg.disks {
        let backend = open_backend(disk)?;
        disks.push((backend, disk.capacity, block_size, cfg.priority_policy));
    }
    Ok(BlockManager::new(disks))
}
