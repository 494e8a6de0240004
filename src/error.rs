use thiserror::Error;

use crate::block::Bid;

/// Unified error taxonomy for the block I/O core (see spec §7).
#[derive(Error, Debug)]
pub enum BlockError {
    /// Any OS-reported I/O failure: short read, `EIO`, `ENOSPC`, misaligned
    /// `O_DIRECT` transfer. Captured inside the originating request and
    /// surfaced at `wait`/`poll`.
    #[error("I/O error on disk {disk} at offset {offset}: {source}")]
    Io {
        disk: usize,
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// Buffer address or byte offset was not a multiple of the required
    /// alignment.
    #[error("unaligned transfer: offset {offset} len {len} (alignment {align})")]
    Alignment { offset: u64, len: usize, align: usize },

    /// The disk allocator could not satisfy a `new_blocks` request with
    /// contiguous extents.
    #[error("disk {disk} out of space: requested {requested} bytes, {free} free")]
    OutOfSpace { disk: usize, requested: u64, free: u64 },

    /// Bad configuration file or an unknown backend name.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unable to spawn a worker thread, open a file, or allocate a buffer.
    #[error("resource error: {0}")]
    Resource(String),

    /// Internal invariant violation, e.g. freeing a block that is still
    /// part of an in-flight request.
    #[error("internal invariant violated: {0}")]
    BugAssert(String),

    /// A BID does not belong to any disk configured in the block manager.
    #[error("block {0:?} does not belong to any configured disk")]
    UnknownBid(Bid),
}

impl BlockError {
    pub fn io(disk: usize, offset: u64, source: std::io::Error) -> Self {
        Self::Io { disk, offset, source }
    }

    pub fn out_of_space(disk: usize, requested: u64, free: u64) -> Self {
        Self::OutOfSpace { disk, requested, free }
    }

    pub fn alignment(offset: u64, len: usize, align: usize) -> Self {
        Self::Alignment { offset, len, align }
    }
}

pub type Result<T> = std::result::Result<T, BlockError>;
