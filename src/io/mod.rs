//! File backends (spec §4.B): one contract, four implementations.
//!
//! Every backend performs its transfer synchronously inside
//! [`FileBackend::serve`], called from the owning disk queue's worker
//! thread (see [`crate::queue`]); the asynchrony visible to callers comes
//! entirely from routing through a queue and a [`crate::request::Request`],
//! not from anything backend-specific.

#[cfg(feature = "aio")]
pub mod aio_backend;
pub mod memory_backend;
pub mod mmap_backend;
pub mod platform;
pub mod syscall_backend;

use crate::request::Direction;

/// Bitset of file open modes (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(u32);

impl FileMode {
    pub const CREAT: FileMode = FileMode(1 << 0);
    pub const RDONLY: FileMode = FileMode(1 << 1);
    pub const WRONLY: FileMode = FileMode(1 << 2);
    pub const RDWR: FileMode = FileMode(1 << 3);
    pub const TRUNC: FileMode = FileMode(1 << 4);
    pub const DIRECT: FileMode = FileMode(1 << 5);
    pub const SYNC: FileMode = FileMode(1 << 6);
    pub const NO_LOCK: FileMode = FileMode(1 << 7);
    pub const NO_ALLOCATOR: FileMode = FileMode(1 << 8);

    pub const fn empty() -> Self {
        FileMode(0)
    }

    pub const fn contains(self, other: FileMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: FileMode) -> Self {
        FileMode(self.0 | other.0)
    }
}

impl std::ops::BitOr for FileMode {
    type Output = FileMode;
    fn bitor(self, rhs: FileMode) -> FileMode {
        self.union(rhs)
    }
}

/// The one contract all four backends implement. `serve` is called
/// synchronously by a disk queue worker thread with a byte slice exactly
/// `bytes` long; backends never see a [`crate::request::Request`] directly.
pub trait FileBackend: Send + Sync {
    /// Current size of the backing store in bytes.
    fn size(&self) -> std::io::Result<i64>;

    /// Extend or truncate the backing store to exactly `new_size` bytes.
    fn set_size(&self, new_size: i64) -> std::io::Result<()>;

    /// Advisory lock; a no-op unless the backend can usefully support it.
    fn lock(&self) -> std::io::Result<()> {
        Ok(())
    }

    /// Short backend name, used by stats/debug output.
    fn io_type(&self) -> &'static str;

    /// Perform one transfer. For `Direction::Read`, fill `buf` from the
    /// backing store at `offset`; for `Direction::Write`, write `buf`'s
    /// contents to the backing store at `offset`. `buf.len()` is the
    /// transfer length.
    fn serve(&self, offset: u64, direction: Direction, buf: &mut [u8]) -> std::io::Result<()>;
}
