//! Aligned buffer allocation (spec §4.A).
//!
//! `O_DIRECT` transfers require both the buffer address and the byte offset
//! to be a multiple of the device's I/O granularity. [`IO_ALIGN`] is the
//! conservative alignment (page size on every platform this crate targets)
//! that satisfies every backend in [`crate::io`].

use aligned_vec::{AVec, ConstAlign};

/// Alignment required for `O_DIRECT` I/O: covers page size and common block
/// device sector sizes (512 / 4096 bytes).
pub const IO_ALIGN: usize = 4096;

/// An owned, aligned memory region exactly one block in size.
///
/// A buffer is exclusively owned by at most one active [`crate::request::Request`]
/// at a time (spec §3); ownership is handed off between the caller and a
/// [`crate::pool::ReadWritePool`] by move, never by alias.
pub type AlignedBuf = AVec<u8, ConstAlign<IO_ALIGN>>;

/// Allocate a new zeroed aligned buffer of exactly `size` bytes.
pub fn alloc_aligned(size: usize) -> AlignedBuf {
    AVec::from_iter(IO_ALIGN, std::iter::repeat_n(0u8, size))
}

/// True iff `offset` and `len` are both multiples of `align`.
pub fn is_aligned(offset: u64, len: usize, align: usize) -> bool {
    offset % align as u64 == 0 && len % align == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_exact_size_and_zeroed() {
        let buf = alloc_aligned(8192);
        assert_eq!(buf.len(), 8192);
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(buf.as_ptr() as usize % IO_ALIGN, 0);
    }

    #[test]
    fn alignment_check() {
        assert!(is_aligned(4096, 4096, IO_ALIGN));
        assert!(!is_aligned(1, 4096, IO_ALIGN));
        assert!(!is_aligned(4096, 1, IO_ALIGN));
    }
}
