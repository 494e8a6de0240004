//! mmap backend (spec §4.B.2): map a window, memcpy, unmap. Grounded on
//! STXXL's `io/mmap_file.cpp` — the backend still routes every transfer
//! through the same request machinery as the other backends (the upper
//! layers never know they're talking to the page cache instead of a
//! descriptor).

use std::io;
use std::os::fd::RawFd;
use std::path::Path;
use std::ptr;
use std::sync::Mutex;

use crate::io::platform::open_raw_fd;
use crate::io::{FileBackend, FileMode};
use crate::request::Direction;

pub struct MmapBackend {
    fd: Mutex<RawFd>,
}

impl MmapBackend {
    /// `DIRECT` has no meaning for a page-cache-backed backend and is
    /// ignored; only `CREAT`/`RDONLY`/`WRONLY`/`TRUNC` affect the open
    /// call.
    pub fn open(path: &Path, mode: FileMode) -> io::Result<Self> {
        Ok(Self::from_raw_fd(open_raw_fd(path, mode)?))
    }

    pub fn from_raw_fd(fd: RawFd) -> Self {
        Self { fd: Mutex::new(fd) }
    }
}

impl FileBackend for MmapBackend {
    fn size(&self) -> io::Result<i64> {
        let fd = *self.fd.lock().unwrap();
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(st.st_size as i64)
    }

    fn set_size(&self, new_size: i64) -> io::Result<()> {
        let fd = *self.fd.lock().unwrap();
        if unsafe { libc::ftruncate(fd, new_size as libc::off_t) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn io_type(&self) -> &'static str {
        "mmap"
    }

    fn serve(&self, offset: u64, direction: Direction, buf: &mut [u8]) -> io::Result<()> {
        let fd = *self.fd.lock().unwrap();
        let bytes = buf.len();
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
        let page_off = offset % page_size;
        let map_offset = offset - page_off;
        let map_len = bytes + page_off as usize;

        let prot = match direction {
            Direction::Read => libc::PROT_READ,
            Direction::Write => libc::PROT_WRITE,
        };
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                prot,
                libc::MAP_SHARED,
                fd,
                map_offset as libc::off_t,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let window = unsafe { (mem as *mut u8).add(page_off as usize) };
        match direction {
            Direction::Read => unsafe {
                ptr::copy_nonoverlapping(window, buf.as_mut_ptr(), bytes);
            },
            Direction::Write => unsafe {
                ptr::copy_nonoverlapping(buf.as_ptr(), window, bytes);
            },
        }
        if unsafe { libc::munmap(mem, map_len) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for MmapBackend {
    fn drop(&mut self) {
        let fd = *self.fd.lock().unwrap();
        unsafe {
            libc::close(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn round_trip_through_page_cache() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        std::mem::forget(file);
        let backend = MmapBackend::from_raw_fd(fd);
        backend.set_size(8192).unwrap();

        let mut write_buf = vec![0xABu8; 4096];
        backend.serve(4096, Direction::Write, &mut write_buf).unwrap();

        let mut read_buf = vec![0u8; 4096];
        backend.serve(4096, Direction::Read, &mut read_buf).unwrap();
        assert_eq!(write_buf, read_buf);
    }

    #[test]
    fn unaligned_offset_within_page_still_round_trips() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        std::mem::forget(file);
        let backend = MmapBackend::from_raw_fd(fd);
        backend.set_size(8192).unwrap();

        let mut write_buf = vec![7u8; 1000];
        backend.serve(100, Direction::Write, &mut write_buf).unwrap();
        let mut read_buf = vec![0u8; 1000];
        backend.serve(100, Direction::Read, &mut read_buf).unwrap();
        assert_eq!(write_buf, read_buf);
    }
}
