//! POSIX AIO backend (spec §4.B.3): `aio_read`/`aio_write` plus a suspend
//! loop. Grounded on STXXL's `include/stxxl/bits/io/aio_request.h` and
//! `io/aio_file.cpp` — unlike the syscall/mmap backends, the kernel (or
//! glibc's thread-backed emulation of it) does the waiting; `serve` just
//! submits one `aiocb` and blocks on `aio_suspend` until it settles.
//!
//! Only built on platforms exposing `<aio.h>`; gated behind the `aio`
//! feature (see `Cargo.toml`) since not every target libc provides it.

use std::io;
use std::os::fd::RawFd;
use std::path::Path;
use std::ptr;
use std::sync::Mutex;

use crate::io::platform::{configure_direct_io, open_raw_fd};
use crate::io::{FileBackend, FileMode};
use crate::request::Direction;

pub struct AioBackend {
    fd: Mutex<RawFd>,
}

impl AioBackend {
    pub fn open(path: &Path, mode: FileMode) -> io::Result<Self> {
        let fd = open_raw_fd(path, mode)?;
        if mode.contains(FileMode::DIRECT) {
            configure_direct_io(fd)?;
        }
        Ok(Self::from_raw_fd(fd))
    }

    pub fn from_raw_fd(fd: RawFd) -> Self {
        Self { fd: Mutex::new(fd) }
    }
}

impl FileBackend for AioBackend {
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
        "aio"
    }

    fn serve(&self, offset: u64, direction: Direction, buf: &mut [u8]) -> io::Result<()> {
        let fd = *self.fd.lock().unwrap();
        let mut cb: libc::aiocb = unsafe { std::mem::zeroed() };
        cb.aio_fildes = fd;
        cb.aio_offset = offset as libc::off_t;
        cb.aio_buf = buf.as_mut_ptr() as *mut libc::c_void;
        cb.aio_nbytes = buf.len();

        let rc = match direction {
            Direction::Read => unsafe { libc::aio_read(&mut cb) },
            Direction::Write => unsafe { libc::aio_write(&mut cb) },
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        let list: [*mut libc::aiocb; 1] = [&mut cb];
        loop {
            let rc = unsafe { libc::aio_suspend(list.as_ptr(), 1, ptr::null()) };
            if rc == 0 {
                break;
            }
            let errno = io::Error::last_os_error();
            if errno.kind() != io::ErrorKind::Interrupted {
                return Err(errno);
            }
        }

        let err = unsafe { libc::aio_error(&cb) };
        if err != 0 {
            return Err(io::Error::from_raw_os_error(err));
        }
        let transferred = unsafe { libc::aio_return(&mut cb) };
        if transferred < 0 {
            return Err(io::Error::last_os_error());
        }
        if transferred as usize != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("aio transferred {transferred} of {} requested bytes", buf.len()),
            ));
        }
        Ok(())
    }
}

impl Drop for AioBackend {
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
    fn round_trip_write_then_read() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        std::mem::forget(file);
        let backend = AioBackend::from_raw_fd(fd);
        backend.set_size(4096).unwrap();

        let mut write_buf = vec![0u8; 4096];
        for (i, b) in write_buf.iter_mut().enumerate() {
            *b = (i % 200) as u8;
        }
        backend.serve(0, Direction::Write, &mut write_buf).unwrap();

        let mut read_buf = vec![0u8; 4096];
        backend.serve(0, Direction::Read, &mut read_buf).unwrap();
        assert_eq!(write_buf, read_buf);
    }
}
