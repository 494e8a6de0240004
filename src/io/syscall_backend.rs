//! Syscall backend (spec §4.B.1): `lseek` + `read`/`write` in a loop,
//! serialized by a descriptor mutex. Grounded directly on STXXL's
//! `io/syscall_file.cpp`: a partial transfer that stops making progress
//! (`read`/`write` returning `<= 0` before `bytes` is exhausted) is a hard
//! I/O error, not a short read silently accepted.

use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;
use std::path::Path;
use std::sync::Mutex;

use crate::io::platform::{configure_direct_io, direct_open_flags};
use crate::io::{FileBackend, FileMode};
use crate::request::Direction;

/// A backend over a POSIX file descriptor opened for positioned I/O.
pub struct SyscallBackend {
    /// Serializes `lseek`+`read`/`write` pairs against a single fd, matching
    /// the teacher/original's `fd_mutex`.
    fd: Mutex<RawFd>,
    direct: bool,
}

impl SyscallBackend {
    /// Open `path` honoring `mode`'s `CREAT` and `DIRECT` bits (spec §6);
    /// `DIRECT` requests `O_DIRECT`/`F_NOCACHE` per [`configure_direct_io`].
    pub fn open(path: &Path, mode: FileMode) -> io::Result<Self> {
        let direct = mode.contains(FileMode::DIRECT);
        let c_path = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        let mut flags = if direct { direct_open_flags() } else { libc::O_RDWR };
        if mode.contains(FileMode::CREAT) {
            flags |= libc::O_CREAT;
        }
        let fd = unsafe { libc::open(c_path.as_ptr(), flags, 0o644) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        if direct {
            configure_direct_io(fd)?;
        }
        if !mode.contains(FileMode::NO_LOCK) {
            let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err);
            }
        }
        Ok(Self { fd: Mutex::new(fd), direct })
    }

    /// Wrap an already-open descriptor (used by tests and by callers that
    /// manage the fd's lifetime themselves).
    pub fn from_raw_fd(fd: RawFd, direct: bool) -> Self {
        Self { fd: Mutex::new(fd), direct }
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }
}

impl FileBackend for SyscallBackend {
    fn size(&self) -> io::Result<i64> {
        let fd = *self.fd.lock().unwrap();
        let cur = unsafe { libc::lseek(fd, 0, libc::SEEK_CUR) };
        if cur < 0 {
            return Err(io::Error::last_os_error());
        }
        let end = unsafe { libc::lseek(fd, 0, libc::SEEK_END) };
        if end < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { libc::lseek(fd, cur, libc::SEEK_SET) };
        Ok(end)
    }

    fn set_size(&self, new_size: i64) -> io::Result<()> {
        let fd = *self.fd.lock().unwrap();
        let rc = unsafe { libc::ftruncate(fd, new_size as libc::off_t) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn lock(&self) -> io::Result<()> {
        let fd = *self.fd.lock().unwrap();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn io_type(&self) -> &'static str {
        "syscall"
    }

    fn serve(&self, offset: u64, direction: Direction, buf: &mut [u8]) -> io::Result<()> {
        let fd = self.fd.lock().unwrap();
        let mut pos = offset as libc::off_t;
        let mut remaining = buf.len();
        let mut cursor = 0usize;
        while remaining > 0 {
            if unsafe { libc::lseek(*fd, pos, libc::SEEK_SET) } < 0 {
                return Err(io::Error::last_os_error());
            }
            let rc = match direction {
                Direction::Read => unsafe {
                    libc::read(*fd, buf[cursor..].as_mut_ptr() as *mut libc::c_void, remaining)
                },
                Direction::Write => unsafe {
                    libc::write(*fd, buf[cursor..].as_ptr() as *const libc::c_void, remaining)
                },
            };
            if rc <= 0 {
                return Err(io::Error::last_os_error());
            }
            let rc = rc as usize;
            remaining -= rc;
            cursor += rc;
            pos += rc as libc::off_t;
        }
        Ok(())
    }
}

impl Drop for SyscallBackend {
    fn drop(&mut self) {
        let fd = *self.fd.lock().unwrap();
        unsafe {
            libc::close(fd);
        }
    }
}
