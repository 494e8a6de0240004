//! Platform-specific direct-I/O setup shared by the syscall and aio backends.

use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;
use std::path::Path;

use crate::io::FileMode;

/// Configure direct I/O on an already-open file descriptor.
///
/// - Linux: `O_DIRECT` is set at open time via [`direct_open_flags`]; nothing
///   more to do here.
/// - macOS: no `O_DIRECT` open flag exists; `fcntl(F_NOCACHE)` achieves the
///   same effect of bypassing the page cache.
#[cfg(target_os = "macos")]
pub fn configure_direct_io(fd: RawFd) -> std::io::Result<()> {
    // F_NOCACHE = 48 on macOS.
    let ret = unsafe { libc::fcntl(fd, libc::F_NOCACHE, 1) };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
pub fn configure_direct_io(_fd: RawFd) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn configure_direct_io(_fd: RawFd) -> std::io::Result<()> {
    Ok(())
}

/// Return platform-specific `open()` flags for read/write direct I/O.
#[cfg(target_os = "linux")]
pub fn direct_open_flags() -> libc::c_int {
    libc::O_RDWR | libc::O_DIRECT
}

#[cfg(target_os = "macos")]
pub fn direct_open_flags() -> libc::c_int {
    libc::O_RDWR
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn direct_open_flags() -> libc::c_int {
    libc::O_RDWR
}

/// Open `path` honoring `mode`'s `CREAT`/`RDONLY`/`WRONLY` bits (default
/// `RDWR`), without any particular backend's direct-I/O handling. Shared
/// by the mmap and aio backends, which open their own descriptor rather
/// than borrowing the syscall backend's.
pub fn open_raw_fd(path: &Path, mode: FileMode) -> io::Result<RawFd> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let mut flags = if mode.contains(FileMode::RDONLY) {
        libc::O_RDONLY
    } else if mode.contains(FileMode::WRONLY) {
        libc::O_WRONLY
    } else {
        libc::O_RDWR
    };
    if mode.contains(FileMode::CREAT) {
        flags |= libc::O_CREAT;
    }
    if mode.contains(FileMode::TRUNC) {
        flags |= libc::O_TRUNC;
    }
    let fd = unsafe { libc::open(c_path.as_ptr(), flags, 0o644) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}
