//! In-heap backend (spec §4.B.4): no descriptor, no disk — a growable byte
//! vector standing in for a file. Grounded on STXXL's
//! `include/stxxl/bits/io/mem_file.h`, used there (and here) for tests and
//! for small working sets that fit comfortably in RAM without touching the
//! filesystem at all.

use std::io;
use std::sync::Mutex;

use crate::io::FileBackend;
use crate::request::Direction;

pub struct MemoryBackend {
    data: Mutex<Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self { data: Mutex::new(Vec::new()) }
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self { data: Mutex::new(vec![0u8; bytes]) }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FileBackend for MemoryBackend {
    fn size(&self) -> io::Result<i64> {
        Ok(self.data.lock().unwrap().len() as i64)
    }

    fn set_size(&self, new_size: i64) -> io::Result<()> {
        if new_size < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "negative size"));
        }
        self.data.lock().unwrap().resize(new_size as usize, 0);
        Ok(())
    }

    fn io_type(&self) -> &'static str {
        "memory"
    }

    fn serve(&self, offset: u64, direction: Direction, buf: &mut [u8]) -> io::Result<()> {
        let mut data = self.data.lock().unwrap();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("transfer [{start}, {end}) exceeds backing size {}", data.len()),
            ));
        }
        match direction {
            Direction::Read => buf.copy_from_slice(&data[start..end]),
            Direction::Write => data[start..end].copy_from_slice(buf),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_to_set_size_zero_filled() {
        let backend = MemoryBackend::new();
        backend.set_size(8192).unwrap();
        assert_eq!(backend.size().unwrap(), 8192);
        let mut buf = vec![0xffu8; 4096];
        backend.serve(0, Direction::Read, &mut buf).unwrap();
        assert_eq!(buf, vec![0u8; 4096]);
    }

    #[test]
    fn round_trip_write_then_read() {
        let backend = MemoryBackend::with_capacity(8192);
        let mut write_buf = vec![9u8; 2048];
        backend.serve(2048, Direction::Write, &mut write_buf).unwrap();
        let mut read_buf = vec![0u8; 2048];
        backend.serve(2048, Direction::Read, &mut read_buf).unwrap();
        assert_eq!(write_buf, read_buf);
    }

    #[test]
    fn out_of_bounds_transfer_errors() {
        let backend = MemoryBackend::with_capacity(1024);
        let mut buf = vec![0u8; 4096];
        assert!(backend.serve(0, Direction::Read, &mut buf).is_err());
    }
}
