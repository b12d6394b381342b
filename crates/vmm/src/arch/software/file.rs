//! In-memory files for file-backed pages.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{BackingFile, FileError};

/// A read-only file held in memory.
pub struct MemoryFile {
    data: Vec<u8>,
    reads: AtomicUsize,
}

impl MemoryFile {
    /// Creates a file with the given contents.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            reads: AtomicUsize::new(0),
        }
    }

    /// Number of `read_at` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Acquire)
    }

    /// The file's contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl BackingFile for MemoryFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, FileError> {
        self.reads.fetch_add(1, Ordering::AcqRel);
        let start = usize::try_from(offset).map_err(|_| FileError::OffsetOutOfRange(offset))?;
        let available = self.data.get(start..).unwrap_or_default();
        let len = available.len().min(buf.len());
        buf[..len].copy_from_slice(&available[..len]);
        Ok(len)
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_at_offset() {
        let file = MemoryFile::new(*b"hello world");
        let mut buf = [0; 5];
        assert_eq!(file.read_at(6, &mut buf), Ok(5));
        assert_eq!(&buf, b"world");
        assert_eq!(file.reads(), 1);
    }

    #[test]
    fn short_read_at_end_of_file() {
        let file = MemoryFile::new(*b"abc");
        let mut buf = [0; 8];
        assert_eq!(file.read_at(1, &mut buf), Ok(2));
        assert_eq!(file.read_at(10, &mut buf), Ok(0));
    }
}
