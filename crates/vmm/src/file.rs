//! Files that back lazily loaded pages.

use alloc::sync::Arc;
use core::fmt;

use crate::arch::PAGE_SIZE;

/// Errors reported by a backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FileError {
    /// The offset cannot be represented on this platform.
    #[error("offset {0:#x} is out of range")]
    OffsetOutOfRange(u64),
    /// The underlying filesystem failed the read.
    #[error("file I/O error")]
    Io,
}

/// A read-only view of an open file.
///
/// `read_at` is positioned, so one handle can be shared by every page of a segment without
/// a seek lock.
pub trait BackingFile: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning how many were read.
    ///
    /// Fewer bytes than requested means the end of the file was reached.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, FileError>;

    /// Length of the file in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The part of a file one page is loaded from.
///
/// The first `read_bytes` of the page come from `file` at `offset`; the remaining
/// `zero_bytes` are zero-filled. The two always add up to a page.
#[derive(Clone)]
pub struct FileSegment {
    pub file: Arc<dyn BackingFile>,
    pub offset: u64,
    pub read_bytes: usize,
    pub zero_bytes: usize,
}

impl FileSegment {
    /// Describes a page loaded from `read_bytes` bytes of `file` at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `read_bytes` exceeds the page size.
    pub fn new(file: Arc<dyn BackingFile>, offset: u64, read_bytes: usize) -> Self {
        assert!(read_bytes <= PAGE_SIZE, "segment page reads more than a page");
        Self {
            file,
            offset,
            read_bytes,
            zero_bytes: PAGE_SIZE - read_bytes,
        }
    }
}

impl fmt::Debug for FileSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSegment")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish_non_exhaustive()
    }
}
