//! RAM-backed block device used as an emulated swap partition.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{BlockDevice, BlockError};

/// A block device whose sectors live in host memory.
///
/// Counts reads and writes so tests can tell whether an eviction touched the disk.
pub struct MemoryBlockDevice {
    sector_size: usize,
    data: spin::Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBlockDevice {
    /// Sector size of the emulated disk (a quarter page, so a slot spans several sectors).
    pub const DEFAULT_SECTOR_SIZE: usize = 4;

    /// Creates a zeroed device with `sectors` sectors of `sector_size` bytes.
    pub fn new(sector_size: usize, sectors: usize) -> Self {
        Self {
            sector_size,
            data: spin::Mutex::new(vec![0; sector_size * sectors]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Creates a device large enough for exactly `slots` pages of swap.
    pub fn with_page_slots(slots: usize) -> Self {
        let per_page = super::PAGE_SIZE.div_ceil(Self::DEFAULT_SECTOR_SIZE);
        Self::new(Self::DEFAULT_SECTOR_SIZE, slots * per_page)
    }

    /// Number of sector reads performed so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Acquire)
    }

    /// Number of sector writes performed so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    fn range(&self, sector: u64, len: usize) -> Result<core::ops::Range<usize>, BlockError> {
        if len != self.sector_size {
            return Err(BlockError::BufferSize {
                expected: self.sector_size,
                actual: len,
            });
        }
        if sector >= self.sector_count() {
            return Err(BlockError::OutOfRange(sector));
        }
        let start = sector as usize * self.sector_size;
        Ok(start..start + self.sector_size)
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        (self.data.lock().len() / self.sector_size) as u64
    }

    fn read(&self, sector: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        let range = self.range(sector, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[range]);
        self.reads.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn write(&self, sector: u64, buf: &[u8]) -> Result<(), BlockError> {
        let range = self.range(sector, buf.len())?;
        self.data.lock()[range].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_for_page_slots() {
        let disk = MemoryBlockDevice::with_page_slots(3);
        let per_page = super::super::PAGE_SIZE / MemoryBlockDevice::DEFAULT_SECTOR_SIZE;
        assert_eq!(disk.sector_count(), (3 * per_page) as u64);
    }

    #[test]
    fn write_then_read_sector() {
        let disk = MemoryBlockDevice::new(4, 2);
        disk.write(1, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0; 4];
        disk.read(1, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(disk.writes(), 1);
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn rejects_out_of_range_and_short_buffers() {
        let disk = MemoryBlockDevice::new(4, 2);
        assert_eq!(disk.write(2, &[0; 4]), Err(BlockError::OutOfRange(2)));
        assert_eq!(
            disk.read(0, &mut [0; 3]),
            Err(BlockError::BufferSize {
                expected: 4,
                actual: 3
            })
        );
    }
}
