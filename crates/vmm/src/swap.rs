//! Swap store: page-sized slots on a block device.
//!
//! The device is divided into slots of `ceil(PAGE_SIZE / sector_size)` contiguous sectors;
//! slot `i` occupies sectors `[i * spp, (i + 1) * spp)`. A bitmap records which slots hold
//! a swapped-out page. Freeing a slot only clears its bit; the sectors are not erased.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::{BlockDevice, BlockError, arch::PAGE_SIZE};

/// Index of a slot on the swap device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwapSlot({})", self.0)
    }
}

/// Errors that can occur during swap operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SwapError {
    /// Every slot is occupied.
    #[error("swap space exhausted")]
    Full,
    /// The slot is past the end of the swap device, or not occupied.
    #[error("swap slot {0} is not in use")]
    NotInUse(usize),
    /// The buffer is not exactly one page.
    #[error("swap transfers must be exactly one page")]
    PageSize,
    #[error("swap device: {0}")]
    Io(#[from] BlockError),
}

/// Occupancy bitmap, one bit per slot.
struct Bitmap {
    words: Vec<u64>,
    len: usize,
    used: usize,
}

impl Bitmap {
    const BITS: usize = u64::BITS as usize;

    fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(Self::BITS)],
            len,
            used: 0,
        }
    }

    fn is_set(&self, index: usize) -> bool {
        index < self.len && self.words[index / Self::BITS] & (1 << (index % Self::BITS)) != 0
    }

    /// Sets the lowest clear bit and returns its index.
    fn set_first_clear(&mut self) -> Option<usize> {
        let (word_index, word) = self
            .words
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)?;
        let index = word_index * Self::BITS + word.trailing_ones() as usize;
        if index >= self.len {
            return None;
        }
        self.words[word_index] |= 1 << (index % Self::BITS);
        self.used += 1;
        Some(index)
    }

    /// Clears a bit, returning whether it was set.
    fn clear(&mut self, index: usize) -> bool {
        if !self.is_set(index) {
            return false;
        }
        self.words[index / Self::BITS] &= !(1 << (index % Self::BITS));
        self.used -= 1;
        true
    }
}

/// Page-granular storage for evicted pages.
pub struct SwapStore {
    device: Arc<dyn BlockDevice>,
    sector_size: usize,
    sectors_per_slot: usize,
    bitmap: spin::Mutex<Bitmap>,
}

impl SwapStore {
    /// Creates a swap store covering the whole of `device`, with every slot free.
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let sector_size = device.sector_size();
        let sectors_per_slot = PAGE_SIZE.div_ceil(sector_size);
        let slots = (device.sector_count() / sectors_per_slot as u64) as usize;
        log::info!(
            "swap: {} slots ({} sectors of {} bytes each)",
            slots,
            sectors_per_slot,
            sector_size
        );

        Self {
            device,
            sector_size,
            sectors_per_slot,
            bitmap: spin::Mutex::new(Bitmap::new(slots)),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.bitmap.lock().len
    }

    /// Number of occupied slots.
    pub fn used(&self) -> usize {
        self.bitmap.lock().used
    }

    /// Returns true if `slot` currently holds a page.
    pub fn is_occupied(&self, slot: SwapSlot) -> bool {
        self.bitmap.lock().is_set(slot.0)
    }

    /// Writes one page to the lowest free slot and returns the slot.
    ///
    /// The slot is reserved under the bitmap lock and written after the lock is released.
    /// If the device fails, the slot is released again.
    pub fn write(&self, page: &[u8]) -> Result<SwapSlot, SwapError> {
        if page.len() != PAGE_SIZE {
            return Err(SwapError::PageSize);
        }
        let slot = self.bitmap.lock().set_first_clear().ok_or(SwapError::Full)?;

        if let Err(err) = self.write_sectors(slot, page) {
            self.bitmap.lock().clear(slot);
            return Err(err.into());
        }
        Ok(SwapSlot::new(slot))
    }

    /// Reads the page stored in `slot` into `page`. The slot stays occupied.
    pub fn read(&self, slot: SwapSlot, page: &mut [u8]) -> Result<(), SwapError> {
        if page.len() != PAGE_SIZE {
            return Err(SwapError::PageSize);
        }
        if !self.is_occupied(slot) {
            return Err(SwapError::NotInUse(slot.0));
        }
        self.read_sectors(slot.0, page)?;
        Ok(())
    }

    /// Marks `slot` free.
    pub fn free(&self, slot: SwapSlot) {
        if !self.bitmap.lock().clear(slot.0) {
            log::warn!("freeing swap slot {} which is not in use", slot.0);
        }
    }

    fn first_sector(&self, slot: usize) -> u64 {
        (slot * self.sectors_per_slot) as u64
    }

    fn write_sectors(&self, slot: usize, page: &[u8]) -> Result<(), BlockError> {
        let first = self.first_sector(slot);
        for (i, chunk) in page.chunks(self.sector_size).enumerate() {
            let sector = first + i as u64;
            if chunk.len() == self.sector_size {
                self.device.write(sector, chunk)?;
            } else {
                let mut bounce = vec![0; self.sector_size];
                bounce[..chunk.len()].copy_from_slice(chunk);
                self.device.write(sector, &bounce)?;
            }
        }
        Ok(())
    }

    fn read_sectors(&self, slot: usize, page: &mut [u8]) -> Result<(), BlockError> {
        let first = self.first_sector(slot);
        for (i, chunk) in page.chunks_mut(self.sector_size).enumerate() {
            let sector = first + i as u64;
            if chunk.len() == self.sector_size {
                self.device.read(sector, chunk)?;
            } else {
                let mut bounce = vec![0; self.sector_size];
                self.device.read(sector, &mut bounce)?;
                let len = chunk.len();
                chunk.copy_from_slice(&bounce[..len]);
            }
        }
        Ok(())
    }
}
