//! Emulated physical memory.

use alloc::boxed::Box;
use core::cell::UnsafeCell;

/// Emulated memory for software simulation.
///
/// Provides the bytes behind emulated physical frames. Access goes through raw pointers
/// exactly like a kernel's direct map; exclusivity is the frame table's business.
pub struct EmulatedMemory {
    memory: Box<[UnsafeCell<u8>]>,
}

// SAFETY: the buffer is only reached through raw pointers handed out by `translate`, and
// the frame table guarantees a frame is written by one party at a time.
unsafe impl Sync for EmulatedMemory {}

impl EmulatedMemory {
    /// Creates a new zeroed emulated memory region of the specified size.
    pub fn new(size: usize) -> Self {
        Self {
            memory: (0..size).map(|_| UnsafeCell::new(0)).collect(),
        }
    }

    /// Translates a physical address to a pointer into the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `phys` is outside the emulated region.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.memory.len(), "physical address out of bounds");
        // SAFETY: `phys` is in bounds, and `UnsafeCell<u8>` has the same layout as `u8`.
        unsafe { UnsafeCell::raw_get(self.memory.as_ptr().add(phys)) }
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.memory.len()
    }
}
