//! Page table entry for software emulation.

use crate::PhysicalAddress;

use super::flags::PageFlags;

/// A single page table entry for software emulation.
///
/// The entry format:
/// - Bits 0-7: Flags
/// - Bits 8-23: Physical address (16 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    const ADDRESS_SHIFT: usize = 8;
    const ADDRESS_MASK: usize = 0xFFFF << Self::ADDRESS_SHIFT;
    const FLAGS_MASK: usize = 0xFF;

    /// Creates a new page table entry.
    ///
    /// The physical address must be page-aligned (lowest 4 bits must be zero).
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.as_usize() & 0xF == 0,
            "physical address must be page-aligned (16-byte alignment)"
        );
        let addr_bits = (address.as_usize() << Self::ADDRESS_SHIFT) & Self::ADDRESS_MASK;
        Self(addr_bits | (flags.bits() & Self::FLAGS_MASK))
    }

    /// Returns the physical address stored in this entry, or None if it is not present.
    pub fn address(self) -> Option<PhysicalAddress> {
        self.is_present()
            .then(|| PhysicalAddress::new((self.0 & Self::ADDRESS_MASK) >> Self::ADDRESS_SHIFT))
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & Self::FLAGS_MASK)
    }

    /// Sets the flags for this entry, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & Self::ADDRESS_MASK) | (flags.bits() & Self::FLAGS_MASK);
    }

    /// Sets or clears one flag, preserving everything else.
    pub fn update(&mut self, flag: PageFlags, value: bool) {
        let mut flags = self.flags();
        flags.set(flag, value);
        self.set_flags(flags);
    }

    /// Returns whether this entry is present (valid).
    pub fn is_present(self) -> bool {
        self.flags().contains(PageFlags::PRESENT)
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}
