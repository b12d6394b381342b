//! Page table entry flags for software emulation.

use bitflags::bitflags;

bitflags! {
    /// Flags stored in the low byte of a software page table entry.
    ///
    /// The accessed and dirty bits sit at the same positions as on x86_64 and are set by
    /// [`PageDirectory::access`](super::PageDirectory::access), the emulated CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: usize {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const NO_EXECUTE = 1 << 3;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
    }
}

impl PageFlags {
    /// Flags for a user page mapping.
    pub fn user(writable: bool) -> Self {
        let mut flags = Self::PRESENT | Self::USER;
        flags.set(Self::WRITABLE, writable);
        flags
    }
}
