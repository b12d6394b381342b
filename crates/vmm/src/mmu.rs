//! The MMU capability consumed by the memory manager.
//!
//! Each address space carries one implementation, backed by that process's page directory.
//! The memory manager never walks page tables itself; it only installs and removes
//! user mappings and reads or clears the per-page accessed and dirty bits.

use crate::{PhysicalAddress, VirtualAddress};

/// Errors reported when installing a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// The page or frame address is not page-aligned.
    #[error("page or frame is not page-aligned")]
    Unaligned,
    /// The page already has a mapping.
    #[error("page {0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    /// An intermediate page table could not be allocated.
    #[error("out of memory for page tables")]
    OutOfMemory,
}

/// Per-address-space access to the hardware (or emulated) page tables.
///
/// All methods take page-aligned virtual addresses of user pages. Queries on a page with no
/// mapping return false, and updates to such a page are ignored.
pub trait Mmu: Send + Sync {
    /// Maps `page` to the frame at `frame` with user access.
    ///
    /// The new mapping starts with clear accessed and dirty bits.
    fn install(
        &self,
        page: VirtualAddress,
        frame: PhysicalAddress,
        writable: bool,
    ) -> Result<(), MapError>;

    /// Removes the mapping for `page`, returning the frame it pointed to.
    fn unmap(&self, page: VirtualAddress) -> Option<PhysicalAddress>;

    /// Returns true if the page has been read or written since the bit was last cleared.
    fn is_accessed(&self, page: VirtualAddress) -> bool;

    fn set_accessed(&self, page: VirtualAddress, accessed: bool);

    /// Clears the accessed bit, giving the page its second chance.
    fn clear_accessed(&self, page: VirtualAddress) {
        self.set_accessed(page, false);
    }

    /// Returns true if the page has been written since it was installed.
    fn is_dirty(&self, page: VirtualAddress) -> bool;

    fn set_dirty(&self, page: VirtualAddress, dirty: bool);
}
