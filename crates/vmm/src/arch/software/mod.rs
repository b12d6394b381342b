//! Software emulation implementation for testing and development.
//!
//! The software-emulated architecture is a "scale model" of x86_64:
//! - 16-bit addresses (vs 48-bit on x86_64)
//! - 3 levels of page tables (vs 4 on x86_64)
//! - 4-bit indexes (16 entries per table, vs 9-bit/512 entries on x86_64)
//! - 4-bit page offset (16-byte pages, vs 12-bit/4KB on x86_64)
//!
//! Besides the page directory (the MMU capability) it provides the other collaborators
//! the memory manager needs on a host: emulated physical memory, a RAM disk for swap and
//! in-memory files for file-backed pages.

mod directory;
mod disk;
mod entry;
mod file;
mod flags;
mod memory;

pub use directory::PageDirectory;
pub use disk::MemoryBlockDevice;
pub use entry::PageEntry;
pub use file::MemoryFile;
pub use flags::PageFlags;
pub use memory::EmulatedMemory;

/// Page size in bytes (16 bytes = 2^4).
pub const PAGE_SIZE: usize = 16;

/// Number of page table levels (3 levels: level 2, 1, 0).
pub const PAGE_TABLE_LEVELS: usize = 3;

/// First address above user space; the lower half of the 16-bit address space is user.
pub const USER_TOP: usize = 0x8000;

/// Largest user stack (128 pages).
pub const MAX_STACK_SIZE: usize = 0x800;

/// Frames in the user pool unless configured otherwise.
pub const DEFAULT_USER_FRAMES: usize = 64;

/// Returns the page table index for a given virtual address at the specified level.
///
/// - Level 0: Bits 4-7 (page table)
/// - Level 1: Bits 8-11 (page directory)
/// - Level 2: Bits 12-15 (root)
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    assert!(level < PAGE_TABLE_LEVELS, "level out of range for software emulation (0-2)");
    (address >> (4 + level * 4)) & 0xF
}

/// Validates a physical address for software emulation.
///
/// Physical addresses must fit within 16 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr <= 0xFFFF
}

/// Validates a virtual address for software emulation.
///
/// Virtual addresses must be canonical (bits 16-63 must be sign-extended from bit 15).
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    let canonical = if (addr & 0x8000) != 0 {
        addr | 0xFFFF_FFFF_FFFF_0000
    } else {
        addr & 0xFFFF
    };
    canonical == addr
}
