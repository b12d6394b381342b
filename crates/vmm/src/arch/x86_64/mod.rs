//! x86_64 architecture-specific implementation.
//!
//! This module provides the hardware implementation for x86_64: address validation, the
//! user address-space layout, and an [`Mmu`](crate::Mmu) over the CPU's 4-level page
//! tables.

mod mmu;

pub use mmu::HardwareMmu;

use x86_64::{registers::control::Cr2, structures::idt::PageFaultErrorCode};

use crate::PageFault;

/// Maximum number of bits in a physical address on x86_64.
/// This is typically 52 bits on modern CPUs, but we use 48 as a conservative default.
pub const MAX_PHYSICAL_BITS: usize = 48;

/// Default page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// First address above user space: the lower canonical half belongs to user processes.
pub const USER_TOP: usize = 0x0000_8000_0000_0000;

/// Largest user stack (8 MiB).
pub const MAX_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Frames in the user pool unless configured otherwise (16 MiB).
pub const DEFAULT_USER_FRAMES: usize = 4096;

/// Validates a physical address for x86_64.
///
/// Physical addresses must not exceed the maximum physical address width.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    let max_addr = (1usize << MAX_PHYSICAL_BITS) - 1;
    addr <= max_addr
}

/// Validates a virtual address for x86_64.
///
/// Virtual addresses must be canonical (bits 47-63 must be sign-extended from bit 47).
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    let canonical = if (addr & (1 << 47)) != 0 {
        addr | 0xFFFF_0000_0000_0000
    } else {
        addr & 0x0000_FFFF_FFFF_FFFF
    };
    canonical == addr
}

/// Builds the [`PageFault`] for the exception being handled from CR2 and the error code.
///
/// Must be called from the page fault handler before anything else can fault.
pub fn read_page_fault(code: PageFaultErrorCode) -> PageFault {
    PageFault::from_error_code(Cr2::read_raw() as usize, code.bits())
}
