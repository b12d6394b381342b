#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Polaris Virtual Memory Manager (VMM)
//!
//! The Polaris Virtual Memory Manager (VMM) provides demand paging for user processes of
//! the Polaris operating system kernel. It provides:
//!
//! - A frame table owning the user frame pool, with second-chance (clock) eviction.
//! - A per-process supplemental page table describing how each page is loaded, with a
//!   reverse index from frames to pages.
//! - A swap store of page-sized slots on a block device.
//! - A fault resolver that loads pages lazily from files, swap or zeros, and grows stacks.
//! - Pinned access to user memory for the kernel.
//!
//! Page tables, block devices and files are consumed through the [`Mmu`], [`BlockDevice`]
//! and [`BackingFile`] traits. The x86_64 backend implements [`Mmu`] over the hardware page
//! tables; the software-emulated backend (used by tests) implements all three on the host.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod block;
mod config;
mod fault;
mod file;
mod frame;
mod mmu;
mod numbers;
mod page;
mod pin;
mod spt;
mod stats;
mod swap;
mod virtual_memory_manager;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use block::{BlockDevice, BlockError};
pub use config::VmConfig;
pub use fault::{Access, FaultError, KILLED_EXIT_STATUS, PageFault};
pub use file::{BackingFile, FileError, FileSegment};
pub use frame::{AllocFlags, FrameTable};
pub use mmu::{MapError, Mmu};
pub use numbers::FrameNumber;
pub use page::{Backing, Page, PageState};
pub use pin::PinGuard;
pub use spt::{SptError, SupplementalPageTable};
pub use stats::VmStats;
pub use swap::{SwapError, SwapSlot, SwapStore};
pub use virtual_memory_manager::VirtualMemoryManager;

pub use arch::{MAX_STACK_SIZE, PAGE_SIZE, USER_TOP};

#[cfg(all(target_arch = "x86_64", not(test), not(feature = "software-emulation")))]
pub use arch::{HardwareMmu, read_page_fault};

#[cfg(any(test, feature = "software-emulation"))]
pub use arch::{EmulatedMemory, MemoryBlockDevice, MemoryFile, PageDirectory, PageEntry, PageFlags};

#[cfg(test)]
mod tests_prop;
