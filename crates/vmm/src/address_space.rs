//! Address space management.
//!
//! An address space is one process's view of user memory: its supplemental page table and
//! the MMU capability for its page directory. Address spaces are created and destroyed by
//! the [`VirtualMemoryManager`](crate::VirtualMemoryManager), which also resolves their
//! faults.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    Backing, BackingFile, FileSegment, Mmu, Page, SptError, SupplementalPageTable,
    VirtualAddress, arch::PAGE_SIZE,
};

/// A user address space.
pub struct AddressSpace {
    id: usize,
    spt: SupplementalPageTable,
    mmu: Arc<dyn Mmu>,
    /// User stack pointer saved at the last fault or kernel entry, for stack growth checks.
    stack_pointer: AtomicUsize,
}

impl AddressSpace {
    pub(crate) fn new(id: usize, mmu: Arc<dyn Mmu>, stack_pointer: usize) -> Self {
        Self {
            id,
            spt: SupplementalPageTable::new(),
            mmu,
            stack_pointer: AtomicUsize::new(stack_pointer),
        }
    }

    /// Identifier of this address space, unique within its memory manager.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    pub fn mmu(&self) -> &dyn Mmu {
        &*self.mmu
    }

    pub fn stack_pointer(&self) -> usize {
        self.stack_pointer.load(Ordering::Acquire)
    }

    /// Records the user stack pointer, typically on entry to the kernel.
    pub fn set_stack_pointer(&self, stack_pointer: usize) {
        self.stack_pointer.store(stack_pointer, Ordering::Release);
    }

    /// Registers a file-backed segment without loading any of it.
    ///
    /// The segment starts at `upage` and covers `read_bytes` bytes of `file` at `offset`
    /// followed by `zero_bytes` zero bytes. One page is registered per page of the segment,
    /// each reading its share of the file and zero-filling the rest.
    pub fn load_segment(
        &self,
        file: Arc<dyn BackingFile>,
        offset: u64,
        upage: VirtualAddress,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<(), SptError> {
        if !upage.is_aligned(PAGE_SIZE)
            || offset % PAGE_SIZE as u64 != 0
            || (read_bytes + zero_bytes) % PAGE_SIZE != 0
        {
            return Err(SptError::Unaligned(upage));
        }

        let pages = (read_bytes + zero_bytes) / PAGE_SIZE;
        for i in 0..pages {
            let page_read = read_bytes.saturating_sub(i * PAGE_SIZE).min(PAGE_SIZE);
            let segment = FileSegment::new(
                file.clone(),
                offset + (i * PAGE_SIZE) as u64,
                page_read,
            );
            let page = upage + i * PAGE_SIZE;
            if let Err(err) = self.spt.create(page, Backing::File(segment), writable) {
                for registered in 0..i {
                    let _ = self.spt.remove(upage + registered * PAGE_SIZE);
                }
                return Err(err);
            }
        }

        log::debug!(
            "address space {}: registered {} pages at {} ({} file bytes)",
            self.id,
            pages,
            upage,
            read_bytes
        );
        Ok(())
    }

    /// Reserves `addr` without a backing; see [`SupplementalPageTable::classify`].
    pub fn reserve(&self, addr: VirtualAddress, writable: bool) -> Result<Page, SptError> {
        self.spt.create(addr, Backing::Unclassified, writable)
    }
}
