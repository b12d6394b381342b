//! MMU capability over the hardware page tables.

use x86_64::{
    PhysAddr, VirtAddr,
    structures::paging::{
        FrameAllocator, Mapper, OffsetPageTable, Page, PageTableFlags, PhysFrame, Size4KiB,
        Translate,
        mapper::{MapToError, TranslateResult},
    },
};

use crate::{MapError, Mmu, PhysicalAddress, VirtualAddress};

struct Inner<A> {
    table: OffsetPageTable<'static>,
    allocator: A,
}

/// The page tables of one user process, accessed through the kernel's direct map.
///
/// `A` supplies frames for intermediate page tables; it is separate from the user frame
/// pool. Accessed and dirty bits are the hardware `ACCESSED` and `DIRTY` PTE bits, and every
/// change is flushed from the TLB of the current CPU.
pub struct HardwareMmu<A> {
    inner: spin::Mutex<Inner<A>>,
}

impl<A: FrameAllocator<Size4KiB> + Send> HardwareMmu<A> {
    /// Wraps a process page table.
    ///
    /// # Safety
    ///
    /// `table` must be reachable through `OffsetPageTable`'s direct map for the lifetime of
    /// this value, and must not be modified by anything else while it is in use.
    pub unsafe fn new(table: OffsetPageTable<'static>, allocator: A) -> Self {
        Self {
            inner: spin::Mutex::new(Inner { table, allocator }),
        }
    }

    fn flags(&self, page: VirtualAddress) -> Option<PageTableFlags> {
        let page = to_page(page)?;
        match self.inner.lock().table.translate(page.start_address()) {
            TranslateResult::Mapped { flags, .. } => Some(flags),
            _ => None,
        }
    }

    fn update(&self, page: VirtualAddress, flag: PageTableFlags, value: bool) {
        let Some(page) = to_page(page) else {
            return;
        };
        let mut inner = self.inner.lock();
        let TranslateResult::Mapped { mut flags, .. } =
            inner.table.translate(page.start_address())
        else {
            return;
        };
        flags.set(flag, value);
        // SAFETY: only the accessed and dirty bits of a user leaf entry change.
        if let Ok(flush) = unsafe { inner.table.update_flags(page, flags) } {
            flush.flush();
        }
    }
}

impl<A: FrameAllocator<Size4KiB> + Send> Mmu for HardwareMmu<A> {
    fn install(
        &self,
        page: VirtualAddress,
        frame: PhysicalAddress,
        writable: bool,
    ) -> Result<(), MapError> {
        let page = to_page(page).ok_or(MapError::Unaligned)?;
        let frame = PhysAddr::new(frame.as_usize() as u64);
        let frame =
            PhysFrame::<Size4KiB>::from_start_address(frame).map_err(|_| MapError::Unaligned)?;

        let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
        flags.set(PageTableFlags::WRITABLE, writable);

        let mut inner = self.inner.lock();
        let Inner { table, allocator } = &mut *inner;
        // SAFETY: the frame comes from the user pool and is mapped at no other user page.
        let result = unsafe { table.map_to(page, frame, flags, allocator) };
        match result {
            Ok(flush) => {
                flush.flush();
                Ok(())
            }
            Err(MapToError::PageAlreadyMapped(_)) | Err(MapToError::ParentEntryHugePage) => {
                Err(MapError::AlreadyMapped(VirtualAddress::new(
                    page.start_address().as_u64() as usize,
                )))
            }
            Err(MapToError::FrameAllocationFailed) => Err(MapError::OutOfMemory),
        }
    }

    fn unmap(&self, page: VirtualAddress) -> Option<PhysicalAddress> {
        let page = to_page(page)?;
        let (frame, flush) = self.inner.lock().table.unmap(page).ok()?;
        flush.flush();
        Some(PhysicalAddress::new(frame.start_address().as_u64() as usize))
    }

    fn is_accessed(&self, page: VirtualAddress) -> bool {
        self.flags(page)
            .is_some_and(|flags| flags.contains(PageTableFlags::ACCESSED))
    }

    fn set_accessed(&self, page: VirtualAddress, accessed: bool) {
        self.update(page, PageTableFlags::ACCESSED, accessed);
    }

    fn is_dirty(&self, page: VirtualAddress) -> bool {
        self.flags(page)
            .is_some_and(|flags| flags.contains(PageTableFlags::DIRTY))
    }

    fn set_dirty(&self, page: VirtualAddress, dirty: bool) {
        self.update(page, PageTableFlags::DIRTY, dirty);
    }
}

fn to_page(page: VirtualAddress) -> Option<Page<Size4KiB>> {
    let addr = VirtAddr::try_new(page.as_usize() as u64).ok()?;
    Page::from_start_address(addr).ok()
}
