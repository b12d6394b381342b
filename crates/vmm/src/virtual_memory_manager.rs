//! The virtual memory manager: frame table, swap store and the fault resolver.
//!
//! A fault is resolved in four steps, none of which holds a page table lock while the
//! frame table is called:
//!
//! 1. Look the page up in the faulting address space's supplemental page table, registering
//!    a new zero page if the access is valid stack growth.
//! 2. Obtain a pinned frame from the frame table, evicting another page if necessary.
//! 3. Fill the frame from swap, from the page's file, or with zeros.
//! 4. Map the page and mark it resident in one step under the table lock, then unpin the
//!    frame.
//!
//! If the page changed while it was being loaded (another thread of the process resolved
//! the same fault, or the page was evicted again), the frame is freed and the fault is
//! reported as resolved; the retried access faults again if it still needs to. Changes are
//! detected by the page's generation, so a page evicted back to the same swap slot is
//! still recognized as changed.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    Access, AddressSpace, AddressTranslator, AllocFlags, Backing, BlockDevice, FaultError,
    FrameNumber, FrameTable, Mmu, Page, PageFault, PageState, PinGuard, SptError, SwapStore,
    VirtualAddress, VmConfig, VmStats, arch::PAGE_SIZE, stats::Counter,
};

/// Owns every user frame and the swap store, and resolves faults for its address spaces.
///
/// Create one at kernel initialization and share it by reference; all methods take `&self`.
pub struct VirtualMemoryManager {
    config: VmConfig,
    frames: FrameTable,
    swap: SwapStore,
    next_space_id: AtomicUsize,
    faults: Counter,
    swap_reads: Counter,
    file_reads: Counter,
}

impl VirtualMemoryManager {
    /// Creates a memory manager for `config.frame_count` frames starting at `pool_base`,
    /// swapping to `swap_device`.
    pub fn new(
        config: VmConfig,
        translator: AddressTranslator,
        pool_base: FrameNumber,
        swap_device: Arc<dyn BlockDevice>,
    ) -> Self {
        log::info!(
            "vmm: user space below {:#x}, stack limit {:#x}",
            config.user_top,
            config.max_stack_size
        );

        Self {
            frames: FrameTable::new(pool_base, config.frame_count, translator),
            swap: SwapStore::new(swap_device),
            config,
            next_space_id: AtomicUsize::new(1),
            faults: Counter::new(),
            swap_reads: Counter::new(),
            file_reads: Counter::new(),
        }
    }

    /// Creates a memory manager whose frame pool is emulated host memory.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(config: VmConfig, swap_device: Arc<dyn BlockDevice>) -> Self {
        let translator = AddressTranslator::emulated(config.frame_count * PAGE_SIZE);
        Self::new(config, translator, FrameNumber::new(0), swap_device)
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn frame_table(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap_store(&self) -> &SwapStore {
        &self.swap
    }

    /// Returns a snapshot of the event counters.
    pub fn stats(&self) -> VmStats {
        VmStats {
            faults: self.faults.get(),
            evictions: self.frames.evictions(),
            swap_writes: self.frames.swap_writes(),
            swap_reads: self.swap_reads.get(),
            file_reads: self.file_reads.get(),
            discards: self.frames.discards(),
        }
    }

    /// Creates an empty address space whose mappings are managed through `mmu`.
    pub fn create_address_space(&self, mmu: Arc<dyn Mmu>) -> Arc<AddressSpace> {
        let id = self.next_space_id.fetch_add(1, Ordering::AcqRel);
        log::debug!("created address space {}", id);
        Arc::new(AddressSpace::new(id, mmu, self.config.user_top))
    }

    /// Releases every frame and swap slot held by `space` and empties its page table.
    ///
    /// Resident pages are not written back. Must be called once no thread can fault in
    /// `space` any more, before its page directory is torn down.
    pub fn destroy_address_space(&self, space: &Arc<AddressSpace>) {
        let pages = space.spt().len();
        self.frames.release_space(space, &self.swap);
        log::debug!("destroyed address space {} ({} pages)", space.id(), pages);
    }

    /// Unregisters one page of `space`, releasing its frame or swap slot.
    ///
    /// Fails with [`SptError::InUse`] while the page is pinned by a kernel access.
    pub fn release_page(
        &self,
        space: &Arc<AddressSpace>,
        addr: VirtualAddress,
    ) -> Result<Page, SptError> {
        self.frames.release_page(space, addr.page_base(), &self.swap)
    }

    /// Resolves a user page fault in `space`.
    ///
    /// `stack_pointer` is the user stack pointer at the time of the fault. On error the
    /// process must be terminated with [`FaultError::exit_status`]; other address spaces are
    /// unaffected.
    ///
    /// # Panics
    ///
    /// Panics if a frame is needed and every frame is pinned, or if swap is full when a page
    /// must be written back.
    pub fn handle_fault(
        &self,
        space: &Arc<AddressSpace>,
        fault: PageFault,
        stack_pointer: usize,
    ) -> Result<(), FaultError> {
        self.faults.increment();
        space.set_stack_pointer(stack_pointer);

        let result = if fault.is_protection_violation() {
            Err(self.user_address(fault.address()).map_or_else(
                |err| err,
                |addr| FaultError::WriteToReadOnly(addr.page_base()),
            ))
        } else {
            self.resolve(space, fault.address(), fault.access(), false)
                .map(|_| ())
        };

        if let Err(err) = &result {
            log::warn!(
                "address space {}: unresolvable fault at {:#x}: {}",
                space.id(),
                fault.address(),
                err
            );
        }
        result
    }

    /// Registers the initial stack page just below the top of user space and loads it.
    ///
    /// Returns the initial stack pointer.
    pub fn setup_stack(&self, space: &Arc<AddressSpace>) -> Result<usize, FaultError> {
        let top = self.config.user_top;
        let page = VirtualAddress::new(top - PAGE_SIZE);
        space.spt().create(page, Backing::Zero, true)?;
        space.set_stack_pointer(top);
        self.resolve(space, page.as_usize(), Access::Write, false)?;
        Ok(top)
    }

    /// Faults in and pins every page overlapping `[addr, addr + len)`.
    ///
    /// The pages stay resident until the returned guard is dropped. Faults are resolved as
    /// if the user had made the access, including stack growth below the stack pointer
    /// last recorded for `space`.
    pub fn pin_range(
        &self,
        space: &Arc<AddressSpace>,
        addr: VirtualAddress,
        len: usize,
        access: Access,
    ) -> Result<PinGuard<'_>, FaultError> {
        let mut guard = PinGuard::new(&self.frames, space.id());
        if len == 0 {
            return Ok(guard);
        }
        let end = addr
            .as_usize()
            .checked_add(len)
            .filter(|&end| end <= self.config.user_top)
            .ok_or(FaultError::KernelAddress(addr.as_usize()))?;

        let mut page = addr.page_base().as_usize();
        while page < end {
            let frame = self.pin_page(space, page, access)?;
            guard.push(VirtualAddress::new(page), frame);
            page += PAGE_SIZE;
        }
        Ok(guard)
    }

    /// Copies `src` into user memory at `dst`.
    pub fn copy_to_user(
        &self,
        space: &Arc<AddressSpace>,
        dst: VirtualAddress,
        src: &[u8],
    ) -> Result<(), FaultError> {
        let guard = self.pin_range(space, dst, src.len(), Access::Write)?;
        for (page, frame, offset, range) in guard.chunks(dst, src.len()) {
            let chunk = &src[range];
            // SAFETY: the frame is pinned by `guard` and `offset + chunk.len()` stays within
            // the page.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    chunk.as_ptr(),
                    self.frames.frame_ptr(frame).add(offset),
                    chunk.len(),
                );
            }
            space.mmu().set_accessed(page, true);
            space.mmu().set_dirty(page, true);
        }
        Ok(())
    }

    /// Copies user memory at `src` into `dst`.
    pub fn copy_from_user(
        &self,
        space: &Arc<AddressSpace>,
        src: VirtualAddress,
        dst: &mut [u8],
    ) -> Result<(), FaultError> {
        let guard = self.pin_range(space, src, dst.len(), Access::Read)?;
        for (page, frame, offset, range) in guard.chunks(src, dst.len()) {
            let chunk = &mut dst[range];
            // SAFETY: as in `copy_to_user`.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    self.frames.frame_ptr(frame).add(offset),
                    chunk.as_mut_ptr(),
                    chunk.len(),
                );
            }
            space.mmu().set_accessed(page, true);
        }
        Ok(())
    }

    fn user_address(&self, address: usize) -> Result<VirtualAddress, FaultError> {
        VirtualAddress::try_new(address)
            .filter(|addr| addr.as_usize() < self.config.user_top)
            .ok_or(FaultError::KernelAddress(address))
    }

    fn pin_page(
        &self,
        space: &Arc<AddressSpace>,
        page: usize,
        access: Access,
    ) -> Result<FrameNumber, FaultError> {
        loop {
            if let Some(frame) = self.resolve(space, page, access, true)? {
                return Ok(frame);
            }
        }
    }

    /// Makes the page containing `address` resident.
    ///
    /// Returns the frame, or None if the page changed state underneath us. With `pin`, the
    /// frame is left pinned.
    fn resolve(
        &self,
        space: &Arc<AddressSpace>,
        address: usize,
        access: Access,
        pin: bool,
    ) -> Result<Option<FrameNumber>, FaultError> {
        let addr = self.user_address(address)?;
        let page = match space.spt().lookup(addr) {
            Some(page) => page,
            None => self.grow_stack(space, addr)?,
        };
        if access == Access::Write && !page.writable {
            return Err(FaultError::WriteToReadOnly(page.addr));
        }

        match page.state {
            PageState::Resident(_) if pin => Ok(self.frames.pin_resident(space, page.addr)),
            PageState::Resident(frame) => Ok(Some(frame)),
            PageState::Unloaded | PageState::Swapped(_) => self.load(space, &page, pin),
        }
    }

    /// Registers a zero page for an access just below the stack pointer.
    fn grow_stack(&self, space: &AddressSpace, addr: VirtualAddress) -> Result<Page, FaultError> {
        let page = addr.page_base();
        let stack_pointer = space.stack_pointer();
        if addr.as_usize().saturating_add(self.config.stack_growth_margin) < stack_pointer {
            return Err(FaultError::Unmapped(page));
        }
        if self.config.user_top - page.as_usize() > self.config.max_stack_size {
            return Err(FaultError::StackOverflow(page));
        }

        match space.spt().create(page, Backing::Zero, true) {
            Ok(page) => {
                log::debug!("address space {}: stack grows to {}", space.id(), page.addr);
                Ok(page)
            }
            // Another thread of the process grew the stack first.
            Err(SptError::AlreadyMapped(_)) => {
                space.spt().lookup(page).ok_or(FaultError::Unmapped(page))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Loads a non-resident page into a new frame and maps it.
    fn load(
        &self,
        space: &Arc<AddressSpace>,
        page: &Page,
        pin: bool,
    ) -> Result<Option<FrameNumber>, FaultError> {
        if matches!(page.backing, Backing::Unclassified) {
            return Err(FaultError::Unclassified(page.addr));
        }

        let frame = self.frames.allocate(space, &self.swap, AllocFlags::empty());
        if let Err(err) = self.populate(frame, page) {
            self.frames.free(frame);
            // A concurrent fault may have loaded the page and freed its swap slot first.
            if space.spt().is_stale(page) {
                return Ok(None);
            }
            return Err(err);
        }

        let attached = space.spt().attach(page, frame, pin, |page| {
            space.mmu().install(page.addr, frame.start(), page.writable)
        });
        match attached {
            Ok(true) => {}
            Ok(false) => {
                self.frames.free(frame);
                return Ok(None);
            }
            Err(err) => {
                self.frames.free(frame);
                return Err(err.into());
            }
        }

        if let PageState::Swapped(slot) = page.state {
            self.swap.free(slot);
            // The contents may differ from any file backing, so they must not be discarded.
            space.mmu().set_dirty(page.addr, true);
        }
        if !pin {
            self.frames.unpin(frame, space.id());
        }

        log::debug!(
            "address space {}: {} resident in {} (was {:?})",
            space.id(),
            page.addr,
            frame,
            page.state
        );
        Ok(Some(frame))
    }

    /// Fills `frame` with the contents of `page`.
    fn populate(&self, frame: FrameNumber, page: &Page) -> Result<(), FaultError> {
        // SAFETY: the frame is pinned and not yet mapped, so this load is its only user.
        let bytes =
            unsafe { core::slice::from_raw_parts_mut(self.frames.frame_ptr(frame), PAGE_SIZE) };

        if let PageState::Swapped(slot) = page.state {
            self.swap.read(slot, bytes)?;
            self.swap_reads.increment();
            return Ok(());
        }

        match &page.backing {
            Backing::Zero => bytes.fill(0),
            Backing::File(segment) => {
                let (head, tail) = bytes.split_at_mut(segment.read_bytes);
                if !head.is_empty() {
                    let read = segment.file.read_at(segment.offset, head)?;
                    if read != segment.read_bytes {
                        return Err(FaultError::ShortRead {
                            page: page.addr,
                            expected: segment.read_bytes,
                            actual: read,
                        });
                    }
                    self.file_reads.increment();
                }
                tail.fill(0);
            }
            Backing::Unclassified => return Err(FaultError::Unclassified(page.addr)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBlockDevice, PageDirectory};

    fn setup(frames: usize) -> (VirtualMemoryManager, Arc<PageDirectory>, Arc<AddressSpace>) {
        let disk = Arc::new(MemoryBlockDevice::with_page_slots(4));
        let vm = VirtualMemoryManager::emulated(VmConfig::new(frames), disk);
        let dir = Arc::new(PageDirectory::new());
        let space = vm.create_address_space(dir.clone());
        for addr in [0x1000, 0x1010, 0x1020] {
            space
                .spt()
                .create(VirtualAddress::new(addr), Backing::Zero, true)
                .unwrap();
        }
        (vm, dir, space)
    }

    fn fault(vm: &VirtualMemoryManager, space: &Arc<AddressSpace>, addr: usize) {
        let fault = PageFault::new(addr, Access::Read, false);
        vm.handle_fault(space, fault, space.stack_pointer()).unwrap();
    }

    fn read_byte(vm: &VirtualMemoryManager, space: &Arc<AddressSpace>, addr: usize) -> u8 {
        let mut byte = [0];
        vm.copy_from_user(space, VirtualAddress::new(addr), &mut byte)
            .unwrap();
        byte[0]
    }

    #[test]
    fn loading_a_slot_already_swapped_in_is_a_lost_race() {
        let (vm, dir, space) = setup(2);
        vm.copy_to_user(&space, VirtualAddress::new(0x1000), &[7])
            .unwrap();
        fault(&vm, &space, 0x1010);
        dir.set_accessed(VirtualAddress::new(0x1000), false);
        fault(&vm, &space, 0x1020);
        let stale = space.spt().lookup(VirtualAddress::new(0x1000)).unwrap();
        assert!(matches!(stale.state, PageState::Swapped(_)));

        vm.release_page(&space, VirtualAddress::new(0x1010)).unwrap();
        vm.release_page(&space, VirtualAddress::new(0x1020)).unwrap();
        fault(&vm, &space, 0x1000);
        assert_eq!(vm.swap_store().used(), 0);

        assert_eq!(vm.load(&space, &stale, false), Ok(None));
        assert_eq!(vm.frame_table().free_count(), 1);
        assert_eq!(read_byte(&vm, &space, 0x1000), 7);
    }

    #[test]
    fn page_evicted_back_to_the_same_slot_is_not_attached_twice() {
        let (vm, _dir, space) = setup(1);
        vm.copy_to_user(&space, VirtualAddress::new(0x1000), &[9])
            .unwrap();
        fault(&vm, &space, 0x1010);
        let stale = space.spt().lookup(VirtualAddress::new(0x1000)).unwrap();
        fault(&vm, &space, 0x1000);

        assert_eq!(vm.load(&space, &stale, false), Ok(None));

        let page = space.spt().lookup(VirtualAddress::new(0x1000)).unwrap();
        assert_eq!(page.state, stale.state);
        assert_eq!(vm.frame_table().free_count(), 1);
        assert_eq!(read_byte(&vm, &space, 0x1000), 9);
    }
}
