//! Frame table: the pool of physical frames assigned to user pages.
//!
//! Every frame in the pool is either free or owned by exactly one address space, whose
//! supplemental page table maps the frame back to the page it holds. When the pool runs dry,
//! [`FrameTable::allocate`] reclaims a frame with the second-chance clock:
//!
//! - Frames are visited in the order they were assigned, starting at the clock hand.
//! - Pinned frames are skipped.
//! - A frame whose page was accessed since the last visit has its accessed bit cleared and
//!   is skipped.
//! - The first frame that is neither pinned nor accessed is the victim.
//!
//! A victim that is dirty or zero-backed is written to swap; a clean file-backed victim is
//! discarded and reloaded from its file on the next fault. Either way it is unmapped and
//! detached from its page before the frame-table lock is released.

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::{
    AddressSpace, AddressTranslator, FrameNumber, Page, PageState, SptError, SwapError,
    SwapStore, VirtualAddress, arch::PAGE_SIZE, stats::Counter,
};

bitflags! {
    /// Constraints on a frame returned by [`FrameTable::allocate`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u8 {
        /// Fill the frame with zeros before returning it.
        const ZERO = 1 << 0;
    }
}

/// Metadata for one frame of the pool.
#[derive(Default)]
struct FrameEntry {
    /// Address space holding the frame, None while the frame is free.
    owner: Option<Arc<AddressSpace>>,
    /// Outstanding pins; the frame is evictable only at zero.
    pins: usize,
    /// The page was released while pinned; the frame is freed at the last unpin.
    released: bool,
}

struct FrameTableState {
    frames: Vec<FrameEntry>,
    /// Free frame indexes; the lowest index is at the end.
    free: Vec<usize>,
    /// Assigned frame indexes in assignment order, the ring the clock hand walks.
    clock: Vec<usize>,
    /// Position in `clock` of the next frame to examine.
    hand: usize,
}

impl FrameTableState {
    fn new(count: usize) -> Self {
        Self {
            frames: (0..count).map(|_| FrameEntry::default()).collect(),
            free: (0..count).rev().collect(),
            clock: Vec::with_capacity(count),
            hand: 0,
        }
    }

    /// Removes `index` from the clock ring, keeping the hand on the same next frame.
    fn remove_from_clock(&mut self, index: usize) {
        let Some(position) = self.clock.iter().position(|&i| i == index) else {
            return;
        };
        self.clock.remove(position);
        if position < self.hand {
            self.hand -= 1;
        }
        if self.hand >= self.clock.len() {
            self.hand = 0;
        }
    }
}

/// Owns the user frame pool and runs the eviction policy.
pub struct FrameTable {
    base: FrameNumber,
    count: usize,
    translator: AddressTranslator,
    state: spin::Mutex<FrameTableState>,
    evictions: Counter,
    swap_writes: Counter,
    discards: Counter,
}

impl FrameTable {
    /// Creates a table managing `count` frames starting at `base`, all free.
    pub fn new(base: FrameNumber, count: usize, translator: AddressTranslator) -> Self {
        log::info!(
            "frame table: {} user frames at {}..{}",
            count,
            base.start(),
            (base + count).start()
        );

        Self {
            base,
            count,
            translator,
            state: spin::Mutex::new(FrameTableState::new(count)),
            evictions: Counter::new(),
            swap_writes: Counter::new(),
            discards: Counter::new(),
        }
    }

    /// Total number of frames in the pool.
    pub fn capacity(&self) -> usize {
        self.count
    }

    /// Number of frames currently assigned to pages.
    pub fn resident_count(&self) -> usize {
        self.state.lock().clock.len()
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn evictions(&self) -> usize {
        self.evictions.get()
    }

    pub fn swap_writes(&self) -> usize {
        self.swap_writes.get()
    }

    pub fn discards(&self) -> usize {
        self.discards.get()
    }

    /// Returns true if `frame` is pinned.
    pub fn is_pinned(&self, frame: FrameNumber) -> bool {
        let index = self.index(frame);
        self.state.lock().frames[index].pins > 0
    }

    /// Identifier of the address space owning `frame`, if it is assigned.
    pub fn owner(&self, frame: FrameNumber) -> Option<usize> {
        let index = self.index(frame);
        self.state.lock().frames[index]
            .owner
            .as_ref()
            .map(|owner| owner.id())
    }

    /// Returns a pointer to the first byte of `frame`.
    ///
    /// The pointer is valid for `PAGE_SIZE` bytes. Callers must hold the frame pinned (or
    /// otherwise own it) while accessing it.
    pub fn frame_ptr(&self, frame: FrameNumber) -> *mut u8 {
        self.translator.phys_to_ptr(frame.start())
    }

    /// Assigns a frame to `owner`, evicting a page if none is free.
    ///
    /// The frame is returned pinned; the caller unpins it once the page using it is mapped
    /// and attached, or frees it if loading fails.
    ///
    /// # Panics
    ///
    /// Panics if every assigned frame is pinned, or if a victim must be written to swap and
    /// swap is full.
    pub fn allocate(
        &self,
        owner: &Arc<AddressSpace>,
        swap: &SwapStore,
        flags: AllocFlags,
    ) -> FrameNumber {
        let mut state = self.state.lock();
        let index = match state.free.pop() {
            Some(index) => index,
            None => self.evict(&mut state, swap),
        };
        state.frames[index] = FrameEntry {
            owner: Some(owner.clone()),
            pins: 1,
            released: false,
        };
        state.clock.push(index);
        drop(state);

        let frame = self.base + index;
        if flags.contains(AllocFlags::ZERO) {
            // SAFETY: the frame is pinned and assigned to the caller, nothing maps it yet.
            unsafe { core::ptr::write_bytes(self.frame_ptr(frame), 0, PAGE_SIZE) };
        }
        frame
    }

    /// Returns `frame` to the pool.
    ///
    /// The caller must already have detached it from any page and unmapped it.
    pub fn free(&self, frame: FrameNumber) {
        let mut state = self.state.lock();
        self.release(&mut state, frame);
    }

    /// Pins the frame of the resident page at `page`, returning it.
    ///
    /// Returns None if the page is not resident.
    pub(crate) fn pin_resident(
        &self,
        space: &AddressSpace,
        page: VirtualAddress,
    ) -> Option<FrameNumber> {
        let mut state = self.state.lock();
        let frame = space.spt().pin_resident(page)?;
        let index = self.index(frame);
        state.frames[index].pins += 1;
        Some(frame)
    }

    /// Drops one pin that address space `owner` holds on `frame`.
    ///
    /// The frame is evictable again once no pins remain. A pin is ignored if `frame` no
    /// longer belongs to `owner`.
    pub(crate) fn unpin(&self, frame: FrameNumber, owner: usize) {
        let mut state = self.state.lock();
        let index = self.index(frame);
        let entry = &mut state.frames[index];
        let owned = entry.owner.as_ref().is_some_and(|space| space.id() == owner);
        if !owned || entry.pins == 0 {
            log::warn!(
                "frame {} unpinned by address space {}, which holds no pin on it",
                frame,
                owner
            );
            return;
        }

        entry.pins -= 1;
        if entry.pins > 0 {
            return;
        }
        if entry.released {
            state.frames[index] = FrameEntry::default();
            state.free.push(index);
            return;
        }
        if let Some(space) = entry.owner.clone() {
            space.spt().unpin_frame(frame);
        }
    }

    /// Unregisters every page of `space`, freeing its frames and swap slots.
    ///
    /// Resident pages are dropped without write-back. A frame still pinned by a kernel
    /// access is freed when its last pin is dropped.
    pub(crate) fn release_space(&self, space: &AddressSpace, swap: &SwapStore) {
        let mut state = self.state.lock();
        for page in space.spt().drain() {
            self.release_page_locked(&mut state, space, page, swap);
        }
    }

    /// Unregisters the page at `addr` of `space`, freeing its frame or swap slot.
    ///
    /// Fails with [`SptError::InUse`] while the page is pinned.
    pub(crate) fn release_page(
        &self,
        space: &AddressSpace,
        addr: VirtualAddress,
        swap: &SwapStore,
    ) -> Result<Page, SptError> {
        let mut state = self.state.lock();
        let page = space.spt().lookup(addr).ok_or(SptError::NotFound(addr))?;
        if page
            .frame()
            .is_some_and(|frame| state.frames[self.index(frame)].pins > 0)
        {
            return Err(SptError::InUse(addr));
        }

        let page = space.spt().take(addr).ok_or(SptError::NotFound(addr))?;
        self.release_page_locked(&mut state, space, page.clone(), swap);
        Ok(page)
    }

    #[cfg(test)]
    pub(crate) fn assigned(&self) -> Vec<(FrameNumber, usize)> {
        let state = self.state.lock();
        state
            .clock
            .iter()
            .filter_map(|&index| {
                let owner = state.frames[index].owner.as_ref()?;
                Some((self.base + index, owner.id()))
            })
            .collect()
    }

    fn index(&self, frame: FrameNumber) -> usize {
        frame
            .as_usize()
            .checked_sub(self.base.as_usize())
            .filter(|&index| index < self.count)
            .unwrap_or_else(|| panic!("frame {} is not in the user pool", frame))
    }

    fn release_page_locked(
        &self,
        state: &mut FrameTableState,
        space: &AddressSpace,
        page: Page,
        swap: &SwapStore,
    ) {
        match page.state {
            PageState::Resident(frame) => {
                space.mmu().unmap(page.addr);
                let index = self.index(frame);
                if state.frames[index].pins > 0 {
                    log::debug!("frame {} released while pinned, freeing at last unpin", frame);
                    state.frames[index].released = true;
                    state.remove_from_clock(index);
                } else {
                    self.release(state, frame);
                }
            }
            PageState::Swapped(slot) => swap.free(slot),
            PageState::Unloaded => {}
        }
    }

    fn release(&self, state: &mut FrameTableState, frame: FrameNumber) {
        let index = self.index(frame);
        let entry = core::mem::take(&mut state.frames[index]);
        if entry.owner.is_none() {
            log::warn!("frame {} freed while not assigned", frame);
            return;
        }
        state.remove_from_clock(index);
        state.free.push(index);
    }

    /// Runs the clock until a frame is reclaimed and returns its index.
    fn evict(&self, state: &mut FrameTableState, swap: &SwapStore) -> usize {
        if state.clock.iter().all(|&index| state.frames[index].pins > 0) {
            log::error!(
                "frame table: all {} frames are pinned, nothing to evict",
                state.clock.len()
            );
            panic!("no evictable frames");
        }

        loop {
            if state.hand >= state.clock.len() {
                state.hand = 0;
            }
            let index = state.clock[state.hand];
            let frame = self.base + index;
            let entry = &state.frames[index];
            let Some(owner) = entry.owner.clone().filter(|_| entry.pins == 0) else {
                state.hand += 1;
                continue;
            };
            let Some(page) = owner.spt().page_of_frame(frame) else {
                state.hand += 1;
                continue;
            };

            if owner.mmu().is_accessed(page) {
                #[cfg(feature = "detailed-logging")]
                log::trace!("clock: {} ({}) gets a second chance", frame, page);
                owner.mmu().clear_accessed(page);
                state.hand += 1;
                continue;
            }

            self.write_back(&owner, frame, swap);
            self.evictions.increment();
            state.frames[index] = FrameEntry::default();
            state.remove_from_clock(index);
            return index;
        }
    }

    /// Unmaps the page in `frame` and saves it to swap if needed.
    fn write_back(&self, owner: &AddressSpace, frame: FrameNumber, swap: &SwapStore) {
        let detached = owner.spt().detach(frame, |page| {
            let dirty = owner.mmu().is_dirty(page.addr);
            owner.mmu().unmap(page.addr);
            if !dirty && !page.backing.always_swaps() {
                #[cfg(feature = "detailed-logging")]
                log::trace!("clock: discarding clean {} from {}", page.addr, frame);
                self.discards.increment();
                return PageState::Unloaded;
            }

            // SAFETY: the page is unmapped and the frame-table lock is held, so nothing
            // else reads or writes the frame.
            let bytes = unsafe { core::slice::from_raw_parts(self.frame_ptr(frame), PAGE_SIZE) };
            match swap.write(bytes) {
                Ok(slot) => {
                    #[cfg(feature = "detailed-logging")]
                    log::trace!("clock: {} from {} to {:?}", page.addr, frame, slot);
                    self.swap_writes.increment();
                    PageState::Swapped(slot)
                }
                Err(SwapError::Full) => {
                    log::error!(
                        "swap full evicting {} of address space {}",
                        page.addr,
                        owner.id()
                    );
                    panic!("swap space exhausted");
                }
                Err(err) => {
                    log::error!("swap write failed evicting {}: {}", page.addr, err);
                    panic!("swap write failed: {}", err);
                }
            }
        });

        if detached.is_none() {
            log::warn!("evicted frame {} had no page attached", frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{MemoryBlockDevice, PageDirectory};
    use crate::{Backing, Mmu};

    struct Fixture {
        table: FrameTable,
        swap: SwapStore,
        dir: Arc<PageDirectory>,
        space: Arc<AddressSpace>,
    }

    fn fixture(frames: usize) -> Fixture {
        let dir = Arc::new(PageDirectory::new());
        Fixture {
            table: FrameTable::new(
                FrameNumber::new(0),
                frames,
                AddressTranslator::emulated(frames * PAGE_SIZE),
            ),
            swap: SwapStore::new(Arc::new(MemoryBlockDevice::with_page_slots(8))),
            space: Arc::new(AddressSpace::new(1, dir.clone(), 0x8000)),
            dir,
        }
    }

    impl Fixture {
        /// Registers and maps a zero page at `addr` the way the fault path does.
        fn map(&self, addr: usize) -> FrameNumber {
            let addr = VirtualAddress::new(addr);
            let snapshot = self.space.spt().create(addr, Backing::Zero, true).unwrap();
            let frame = self.table.allocate(&self.space, &self.swap, AllocFlags::ZERO);
            let attached = self
                .space
                .spt()
                .attach(&snapshot, frame, false, |page| {
                    self.dir.install(page.addr, frame.start(), true)
                })
                .unwrap();
            assert!(attached);
            self.table.unpin(frame, self.space.id());
            frame
        }

        fn state(&self, addr: usize) -> PageState {
            self.space
                .spt()
                .lookup(VirtualAddress::new(addr))
                .unwrap()
                .state
        }
    }

    #[test]
    fn allocates_lowest_frames_first() {
        let fx = fixture(4);
        assert_eq!(fx.map(0x0100), FrameNumber::new(0));
        assert_eq!(fx.map(0x0110), FrameNumber::new(1));
        assert_eq!(fx.table.resident_count(), 2);
        assert_eq!(fx.table.free_count(), 2);
        assert_eq!(fx.table.owner(FrameNumber::new(1)), Some(1));
    }

    #[test]
    fn allocated_frame_is_pinned_until_unpinned() {
        let fx = fixture(2);
        let frame = fx.table.allocate(&fx.space, &fx.swap, AllocFlags::empty());
        assert!(fx.table.is_pinned(frame));
        fx.table.unpin(frame, fx.space.id());
        assert!(!fx.table.is_pinned(frame));
    }

    #[test]
    fn zero_flag_clears_frame() {
        let fx = fixture(1);
        let frame = fx.table.allocate(&fx.space, &fx.swap, AllocFlags::empty());
        unsafe { core::ptr::write_bytes(fx.table.frame_ptr(frame), 0xFF, PAGE_SIZE) };
        fx.table.free(frame);

        let frame = fx.table.allocate(&fx.space, &fx.swap, AllocFlags::ZERO);
        let bytes = unsafe { core::slice::from_raw_parts(fx.table.frame_ptr(frame), PAGE_SIZE) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn free_returns_frame_to_pool() {
        let fx = fixture(2);
        let frame = fx.table.allocate(&fx.space, &fx.swap, AllocFlags::empty());
        fx.table.free(frame);
        assert_eq!(fx.table.free_count(), 2);
        assert_eq!(fx.table.resident_count(), 0);
        assert_eq!(fx.table.owner(frame), None);
    }

    #[test]
    fn clock_skips_accessed_frames_once() {
        let fx = fixture(3);
        fx.map(0x0100);
        fx.map(0x0110);
        fx.map(0x0120);
        fx.dir.set_accessed(VirtualAddress::new(0x0100), true);

        fx.map(0x0130);

        assert_eq!(fx.table.evictions(), 1);
        assert!(matches!(fx.state(0x0110), PageState::Swapped(_)));
        assert!(matches!(fx.state(0x0100), PageState::Resident(_)));
        assert!(!fx.dir.is_accessed(VirtualAddress::new(0x0100)));
    }

    #[test]
    fn full_pass_clears_accessed_bits_then_evicts() {
        let fx = fixture(2);
        fx.map(0x0100);
        fx.map(0x0110);
        fx.dir.set_accessed(VirtualAddress::new(0x0100), true);
        fx.dir.set_accessed(VirtualAddress::new(0x0110), true);

        fx.map(0x0120);

        assert!(matches!(fx.state(0x0100), PageState::Swapped(_)));
        assert!(matches!(fx.state(0x0110), PageState::Resident(_)));
    }

    #[test]
    fn pinned_frames_are_skipped() {
        let fx = fixture(2);
        fx.map(0x0100);
        fx.map(0x0110);
        let pinned = fx
            .table
            .pin_resident(&fx.space, VirtualAddress::new(0x0100))
            .unwrap();

        fx.map(0x0120);

        assert_eq!(fx.state(0x0100), PageState::Resident(pinned));
        assert!(matches!(fx.state(0x0110), PageState::Swapped(_)));
    }

    #[test]
    fn pins_nest() {
        let fx = fixture(2);
        let frame = fx.map(0x0100);
        let page = VirtualAddress::new(0x0100);
        fx.table.pin_resident(&fx.space, page).unwrap();
        fx.table.pin_resident(&fx.space, page).unwrap();

        fx.table.unpin(frame, fx.space.id());
        assert!(fx.table.is_pinned(frame));
        assert!(fx.space.spt().lookup(page).unwrap().pinned);

        fx.table.unpin(frame, fx.space.id());
        assert!(!fx.table.is_pinned(frame));
        assert!(!fx.space.spt().lookup(page).unwrap().pinned);
    }

    #[test]
    #[should_panic(expected = "no evictable frames")]
    fn all_pinned_is_fatal() {
        let fx = fixture(1);
        fx.table.allocate(&fx.space, &fx.swap, AllocFlags::empty());
        fx.table.allocate(&fx.space, &fx.swap, AllocFlags::empty());
    }

    #[test]
    fn victim_is_unmapped_and_detached() {
        let fx = fixture(1);
        let frame = fx.map(0x0100);
        fx.map(0x0110);

        assert_eq!(fx.dir.translate(VirtualAddress::new(0x0100)), None);
        assert_eq!(
            fx.space.spt().lookup_by_frame(frame).unwrap().addr,
            VirtualAddress::new(0x0110)
        );
        assert_eq!(fx.table.resident_count(), 1);
    }

    #[test]
    fn release_space_frees_frames_and_slots() {
        let fx = fixture(1);
        fx.map(0x0100);
        fx.map(0x0110);
        assert_eq!(fx.swap.used(), 1);

        fx.table.release_space(&fx.space, &fx.swap);

        assert_eq!(fx.swap.used(), 0);
        assert_eq!(fx.table.free_count(), 1);
        assert!(fx.space.spt().is_empty());
        assert_eq!(fx.dir.translate(VirtualAddress::new(0x0110)), None);
    }

    #[test]
    fn unpin_by_another_space_is_ignored() {
        let fx = fixture(2);
        let frame = fx.map(0x0100);
        fx.table
            .pin_resident(&fx.space, VirtualAddress::new(0x0100))
            .unwrap();

        fx.table.unpin(frame, fx.space.id() + 1);
        assert!(fx.table.is_pinned(frame));

        fx.table.unpin(frame, fx.space.id());
        fx.table.unpin(frame, fx.space.id());
        assert!(!fx.table.is_pinned(frame));
    }

    #[test]
    fn release_page_refuses_pinned_page() {
        let fx = fixture(1);
        let frame = fx.map(0x0100);
        let page = VirtualAddress::new(0x0100);
        fx.table.pin_resident(&fx.space, page).unwrap();

        assert_eq!(
            fx.table.release_page(&fx.space, page, &fx.swap).unwrap_err(),
            SptError::InUse(page)
        );
        assert_eq!(fx.state(0x0100), PageState::Resident(frame));

        fx.table.unpin(frame, fx.space.id());
        fx.table.release_page(&fx.space, page, &fx.swap).unwrap();
        assert_eq!(fx.table.free_count(), 1);
    }

    #[test]
    fn pinned_frame_is_freed_at_last_unpin_after_release_space() {
        let fx = fixture(1);
        let frame = fx.map(0x0100);
        fx.table
            .pin_resident(&fx.space, VirtualAddress::new(0x0100))
            .unwrap();

        fx.table.release_space(&fx.space, &fx.swap);
        assert_eq!(fx.table.free_count(), 0);
        assert_eq!(fx.table.resident_count(), 0);
        assert_eq!(fx.table.owner(frame), Some(fx.space.id()));

        fx.table.unpin(frame, fx.space.id());
        assert_eq!(fx.table.free_count(), 1);
        assert_eq!(fx.table.owner(frame), None);
    }

    #[test]
    fn hand_survives_removals() {
        let mut state = FrameTableState::new(4);
        state.clock = vec![0, 1, 2, 3];
        state.hand = 2;

        state.remove_from_clock(0);
        assert_eq!(state.clock[state.hand], 2);

        state.remove_from_clock(2);
        assert_eq!(state.clock[state.hand], 3);

        state.remove_from_clock(3);
        assert_eq!(state.hand, 0);
    }
}
