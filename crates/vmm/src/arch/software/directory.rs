//! Emulated page directory: the MMU capability for software emulation.

use alloc::boxed::Box;

use crate::{Access, MapError, Mmu, PageFault, PhysicalAddress, VirtualAddress};

use super::{PAGE_SIZE, PAGE_TABLE_LEVELS, entry::PageEntry, flags::PageFlags, page_index};

/// Number of entries in a software-emulated page table.
const ENTRY_COUNT: usize = 16;

/// One level of the emulated page table tree.
///
/// Intermediate levels own their child tables directly; only level 0 entries carry
/// physical addresses.
struct PageTable {
    entries: [PageEntry; ENTRY_COUNT],
    children: [Option<Box<PageTable>>; ENTRY_COUNT],
}

impl PageTable {
    fn new() -> Self {
        Self {
            entries: [PageEntry::default(); ENTRY_COUNT],
            children: core::array::from_fn(|_| None),
        }
    }
}

/// A per-process page directory for the software-emulated MMU.
///
/// Besides implementing [`Mmu`] for the memory manager, it plays the part of the CPU:
/// [`access`](Self::access) walks the tables the way hardware would, setting the accessed
/// and dirty bits or reporting a [`PageFault`].
pub struct PageDirectory {
    root: spin::Mutex<PageTable>,
}

impl PageDirectory {
    /// Creates a page directory with no mappings.
    pub fn new() -> Self {
        Self {
            root: spin::Mutex::new(PageTable::new()),
        }
    }

    /// Emulates a user-mode memory access to `addr`.
    ///
    /// Returns the translated physical address, or the fault the CPU would raise.
    pub fn access(
        &self,
        addr: VirtualAddress,
        access: Access,
    ) -> Result<PhysicalAddress, PageFault> {
        let mut root = self.root.lock();
        let Some(entry) = walk(&mut root, addr.page_base()) else {
            return Err(PageFault::new(addr.as_usize(), access, false));
        };
        let Some(frame) = entry.address() else {
            return Err(PageFault::new(addr.as_usize(), access, false));
        };
        let flags = entry.flags();
        if access == Access::Write && !flags.contains(PageFlags::WRITABLE) {
            return Err(PageFault::new(addr.as_usize(), access, true));
        }

        entry.update(PageFlags::ACCESSED, true);
        if access == Access::Write {
            entry.update(PageFlags::DIRTY, true);
        }
        Ok(frame + addr.page_offset())
    }

    /// Returns the physical address `addr` maps to without touching any bits.
    pub fn translate(&self, addr: VirtualAddress) -> Option<PhysicalAddress> {
        let mut root = self.root.lock();
        let frame = walk(&mut root, addr.page_base())?.address()?;
        Some(frame + addr.page_offset())
    }

    /// Returns a copy of the leaf entry for `page`, if the walk reaches one.
    pub fn entry(&self, page: VirtualAddress) -> Option<PageEntry> {
        let mut root = self.root.lock();
        walk(&mut root, page.page_base()).map(|entry| *entry)
    }

    fn flag(&self, page: VirtualAddress, flag: PageFlags) -> bool {
        self.entry(page)
            .is_some_and(|entry| entry.is_present() && entry.flags().contains(flag))
    }

    fn set_flag(&self, page: VirtualAddress, flag: PageFlags, value: bool) {
        let mut root = self.root.lock();
        if let Some(entry) = walk(&mut root, page.page_base()).filter(|entry| entry.is_present()) {
            entry.update(flag, value);
        }
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmu for PageDirectory {
    fn install(
        &self,
        page: VirtualAddress,
        frame: PhysicalAddress,
        writable: bool,
    ) -> Result<(), MapError> {
        if !page.is_aligned(PAGE_SIZE) || !frame.is_aligned(PAGE_SIZE) {
            return Err(MapError::Unaligned);
        }

        let mut root = self.root.lock();
        let entry = walk_or_create(&mut root, page);
        if entry.is_present() {
            return Err(MapError::AlreadyMapped(page));
        }
        *entry = PageEntry::new(frame, PageFlags::user(writable));
        Ok(())
    }

    fn unmap(&self, page: VirtualAddress) -> Option<PhysicalAddress> {
        let mut root = self.root.lock();
        let entry = walk(&mut root, page.page_base())?;
        let phys = entry.address()?;
        entry.clear();
        Some(phys)
    }

    fn is_accessed(&self, page: VirtualAddress) -> bool {
        self.flag(page, PageFlags::ACCESSED)
    }

    fn set_accessed(&self, page: VirtualAddress, accessed: bool) {
        self.set_flag(page, PageFlags::ACCESSED, accessed);
    }

    fn is_dirty(&self, page: VirtualAddress) -> bool {
        self.flag(page, PageFlags::DIRTY)
    }

    fn set_dirty(&self, page: VirtualAddress, dirty: bool) {
        self.set_flag(page, PageFlags::DIRTY, dirty);
    }
}

/// Walks the table tree to the level 0 entry for `virt`.
///
/// Returns None if any intermediate table is missing.
fn walk(root: &mut PageTable, virt: VirtualAddress) -> Option<&mut PageEntry> {
    let addr = virt.as_usize();
    let mut table = root;
    for level in (1..PAGE_TABLE_LEVELS).rev() {
        table = table.children[page_index(addr, level)].as_deref_mut()?;
    }
    Some(&mut table.entries[page_index(addr, 0)])
}

/// Walks the table tree, creating intermediate tables as needed.
fn walk_or_create(root: &mut PageTable, virt: VirtualAddress) -> &mut PageEntry {
    let addr = virt.as_usize();
    let mut table = root;
    for level in (1..PAGE_TABLE_LEVELS).rev() {
        let index = page_index(addr, level);
        if table.children[index].is_none() {
            table.entries[index]
                .set_flags(PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER);
        }
        table = &mut **table.children[index].get_or_insert_with(|| Box::new(PageTable::new()));
    }
    &mut table.entries[page_index(addr, 0)]
}
