//! Supplemental page table.
//!
//! Each address space keeps one table describing every user page it has registered: where
//! the page's contents come from and where the page currently lives. A secondary index maps
//! the frame of each resident page back to its address, which is how the evictor finds the
//! page that owns a victim frame.
//!
//! The primary map is always locked before the reverse index, and both are updated under
//! the same primary lock so they never disagree.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::{Backing, FrameNumber, MapError, Page, PageState, VirtualAddress, arch::PAGE_SIZE};

/// Errors that can occur when updating a supplemental page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SptError {
    #[error("page {0} is already registered")]
    AlreadyMapped(VirtualAddress),
    #[error("address {0} is not page-aligned")]
    Unaligned(VirtualAddress),
    #[error("address {0} is not a user address")]
    NotUser(VirtualAddress),
    #[error("no page registered at {0}")]
    NotFound(VirtualAddress),
    /// The page still holds a frame or a swap slot.
    #[error("page {0} is still resident or swapped")]
    InUse(VirtualAddress),
    #[error("page {0} already has a backing")]
    AlreadyClassified(VirtualAddress),
}

/// Per-process map from page address to [`Page`], plus the reverse index by frame.
pub struct SupplementalPageTable {
    pages: spin::Mutex<BTreeMap<VirtualAddress, Page>>,
    frames: spin::Mutex<BTreeMap<FrameNumber, VirtualAddress>>,
}

impl SupplementalPageTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            pages: spin::Mutex::new(BTreeMap::new()),
            frames: spin::Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers a new unloaded page at `addr`.
    pub fn create(
        &self,
        addr: VirtualAddress,
        backing: Backing,
        writable: bool,
    ) -> Result<Page, SptError> {
        if !addr.is_aligned(PAGE_SIZE) {
            return Err(SptError::Unaligned(addr));
        }
        if !addr.is_user() {
            return Err(SptError::NotUser(addr));
        }

        let mut pages = self.pages.lock();
        if pages.contains_key(&addr) {
            return Err(SptError::AlreadyMapped(addr));
        }
        let page = Page::new(addr, backing, writable);
        pages.insert(addr, page.clone());
        Ok(page)
    }

    /// Returns a snapshot of the page containing `addr`.
    pub fn lookup(&self, addr: VirtualAddress) -> Option<Page> {
        self.pages.lock().get(&addr.page_base()).cloned()
    }

    /// Returns a snapshot of the resident page backed by `frame`.
    pub fn lookup_by_frame(&self, frame: FrameNumber) -> Option<Page> {
        let pages = self.pages.lock();
        let addr = *self.frames.lock().get(&frame)?;
        pages.get(&addr).cloned()
    }

    /// Unregisters an unloaded page.
    ///
    /// The caller must have released the page's frame or swap slot first.
    pub fn remove(&self, addr: VirtualAddress) -> Result<Page, SptError> {
        let mut pages = self.pages.lock();
        let state = pages
            .get(&addr)
            .map(|page| page.state)
            .ok_or(SptError::NotFound(addr))?;
        if state != PageState::Unloaded {
            return Err(SptError::InUse(addr));
        }
        pages.remove(&addr).ok_or(SptError::NotFound(addr))
    }

    /// Assigns a backing to a page registered as [`Backing::Unclassified`].
    pub fn classify(&self, addr: VirtualAddress, backing: Backing) -> Result<(), SptError> {
        let mut pages = self.pages.lock();
        let page = pages.get_mut(&addr).ok_or(SptError::NotFound(addr))?;
        if !matches!(page.backing, Backing::Unclassified) {
            return Err(SptError::AlreadyClassified(addr));
        }
        page.backing = backing;
        Ok(())
    }

    /// Number of registered pages.
    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }

    /// Every resident page with its frame, from the reverse index.
    pub fn resident_pages(&self) -> Vec<(VirtualAddress, FrameNumber)> {
        let _pages = self.pages.lock();
        self.frames
            .lock()
            .iter()
            .map(|(&frame, &addr)| (addr, frame))
            .collect()
    }

    /// Makes `snapshot`'s page resident in `frame`, if it has not changed since the
    /// snapshot was taken.
    ///
    /// `install` maps the page while the table is locked, so the page cannot change state
    /// between the check and the mapping. Returns false without calling `install` if the
    /// page is gone or has changed.
    pub(crate) fn attach(
        &self,
        snapshot: &Page,
        frame: FrameNumber,
        pinned: bool,
        install: impl FnOnce(&Page) -> Result<(), MapError>,
    ) -> Result<bool, MapError> {
        let mut pages = self.pages.lock();
        let Some(page) = pages
            .get_mut(&snapshot.addr)
            .filter(|page| page.generation == snapshot.generation)
        else {
            return Ok(false);
        };
        install(&*page)?;
        page.state = PageState::Resident(frame);
        page.pinned = pinned;
        page.generation += 1;
        self.frames.lock().insert(frame, snapshot.addr);
        Ok(true)
    }

    /// Returns true if the page at `snapshot.addr` is no longer the one in `snapshot`.
    pub(crate) fn is_stale(&self, snapshot: &Page) -> bool {
        self.pages
            .lock()
            .get(&snapshot.addr)
            .is_none_or(|page| page.generation != snapshot.generation)
    }

    /// Detaches the resident page backed by `frame`.
    ///
    /// `evict` is called with the page while the table is locked and returns the page's new
    /// state. Returns the page address, or None if no page owns `frame`.
    pub(crate) fn detach(
        &self,
        frame: FrameNumber,
        evict: impl FnOnce(&Page) -> PageState,
    ) -> Option<VirtualAddress> {
        let mut pages = self.pages.lock();
        let mut frames = self.frames.lock();
        let addr = *frames.get(&frame)?;
        let page = pages.get_mut(&addr)?;
        debug_assert_eq!(page.state, PageState::Resident(frame));

        let state = evict(&*page);
        page.state = state;
        page.pinned = false;
        page.generation += 1;
        frames.remove(&frame);
        Some(addr)
    }

    /// Address of the page resident in `frame`.
    pub(crate) fn page_of_frame(&self, frame: FrameNumber) -> Option<VirtualAddress> {
        let _pages = self.pages.lock();
        self.frames.lock().get(&frame).copied()
    }

    /// Sets the pinned flag of a resident page and returns its frame.
    pub(crate) fn pin_resident(&self, addr: VirtualAddress) -> Option<FrameNumber> {
        let mut pages = self.pages.lock();
        let page = pages.get_mut(&addr)?;
        let frame = page.frame()?;
        page.pinned = true;
        Some(frame)
    }

    /// Clears the pinned flag of the page resident in `frame`.
    pub(crate) fn unpin_frame(&self, frame: FrameNumber) {
        let mut pages = self.pages.lock();
        let Some(addr) = self.frames.lock().get(&frame).copied() else {
            return;
        };
        if let Some(page) = pages.get_mut(&addr) {
            page.pinned = false;
        }
    }

    /// Unregisters the page at `addr` whatever its state and returns it.
    pub(crate) fn take(&self, addr: VirtualAddress) -> Option<Page> {
        let mut pages = self.pages.lock();
        let page = pages.remove(&addr)?;
        if let PageState::Resident(frame) = page.state {
            self.frames.lock().remove(&frame);
        }
        Some(page)
    }

    /// Unregisters every page and returns them.
    pub(crate) fn drain(&self) -> Vec<Page> {
        let mut pages = self.pages.lock();
        self.frames.lock().clear();
        core::mem::take(&mut *pages).into_values().collect()
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}
