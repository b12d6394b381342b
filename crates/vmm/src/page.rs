//! Page descriptors stored in the supplemental page table.

use crate::{FileSegment, FrameNumber, SwapSlot, VirtualAddress};

/// Where the contents of a page come from when it is first loaded.
#[derive(Debug, Clone)]
pub enum Backing {
    /// Reserved, but no backing assigned yet. Faulting on it kills the process.
    Unclassified,
    /// Zero-filled on first touch (stack and anonymous memory).
    Zero,
    /// Loaded from a file, with a zero-filled tail.
    File(FileSegment),
}

impl Backing {
    /// Returns true if eviction must preserve the page in swap even when it is clean.
    ///
    /// Zero-backed pages have nothing to reload from. File-backed pages can be read again,
    /// so only dirty ones go to swap.
    pub fn always_swaps(&self) -> bool {
        matches!(self, Self::Zero)
    }
}

/// Where a page currently lives.
///
/// The frame and the swap slot are carried in the variants, so a page can never hold
/// both at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Not in memory; load from the backing on the next fault.
    Unloaded,
    /// Mapped to a frame.
    Resident(FrameNumber),
    /// Evicted to a swap slot.
    Swapped(SwapSlot),
}

/// One virtual page of a process.
#[derive(Debug, Clone)]
pub struct Page {
    /// Page-aligned user address.
    pub addr: VirtualAddress,
    pub backing: Backing,
    pub writable: bool,
    /// Set while the kernel is accessing the page directly; the page cannot be evicted.
    pub pinned: bool,
    pub state: PageState,
    /// Bumped on every state change, so a stale snapshot is detected even if the page
    /// returns to the same state (for example the same swap slot).
    pub(crate) generation: u64,
}

impl Page {
    pub(crate) fn new(addr: VirtualAddress, backing: Backing, writable: bool) -> Self {
        Self {
            addr,
            backing,
            writable,
            pinned: false,
            state: PageState::Unloaded,
            generation: 0,
        }
    }

    /// The frame backing this page, if it is resident.
    pub fn frame(&self) -> Option<FrameNumber> {
        match self.state {
            PageState::Resident(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn is_resident(&self) -> bool {
        self.frame().is_some()
    }
}
