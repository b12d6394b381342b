//! Scoped pinning of user pages for direct kernel access.

use alloc::vec::Vec;
use core::ops::Range;

use crate::{FrameNumber, FrameTable, VirtualAddress, arch::PAGE_SIZE};

/// Keeps a range of user pages resident while the kernel touches them through their frames.
///
/// Returned by [`VirtualMemoryManager::pin_range`](crate::VirtualMemoryManager::pin_range).
/// Every page is unpinned when the guard is dropped.
pub struct PinGuard<'a> {
    frames: &'a FrameTable,
    /// Address space holding the pins.
    owner: usize,
    pages: Vec<(VirtualAddress, FrameNumber)>,
}

impl<'a> PinGuard<'a> {
    pub(crate) fn new(frames: &'a FrameTable, owner: usize) -> Self {
        Self {
            frames,
            owner,
            pages: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, page: VirtualAddress, frame: FrameNumber) {
        self.pages.push((page, frame));
    }

    /// The pinned pages in address order, with their frames.
    pub fn pages(&self) -> &[(VirtualAddress, FrameNumber)] {
        &self.pages
    }

    /// The frame holding the page that contains `addr`, if it is part of this guard.
    pub fn frame(&self, addr: VirtualAddress) -> Option<FrameNumber> {
        let page = addr.page_base();
        self.pages
            .iter()
            .find(|(pinned, _)| *pinned == page)
            .map(|&(_, frame)| frame)
    }

    /// Splits the user range `[start, start + len)` across the pinned pages.
    ///
    /// Yields each page, its frame, the offset of the range within the page and the part of
    /// the range the page holds, relative to `start`.
    pub(crate) fn chunks(
        &self,
        start: VirtualAddress,
        len: usize,
    ) -> impl Iterator<Item = (VirtualAddress, FrameNumber, usize, Range<usize>)> + '_ {
        let start = start.as_usize();
        let end = start + len;
        self.pages.iter().map(move |&(page, frame)| {
            let page_start = page.as_usize();
            let from = start.max(page_start);
            let to = end.min(page_start + PAGE_SIZE);
            (page, frame, from - page_start, from - start..to - start)
        })
    }
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        for (_, frame) in self.pages.drain(..) {
            self.frames.unpin(frame, self.owner);
        }
    }
}
