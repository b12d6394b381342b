//! Event counters for paging activity.

use core::sync::atomic::{AtomicUsize, Ordering};

/// A snapshot of the memory manager's event counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VmStats {
    /// Page faults handled, resolved or not.
    pub faults: usize,
    /// Frames reclaimed by the clock.
    pub evictions: usize,
    /// Evicted pages written to swap.
    pub swap_writes: usize,
    /// Pages loaded back from swap.
    pub swap_reads: usize,
    /// Pages loaded from their backing file.
    pub file_reads: usize,
    /// Clean evicted pages dropped without I/O.
    pub discards: usize,
}

/// A monotonically increasing event counter.
#[derive(Default)]
pub(crate) struct Counter(AtomicUsize);

impl Counter {
    pub(crate) const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}
