//! Frame numbers.
//!
//! Frame numbers are the handles the frame table and the reverse page index use for
//! physical frames.

use core::{
    fmt,
    ops::{Add, Sub},
};

use crate::{address::PhysicalAddress, arch};

/// A physical memory frame number.
///
/// Frame numbers are zero-indexed and correspond to PAGE_SIZE-aligned physical addresses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FrameNumber(usize);

impl FrameNumber {
    /// Creates a new frame number.
    #[inline]
    pub const fn new(number: usize) -> Self {
        Self(number)
    }

    /// Returns the raw frame number.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * arch::PAGE_SIZE)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<usize> for FrameNumber {
    type Output = Self;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<FrameNumber> for FrameNumber {
    type Output = usize;

    #[inline]
    fn sub(self, rhs: FrameNumber) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        addr.frame_number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_start_address() {
        let frame = FrameNumber::new(3);
        assert_eq!(frame.start().as_usize(), 3 * arch::PAGE_SIZE);
    }

    #[test]
    fn frame_from_unaligned_address() {
        let addr = PhysicalAddress::new(arch::PAGE_SIZE * 5 + 1);
        assert_eq!(FrameNumber::from(addr), FrameNumber::new(5));
    }

    #[test]
    fn frame_offsets_within_pool() {
        let base = FrameNumber::new(10);
        assert_eq!((base + 4) - base, 4);
    }

    #[test]
    fn debug_format() {
        assert_eq!(format!("{:?}", FrameNumber::new(7)), "FrameNumber(7)");
        assert_eq!(format!("{}", FrameNumber::new(7)), "7");
    }
}
