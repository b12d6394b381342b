//! Page faults and the reasons a fault cannot be resolved.

use crate::{FileError, MapError, SptError, SwapError, VirtualAddress};

/// Exit status of a process killed by an unresolvable fault.
pub const KILLED_EXIT_STATUS: i32 = -1;

/// The kind of access that faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// A user page fault as reported by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    address: usize,
    access: Access,
    present: bool,
}

impl PageFault {
    /// Present bit of an x86 page fault error code.
    const ERROR_PRESENT: u64 = 1 << 0;
    /// Write bit of an x86 page fault error code.
    const ERROR_WRITE: u64 = 1 << 1;

    /// Creates a fault at `address`.
    ///
    /// `present` is true when the page was mapped and the fault is a permission violation.
    pub const fn new(address: usize, access: Access, present: bool) -> Self {
        Self {
            address,
            access,
            present,
        }
    }

    /// Decodes an x86 page fault error code.
    pub const fn from_error_code(address: usize, code: u64) -> Self {
        let access = if code & Self::ERROR_WRITE != 0 {
            Access::Write
        } else {
            Access::Read
        };
        Self::new(address, access, code & Self::ERROR_PRESENT != 0)
    }

    /// The faulting address (not page-aligned).
    pub const fn address(&self) -> usize {
        self.address
    }

    pub const fn access(&self) -> Access {
        self.access
    }

    /// Returns true if the page was mapped but the access was not permitted.
    pub const fn is_protection_violation(&self) -> bool {
        self.present
    }
}

/// Why a fault (or a pinned user access) could not be resolved.
///
/// Every variant is fatal to the faulting process only; see [`FaultError::exit_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    /// The address is outside user space.
    #[error("access to non-user address {0:#x}")]
    KernelAddress(usize),
    /// No page is registered at the address and it is not stack growth.
    #[error("no page registered at {0}")]
    Unmapped(VirtualAddress),
    /// A write to a read-only page.
    #[error("write to read-only page {0}")]
    WriteToReadOnly(VirtualAddress),
    /// The access would grow the stack past its maximum size.
    #[error("stack growth to {0} exceeds the stack limit")]
    StackOverflow(VirtualAddress),
    /// The page was reserved but never given a backing.
    #[error("page {0} has no backing")]
    Unclassified(VirtualAddress),
    /// The backing file ended before the page's declared read range.
    #[error("short read loading {page}: {actual} of {expected} bytes")]
    ShortRead {
        page: VirtualAddress,
        expected: usize,
        actual: usize,
    },
    #[error("reading backing file: {0}")]
    File(#[from] FileError),
    #[error("reading swap: {0}")]
    Swap(#[from] SwapError),
    #[error("installing mapping: {0}")]
    Map(#[from] MapError),
    #[error("registering page: {0}")]
    Page(#[from] SptError),
}

impl FaultError {
    /// The exit status the faulting process terminates with.
    pub const fn exit_status(&self) -> i32 {
        KILLED_EXIT_STATUS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_error_code() {
        let fault = PageFault::from_error_code(0x1234, 0b111);
        assert_eq!(fault.address(), 0x1234);
        assert_eq!(fault.access(), Access::Write);
        assert!(fault.is_protection_violation());

        let fault = PageFault::from_error_code(0x1234, 0b100);
        assert_eq!(fault.access(), Access::Read);
        assert!(!fault.is_protection_violation());
    }

    #[test]
    fn every_error_kills_with_minus_one() {
        let page = VirtualAddress::new(0x0100);
        for err in [
            FaultError::KernelAddress(0xFFFF_FFFF_FFFF_8000),
            FaultError::Unmapped(page),
            FaultError::WriteToReadOnly(page),
            FaultError::StackOverflow(page),
            FaultError::Swap(SwapError::Full),
        ] {
            assert_eq!(err.exit_status(), -1);
        }
    }

    #[test]
    fn error_messages_name_the_page() {
        let err = FaultError::WriteToReadOnly(VirtualAddress::new(0x0120));
        assert_eq!(format!("{err}"), "write to read-only page 0x120");
    }
}
