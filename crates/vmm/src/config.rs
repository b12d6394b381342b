//! Memory manager configuration.

use crate::arch;

/// Tunables fixed when the memory manager is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of physical frames in the user pool.
    pub frame_count: usize,
    /// First address above user space. The initial stack page sits just below it.
    pub user_top: usize,
    /// Largest size, in bytes, the stack may grow to below `user_top`.
    pub max_stack_size: usize,
    /// How far below the stack pointer an access still counts as stack growth.
    pub stack_growth_margin: usize,
}

impl VmConfig {
    /// Largest single push on x86 (`PUSHA`).
    pub const STACK_GROWTH_MARGIN: usize = 32;

    /// Creates a configuration with `frame_count` user frames and architecture defaults.
    pub const fn new(frame_count: usize) -> Self {
        Self {
            frame_count,
            user_top: arch::USER_TOP,
            max_stack_size: arch::MAX_STACK_SIZE,
            stack_growth_margin: Self::STACK_GROWTH_MARGIN,
        }
    }

    pub const fn with_max_stack_size(mut self, max_stack_size: usize) -> Self {
        self.max_stack_size = max_stack_size;
        self
    }

    pub const fn with_user_top(mut self, user_top: usize) -> Self {
        self.user_top = user_top;
        self
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new(arch::DEFAULT_USER_FRAMES)
    }
}
