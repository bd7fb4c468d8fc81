//! Compile-time kernel configuration.

use crate::interrupts::pic::{INITIAL_MASTER_MASK, INITIAL_SLAVE_MASK};

pub const PAGE_SIZE: u64 = 4096;

/// Everything below this virtual address is mapped by the bootstrap code
/// before the kernel runs.
pub const BOOTSTRAP_MAPPED_END: u64 = 0x40_0000;

/// Default frame pool: 4 MiB up to 8 MiB of physical memory.
pub const FRAME_POOL_START: u64 = BOOTSTRAP_MAPPED_END;
pub const FRAME_POOL_END: u64 = 0x80_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// `map` is a no-op below this address.
    pub bootstrap_mapped_end: u64,
    pub frame_pool_start: u64,
    pub frame_pool_end: u64,
    /// Virtual address at which physical memory is mapped (0 = identity).
    pub physical_memory_offset: u64,
    pub master_mask: u8,
    pub slave_mask: u8,
}

impl KernelConfig {
    pub const DEFAULT: Self = Self {
        bootstrap_mapped_end: BOOTSTRAP_MAPPED_END,
        frame_pool_start: FRAME_POOL_START,
        frame_pool_end: FRAME_POOL_END,
        physical_memory_offset: 0,
        master_mask: INITIAL_MASTER_MASK,
        slave_mask: INITIAL_SLAVE_MASK,
    };

    pub const fn with_frame_pool(mut self, start: u64, end: u64) -> Self {
        self.frame_pool_start = start;
        self.frame_pool_end = end;
        self
    }

    pub const fn with_physical_memory_offset(mut self, offset: u64) -> Self {
        self.physical_memory_offset = offset;
        self
    }

    pub const fn frame_pool_len(&self) -> u64 {
        self.frame_pool_end.saturating_sub(self.frame_pool_start)
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
