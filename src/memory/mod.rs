//! # Memory Management
//!
//! Physical frame allocation and the 4-level page table manager.
//!
//! ```text
//!   PageTableManager ──alloc_page()──▶ PageAllocator
//!          │
//!          └──table(frame)/table_mut(frame)──▶ PhysicalMemory
//! ```
//!
//! Frames are never returned to the pool. Intermediate tables created by
//! `map` stay in the hierarchy for the life of the kernel.

pub mod frames;
pub mod paging;

use core::fmt;

pub use frames::{BootFrames, FrameArena, PageAllocator, PhysicalMemory};
pub use paging::{AddressSpace, MapError, PageTableManager, PageWalk};

pub use crate::config::PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The frame pool is exhausted.
    OutOfFrames,
    /// The frame lies outside the memory this accessor can reach.
    FrameOutOfRange,
    /// The frame is inside the pool but has not been handed out yet.
    FrameNotAllocated,
    Misaligned,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::OutOfFrames => write!(f, "out of physical frames"),
            MemoryError::FrameOutOfRange => write!(f, "frame outside addressable memory"),
            MemoryError::FrameNotAllocated => write!(f, "frame has not been allocated"),
            MemoryError::Misaligned => write!(f, "address is not page aligned"),
        }
    }
}

#[inline]
pub(crate) const fn align_up(addr: u64, align: u64) -> u64 {
    (addr + align - 1) & !(align - 1)
}

#[inline]
pub(crate) const fn align_down(addr: u64, align: u64) -> u64 {
    addr & !(align - 1)
}

#[inline]
pub(crate) const fn is_aligned(addr: u64, align: u64) -> bool {
    addr & (align - 1) == 0
}
