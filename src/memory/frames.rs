//! Physical frame allocation and frame-granular access to page tables.
//!
//! Allocation is a bump cursor: frames are handed out in increasing address
//! order, zeroed, and never come back. Table access is checked against what
//! the allocator knows, so a corrupt entry cannot turn into a wild pointer.

use x86_64::structures::paging::{
    FrameAllocator, FrameDeallocator, PageTable, PhysFrame, Size4KiB,
};
use x86_64::PhysAddr;

use super::{align_down, align_up, is_aligned, MemoryError, PAGE_SIZE};

/// Source of fresh page-table frames, layered over the `x86_64` frame
/// allocator traits.
///
/// Only implement this for allocators whose `deallocate_frame` never hands
/// the frame out again: `free_page` releases without any check.
pub trait PageAllocator: FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB> {
    /// Hand out the next frame, zero-filled.
    fn alloc_page(&mut self) -> Result<PhysFrame, MemoryError> {
        self.allocate_frame().ok_or(MemoryError::OutOfFrames)
    }

    /// Frames are not reclaimed; this exists so callers can state intent.
    fn free_page(&mut self, frame: PhysFrame) {
        unsafe { self.deallocate_frame(frame) }
    }
}

/// Frame-granular view of physical memory holding page tables.
pub trait PhysicalMemory {
    fn table(&self, frame: PhysFrame) -> Result<&PageTable, MemoryError>;
    fn table_mut(&mut self, frame: PhysFrame) -> Result<&mut PageTable, MemoryError>;
}

fn frame_at(addr: u64) -> Result<PhysFrame, MemoryError> {
    let addr = PhysAddr::try_new(addr).map_err(|_| MemoryError::FrameOutOfRange)?;
    PhysFrame::from_start_address(addr).map_err(|_| MemoryError::Misaligned)
}

// ============================================================================
// FRAME ARENA
// ============================================================================

/// `N` frames of simulated physical memory starting at `base`.
///
/// The first `reserved` frames belong to whoever set the arena up (the
/// root table and any bootstrap mappings live there) and are never handed
/// out; the bump cursor starts right after them.
pub struct FrameArena<const N: usize> {
    base: PhysAddr,
    reserved: usize,
    next: usize,
    frames: [PageTable; N],
}

impl<const N: usize> FrameArena<N> {
    pub fn new(base: PhysAddr, reserved: usize) -> Result<Self, MemoryError> {
        if !is_aligned(base.as_u64(), PAGE_SIZE) {
            return Err(MemoryError::Misaligned);
        }
        if reserved > N {
            return Err(MemoryError::FrameOutOfRange);
        }
        Ok(Self {
            base,
            reserved,
            next: reserved,
            frames: core::array::from_fn(|_| PageTable::new()),
        })
    }

    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// Frame at `index`, counting from `base`.
    pub fn frame(&self, index: usize) -> Result<PhysFrame, MemoryError> {
        if index >= N {
            return Err(MemoryError::FrameOutOfRange);
        }
        frame_at(self.base.as_u64() + index as u64 * PAGE_SIZE)
    }

    /// Frames handed out by `alloc_page` so far.
    pub fn allocated(&self) -> usize {
        self.next - self.reserved
    }

    pub fn remaining(&self) -> usize {
        N - self.next
    }

    fn index_of(&self, frame: PhysFrame) -> Result<usize, MemoryError> {
        let addr = frame.start_address().as_u64();
        let offset = addr
            .checked_sub(self.base.as_u64())
            .ok_or(MemoryError::FrameOutOfRange)?;
        let index = (offset / PAGE_SIZE) as usize;
        if index >= N {
            Err(MemoryError::FrameOutOfRange)
        } else if index >= self.next {
            Err(MemoryError::FrameNotAllocated)
        } else {
            Ok(index)
        }
    }
}

unsafe impl<const N: usize> FrameAllocator<Size4KiB> for FrameArena<N> {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        if self.next >= N {
            return None;
        }
        let frame = self.frame(self.next).ok()?;
        self.frames[self.next].zero();
        self.next += 1;
        Some(frame)
    }
}

impl<const N: usize> FrameDeallocator<Size4KiB> for FrameArena<N> {
    unsafe fn deallocate_frame(&mut self, _frame: PhysFrame<Size4KiB>) {}
}

impl<const N: usize> PageAllocator for FrameArena<N> {}

impl<const N: usize> PhysicalMemory for FrameArena<N> {
    fn table(&self, frame: PhysFrame) -> Result<&PageTable, MemoryError> {
        let index = self.index_of(frame)?;
        Ok(&self.frames[index])
    }

    fn table_mut(&mut self, frame: PhysFrame) -> Result<&mut PageTable, MemoryError> {
        let index = self.index_of(frame)?;
        Ok(&mut self.frames[index])
    }
}

// ============================================================================
// BOOT FRAMES
// ============================================================================

/// Frames carved out of real physical memory, reached through the
/// bootloader's physical memory mapping.
///
/// Anything outside `[pool_start, pool_end)` is treated as owned by the
/// bootstrap (the active tables live there); inside the pool only frames
/// already handed out are accessible.
#[derive(Debug)]
pub struct BootFrames {
    physical_memory_offset: u64,
    pool_start: u64,
    next: u64,
    pool_end: u64,
}

impl BootFrames {
    /// # Safety
    ///
    /// All physical memory must be mapped at `physical_memory_offset`, and
    /// nothing else may use the frames in `[pool_start, pool_end)`.
    pub unsafe fn new(physical_memory_offset: u64, pool_start: u64, pool_end: u64) -> Self {
        let pool_start = align_up(pool_start, PAGE_SIZE);
        let pool_end = align_down(pool_end, PAGE_SIZE).max(pool_start);
        Self {
            physical_memory_offset,
            pool_start,
            next: pool_start,
            pool_end,
        }
    }

    pub fn allocated(&self) -> u64 {
        (self.next - self.pool_start) / PAGE_SIZE
    }

    pub fn remaining(&self) -> u64 {
        (self.pool_end - self.next) / PAGE_SIZE
    }

    fn table_ptr(&self, frame: PhysFrame) -> Result<*mut PageTable, MemoryError> {
        let addr = frame.start_address().as_u64();
        if (self.next..self.pool_end).contains(&addr) {
            return Err(MemoryError::FrameNotAllocated);
        }
        let virt = self
            .physical_memory_offset
            .checked_add(addr)
            .ok_or(MemoryError::FrameOutOfRange)?;
        Ok(virt as *mut PageTable)
    }
}

unsafe impl FrameAllocator<Size4KiB> for BootFrames {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        if self.next + PAGE_SIZE > self.pool_end {
            return None;
        }
        let frame = frame_at(self.next).ok()?;
        self.next += PAGE_SIZE;
        let table = self.table_ptr(frame).ok()?;
        unsafe { core::ptr::write_bytes(table, 0, 1) };
        Some(frame)
    }
}

impl FrameDeallocator<Size4KiB> for BootFrames {
    unsafe fn deallocate_frame(&mut self, _frame: PhysFrame<Size4KiB>) {}
}

impl PageAllocator for BootFrames {}

impl PhysicalMemory for BootFrames {
    fn table(&self, frame: PhysFrame) -> Result<&PageTable, MemoryError> {
        let table = self.table_ptr(frame)?;
        Ok(unsafe { &*table })
    }

    fn table_mut(&mut self, frame: PhysFrame) -> Result<&mut PageTable, MemoryError> {
        let table = self.table_ptr(frame)?;
        Ok(unsafe { &mut *table })
    }
}
