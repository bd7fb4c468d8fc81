//! # Page Table Manager
//!
//! Walks and extends the 4-level x86_64 translation tree rooted at the
//! active CR3 frame.
//!
//! ```text
//!  63      48 47    39 38    30 29    21 20    12 11       0
//! ┌──────────┬────────┬────────┬────────┬────────┬──────────┐
//! │ sign ext │  L4    │  L3    │  L2    │  L1    │  offset  │
//! └──────────┴────────┴────────┴────────┴────────┴──────────┘
//! ```
//!
//! Intermediate tables are allocated on demand with `PRESENT | WRITABLE`
//! (plus `USER_ACCESSIBLE` for user leaves) and are never freed. A huge-page
//! leaf at L3 (1 GiB) or L2 (2 MiB) is never descended into or overwritten.
//! Addresses below the bootstrap limit are already mapped and `map` leaves
//! them alone.

mod walk;

use core::fmt;

use log::{trace, warn};
use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::{PageTableFlags, PageTableIndex, PhysFrame};
use x86_64::{PhysAddr, VirtAddr};

use super::frames::{PageAllocator, PhysicalMemory};
use super::{is_aligned, MemoryError, PAGE_SIZE};

pub use walk::{PageWalk, WalkStep};

const HUGE_1GIB_MASK: u64 = (1 << 30) - 1;
const HUGE_2MIB_MASK: u64 = (1 << 21) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// An L3 or L2 entry on the path is a huge-page leaf.
    ParentEntryHugePage,
    /// The physical address is not page aligned.
    Misaligned,
    FrameAllocation(MemoryError),
}

impl From<MemoryError> for MapError {
    fn from(err: MemoryError) -> Self {
        MapError::FrameAllocation(err)
    }
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::ParentEntryHugePage => write!(f, "parent entry is a huge page"),
            MapError::Misaligned => write!(f, "physical address is not page aligned"),
            MapError::FrameAllocation(err) => write!(f, "page table frame: {}", err),
        }
    }
}

/// Read-only view of an address space, handed to interrupt handlers.
pub trait AddressSpace {
    fn is_mapped(&self, virt: VirtAddr) -> bool;
    fn translate(&self, virt: VirtAddr) -> Option<PhysAddr>;
    fn walk(&self, virt: VirtAddr) -> PageWalk;
}

enum Descent {
    Absent,
    Table(PhysFrame),
    HugePage(PhysAddr),
}

enum Resolved {
    Absent,
    Huge { level: u8, base: PhysAddr },
    Leaf(PhysFrame),
}

pub struct PageTableManager<F> {
    frames: F,
    root: PhysFrame,
    bootstrap_end: u64,
}

impl<F> PageTableManager<F> {
    /// Manage the hierarchy rooted at `root`. The root itself is never
    /// allocated here.
    pub fn new(frames: F, root: PhysFrame, bootstrap_end: u64) -> Self {
        Self {
            frames,
            root,
            bootstrap_end,
        }
    }

    pub fn root(&self) -> PhysFrame {
        self.root
    }

    pub fn bootstrap_end(&self) -> u64 {
        self.bootstrap_end
    }

    pub fn frames(&self) -> &F {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut F {
        &mut self.frames
    }
}

impl<F: PhysicalMemory> PageTableManager<F> {
    fn entry(&self, table: PhysFrame, index: PageTableIndex) -> Result<&PageTableEntry, MemoryError> {
        Ok(&self.frames.table(table)?[index])
    }

    fn descend(&self, table: PhysFrame, index: PageTableIndex, level: u8) -> Result<Descent, MemoryError> {
        let entry = self.entry(table, index)?;
        let flags = entry.flags();
        if !flags.contains(PageTableFlags::PRESENT) {
            Ok(Descent::Absent)
        } else if level < 4 && flags.contains(PageTableFlags::HUGE_PAGE) {
            Ok(Descent::HugePage(entry.addr()))
        } else {
            Ok(Descent::Table(PhysFrame::containing_address(entry.addr())))
        }
    }

    /// Walk down to the L1 table covering `virt`.
    fn resolve(&self, virt: VirtAddr) -> Result<Resolved, MemoryError> {
        let mut table = self.root;
        for (level, index) in [(4, virt.p4_index()), (3, virt.p3_index()), (2, virt.p2_index())] {
            match self.descend(table, index, level)? {
                Descent::Absent => return Ok(Resolved::Absent),
                Descent::HugePage(base) => return Ok(Resolved::Huge { level, base }),
                Descent::Table(next) => table = next,
            }
        }
        Ok(Resolved::Leaf(table))
    }

    fn resolve_or_warn(&self, virt: VirtAddr) -> Resolved {
        match self.resolve(virt) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!("page walk for {:#x} failed: {}", virt.as_u64(), err);
                Resolved::Absent
            }
        }
    }

    /// True if `virt` is covered by a present L1 entry or a huge-page leaf.
    pub fn is_mapped(&self, virt: VirtAddr) -> bool {
        match self.resolve_or_warn(virt) {
            Resolved::Absent => false,
            Resolved::Huge { .. } => true,
            Resolved::Leaf(table) => self
                .entry(table, virt.p1_index())
                .map(|entry| entry.flags().contains(PageTableFlags::PRESENT))
                .unwrap_or(false),
        }
    }

    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let addr = virt.as_u64();
        match self.resolve_or_warn(virt) {
            Resolved::Absent => None,
            // Bit 12 of a huge leaf is PAT, not address.
            Resolved::Huge { level: 3, base } => {
                Some(base.align_down(HUGE_1GIB_MASK + 1) + (addr & HUGE_1GIB_MASK))
            }
            Resolved::Huge { base, .. } => {
                Some(base.align_down(HUGE_2MIB_MASK + 1) + (addr & HUGE_2MIB_MASK))
            }
            Resolved::Leaf(table) => {
                let entry = self.entry(table, virt.p1_index()).ok()?;
                if entry.flags().contains(PageTableFlags::PRESENT) {
                    Some(entry.addr() + u64::from(virt.page_offset()))
                } else {
                    None
                }
            }
        }
    }

    pub fn walk(&self, virt: VirtAddr) -> PageWalk {
        let mut walk = PageWalk::new(virt);
        let mut table = self.root;
        let indices = [virt.p4_index(), virt.p3_index(), virt.p2_index(), virt.p1_index()];
        for (level, index) in (1..=4u8).rev().zip(indices) {
            let entry = match self.entry(table, index) {
                Ok(entry) => entry,
                Err(err) => {
                    walk.error = Some(err);
                    break;
                }
            };
            let step = WalkStep {
                level,
                index: u16::from(index),
                addr: entry.addr(),
                flags: entry.flags(),
            };
            walk.push(step);
            let huge = level < 4 && step.flags.contains(PageTableFlags::HUGE_PAGE);
            if !step.is_present() || huge || level == 1 {
                break;
            }
            table = PhysFrame::containing_address(step.addr);
        }
        walk
    }
}

impl<F: PageAllocator + PhysicalMemory> PageTableManager<F> {
    /// Map the page containing `virt` to `phys` with `flags`.
    ///
    /// Addresses below the bootstrap limit are left untouched. Missing
    /// intermediate tables are allocated; if a huge page covers `virt`
    /// nothing is modified.
    pub fn map(&mut self, phys: PhysAddr, virt: VirtAddr, flags: PageTableFlags) -> Result<(), MapError> {
        if virt.as_u64() < self.bootstrap_end {
            trace!("map {:#x}: inside bootstrap region, skipped", virt.as_u64());
            return Ok(());
        }
        if !is_aligned(phys.as_u64(), PAGE_SIZE) {
            return Err(MapError::Misaligned);
        }
        if let Resolved::Huge { level, .. } = self.resolve(virt)? {
            warn!("map {:#x}: covered by an L{} huge page", virt.as_u64(), level);
            return Err(MapError::ParentEntryHugePage);
        }

        let user = flags.contains(PageTableFlags::USER_ACCESSIBLE);
        let l3 = self.next_table_create(self.root, virt.p4_index(), user)?;
        let l2 = self.next_table_create(l3, virt.p3_index(), user)?;
        let l1 = self.next_table_create(l2, virt.p2_index(), user)?;
        self.frames.table_mut(l1)?[virt.p1_index()].set_addr(phys, flags);

        trace!("map {:#x} -> {:#x} ({:?})", virt.as_u64(), phys.as_u64(), flags);
        Ok(())
    }

    fn next_table_create(&mut self, table: PhysFrame, index: PageTableIndex, user: bool) -> Result<PhysFrame, MapError> {
        let (flags, addr) = {
            let entry = self.entry(table, index)?;
            (entry.flags(), entry.addr())
        };
        if flags.contains(PageTableFlags::PRESENT) {
            if flags.contains(PageTableFlags::HUGE_PAGE) {
                return Err(MapError::ParentEntryHugePage);
            }
            return Ok(PhysFrame::containing_address(addr));
        }

        let frame = self.frames.alloc_page()?;
        let mut parent_flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        if user {
            parent_flags |= PageTableFlags::USER_ACCESSIBLE;
        }
        self.frames.table_mut(table)?[index].set_addr(frame.start_address(), parent_flags);
        Ok(frame)
    }

    /// Clear the L1 entry for `virt` and return the frame address it held.
    ///
    /// Huge pages and intermediate tables are left in place; nothing is
    /// freed.
    pub fn unmap(&mut self, virt: VirtAddr) -> Option<PhysAddr> {
        let table = match self.resolve_or_warn(virt) {
            Resolved::Leaf(table) => table,
            Resolved::Huge { .. } | Resolved::Absent => return None,
        };
        let entry = &mut self.frames.table_mut(table).ok()?[virt.p1_index()];
        let previous = entry
            .flags()
            .contains(PageTableFlags::PRESENT)
            .then(|| entry.addr());
        entry.set_unused();
        previous
    }
}

impl<F: PhysicalMemory> AddressSpace for PageTableManager<F> {
    fn is_mapped(&self, virt: VirtAddr) -> bool {
        PageTableManager::is_mapped(self, virt)
    }

    fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        PageTableManager::translate(self, virt)
    }

    fn walk(&self, virt: VirtAddr) -> PageWalk {
        PageTableManager::walk(self, virt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BOOTSTRAP_MAPPED_END;
    use crate::memory::FrameArena;
    use x86_64::structures::paging::PageTable;

    const PRESENT: PageTableFlags = PageTableFlags::PRESENT;
    const WRITABLE: PageTableFlags = PageTableFlags::WRITABLE;
    const HUGE: PageTableFlags = PageTableFlags::HUGE_PAGE;

    type Arena = FrameArena<12>;

    /// Root at frame 0, plus a bootstrap L3/L2 identity-mapping the first
    /// 4 MiB with two 2 MiB pages, and a 2 MiB page at 0x600000.
    fn bootstrapped() -> PageTableManager<Arena> {
        let mut arena = Arena::new(PhysAddr::new(0x3F_D000), 3).unwrap();
        let root = arena.frame(0).unwrap();
        let l3 = arena.frame(1).unwrap();
        let l2 = arena.frame(2).unwrap();
        arena.table_mut(root).unwrap()[0].set_addr(l3.start_address(), PRESENT | WRITABLE);
        arena.table_mut(l3).unwrap()[0].set_addr(l2.start_address(), PRESENT | WRITABLE);
        let bootstrap = arena.table_mut(l2).unwrap();
        bootstrap[0].set_addr(PhysAddr::new(0), PRESENT | WRITABLE | HUGE);
        bootstrap[1].set_addr(PhysAddr::new(0x20_0000), PRESENT | WRITABLE | HUGE);
        bootstrap[3].set_addr(PhysAddr::new(0x60_0000), PRESENT | WRITABLE | HUGE);
        PageTableManager::new(arena, root, BOOTSTRAP_MAPPED_END)
    }

    /// A bare root and nothing else.
    fn empty() -> PageTableManager<Arena> {
        let arena = Arena::new(PhysAddr::new(0x3F_F000), 1).unwrap();
        let root = arena.frame(0).unwrap();
        PageTableManager::new(arena, root, BOOTSTRAP_MAPPED_END)
    }

    fn raw(table: &PageTable) -> [u64; 512] {
        unsafe { core::mem::transmute_copy(table) }
    }

    fn snapshot(manager: &PageTableManager<Arena>, frames: usize) -> Vec<[u64; 512]> {
        (0..frames)
            .map(|i| raw(manager.frames().table(manager.frames().frame(i).unwrap()).unwrap()))
            .collect()
    }

    #[test]
    fn test_map_on_empty_root_uses_three_frames() {
        let mut pt = empty();
        let addr = 0x50_0000;
        pt.map(PhysAddr::new(addr), VirtAddr::new(addr), PRESENT | WRITABLE).unwrap();

        assert_eq!(pt.frames().allocated(), 3);
        assert!(pt.is_mapped(VirtAddr::new(addr)));
        assert_eq!(pt.translate(VirtAddr::new(addr + 0x123)), Some(PhysAddr::new(addr + 0x123)));
    }

    #[test]
    fn test_map_does_not_leak_into_neighbours() {
        let mut pt = empty();
        pt.map(PhysAddr::new(0x80_0000), VirtAddr::new(0x50_0000), PRESENT).unwrap();

        assert!(!pt.is_mapped(VirtAddr::new(0x50_1000)));
        assert!(!pt.is_mapped(VirtAddr::new(0x4F_F000)));
        assert!(!pt.is_mapped(VirtAddr::new(0x8000_0000)));
        assert!(!pt.is_mapped(VirtAddr::new(0xFFFF_8000_0050_0000)));
    }

    #[test]
    fn test_second_map_in_same_table_reuses_intermediates() {
        let mut pt = empty();
        pt.map(PhysAddr::new(0x80_0000), VirtAddr::new(0x50_0000), PRESENT).unwrap();
        pt.map(PhysAddr::new(0x80_1000), VirtAddr::new(0x50_1000), PRESENT).unwrap();
        assert_eq!(pt.frames().allocated(), 3);
        assert_eq!(pt.translate(VirtAddr::new(0x50_1000)), Some(PhysAddr::new(0x80_1000)));
    }

    #[test]
    fn test_map_below_bootstrap_limit_is_noop() {
        let mut pt = bootstrapped();
        let before = snapshot(&pt, 3);

        pt.map(PhysAddr::new(0x90_0000), VirtAddr::new(0x1000), PRESENT | WRITABLE).unwrap();
        pt.map(PhysAddr::new(0x90_0000), VirtAddr::new(0x3F_F000), PRESENT | WRITABLE).unwrap();

        assert_eq!(snapshot(&pt, 3), before);
        assert_eq!(pt.frames().allocated(), 0);
        assert_eq!(pt.translate(VirtAddr::new(0x1000)), Some(PhysAddr::new(0x1000)));
    }

    #[test]
    fn test_unmap_clears_entry_once() {
        let mut pt = empty();
        let virt = VirtAddr::new(0x50_0000);
        pt.map(PhysAddr::new(0x70_0000), virt, PRESENT | WRITABLE).unwrap();

        assert_eq!(pt.unmap(virt), Some(PhysAddr::new(0x70_0000)));
        assert!(!pt.is_mapped(virt));
        assert_eq!(pt.unmap(virt), None);
        assert!(!pt.is_mapped(virt));
        // Intermediate tables stay.
        assert_eq!(pt.frames().allocated(), 3);
    }

    #[test]
    fn test_unmap_of_never_mapped_address() {
        let mut pt = empty();
        assert_eq!(pt.unmap(VirtAddr::new(0x1234_5000)), None);
        assert_eq!(pt.frames().allocated(), 0);
    }

    #[test]
    fn test_huge_page_is_never_descended_into() {
        let mut pt = bootstrapped();
        let before = snapshot(&pt, 3);
        let virt = VirtAddr::new(0x60_1000);

        assert_eq!(
            pt.map(PhysAddr::new(0x90_0000), virt, PRESENT | WRITABLE),
            Err(MapError::ParentEntryHugePage)
        );
        assert_eq!(snapshot(&pt, 3), before);
        assert_eq!(pt.frames().allocated(), 0);

        assert!(pt.is_mapped(virt));
        assert_eq!(pt.translate(VirtAddr::new(0x61_2345)), Some(PhysAddr::new(0x61_2345)));
        assert_eq!(pt.unmap(virt), None);
        assert!(pt.is_mapped(virt));
    }

    #[test]
    fn test_translate_ignores_pat_bit_of_huge_leaf() {
        let mut pt = bootstrapped();
        let l2 = pt.frames().frame(2).unwrap();
        pt.frames_mut().table_mut(l2).unwrap()[3]
            .set_addr(PhysAddr::new(0x60_1000), PRESENT | WRITABLE | HUGE);

        assert_eq!(pt.translate(VirtAddr::new(0x60_0005)), Some(PhysAddr::new(0x60_0005)));
        assert_eq!(pt.translate(VirtAddr::new(0x7F_FFFF)), Some(PhysAddr::new(0x7F_FFFF)));
    }

    #[test]
    fn test_map_next_to_huge_page_allocates_only_leaf_table() {
        let mut pt = bootstrapped();
        pt.map(PhysAddr::new(0x90_0000), VirtAddr::new(0x40_0000), PRESENT | WRITABLE).unwrap();
        assert_eq!(pt.frames().allocated(), 1);
        assert!(pt.is_mapped(VirtAddr::new(0x40_0000)));
        assert!(!pt.is_mapped(VirtAddr::new(0x40_1000)));
    }

    #[test]
    fn test_one_gib_page_translation() {
        let mut pt = empty();
        let root = pt.root();
        let l3 = pt.frames_mut().alloc_page().unwrap();
        pt.frames_mut().table_mut(root).unwrap()[1]
            .set_addr(l3.start_address(), PRESENT | WRITABLE);
        pt.frames_mut().table_mut(l3).unwrap()[0]
            .set_addr(PhysAddr::new(0x4000_0000), PRESENT | WRITABLE | HUGE);

        let virt = VirtAddr::new(0x80_0000_0000 + 0x1234_5678);
        assert!(pt.is_mapped(virt));
        assert_eq!(pt.translate(virt), Some(PhysAddr::new(0x4000_0000 + 0x1234_5678)));
        assert_eq!(
            pt.map(PhysAddr::new(0), virt, PRESENT),
            Err(MapError::ParentEntryHugePage)
        );
    }

    #[test]
    fn test_user_leaf_gets_user_intermediates() {
        let mut pt = empty();
        let virt = VirtAddr::new(0x50_0000);
        let flags = PRESENT | WRITABLE | PageTableFlags::USER_ACCESSIBLE;
        pt.map(PhysAddr::new(0x70_0000), virt, flags).unwrap();

        let walk = pt.walk(virt);
        assert_eq!(walk.steps().count(), 4);
        for step in walk.steps() {
            assert!(step.flags.contains(PageTableFlags::USER_ACCESSIBLE), "L{}", step.level);
        }
    }

    #[test]
    fn test_kernel_leaf_intermediates_are_present_writable() {
        let mut pt = empty();
        let virt = VirtAddr::new(0x50_0000);
        pt.map(PhysAddr::new(0x70_0000), virt, PRESENT).unwrap();
        let walk = pt.walk(virt);
        let steps: Vec<_> = walk.steps().copied().collect();
        for step in &steps[..3] {
            assert_eq!(step.flags, PRESENT | WRITABLE);
        }
        assert_eq!(steps[3].flags, PRESENT);
        assert_eq!(steps[3].addr, PhysAddr::new(0x70_0000));
    }

    #[test]
    fn test_out_of_frames_is_reported() {
        let arena = FrameArena::<3>::new(PhysAddr::new(0x3F_F000), 1).unwrap();
        let root = arena.frame(0).unwrap();
        let mut pt = PageTableManager::new(arena, root, BOOTSTRAP_MAPPED_END);
        assert_eq!(
            pt.map(PhysAddr::new(0x70_0000), VirtAddr::new(0x50_0000), PRESENT),
            Err(MapError::FrameAllocation(MemoryError::OutOfFrames))
        );
    }

    #[test]
    fn test_misaligned_physical_address_is_rejected() {
        let mut pt = empty();
        assert_eq!(
            pt.map(PhysAddr::new(0x70_0010), VirtAddr::new(0x50_0000), PRESENT),
            Err(MapError::Misaligned)
        );
        assert_eq!(pt.frames().allocated(), 0);
    }

    #[test]
    fn test_walk_stops_at_first_absent_level() {
        let pt = empty();
        let walk = pt.walk(VirtAddr::new(0x50_0000));
        assert_eq!(walk.steps().count(), 1);
        assert!(!walk.last().unwrap().is_present());
        assert!(format!("{}", walk).contains("L4[  0] not present"));
    }

    #[test]
    fn test_walk_reports_unreadable_table() {
        let mut pt = empty();
        let root = pt.root();
        pt.frames_mut().table_mut(root).unwrap()[0]
            .set_addr(PhysAddr::new(0x1000_0000), PRESENT | WRITABLE);

        let walk = pt.walk(VirtAddr::new(0x50_0000));
        assert_eq!(walk.error, Some(MemoryError::FrameOutOfRange));
        assert!(!pt.is_mapped(VirtAddr::new(0x50_0000)));
        assert_eq!(
            pt.map(PhysAddr::new(0), VirtAddr::new(0x50_0000), PRESENT),
            Err(MapError::FrameAllocation(MemoryError::FrameOutOfRange))
        );
    }
}
