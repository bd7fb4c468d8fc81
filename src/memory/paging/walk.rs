use core::fmt;

use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::memory::MemoryError;

/// One entry visited during a page walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkStep {
    /// 4 for the root, 1 for the leaf table.
    pub level: u8,
    pub index: u16,
    pub addr: PhysAddr,
    pub flags: PageTableFlags,
}

impl WalkStep {
    pub fn is_present(&self) -> bool {
        self.flags.contains(PageTableFlags::PRESENT)
    }
}

/// Record of the entries visited while translating `virt`, root first.
///
/// The walk stops at the first non-present entry, at a huge-page leaf, or
/// when a table cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWalk {
    pub virt: VirtAddr,
    steps: [Option<WalkStep>; 4],
    len: usize,
    pub error: Option<MemoryError>,
}

impl PageWalk {
    pub(super) fn new(virt: VirtAddr) -> Self {
        Self {
            virt,
            steps: [None; 4],
            len: 0,
            error: None,
        }
    }

    pub(super) fn push(&mut self, step: WalkStep) {
        if self.len < self.steps.len() {
            self.steps[self.len] = Some(step);
            self.len += 1;
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = &WalkStep> {
        self.steps[..self.len].iter().flatten()
    }

    /// Last entry visited.
    pub fn last(&self) -> Option<&WalkStep> {
        self.len.checked_sub(1).and_then(|i| self.steps[i].as_ref())
    }
}

impl fmt::Display for PageWalk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page walk for {:#x}:", self.virt.as_u64())?;
        for step in self.steps() {
            write!(f, "\n  L{}[{:3}] ", step.level, step.index)?;
            if step.is_present() {
                write!(f, "{:#014x} {:?}", step.addr.as_u64(), step.flags)?;
            } else {
                write!(f, "not present")?;
            }
        }
        if let Some(err) = self.error {
            write!(f, "\n  walk aborted: {}", err)?;
        }
        Ok(())
    }
}
