//! Hardware seams.
//!
//! The core never executes privileged instructions directly; it asks a
//! [`Cpu`] or a [`PortIo`]. On hardware these are [`x86::X86Cpu`] and
//! [`x86::X86Ports`]; tests substitute recording mocks.

#[cfg(target_arch = "x86_64")]
pub mod x86;

use x86_64::structures::paging::PhysFrame;
use x86_64::structures::DescriptorTablePointer;
use x86_64::VirtAddr;

pub trait Cpu {
    /// State of the interrupt flag (RFLAGS.IF).
    fn interrupts_enabled(&self) -> bool;
    fn enable_interrupts(&self);
    fn disable_interrupts(&self);

    /// Stop the processor for good. Callers disable interrupts first.
    fn halt_forever(&self) -> !;

    /// Faulting linear address of the last page fault (CR2).
    fn fault_address(&self) -> u64;

    /// Frame holding the active level-4 table (CR3).
    fn page_table_root(&self) -> PhysFrame;

    /// Commit a descriptor table pointer with `lidt`.
    ///
    /// # Safety
    ///
    /// The table behind `pointer` must stay valid and in place for as long
    /// as the processor may deliver interrupts through it.
    unsafe fn load_idt(&self, pointer: &DescriptorTablePointer);

    fn flush_page(&self, addr: VirtAddr);
}

/// Byte-wide port I/O.
pub trait PortIo {
    fn read_u8(&mut self, port: u16) -> u8;
    fn write_u8(&mut self, port: u16, value: u8);
}
