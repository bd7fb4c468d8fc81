use x86_64::instructions::{interrupts, port::Port, tables, tlb};
use x86_64::registers::control::{Cr2, Cr3};
use x86_64::structures::paging::PhysFrame;
use x86_64::structures::DescriptorTablePointer;
use x86_64::VirtAddr;

use super::{Cpu, PortIo};

/// The processor we are running on.
#[derive(Debug)]
pub struct X86Cpu {
    _private: (),
}

impl X86Cpu {
    /// # Safety
    ///
    /// Must only be created in ring 0.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Cpu for X86Cpu {
    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }

    fn enable_interrupts(&self) {
        interrupts::enable();
    }

    fn disable_interrupts(&self) {
        interrupts::disable();
    }

    fn halt_forever(&self) -> ! {
        loop {
            x86_64::instructions::hlt();
        }
    }

    fn fault_address(&self) -> u64 {
        Cr2::read_raw()
    }

    fn page_table_root(&self) -> PhysFrame {
        let (frame, _) = Cr3::read();
        frame
    }

    unsafe fn load_idt(&self, pointer: &DescriptorTablePointer) {
        tables::lidt(pointer);
    }

    fn flush_page(&self, addr: VirtAddr) {
        tlb::flush(addr);
    }
}

/// Raw `in`/`out` on the I/O port space.
#[derive(Debug)]
pub struct X86Ports {
    _private: (),
}

impl X86Ports {
    /// # Safety
    ///
    /// Writes go straight to hardware; the caller must be the only driver
    /// of the ports it touches through this value.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PortIo for X86Ports {
    fn read_u8(&mut self, port: u16) -> u8 {
        let mut port = Port::<u8>::new(port);
        unsafe { port.read() }
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        let mut port = Port::<u8>::new(port);
        unsafe { port.write(value) }
    }
}
