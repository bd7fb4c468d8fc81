//! Vector-indexed handler table and the default handlers.
//!
//! Every vector is bound to exactly one [`InterruptHandler`]. Until a driver
//! registers its own, exceptions go to the fault policy, IRQs to a default
//! that logs the device and acknowledges the line, and everything else to
//! [`UnhandledInterrupt`].

use log::{info, trace, warn};

use super::faults::Exception;
use super::frame::InterruptFrame;
use super::idt::IDT_ENTRIES;
use super::pic::PicControl;
use super::InterruptIndex;
use crate::arch::Cpu;
use crate::memory::AddressSpace;

/// Something that can service an interrupt.
///
/// Runs with interrupts disabled and is responsible for acknowledging its
/// own line through the context.
pub trait InterruptHandler: Sync {
    fn handle(&self, frame: &InterruptFrame, cx: &mut HandlerContext<'_>);
}

/// Kernel state lent to a handler for the duration of one interrupt.
pub struct HandlerContext<'a> {
    vector: Option<u8>,
    pics: &'a mut dyn PicControl,
    cpu: &'a dyn Cpu,
    address_space: &'a dyn AddressSpace,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        vector: Option<u8>,
        pics: &'a mut dyn PicControl,
        cpu: &'a dyn Cpu,
        address_space: &'a dyn AddressSpace,
    ) -> Self {
        Self {
            vector,
            pics,
            cpu,
            address_space,
        }
    }

    /// `None` when the interrupt came in through the catch-all entry.
    pub fn vector(&self) -> Option<u8> {
        self.vector
    }

    pub fn send_eoi(&mut self, irq: u8) {
        self.pics.send_eoi(irq);
    }

    pub fn pics(&mut self) -> &mut dyn PicControl {
        &mut *self.pics
    }

    pub fn cpu(&self) -> &dyn Cpu {
        self.cpu
    }

    pub fn address_space(&self) -> &dyn AddressSpace {
        self.address_space
    }

    /// Mask both controllers, disable interrupts and stop.
    pub fn halt(&mut self) -> ! {
        self.pics.disable();
        self.cpu.disable_interrupts();
        self.cpu.halt_forever()
    }
}

/// Fallback for vectors with no better handler.
///
/// Acknowledges both controllers whatever the vector was.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnhandledInterrupt;

impl InterruptHandler for UnhandledInterrupt {
    fn handle(&self, frame: &InterruptFrame, cx: &mut HandlerContext<'_>) {
        match cx.vector() {
            Some(vector) => warn!(
                "Unhandled interrupt {} at {:#x}",
                vector, frame.instruction_pointer
            ),
            None => warn!("Unhandled interrupt at {:#x}", frame.instruction_pointer),
        }
        cx.send_eoi(0);
        cx.send_eoi(8);
    }
}

/// Default for IRQ vectors: note the device and acknowledge its line.
impl InterruptHandler for InterruptIndex {
    fn handle(&self, _frame: &InterruptFrame, cx: &mut HandlerContext<'_>) {
        match self {
            // Periodic or chatty; a driver normally replaces these.
            InterruptIndex::Timer | InterruptIndex::Keyboard | InterruptIndex::Mouse => {
                trace!("{} interrupt", self.name())
            }
            _ => info!("{} interrupt", self.name()),
        }
        cx.send_eoi(self.line());
    }
}

static EXCEPTIONS: [Exception; 19] = Exception::ALL;
static IRQS: [InterruptIndex; 16] = InterruptIndex::ALL;

const UNHANDLED: &dyn InterruptHandler = &UnhandledInterrupt;

pub struct HandlerTable {
    slots: [&'static dyn InterruptHandler; IDT_ENTRIES],
}

impl HandlerTable {
    /// Every vector unhandled.
    pub const fn new() -> Self {
        Self {
            slots: [UNHANDLED; IDT_ENTRIES],
        }
    }

    /// Fault policy on the exception vectors, device defaults on the IRQs.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.install_defaults();
        table
    }

    pub fn install_defaults(&mut self) {
        for exception in EXCEPTIONS.iter() {
            self.slots[usize::from(exception.vector())] = exception;
        }
        for irq in IRQS.iter() {
            self.slots[irq.as_usize()] = irq;
        }
    }

    /// Bind `handler` to `vector`, returning what was there.
    pub fn register(
        &mut self,
        vector: u8,
        handler: &'static dyn InterruptHandler,
    ) -> &'static dyn InterruptHandler {
        core::mem::replace(&mut self.slots[usize::from(vector)], handler)
    }

    pub fn get(&self, vector: u8) -> &'static dyn InterruptHandler {
        self.slots[usize::from(vector)]
    }

    pub fn dispatch(&self, vector: u8, frame: &InterruptFrame, cx: &mut HandlerContext<'_>) {
        self.get(vector).handle(frame, cx);
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
