//! Interrupt Descriptor Table (IDT) for x86_64.
//!
//! Entries hold raw handler addresses so the table can be filled from any
//! set of entry trampolines and rebound at run time.

use core::mem::size_of;

use x86_64::structures::DescriptorTablePointer;
use x86_64::VirtAddr;

use super::faults::Exception;
use super::guard::InterruptGuard;
use super::InterruptIndex;
use crate::arch::Cpu;

pub const IDT_ENTRIES: usize = 256;

/// Kernel code segment selector installed in every entry.
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;

/// Vectors outside the handled exceptions that still push an error code:
/// control protection (21), VMM communication (29) and security (30).
pub const ERROR_CODE_CATCH_ALL_VECTORS: [u8; 3] = [21, 29, 30];

/// Type/attribute byte of a gate descriptor.
///
/// ```text
///   7   6 5   4   3      0
/// ┌───┬─────┬───┬────────┐
/// │ P │ DPL │ 0 │  type  │
/// └───┴─────┴───┴────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct GateAttributes(u8);

impl GateAttributes {
    /// Present, ring 0, 64-bit interrupt gate (clears IF on entry).
    pub const INTERRUPT_GATE: Self = Self(0x8E);
    /// Present, ring 0, 64-bit trap gate (leaves IF alone).
    pub const TRAP_GATE: Self = Self(0x8F);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_present(self) -> bool {
        self.0 & 0x80 != 0
    }

    pub const fn privilege_level(self) -> u8 {
        (self.0 >> 5) & 0b11
    }

    /// Lowest ring allowed to raise the vector with `int`.
    pub const fn with_privilege_level(self, ring: u8) -> Self {
        Self((self.0 & !0x60) | ((ring & 0b11) << 5))
    }

    pub const fn gate_type(self) -> u8 {
        self.0 & 0x0F
    }
}

/// One 16-byte gate descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct VectorEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    attributes: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

const _: () = assert!(size_of::<VectorEntry>() == 16);

impl VectorEntry {
    /// Not present; the CPU raises #NP if it is ever used.
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            ist: 0,
            attributes: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    pub const fn new(handler: u64, attributes: GateAttributes) -> Self {
        Self {
            offset_low: handler as u16,
            selector: KERNEL_CODE_SELECTOR,
            ist: 0,
            attributes: attributes.bits(),
            offset_mid: (handler >> 16) as u16,
            offset_high: (handler >> 32) as u32,
            reserved: 0,
        }
    }

    pub const fn handler(&self) -> u64 {
        self.offset_low as u64 | (self.offset_mid as u64) << 16 | (self.offset_high as u64) << 32
    }

    pub const fn selector(&self) -> u16 {
        self.selector
    }

    pub const fn stack_index(&self) -> u8 {
        self.ist
    }

    pub const fn attributes(&self) -> GateAttributes {
        GateAttributes(self.attributes)
    }

    pub const fn is_present(&self) -> bool {
        self.attributes().is_present()
    }
}

/// Addresses of the CPU-facing entry trampolines.
pub trait EntryPoints {
    /// Catch-all for vectors nothing else claims.
    fn unhandled(&self) -> u64;
    /// Catch-all for [`ERROR_CODE_CATCH_ALL_VECTORS`], which must pop the
    /// error code before returning.
    fn unhandled_with_error_code(&self) -> u64;
    fn exception(&self, exception: Exception) -> u64;
    fn irq(&self, irq: InterruptIndex) -> u64;
}

#[repr(C, align(16))]
pub struct Idt {
    entries: [VectorEntry; IDT_ENTRIES],
}

impl Idt {
    pub const fn new() -> Self {
        Self {
            entries: [VectorEntry::missing(); IDT_ENTRIES],
        }
    }

    /// Point every vector at the catch-all, then bind the architectural
    /// exceptions (0-8, 10-14, 16-20) and the sixteen IRQs (32-47).
    pub fn initialize(&mut self, entry_points: &dyn EntryPoints) {
        let unhandled = entry_points.unhandled();
        for entry in self.entries.iter_mut() {
            *entry = VectorEntry::new(unhandled, GateAttributes::INTERRUPT_GATE);
        }
        let with_error_code = entry_points.unhandled_with_error_code();
        for vector in ERROR_CODE_CATCH_ALL_VECTORS {
            self.set_entry(vector, with_error_code, GateAttributes::INTERRUPT_GATE);
        }

        for exception in Exception::ALL {
            let handler = entry_points.exception(exception);
            self.set_entry(exception.vector(), handler, GateAttributes::INTERRUPT_GATE);
        }

        for irq in InterruptIndex::ALL {
            self.set_entry(irq.as_u8(), entry_points.irq(irq), GateAttributes::INTERRUPT_GATE);
        }
    }

    pub fn set_entry(&mut self, vector: u8, handler: u64, attributes: GateAttributes) {
        self.entries[usize::from(vector)] = VectorEntry::new(handler, attributes);
    }

    pub fn entry(&self, vector: u8) -> &VectorEntry {
        &self.entries[usize::from(vector)]
    }

    pub fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            limit: (size_of::<[VectorEntry; IDT_ENTRIES]>() - 1) as u16,
            base: VirtAddr::from_ptr(self.entries.as_ptr()),
        }
    }

    /// Commit the table with `lidt`, interrupts disabled for the duration.
    ///
    /// # Safety
    ///
    /// `self` must not move or be dropped while the CPU can still deliver
    /// interrupts through it.
    pub unsafe fn load<C: Cpu + ?Sized>(&self, cpu: &C) {
        let _guard = InterruptGuard::new(cpu);
        cpu.load_idt(&self.pointer());
    }
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}
