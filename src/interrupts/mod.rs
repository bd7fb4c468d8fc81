//! # Interrupt Handling
//!
//! - **IDT**: the 256-entry vector table and `lidt`
//! - **PIC**: 8259 remapping, masking and EOI
//! - **Handlers**: vector-indexed handler table and default handlers
//! - **Faults**: built-in policy for CPU exceptions
//! - **Guard**: scoped interrupt disable that restores the previous state
//!
//! ## Interrupt Vector Layout
//!
//! | Vector | Type                   | Default handler            |
//! |--------|------------------------|----------------------------|
//! | 0-20   | CPU Exceptions         | `faults::Exception`        |
//! | 9, 15  | Reserved               | `UnhandledInterrupt`       |
//! | 21-31  | Reserved               | `UnhandledInterrupt`       |
//! | 32-39  | IRQ 0-7 (master PIC)   | `InterruptIndex`           |
//! | 40-47  | IRQ 8-15 (slave PIC)   | `InterruptIndex`           |
//! | 48-255 | Free                   | `UnhandledInterrupt`       |

pub mod faults;
pub mod frame;
pub mod guard;
pub mod handlers;
pub mod idt;
pub mod pic;

pub use faults::Exception;
pub use frame::InterruptFrame;
pub use guard::InterruptGuard;
pub use handlers::{HandlerContext, HandlerTable, InterruptHandler, UnhandledInterrupt};
pub use idt::{EntryPoints, GateAttributes, Idt, VectorEntry};
pub use pic::{ChainedPics, PicControl, PicError, PIC_1_OFFSET, PIC_2_OFFSET};

/// Hardware interrupt vectors after remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard = PIC_1_OFFSET + 1,
    Cascade = PIC_1_OFFSET + 2,
    Com2 = PIC_1_OFFSET + 3,
    Com1 = PIC_1_OFFSET + 4,
    Lpt2 = PIC_1_OFFSET + 5,
    Floppy = PIC_1_OFFSET + 6,
    Lpt1 = PIC_1_OFFSET + 7,
    Rtc = PIC_2_OFFSET,
    Irq9 = PIC_2_OFFSET + 1,
    Irq10 = PIC_2_OFFSET + 2,
    Irq11 = PIC_2_OFFSET + 3,
    Mouse = PIC_2_OFFSET + 4,
    Coprocessor = PIC_2_OFFSET + 5,
    PrimaryAta = PIC_2_OFFSET + 6,
    SecondaryAta = PIC_2_OFFSET + 7,
}

impl InterruptIndex {
    /// In line order, IRQ 0 first.
    pub const ALL: [InterruptIndex; 16] = [
        InterruptIndex::Timer,
        InterruptIndex::Keyboard,
        InterruptIndex::Cascade,
        InterruptIndex::Com2,
        InterruptIndex::Com1,
        InterruptIndex::Lpt2,
        InterruptIndex::Floppy,
        InterruptIndex::Lpt1,
        InterruptIndex::Rtc,
        InterruptIndex::Irq9,
        InterruptIndex::Irq10,
        InterruptIndex::Irq11,
        InterruptIndex::Mouse,
        InterruptIndex::Coprocessor,
        InterruptIndex::PrimaryAta,
        InterruptIndex::SecondaryAta,
    ];

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn as_usize(self) -> usize {
        self as usize
    }

    /// PIC input line, 0-15.
    pub const fn line(self) -> u8 {
        self as u8 - PIC_1_OFFSET
    }

    pub fn from_line(line: u8) -> Option<Self> {
        Self::ALL.get(usize::from(line)).copied()
    }

    pub fn from_vector(vector: u8) -> Option<Self> {
        vector.checked_sub(PIC_1_OFFSET).and_then(Self::from_line)
    }

    pub const fn name(self) -> &'static str {
        match self {
            InterruptIndex::Timer => "timer",
            InterruptIndex::Keyboard => "keyboard",
            InterruptIndex::Cascade => "cascade",
            InterruptIndex::Com2 => "COM2",
            InterruptIndex::Com1 => "COM1",
            InterruptIndex::Lpt2 => "LPT2",
            InterruptIndex::Floppy => "floppy",
            InterruptIndex::Lpt1 => "LPT1",
            InterruptIndex::Rtc => "RTC",
            InterruptIndex::Irq9 => "IRQ9",
            InterruptIndex::Irq10 => "IRQ10",
            InterruptIndex::Irq11 => "IRQ11",
            InterruptIndex::Mouse => "mouse",
            InterruptIndex::Coprocessor => "coprocessor",
            InterruptIndex::PrimaryAta => "primary ATA",
            InterruptIndex::SecondaryAta => "secondary ATA",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_and_vectors_agree() {
        for (line, irq) in InterruptIndex::ALL.iter().enumerate() {
            assert_eq!(usize::from(irq.line()), line);
            assert_eq!(irq.as_u8(), PIC_1_OFFSET + line as u8);
            assert_eq!(InterruptIndex::from_vector(irq.as_u8()), Some(*irq));
        }
        assert_eq!(InterruptIndex::Mouse.as_usize(), 44);
    }

    #[test]
    fn test_out_of_range_lookups() {
        assert_eq!(InterruptIndex::from_line(16), None);
        assert_eq!(InterruptIndex::from_vector(31), None);
        assert_eq!(InterruptIndex::from_vector(48), None);
    }
}
