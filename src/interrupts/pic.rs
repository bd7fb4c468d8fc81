//! # Programmable Interrupt Controller (8259 PIC)
//!
//! Configures the legacy 8259 PIC chips for interrupt routing.
//!
//! ## PIC Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐
//! │   PIC 1     │     │   PIC 2     │
//! │  (Master)   │◀────│  (Slave)    │
//! │ IRQ 0-7     │ IR2 │ IRQ 8-15    │
//! └─────────────┘     └─────────────┘
//!       │
//!       ▼
//!     CPU
//! ```
//!
//! ## Vector Remapping
//!
//! By default, IRQ 0-7 conflict with CPU exception vectors.
//! We remap them:
//! - PIC 1: vectors 32-39 (IRQ 0-7)
//! - PIC 2: vectors 40-47 (IRQ 8-15)
//!
//! ## Initial Masks
//!
//! | Chip   | Mask   | Unmasked lines             |
//! |--------|--------|----------------------------|
//! | Master | `0xF8` | timer, keyboard, cascade   |
//! | Slave  | `0xFF` | none                       |

use core::fmt;

use log::debug;

use crate::arch::PortIo;

pub const PIC_1_OFFSET: u8 = 32; // Primary PIC handles IRQs 0-7
pub const PIC_2_OFFSET: u8 = 40; // Secondary PIC handles IRQs 8-15

pub const INITIAL_MASTER_MASK: u8 = 0xF8;
pub const INITIAL_SLAVE_MASK: u8 = 0xFF;

pub const PIC1_COMMAND: u16 = 0x20;
pub const PIC1_DATA: u16 = 0x21;
pub const PIC2_COMMAND: u16 = 0xA0;
pub const PIC2_DATA: u16 = 0xA1;

/// Unused port; writing to it takes long enough for the PIC to settle.
const IO_WAIT_PORT: u16 = 0x80;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;
/// Master: slave attached on IR2. Slave: cascade identity 2.
const ICW3_MASTER: u8 = 1 << 2;
const ICW3_SLAVE: u8 = 2;

const CMD_END_OF_INTERRUPT: u8 = 0x20;

pub const IRQ_LINES: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PicError {
    InvalidLine(u8),
}

impl fmt::Display for PicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PicError::InvalidLine(irq) => write!(f, "IRQ line {} out of range 0-15", irq),
        }
    }
}

/// What interrupt handlers may do to the controller.
pub trait PicControl {
    fn set_mask(&mut self, irq: u8) -> Result<(), PicError>;
    fn clear_mask(&mut self, irq: u8) -> Result<(), PicError>;
    fn send_eoi(&mut self, irq: u8);
    fn disable(&mut self);
}

/// Master/slave 8259 pair, driven through `P`.
pub struct ChainedPics<P> {
    ports: P,
}

impl<P: PortIo> ChainedPics<P> {
    pub const fn new(ports: P) -> Self {
        Self { ports }
    }

    pub fn ports(&self) -> &P {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut P {
        &mut self.ports
    }

    fn write(&mut self, port: u16, value: u8) {
        self.ports.write_u8(port, value);
        self.ports.write_u8(IO_WAIT_PORT, 0);
    }

    /// Run the ICW1-ICW4 handshake on both chips and install the initial
    /// masks.
    pub fn initialize(&mut self, master_mask: u8, slave_mask: u8) {
        self.write(PIC1_COMMAND, ICW1_INIT | ICW1_ICW4);
        self.write(PIC2_COMMAND, ICW1_INIT | ICW1_ICW4);

        self.write(PIC1_DATA, PIC_1_OFFSET);
        self.write(PIC2_DATA, PIC_2_OFFSET);

        self.write(PIC1_DATA, ICW3_MASTER);
        self.write(PIC2_DATA, ICW3_SLAVE);

        self.write(PIC1_DATA, ICW4_8086);
        self.write(PIC2_DATA, ICW4_8086);

        self.write_masks(master_mask, slave_mask);
        debug!(
            "PIC remapped to {}/{}, masks {:#04x}/{:#04x}",
            PIC_1_OFFSET, PIC_2_OFFSET, master_mask, slave_mask
        );
    }

    /// Current (master, slave) mask registers.
    pub fn masks(&mut self) -> (u8, u8) {
        (self.ports.read_u8(PIC1_DATA), self.ports.read_u8(PIC2_DATA))
    }

    pub fn write_masks(&mut self, master: u8, slave: u8) {
        self.ports.write_u8(PIC1_DATA, master);
        self.ports.write_u8(PIC2_DATA, slave);
    }

    fn update_mask(&mut self, irq: u8, masked: bool) -> Result<(), PicError> {
        let (port, bit) = match irq {
            0..=7 => (PIC1_DATA, irq),
            8..=15 => (PIC2_DATA, irq - 8),
            _ => return Err(PicError::InvalidLine(irq)),
        };
        let current = self.ports.read_u8(port);
        let value = if masked {
            current | (1 << bit)
        } else {
            current & !(1 << bit)
        };
        self.ports.write_u8(port, value);
        Ok(())
    }
}

impl<P: PortIo> PicControl for ChainedPics<P> {
    fn set_mask(&mut self, irq: u8) -> Result<(), PicError> {
        self.update_mask(irq, true)
    }

    fn clear_mask(&mut self, irq: u8) -> Result<(), PicError> {
        self.update_mask(irq, false)
    }

    /// Slave first for lines 8-15, master always.
    fn send_eoi(&mut self, irq: u8) {
        if irq >= 8 {
            self.ports.write_u8(PIC2_COMMAND, CMD_END_OF_INTERRUPT);
        }
        self.ports.write_u8(PIC1_COMMAND, CMD_END_OF_INTERRUPT);
    }

    fn disable(&mut self) {
        self.write_masks(0xFF, 0xFF);
    }
}
