//! # Kernel Core
//!
//! Interrupt dispatch and paging for a single-core x86_64 kernel.
//!
//! ## Layout
//!
//! | Module       | Owns                                              |
//! |--------------|---------------------------------------------------|
//! | `arch`       | `Cpu` / `PortIo` seams and their x86_64 backends  |
//! | `interrupts` | IDT, 8259 PIC, handler table, fault policy        |
//! | `memory`     | frame allocation, 4-level page tables             |
//! | `kernel`     | the `Kernel` context and the boot sequence        |
//! | `logger`     | `log` backend over COM1                           |
//!
//! Everything that touches hardware goes through a trait so the library
//! builds and tests on the host; the `kernel` binary wires in the real
//! implementations.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod interrupts;
pub mod kernel;
pub mod logger;
pub mod memory;

#[cfg(test)]
mod testing;

pub use config::KernelConfig;
pub use kernel::Kernel;
