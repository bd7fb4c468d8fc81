//! Host-side stand-ins for the hardware seams.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use log::{LevelFilter, Log, Metadata, Record};
use x86_64::structures::paging::PhysFrame;
use x86_64::structures::DescriptorTablePointer;
use x86_64::{PhysAddr, VirtAddr};

use crate::arch::{Cpu, PortIo};
use crate::interrupts::idt::EntryPoints;
use crate::interrupts::pic::{PIC1_COMMAND, PIC1_DATA, PIC2_COMMAND, PIC2_DATA};
use crate::interrupts::{Exception, InterruptIndex};
use crate::memory::{FrameArena, PageTableManager};
use crate::config::BOOTSTRAP_MAPPED_END;

/// Physical address of the level-4 table every mock starts from.
pub const TEST_ROOT: u64 = 0x3F_F000;

pub type TestArena = FrameArena<8>;
pub type TestSpace = PageTableManager<TestArena>;

/// Arena whose frame 0 is the (empty) root at [`TEST_ROOT`].
pub fn test_arena() -> TestArena {
    FrameArena::new(PhysAddr::new(TEST_ROOT), 1).unwrap()
}

pub fn empty_space() -> TestSpace {
    let arena = test_arena();
    let root = arena.frame(0).unwrap();
    PageTableManager::new(arena, root, BOOTSTRAP_MAPPED_END)
}

// ============================================================================
// CPU
// ============================================================================

/// Unwind payload standing in for a halted machine.
#[derive(Debug)]
pub struct Halted;

/// True if `f` ended in `Cpu::halt_forever`.
pub fn halts<F: FnOnce()>(f: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => false,
        Err(payload) if payload.is::<Halted>() => true,
        Err(payload) => panic::resume_unwind(payload),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedIdt {
    pub limit: u16,
    pub base: u64,
    /// IF at the moment `lidt` ran.
    pub interrupts_enabled: bool,
}

pub struct MockCpu {
    interrupts: Cell<bool>,
    fault_address: Cell<u64>,
    root: PhysFrame,
    loaded: Cell<Option<LoadedIdt>>,
    flushed: RefCell<Vec<u64>>,
}

impl MockCpu {
    /// Interrupts off, root at [`TEST_ROOT`].
    pub fn new() -> Self {
        Self::with_root(PhysFrame::containing_address(PhysAddr::new(TEST_ROOT)))
    }

    pub fn with_root(root: PhysFrame) -> Self {
        Self {
            interrupts: Cell::new(false),
            fault_address: Cell::new(0),
            root,
            loaded: Cell::new(None),
            flushed: RefCell::new(Vec::new()),
        }
    }

    pub fn set_fault_address(&self, addr: u64) {
        self.fault_address.set(addr);
    }

    pub fn loaded_idt(&self) -> Option<LoadedIdt> {
        self.loaded.get()
    }

    pub fn flushed(&self) -> Vec<u64> {
        self.flushed.borrow().clone()
    }
}

impl Cpu for MockCpu {
    fn interrupts_enabled(&self) -> bool {
        self.interrupts.get()
    }

    fn enable_interrupts(&self) {
        self.interrupts.set(true);
    }

    fn disable_interrupts(&self) {
        self.interrupts.set(false);
    }

    fn halt_forever(&self) -> ! {
        panic::panic_any(Halted)
    }

    fn fault_address(&self) -> u64 {
        self.fault_address.get()
    }

    fn page_table_root(&self) -> PhysFrame {
        self.root
    }

    unsafe fn load_idt(&self, pointer: &DescriptorTablePointer) {
        self.loaded.set(Some(LoadedIdt {
            limit: pointer.limit,
            base: pointer.base.as_u64(),
            interrupts_enabled: self.interrupts.get(),
        }));
    }

    fn flush_page(&self, addr: VirtAddr) {
        self.flushed.borrow_mut().push(addr.as_u64());
    }
}

// ============================================================================
// PORTS
// ============================================================================

/// Records port writes and models the two 8259 mask registers.
///
/// After an ICW1 on a command port the next three data-port writes to that
/// chip are taken as ICW2-ICW4; every other data-port write sets the mask.
#[derive(Debug, Default)]
pub struct MockPorts {
    writes: Vec<(u16, u8)>,
    reads: usize,
    masks: [u8; 2],
    pending_icw: [u8; 2],
}

impl MockPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> &[(u16, u8)] {
        &self.writes
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Forget all recorded traffic, reads included.
    pub fn clear_writes(&mut self) {
        self.writes.clear();
        self.reads = 0;
    }

    fn chip(port: u16) -> Option<usize> {
        match port {
            PIC1_COMMAND | PIC1_DATA => Some(0),
            PIC2_COMMAND | PIC2_DATA => Some(1),
            _ => None,
        }
    }
}

impl PortIo for MockPorts {
    fn read_u8(&mut self, port: u16) -> u8 {
        self.reads += 1;
        match (port, Self::chip(port)) {
            (PIC1_DATA | PIC2_DATA, Some(chip)) => self.masks[chip],
            _ => 0,
        }
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        self.writes.push((port, value));
        let Some(chip) = Self::chip(port) else {
            return;
        };
        match port {
            PIC1_COMMAND | PIC2_COMMAND if value & 0x10 != 0 => {
                self.pending_icw[chip] = 3;
                self.masks[chip] = 0;
            }
            PIC1_DATA | PIC2_DATA if self.pending_icw[chip] > 0 => {
                self.pending_icw[chip] -= 1;
            }
            PIC1_DATA | PIC2_DATA => self.masks[chip] = value,
            _ => {}
        }
    }
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Distinct fake trampoline addresses per vector class.
pub struct MockEntryPoints;

impl EntryPoints for MockEntryPoints {
    fn unhandled(&self) -> u64 {
        0xFFFF_8000_0000_1000
    }

    fn unhandled_with_error_code(&self) -> u64 {
        0xFFFF_8000_0000_1800
    }

    fn exception(&self, exception: Exception) -> u64 {
        0xFFFF_8000_0000_2000 + u64::from(exception.vector()) * 0x10
    }

    fn irq(&self, irq: InterruptIndex) -> u64 {
        0xFFFF_8000_0000_3000 + u64::from(irq.line()) * 0x10
    }
}

// ============================================================================
// LOG CAPTURE
// ============================================================================

thread_local! {
    static CAPTURED: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let line = format!("[{}] {}", record.level(), record.args());
        CAPTURED.with(|captured| captured.borrow_mut().push(line));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INSTALL: Once = Once::new();

/// Start capturing this thread's log output from a clean slate.
pub fn capture_logs() {
    INSTALL.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Trace);
    });
    CAPTURED.with(|captured| captured.borrow_mut().clear());
}

pub fn captured() -> Vec<String> {
    CAPTURED.with(|captured| captured.borrow().clone())
}

pub fn logged(needle: &str) -> bool {
    captured().iter().any(|line| line.contains(needle))
}
