//! # CPU Exception Policy
//!
//! | Vector | Exception              | Error code | Policy  |
//! |--------|------------------------|------------|---------|
//! | 0      | Divide error           | no         | halt    |
//! | 1      | Debug                  | no         | resume  |
//! | 2      | NMI                    | no         | resume  |
//! | 3      | Breakpoint             | no         | resume  |
//! | 4      | Overflow               | no         | resume  |
//! | 5      | Bound range exceeded   | no         | resume  |
//! | 6      | Invalid opcode         | no         | halt    |
//! | 7      | Device not available   | no         | resume  |
//! | 8      | Double fault           | yes (0)    | halt    |
//! | 10     | Invalid TSS            | yes        | resume  |
//! | 11     | Segment not present    | yes        | resume  |
//! | 12     | Stack-segment fault    | yes        | resume  |
//! | 13     | General protection     | yes        | resume  |
//! | 14     | Page fault             | yes        | halt    |
//! | 16     | x87 floating point     | no         | resume  |
//! | 17     | Alignment check        | yes        | resume  |
//! | 18     | Machine check          | no         | halt    |
//! | 19     | SIMD floating point    | no         | resume  |
//! | 20     | Virtualization         | no         | resume  |
//!
//! "Resume" means log, acknowledge the master PIC and return to the
//! faulting instruction. "Halt" means log, mask both PICs, disable
//! interrupts and stop the machine. There is no demand paging, so every
//! page fault is fatal.

use log::{error, warn};
use x86_64::structures::idt::PageFaultErrorCode;
use x86_64::VirtAddr;

use super::frame::InterruptFrame;
use super::handlers::{HandlerContext, InterruptHandler};
use crate::arch::Cpu;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    DivideError = 0,
    Debug = 1,
    NonMaskableInterrupt = 2,
    Breakpoint = 3,
    Overflow = 4,
    BoundRangeExceeded = 5,
    InvalidOpcode = 6,
    DeviceNotAvailable = 7,
    DoubleFault = 8,
    InvalidTss = 10,
    SegmentNotPresent = 11,
    StackSegmentFault = 12,
    GeneralProtection = 13,
    PageFault = 14,
    X87FloatingPoint = 16,
    AlignmentCheck = 17,
    MachineCheck = 18,
    SimdFloatingPoint = 19,
    Virtualization = 20,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Recoverable,
}

impl Exception {
    pub const ALL: [Exception; 19] = [
        Exception::DivideError,
        Exception::Debug,
        Exception::NonMaskableInterrupt,
        Exception::Breakpoint,
        Exception::Overflow,
        Exception::BoundRangeExceeded,
        Exception::InvalidOpcode,
        Exception::DeviceNotAvailable,
        Exception::DoubleFault,
        Exception::InvalidTss,
        Exception::SegmentNotPresent,
        Exception::StackSegmentFault,
        Exception::GeneralProtection,
        Exception::PageFault,
        Exception::X87FloatingPoint,
        Exception::AlignmentCheck,
        Exception::MachineCheck,
        Exception::SimdFloatingPoint,
        Exception::Virtualization,
    ];

    pub const fn vector(self) -> u8 {
        self as u8
    }

    pub fn from_vector(vector: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.vector() == vector)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Exception::DivideError => "DIVIDE ERROR",
            Exception::Debug => "DEBUG",
            Exception::NonMaskableInterrupt => "NON-MASKABLE INTERRUPT",
            Exception::Breakpoint => "BREAKPOINT",
            Exception::Overflow => "OVERFLOW",
            Exception::BoundRangeExceeded => "BOUND RANGE EXCEEDED",
            Exception::InvalidOpcode => "INVALID OPCODE",
            Exception::DeviceNotAvailable => "DEVICE NOT AVAILABLE",
            Exception::DoubleFault => "DOUBLE FAULT",
            Exception::InvalidTss => "INVALID TSS",
            Exception::SegmentNotPresent => "SEGMENT NOT PRESENT",
            Exception::StackSegmentFault => "STACK-SEGMENT FAULT",
            Exception::GeneralProtection => "GENERAL PROTECTION FAULT",
            Exception::PageFault => "PAGE FAULT",
            Exception::X87FloatingPoint => "x87 FLOATING POINT",
            Exception::AlignmentCheck => "ALIGNMENT CHECK",
            Exception::MachineCheck => "MACHINE CHECK",
            Exception::SimdFloatingPoint => "SIMD FLOATING POINT",
            Exception::Virtualization => "VIRTUALIZATION",
        }
    }

    /// Whether the CPU pushes an error code for this vector.
    pub const fn has_error_code(self) -> bool {
        matches!(
            self,
            Exception::DoubleFault
                | Exception::InvalidTss
                | Exception::SegmentNotPresent
                | Exception::StackSegmentFault
                | Exception::GeneralProtection
                | Exception::PageFault
                | Exception::AlignmentCheck
        )
    }

    pub const fn severity(self) -> Severity {
        match self {
            Exception::DivideError
            | Exception::InvalidOpcode
            | Exception::DoubleFault
            | Exception::MachineCheck
            | Exception::PageFault => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }
}

impl InterruptHandler for Exception {
    fn handle(&self, frame: &InterruptFrame, cx: &mut HandlerContext<'_>) {
        match self.severity() {
            Severity::Fatal => fatal(*self, frame, cx),
            Severity::Recoverable => recover(*self, frame, cx),
        }
    }
}

fn recover(exception: Exception, frame: &InterruptFrame, cx: &mut HandlerContext<'_>) {
    if exception.has_error_code() && frame.error_code != 0 {
        warn!(
            "EXCEPTION: {} (error code {:#x})\n{}",
            exception.name(),
            frame.error_code,
            frame
        );
    } else {
        warn!(
            "EXCEPTION: {} at {:#x}",
            exception.name(),
            frame.instruction_pointer
        );
    }
    cx.send_eoi(0);
}

fn fatal(exception: Exception, frame: &InterruptFrame, cx: &mut HandlerContext<'_>) -> ! {
    error!("EXCEPTION: {}", exception.name());
    if exception == Exception::PageFault {
        report_page_fault(frame, cx);
    }
    error!("{}", frame);
    error!("System halted.");
    cx.halt()
}

fn report_page_fault(frame: &InterruptFrame, cx: &HandlerContext<'_>) {
    let addr = log_fault_address(frame, cx.cpu());
    error!("{}", cx.address_space().walk(VirtAddr::new_truncate(addr)));
}

fn log_fault_address(frame: &InterruptFrame, cpu: &dyn Cpu) -> u64 {
    let addr = cpu.fault_address();
    let code = PageFaultErrorCode::from_bits_truncate(frame.error_code);
    error!("Page Fault at address {:#x}", addr);
    error!("Error Code: {:?}", code);
    addr
}

/// Report an interrupt that arrived while the kernel state was locked.
///
/// No handler can run, so only what the CPU itself holds is logged; for a
/// page fault that includes CR2. The caller halts afterwards.
pub fn report_locked_out(vector: Option<u8>, frame: &InterruptFrame, cpu: &dyn Cpu) {
    error!(
        "Interrupt {:?} at {:#x} while the kernel was locked",
        vector, frame.instruction_pointer
    );
    if vector == Some(Exception::PageFault.vector()) {
        log_fault_address(frame, cpu);
    }
    error!("{}", frame);
}
