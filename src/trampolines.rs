//! CPU-facing interrupt entry points.
//!
//! Each stub captures the stack frame, then hands the vector to the kernel
//! under its lock. The addresses are what the IDT stores.

use kcore::arch::x86::X86Cpu;
use kcore::interrupts::faults::report_locked_out;
use kcore::interrupts::{EntryPoints, Exception, InterruptFrame, InterruptIndex};
use log::error;
use x86_64::structures::idt::InterruptStackFrame;

use crate::boot::{halt, KERNEL};

fn capture(stack_frame: &InterruptStackFrame, error_code: u64) -> InterruptFrame {
    InterruptFrame {
        error_code,
        instruction_pointer: stack_frame.instruction_pointer.as_u64(),
        code_segment: u64::from(stack_frame.code_segment.0),
        cpu_flags: stack_frame.cpu_flags.bits(),
        stack_pointer: stack_frame.stack_pointer.as_u64(),
        stack_segment: u64::from(stack_frame.stack_segment.0),
    }
}

fn dispatch(vector: Option<u8>, frame: InterruptFrame) {
    let Some(kernel) = KERNEL.get() else {
        error!("Interrupt {:?} before the kernel was set up", vector);
        halt();
    };
    // Normal code only locks through `with_kernel`, so contention here means
    // an exception inside a locked section.
    let Some(mut kernel) = kernel.try_lock() else {
        report_locked_out(vector, &frame, &unsafe { X86Cpu::new() });
        halt();
    };
    match vector {
        Some(vector) => kernel.dispatch(vector, &frame),
        None => kernel.dispatch_unhandled(&frame),
    }
}

macro_rules! stubs {
    ($($name:ident => $vector:expr),* $(,)?) => {
        $(
            extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame) {
                dispatch(Some($vector), capture(&stack_frame, 0));
            }
        )*
    };
}

macro_rules! stubs_with_error_code {
    ($($name:ident => $vector:expr),* $(,)?) => {
        $(
            extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame, error_code: u64) {
                dispatch(Some($vector), capture(&stack_frame, error_code));
            }
        )*
    };
}

extern "x86-interrupt" fn unhandled(stack_frame: InterruptStackFrame) {
    dispatch(None, capture(&stack_frame, 0));
}

/// Catch-all for the reserved vectors that push an error code.
extern "x86-interrupt" fn unhandled_with_error_code(stack_frame: InterruptStackFrame, error_code: u64) {
    dispatch(None, capture(&stack_frame, error_code));
}

stubs! {
    divide_error => 0,
    debug => 1,
    non_maskable_interrupt => 2,
    breakpoint => 3,
    overflow => 4,
    bound_range_exceeded => 5,
    invalid_opcode => 6,
    device_not_available => 7,
    x87_floating_point => 16,
    machine_check => 18,
    simd_floating_point => 19,
    virtualization => 20,
}

stubs_with_error_code! {
    double_fault => 8,
    invalid_tss => 10,
    segment_not_present => 11,
    stack_segment_fault => 12,
    general_protection => 13,
    page_fault => 14,
    alignment_check => 17,
}

stubs! {
    irq0 => 32, irq1 => 33, irq2 => 34, irq3 => 35,
    irq4 => 36, irq5 => 37, irq6 => 38, irq7 => 39,
    irq8 => 40, irq9 => 41, irq10 => 42, irq11 => 43,
    irq12 => 44, irq13 => 45, irq14 => 46, irq15 => 47,
}

pub struct Trampolines;

impl EntryPoints for Trampolines {
    fn unhandled(&self) -> u64 {
        unhandled as usize as u64
    }

    fn unhandled_with_error_code(&self) -> u64 {
        unhandled_with_error_code as usize as u64
    }

    fn exception(&self, exception: Exception) -> u64 {
        let stub = match exception {
            Exception::DivideError => divide_error as usize,
            Exception::Debug => debug as usize,
            Exception::NonMaskableInterrupt => non_maskable_interrupt as usize,
            Exception::Breakpoint => breakpoint as usize,
            Exception::Overflow => overflow as usize,
            Exception::BoundRangeExceeded => bound_range_exceeded as usize,
            Exception::InvalidOpcode => invalid_opcode as usize,
            Exception::DeviceNotAvailable => device_not_available as usize,
            Exception::DoubleFault => double_fault as usize,
            Exception::InvalidTss => invalid_tss as usize,
            Exception::SegmentNotPresent => segment_not_present as usize,
            Exception::StackSegmentFault => stack_segment_fault as usize,
            Exception::GeneralProtection => general_protection as usize,
            Exception::PageFault => page_fault as usize,
            Exception::X87FloatingPoint => x87_floating_point as usize,
            Exception::AlignmentCheck => alignment_check as usize,
            Exception::MachineCheck => machine_check as usize,
            Exception::SimdFloatingPoint => simd_floating_point as usize,
            Exception::Virtualization => virtualization as usize,
        };
        stub as u64
    }

    fn irq(&self, irq: InterruptIndex) -> u64 {
        let stub = match irq {
            InterruptIndex::Timer => irq0 as usize,
            InterruptIndex::Keyboard => irq1 as usize,
            InterruptIndex::Cascade => irq2 as usize,
            InterruptIndex::Com2 => irq3 as usize,
            InterruptIndex::Com1 => irq4 as usize,
            InterruptIndex::Lpt2 => irq5 as usize,
            InterruptIndex::Floppy => irq6 as usize,
            InterruptIndex::Lpt1 => irq7 as usize,
            InterruptIndex::Rtc => irq8 as usize,
            InterruptIndex::Irq9 => irq9 as usize,
            InterruptIndex::Irq10 => irq10 as usize,
            InterruptIndex::Irq11 => irq11 as usize,
            InterruptIndex::Mouse => irq12 as usize,
            InterruptIndex::Coprocessor => irq13 as usize,
            InterruptIndex::PrimaryAta => irq14 as usize,
            InterruptIndex::SecondaryAta => irq15 as usize,
        };
        stub as u64
    }
}
