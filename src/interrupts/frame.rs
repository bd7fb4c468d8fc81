use core::fmt;

/// Execution context saved by the CPU when an interrupt was delivered.
///
/// Built by the entry trampoline and lent to the handler; never kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct InterruptFrame {
    /// 0 for vectors that push no error code.
    pub error_code: u64,
    pub instruction_pointer: u64,
    pub code_segment: u64,
    pub cpu_flags: u64,
    pub stack_pointer: u64,
    pub stack_segment: u64,
}

impl fmt::Display for InterruptFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  error code: {:#x}", self.error_code)?;
        writeln!(f, "  RIP: {:#018x}  CS: {:#06x}", self.instruction_pointer, self.code_segment)?;
        writeln!(f, "  RFLAGS: {:#018x}", self.cpu_flags)?;
        write!(f, "  RSP: {:#018x}  SS: {:#06x}", self.stack_pointer, self.stack_segment)
    }
}
