//! # Kernel Context
//!
//! [`Kernel`] owns every piece of mutable kernel state: the IDT, the PIC
//! driver, the handler table and the page table manager. The boot code
//! keeps one in a static; tests build as many as they like.
//!
//! ## Boot order
//!
//! ```text
//! Kernel::new ─▶ init: paging ─▶ IDT ─▶ PIC ─▶ start: sti
//! ```
//!
//! ## Interrupt path
//!
//! ```text
//! CPU ─▶ IDT entry ─▶ trampoline ─▶ Kernel::dispatch ─▶ InterruptHandler
//! ```

pub mod init;
pub mod status;

use x86_64::structures::paging::{PageTableFlags, PhysFrame};
use x86_64::{PhysAddr, VirtAddr};

use crate::arch::{Cpu, PortIo};
use crate::config::KernelConfig;
use crate::interrupts::guard::{self, InterruptGuard};
use crate::interrupts::{
    ChainedPics, GateAttributes, HandlerContext, HandlerTable, Idt, InterruptFrame,
    InterruptHandler, UnhandledInterrupt,
};
use crate::memory::{MapError, MemoryError, PageAllocator, PageTableManager, PhysicalMemory};

pub use status::{BootPhase, BootStatus, ComponentStatus, InitStatus};

pub struct Kernel<C, P, F> {
    config: KernelConfig,
    cpu: C,
    idt: Idt,
    pics: ChainedPics<P>,
    handlers: HandlerTable,
    paging: PageTableManager<F>,
    status: BootStatus,
}

impl<C, P, F> Kernel<C, P, F>
where
    C: Cpu,
    P: PortIo,
    F: PageAllocator + PhysicalMemory,
{
    /// Take over the page table hierarchy the CPU is currently using.
    pub fn new(config: KernelConfig, cpu: C, ports: P, frames: F) -> Self {
        let root = cpu.page_table_root();
        Self {
            config,
            idt: Idt::new(),
            pics: ChainedPics::new(ports),
            handlers: HandlerTable::with_defaults(),
            paging: PageTableManager::new(frames, root, config.bootstrap_mapped_end),
            status: BootStatus::new(),
            cpu,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    pub fn idt(&self) -> &Idt {
        &self.idt
    }

    pub fn pics(&mut self) -> &mut ChainedPics<P> {
        &mut self.pics
    }

    pub fn paging(&self) -> &PageTableManager<F> {
        &self.paging
    }

    pub fn status(&self) -> &BootStatus {
        &self.status
    }

    // ========================================================================
    // INTERRUPTS
    // ========================================================================

    /// Bind `handler` to `vector`; the previous handler is returned.
    pub fn register_handler(
        &mut self,
        vector: u8,
        handler: &'static dyn InterruptHandler,
    ) -> &'static dyn InterruptHandler {
        let _guard = InterruptGuard::new(&self.cpu);
        self.handlers.register(vector, handler)
    }

    /// Point an IDT entry at a different entry trampoline.
    pub fn set_entry(&mut self, vector: u8, handler: u64, attributes: GateAttributes) {
        let _guard = InterruptGuard::new(&self.cpu);
        self.idt.set_entry(vector, handler, attributes);
    }

    /// Run the handler bound to `vector`. Called from interrupt context.
    pub fn dispatch(&mut self, vector: u8, frame: &InterruptFrame) {
        let mut cx = HandlerContext::new(Some(vector), &mut self.pics, &self.cpu, &self.paging);
        self.handlers.dispatch(vector, frame, &mut cx);
    }

    /// Entry for the catch-all trampoline, which cannot know its vector.
    pub fn dispatch_unhandled(&mut self, frame: &InterruptFrame) {
        let mut cx = HandlerContext::new(None, &mut self.pics, &self.cpu, &self.paging);
        UnhandledInterrupt.handle(frame, &mut cx);
    }

    pub fn enable_interrupts(&self) {
        self.cpu.enable_interrupts();
    }

    pub fn disable_interrupts(&self) {
        self.cpu.disable_interrupts();
    }

    pub fn without_interrupts<R>(&self, f: impl FnOnce() -> R) -> R {
        guard::without_interrupts(&self.cpu, f)
    }

    // ========================================================================
    // MEMORY
    // ========================================================================

    pub fn alloc_page(&mut self) -> Result<PhysFrame, MemoryError> {
        self.paging.frames_mut().alloc_page()
    }

    pub fn free_page(&mut self, frame: PhysFrame) {
        self.paging.frames_mut().free_page(frame);
    }

    pub fn map(&mut self, phys: PhysAddr, virt: VirtAddr, flags: PageTableFlags) -> Result<(), MapError> {
        self.paging.map(phys, virt, flags)?;
        if virt.as_u64() >= self.config.bootstrap_mapped_end {
            self.cpu.flush_page(virt);
        }
        Ok(())
    }

    pub fn unmap(&mut self, virt: VirtAddr) -> Option<PhysAddr> {
        let previous = self.paging.unmap(virt);
        if previous.is_some() {
            self.cpu.flush_page(virt);
        }
        previous
    }

    pub fn is_mapped(&self, virt: VirtAddr) -> bool {
        self.paging.is_mapped(virt)
    }

    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        self.paging.translate(virt)
    }
}
