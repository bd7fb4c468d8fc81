//! Kernel initialization phases

use log::{error, info};

use super::status::{BootPhase, InitStatus};
use super::Kernel;
use crate::arch::{Cpu, PortIo};
use crate::interrupts::EntryPoints;
use crate::memory::{PageAllocator, PhysicalMemory};

impl<C, P, F> Kernel<C, P, F>
where
    C: Cpu,
    P: PortIo,
    F: PageAllocator + PhysicalMemory,
{
    /// Bring up paging, the IDT and the PIC, in that order. Interrupts stay
    /// disabled; [`Kernel::start`] turns them on.
    ///
    /// # Safety
    ///
    /// The IDT loaded here lives inside `self`: the kernel must not move or
    /// be dropped while interrupts can be delivered.
    pub unsafe fn init(&mut self, entry_points: &dyn EntryPoints) -> Result<(), &'static str> {
        info!("Kernel core initialization");

        self.init_phase(BootPhase::Paging, Self::init_paging)?;
        self.init_phase(BootPhase::InterruptTable, |kernel| {
            kernel.idt.initialize(entry_points);
            unsafe { kernel.idt.load(&kernel.cpu) };
            Ok(())
        })?;
        self.init_phase(BootPhase::InterruptController, Self::init_pics)?;

        info!("Kernel core initialization complete");
        Ok(())
    }

    /// Enable interrupts once every phase has completed.
    pub fn start(&mut self) -> Result<(), &'static str> {
        if !self.status.all_ready() {
            return Err("kernel not initialized");
        }
        self.cpu.enable_interrupts();
        info!("Interrupts enabled");
        Ok(())
    }

    fn init_phase(
        &mut self,
        phase: BootPhase,
        init_fn: impl FnOnce(&mut Self) -> Result<(), &'static str>,
    ) -> Result<(), &'static str> {
        self.status.update(phase, InitStatus::InProgress);
        info!(
            "[{}/{}] Initializing {}...",
            phase.index() + 1,
            BootPhase::ALL.len(),
            phase.name()
        );

        match init_fn(self) {
            Ok(()) => {
                self.status.update(phase, InitStatus::Completed);
                info!("    {} initialized", phase.name());
                Ok(())
            }
            Err(e) => {
                self.status.update(phase, InitStatus::Failed(e));
                error!("    {} failed: {}", phase.name(), e);
                Err(e)
            }
        }
    }

    fn init_paging(&mut self) -> Result<(), &'static str> {
        let root = self.paging.root();
        if self.paging.frames().table(root).is_err() {
            return Err("page table root is not accessible");
        }
        info!(
            "    root table at {:#x}, bootstrap region ends at {:#x}",
            root.start_address().as_u64(),
            self.config.bootstrap_mapped_end
        );
        info!(
            "    frame pool {:#x}..{:#x}",
            self.config.frame_pool_start, self.config.frame_pool_end
        );
        Ok(())
    }

    fn init_pics(&mut self) -> Result<(), &'static str> {
        self.pics
            .initialize(self.config.master_mask, self.config.slave_mask);
        Ok(())
    }
}
