use bootloader_api::config::{BootloaderConfig, Mapping};
use bootloader_api::info::MemoryRegionKind;
use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;
use kcore::arch::x86::{X86Cpu, X86Ports};
use kcore::arch::Cpu;
use kcore::interrupts::guard;
use kcore::logger::{SerialLogger, COM1};
use kcore::memory::BootFrames;
use kcore::{Kernel, KernelConfig};
use log::{error, info, LevelFilter};
use spin::{Mutex, Once};

use crate::trampolines::Trampolines;

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

pub type BootKernel = Kernel<X86Cpu, X86Ports, BootFrames>;

/// Written once during boot; afterwards only interrupt context locks it.
pub static KERNEL: Once<Mutex<BootKernel>> = Once::new();

static LOGGER: SerialLogger = unsafe { SerialLogger::new(COM1, LevelFilter::Info) };

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    if LOGGER.install().is_err() {
        halt();
    }

    let config = match boot_config(boot_info) {
        Ok(config) => config,
        Err(e) => {
            error!("Boot failed: {}", e);
            halt();
        }
    };

    let frames = unsafe {
        BootFrames::new(
            config.physical_memory_offset,
            config.frame_pool_start,
            config.frame_pool_end,
        )
    };
    KERNEL.call_once(|| {
        let cpu = unsafe { X86Cpu::new() };
        let ports = unsafe { X86Ports::new() };
        Mutex::new(Kernel::new(config, cpu, ports, frames))
    });

    // The kernel sits in a static from here on and never moves.
    match with_kernel(|kernel| unsafe { kernel.init(&Trampolines) }) {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            error!("Kernel initialization failed: {}", e);
            halt();
        }
        None => halt(),
    }

    // Interrupts come on only once the lock is free, since every
    // trampoline takes it.
    unsafe { X86Cpu::new() }.enable_interrupts();
    info!("Interrupts enabled, idling");

    loop {
        x86_64::instructions::hlt();
    }
}

/// Frame pool = the largest usable region, above the bootstrap area.
fn boot_config(boot_info: &BootInfo) -> Result<KernelConfig, &'static str> {
    let offset = boot_info
        .physical_memory_offset
        .into_option()
        .ok_or("bootloader did not map physical memory")?;

    let mut largest_region_start = 0u64;
    let mut largest_region_size = 0u64;

    for region in boot_info.memory_regions.iter() {
        if region.kind == MemoryRegionKind::Usable {
            let size = region.end - region.start;
            if size > largest_region_size {
                largest_region_start = region.start;
                largest_region_size = size;
            }
        }
    }

    if largest_region_size == 0 {
        return Err("No usable memory found");
    }

    let defaults = KernelConfig::DEFAULT;
    let pool_start = largest_region_start.max(defaults.frame_pool_start);
    let pool_end = largest_region_start + largest_region_size;
    if pool_start >= pool_end {
        return Err("No usable memory above the bootstrap region");
    }

    info!(
        "Physical memory at {:#x}, frame pool {:#x}..{:#x}",
        offset, pool_start, pool_end
    );
    Ok(defaults
        .with_frame_pool(pool_start, pool_end)
        .with_physical_memory_offset(offset))
}

/// Run `f` on the kernel with interrupts disabled for as long as the lock
/// is held. Every access outside interrupt context goes through here.
pub fn with_kernel<R>(f: impl FnOnce(&mut BootKernel) -> R) -> Option<R> {
    let kernel = KERNEL.get()?;
    let cpu = unsafe { X86Cpu::new() };
    Some(guard::lock_without_interrupts(&cpu, kernel, f))
}

pub fn halt() -> ! {
    let cpu = unsafe { X86Cpu::new() };
    cpu.disable_interrupts();
    cpu.halt_forever()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();
    error!("PANIC : {}", info);
    halt()
}
