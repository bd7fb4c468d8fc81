use spin::Mutex;

use crate::arch::Cpu;

/// Disables interrupts for its lifetime and puts the interrupt flag back
/// the way it found it on drop, so guards nest.
pub struct InterruptGuard<'a, C: Cpu + ?Sized> {
    cpu: &'a C,
    was_enabled: bool,
}

impl<'a, C: Cpu + ?Sized> InterruptGuard<'a, C> {
    pub fn new(cpu: &'a C) -> Self {
        let was_enabled = cpu.interrupts_enabled();
        if was_enabled {
            cpu.disable_interrupts();
        }
        Self { cpu, was_enabled }
    }

    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl<C: Cpu + ?Sized> Drop for InterruptGuard<'_, C> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.cpu.enable_interrupts();
        }
    }
}

/// Run `f` with interrupts disabled.
pub fn without_interrupts<C, F, R>(cpu: &C, f: F) -> R
where
    C: Cpu + ?Sized,
    F: FnOnce() -> R,
{
    let _guard = InterruptGuard::new(cpu);
    f()
}

/// Lock `lock` with interrupts disabled and run `f` on the data.
///
/// Interrupt handlers take the same lock, so it must never be held with
/// interrupts enabled. The lock is released before the flag is restored.
pub fn lock_without_interrupts<C, T, F, R>(cpu: &C, lock: &Mutex<T>, f: F) -> R
where
    C: Cpu + ?Sized,
    T: ?Sized,
    F: FnOnce(&mut T) -> R,
{
    without_interrupts(cpu, || f(&mut lock.lock()))
}
