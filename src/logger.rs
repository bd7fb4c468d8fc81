//! `log` backend writing to a 16550 UART.
//!
//! Each record becomes one `[LEVEL] message` line. On bare metal the write
//! runs with interrupts disabled so a handler that logs can never spin on a
//! port lock held by the code it interrupted.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;
use uart_16550::SerialPort;

pub const COM1: u16 = 0x3F8;

pub struct SerialLogger {
    port: Mutex<SerialPort>,
    level: LevelFilter,
}

impl SerialLogger {
    /// # Safety
    ///
    /// `base` must be the I/O base of a 16550 UART that nothing else drives.
    pub const unsafe fn new(base: u16, level: LevelFilter) -> Self {
        Self {
            port: Mutex::new(SerialPort::new(base)),
            level,
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Initialize the UART and make this the global logger.
    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        self.port.lock().init();
        log::set_logger(self)?;
        log::set_max_level(self.level);
        Ok(())
    }

    fn write_record(&self, record: &Record) {
        let mut port = self.port.lock();
        let _ = writeln!(port, "[{}] {}", record.level(), record.args());
    }
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        #[cfg(target_os = "none")]
        x86_64::instructions::interrupts::without_interrupts(|| self.write_record(record));
        #[cfg(not(target_os = "none"))]
        self.write_record(record);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn test_level_filter() {
        // Never installed, so no port I/O happens.
        let logger = unsafe { SerialLogger::new(COM1, LevelFilter::Info) };
        let at = |level| Metadata::builder().level(level).target("kcore").build();

        assert!(logger.enabled(&at(Level::Error)));
        assert!(logger.enabled(&at(Level::Info)));
        assert!(!logger.enabled(&at(Level::Debug)));
        assert!(!logger.enabled(&at(Level::Trace)));
        assert_eq!(logger.level(), LevelFilter::Info);
    }
}
