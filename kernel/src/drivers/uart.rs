//! UART console
//!
//! Byte-level terminal access for the TTY syscalls plus the boot logger
//! behind the `log` facade. Line discipline, echo and escape handling
//! belong to the shell, not here. The one in-band control byte this layer
//! knows about is Ctrl-C, which the external-interrupt path reports as a
//! kill event.

/// The interrupt byte (Ctrl-C)
pub const ETX: u8 = 0x03;

/// A byte-level terminal.
pub trait Console {
    /// Pop one received byte, if any.
    fn try_getc(&mut self) -> Option<u8>;

    /// Transmit one byte, spinning while the device is full.
    fn putc(&mut self, byte: u8);

    fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.putc(byte);
        }
    }
}

/// SiFive-style memory-mapped UART.
#[cfg(target_arch = "riscv32")]
pub struct MmioUart {
    base: usize,
}

#[cfg(target_arch = "riscv32")]
impl MmioUart {
    const TXDATA: usize = 0x00;
    const RXDATA: usize = 0x04;
    const TXCTRL: usize = 0x08;
    const RXCTRL: usize = 0x0C;
    const IE: usize = 0x10;

    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    fn reg(&self, offset: usize) -> *mut u32 {
        (self.base + offset) as *mut u32
    }

    /// Enable TX/RX channels and the receive interrupt.
    pub fn init(&mut self) {
        // SAFETY: MMIO registers inside the controller's window.
        unsafe {
            core::ptr::write_volatile(self.reg(Self::TXCTRL), 1);
            core::ptr::write_volatile(self.reg(Self::RXCTRL), 1);
            core::ptr::write_volatile(self.reg(Self::IE), 2);
        }
    }
}

#[cfg(target_arch = "riscv32")]
impl Console for MmioUart {
    fn try_getc(&mut self) -> Option<u8> {
        // SAFETY: RXDATA read; bit 31 flags an empty FIFO.
        let rxdata = unsafe { core::ptr::read_volatile(self.reg(Self::RXDATA)) };
        if rxdata & (1 << 31) != 0 {
            None
        } else {
            Some((rxdata & 0xFF) as u8)
        }
    }

    fn putc(&mut self, byte: u8) {
        // SAFETY: TXDATA poll-then-write; bit 31 flags a full FIFO.
        unsafe {
            while core::ptr::read_volatile(self.reg(Self::TXDATA)) & (1 << 31) != 0 {}
            core::ptr::write_volatile(self.reg(Self::TXDATA), byte as u32);
        }
    }
}

/// `log` backend writing formatted records to the boot UART.
#[cfg(target_arch = "riscv32")]
pub mod logger {
    use core::fmt::Write;

    use spin::Mutex;

    use super::{Console, MmioUart};

    struct UartLogger {
        uart: Mutex<MmioUart>,
    }

    struct Sink<'a>(&'a mut MmioUart);

    impl core::fmt::Write for Sink<'_> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            for byte in s.bytes() {
                if byte == b'\n' {
                    self.0.putc(b'\r');
                }
                self.0.putc(byte);
            }
            Ok(())
        }
    }

    impl log::Log for UartLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            let mut uart = self.uart.lock();
            let _ = writeln!(Sink(&mut uart), "[{:5}] {}", record.level(), record.args());
        }

        fn flush(&self) {}
    }

    static LOGGER: spin::Once<UartLogger> = spin::Once::new();

    /// Install the UART logger; `uart` must already be initialized.
    pub fn init(uart: MmioUart, level: log::LevelFilter) {
        let logger = LOGGER.call_once(|| UartLogger {
            uart: Mutex::new(uart),
        });
        if log::set_logger(logger).is_ok() {
            log::set_max_level(level);
        }
    }
}
