//! Byte-serial SPI bus
//!
//! The SD state machine is written against this trait so the driver can be
//! exercised with a scripted bus in tests and with the FE310-style MMIO
//! controller on hardware.

/// A byte-at-a-time SPI controller with TX/RX FIFOs.
pub trait SpiBus {
    /// Push one byte into the TX FIFO; `false` when the FIFO is full.
    fn try_send(&mut self, byte: u8) -> bool;

    /// Pop one byte from the RX FIFO, if any.
    fn try_recv(&mut self) -> Option<u8>;

    /// Outstanding-byte window the interrupt handler may keep in flight.
    fn queue_size(&self) -> u32 {
        8
    }

    /// Spin until `byte` is accepted.
    fn busy_send(&mut self, byte: u8) {
        while !self.try_send(byte) {}
    }

    /// Spin until a byte arrives.
    fn busy_recv(&mut self) -> u8 {
        loop {
            if let Some(byte) = self.try_recv() {
                return byte;
            }
        }
    }

    /// Clock one byte out and one byte in.
    fn busy_exchange(&mut self, byte: u8) -> u8 {
        self.busy_send(byte);
        self.busy_recv()
    }
}

/// FE310-style memory-mapped SPI controller.
#[cfg(target_arch = "riscv32")]
pub struct MmioSpi {
    base: usize,
}

#[cfg(target_arch = "riscv32")]
impl MmioSpi {
    const SCKDIV: usize = 0x00;
    const CSDEF: usize = 0x14;
    const CSMODE: usize = 0x18;
    const TXDATA: usize = 0x48;
    const RXDATA: usize = 0x4C;
    const RXMARK: usize = 0x54;
    const FCTRL: usize = 0x60;
    const IE: usize = 0x70;

    /// CPU clock used to derive SPI baud dividers.
    const CPU_CLOCK_RATE: u32 = 65_000_000;

    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    fn reg(&self, offset: usize) -> *mut u32 {
        (self.base + offset) as *mut u32
    }

    fn write_reg(&mut self, offset: usize, value: u32) {
        // SAFETY: MMIO register inside the controller's window.
        unsafe { core::ptr::write_volatile(self.reg(offset), value) }
    }

    fn read_reg(&self, offset: usize) -> u32 {
        // SAFETY: MMIO register inside the controller's window.
        unsafe { core::ptr::read_volatile(self.reg(offset)) }
    }

    /// Program the serial clock divider for `baud_rate`.
    pub fn set_clock(&mut self, baud_rate: u32) {
        let div = Self::CPU_CLOCK_RATE / (2 * baud_rate) - 1;
        self.write_reg(Self::SCKDIV, div & 0xFFF);
    }

    /// One-time controller bring-up: slow clock, hardware chip-select off,
    /// RX watermark for interrupts.
    pub fn init(&mut self) {
        self.set_clock(100_000);
        self.write_reg(Self::CSMODE, 1);
        self.write_reg(Self::CSDEF, 0);
        self.write_reg(Self::FCTRL, 0);
        self.write_reg(Self::IE, 2);
        self.write_reg(Self::RXMARK, 4);
    }

    /// Drive the chip-select default level (used by the power-up dance).
    pub fn set_cs_default(&mut self, level: u32) {
        self.write_reg(Self::CSDEF, level);
    }
}

#[cfg(target_arch = "riscv32")]
impl SpiBus for MmioSpi {
    fn try_send(&mut self, byte: u8) -> bool {
        if self.read_reg(Self::TXDATA) & (1 << 31) != 0 {
            return false;
        }
        self.write_reg(Self::TXDATA, byte as u32);
        true
    }

    fn try_recv(&mut self) -> Option<u8> {
        let rxdata = self.read_reg(Self::RXDATA);
        if rxdata & (1 << 31) != 0 {
            None
        } else {
            Some((rxdata & 0xFF) as u8)
        }
    }
}
