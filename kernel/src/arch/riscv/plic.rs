//! PLIC claim/complete and source enabling

const PLIC_BASE: usize = 0x0C00_0000;
const PLIC_PRIORITY: usize = 0x0;
const PLIC_ENABLES: usize = 0x2080;
const PLIC_THRESHOLD: usize = 0x20_1000;
const PLIC_CLAIM: usize = 0x20_1004;

/// Interrupt source id of the UART
pub const UART_IRQ: u32 = 4;

/// Interrupt source id of the SPI controller
pub const SPI_IRQ: u32 = 6;

fn reg(offset: usize) -> *mut u32 {
    (PLIC_BASE + offset) as *mut u32
}

/// Give `id` a non-zero priority and enable it for hart 0
pub fn enable(id: u32) {
    // SAFETY: PLIC priority/enable registers for a valid source id.
    unsafe {
        let prio = reg(PLIC_PRIORITY + 4 * id as usize);
        core::ptr::write_volatile(prio, core::ptr::read_volatile(prio) | 1);
        let en = reg(PLIC_ENABLES);
        core::ptr::write_volatile(en, core::ptr::read_volatile(en) | (1 << id));
    }
}

/// Accept interrupts of any priority
pub fn init() {
    // SAFETY: threshold register of hart 0.
    unsafe {
        core::ptr::write_volatile(reg(PLIC_THRESHOLD), 0);
    }
    enable(UART_IRQ);
    enable(SPI_IRQ);
}

/// Claim the highest-priority pending source (0 when none)
pub fn claim() -> u32 {
    // SAFETY: claim register read has claim side effect, which is intended.
    unsafe { core::ptr::read_volatile(reg(PLIC_CLAIM)) }
}

/// Signal completion of a claimed source
pub fn complete(id: u32) {
    // SAFETY: completion write for the id we claimed.
    unsafe {
        core::ptr::write_volatile(reg(PLIC_CLAIM) as *mut u32, id);
    }
}
