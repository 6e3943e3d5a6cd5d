//! CSR access primitives
//!
//! One read/write/set/clear primitive per CSR, built on the `riscv`
//! crate. The scheduler and MMU manager call these; no other module may
//! touch a CSR.

use riscv::register::pmpcfgx::{Permission, Range};
use riscv::register::{mcause, mepc, mie, mstatus, mtval, pmpaddr0, pmpcfg0, satp};

/// Privilege mode selected for the next trap return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnMode {
    Machine,
    User,
}

/// Write satp with `{mode = Sv32, asid, ppn}`
pub fn satp_write(asid: u16, ppn: u32) {
    // SAFETY: the caller hands us a root-table PPN owned by the MMU
    // manager; activating it is the entire point of a context switch.
    unsafe {
        satp::set(satp::Mode::Sv32, asid as usize, ppn as usize);
    }
}

/// Read the trapping program counter
pub fn mepc_read() -> u32 {
    mepc::read() as u32
}

/// Set the program counter the next `mret` returns to
pub fn mepc_write(pc: u32) {
    mepc::write(pc as usize);
}

/// Decode mcause into (is_interrupt, exception/interrupt code)
pub fn mcause_read() -> (bool, usize) {
    let cause = mcause::read();
    (cause.is_interrupt(), cause.code())
}

/// Faulting address of the last memory exception
pub fn mtval_read() -> u32 {
    mtval::read() as u32
}

/// Unmask the machine timer interrupt
pub fn timer_irq_enable() {
    // SAFETY: setting MTIE only widens the set of deliverable interrupts.
    unsafe {
        mie::set_mtimer();
    }
}

/// Mask the machine timer interrupt
pub fn timer_irq_disable() {
    // SAFETY: clearing MTIE only narrows the set of deliverable interrupts.
    unsafe {
        mie::clear_mtimer();
    }
}

/// Unmask machine software and external interrupts (boot-time)
pub fn irq_init() {
    // SAFETY: boot-time interrupt unmasking before the first process runs.
    unsafe {
        mie::set_msoft();
        mie::set_mext();
        mie::set_mtimer();
        mstatus::set_mie();
    }
}

/// Select the privilege mode entered by the next `mret`
pub fn set_return_mode(mode: ReturnMode) {
    // SAFETY: MPP only selects the target mode of the next mret.
    unsafe {
        match mode {
            ReturnMode::Machine => mstatus::set_mpp(mstatus::MPP::Machine),
            ReturnMode::User => mstatus::set_mpp(mstatus::MPP::User),
        }
    }
}

/// Open the full physical address range to S/U mode accesses.
///
/// Without a PMP grant, instruction fetch faults as soon as translation
/// is enabled.
pub fn pmp_open() {
    pmpaddr0::write(0x4000_0000);
    // SAFETY: boot-time PMP configuration, entry 0 top-of-range RWX.
    unsafe {
        pmpcfg0::set_pmp(0, Range::TOR, Permission::RWX, false);
    }
}

/// Wait for the next interrupt
pub fn wfi() {
    riscv::asm::wfi();
}
