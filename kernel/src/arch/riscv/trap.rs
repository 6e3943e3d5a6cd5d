//! Trap vector and register save area
//!
//! The vector spills the general-purpose register file (minus x0) into a
//! fixed save area, switches to the kernel boot stack and calls the
//! registered kernel entry with the decoded mcause. The kernel copies the
//! save area into the trapping process's descriptor and, after choosing
//! the next process, writes that descriptor's file back here before the
//! vector restores it and executes `mret`.

use core::arch::global_asm;

use spin::Once;

use super::csr;
use crate::layout::OS_STACK_TOP;

/// General-purpose registers x1..x31
pub const NREGS: usize = 31;

#[no_mangle]
static mut TRAP_REGS: [u32; NREGS] = [0; NREGS];

static KERNEL_ENTRY: Once<fn(bool, usize)> = Once::new();

global_asm!(
    r#"
    .section .text
    .align 4
    .globl __trap_vector
__trap_vector:
    csrw mscratch, t0
    la   t0, TRAP_REGS
    sw   x1,   0(t0)
    sw   x2,   4(t0)
    sw   x3,   8(t0)
    sw   x4,  12(t0)
    sw   x6,  20(t0)
    sw   x7,  24(t0)
    sw   x8,  28(t0)
    sw   x9,  32(t0)
    sw   x10, 36(t0)
    sw   x11, 40(t0)
    sw   x12, 44(t0)
    sw   x13, 48(t0)
    sw   x14, 52(t0)
    sw   x15, 56(t0)
    sw   x16, 60(t0)
    sw   x17, 64(t0)
    sw   x18, 68(t0)
    sw   x19, 72(t0)
    sw   x20, 76(t0)
    sw   x21, 80(t0)
    sw   x22, 84(t0)
    sw   x23, 88(t0)
    sw   x24, 92(t0)
    sw   x25, 96(t0)
    sw   x26, 100(t0)
    sw   x27, 104(t0)
    sw   x28, 108(t0)
    sw   x29, 112(t0)
    sw   x30, 116(t0)
    sw   x31, 120(t0)
    csrr x6, mscratch
    sw   x6,  16(t0)
    li   sp, {stack_top}
    call {entry}
    .globl __trap_restore
__trap_restore:
    la   x5, TRAP_REGS
    lw   x1,   0(x5)
    lw   x2,   4(x5)
    lw   x3,   8(x5)
    lw   x4,  12(x5)
    lw   x6,  20(x5)
    lw   x7,  24(x5)
    lw   x8,  28(x5)
    lw   x9,  32(x5)
    lw   x10, 36(x5)
    lw   x11, 40(x5)
    lw   x12, 44(x5)
    lw   x13, 48(x5)
    lw   x14, 52(x5)
    lw   x15, 56(x5)
    lw   x16, 60(x5)
    lw   x17, 64(x5)
    lw   x18, 68(x5)
    lw   x19, 72(x5)
    lw   x20, 76(x5)
    lw   x21, 80(x5)
    lw   x22, 84(x5)
    lw   x23, 88(x5)
    lw   x24, 92(x5)
    lw   x25, 96(x5)
    lw   x26, 100(x5)
    lw   x27, 104(x5)
    lw   x28, 108(x5)
    lw   x29, 112(x5)
    lw   x30, 116(x5)
    lw   x31, 120(x5)
    lw   x5,  16(x5)
    mret
"#,
    stack_top = const OS_STACK_TOP,
    entry = sym trap_entry,
);

extern "C" fn trap_entry() {
    let (is_interrupt, code) = csr::mcause_read();
    if let Some(entry) = KERNEL_ENTRY.get() {
        entry(is_interrupt, code);
    }
}

/// Install the kernel entry and point mtvec at the vector
pub fn init(entry: fn(bool, usize)) {
    KERNEL_ENTRY.call_once(|| entry);

    extern "C" {
        fn __trap_vector();
    }
    // SAFETY: direct-mode vector; the symbol is 4-aligned by the asm above.
    unsafe {
        riscv::register::mtvec::write(
            __trap_vector as usize,
            riscv::register::mtvec::TrapMode::Direct,
        );
    }
}

/// The register file spilled by the last trap
pub fn saved_regs() -> &'static mut [u32; NREGS] {
    // SAFETY: single-hart kernel; the save area is only touched between a
    // trap entry and the matching mret, with interrupts masked.
    unsafe { &mut *core::ptr::addr_of_mut!(TRAP_REGS) }
}

/// First dispatch: load a register file and `mret` through the restore
/// half of the trap vector.
pub fn enter(pc: u32, regs: &[u32; NREGS]) -> ! {
    *saved_regs() = *regs;
    super::csr::mepc_write(pc);

    extern "C" {
        fn __trap_restore() -> !;
    }
    // SAFETY: the restore path reloads every register from the save area
    // we just filled and executes mret to the pc we just set.
    unsafe { __trap_restore() }
}
