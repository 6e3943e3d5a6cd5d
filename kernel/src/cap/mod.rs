//! Capability tables
//!
//! The hardware capability set the kernel consumes is the [`Earth`]
//! trait: one implementation ([`boot::BootEarth`]) wires it to the real
//! devices and MMU at boot, and the test suites substitute mocks. The
//! in-memory function-pointer tables user code calls through live in
//! [`table`] and are installed at the fixed bases of the memory map.

pub mod boot;
pub mod table;

use crate::error::KernelResult;
use crate::loader::SegmentTable;
use crate::mm::Page;
use crate::process::Pid;
use crate::syscall::abi::SyscallBlock;

/// Privilege mode a process returns to user space in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Kernel-service processes (proc, file, dir, shell)
    Kernel,
    /// User applications
    User,
}

/// What the external-interrupt fan-out observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalEvent {
    None,
    /// Ctrl-C arrived on the terminal: terminate the current user process
    KillRequest,
}

/// The hardware capability set.
///
/// Exactly the operations the process/IPC kernel needs from the earth
/// layer; resolved once at boot, never per call.
pub trait Earth {
    /* timer */
    fn timer_enable(&mut self);
    fn timer_disable(&mut self);
    fn timer_reset(&mut self);

    /// Sleep until an interrupt with the timer masked, then service the
    /// external-interrupt fan-out.
    fn wait_for_interrupt(&mut self) -> KernelResult<ExternalEvent>;

    /// Acknowledge a software interrupt (syscall trap).
    fn clear_soft_interrupt(&mut self);

    /* mmu */
    fn mmu_alloc(&mut self, pid: Pid) -> KernelResult<()>;
    fn mmu_map(&mut self, pid: Pid, vaddr: u32) -> KernelResult<u32>;
    fn mmu_switch(&mut self, pid: Pid);
    fn mmu_free(&mut self, pid: Pid);

    /// The frame backing `vaddr` in `pid`'s space (creating the mapping
    /// if absent). Kernel-side loading and argument passing go through
    /// this; it never hands out device memory.
    fn user_page(&mut self, pid: Pid, vaddr: u32) -> KernelResult<&mut Page>;

    /// The caller's shared syscall page. Contract: `pid`'s address space
    /// is the active one (the scheduler switches before retrying a
    /// pending syscall).
    fn syscall_block(&mut self, pid: Pid) -> KernelResult<&mut SyscallBlock>;

    /* devices */
    fn disk_read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()>;
    fn disk_write(&mut self, block_no: u32, nblocks: u32, src: &[u8]) -> KernelResult<()>;
    fn tty_read(&mut self) -> Option<u8>;
    fn tty_write(&mut self, buf: &[u8]);

    /// Claim and dispatch pending external interrupts.
    fn trap_external(&mut self) -> KernelResult<ExternalEvent>;

    /* loading */
    /// Serve a page fault against `pid`'s segment table.
    fn loader_fault(&mut self, pid: Pid, segtbl: &SegmentTable, vaddr: u32) -> KernelResult<()>;

    /* privilege */
    fn set_return_privilege(&mut self, privilege: Privilege);
}
