//! Process descriptors

use crate::layout::STACK_VTOP;
use crate::loader::SegmentTable;
use crate::syscall::abi::SyscallKind;

/// Process identifier.
///
/// Small, monotonically increasing. Distinguished values: [`GPID_ALL`]
/// is the receive-filter and free wildcard, [`GPID_UNUSED`] the parent of
/// the first kernel process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub i32);

/// Wildcard: any sender / all user processes
pub const GPID_ALL: Pid = Pid(-1);

/// Parent of the first kernel process; also "no owner"
pub const GPID_UNUSED: Pid = Pid(0);

/// The process server
pub const GPID_PROCESS: Pid = Pid(1);

/// The file server
pub const GPID_FILE: Pid = Pid(2);

/// The directory server
pub const GPID_DIR: Pid = Pid(3);

/// The shell
pub const GPID_SHELL: Pid = Pid(4);

/// First pid handed to user applications
pub const GPID_USER_START: Pid = Pid(5);

impl Pid {
    pub const UNUSED: Pid = GPID_UNUSED;

    /// User application, as opposed to a kernel-service process.
    pub fn is_user(&self) -> bool {
        *self >= GPID_USER_START
    }

    /// The timer may preempt the shell and user apps; servers below the
    /// shell run their trap-free spans to completion.
    pub fn is_preemptible(&self) -> bool {
        *self >= GPID_SHELL
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcStatus {
    /// Slot empty
    Unused,
    /// Allocated, ELF image not yet in place
    Loading,
    /// Loaded, never dispatched
    Ready,
    /// The one currently executing process
    Running,
    /// Preempted, ready to continue
    Runnable,
    /// Blocked in a syscall, retried on scheduler visits
    Pending,
    /// Exited, waiting for the parent to reap
    Zombie,
}

/// General-purpose registers x1..x31
pub const NREGS: usize = 31;

/// Index of `sp` in [`TrapFrame::regs`]
pub const REG_SP: usize = 1;

/// Index of `a0`
pub const REG_A0: usize = 9;

/// Index of `a1`
pub const REG_A1: usize = 10;

/// Saved execution context: program counter plus the register file minus
/// the zero register.
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub pc: u32,
    pub regs: [u32; NREGS],
}

impl TrapFrame {
    pub const fn zeroed() -> Self {
        Self {
            pc: 0,
            regs: [0; NREGS],
        }
    }
}

/// One process-table slot.
pub struct Process {
    pub pid: Pid,
    pub parent: Pid,
    pub status: ProcStatus,
    pub frame: TrapFrame,
    /// What op this process is blocked on while `Pending`
    pub pending_syscall: SyscallKind,
    /// Sender this process will take a message from (`GPID_ALL` for any)
    pub receive_from: Pid,
    /// Redirect-to-exit action armed by the Ctrl-C path; consumed at the
    /// next scheduler visit instead of returning to the process
    pub kill_pending: bool,
    /// argc seeded into `a0` on first dispatch
    pub argc: u32,
    /// Segment table registered at load time
    pub segtbl: Option<SegmentTable>,
}

impl Process {
    pub fn vacant() -> Self {
        Self {
            pid: GPID_UNUSED,
            parent: GPID_UNUSED,
            status: ProcStatus::Unused,
            frame: TrapFrame::zeroed(),
            pending_syscall: SyscallKind::Unused,
            receive_from: GPID_ALL,
            kill_pending: false,
            argc: 0,
            segtbl: None,
        }
    }

    /// Reset for a fresh allocation.
    pub fn recycle(&mut self, pid: Pid, parent: Pid) {
        *self = Self::vacant();
        self.pid = pid;
        self.parent = parent;
        self.status = ProcStatus::Loading;
    }

    /// First-dispatch register seeding: entry point, top of stack, argc
    /// in `a0` and the argument page in `a1`.
    pub fn seed_entry(&mut self, entry: u32, argv_base: u32) {
        self.frame.pc = entry;
        self.frame.regs[REG_SP] = STACK_VTOP;
        self.frame.regs[REG_A0] = self.argc;
        self.frame.regs[REG_A1] = argv_base;
    }
}
