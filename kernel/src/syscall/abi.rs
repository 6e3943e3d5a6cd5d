//! Syscall ABI
//!
//! The shared page at `SYSCALL_VARG` carries one in-flight syscall per
//! process: the type tag, the message area, the argument area and the
//! return value. User code fills it, traps, and spins until the kernel
//! resets the tag to `Unused`. Everything travels by value through this
//! page; no syscall carries a cross-address-space pointer.

use crate::error::KernelError;
use crate::process::Pid;

/// Message payload capacity. Sized so one 512-byte disk block plus a
/// request header fits by value.
pub const SYSCALL_MSG_LEN: usize = 1024;

/// Argument slots in the args area
pub const CMD_NARGS: usize = 8;

/// Bytes per argument slot
pub const CMD_ARG_LEN: usize = 32;

/// Direction selector for the kernel-executed I/O calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDir {
    Read,
    Write,
}

/// Syscall type tag
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallKind {
    /// No syscall in flight; the value the kernel resets the tag to
    Unused = 0,
    Recv = 1,
    Send = 2,
    Exit = 3,
    Wait = 4,
    DiskRead = 5,
    DiskWrite = 6,
    TtyRead = 7,
    TtyWrite = 8,
    VmMap = 9,
}

impl TryFrom<u32> for SyscallKind {
    type Error = KernelError;

    fn try_from(kind: u32) -> Result<Self, KernelError> {
        match kind {
            0 => Ok(Self::Unused),
            1 => Ok(Self::Recv),
            2 => Ok(Self::Send),
            3 => Ok(Self::Exit),
            4 => Ok(Self::Wait),
            5 => Ok(Self::DiskRead),
            6 => Ok(Self::DiskWrite),
            7 => Ok(Self::TtyRead),
            8 => Ok(Self::TtyWrite),
            9 => Ok(Self::VmMap),
            kind => Err(KernelError::InvalidSyscall { kind }),
        }
    }
}

/// Message area: sender, receiver and the by-value payload.
#[repr(C)]
pub struct SysMsg {
    pub sender: i32,
    pub receiver: i32,
    pub content: [u8; SYSCALL_MSG_LEN],
}

/// Argument area for the kernel-executed calls (disk, tty, vm_map).
#[repr(C)]
pub struct SysArgs {
    pub argc: u32,
    pub argv: [[u8; CMD_ARG_LEN]; CMD_NARGS],
}

/// The shared syscall page contents.
#[repr(C)]
pub struct SyscallBlock {
    pub kind: u32,
    pub msg: SysMsg,
    pub args: SysArgs,
    pub retval: i32,
}

impl SyscallBlock {
    pub fn new() -> Self {
        Self {
            kind: SyscallKind::Unused as u32,
            msg: SysMsg {
                sender: GPID_ANY_RAW,
                receiver: GPID_ANY_RAW,
                content: [0; SYSCALL_MSG_LEN],
            },
            args: SysArgs {
                argc: 0,
                argv: [[0; CMD_ARG_LEN]; CMD_NARGS],
            },
            retval: 0,
        }
    }

    pub fn set_kind(&mut self, kind: SyscallKind) {
        self.kind = kind as u32;
    }

    /// First four bytes of argument slot `i`, as a little-endian u32.
    pub fn arg_u32(&self, i: usize) -> u32 {
        u32::from_le_bytes([
            self.args.argv[i][0],
            self.args.argv[i][1],
            self.args.argv[i][2],
            self.args.argv[i][3],
        ])
    }

    pub fn set_arg_u32(&mut self, i: usize, value: u32) {
        self.args.argv[i][..4].copy_from_slice(&value.to_le_bytes());
    }

    /// Pid the receive filter names.
    pub fn filter(&self) -> Pid {
        Pid(self.msg.sender)
    }
}

impl Default for SyscallBlock {
    fn default() -> Self {
        Self::new()
    }
}

const GPID_ANY_RAW: i32 = -1;
