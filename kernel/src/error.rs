//! Kernel error types
//!
//! Every fallible kernel path returns [`KernelError`] or one of the
//! subsystem enums below, which convert into it. Fatal dispositions are
//! decided by the caller: the boot path escalates them to a panic, the
//! syscall layer turns `WouldBlock` into a pending retry and everything
//! else into `retval = -1`.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Operation cannot complete now; retry on the next scheduler visit
    WouldBlock,

    /// Process table has no unused slot
    TableFull,

    /// Unknown syscall type in the shared page (protocol violation)
    InvalidSyscall {
        kind: u32,
    },

    /// Caller passed an out-of-bounds length or argument
    BadArg {
        name: &'static str,
        value: usize,
    },

    /// No live descriptor with this pid
    ProcessNotFound {
        pid: i32,
    },

    /// Block device errors
    DiskError(DiskError),

    /// Memory management errors
    MmuError(MmuError),

    /// Program loading errors
    LoaderError(LoaderError),
}

/// Block-device-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// Write issued to the memory-mapped flash ROM
    ReadOnly,
    /// SD card answered a command with a non-zero status
    BadCommandStatus { status: u8 },
    /// SD card data-packet ack had an unexpected low nibble
    BadWriteAck { status: u8 },
    /// The card stopped answering within the polling ceiling
    DeviceTimeout { waited: u32 },
    /// Block number past the end of the device
    OutOfRange { block: u32 },
}

/// MMU-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuError {
    /// The core frame map has no free frame
    OutOfFrames,
    /// Pid is outside the ASID range the root table supports
    AsidOverflow { pid: i32 },
    /// A page-table entry pointed outside the managed frame window
    ForeignFrame { ppn: u32 },
}

/// Loader-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderError {
    /// Not a 32-bit little-endian RISC-V executable
    BadImage { reason: &'static str },
    /// More loadable program headers than the segment table holds
    TooManySegments { count: usize },
    /// A loadable segment does not start on a page boundary
    Misaligned { vaddr: u32 },
    /// Faulting address is outside every segment
    Segfault { vaddr: u32 },
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldBlock => write!(f, "operation would block"),
            Self::TableFull => write!(f, "process table full"),
            Self::InvalidSyscall { kind } => write!(f, "invalid syscall type {}", kind),
            Self::BadArg { name, value } => write!(f, "bad argument '{}': {}", name, value),
            Self::ProcessNotFound { pid } => write!(f, "process {} not found", pid),
            Self::DiskError(e) => write!(f, "disk error: {:?}", e),
            Self::MmuError(e) => write!(f, "mmu error: {:?}", e),
            Self::LoaderError(e) => write!(f, "loader error: {:?}", e),
        }
    }
}

impl From<DiskError> for KernelError {
    fn from(err: DiskError) -> Self {
        Self::DiskError(err)
    }
}

impl From<MmuError> for KernelError {
    fn from(err: MmuError) -> Self {
        Self::MmuError(err)
    }
}

impl From<LoaderError> for KernelError {
    fn from(err: LoaderError) -> Self {
        Self::LoaderError(err)
    }
}
