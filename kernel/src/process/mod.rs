//! Processes
//!
//! Descriptors ([`pcb`]) and the bounded table that owns them
//! ([`table`]). Every cross-reference between processes is a pid, never a
//! pointer; pids increase monotonically, so a stale pid held by anyone
//! simply fails to resolve once the slot is reused.

pub mod pcb;
pub mod table;

pub use pcb::{
    Pid, ProcStatus, Process, TrapFrame, GPID_ALL, GPID_DIR, GPID_FILE, GPID_PROCESS, GPID_SHELL,
    GPID_UNUSED, GPID_USER_START,
};
pub use table::{ProcessTable, MAX_NPROCESS};
