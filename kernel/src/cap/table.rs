//! In-memory capability tables
//!
//! Two function-pointer tables, installed at boot at the fixed virtual
//! bases every address space maps, are the stable ABI between the layers:
//! `earth` for device access, `grass` for process control and the
//! syscall stubs. Kernel-service processes reach everything through
//! these; they never link against kernel internals directly.

use crate::layout::{EARTH_TABLE_BASE, GRASS_TABLE_BASE};
use crate::process::Pid;
use crate::syscall::abi::IoDir;

/// Device capabilities exposed to processes.
#[repr(C)]
pub struct EarthTable {
    pub tty_write: fn(&[u8]),
    /// One byte, or -1 when none pending
    pub tty_read: fn() -> i32,
}

/// Kernel-service capabilities exposed to processes.
///
/// The leading fields are plain shared state (the shell's working
/// directory); the rest are the process-control entry points and the
/// syscall stubs.
#[repr(C)]
pub struct GrassTable {
    pub workdir_ino: u32,
    pub workdir: [u8; 128],

    /* process control (privileged processes only) */
    pub proc_alloc: fn(parent: Pid) -> i32,
    pub proc_free: fn(pid: Pid),
    pub proc_set_ready: fn(pid: Pid),
    /// Register a demand-paged image living at a fixed block offset
    pub proc_load: fn(pid: Pid, image_start: u32) -> i32,
    /// Register a caller-built segment table and argc for a spawnee
    pub proc_register: fn(pid: Pid, segtbl: &crate::loader::SegmentTable, argc: u32) -> i32,
    /// Copy bytes into a page of another process (eager loading)
    pub vm_write: fn(pid: Pid, vaddr: u32, bytes: &[u8]) -> i32,

    /* syscall stubs */
    pub sys_exit: fn(status: i32) -> !,
    pub sys_wait: fn(child: &mut i32) -> i32,
    pub sys_send: fn(to: Pid, msg: &[u8]) -> i32,
    pub sys_recv: fn(from: Pid, sender: Option<&mut i32>, buf: &mut [u8]) -> i32,
    pub sys_disk: fn(block_no: u32, nblocks: u32, buf: &mut [u8], dir: IoDir) -> i32,
    pub sys_tty: fn(buf: &mut [u8], len: usize, dir: IoDir) -> i32,
    pub sys_vm_map: fn(vaddr: u32) -> i32,
}

/// Write both tables to their fixed bases.
///
/// # Safety
///
/// Boot-time only: the pages at the table bases must be mapped and
/// nothing may be reading them yet.
pub unsafe fn install(earth: EarthTable, grass: GrassTable) {
    // SAFETY: per the function contract.
    unsafe {
        core::ptr::write_volatile(EARTH_TABLE_BASE as usize as *mut EarthTable, earth);
        core::ptr::write_volatile(GRASS_TABLE_BASE as usize as *mut GrassTable, grass);
    }
}

/// The installed earth table.
pub fn earth() -> &'static EarthTable {
    // SAFETY: install() ran at boot and the table base is mapped into
    // every address space, read-only after boot.
    unsafe { &*(EARTH_TABLE_BASE as usize as *const EarthTable) }
}

/// The installed grass table.
pub fn grass() -> &'static GrassTable {
    // SAFETY: as for [`earth`].
    unsafe { &*(GRASS_TABLE_BASE as usize as *const GrassTable) }
}
