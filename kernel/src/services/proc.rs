//! Process server
//!
//! The first kernel process. Spawns the remaining servers from their
//! fixed block offsets, then serves spawn/killall requests from the
//! shell: resolve the binary through the directory server, allocate a
//! process (freeing all user processes and retrying once if the table is
//! full), load the image, hand over the arguments and make it ready.

use crate::cap::table::grass;
use crate::error::{KernelError, KernelResult};
use crate::layout::{APPS_ARG, BLOCK_SIZE, DIR_EXEC_START, FILE_EXEC_START, SHELL_EXEC_START};
use crate::loader::SegmentTable;
use crate::process::{Pid, GPID_ALL, GPID_PROCESS};
use crate::syscall::abi::{CMD_ARG_LEN, CMD_NARGS, SYSCALL_MSG_LEN};

use super::fsipc::{self, dir_lookup, file_read};
use super::sprint;

/// Spawn a binary named in `argv`
pub const PROC_SPAWN: u32 = 1;

/// Free every user process
pub const PROC_KILLALL: u32 = 2;

pub const CMD_OK: u32 = 1;
pub const CMD_ERROR: u32 = 2;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProcRequest {
    pub kind: u32,
    pub argc: u32,
    pub argv: [[u8; CMD_ARG_LEN]; CMD_NARGS],
}

impl ProcRequest {
    pub fn new(kind: u32) -> Self {
        Self {
            kind,
            argc: 0,
            argv: [[0; CMD_ARG_LEN]; CMD_NARGS],
        }
    }

    fn arg(&self, i: usize) -> &str {
        let arg = &self.argv[i];
        let len = arg.iter().position(|&b| b == 0).unwrap_or(CMD_ARG_LEN);
        core::str::from_utf8(&arg[..len]).unwrap_or("")
    }

    /// A trailing `&` marks a background spawn; it is not an argument.
    pub fn background(&self) -> bool {
        self.argc > 0 && self.arg(self.argc as usize - 1) == "&"
    }

    /// argc with the background marker stripped.
    pub fn effective_argc(&self) -> u32 {
        if self.background() {
            self.argc - 1
        } else {
            self.argc
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProcReply {
    pub kind: u32,
    pub pid: i32,
}

/// Allocate with the table-full fallback: free every user process and
/// retry once, then give up.
pub fn alloc_with_retry(
    mut alloc: impl FnMut() -> KernelResult<Pid>,
    mut free_all_users: impl FnMut(),
) -> KernelResult<Pid> {
    match alloc() {
        Err(KernelError::TableFull) => {
            free_all_users();
            alloc()
        }
        result => result,
    }
}

/// Spawn one of the servers from its fixed image offset.
fn spawn_server(image_start: u32) -> Pid {
    let pid = Pid((grass().proc_alloc)(GPID_PROCESS));
    (grass().proc_load)(pid, image_start);
    (grass().proc_set_ready)(pid);
    pid
}

/// Resolve, load and start the binary a spawn request names.
fn app_spawn(request: &ProcRequest, parent: Pid) -> Result<Pid, ()> {
    let bin_ino = dir_lookup(0, "bin/");
    if bin_ino < 0 {
        return Err(());
    }
    let app_ino = dir_lookup(bin_ino as u32, request.arg(0));
    if app_ino < 0 {
        return Err(());
    }

    let pid = match alloc_with_retry(
        || {
            let pid = (grass().proc_alloc)(parent);
            if pid < 0 {
                Err(KernelError::TableFull)
            } else {
                Ok(Pid(pid))
            }
        },
        || (grass().proc_free)(GPID_ALL),
    ) {
        Ok(pid) => pid,
        // Full even after freeing every user process: the table holds
        // nothing but kernel processes and the platform cannot proceed
        Err(_) => panic!("process table exhausted by kernel processes"),
    };

    // Parse headers, then stream the image in block by block
    let reader = |block_no: u32, buf: &mut [u8; BLOCK_SIZE]| {
        if file_read(app_ino as u32, block_no, buf) < 0 {
            Err(KernelError::BadArg {
                name: "image block",
                value: block_no as usize,
            })
        } else {
            Ok(())
        }
    };
    let segtbl = SegmentTable::from_image(reader, None).map_err(|_| ())?;

    for seg in segtbl.segments().iter().filter(|s| s.filesz > 0) {
        let mut block = [0u8; BLOCK_SIZE];
        let nblocks = seg.filesz.div_ceil(BLOCK_SIZE as u32);
        for i in 0..nblocks {
            if file_read(app_ino as u32, seg.file_block_offset + i, &mut block) < 0 {
                return Err(());
            }
            (grass().vm_write)(pid, seg.base_vaddr + i * BLOCK_SIZE as u32, &block);
        }
        // The tail of the last block past filesz is bss, not file bytes
        let tail = nblocks * BLOCK_SIZE as u32 - seg.filesz;
        if tail > 0 {
            block.fill(0);
            (grass().vm_write)(
                pid,
                seg.base_vaddr + seg.filesz,
                &block[..tail as usize],
            );
        }
    }

    // Argument page: argc word followed by the argv slots
    let argc = request.effective_argc();
    (grass().vm_write)(pid, APPS_ARG, &argc.to_le_bytes());
    (grass().vm_write)(pid, APPS_ARG + 4, fsipc::to_bytes(&request.argv));

    (grass().proc_register)(pid, &segtbl, argc);
    (grass().proc_set_ready)(pid);
    Ok(pid)
}

/// Process server entry point.
pub fn main() -> ! {
    log::info!("process server up");

    let mut buf = [0u8; SYSCALL_MSG_LEN];

    // Bring up the other servers; file and dir announce themselves
    spawn_server(FILE_EXEC_START);
    (grass().sys_recv)(crate::process::GPID_FILE, None, &mut buf);
    spawn_server(DIR_EXEC_START);
    (grass().sys_recv)(crate::process::GPID_DIR, None, &mut buf);
    spawn_server(SHELL_EXEC_START);

    loop {
        let mut sender = 0i32;
        if (grass().sys_recv)(GPID_ALL, Some(&mut sender), &mut buf) < 0 {
            continue;
        }
        let request: ProcRequest = fsipc::from_bytes(&buf);

        match request.kind {
            PROC_SPAWN => {
                let reply = match app_spawn(&request, Pid(sender)) {
                    Ok(pid) => ProcReply {
                        kind: CMD_OK,
                        pid: pid.0,
                    },
                    Err(()) => ProcReply {
                        kind: CMD_ERROR,
                        pid: -1,
                    },
                };
                (grass().sys_send)(Pid(sender), fsipc::to_bytes(&reply));
            }
            PROC_KILLALL => (grass().proc_free)(GPID_ALL),
            kind => {
                sprint!("sys_proc: invalid request {}\n", kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_frees_users_once_then_succeeds() {
        let mut freed = false;
        let mut calls = 0;
        let pid = alloc_with_retry(
            || {
                calls += 1;
                if calls == 1 {
                    Err(KernelError::TableFull)
                } else {
                    Ok(Pid(6))
                }
            },
            || freed = true,
        )
        .unwrap();
        assert!(freed);
        assert_eq!(pid, Pid(6));
    }

    #[test]
    fn retry_gives_up_after_second_failure() {
        let result = alloc_with_retry(|| Err(KernelError::TableFull), || {});
        assert_eq!(result, Err(KernelError::TableFull));
    }

    #[test]
    fn background_marker_is_detected_and_stripped() {
        let mut request = ProcRequest::new(PROC_SPAWN);
        request.argc = 2;
        request.argv[0][..5].copy_from_slice(b"sleep");
        request.argv[1][0] = b'&';

        assert!(request.background());
        assert_eq!(request.effective_argc(), 1);

        let mut foreground = ProcRequest::new(PROC_SPAWN);
        foreground.argc = 1;
        foreground.argv[0][..2].copy_from_slice(b"ls");
        assert!(!foreground.background());
        assert_eq!(foreground.effective_argc(), 1);
    }
}
