//! Userspace syscall stubs
//!
//! The client half of the ABI, used by kernel-service processes through
//! the grass table: fill the shared page at `SYSCALL_VARG`, trap, spin
//! until the kernel resets the type tag. All data moves by value through
//! the page.

use crate::layout::SYSCALL_VARG;
use crate::process::Pid;

use super::abi::{IoDir, SyscallBlock, SyscallKind, SYSCALL_MSG_LEN};

fn block_ptr() -> *mut SyscallBlock {
    SYSCALL_VARG as usize as *mut SyscallBlock
}

/// Trap into the kernel and spin until the call is retired.
fn invoke(kind: SyscallKind) {
    // SAFETY: the syscall page is mapped into every address space; the
    // kernel only mutates it while this process is trapped.
    unsafe {
        core::ptr::write_volatile(core::ptr::addr_of_mut!((*block_ptr()).kind), kind as u32);
    }

    #[cfg(target_arch = "riscv32")]
    crate::arch::riscv::ecall();

    // SAFETY: as above; the tag is reset by the kernel when the call
    // completes.
    unsafe {
        while core::ptr::read_volatile(core::ptr::addr_of!((*block_ptr()).kind))
            != SyscallKind::Unused as u32
        {
            core::hint::spin_loop();
        }
    }
}

fn retval() -> i32 {
    // SAFETY: the call is retired; the kernel no longer touches the page.
    unsafe { core::ptr::read_volatile(core::ptr::addr_of!((*block_ptr()).retval)) }
}

/// Send `msg` to `to`; blocks until the receiver takes it.
pub fn sys_send(to: Pid, msg: &[u8]) -> i32 {
    if msg.len() > SYSCALL_MSG_LEN {
        return -1;
    }
    // SAFETY: exclusive use of the caller's own syscall page.
    unsafe {
        let block = &mut *block_ptr();
        block.msg.receiver = to.0;
        block.msg.content[..msg.len()].copy_from_slice(msg);
    }
    invoke(SyscallKind::Send);
    retval()
}

/// Receive into `buf`, from `from` or anyone for `GPID_ALL`; blocks
/// until a matching message arrives. `sender` reports who sent it.
pub fn sys_recv(from: Pid, sender: Option<&mut i32>, buf: &mut [u8]) -> i32 {
    if buf.len() > SYSCALL_MSG_LEN {
        return -1;
    }
    // SAFETY: exclusive use of the caller's own syscall page.
    unsafe {
        (*block_ptr()).msg.sender = from.0;
    }
    invoke(SyscallKind::Recv);
    // SAFETY: call retired; the payload is ours to copy out.
    unsafe {
        let block = &*block_ptr();
        buf.copy_from_slice(&block.msg.content[..buf.len()]);
        if let Some(sender) = sender {
            *sender = block.msg.sender;
        }
    }
    retval()
}

/// Reap a zombie child; blocks until one exists.
pub fn sys_wait(child: &mut i32) -> i32 {
    invoke(SyscallKind::Wait);
    // SAFETY: call retired; the child pid sits in the content area.
    unsafe {
        let content = &(*block_ptr()).msg.content;
        *child = i32::from_le_bytes([content[0], content[1], content[2], content[3]]);
    }
    retval()
}

/// Exit with `status`. The kernel never dispatches this process again.
pub fn sys_exit(_status: i32) -> ! {
    invoke(SyscallKind::Exit);
    // The tag is never reset on exit; invoke() spins forever on real
    // hardware, and this is unreachable
    loop {
        core::hint::spin_loop();
    }
}

/// Kernel-executed block I/O, one block per call through the page.
pub fn sys_disk(block_no: u32, nblocks: u32, buf: &mut [u8], dir: IoDir) -> i32 {
    // SAFETY: exclusive use of the caller's own syscall page.
    unsafe {
        let block = &mut *block_ptr();
        block.set_arg_u32(0, block_no);
        block.set_arg_u32(1, nblocks);
        block.args.argc = 2;
        if dir == IoDir::Write {
            block.msg.content[..buf.len()].copy_from_slice(buf);
        }
    }
    invoke(match dir {
        IoDir::Read => SyscallKind::DiskRead,
        IoDir::Write => SyscallKind::DiskWrite,
    });
    if dir == IoDir::Read {
        // SAFETY: call retired; the block data is in the content area.
        unsafe {
            buf.copy_from_slice(&(&(*block_ptr()).msg.content)[..buf.len()]);
        }
    }
    retval()
}

/// Kernel-executed terminal I/O: reads deliver one byte into `buf[0]`,
/// writes push `len` bytes of `buf`.
pub fn sys_tty(buf: &mut [u8], len: usize, dir: IoDir) -> i32 {
    if len > SYSCALL_MSG_LEN {
        return -1;
    }
    // SAFETY: exclusive use of the caller's own syscall page.
    unsafe {
        let block = &mut *block_ptr();
        block.set_arg_u32(0, len as u32);
        block.args.argc = 1;
        if dir == IoDir::Write {
            block.msg.content[..len].copy_from_slice(&buf[..len]);
        }
    }
    invoke(match dir {
        IoDir::Read => SyscallKind::TtyRead,
        IoDir::Write => SyscallKind::TtyWrite,
    });
    if dir == IoDir::Read {
        // SAFETY: call retired; the byte is in the content area.
        unsafe {
            buf[0] = (*block_ptr()).msg.content[0];
        }
    }
    retval()
}

/// Ask the kernel to map `vaddr` in the caller's space.
pub fn sys_vm_map(vaddr: u32) -> i32 {
    // SAFETY: exclusive use of the caller's own syscall page.
    unsafe {
        let block = &mut *block_ptr();
        block.set_arg_u32(0, vaddr);
        block.args.argc = 1;
    }
    invoke(SyscallKind::VmMap);
    retval()
}
