//! Syscall dispatch
//!
//! Handlers implement the retry policy of the message bus: a handler
//! that cannot complete yet reports [`Outcome::Block`], which parks the
//! caller `Pending` with its syscall tag set; the scheduler re-invokes
//! the same handler on every visit until it completes. Plain errors set
//! `retval = -1` and leave the caller runnable. Success resets the type
//! tag to `Unused`, releasing the user-side spin. `exit` never resets
//! the tag; the process is never dispatched again.

pub mod abi;
pub mod userspace;

use crate::cap::Earth;
use crate::error::{KernelError, KernelResult};
use crate::layout::BLOCK_SIZE;
use crate::process::{Pid, ProcStatus};
use crate::sched::Kernel;

use abi::{SyscallKind, SYSCALL_MSG_LEN};

/// How a handler left the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Completed with this return value
    Done(i32),
    /// Would block; park the caller and retry on scheduler visits
    Block,
    /// Exit protocol ran; the caller never observes a return
    Exited,
}

impl Kernel {
    /// Decode and run the syscall the process in `idx` trapped with.
    ///
    /// Requires `idx`'s address space to be active, which holds both for
    /// the trapping process and for pending retries (the scheduler
    /// switches first).
    pub fn dispatch_at(&mut self, earth: &mut dyn Earth, idx: usize) -> KernelResult<()> {
        let pid = self.procs.slot(idx).pid;
        let kind = SyscallKind::try_from(earth.syscall_block(pid)?.kind)?;

        let outcome = match kind {
            SyscallKind::Unused => {
                return Err(KernelError::InvalidSyscall { kind: kind as u32 })
            }
            SyscallKind::Recv => self.sys_recv(earth, idx)?,
            SyscallKind::Send => self.sys_send(earth, idx)?,
            SyscallKind::Wait => self.sys_wait(earth, idx)?,
            SyscallKind::Exit => {
                self.exit_at(idx);
                Outcome::Exited
            }
            SyscallKind::DiskRead | SyscallKind::DiskWrite => {
                self.sys_disk(earth, idx, kind)?
            }
            SyscallKind::TtyRead | SyscallKind::TtyWrite => self.sys_tty(earth, idx, kind)?,
            SyscallKind::VmMap => self.sys_vm_map(earth, idx)?,
        };

        match outcome {
            Outcome::Done(retval) => {
                let block = earth.syscall_block(pid)?;
                block.retval = retval;
                block.set_kind(SyscallKind::Unused);
                let slot = self.procs.slot_mut(idx);
                slot.status = ProcStatus::Runnable;
                slot.pending_syscall = SyscallKind::Unused;
            }
            Outcome::Block => {
                earth.syscall_block(pid)?.retval = -1;
                let slot = self.procs.slot_mut(idx);
                slot.status = ProcStatus::Pending;
                slot.pending_syscall = kind;
            }
            Outcome::Exited => {}
        }
        Ok(())
    }

    /// Rendezvous send: deliverable only when the destination is already
    /// pending in `recv` and its filter accepts us.
    fn sys_send(&mut self, earth: &mut dyn Earth, idx: usize) -> KernelResult<Outcome> {
        let sender = self.procs.slot(idx).pid;
        let (receiver, payload) = {
            let block = earth.syscall_block(sender)?;
            (Pid(block.msg.receiver), block.msg.content)
        };

        if self.ipc.is_in_use() {
            return Ok(Outcome::Block);
        }

        let Some(dst) = self.procs.get(receiver) else {
            // No such process: an error the sender observes, not a block
            return Ok(Outcome::Done(-1));
        };
        let receiving =
            dst.status == ProcStatus::Pending && dst.pending_syscall == SyscallKind::Recv;
        let accepted = dst.receive_from == crate::process::GPID_ALL || dst.receive_from == sender;
        if !receiving || !accepted {
            return Ok(Outcome::Block);
        }

        self.ipc.deposit(sender, receiver, &payload);
        Ok(Outcome::Done(0))
    }

    /// Rendezvous receive: record the filter, then consume the slot if
    /// the in-flight message is ours.
    fn sys_recv(&mut self, earth: &mut dyn Earth, idx: usize) -> KernelResult<Outcome> {
        let receiver = self.procs.slot(idx).pid;
        let filter = earth.syscall_block(receiver)?.filter();
        self.procs.slot_mut(idx).receive_from = filter;

        let mut payload = [0u8; SYSCALL_MSG_LEN];
        match self.ipc.consume(receiver, filter, &mut payload) {
            Some(sender) => {
                let block = earth.syscall_block(receiver)?;
                block.msg.content = payload;
                block.msg.sender = sender.0;
                Ok(Outcome::Done(0))
            }
            None => Ok(Outcome::Block),
        }
    }

    /// Reap one zombie child, returning its pid through the message
    /// content; block while no child has exited.
    fn sys_wait(&mut self, earth: &mut dyn Earth, idx: usize) -> KernelResult<Outcome> {
        let parent = self.procs.slot(idx).pid;
        match self.procs.zombie_child(parent) {
            Some(child) => {
                earth.mmu_free(child);
                self.procs.release(child);
                let block = earth.syscall_block(parent)?;
                block.msg.content[..4].copy_from_slice(&child.0.to_le_bytes());
                Ok(Outcome::Done(0))
            }
            None => Ok(Outcome::Block),
        }
    }

    /// Kernel-executed block I/O. Data travels through the message
    /// content; the interrupt-driven device turns into a pending retry.
    fn sys_disk(
        &mut self,
        earth: &mut dyn Earth,
        idx: usize,
        kind: SyscallKind,
    ) -> KernelResult<Outcome> {
        let pid = self.procs.slot(idx).pid;
        let (block_no, nblocks, mut data) = {
            let block = earth.syscall_block(pid)?;
            let mut data = [0u8; BLOCK_SIZE];
            data.copy_from_slice(&block.msg.content[..BLOCK_SIZE]);
            (block.arg_u32(0), block.arg_u32(1), data)
        };

        let result = if kind == SyscallKind::DiskRead {
            earth.disk_read(block_no, nblocks, &mut data)
        } else {
            earth.disk_write(block_no, nblocks, &data)
        };

        match result {
            Ok(()) => {
                if kind == SyscallKind::DiskRead {
                    let block = earth.syscall_block(pid)?;
                    block.msg.content[..BLOCK_SIZE].copy_from_slice(&data);
                }
                Ok(Outcome::Done(0))
            }
            Err(KernelError::WouldBlock) => Ok(Outcome::Block),
            Err(KernelError::BadArg { .. }) => Ok(Outcome::Done(-1)),
            Err(err) => Err(err),
        }
    }

    /// Kernel-executed terminal I/O. Reads deliver one byte and block
    /// while none is pending; writes push the content bytes out.
    fn sys_tty(
        &mut self,
        earth: &mut dyn Earth,
        idx: usize,
        kind: SyscallKind,
    ) -> KernelResult<Outcome> {
        let pid = self.procs.slot(idx).pid;

        if kind == SyscallKind::TtyRead {
            return match earth.tty_read() {
                Some(byte) => {
                    earth.syscall_block(pid)?.msg.content[0] = byte;
                    Ok(Outcome::Done(0))
                }
                None => Ok(Outcome::Block),
            };
        }

        let (len, data) = {
            let block = earth.syscall_block(pid)?;
            (block.arg_u32(0) as usize, block.msg.content)
        };
        if len > SYSCALL_MSG_LEN {
            return Ok(Outcome::Done(-1));
        }
        earth.tty_write(&data[..len]);
        Ok(Outcome::Done(0))
    }

    /// Map a page for the calling pid (the in-process loader's service).
    fn sys_vm_map(&mut self, earth: &mut dyn Earth, idx: usize) -> KernelResult<Outcome> {
        let pid = self.procs.slot(idx).pid;
        let vaddr = earth.syscall_block(pid)?.arg_u32(0);
        earth.mmu_map(pid, vaddr)?;
        Ok(Outcome::Done(0))
    }
}
