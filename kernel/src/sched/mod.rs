//! Kernel state and the scheduler
//!
//! A single hart, a single [`Kernel`], and one rule about control flow:
//! processes change only at trap boundaries, and `curr` changes only in
//! [`Kernel::yield_to`]. Timer ticks preempt the shell and user apps;
//! the servers below the shell run their trap-free spans to completion
//! because device state may be live across their syscalls.

use crate::cap::{Earth, ExternalEvent, Privilege};
use crate::error::{KernelError, KernelResult, LoaderError};
use crate::ipc::IpcSlot;
use crate::layout::APPS_ARG;
use crate::loader::SegmentTable;
use crate::process::{Pid, ProcStatus, ProcessTable, TrapFrame, GPID_ALL};

/// A decoded trap, as handed in by the arch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// Timer interrupt
    Timer,
    /// Software interrupt or environment call
    Syscall,
    /// External (device) interrupt
    External,
    /// Memory-access exception at user EPC
    Fault { vaddr: u32, code: u32 },
}

/// Process table, IPC slot and scheduling state.
pub struct Kernel {
    pub(crate) procs: ProcessTable,
    pub(crate) ipc: IpcSlot,
    pub(crate) curr: usize,
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            procs: ProcessTable::new(),
            ipc: IpcSlot::new(),
            curr: 0,
        }
    }

    pub fn curr_pid(&self) -> Pid {
        self.procs.slot(self.curr).pid
    }

    pub fn procs(&self) -> &ProcessTable {
        &self.procs
    }

    pub fn procs_mut(&mut self) -> &mut ProcessTable {
        &mut self.procs
    }

    pub fn ipc(&self) -> &IpcSlot {
        &self.ipc
    }

    /// Save the trapping process's context into its descriptor.
    pub fn save_context(&mut self, frame: TrapFrame) {
        self.procs.slot_mut(self.curr).frame = frame;
    }

    /// The context to restore on trap return.
    pub fn restore_context(&self) -> TrapFrame {
        self.procs.slot(self.curr).frame
    }

    /// Kernel entry: classify and handle one trap, then pick the next
    /// process. Errors escaping here are unrecoverable for the platform.
    pub fn handle_trap(&mut self, earth: &mut dyn Earth, trap: Trap) -> KernelResult<()> {
        match trap {
            Trap::Timer => {
                if !self.curr_pid().is_preemptible() {
                    // Servers are cooperative; their device work may be
                    // mid-flight
                    earth.timer_reset();
                    return Ok(());
                }
                self.yield_to(earth)
            }
            Trap::Syscall => {
                earth.clear_soft_interrupt();
                self.dispatch_at(earth, self.curr)?;
                self.yield_to(earth)
            }
            Trap::External => {
                if earth.trap_external()? == ExternalEvent::KillRequest {
                    self.kill_current();
                }
                self.yield_to(earth)
            }
            Trap::Fault { vaddr, .. } => self.handle_page_fault(earth, vaddr),
        }
    }

    /// Route a memory fault to the loader; a miss outside every segment
    /// kills a user process and is fatal for anything else.
    fn handle_page_fault(&mut self, earth: &mut dyn Earth, vaddr: u32) -> KernelResult<()> {
        let pid = self.curr_pid();
        let result = match self.procs.slot(self.curr).segtbl {
            Some(segtbl) => earth.loader_fault(pid, &segtbl, vaddr),
            None => Err(LoaderError::Segfault { vaddr }.into()),
        };

        match result {
            // Page materialised; return straight to the faulting EPC
            Ok(()) => Ok(()),
            Err(KernelError::LoaderError(LoaderError::Segfault { .. })) if pid.is_user() => {
                log::warn!("segfault in process {} at {:#x}, terminating", pid, vaddr);
                self.exit_at(self.curr);
                self.yield_to(earth)
            }
            Err(err) => Err(err),
        }
    }

    /// Arm the redirect-to-exit action on the current process (Ctrl-C).
    ///
    /// Consumed at the next scheduler visit: instead of returning to the
    /// process, the kernel runs its exit protocol. Kernel processes are
    /// immune.
    pub fn kill_current(&mut self) {
        if self.curr_pid().is_user() {
            self.procs.slot_mut(self.curr).kill_pending = true;
        }
    }

    /// Exit protocol for the process in `idx`: zombie, children handed
    /// to the grandparent. Frames are released when the parent reaps.
    pub(crate) fn exit_at(&mut self, idx: usize) {
        let (pid, parent) = {
            let slot = self.procs.slot(idx);
            (slot.pid, slot.parent)
        };
        let slot = self.procs.slot_mut(idx);
        slot.status = ProcStatus::Zombie;
        slot.kill_pending = false;
        self.procs.reparent(pid, parent);
    }

    /// Round-robin pick, one slot past the current index.
    ///
    /// Pending candidates get their blocked syscall retried (after an
    /// address-space switch so the handler sees their shared page); if it
    /// completes they become runnable and are picked on the spot. When a
    /// full turn finds nothing, the hart waits for an interrupt with the
    /// timer masked and scans again.
    pub fn yield_to(&mut self, earth: &mut dyn Earth) -> KernelResult<()> {
        let n = self.procs.len();

        let next = 'pick: loop {
            for i in 1..=n {
                let idx = (self.curr + i) % n;

                let status = self.procs.slot(idx).status;
                if status == ProcStatus::Unused || status == ProcStatus::Zombie {
                    continue;
                }

                // Redirect-to-exit consumed before the process can run
                if self.procs.slot(idx).kill_pending {
                    self.exit_at(idx);
                    continue;
                }

                if status == ProcStatus::Pending {
                    earth.mmu_switch(self.procs.slot(idx).pid);
                    self.dispatch_at(earth, idx)?;
                }

                match self.procs.slot(idx).status {
                    ProcStatus::Ready | ProcStatus::Running | ProcStatus::Runnable => {
                        break 'pick idx;
                    }
                    _ => {}
                }
            }

            if earth.wait_for_interrupt()? == ExternalEvent::KillRequest {
                self.kill_current();
            }
        };

        if self.procs.slot(self.curr).status == ProcStatus::Running {
            self.procs.slot_mut(self.curr).status = ProcStatus::Runnable;
        }

        self.curr = next;
        let pid = self.curr_pid();
        earth.mmu_switch(pid);
        earth.timer_reset();
        if pid.is_preemptible() {
            earth.timer_enable();
        } else {
            earth.timer_disable();
        }
        earth.set_return_privilege(if pid.is_user() {
            Privilege::User
        } else {
            Privilege::Kernel
        });

        let slot = self.procs.slot_mut(self.curr);
        if slot.status == ProcStatus::Ready {
            // First dispatch: entry point, stack top, argc/argv registers
            let entry = slot.segtbl.map(|t| t.entry()).unwrap_or_default();
            slot.seed_entry(entry, APPS_ARG);
        }
        slot.status = ProcStatus::Running;
        Ok(())
    }

    /* process-control services (the grass table entry points) */

    /// Allocate a descriptor and its fixed mappings.
    pub fn proc_alloc(&mut self, earth: &mut dyn Earth, parent: Pid) -> KernelResult<Pid> {
        let pid = self.procs.alloc(parent)?;
        earth.mmu_alloc(pid)?;
        log::info!("allocated process {} (parent {})", pid, parent);
        Ok(pid)
    }

    /// Free one process, or every user process for `GPID_ALL`.
    pub fn proc_free(&mut self, earth: &mut dyn Earth, pid: Pid) {
        if pid == GPID_ALL {
            self.procs.release_users(|p| earth.mmu_free(p));
            return;
        }
        earth.mmu_free(pid);
        self.procs.release(pid);
    }

    /// Record a loaded image and make the process dispatchable.
    pub fn register_image(&mut self, pid: Pid, segtbl: SegmentTable, argc: u32) {
        if let Some(slot) = self.procs.get_mut(pid) {
            slot.segtbl = Some(segtbl);
            slot.argc = argc;
        }
    }

    pub fn proc_set_ready(&mut self, pid: Pid) {
        self.procs.set_status(pid, ProcStatus::Ready);
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
