//! Bounded process table

use crate::error::{KernelError, KernelResult};

use super::pcb::{Pid, ProcStatus, Process, GPID_USER_START};

/// Table size; pids keep growing past it, slots are recycled
pub const MAX_NPROCESS: usize = 8;

pub struct ProcessTable {
    slots: [Process; MAX_NPROCESS],
    next_pid: i32,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Process::vacant()),
            next_pid: 0,
        }
    }

    pub fn len(&self) -> usize {
        MAX_NPROCESS
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn slot(&self, idx: usize) -> &Process {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut Process {
        &mut self.slots[idx]
    }

    /// Claim the first unused slot with the next pid.
    pub fn alloc(&mut self, parent: Pid) -> KernelResult<Pid> {
        for slot in self.slots.iter_mut() {
            if slot.status == ProcStatus::Unused {
                self.next_pid += 1;
                let pid = Pid(self.next_pid);
                slot.recycle(pid, parent);
                return Ok(pid);
            }
        }
        Err(KernelError::TableFull)
    }

    /// Return `pid`'s slot to the pool. The caller releases its frames.
    pub fn release(&mut self, pid: Pid) {
        if let Some(slot) = self.get_mut(pid) {
            *slot = Process::vacant();
        }
    }

    /// Release every user process, reporting each freed pid to `f` so the
    /// caller can drop its address space.
    pub fn release_users(&mut self, mut f: impl FnMut(Pid)) {
        for slot in self.slots.iter_mut() {
            if slot.pid >= GPID_USER_START && slot.status != ProcStatus::Unused {
                f(slot.pid);
                *slot = Process::vacant();
            }
        }
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots
            .iter()
            .find(|p| p.pid == pid && p.status != ProcStatus::Unused)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.slots
            .iter_mut()
            .find(|p| p.pid == pid && p.status != ProcStatus::Unused)
    }

    pub fn index_of(&self, pid: Pid) -> Option<usize> {
        self.slots
            .iter()
            .position(|p| p.pid == pid && p.status != ProcStatus::Unused)
    }

    pub fn set_status(&mut self, pid: Pid, status: ProcStatus) {
        if let Some(slot) = self.get_mut(pid) {
            slot.status = status;
        }
    }

    pub fn status_of(&self, pid: Pid) -> Option<ProcStatus> {
        self.get(pid).map(|p| p.status)
    }

    /// A zombie child of `parent`, if any.
    pub fn zombie_child(&self, parent: Pid) -> Option<Pid> {
        self.slots
            .iter()
            .find(|p| p.parent == parent && p.status == ProcStatus::Zombie)
            .map(|p| p.pid)
    }

    /// Hand `of`'s children to `to` (exit protocol).
    pub fn reparent(&mut self, of: Pid, to: Pid) {
        for slot in self.slots.iter_mut() {
            if slot.status != ProcStatus::Unused && slot.parent == of {
                slot.parent = to;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().filter(|p| p.status != ProcStatus::Unused)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::pcb::GPID_PROCESS;

    #[test]
    fn pids_increase_monotonically_across_reuse() {
        let mut table = ProcessTable::new();
        let a = table.alloc(GPID_PROCESS).unwrap();
        table.release(a);
        let b = table.alloc(GPID_PROCESS).unwrap();
        assert!(b > a);
    }

    #[test]
    fn alloc_fails_when_full_then_recovers() {
        let mut table = ProcessTable::new();
        for _ in 0..MAX_NPROCESS {
            table.alloc(GPID_PROCESS).unwrap();
        }
        assert_eq!(table.alloc(GPID_PROCESS), Err(KernelError::TableFull));

        table.release_users(|_| {});
        // Only pids >= GPID_USER_START were released
        assert!(table.alloc(GPID_PROCESS).is_ok());
    }

    #[test]
    fn release_users_spares_kernel_processes() {
        let mut table = ProcessTable::new();
        // pids 1..=4 are the servers, 5.. users
        for _ in 0..6 {
            table.alloc(GPID_PROCESS).unwrap();
        }
        let mut freed = 0;
        table.release_users(|pid| {
            assert!(pid >= GPID_USER_START);
            freed += 1;
        });
        assert_eq!(freed, 2);
        assert!(table.get(Pid(1)).is_some());
        assert!(table.get(Pid(5)).is_none());
    }

    #[test]
    fn reparent_moves_all_children() {
        let mut table = ProcessTable::new();
        let parent = table.alloc(GPID_PROCESS).unwrap();
        let a = table.alloc(parent).unwrap();
        let b = table.alloc(parent).unwrap();
        let grandparent = GPID_PROCESS;

        table.reparent(parent, grandparent);
        assert_eq!(table.get(a).unwrap().parent, grandparent);
        assert_eq!(table.get(b).unwrap().parent, grandparent);
    }

    #[test]
    fn stale_pids_do_not_resolve() {
        let mut table = ProcessTable::new();
        let a = table.alloc(GPID_PROCESS).unwrap();
        table.release(a);
        table.alloc(GPID_PROCESS).unwrap();
        assert!(table.get(a).is_none());
    }
}
