//! Paging device
//!
//! A bounded cache of logical frames held in fast RAM and backed by block
//! storage at `frame_id * BLOCKS_PER_PAGE`. On the constrained target the
//! window is 28 slots (112 KiB); a platform with enough DRAM may pass a
//! window with one slot per frame and never evict.
//!
//! Eviction picks a uniformly random slot that is neither pinned nor
//! owned by the requesting pid, and writes it back unconditionally before
//! reuse. A slot owned by the requester is never chosen, so a single map
//! operation cannot displace its own pages.

use crate::drivers::disk::BlockDevice;
use crate::error::KernelResult;
use crate::layout::{BLOCKS_PER_PAGE, PAGE_SIZE};
use crate::process::Pid;

use super::frame::Page;

#[derive(Debug, Clone, Copy)]
struct CacheSlot {
    frame_id: Option<u32>,
    owner: Pid,
    pinned: bool,
}

const EMPTY: CacheSlot = CacheSlot {
    frame_id: None,
    owner: Pid::UNUSED,
    pinned: false,
};

/// Small deterministic PRNG for eviction choice.
struct XorShift32(u32);

impl XorShift32 {
    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

/// Software-managed frame cache over a block device.
pub struct FrameCache {
    slots: &'static mut [CacheSlot],
    pages: &'static mut [Page],
    rng: XorShift32,
}

impl FrameCache {
    /// Wrap `pages` as the cache window. `seed` drives eviction choice;
    /// any non-zero value works.
    pub fn new(pages: &'static mut [Page], seed: u32) -> Self {
        assert!(!pages.is_empty());
        let slots = alloc_slots(pages.len());
        slots.fill(EMPTY);
        Self {
            slots,
            pages,
            rng: XorShift32(seed | 1),
        }
    }

    fn lookup(&self, frame_id: u32) -> Option<usize> {
        self.slots.iter().position(|s| s.frame_id == Some(frame_id))
    }

    /// Write one slot back to its backing blocks and hand the slot over.
    ///
    /// Retries until a candidate appears; with every slot pinned or owned
    /// by `pid` there is nothing correct to evict and the caller made a
    /// sizing mistake.
    fn evict(&mut self, disk: &mut dyn BlockDevice, pid: Pid) -> KernelResult<usize> {
        let idx = loop {
            let idx = self.rng.next() as usize % self.slots.len();
            let slot = self.slots[idx];
            if slot.owner != pid && !slot.pinned {
                break idx;
            }
        };

        if let Some(frame_id) = self.slots[idx].frame_id {
            disk.kernel_write(
                frame_id * BLOCKS_PER_PAGE as u32,
                BLOCKS_PER_PAGE as u32,
                &self.pages[idx].0,
            )?;
        }
        Ok(idx)
    }

    fn take_slot(&mut self, disk: &mut dyn BlockDevice, pid: Pid) -> KernelResult<usize> {
        match self.slots.iter().position(|s| s.frame_id.is_none()) {
            Some(free) => Ok(free),
            None => self.evict(disk, pid),
        }
    }

    /// Return the cached page for `frame_id`, faulting it in from the
    /// backing store unless `alloc_only` is set.
    pub fn read(
        &mut self,
        disk: &mut dyn BlockDevice,
        pid: Pid,
        frame_id: u32,
        alloc_only: bool,
    ) -> KernelResult<&mut Page> {
        if let Some(idx) = self.lookup(frame_id) {
            return Ok(&mut self.pages[idx]);
        }

        let idx = self.take_slot(disk, pid)?;
        self.slots[idx] = CacheSlot {
            frame_id: Some(frame_id),
            owner: pid,
            pinned: false,
        };
        if !alloc_only {
            disk.kernel_read(
                frame_id * BLOCKS_PER_PAGE as u32,
                BLOCKS_PER_PAGE as u32,
                &mut self.pages[idx].0,
            )?;
        }
        Ok(&mut self.pages[idx])
    }

    /// Copy one page into the slot holding `frame_id`, allocating or
    /// evicting if the frame is not resident.
    pub fn write(
        &mut self,
        disk: &mut dyn BlockDevice,
        pid: Pid,
        frame_id: u32,
        src: &[u8; PAGE_SIZE],
    ) -> KernelResult<()> {
        let idx = match self.lookup(frame_id) {
            Some(idx) => idx,
            None => {
                let idx = self.take_slot(disk, pid)?;
                self.slots[idx] = CacheSlot {
                    frame_id: Some(frame_id),
                    owner: pid,
                    pinned: false,
                };
                idx
            }
        };
        self.pages[idx].0.copy_from_slice(src);
        Ok(())
    }

    fn set_pinned(&mut self, pid: Pid, frame_id: u32, pinned: bool) {
        if let Some(idx) = self.lookup(frame_id) {
            if self.slots[idx].owner == pid {
                self.slots[idx].pinned = pinned;
            }
        }
    }

    /// Exempt a resident frame from eviction.
    pub fn pin(&mut self, pid: Pid, frame_id: u32) {
        self.set_pinned(pid, frame_id, true);
    }

    pub fn unpin(&mut self, pid: Pid, frame_id: u32) {
        self.set_pinned(pid, frame_id, false);
    }

    /// Drop any slot holding `frame_id` without writing it back.
    pub fn invalidate(&mut self, frame_id: u32) {
        for slot in self.slots.iter_mut() {
            if slot.frame_id == Some(frame_id) {
                *slot = EMPTY;
            }
        }
    }

    /// Owner of the slot holding `frame_id`, if resident.
    pub fn resident_owner(&self, frame_id: u32) -> Option<Pid> {
        self.lookup(frame_id).map(|idx| self.slots[idx].owner)
    }
}

/// Slot metadata storage.
///
/// On bare metal the window size is a compile-time constant, so the slots
/// come from a static pool; the host build leaks a boxed slice so tests
/// can size windows freely.
#[cfg(target_os = "none")]
fn alloc_slots(n: usize) -> &'static mut [CacheSlot] {
    use crate::layout::CACHED_NFRAMES;

    static mut SLOTS: [CacheSlot; CACHED_NFRAMES] = [EMPTY; CACHED_NFRAMES];
    assert!(n <= CACHED_NFRAMES);
    // SAFETY: called once at boot, before a second cache could exist; the
    // static outlives the kernel.
    unsafe { &mut (*core::ptr::addr_of_mut!(SLOTS))[..n] }
}

#[cfg(not(target_os = "none"))]
fn alloc_slots(n: usize) -> &'static mut [CacheSlot] {
    std::boxed::Box::leak(std::vec![EMPTY; n].into_boxed_slice())
}
