//! Core frame map
//!
//! Bookkeeping for the fixed window of physical frames the kernel hands
//! out: which frames are in use, which pid owns them, and which are
//! pinned. The window itself is borrowed storage — the fixed RAM region
//! on hardware, a leaked allocation in tests — so the map never touches a
//! raw physical address directly.

use crate::error::{KernelResult, MmuError};
use crate::layout::{CORE_MAP_NPAGES, PAGE_SIZE};
use crate::process::Pid;

/// A page-sized, page-aligned unit of memory.
#[repr(C, align(4096))]
pub struct Page(pub [u8; PAGE_SIZE]);

impl Page {
    pub const fn zeroed() -> Self {
        Self([0; PAGE_SIZE])
    }

    pub fn fill(&mut self, byte: u8) {
        self.0.fill(byte);
    }
}

/// Index of a frame inside the core map window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameId(pub u32);

#[derive(Debug, Clone, Copy)]
struct FrameInfo {
    in_use: bool,
    owner: Pid,
    pinned: bool,
}

const FREE: FrameInfo = FrameInfo {
    in_use: false,
    owner: Pid::UNUSED,
    pinned: false,
};

/// Fixed-size physical frame allocator.
pub struct CoreMap {
    frames: [FrameInfo; CORE_MAP_NPAGES],
    storage: &'static mut [Page],
    base_ppn: u32,
}

impl CoreMap {
    /// Wrap `storage` as the frame window; `base_paddr` is the physical
    /// address frame 0 appears at in page tables.
    pub fn new(storage: &'static mut [Page], base_paddr: u32) -> Self {
        assert!(storage.len() <= CORE_MAP_NPAGES);
        assert_eq!(base_paddr as usize % PAGE_SIZE, 0);
        Self {
            frames: [FREE; CORE_MAP_NPAGES],
            storage,
            base_ppn: base_paddr >> 12,
        }
    }

    pub fn nframes(&self) -> usize {
        self.storage.len()
    }

    /// Claim the first free frame for `owner`.
    pub fn acquire(&mut self, owner: Pid, pinned: bool) -> KernelResult<FrameId> {
        for i in 0..self.nframes() {
            if !self.frames[i].in_use {
                self.frames[i] = FrameInfo {
                    in_use: true,
                    owner,
                    pinned,
                };
                return Ok(FrameId(i as u32));
            }
        }
        Err(MmuError::OutOfFrames.into())
    }

    /// Release every frame owned by `owner`.
    ///
    /// Freed frames are zeroed so a frame that backed a page table never
    /// leaks stale entries into its next life.
    pub fn release_all(&mut self, owner: Pid) {
        for i in 0..self.nframes() {
            if self.frames[i].in_use && self.frames[i].owner == owner {
                self.frames[i] = FREE;
                self.storage[i].fill(0);
            }
        }
    }

    pub fn page(&self, frame: FrameId) -> &Page {
        &self.storage[frame.0 as usize]
    }

    pub fn page_mut(&mut self, frame: FrameId) -> &mut Page {
        &mut self.storage[frame.0 as usize]
    }

    /// Physical page number this frame translates to.
    pub fn ppn(&self, frame: FrameId) -> u32 {
        self.base_ppn + frame.0
    }

    /// Inverse of [`CoreMap::ppn`]; `None` for PPNs outside the window.
    pub fn frame_of_ppn(&self, ppn: u32) -> Option<FrameId> {
        let idx = ppn.checked_sub(self.base_ppn)?;
        if (idx as usize) < self.nframes() {
            Some(FrameId(idx))
        } else {
            None
        }
    }

    pub fn owner(&self, frame: FrameId) -> Option<Pid> {
        let info = self.frames[frame.0 as usize];
        info.in_use.then_some(info.owner)
    }

    pub fn in_use_count(&self) -> usize {
        self.frames[..self.nframes()]
            .iter()
            .filter(|f| f.in_use)
            .count()
    }
}
