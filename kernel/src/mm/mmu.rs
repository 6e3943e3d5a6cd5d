//! MMU manager
//!
//! Owns the per-process root page tables and the core frame map they are
//! built from. Root and leaf tables are themselves frames, owned by the
//! process and pinned; switching address spaces is one satp write, which
//! the arch layer performs with the value [`Mmu::satp`] computes.

use crate::error::{KernelResult, MmuError};
use crate::layout::{
    APPS_ARG, EARTH_TABLE_BASE, GRASS_TABLE_BASE, LOADER_PENTRY, LOADER_VSTACK_NPAGES,
    LOADER_VSTACK_TOP, LOADER_VSTATE, OS_ENTRY, OS_SIZE, PAGE_SIZE, ROM_SIZE, ROM_START,
    SYSCALL_VARG,
};
use crate::process::Pid;

use super::frame::{CoreMap, FrameId, Page};
use super::page_table::{PageTable, PteFlags, VirtAddr};

/// Address-space identifiers the root table supports
pub const MAX_ASID: usize = 32;

pub struct Mmu {
    core: CoreMap,
    roots: [Option<FrameId>; MAX_ASID],
}

impl Mmu {
    pub fn new(core: CoreMap) -> Self {
        Self {
            core,
            roots: [None; MAX_ASID],
        }
    }

    fn asid(pid: Pid) -> KernelResult<usize> {
        let idx = pid.0 as usize;
        if pid.0 < 0 || idx >= MAX_ASID {
            return Err(MmuError::AsidOverflow { pid: pid.0 }.into());
        }
        Ok(idx)
    }

    fn root_for(&mut self, pid: Pid) -> KernelResult<FrameId> {
        let idx = Self::asid(pid)?;
        if let Some(root) = self.roots[idx] {
            return Ok(root);
        }
        let root = self.core.acquire(pid, true)?;
        self.roots[idx] = Some(root);
        Ok(root)
    }

    /// Update `table[vpn]`, creating it if invalid.
    ///
    /// With `ppn = None` an existing mapping is reused; otherwise a fresh
    /// frame is acquired. With a concrete `ppn` the entry is (re)pointed
    /// there unconditionally.
    fn update_pte(
        &mut self,
        owner: Pid,
        table: FrameId,
        vpn: usize,
        ppn: Option<u32>,
        flags: PteFlags,
        pinned: bool,
    ) -> KernelResult<u32> {
        let pte = PageTable::from_page(self.core.page(table))[vpn];

        let ppn = match ppn {
            Some(ppn) => ppn,
            None if pte.is_valid() => pte.ppn(),
            None => {
                let frame = self.core.acquire(owner, pinned)?;
                self.core.ppn(frame)
            }
        };

        PageTable::from_page_mut(self.core.page_mut(table))[vpn] =
            super::page_table::Pte::new(ppn, flags);
        Ok(ppn)
    }

    /// Two-level walk mapping `vaddr` in `pid`'s table.
    ///
    /// `paddr = None` maps to an arbitrary frame from the core map (or
    /// keeps an existing mapping); `Some` installs that physical page.
    /// Returns the physical page base of the leaf entry.
    pub fn map_at(
        &mut self,
        pid: Pid,
        vaddr: VirtAddr,
        paddr: Option<u32>,
        flags: PteFlags,
        pinned: bool,
    ) -> KernelResult<u32> {
        let root = self.root_for(pid)?;

        // Interior entry: pointer only, backing table frame always pinned
        let table_ppn = self.update_pte(pid, root, vaddr.vpn1(), None, PteFlags::empty(), true)?;
        let leaf = self
            .core
            .frame_of_ppn(table_ppn)
            .ok_or(MmuError::ForeignFrame { ppn: table_ppn })?;

        let ppn = self.update_pte(
            pid,
            leaf,
            vaddr.vpn0(),
            paddr.map(|p| p >> 12),
            flags,
            pinned,
        )?;
        Ok(ppn << 12)
    }

    /// Map `vaddr` to an arbitrary unpinned frame (page-fault path).
    pub fn map(&mut self, pid: Pid, vaddr: u32) -> KernelResult<u32> {
        self.map_at(pid, VirtAddr(vaddr), None, PteFlags::RWX, false)
    }

    /// Like [`Mmu::map`] but named for lookups: idempotent on an existing
    /// mapping and creates one only when absent.
    pub fn find(&mut self, pid: Pid, vaddr: u32) -> KernelResult<u32> {
        self.map(pid, vaddr)
    }

    /// Install the fixed kernel/loader mappings for a fresh process.
    ///
    /// Everything here is RWX and pinned: the loader entry and stack, the
    /// loader state page, the syscall page, the capability tables, the OS
    /// region and the ROM window.
    pub fn alloc(&mut self, pid: Pid) -> KernelResult<()> {
        let identity = |mmu: &mut Self, vaddr: u32| -> KernelResult<u32> {
            mmu.map_at(pid, VirtAddr(vaddr), Some(vaddr), PteFlags::RWX, true)
        };

        identity(self, LOADER_PENTRY)?;
        identity(self, LOADER_PENTRY + PAGE_SIZE as u32)?;
        self.map_at(pid, VirtAddr(LOADER_VSTATE), None, PteFlags::RWX, true)?;

        let stack_bottom = LOADER_VSTACK_TOP - (LOADER_VSTACK_NPAGES * PAGE_SIZE) as u32;
        for page in (stack_bottom..LOADER_VSTACK_TOP).step_by(PAGE_SIZE) {
            self.map_at(pid, VirtAddr(page), None, PteFlags::RWX, true)?;
        }

        self.map_at(pid, VirtAddr(SYSCALL_VARG), None, PteFlags::RWX, true)?;
        identity(self, GRASS_TABLE_BASE)?;
        identity(self, EARTH_TABLE_BASE)?;
        self.map_at(pid, VirtAddr(APPS_ARG), None, PteFlags::RWX, true)?;

        for page in (OS_ENTRY..OS_ENTRY + OS_SIZE).step_by(PAGE_SIZE) {
            identity(self, page)?;
        }
        for page in (ROM_START..ROM_START + ROM_SIZE).step_by(PAGE_SIZE) {
            identity(self, page)?;
        }
        Ok(())
    }

    /// The satp value activating `pid`'s address space:
    /// `{mode = Sv32, asid = pid, ppn = root >> 12}`.
    pub fn satp(&self, pid: Pid) -> KernelResult<u32> {
        let idx = Self::asid(pid)?;
        let root = self.roots[idx].ok_or(MmuError::AsidOverflow { pid: pid.0 })?;
        Ok((1 << 31) | ((pid.0 as u32 & 0x1FF) << 22) | self.core.ppn(root))
    }

    /// Release every frame `pid` owns and forget its root.
    pub fn free(&mut self, pid: Pid) {
        if let Ok(idx) = Self::asid(pid) {
            self.roots[idx] = None;
        }
        self.core.release_all(pid);
    }

    /// Dereference a physical page base inside the core window.
    pub fn page_at(&mut self, paddr: u32) -> KernelResult<&mut Page> {
        let frame = self
            .core
            .frame_of_ppn(paddr >> 12)
            .ok_or(MmuError::ForeignFrame { ppn: paddr >> 12 })?;
        Ok(self.core.page_mut(frame))
    }

    /// Walk-and-dereference: the page backing `vaddr` in `pid`'s space.
    pub fn user_page(&mut self, pid: Pid, vaddr: u32) -> KernelResult<&mut Page> {
        let paddr = self.find(pid, vaddr)?;
        self.page_at(paddr)
    }

    pub fn core(&self) -> &CoreMap {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::CORE_MAP_START;

    fn mmu(nframes: usize) -> Mmu {
        let mut pages = std::vec::Vec::new();
        pages.resize_with(nframes, Page::zeroed);
        let storage = std::boxed::Box::leak(pages.into_boxed_slice());
        Mmu::new(CoreMap::new(storage, CORE_MAP_START))
    }

    #[test]
    fn map_is_idempotent_and_acquires_no_second_frame() {
        let mut mmu = mmu(8);
        let pid = Pid(3);

        let first = mmu.map(pid, 0x3000_4000).unwrap();
        let used = mmu.core().in_use_count();
        let second = mmu.map(pid, 0x3000_4000).unwrap();

        assert_eq!(first, second);
        assert_eq!(mmu.core().in_use_count(), used);
    }

    #[test]
    fn identity_mapping_returns_the_given_frame() {
        let mut mmu = mmu(8);
        let paddr = mmu
            .map_at(Pid(1), VirtAddr(ROM_START), Some(ROM_START), PteFlags::RWX, true)
            .unwrap();
        assert_eq!(paddr, ROM_START);
    }

    #[test]
    fn distinct_pages_get_distinct_frames() {
        let mut mmu = mmu(8);
        let a = mmu.map(Pid(1), 0x3000_0000).unwrap();
        let b = mmu.map(Pid(1), 0x3000_1000).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn free_releases_frames_and_zeroes_tables() {
        let mut mmu = mmu(8);
        let pid = Pid(2);
        mmu.map(pid, 0x3000_0000).unwrap();
        assert!(mmu.core().in_use_count() > 0);

        mmu.free(pid);
        assert_eq!(mmu.core().in_use_count(), 0);

        // A fresh walk must not see stale entries
        let paddr = mmu.map(pid, 0x3000_0000).unwrap();
        let page = mmu.page_at(paddr).unwrap();
        assert!(page.0.iter().all(|&b| b == 0));
    }

    #[test]
    fn satp_encodes_mode_asid_and_root() {
        let mut mmu = mmu(8);
        let pid = Pid(5);
        mmu.map(pid, 0x3000_0000).unwrap();

        let satp = mmu.satp(pid).unwrap();
        assert_eq!(satp >> 31, 1);
        assert_eq!((satp >> 22) & 0x1FF, 5);
        assert_eq!(satp & 0x3F_FFFF, CORE_MAP_START >> 12);
    }
}
