//! Shared test fixtures: a mock earth capability set, an in-memory block
//! device, and an ELF image builder.

#![allow(dead_code)]

use std::boxed::Box;
use std::collections::VecDeque;
use std::vec::Vec;

use loam_kernel::cap::{Earth, ExternalEvent, Privilege};
use loam_kernel::drivers::disk::BlockDevice;
use loam_kernel::error::{KernelError, KernelResult, LoaderError};
use loam_kernel::layout::{BLOCK_SIZE, PAGE_SIZE};
use loam_kernel::loader::SegmentTable;
use loam_kernel::mm::{CoreMap, Mmu, Page};
use loam_kernel::process::{Pid, ProcStatus};
use loam_kernel::sched::Kernel;
use loam_kernel::syscall::abi::SyscallBlock;

/// Vec-backed block store; all paths synchronous.
pub struct MemDisk {
    pub data: Vec<u8>,
    pub writes: usize,
    pub reads: usize,
}

impl MemDisk {
    pub fn new(nblocks: usize) -> Self {
        Self {
            data: std::vec![0; nblocks * BLOCK_SIZE],
            writes: 0,
            reads: 0,
        }
    }

    pub fn from_image(image: &[u8]) -> Self {
        let mut disk = Self::new(image.len().div_ceil(BLOCK_SIZE));
        disk.data[..image.len()].copy_from_slice(image);
        disk
    }

    fn span(&self, block_no: u32, nblocks: u32) -> KernelResult<core::ops::Range<usize>> {
        let start = block_no as usize * BLOCK_SIZE;
        let end = start + nblocks as usize * BLOCK_SIZE;
        if end > self.data.len() {
            return Err(loam_kernel::error::DiskError::OutOfRange { block: block_no }.into());
        }
        Ok(start..end)
    }
}

impl BlockDevice for MemDisk {
    fn read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()> {
        self.kernel_read(block_no, nblocks, dst)
    }

    fn write(&mut self, block_no: u32, nblocks: u32, src: &[u8]) -> KernelResult<()> {
        self.kernel_write(block_no, nblocks, src)
    }

    fn kernel_read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()> {
        let span = self.span(block_no, nblocks)?;
        let len = span.len();
        dst[..len].copy_from_slice(&self.data[span]);
        self.reads += 1;
        Ok(())
    }

    fn kernel_write(&mut self, block_no: u32, nblocks: u32, src: &[u8]) -> KernelResult<()> {
        let span = self.span(block_no, nblocks)?;
        let len = span.len();
        self.data[span].copy_from_slice(&src[..len]);
        self.writes += 1;
        Ok(())
    }

    fn on_rx(&mut self) -> KernelResult<()> {
        Ok(())
    }
}

/// Scripted earth: every capability is recorded, nothing touches real
/// hardware.
pub struct MockEarth {
    blocks: Vec<Box<SyscallBlock>>,
    scratch: Box<Page>,
    pub disk: MemDisk,
    /// `disk_read`s that report WouldBlock before one succeeds
    pub disk_delay: usize,
    pub switches: Vec<Pid>,
    pub wfi_count: usize,
    /// After this many waits the mock aborts the scan with an error so
    /// tests observe wait-for-interrupt without hanging
    pub wfi_limit: usize,
    pub timer_resets: usize,
    pub timer_enabled: Option<bool>,
    pub freed: Vec<Pid>,
    pub allocs: Vec<Pid>,
    pub privilege: Option<Privilege>,
    pub tty_input: VecDeque<u8>,
    pub tty_output: Vec<u8>,
    pub external_events: VecDeque<ExternalEvent>,
    /// When true `loader_fault` succeeds; otherwise it segfaults
    pub fault_ok: bool,
    pub faults: Vec<(Pid, u32)>,
}

impl MockEarth {
    pub fn new() -> Self {
        Self {
            blocks: (0..32).map(|_| Box::new(SyscallBlock::new())).collect(),
            scratch: Box::new(Page::zeroed()),
            disk: MemDisk::new(256),
            disk_delay: 0,
            switches: Vec::new(),
            wfi_count: 0,
            wfi_limit: 4,
            timer_resets: 0,
            timer_enabled: None,
            freed: Vec::new(),
            allocs: Vec::new(),
            privilege: None,
            tty_input: VecDeque::new(),
            tty_output: Vec::new(),
            external_events: VecDeque::new(),
            fault_ok: false,
            faults: Vec::new(),
        }
    }

    /// The syscall page of `pid`, as tests prepare and inspect it.
    pub fn block(&mut self, pid: Pid) -> &mut SyscallBlock {
        &mut self.blocks[pid.0 as usize]
    }
}

impl Earth for MockEarth {
    fn timer_enable(&mut self) {
        self.timer_enabled = Some(true);
    }

    fn timer_disable(&mut self) {
        self.timer_enabled = Some(false);
    }

    fn timer_reset(&mut self) {
        self.timer_resets += 1;
    }

    fn wait_for_interrupt(&mut self) -> KernelResult<ExternalEvent> {
        self.wfi_count += 1;
        if self.wfi_count > self.wfi_limit {
            // Sentinel: no interrupt source in a mock; the scan would
            // otherwise never end
            return Err(KernelError::WouldBlock);
        }
        Ok(self.external_events.pop_front().unwrap_or(ExternalEvent::None))
    }

    fn clear_soft_interrupt(&mut self) {}

    fn mmu_alloc(&mut self, pid: Pid) -> KernelResult<()> {
        self.allocs.push(pid);
        Ok(())
    }

    fn mmu_map(&mut self, _pid: Pid, _vaddr: u32) -> KernelResult<u32> {
        Ok(0)
    }

    fn mmu_switch(&mut self, pid: Pid) {
        self.switches.push(pid);
    }

    fn mmu_free(&mut self, pid: Pid) {
        self.freed.push(pid);
    }

    fn user_page(&mut self, _pid: Pid, _vaddr: u32) -> KernelResult<&mut Page> {
        Ok(&mut self.scratch)
    }

    fn syscall_block(&mut self, pid: Pid) -> KernelResult<&mut SyscallBlock> {
        Ok(&mut self.blocks[pid.0 as usize])
    }

    fn disk_read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()> {
        if self.disk_delay > 0 {
            self.disk_delay -= 1;
            return Err(KernelError::WouldBlock);
        }
        self.disk.read(block_no, nblocks, dst)
    }

    fn disk_write(&mut self, block_no: u32, nblocks: u32, src: &[u8]) -> KernelResult<()> {
        self.disk.write(block_no, nblocks, src)
    }

    fn tty_read(&mut self) -> Option<u8> {
        self.tty_input.pop_front()
    }

    fn tty_write(&mut self, buf: &[u8]) {
        self.tty_output.extend_from_slice(buf);
    }

    fn trap_external(&mut self) -> KernelResult<ExternalEvent> {
        Ok(self.external_events.pop_front().unwrap_or(ExternalEvent::None))
    }

    fn loader_fault(&mut self, pid: Pid, _segtbl: &SegmentTable, vaddr: u32) -> KernelResult<()> {
        self.faults.push((pid, vaddr));
        if self.fault_ok {
            Ok(())
        } else {
            Err(LoaderError::Segfault { vaddr }.into())
        }
    }

    fn set_return_privilege(&mut self, privilege: Privilege) {
        self.privilege = Some(privilege);
    }
}

impl Default for MockEarth {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a process through the kernel and give it a status.
pub fn spawn(kernel: &mut Kernel, earth: &mut MockEarth, parent: Pid, status: ProcStatus) -> Pid {
    let pid = kernel.proc_alloc(earth, parent).expect("table full");
    kernel.procs_mut().set_status(pid, status);
    pid
}

/// Make `pid` the running process: park everyone else in `Loading`,
/// yield so the scheduler picks it, then restore the others.
pub fn make_current(kernel: &mut Kernel, earth: &mut MockEarth, pid: Pid) {
    let parked: Vec<(Pid, ProcStatus)> = kernel
        .procs()
        .iter()
        .filter(|p| p.pid != pid)
        .map(|p| (p.pid, p.status))
        .collect();

    for (other, _) in &parked {
        kernel.procs_mut().set_status(*other, ProcStatus::Loading);
    }
    kernel.procs_mut().set_status(pid, ProcStatus::Runnable);
    kernel.yield_to(earth).expect("nothing runnable");
    assert_eq!(kernel.curr_pid(), pid);

    for (other, status) in parked {
        kernel.procs_mut().set_status(other, status);
    }
}

/// A minimal RISC-V ELF32 image: `(vaddr, filesz, memsz, block_offset)`
/// per segment, data filled with the segment index + 1.
pub fn build_elf(segments: &[(u32, u32, u32, u32)]) -> Vec<u8> {
    let mut image = std::vec![0u8; 96 * BLOCK_SIZE];

    image[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    image[4] = 1; // ELF32
    image[5] = 1; // little-endian
    image[6] = 1;
    image[18..20].copy_from_slice(&0xF3u16.to_le_bytes());
    image[24..28].copy_from_slice(&0x0800_5000u32.to_le_bytes()); // entry
    image[28..32].copy_from_slice(&52u32.to_le_bytes()); // phoff
    image[42..44].copy_from_slice(&32u16.to_le_bytes()); // phentsize
    image[44..46].copy_from_slice(&(segments.len() as u16).to_le_bytes());

    for (i, &(vaddr, filesz, memsz, block_off)) in segments.iter().enumerate() {
        let at = 52 + i * 32;
        image[at..at + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        image[at + 4..at + 8].copy_from_slice(&(block_off * BLOCK_SIZE as u32).to_le_bytes());
        image[at + 8..at + 12].copy_from_slice(&vaddr.to_le_bytes());
        image[at + 16..at + 20].copy_from_slice(&filesz.to_le_bytes());
        image[at + 20..at + 24].copy_from_slice(&memsz.to_le_bytes());

        let data_start = block_off as usize * BLOCK_SIZE;
        for byte in &mut image[data_start..data_start + filesz as usize] {
            *byte = i as u8 + 1;
        }
    }
    image
}

/// An MMU over a leaked page window, as the kernel would own at boot.
pub fn make_mmu(nframes: usize) -> Mmu {
    let mut pages = Vec::new();
    pages.resize_with(nframes, Page::zeroed);
    let storage = Box::leak(pages.into_boxed_slice());
    Mmu::new(CoreMap::new(storage, loam_kernel::layout::CORE_MAP_START))
}

/// A leaked page window for the frame cache.
pub fn make_window(nslots: usize) -> &'static mut [Page] {
    let mut pages = Vec::new();
    pages.resize_with(nslots, Page::zeroed);
    Box::leak(pages.into_boxed_slice())
}

pub const ONE_PAGE: usize = PAGE_SIZE;
