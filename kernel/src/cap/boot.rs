//! Boot-time earth implementation
//!
//! Wires the [`Earth`](super::Earth) capability set to the concrete MMU
//! manager, block device and console chosen at boot. Privileged CSR work
//! is delegated to the arch layer and compiles away on the host, where
//! the test suites use mock implementations instead.

use crate::drivers::disk::BlockDevice;
use crate::drivers::uart::{Console, ETX};
use crate::error::KernelResult;
use crate::layout::SYSCALL_VARG;
use crate::loader::{self, SegmentTable};
use crate::mm::{Mmu, Page};
use crate::process::Pid;
use crate::syscall::abi::SyscallBlock;

use super::{Earth, ExternalEvent, Privilege};

/// Small receive ring between the UART interrupt and `tty_read`.
struct RxRing {
    buf: [u8; 64],
    head: usize,
    tail: usize,
}

impl RxRing {
    const fn new() -> Self {
        Self {
            buf: [0; 64],
            head: 0,
            tail: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        let next = (self.head + 1) % self.buf.len();
        if next != self.tail {
            self.buf[self.head] = byte;
            self.head = next;
        }
        // On overflow the byte is dropped; the terminal can retype
    }

    fn pop(&mut self) -> Option<u8> {
        if self.head == self.tail {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % self.buf.len();
        Some(byte)
    }
}

pub struct BootEarth<D: BlockDevice, C: Console> {
    mmu: Mmu,
    disk: D,
    console: C,
    rx: RxRing,
}

impl<D: BlockDevice, C: Console> BootEarth<D, C> {
    pub fn new(mmu: Mmu, disk: D, console: C) -> Self {
        Self {
            mmu,
            disk,
            console,
            rx: RxRing::new(),
        }
    }

    pub fn disk_mut(&mut self) -> &mut D {
        &mut self.disk
    }

    pub fn mmu_mut(&mut self) -> &mut Mmu {
        &mut self.mmu
    }

    /// Drain the console into the rx ring; Ctrl-C becomes a kill event.
    fn drain_console(&mut self) -> ExternalEvent {
        let mut event = ExternalEvent::None;
        while let Some(byte) = self.console.try_getc() {
            if byte == ETX {
                event = ExternalEvent::KillRequest;
            } else {
                self.rx.push(byte);
            }
        }
        event
    }

    fn block_of_page(page: &mut Page) -> &mut SyscallBlock {
        // SAFETY: SyscallBlock is plain integers, smaller than a page,
        // and the 4096-byte page alignment covers its alignment. The
        // exclusive page borrow carries over.
        unsafe { &mut *(page as *mut Page as *mut SyscallBlock) }
    }
}

impl<D: BlockDevice, C: Console> Earth for BootEarth<D, C> {
    fn timer_enable(&mut self) {
        #[cfg(target_arch = "riscv32")]
        crate::arch::riscv::timer::enable();
    }

    fn timer_disable(&mut self) {
        #[cfg(target_arch = "riscv32")]
        crate::arch::riscv::timer::disable();
    }

    fn timer_reset(&mut self) {
        #[cfg(target_arch = "riscv32")]
        crate::arch::riscv::timer::reset();
    }

    fn wait_for_interrupt(&mut self) -> KernelResult<ExternalEvent> {
        #[cfg(target_arch = "riscv32")]
        {
            crate::arch::riscv::timer::disable();
            crate::arch::riscv::csr::wfi();
            crate::arch::riscv::timer::enable();
        }
        self.trap_external()
    }

    fn clear_soft_interrupt(&mut self) {
        #[cfg(target_arch = "riscv32")]
        crate::arch::riscv::timer::clear_soft();
    }

    fn mmu_alloc(&mut self, pid: Pid) -> KernelResult<()> {
        self.mmu.alloc(pid)
    }

    fn mmu_map(&mut self, pid: Pid, vaddr: u32) -> KernelResult<u32> {
        self.mmu.map(pid, vaddr)
    }

    fn mmu_switch(&mut self, pid: Pid) {
        match self.mmu.satp(pid) {
            Ok(_satp) => {
                #[cfg(target_arch = "riscv32")]
                crate::arch::riscv::csr::satp_write(pid.0 as u16, _satp & 0x3F_FFFF);
            }
            Err(err) => log::warn!("mmu_switch to {} without a root: {}", pid, err),
        }
    }

    fn mmu_free(&mut self, pid: Pid) {
        self.mmu.free(pid);
    }

    fn user_page(&mut self, pid: Pid, vaddr: u32) -> KernelResult<&mut Page> {
        self.mmu.user_page(pid, vaddr)
    }

    fn syscall_block(&mut self, pid: Pid) -> KernelResult<&mut SyscallBlock> {
        let page = self.mmu.user_page(pid, SYSCALL_VARG)?;
        Ok(Self::block_of_page(page))
    }

    fn disk_read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()> {
        self.disk.read(block_no, nblocks, dst)
    }

    fn disk_write(&mut self, block_no: u32, nblocks: u32, src: &[u8]) -> KernelResult<()> {
        self.disk.write(block_no, nblocks, src)
    }

    fn tty_read(&mut self) -> Option<u8> {
        self.rx.pop().or_else(|| self.console.try_getc())
    }

    fn tty_write(&mut self, buf: &[u8]) {
        self.console.write_bytes(buf);
    }

    #[cfg(target_arch = "riscv32")]
    fn trap_external(&mut self) -> KernelResult<ExternalEvent> {
        use crate::arch::riscv::plic;

        let mut event = ExternalEvent::None;
        loop {
            let id = plic::claim();
            if id == 0 {
                break;
            }
            match id {
                plic::SPI_IRQ => self.disk.on_rx()?,
                plic::UART_IRQ => {
                    if self.drain_console() == ExternalEvent::KillRequest {
                        event = ExternalEvent::KillRequest;
                    }
                }
                _ => log::warn!("unexpected external interrupt {}", id),
            }
            plic::complete(id);
        }
        Ok(event)
    }

    #[cfg(not(target_arch = "riscv32"))]
    fn trap_external(&mut self) -> KernelResult<ExternalEvent> {
        self.disk.on_rx()?;
        Ok(self.drain_console())
    }

    fn loader_fault(&mut self, pid: Pid, segtbl: &SegmentTable, vaddr: u32) -> KernelResult<()> {
        loader::handle_fault(segtbl, &mut self.mmu, &mut self.disk, pid, vaddr)
    }

    fn set_return_privilege(&mut self, _privilege: Privilege) {
        #[cfg(target_arch = "riscv32")]
        {
            use crate::arch::riscv::csr::{self, ReturnMode};
            csr::set_return_mode(match _privilege {
                Privilege::Kernel => ReturnMode::Machine,
                Privilege::User => ReturnMode::User,
            });
        }
    }
}
