//! Bare-metal entry point
//!
//! Boot order: console and logger, traps, interrupt sources, physical
//! memory protection, then the earth capability set over the chosen
//! block device, the in-memory capability tables, and finally the first
//! kernel process (the process server), entered by first dispatch.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(all(target_os = "none", target_arch = "riscv32"))]
mod boot {
    use core::arch::global_asm;

    use lazy_static::lazy_static;
    use spin::Mutex;

    use loam_kernel::arch::riscv::{csr, plic, timer, trap};
    use loam_kernel::cap::boot::BootEarth;
    use loam_kernel::cap::table::{self, EarthTable, GrassTable};
    use loam_kernel::drivers::disk::FlashRom;
    use loam_kernel::drivers::uart::{logger, MmioUart};
    use loam_kernel::layout::{
        CORE_MAP_NPAGES, CORE_MAP_START, OS_STACK_TOP, PROC_EXEC_START, ROM_DISK_SIZE,
        ROM_DISK_START, UART0_BASE,
    };
    use loam_kernel::loader::SegmentTable;
    use loam_kernel::mm::{CoreMap, Mmu, Page};
    use loam_kernel::process::{Pid, TrapFrame, GPID_UNUSED};
    use loam_kernel::sched::{Kernel, Trap};
    use loam_kernel::syscall::userspace;

    global_asm!(
        r#"
        .section .text.entry
        .globl _start
    _start:
        li   sp, {stack_top}
        call kmain
    1:  wfi
        j 1b
    "#,
        stack_top = const OS_STACK_TOP,
    );

    type Earth = BootEarth<FlashRom, MmioUart>;

    lazy_static! {
        static ref KERNEL: Mutex<Kernel> = Mutex::new(Kernel::new());
        static ref EARTH: Mutex<Earth> = Mutex::new(make_earth());
    }

    fn make_earth() -> Earth {
        // SAFETY: the core-map window is reserved RAM nothing else uses;
        // boot runs once.
        let storage = unsafe {
            core::slice::from_raw_parts_mut(CORE_MAP_START as usize as *mut Page, CORE_MAP_NPAGES)
        };
        let mmu = Mmu::new(CoreMap::new(storage, CORE_MAP_START));

        // SAFETY: memory-mapped flash, read-only by construction.
        let image = unsafe {
            core::slice::from_raw_parts(
                ROM_DISK_START as usize as *const u8,
                ROM_DISK_SIZE as usize,
            )
        };
        let disk = FlashRom::new(image);

        BootEarth::new(mmu, disk, MmioUart::new(UART0_BASE))
    }

    #[no_mangle]
    extern "C" fn kmain() -> ! {
        let mut console = MmioUart::new(UART0_BASE);
        console.init();
        logger::init(console, log::LevelFilter::Info);
        log::info!("loam-kernel {}", env!("CARGO_PKG_VERSION"));

        csr::pmp_open();
        trap::init(kernel_trap);
        plic::init();
        csr::irq_init();

        let frame = {
            let mut earth = EARTH.lock();
            let mut kernel = KERNEL.lock();

            // SAFETY: boot-time install into the reserved table pages.
            unsafe {
                table::install(earth_table(), grass_table());
            }

            // First kernel process: the process server, demand-paged
            // from its fixed image offset
            let pid = match kernel.proc_alloc(&mut *earth, GPID_UNUSED) {
                Ok(pid) => pid,
                Err(err) => panic!("boot: {}", err),
            };
            if load_fixed_image(&mut kernel, &mut earth, pid, PROC_EXEC_START) < 0 {
                panic!("boot: no process server image");
            }
            kernel.proc_set_ready(pid);

            if let Err(err) = kernel.yield_to(&mut *earth) {
                panic!("boot: {}", err);
            }
            kernel.restore_context()
        };

        log::info!("entering the process server");
        enter(frame)
    }

    fn enter(frame: TrapFrame) -> ! {
        trap::enter(frame.pc, &frame.regs)
    }

    /// Trap glue: spill/refill the register save area around the kernel
    /// entry. A timer tick that finds the kernel lock held interrupted a
    /// grass-table call from a server; servers are not preempted, so the
    /// tick is just re-armed.
    fn kernel_trap(is_interrupt: bool, code: usize) {
        const INTR_SOFT: usize = 3;
        const INTR_TIMER: usize = 7;
        const INTR_EXTERNAL: usize = 11;
        const EXC_ECALL_U: usize = 8;
        const EXC_ECALL_M: usize = 11;

        let (Some(mut kernel), Some(mut earth)) = (KERNEL.try_lock(), EARTH.try_lock()) else {
            timer::reset();
            return;
        };

        let mut frame = TrapFrame {
            pc: csr::mepc_read(),
            regs: *trap::saved_regs(),
        };

        let trap = if is_interrupt {
            match code {
                INTR_TIMER => Trap::Timer,
                INTR_SOFT => Trap::Syscall,
                INTR_EXTERNAL => Trap::External,
                code => {
                    log::warn!("stray interrupt {}", code);
                    return;
                }
            }
        } else {
            match code {
                EXC_ECALL_U | EXC_ECALL_M => {
                    // Resume after the ecall instruction
                    frame.pc += 4;
                    Trap::Syscall
                }
                code => Trap::Fault {
                    vaddr: csr::mtval_read(),
                    code: code as u32,
                },
            }
        };

        kernel.save_context(frame);
        if let Err(err) = kernel.handle_trap(&mut *earth, trap) {
            panic!("unrecoverable: {}", err);
        }

        let frame = kernel.restore_context();
        *trap::saved_regs() = frame.regs;
        csr::mepc_write(frame.pc);
    }

    /// Build a segment table for an image at a fixed block offset and
    /// register it for demand paging.
    fn load_fixed_image(kernel: &mut Kernel, earth: &mut Earth, pid: Pid, image_start: u32) -> i32 {
        use loam_kernel::drivers::disk::BlockDevice;

        let segtbl = SegmentTable::from_image(
            |block_no, buf| {
                earth
                    .disk_mut()
                    .kernel_read(image_start + block_no, 1, buf)
            },
            Some(image_start),
        );
        match segtbl {
            Ok(segtbl) => {
                kernel.register_image(pid, segtbl, 0);
                0
            }
            Err(err) => {
                log::warn!("load of image at block {} failed: {}", image_start, err);
                -1
            }
        }
    }

    /* capability-table population */

    fn earth_table() -> EarthTable {
        EarthTable {
            tty_write: |buf| {
                use loam_kernel::cap::Earth as _;
                EARTH.lock().tty_write(buf)
            },
            tty_read: || {
                use loam_kernel::cap::Earth as _;
                EARTH.lock().tty_read().map(i32::from).unwrap_or(-1)
            },
        }
    }

    fn grass_table() -> GrassTable {
        GrassTable {
            workdir_ino: 0,
            workdir: [0; 128],
            proc_alloc: |parent| {
                let mut earth = EARTH.lock();
                KERNEL
                    .lock()
                    .proc_alloc(&mut *earth, parent)
                    .map(|pid| pid.0)
                    .unwrap_or(-1)
            },
            proc_free: |pid| {
                let mut earth = EARTH.lock();
                KERNEL.lock().proc_free(&mut *earth, pid);
            },
            proc_set_ready: |pid| KERNEL.lock().proc_set_ready(pid),
            proc_load: |pid, image_start| {
                let mut earth = EARTH.lock();
                load_fixed_image(&mut KERNEL.lock(), &mut earth, pid, image_start)
            },
            proc_register: |pid, segtbl, argc| {
                KERNEL.lock().register_image(pid, *segtbl, argc);
                0
            },
            vm_write: |pid, vaddr, bytes| {
                use loam_kernel::cap::Earth as _;
                use loam_kernel::layout::PAGE_SIZE;

                let offset = vaddr as usize % PAGE_SIZE;
                if offset + bytes.len() > PAGE_SIZE {
                    return -1;
                }
                match EARTH.lock().user_page(pid, vaddr & !(PAGE_SIZE as u32 - 1)) {
                    Ok(page) => {
                        page.0[offset..offset + bytes.len()].copy_from_slice(bytes);
                        0
                    }
                    Err(_) => -1,
                }
            },
            sys_exit: userspace::sys_exit,
            sys_wait: userspace::sys_wait,
            sys_send: userspace::sys_send,
            sys_recv: userspace::sys_recv,
            sys_disk: userspace::sys_disk,
            sys_tty: userspace::sys_tty,
            sys_vm_map: userspace::sys_vm_map,
        }
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        log::error!("kernel panic: {}", info);
        loop {
            csr::wfi();
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("loam-kernel is a bare-metal image; build it for a riscv32 target");
}
