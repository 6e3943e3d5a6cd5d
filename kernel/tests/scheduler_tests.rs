//! Scheduler: liveness, timer policy, first dispatch, fault isolation

mod common;

use common::{build_elf, make_current, spawn, MemDisk, MockEarth};
use loam_kernel::cap::Privilege;
use loam_kernel::drivers::disk::BlockDevice;
use loam_kernel::layout::{APPS_ARG, CORE_MAP_START, STACK_VTOP};
use loam_kernel::loader::SegmentTable;
use loam_kernel::process::{
    pcb::{REG_A0, REG_A1, REG_SP},
    Pid, ProcStatus, GPID_ALL, GPID_UNUSED,
};
use loam_kernel::sched::{Kernel, Trap};
use loam_kernel::syscall::abi::SyscallKind;
use loam_kernel::KernelError;

fn idx(kernel: &Kernel, pid: Pid) -> usize {
    kernel.procs().index_of(pid).unwrap()
}

/// Park `pid` in a pending recv from anyone.
fn park_in_recv(kernel: &mut Kernel, earth: &mut MockEarth, pid: Pid) {
    let block = earth.block(pid);
    block.set_kind(SyscallKind::Recv);
    block.msg.sender = GPID_ALL.0;
    kernel.dispatch_at(earth, idx(kernel, pid)).unwrap();
    assert_eq!(kernel.procs().status_of(pid), Some(ProcStatus::Pending));
}

#[test]
fn one_runnable_among_pending_is_found_within_one_turn() {
    let mut kernel = Kernel::new();
    let mut earth = MockEarth::new();

    let mut pids = std::vec::Vec::new();
    for _ in 0..5 {
        pids.push(spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable));
    }
    for &pid in &pids[..4] {
        park_in_recv(&mut kernel, &mut earth, pid);
    }

    kernel.yield_to(&mut earth).unwrap();
    assert_eq!(kernel.curr_pid(), pids[4]);
    assert_eq!(earth.wfi_count, 0);
}

#[test]
fn all_pending_parks_the_hart_in_wait_for_interrupt() {
    let mut kernel = Kernel::new();
    let mut earth = MockEarth::new();

    for _ in 0..3 {
        let pid = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
        park_in_recv(&mut kernel, &mut earth, pid);
    }

    // Nothing can run; the scan must sleep, not spin. The mock reports
    // an error once its wait budget is spent, ending the test.
    earth.wfi_limit = 2;
    assert_eq!(kernel.yield_to(&mut earth), Err(KernelError::WouldBlock));
    assert_eq!(earth.wfi_count, 3);
}

#[test]
fn timer_tick_does_not_preempt_a_server() {
    let mut kernel = Kernel::new();
    let mut earth = MockEarth::new();

    let server = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    let other = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    assert!(!server.is_preemptible());

    make_current(&mut kernel, &mut earth, server);
    let switches_before = earth.switches.len();

    kernel.handle_trap(&mut earth, Trap::Timer).unwrap();

    // Still the server's turn; only the timer was re-armed
    assert_eq!(kernel.curr_pid(), server);
    assert_eq!(kernel.procs().status_of(server), Some(ProcStatus::Running));
    assert_eq!(earth.switches.len(), switches_before);
    assert!(earth.timer_resets > 0);
    let _ = other;
}

#[test]
fn timer_tick_preempts_a_user_process() {
    let mut kernel = Kernel::new();
    let mut earth = MockEarth::new();

    for _ in 0..4 {
        spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    }
    let user_a = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    let user_b = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    assert!(user_a.is_preemptible());

    make_current(&mut kernel, &mut earth, user_a);
    kernel.handle_trap(&mut earth, Trap::Timer).unwrap();

    assert_ne!(kernel.curr_pid(), user_a);
    assert_eq!(kernel.procs().status_of(user_a), Some(ProcStatus::Runnable));
    let _ = user_b;
}

#[test]
fn first_dispatch_seeds_entry_stack_and_args() {
    let mut kernel = Kernel::new();
    let mut earth = MockEarth::new();

    let image = build_elf(&[(0x0800_5000, 0x400, 0x1000, 8)]);
    let mut disk = MemDisk::from_image(&image);
    let segtbl = SegmentTable::from_image(
        |block_no, buf| disk.kernel_read(block_no, 1, buf),
        Some(0),
    )
    .unwrap();

    let pid = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Loading);
    kernel.register_image(pid, segtbl, 2);
    kernel.proc_set_ready(pid);

    kernel.yield_to(&mut earth).unwrap();
    assert_eq!(kernel.curr_pid(), pid);

    let frame = &kernel.procs().get(pid).unwrap().frame;
    assert_eq!(frame.pc, 0x0800_5000);
    assert_eq!(frame.regs[REG_SP], STACK_VTOP);
    assert_eq!(frame.regs[REG_A0], 2);
    assert_eq!(frame.regs[REG_A1], APPS_ARG);
    assert_eq!(kernel.procs().status_of(pid), Some(ProcStatus::Running));
}

#[test]
fn dispatch_selects_privilege_and_timer_per_process_class() {
    let mut kernel = Kernel::new();
    let mut earth = MockEarth::new();

    let server = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    make_current(&mut kernel, &mut earth, server);
    assert_eq!(earth.privilege, Some(Privilege::Kernel));
    assert_eq!(earth.timer_enabled, Some(false));

    for _ in 0..4 {
        spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    }
    let user = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    make_current(&mut kernel, &mut earth, user);
    assert_eq!(earth.privilege, Some(Privilege::User));
    assert_eq!(earth.timer_enabled, Some(true));
}

#[test]
fn segfault_kills_only_the_faulting_user_process() {
    let mut kernel = Kernel::new();
    let mut earth = MockEarth::new();

    let shell = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    for _ in 0..3 {
        spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    }
    let victim = spawn(&mut kernel, &mut earth, shell, ProcStatus::Runnable);
    let bystander = spawn(&mut kernel, &mut earth, shell, ProcStatus::Runnable);

    make_current(&mut kernel, &mut earth, victim);

    // A wild store into the frame-cache window: outside every segment
    kernel
        .handle_trap(
            &mut earth,
            Trap::Fault {
                vaddr: CORE_MAP_START,
                code: 15,
            },
        )
        .unwrap();

    assert_eq!(kernel.procs().status_of(victim), Some(ProcStatus::Zombie));
    assert_ne!(kernel.curr_pid(), victim);
    assert_eq!(
        kernel.procs().status_of(bystander),
        Some(ProcStatus::Runnable)
    );

    // The parent's wait reaps the killed process
    earth.block(shell).set_kind(SyscallKind::Wait);
    kernel.dispatch_at(&mut earth, idx(&kernel, shell)).unwrap();
    let content = &earth.block(shell).msg.content;
    let reaped = i32::from_le_bytes([content[0], content[1], content[2], content[3]]);
    assert_eq!(reaped, victim.0);
}

#[test]
fn resolvable_fault_returns_to_the_faulting_process() {
    let mut kernel = Kernel::new();
    let mut earth = MockEarth::new();
    earth.fault_ok = true;

    let image = build_elf(&[(0x0800_5000, 0x400, 0x1000, 8)]);
    let mut disk = MemDisk::from_image(&image);
    let segtbl = SegmentTable::from_image(
        |block_no, buf| disk.kernel_read(block_no, 1, buf),
        Some(0),
    )
    .unwrap();

    let pid = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Loading);
    kernel.register_image(pid, segtbl, 0);
    kernel.proc_set_ready(pid);
    make_current(&mut kernel, &mut earth, pid);

    kernel
        .handle_trap(
            &mut earth,
            Trap::Fault {
                vaddr: 0x0800_5200,
                code: 13,
            },
        )
        .unwrap();

    // Served by the loader, no scheduling decision, process still running
    assert_eq!(earth.faults, std::vec![(pid, 0x0800_5200)]);
    assert_eq!(kernel.curr_pid(), pid);
    assert_eq!(kernel.procs().status_of(pid), Some(ProcStatus::Running));
}

#[test]
fn ctrl_c_redirects_the_current_user_process_to_exit() {
    let mut kernel = Kernel::new();
    let mut earth = MockEarth::new();

    for _ in 0..4 {
        spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    }
    let user = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    make_current(&mut kernel, &mut earth, user);

    earth
        .external_events
        .push_back(loam_kernel::cap::ExternalEvent::KillRequest);
    kernel.handle_trap(&mut earth, Trap::External).unwrap();

    // The redirect is consumed when the round-robin scan next reaches
    // the victim: instead of being dispatched it enters the exit
    // protocol. One full turn is enough.
    for _ in 0..loam_kernel::process::MAX_NPROCESS {
        kernel.yield_to(&mut earth).unwrap();
    }
    assert_eq!(kernel.procs().status_of(user), Some(ProcStatus::Zombie));
    assert_ne!(kernel.curr_pid(), user);
}

#[test]
fn ctrl_c_never_kills_a_kernel_process() {
    let mut kernel = Kernel::new();
    let mut earth = MockEarth::new();

    let server = spawn(&mut kernel, &mut earth, GPID_UNUSED, ProcStatus::Runnable);
    make_current(&mut kernel, &mut earth, server);

    earth
        .external_events
        .push_back(loam_kernel::cap::ExternalEvent::KillRequest);
    kernel.handle_trap(&mut earth, Trap::External).unwrap();

    assert_eq!(kernel.procs().status_of(server), Some(ProcStatus::Running));
}
