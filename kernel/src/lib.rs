//! loam-kernel
//!
//! A small teaching kernel for 32-bit RISC-V: a cooperative–preemptive
//! round-robin scheduler over a bounded process table, a single-slot
//! rendezvous message bus, a two-level Sv32 MMU with a software-managed
//! frame cache over block storage, and a fault-driven ELF segment
//! loader. Kernel-service processes (process server, shell) sit above
//! the kernel and talk to it only through the capability tables.
//!
//! The library is architecture-neutral outside `arch/`; it also builds
//! for the host, where the test suites exercise every subsystem against
//! mock hardware.

#![no_std]

// Host target (tests, tooling): link std so the standard test harness
// and collections are available.
#[cfg(not(target_os = "none"))]
extern crate std;

pub mod arch;
pub mod cap;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod ipc;
pub mod layout;
pub mod loader;
pub mod mm;
pub mod process;
pub mod sched;
pub mod services;
pub mod syscall;

pub use error::{KernelError, KernelResult};
pub use sched::{Kernel, Trap};
