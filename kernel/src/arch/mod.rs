//! Architecture support
//!
//! Everything privileged lives under here. The rest of the kernel is
//! architecture-neutral and reaches the hardware through the earth
//! capability table, so only the boot path and the concrete earth
//! implementation touch this module.

#[cfg(target_arch = "riscv32")]
pub mod riscv;
