//! Fixed memory and storage layout
//!
//! One map shared by every component: the virtual regions mapped into all
//! address spaces, the physical window backing the core frame map, and the
//! reserved block offsets on storage. A port may choose different values,
//! but every component reads them from here so a single choice stays
//! consistent system-wide.

/// Bytes per page / physical frame
pub const PAGE_SIZE: usize = 4096;

/// Bytes per storage block
pub const BLOCK_SIZE: usize = 512;

/// Blocks backing one page on the paging device
pub const BLOCKS_PER_PAGE: usize = PAGE_SIZE / BLOCK_SIZE;

/* Virtual regions (all page-aligned unless noted) */

/// App argc/argv area; `a1` points here on entry
pub const APPS_ARG: u32 = 0x8000_0000;

/// OS code+data region base (identity-mapped in every address space,
/// one page above the argument page so the two never collide)
pub const OS_ENTRY: u32 = 0x8000_1000;

/// OS code+data region size
pub const OS_SIZE: u32 = 0x0000_9000;

/// earth capability table base
pub const EARTH_TABLE_BASE: u32 = 0x8001_0000;

/// grass capability table base
pub const GRASS_TABLE_BASE: u32 = 0x8001_0800;

/// Top of the kernel boot stack
pub const OS_STACK_TOP: u32 = 0x8002_0000;

/// Loader entry page (first page of the in-process loader)
pub const LOADER_PENTRY: u32 = 0x8003_0000;

/// Loader saved process+syscall snapshot page
pub const LOADER_VSTATE: u32 = 0x8003_8000;

/// Top of the loader stack (grows down from the loader entry page)
pub const LOADER_VSTACK_TOP: u32 = 0x8003_0000;

/// Loader stack pages
pub const LOADER_VSTACK_NPAGES: usize = 2;

/// Syscall argument page, shared with the kernel
pub const SYSCALL_VARG: u32 = 0x8004_0000;

/// Physical base of the core frame map / frame cache window
pub const CORE_MAP_START: u32 = 0x8004_0000;

/// Frames managed by the core map
pub const CORE_MAP_NPAGES: usize = 256;

/// Cache slots on the constrained target (28 * 4 KiB = 112 KiB)
pub const CACHED_NFRAMES: usize = 28;

/// User stack: grows down from just under `STACK_VTOP`
pub const STACK_VTOP: u32 = 0x7FFF_FF00;

/// Bottom of the user stack/heap region
pub const STACK_VBOTTOM: u32 = 0x3000_0000;

/// Identity-mapped flash ROM window
pub const ROM_START: u32 = 0x2040_0000;

/// Flash ROM window size (2 MiB)
pub const ROM_SIZE: u32 = 0x0020_0000;

/// Flash region serving as the block store in ROM mode
pub const ROM_DISK_START: u32 = 0x2080_0000;

/// ROM-mode block store size (4 MiB)
pub const ROM_DISK_SIZE: u32 = 0x0040_0000;

/// UART0 controller base
pub const UART0_BASE: usize = 0x1001_3000;

/// SPI1 controller base (SD card)
pub const SPI1_BASE: usize = 0x1002_4000;

/* Reserved block offsets on storage */

/// OS (earth+grass) image
pub const OS_EXEC_START: u32 = 0;

/// In-process loader image
pub const LOADER_EXEC_START: u32 = 2048;

/// Process server image
pub const PROC_EXEC_START: u32 = 3072;

/// File server image
pub const FILE_EXEC_START: u32 = 4096;

/// Directory server image
pub const DIR_EXEC_START: u32 = 5120;

/// Shell image
pub const SHELL_EXEC_START: u32 = 6144;

/// First block of the file system
pub const FS_START: u32 = 8192;
