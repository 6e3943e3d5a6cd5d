//! Program loading and fault-driven page-in
//!
//! A process's image is described by a small segment table built from its
//! ELF program headers plus one synthesized stack/heap segment. Server
//! images live at fixed block offsets and are materialised on demand by
//! the page-fault path; user binaries arrive through the file server and
//! are loaded eagerly at spawn, with only their stack/heap demand-zeroed.
//!
//! Every loadable segment must start on a page boundary: two segments
//! sharing a page is unsupported, and the violation is fatal at load
//! time, not silently corrected.

use crate::drivers::disk::BlockDevice;
use crate::elf::{program_headers, Elf32Header, Elf32ProgramHeader, PT_LOAD};
use crate::error::{KernelResult, LoaderError};
use crate::layout::{BLOCKS_PER_PAGE, BLOCK_SIZE, PAGE_SIZE, STACK_VBOTTOM, STACK_VTOP};
use crate::mm::Mmu;
use crate::process::Pid;

/// Segment-table capacity: program headers plus the stack segment
pub const MAX_SEGMENTS: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct Segment {
    pub base_vaddr: u32,
    pub rwx: u32,
    pub memsz: u32,
    pub filesz: u32,
    /// Block offset of the segment within its image
    pub file_block_offset: u32,
}

/// Per-process image map.
#[derive(Debug, Clone, Copy)]
pub struct SegmentTable {
    nseg: usize,
    segs: [Segment; MAX_SEGMENTS],
    entry: u32,
    /// First block of the image on storage; `None` for images that are
    /// not disk-addressable (eagerly loaded through the file server)
    image_start: Option<u32>,
}

impl SegmentTable {
    /// Build the table from block 0 of an image.
    ///
    /// `read` fetches one block of the image into a buffer.
    pub fn from_image(
        mut read: impl FnMut(u32, &mut [u8; BLOCK_SIZE]) -> KernelResult<()>,
        image_start: Option<u32>,
    ) -> KernelResult<SegmentTable> {
        let mut block = [0u8; BLOCK_SIZE];
        read(0, &mut block)?;

        let header = Elf32Header::parse(&block)?;
        let mut pheaders = [Elf32ProgramHeader {
            p_type: 0,
            offset: 0,
            vaddr: 0,
            paddr: 0,
            filesz: 0,
            memsz: 0,
            flags: 0,
            align: 0,
        }; MAX_SEGMENTS - 1];
        let count = program_headers(&block, &header, &mut pheaders)?;

        let mut table = SegmentTable {
            nseg: 0,
            segs: [Segment::default(); MAX_SEGMENTS],
            entry: header.entry,
            image_start,
        };

        for pheader in pheaders.iter().take(count) {
            if pheader.p_type != PT_LOAD || pheader.memsz == 0 {
                continue;
            }
            if pheader.vaddr as usize % PAGE_SIZE != 0 {
                return Err(LoaderError::Misaligned {
                    vaddr: pheader.vaddr,
                }
                .into());
            }
            if pheader.offset as usize % BLOCK_SIZE != 0 {
                return Err(LoaderError::BadImage {
                    reason: "segment file offset not block-aligned",
                }
                .into());
            }
            table.segs[table.nseg] = Segment {
                base_vaddr: pheader.vaddr,
                rwx: pheader.flags,
                memsz: pheader.memsz,
                filesz: pheader.filesz,
                file_block_offset: pheader.offset / BLOCK_SIZE as u32,
            };
            table.nseg += 1;
        }

        // Synthesized stack/heap segment, demand-zeroed
        table.segs[table.nseg] = Segment {
            base_vaddr: STACK_VBOTTOM,
            rwx: 0,
            memsz: STACK_VTOP - STACK_VBOTTOM,
            filesz: 0,
            file_block_offset: 0,
        };
        table.nseg += 1;

        Ok(table)
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segs[..self.nseg]
    }

    /// The segment whose `[base, base + memsz)` contains `vaddr`.
    pub fn find(&self, vaddr: u32) -> Option<&Segment> {
        self.segs[..self.nseg]
            .iter()
            .find(|seg| vaddr.checked_sub(seg.base_vaddr).is_some_and(|off| off < seg.memsz))
    }
}

/// Page-fault service: map the faulting page and materialise its bytes.
///
/// File-backed pages are fetched from the image's block range; everything
/// past `filesz` (bss, stack, heap) is zero-filled. An address outside
/// every segment is a [`LoaderError::Segfault`], which the kernel turns
/// into process termination.
pub fn handle_fault(
    segtbl: &SegmentTable,
    mmu: &mut Mmu,
    disk: &mut dyn BlockDevice,
    pid: Pid,
    vaddr: u32,
) -> KernelResult<()> {
    let seg = *segtbl
        .find(vaddr)
        .ok_or(LoaderError::Segfault { vaddr })?;

    let page_base = vaddr & !(PAGE_SIZE as u32 - 1);
    let paddr = mmu.map(pid, page_base)?;

    if vaddr - seg.base_vaddr < seg.filesz {
        if seg.base_vaddr as usize % PAGE_SIZE != 0 {
            return Err(LoaderError::Misaligned {
                vaddr: seg.base_vaddr,
            }
            .into());
        }
        let image_start = segtbl
            .image_start
            .ok_or(LoaderError::Segfault { vaddr })?;
        let block_no = image_start
            + seg.file_block_offset
            + (page_base - seg.base_vaddr) / BLOCK_SIZE as u32;

        let page = mmu.page_at(paddr)?;
        disk.kernel_read(block_no, BLOCKS_PER_PAGE as u32, &mut page.0)?;
    } else {
        mmu.page_at(paddr)?.fill(0);
    }
    Ok(())
}

/// Eagerly load a whole image into `pid`'s address space.
///
/// Used for user binaries whose bytes arrive through a reader rather than
/// a disk block range. Returns the segment table so stack and bss faults
/// can still be served on demand.
pub fn elf_load(
    pid: Pid,
    mut read: impl FnMut(u32, &mut [u8; BLOCK_SIZE]) -> KernelResult<()>,
    mmu: &mut Mmu,
) -> KernelResult<SegmentTable> {
    let segtbl = SegmentTable::from_image(&mut read, None)?;

    for seg in segtbl.segs[..segtbl.nseg].iter().filter(|s| s.filesz > 0) {
        let mut off = 0u32;
        while off < seg.memsz {
            let paddr = mmu.map(pid, seg.base_vaddr + off)?;
            let page = mmu.page_at(paddr)?;

            for chunk in 0..BLOCKS_PER_PAGE as u32 {
                let seg_off = off + chunk * BLOCK_SIZE as u32;
                let dst = &mut page.0
                    [chunk as usize * BLOCK_SIZE..(chunk as usize + 1) * BLOCK_SIZE];
                if seg_off < seg.filesz {
                    let mut block = [0u8; BLOCK_SIZE];
                    read(seg.file_block_offset + seg_off / BLOCK_SIZE as u32, &mut block)?;
                    dst.copy_from_slice(&block);
                } else {
                    dst.fill(0);
                }
            }
            off += PAGE_SIZE as u32;
        }
    }
    Ok(segtbl)
}
