//! Block device interface
//!
//! Two implementations of one capability, resolved at boot: [`SdDisk`]
//! drives the SD command machine from the external-interrupt path, and
//! [`FlashRom`] serves reads straight out of memory-mapped flash.
//!
//! `read`/`write` are the scheduler-friendly entry points: on the SD
//! variant they return [`KernelError::WouldBlock`] until the interrupt
//! path finishes the command, which the syscall layer converts into a
//! pending retry. `kernel_read`/`kernel_write` are the synchronous polled
//! paths used during boot and by the paging device.

use crate::error::{DiskError, KernelError, KernelResult};
use crate::layout::BLOCK_SIZE;

use super::sd::{SdCard, SdEvent, SdOp};
use super::spi::SpiBus;

/// Storage reachable in 512-byte blocks.
pub trait BlockDevice {
    /// Non-blocking read; `WouldBlock` until the data is in `dst`.
    fn read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()>;

    /// Non-blocking write; `WouldBlock` until the device accepted it.
    fn write(&mut self, block_no: u32, nblocks: u32, src: &[u8]) -> KernelResult<()>;

    /// Polled read for boot and kernel-internal callers.
    fn kernel_read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()>;

    /// Polled write for boot and kernel-internal callers.
    fn kernel_write(&mut self, block_no: u32, nblocks: u32, src: &[u8]) -> KernelResult<()>;

    /// Receive-interrupt entry point.
    fn on_rx(&mut self) -> KernelResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmdState {
    /// Waiting for a command
    Idle,
    /// Command handed to the card
    Running,
    /// Data ready, waiting for the issuer to pick it up
    Finished,
}

/// The single in-flight command cell shared with the interrupt handler.
struct DiskCommand {
    op: SdOp,
    state: CmdState,
    block_no: u32,
    data: [u8; BLOCK_SIZE],
}

/// Interrupt-driven SD card disk.
pub struct SdDisk<B: SpiBus> {
    card: SdCard<B>,
    cmd: DiskCommand,
}

impl<B: SpiBus> SdDisk<B> {
    pub fn new(card: SdCard<B>) -> Self {
        Self {
            card,
            cmd: DiskCommand {
                op: SdOp::Read,
                state: CmdState::Idle,
                block_no: 0,
                data: [0; BLOCK_SIZE],
            },
        }
    }

    fn start(&mut self, op: SdOp, block_no: u32, src: Option<&[u8]>) -> KernelResult<()> {
        if let Some(src) = src {
            self.cmd.data.copy_from_slice(&src[..BLOCK_SIZE]);
        }
        self.card.start_cmd(op, block_no)?;
        self.cmd.op = op;
        self.cmd.block_no = block_no;
        self.cmd.state = CmdState::Running;
        Ok(())
    }
}

impl<B: SpiBus> BlockDevice for SdDisk<B> {
    fn read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()> {
        if nblocks != 1 {
            // The command cell holds one block; multi-block callers use
            // the polled path
            return Err(KernelError::BadArg {
                name: "nblocks",
                value: nblocks as usize,
            });
        }

        if self.cmd.state == CmdState::Idle {
            self.start(SdOp::Read, block_no, None)?;
        }

        if self.cmd.state == CmdState::Finished
            && self.cmd.op == SdOp::Read
            && self.cmd.block_no == block_no
        {
            dst[..BLOCK_SIZE].copy_from_slice(&self.cmd.data);
            self.cmd.state = CmdState::Idle;
            return Ok(());
        }

        Err(KernelError::WouldBlock)
    }

    fn write(&mut self, block_no: u32, nblocks: u32, src: &[u8]) -> KernelResult<()> {
        if nblocks != 1 {
            return Err(KernelError::BadArg {
                name: "nblocks",
                value: nblocks as usize,
            });
        }

        if self.cmd.state == CmdState::Idle {
            self.start(SdOp::Write, block_no, Some(src))?;
        }

        if self.cmd.state == CmdState::Finished
            && self.cmd.op == SdOp::Write
            && self.cmd.block_no == block_no
        {
            self.cmd.state = CmdState::Idle;
            return Ok(());
        }

        Err(KernelError::WouldBlock)
    }

    fn kernel_read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()> {
        for i in 0..nblocks as usize {
            self.card
                .read_blocking(block_no + i as u32, &mut dst[i * BLOCK_SIZE..])?;
        }
        Ok(())
    }

    fn kernel_write(&mut self, block_no: u32, nblocks: u32, src: &[u8]) -> KernelResult<()> {
        for i in 0..nblocks as usize {
            self.card
                .write_blocking(block_no + i as u32, &src[i * BLOCK_SIZE..])?;
        }
        Ok(())
    }

    fn on_rx(&mut self) -> KernelResult<()> {
        if self.cmd.state != CmdState::Running {
            // Spurious interrupt; drain and move on
            return Ok(());
        }
        if self.card.advance(&mut self.cmd.data)? == SdEvent::Done {
            self.cmd.state = CmdState::Finished;
        }
        Ok(())
    }
}

/// Memory-mapped read-only flash.
pub struct FlashRom {
    image: &'static [u8],
}

impl FlashRom {
    pub const fn new(image: &'static [u8]) -> Self {
        Self { image }
    }

    fn copy_out(&self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()> {
        let start = block_no as usize * BLOCK_SIZE;
        let len = nblocks as usize * BLOCK_SIZE;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.image.len())
            .ok_or(DiskError::OutOfRange { block: block_no })?;
        dst[..len].copy_from_slice(&self.image[start..end]);
        Ok(())
    }
}

impl BlockDevice for FlashRom {
    fn read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()> {
        self.copy_out(block_no, nblocks, dst)
    }

    fn write(&mut self, _block_no: u32, _nblocks: u32, _src: &[u8]) -> KernelResult<()> {
        // Writing flash is never intended
        Err(DiskError::ReadOnly.into())
    }

    fn kernel_read(&mut self, block_no: u32, nblocks: u32, dst: &mut [u8]) -> KernelResult<()> {
        self.copy_out(block_no, nblocks, dst)
    }

    fn kernel_write(&mut self, _block_no: u32, _nblocks: u32, _src: &[u8]) -> KernelResult<()> {
        Err(DiskError::ReadOnly.into())
    }

    fn on_rx(&mut self) -> KernelResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sd::{CardKind, DUMMY_BYTE, START_TOKEN};
    use std::collections::VecDeque;
    use std::vec::Vec;

    struct ScriptedBus {
        replies: VecDeque<u8>,
        sent: Vec<u8>,
    }

    impl SpiBus for ScriptedBus {
        fn try_send(&mut self, byte: u8) -> bool {
            self.sent.push(byte);
            true
        }

        fn try_recv(&mut self) -> Option<u8> {
            self.replies.pop_front()
        }
    }

    #[test]
    fn sd_disk_read_would_block_until_interrupt_completes() {
        let bus = ScriptedBus {
            replies: VecDeque::new(),
            sent: Vec::new(),
        };
        let card = SdCard::with_kind(bus, CardKind::Sdhc);
        let mut disk = SdDisk::new(card);

        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(disk.read(9, 1, &mut buf), Err(KernelError::WouldBlock));

        // Card answers: response, start token, block of 0x42, checksum
        let mut replies = std::vec![0x00, DUMMY_BYTE, START_TOKEN];
        replies.extend(core::iter::repeat(0x42).take(BLOCK_SIZE));
        replies.extend([0x00, 0x00]);
        disk.card.bus_mut().replies.extend(replies);

        disk.on_rx().unwrap();
        disk.read(9, 1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x42));
    }

    #[test]
    fn flash_rom_reads_and_rejects_writes() {
        // A 4-block image
        let mut image = std::vec![0u8; 4 * BLOCK_SIZE];
        image[BLOCK_SIZE] = 0x77;
        let mut rom = FlashRom::new(std::boxed::Box::leak(image.into_boxed_slice()));
        let mut buf = [0u8; BLOCK_SIZE];
        rom.read(1, 1, &mut buf).unwrap();
        assert_eq!(buf[0], 0x77);

        assert_eq!(
            rom.write(0, 1, &buf),
            Err(KernelError::DiskError(DiskError::ReadOnly))
        );
        assert_eq!(
            rom.read(4, 1, &mut buf),
            Err(KernelError::DiskError(DiskError::OutOfRange { block: 4 }))
        );
    }
}
