//! SD card command state machine
//!
//! One command is in flight at a time, tracked by two cooperating
//! sub-FSMs that share the SPI bus:
//!
//! read:  `Ready -> WaitResponse -> WaitStart -> ReadBlock -> Ready`
//! write: `Ready -> WaitResponse -> WriteBlock -> WaitAck -> Ready`
//!
//! At runtime the machine is advanced from the receive-interrupt path
//! ([`SdCard::advance`]); during boot the same protocol runs in polled
//! form ([`SdCard::read_blocking`] / [`SdCard::write_blocking`] and the
//! cmd0/cmd8/acmd41/cmd16/cmd58 sequence in [`SdCard::init`]).

use crate::error::{DiskError, KernelError, KernelResult};
use crate::layout::BLOCK_SIZE;

use super::spi::SpiBus;

/// Idle bus filler; also the "busy" reply
pub const DUMMY_BYTE: u8 = 0xFF;

/// Token preceding a data block on reads
pub const START_TOKEN: u8 = 0xFE;

/// CMD17, single-block read
const CMD_READ_SINGLE: u8 = 0x51;

/// CMD24, single-block write
const CMD_WRITE_SINGLE: u8 = 0x58;

const CMD_LEN: u32 = 6;

/// Reply bytes to wait for before declaring the card dead
const POLL_CEILING: u32 = 8000;

/// Card generation, decided once by `init`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Sd1,
    Sd2,
    Sdhc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Ready,
    WaitResponse,
    WaitStart,
    ReadBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Ready,
    WaitResponse,
    WriteBlock,
    WaitAck,
}

/// Direction of the command currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdOp {
    Read,
    Write,
}

/// Result of one interrupt-driven advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdEvent {
    /// Command still in flight
    Pending,
    /// Block transferred, machine back to ready
    Done,
}

pub struct SdCard<B: SpiBus> {
    bus: B,
    kind: CardKind,
    rd: ReadState,
    wr: WriteState,
    op: SdOp,
    num_read: u32,
    num_written: u32,
}

impl<B: SpiBus> SdCard<B> {
    pub(crate) fn with_kind(bus: B, kind: CardKind) -> Self {
        Self {
            bus,
            kind,
            rd: ReadState::Ready,
            wr: WriteState::Ready,
            op: SdOp::Read,
            num_read: 0,
            num_written: 0,
        }
    }

    /// Bring the card out of native mode and classify it.
    pub fn init(bus: B) -> KernelResult<Self> {
        let mut card = Self::with_kind(bus, CardKind::Sd1);

        // Power-up clocking: the card wants >74 cycles with MOSI high
        for _ in 0..1000 {
            card.bus.busy_send(DUMMY_BYTE);
        }

        log::info!("sd: sending cmd0, entering idle state");
        let cmd0 = [0x40, 0x00, 0x00, 0x00, 0x00, 0x95];
        let mut reply = card.exec_cmd(&cmd0)?;
        let mut waited = 0;
        while reply != 0x01 {
            reply = card.bus.busy_exchange(DUMMY_BYTE);
            waited += 1;
            if waited > POLL_CEILING {
                return Err(DiskError::DeviceTimeout { waited }.into());
            }
        }
        card.drain_busy()?;

        log::info!("sd: checking card type and voltage with cmd8");
        let cmd8 = [0x48, 0x00, 0x00, 0x01, 0xAA, 0x87];
        let reply = card.exec_cmd(&cmd8)?;
        if reply & 0x04 != 0 {
            // Illegal command: first-generation card
            card.kind = CardKind::Sd1;
        } else {
            let mut payload: u32 = 0;
            for _ in 0..4 {
                payload = (payload << 8) | card.bus.busy_exchange(DUMMY_BYTE) as u32;
            }
            if payload & 0xFFF != 0x1AA {
                return Err(DiskError::BadCommandStatus { status: reply }.into());
            }
            card.kind = CardKind::Sd2;
        }
        card.drain_busy()?;

        let hcs = if card.kind == CardKind::Sd2 { 0x40 } else { 0x00 };
        let acmd41 = [0x69, hcs, 0x00, 0x00, 0x00, 0xFF];
        while card.exec_acmd(&acmd41)? != 0 {}
        card.drain_busy()?;

        log::info!("sd: setting block size to {} bytes with cmd16", BLOCK_SIZE);
        let cmd16 = [0x50, 0x00, 0x00, 0x02, 0x00, 0xFF];
        card.exec_cmd(&cmd16)?;
        card.drain_busy()?;

        if card.kind == CardKind::Sd2 {
            let cmd58 = [0x7A, 0x00, 0x00, 0x00, 0x00, 0xFF];
            card.exec_cmd(&cmd58)?;
            let ocr_high = card.bus.busy_exchange(DUMMY_BYTE);
            for _ in 0..3 {
                card.bus.busy_exchange(DUMMY_BYTE);
            }
            if ocr_high & 0xC0 == 0xC0 {
                card.kind = CardKind::Sdhc;
            }
            card.drain_busy()?;
        }

        log::info!("sd: card classified as {:?}", card.kind);
        Ok(card)
    }

    pub fn kind(&self) -> CardKind {
        self.kind
    }

    #[cfg(test)]
    pub(crate) fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Non-SDHC cards are byte-addressed on the wire.
    fn bus_address(&self, block_no: u32) -> u32 {
        if self.kind == CardKind::Sdhc {
            block_no
        } else {
            block_no * BLOCK_SIZE as u32
        }
    }

    fn command_bytes(op: SdOp, addr: u32) -> [u8; 6] {
        let cmd = match op {
            SdOp::Read => CMD_READ_SINGLE,
            SdOp::Write => CMD_WRITE_SINGLE,
        };
        [
            cmd,
            (addr >> 24) as u8,
            (addr >> 16) as u8,
            (addr >> 8) as u8,
            addr as u8,
            DUMMY_BYTE,
        ]
    }

    /// Push a command and wait for its one-byte response (polled).
    fn exec_cmd(&mut self, cmd: &[u8; 6]) -> KernelResult<u8> {
        for &byte in cmd {
            self.bus.busy_send(byte);
        }
        for _ in 0..POLL_CEILING {
            let reply = self.bus.busy_exchange(DUMMY_BYTE);
            if reply != DUMMY_BYTE {
                return Ok(reply);
            }
        }
        Err(DiskError::DeviceTimeout {
            waited: POLL_CEILING,
        }
        .into())
    }

    /// App-prefixed command: cmd55 then `cmd`.
    fn exec_acmd(&mut self, cmd: &[u8; 6]) -> KernelResult<u8> {
        let cmd55 = [0x77, 0x00, 0x00, 0x00, 0x00, 0xFF];
        self.drain_busy()?;
        self.exec_cmd(&cmd55)?;
        self.drain_busy()?;
        self.exec_cmd(cmd)
    }

    /// Clock until the card releases the bus.
    fn drain_busy(&mut self) -> KernelResult<()> {
        for _ in 0..POLL_CEILING {
            if self.bus.busy_exchange(DUMMY_BYTE) == DUMMY_BYTE {
                return Ok(());
            }
        }
        Err(DiskError::DeviceTimeout {
            waited: POLL_CEILING,
        }
        .into())
    }

    /// Issue a single-block command. Refuses with `WouldBlock` while a
    /// previous command is still in flight.
    pub fn start_cmd(&mut self, op: SdOp, block_no: u32) -> KernelResult<()> {
        if self.rd != ReadState::Ready || self.wr != WriteState::Ready {
            return Err(KernelError::WouldBlock);
        }

        let cmd = Self::command_bytes(op, self.bus_address(block_no));
        for &byte in &cmd {
            self.bus.busy_send(byte);
        }

        self.num_read = 0;
        self.num_written = CMD_LEN;
        self.op = op;
        match op {
            SdOp::Read => self.rd = ReadState::WaitResponse,
            SdOp::Write => self.wr = WriteState::WaitResponse,
        }
        Ok(())
    }

    /// Drain the receive FIFO and advance the command in flight.
    ///
    /// Called from the external-interrupt path with the command's block
    /// buffer: the destination for reads, the source for writes. The
    /// handler keeps the card clocked by pushing dummy bytes up to the
    /// bus queue window.
    pub fn advance(&mut self, data: &mut [u8; BLOCK_SIZE]) -> KernelResult<SdEvent> {
        while let Some(reply) = self.bus.try_recv() {
            self.num_read += 1;
            if reply == DUMMY_BYTE {
                continue;
            }

            match self.op {
                SdOp::Read => match self.rd {
                    ReadState::WaitResponse => {
                        if reply == 0 {
                            self.rd = ReadState::WaitStart;
                        } else {
                            return Err(DiskError::BadCommandStatus { status: reply }.into());
                        }
                    }
                    ReadState::WaitStart => {
                        if reply == START_TOKEN {
                            self.rd = ReadState::ReadBlock;
                            self.transfer_read(data);
                            self.rd = ReadState::Ready;
                            return Ok(SdEvent::Done);
                        }
                    }
                    _ => {}
                },
                SdOp::Write => match self.wr {
                    WriteState::WaitResponse => {
                        if reply == 0 {
                            self.wr = WriteState::WriteBlock;
                            self.transfer_write(data);
                            self.wr = WriteState::WaitAck;
                        } else {
                            return Err(DiskError::BadCommandStatus { status: reply }.into());
                        }
                    }
                    WriteState::WaitAck => {
                        if reply & 0x1F == 0x05 {
                            self.wr = WriteState::Ready;
                            return Ok(SdEvent::Done);
                        } else {
                            return Err(DiskError::BadWriteAck { status: reply }.into());
                        }
                    }
                    _ => {}
                },
            }
        }

        if self.num_read > POLL_CEILING {
            return Err(DiskError::DeviceTimeout {
                waited: self.num_read,
            }
            .into());
        }

        // Keep the card clocked, rate-limited to the queue window
        while self.num_written < self.num_read + self.bus.queue_size() {
            if !self.bus.try_send(DUMMY_BYTE) {
                break;
            }
            self.num_written += 1;
        }

        Ok(SdEvent::Pending)
    }

    /// Busy-poll the 512-byte block out of the card.
    fn transfer_read(&mut self, data: &mut [u8; BLOCK_SIZE]) {
        let mut i = 0;
        // Bytes already clocked by the dummy window arrive without sending
        while self.num_read < self.num_written && i < BLOCK_SIZE {
            data[i] = self.bus.busy_recv();
            self.num_read += 1;
            i += 1;
        }
        while i < BLOCK_SIZE {
            data[i] = self.bus.busy_exchange(DUMMY_BYTE);
            i += 1;
        }
        // Two-byte checksum, discarded
        self.bus.busy_exchange(DUMMY_BYTE);
        self.bus.busy_exchange(DUMMY_BYTE);
        self.num_read = 0;
        self.num_written = 0;
    }

    /// Busy-poll the data packet into the card: start token, block,
    /// dummy checksum. The ack arrives through the interrupt path.
    fn transfer_write(&mut self, data: &[u8; BLOCK_SIZE]) {
        self.bus.busy_send(START_TOKEN);
        for &byte in data.iter() {
            self.bus.busy_send(byte);
        }
        self.bus.busy_send(DUMMY_BYTE);
        self.bus.busy_send(DUMMY_BYTE);
        // Drop the echo of our own transmission
        while self.bus.try_recv().is_some() {}
        self.num_read = 0;
        self.num_written = 0;
    }

    /// Synchronous single-block read (boot path).
    pub fn read_blocking(&mut self, block_no: u32, dst: &mut [u8]) -> KernelResult<()> {
        self.drain_busy()?;

        let cmd = Self::command_bytes(SdOp::Read, self.bus_address(block_no));
        let reply = self.exec_cmd(&cmd)?;
        if reply != 0 {
            return Err(DiskError::BadCommandStatus { status: reply }.into());
        }

        let mut waited = 0;
        while self.bus.busy_exchange(DUMMY_BYTE) != START_TOKEN {
            waited += 1;
            if waited > POLL_CEILING {
                return Err(DiskError::DeviceTimeout { waited }.into());
            }
        }

        for slot in dst.iter_mut().take(BLOCK_SIZE) {
            *slot = self.bus.busy_exchange(DUMMY_BYTE);
        }
        self.bus.busy_exchange(DUMMY_BYTE);
        self.bus.busy_exchange(DUMMY_BYTE);
        Ok(())
    }

    /// Synchronous single-block write (boot path).
    pub fn write_blocking(&mut self, block_no: u32, src: &[u8]) -> KernelResult<()> {
        self.drain_busy()?;

        let cmd = Self::command_bytes(SdOp::Write, self.bus_address(block_no));
        let reply = self.exec_cmd(&cmd)?;
        if reply != 0 {
            return Err(DiskError::BadCommandStatus { status: reply }.into());
        }

        self.bus.busy_send(START_TOKEN);
        for &byte in src.iter().take(BLOCK_SIZE) {
            self.bus.busy_send(byte);
        }
        self.bus.busy_send(DUMMY_BYTE);
        self.bus.busy_send(DUMMY_BYTE);

        let mut waited = 0;
        loop {
            let reply = self.bus.busy_exchange(DUMMY_BYTE);
            if reply != DUMMY_BYTE {
                if reply & 0x1F != 0x05 {
                    return Err(DiskError::BadWriteAck { status: reply }.into());
                }
                break;
            }
            waited += 1;
            if waited > POLL_CEILING {
                return Err(DiskError::DeviceTimeout { waited }.into());
            }
        }
        self.drain_busy()
    }
}
