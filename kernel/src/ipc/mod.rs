//! Rendezvous IPC
//!
//! One shared slot holds at most one undelivered message system-wide.
//! A send succeeds only when the destination is already waiting in
//! `recv` with a filter that accepts the sender; a receive consumes the
//! slot only when the message is addressed to it and the sender passes
//! its own filter. Everything else blocks and is retried by the
//! scheduler, so delivery is a single state transition on this cell.

use crate::process::{Pid, GPID_ALL};
use crate::syscall::abi::SYSCALL_MSG_LEN;

/// The single in-flight message cell.
pub struct IpcSlot {
    in_use: bool,
    sender: Pid,
    receiver: Pid,
    payload: [u8; SYSCALL_MSG_LEN],
}

impl IpcSlot {
    pub fn new() -> Self {
        Self {
            in_use: false,
            sender: Pid::UNUSED,
            receiver: Pid::UNUSED,
            payload: [0; SYSCALL_MSG_LEN],
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Place a message; `false` while an undelivered one is in flight.
    pub fn deposit(&mut self, sender: Pid, receiver: Pid, payload: &[u8; SYSCALL_MSG_LEN]) -> bool {
        if self.in_use {
            return false;
        }
        self.in_use = true;
        self.sender = sender;
        self.receiver = receiver;
        self.payload.copy_from_slice(payload);
        true
    }

    /// Consume the slot for `receiver` if the message is addressed to it
    /// and the sender passes `filter` (`GPID_ALL` accepts anyone).
    /// Returns the sender.
    pub fn consume(
        &mut self,
        receiver: Pid,
        filter: Pid,
        payload: &mut [u8; SYSCALL_MSG_LEN],
    ) -> Option<Pid> {
        if !self.in_use || self.receiver != receiver {
            return None;
        }
        if filter != GPID_ALL && self.sender != filter {
            return None;
        }
        payload.copy_from_slice(&self.payload);
        self.in_use = false;
        Some(self.sender)
    }
}

impl Default for IpcSlot {
    fn default() -> Self {
        Self::new()
    }
}
