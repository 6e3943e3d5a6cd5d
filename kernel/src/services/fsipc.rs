//! File and directory server wire formats
//!
//! The servers themselves are external collaborators; only their message
//! formats and the client helpers live here. Requests and replies are
//! plain `#[repr(C)]` structs small enough to travel by value through
//! the message bus.

use crate::cap::table::grass;
use crate::layout::BLOCK_SIZE;
use crate::process::{GPID_DIR, GPID_FILE};

/// Directory lookup request
pub const DIR_LOOKUP: u32 = 1;

/// File block-read request
pub const FILE_READ: u32 = 1;

pub const DIR_NAME_LEN: usize = 64;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirRequest {
    pub kind: u32,
    pub dir_ino: u32,
    pub name: [u8; DIR_NAME_LEN],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirReply {
    /// Inode number, or negative when the name does not resolve
    pub ino: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct FileRequest {
    pub kind: u32,
    pub ino: u32,
    /// Block offset within the file
    pub offset: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct FileReply {
    pub status: i32,
    pub block: [u8; BLOCK_SIZE],
}

/// View a plain request/reply struct as its wire bytes.
pub(crate) fn to_bytes<T: Copy>(value: &T) -> &[u8] {
    // SAFETY: T is a #[repr(C)] plain-integer struct; any byte view of
    // it is valid for reads over its full size.
    unsafe {
        core::slice::from_raw_parts(value as *const T as *const u8, core::mem::size_of::<T>())
    }
}

/// Rebuild a request/reply struct out of received wire bytes.
pub(crate) fn from_bytes<T: Copy>(bytes: &[u8]) -> T {
    assert!(bytes.len() >= core::mem::size_of::<T>());
    // SAFETY: length checked; T is plain integers so every bit pattern
    // is valid; read_unaligned tolerates the buffer alignment.
    unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const T) }
}

/// Resolve `name` under `dir_ino` through the directory server.
pub fn dir_lookup(dir_ino: u32, name: &str) -> i32 {
    let mut request = DirRequest {
        kind: DIR_LOOKUP,
        dir_ino,
        name: [0; DIR_NAME_LEN],
    };
    let len = name.len().min(DIR_NAME_LEN);
    request.name[..len].copy_from_slice(&name.as_bytes()[..len]);

    if (grass().sys_send)(GPID_DIR, to_bytes(&request)) < 0 {
        return -1;
    }
    let mut buf = [0u8; core::mem::size_of::<DirReply>()];
    if (grass().sys_recv)(GPID_DIR, None, &mut buf) < 0 {
        return -1;
    }
    from_bytes::<DirReply>(&buf).ino
}

/// Read one block of `ino` through the file server.
pub fn file_read(ino: u32, offset: u32, dst: &mut [u8]) -> i32 {
    let request = FileRequest {
        kind: FILE_READ,
        ino,
        offset,
    };
    if (grass().sys_send)(GPID_FILE, to_bytes(&request)) < 0 {
        return -1;
    }
    let mut buf = [0u8; core::mem::size_of::<FileReply>()];
    if (grass().sys_recv)(GPID_FILE, None, &mut buf) < 0 {
        return -1;
    }
    let reply = from_bytes::<FileReply>(&buf);
    if reply.status < 0 {
        return reply.status;
    }
    let len = dst.len().min(BLOCK_SIZE);
    dst[..len].copy_from_slice(&reply.block[..len]);
    0
}
