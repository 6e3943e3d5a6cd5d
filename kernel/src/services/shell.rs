//! Shell
//!
//! Line input over the TTY syscall, command parsing into a spawn
//! request, and the foreground/background protocol with the process
//! server: foreground commands block in `wait` until the spawned pid is
//! reaped, a trailing `&` backgrounds the command, and `killall` is a
//! distinguished request.

use crate::cap::table::grass;
use crate::process::GPID_PROCESS;
use crate::syscall::abi::{IoDir, CMD_ARG_LEN, CMD_NARGS};

use super::fsipc;
use super::proc::{ProcReply, ProcRequest, CMD_OK, PROC_KILLALL, PROC_SPAWN};
use super::sprint;

const CTRL_C: u8 = 0x03;
const ENTER: u8 = 0x0D;
const BACKSPACE: u8 = 0x7F;

/// Read one line, echoing, handling Enter, Backspace and Ctrl-C.
///
/// Returns the line length; 0 after Ctrl-C (the line is discarded).
fn read_line(buf: &mut [u8]) -> usize {
    let mut len = 0;
    loop {
        let mut byte = [0u8; 1];
        if (grass().sys_tty)(&mut byte, 1, IoDir::Read) < 0 {
            continue;
        }
        match byte[0] {
            CTRL_C => {
                sprint!("\n");
                return 0;
            }
            ENTER => {
                sprint!("\n");
                return len;
            }
            BACKSPACE => {
                if len > 0 {
                    len -= 1;
                    sprint!("\u{8} \u{8}");
                }
            }
            byte => {
                if len < buf.len() - 1 {
                    buf[len] = byte;
                    len += 1;
                    sprint!("{}", byte as char);
                }
            }
        }
    }
}

/// Split a command line into the argv slots of a spawn request.
///
/// Fails when an argument overflows its slot or there are too many.
pub fn parse_request(line: &str, request: &mut ProcRequest) -> Result<(), ()> {
    request.argc = 0;
    request.argv = [[0; CMD_ARG_LEN]; CMD_NARGS];

    let mut nargs = 0;
    for word in line.split(' ').filter(|w| !w.is_empty()) {
        if nargs >= CMD_NARGS || word.len() >= CMD_ARG_LEN {
            return Err(());
        }
        request.argv[nargs][..word.len()].copy_from_slice(word.as_bytes());
        nargs += 1;
    }
    request.argc = nargs as u32;
    Ok(())
}

fn run_command(line: &str) {
    if line == "killall" {
        let request = ProcRequest::new(PROC_KILLALL);
        (grass().sys_send)(GPID_PROCESS, fsipc::to_bytes(&request));
        return;
    }

    let mut request = ProcRequest::new(PROC_SPAWN);
    if parse_request(line, &mut request).is_err() {
        sprint!("sys_shell: too many arguments or argument too long\n");
        return;
    }
    if request.argc == 0 {
        return;
    }

    (grass().sys_send)(GPID_PROCESS, fsipc::to_bytes(&request));
    let mut buf = [0u8; core::mem::size_of::<ProcReply>()];
    (grass().sys_recv)(GPID_PROCESS, None, &mut buf);
    let reply: ProcReply = fsipc::from_bytes(&buf);

    if reply.kind != CMD_OK {
        sprint!("sys_shell: command causes an error\n");
        return;
    }

    if request.background() {
        sprint!("process {} running in the background\n", reply.pid);
        return;
    }

    // Foreground: reap until the spawned pid comes back
    loop {
        let mut child = 0i32;
        if (grass().sys_wait)(&mut child) < 0 {
            continue;
        }
        if child == reply.pid {
            break;
        }
        sprint!("background process {} terminated\n", child);
    }
}

/// Shell entry point.
pub fn main() -> ! {
    sprint!("welcome to the loam shell\n");

    let mut line = [0u8; 256];
    loop {
        let workdir = grass().workdir;
        let end = workdir.iter().position(|&b| b == 0).unwrap_or(0);
        let prompt = core::str::from_utf8(&workdir[..end]).unwrap_or("");
        sprint!("\u{1B}[1;32m> \u{1B}[1;36m{}\u{1B}[1;0m ", prompt);

        let len = read_line(&mut line);
        if len == 0 {
            continue;
        }
        match core::str::from_utf8(&line[..len]) {
            Ok(command) => run_command(command),
            Err(_) => sprint!("sys_shell: not valid utf-8\n"),
        }
    }
}
