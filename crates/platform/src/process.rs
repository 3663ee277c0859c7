//! Worker process termination and reaping.
//!
//! The daemon never leaves zombies behind: every `SIGKILL` it sends is
//! followed by a blocking `waitpid` for the same pid.

use std::io;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// How a reaped child ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChildStatus {
    /// Normal exit with the given status code.
    Exited(i32),
    /// Terminated by the given signal number.
    Signaled(i32),
}

impl ChildStatus {
    /// Exit code if the child exited normally.
    #[must_use]
    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            Self::Signaled(_) => None,
        }
    }
}

fn decode(status: WaitStatus) -> Option<(i32, ChildStatus)> {
    match status {
        WaitStatus::Exited(pid, code) => Some((pid.as_raw(), ChildStatus::Exited(code))),
        WaitStatus::Signaled(pid, signal, _) => {
            Some((pid.as_raw(), ChildStatus::Signaled(signal as i32)))
        }
        _ => None,
    }
}

/// Reaps `pid` if it has finished, without blocking.
///
/// Returns `Ok(None)` while the child is still running or when it is not a
/// child of this process (already reaped).
pub fn reap(pid: i32) -> io::Result<Option<ChildStatus>> {
    match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => Ok(decode(status).map(|(_, status)| status)),
        Err(Errno::ECHILD) => Ok(None),
        Err(errno) => Err(errno.into()),
    }
}

/// Reaps any finished child, without blocking.
pub fn reap_any() -> io::Result<Option<(i32, ChildStatus)>> {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return Ok(None),
            Ok(status) => {
                if let Some(reaped) = decode(status) {
                    return Ok(Some(reaped));
                }
            }
            Err(Errno::EINTR) => {}
            Err(errno) => return Err(errno.into()),
        }
    }
}

/// Sends `SIGKILL` to `pid` and waits for it.
///
/// Returns the child's status, or `None` when the pid was not (or no longer)
/// a child of this process.
pub fn terminate(pid: i32) -> io::Result<Option<ChildStatus>> {
    if pid <= 0 {
        return Ok(None);
    }
    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => return Err(errno.into()),
    }
    loop {
        match waitpid(Pid::from_raw(pid), None) {
            Ok(status) => {
                if let Some((_, status)) = decode(status) {
                    return Ok(Some(status));
                }
            }
            Err(Errno::EINTR) => {}
            Err(Errno::ECHILD) => return Ok(None),
            Err(errno) => return Err(errno.into()),
        }
    }
}

/// Returns `true` if a process with `pid` exists.
#[must_use]
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

/// Returns the calling process id.
#[must_use]
pub fn current_pid() -> i32 {
    nix::unistd::getpid().as_raw()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reap_reports_exit_code() {
        let child = Command::new("/bin/sh")
            .args(["-c", "exit 7"])
            .spawn()
            .expect("spawn");
        let pid = child.id() as i32;
        let mut status = None;
        for _ in 0..200 {
            status = reap(pid).expect("reap");
            if status.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(status, Some(ChildStatus::Exited(7)));
        assert_eq!(reap(pid).expect("second reap"), None);
    }

    #[test]
    fn terminate_kills_and_reaps() {
        let child = Command::new("/bin/sh")
            .args(["-c", "sleep 30"])
            .spawn()
            .expect("spawn");
        let pid = child.id() as i32;
        assert!(is_alive(pid));
        let status = terminate(pid).expect("terminate");
        assert_eq!(status, Some(ChildStatus::Signaled(libc::SIGKILL)));
        assert!(!is_alive(pid));
    }

    #[test]
    fn terminate_ignores_non_positive_pids() {
        assert_eq!(terminate(-1).expect("noop"), None);
        assert_eq!(terminate(0).expect("noop"), None);
        assert!(!is_alive(-3));
    }
}
