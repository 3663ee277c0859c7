//! Signal delivery into the event loop.
//!
//! `SIGCHLD` is turned into a byte on a self-pipe so the poll loop wakes up
//! and reaps. `SIGTERM`/`SIGINT`/`SIGHUP` only set atomic flags; the loop
//! checks them between passes. Nothing here runs non-async-signal-safe code
//! inside a handler, `signal-hook` takes care of that.

use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGCHLD, SIGHUP, SIGINT, SIGTERM};

/// Why the daemon was asked to stop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownReason {
    /// SIGINT received.
    Interrupted,
    /// SIGTERM received.
    Terminated,
    /// SIGHUP received.
    HangUp,
}

impl ShutdownReason {
    /// Human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Interrupted => "interrupted by SIGINT",
            Self::Terminated => "terminated by SIGTERM",
            Self::HangUp => "hangup by SIGHUP",
        }
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Installed signal handlers for the daemon process.
#[derive(Debug)]
pub struct SignalSet {
    child_reader: UnixStream,
    interrupted: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
    hangup: Arc<AtomicBool>,
}

impl SignalSet {
    /// Registers the SIGCHLD self-pipe and the shutdown flags.
    pub fn install() -> io::Result<Self> {
        let (child_reader, child_writer) = UnixStream::pair()?;
        child_reader.set_nonblocking(true)?;
        child_writer.set_nonblocking(true)?;
        signal_hook::low_level::pipe::register(SIGCHLD, child_writer)?;

        let interrupted = Arc::new(AtomicBool::new(false));
        let terminated = Arc::new(AtomicBool::new(false));
        let hangup = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGINT, Arc::clone(&interrupted))?;
        signal_hook::flag::register(SIGTERM, Arc::clone(&terminated))?;
        signal_hook::flag::register(SIGHUP, Arc::clone(&hangup))?;

        Ok(Self {
            child_reader,
            interrupted,
            terminated,
            hangup,
        })
    }

    /// Consumes pending SIGCHLD notifications.
    ///
    /// Returns `true` if at least one child changed state since the last
    /// call.
    pub fn drain_children(&mut self) -> bool {
        let mut buf = [0_u8; 64];
        let mut seen = false;
        loop {
            match self.child_reader.read(&mut buf) {
                Ok(0) => return seen,
                Ok(_) => seen = true,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return seen,
            }
        }
    }

    /// Returns the first pending shutdown request, if any.
    #[must_use]
    pub fn shutdown_requested(&self) -> Option<ShutdownReason> {
        if self.terminated.load(Ordering::Relaxed) {
            Some(ShutdownReason::Terminated)
        } else if self.interrupted.load(Ordering::Relaxed) {
            Some(ShutdownReason::Interrupted)
        } else if self.hangup.load(Ordering::Relaxed) {
            Some(ShutdownReason::HangUp)
        } else {
            None
        }
    }
}

impl AsRawFd for SignalSet {
    fn as_raw_fd(&self) -> RawFd {
        self.child_reader.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_reason_descriptions() {
        assert_eq!(ShutdownReason::Terminated.to_string(), "terminated by SIGTERM");
        assert_eq!(ShutdownReason::Interrupted.description(), "interrupted by SIGINT");
    }

    #[test]
    fn child_exit_wakes_self_pipe() {
        let mut signals = SignalSet::install().expect("install");
        let mut child = std::process::Command::new("/bin/sh")
            .args(["-c", "exit 0"])
            .spawn()
            .expect("spawn");
        child.wait().expect("wait");
        let mut woke = false;
        for _ in 0..100 {
            if signals.drain_children() {
                woke = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(woke);
        assert_eq!(signals.shutdown_requested(), None);
    }
}
