//! Single-byte advisory region locks.
//!
//! The mapped status files are shared between the distributor and its
//! workers. Aggregate counters are protected by locking exactly one byte at a
//! well-known offset inside the file (`fcntl(F_SETLK/F_SETLKW)` with
//! `l_len == 1`). Locks are write-intent and advisory: they only serialise
//! processes that agree on the offsets.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::thread;
use std::time::Duration;

/// Number of attempts [`lock_wait`] makes before giving up on spurious
/// `EAGAIN`/`EINTR`/`EDEADLK` failures.
pub const LOCK_RETRIES: u32 = 100;

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Result of a non-blocking lock attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockState {
    /// Another process holds the byte; nothing was acquired.
    IsSet,
    /// The byte was free and is now held by the caller.
    IsNotSet,
}

/// Failure while taking or releasing a region lock.
///
/// Anything other than contention is fatal for the daemon and is reported
/// with the `LOCK_REGION_ERROR` exit status by the caller.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// `fcntl` rejected the lock request.
    #[error("failed to lock region at offset {offset}: {source}")]
    Region {
        /// Byte offset of the lock.
        offset: u64,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// `fcntl` rejected the unlock request.
    #[error("failed to unlock region at offset {offset}: {source}")]
    Unlock {
        /// Byte offset of the lock.
        offset: u64,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The lock kept failing with transient errors.
    #[error("region at offset {offset} still unavailable after {attempts} attempts")]
    Exhausted {
        /// Byte offset of the lock.
        offset: u64,
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl LockError {
    /// Byte offset the failing operation targeted.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        match self {
            Self::Region { offset, .. } | Self::Unlock { offset, .. } | Self::Exhausted { offset, .. } => {
                *offset
            }
        }
    }
}

fn region(kind: libc::c_int, offset: u64) -> libc::flock {
    // SAFETY: `flock` is a plain C struct for which all-zero bytes are valid.
    let mut lock: libc::flock = unsafe { std::mem::zeroed() };
    lock.l_type = kind as libc::c_short;
    lock.l_whence = libc::SEEK_SET as libc::c_short;
    lock.l_start = offset as libc::off_t;
    lock.l_len = 1;
    lock
}

fn fcntl_lock(fd: RawFd, cmd: libc::c_int, lock: &libc::flock) -> io::Result<()> {
    // SAFETY: `lock` is a valid, initialised flock for the duration of the
    // call. An invalid descriptor is reported as EBADF, not UB.
    let rc = unsafe { libc::fcntl(fd, cmd, std::ptr::from_ref(lock)) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn is_contention(error: &io::Error) -> bool {
    matches!(error.raw_os_error(), Some(libc::EACCES | libc::EAGAIN))
}

/// Attempts to lock one byte without blocking.
pub fn try_lock<F: AsRawFd>(file: &F, offset: u64) -> Result<LockState, LockError> {
    let lock = region(libc::F_WRLCK as libc::c_int, offset);
    match fcntl_lock(file.as_raw_fd(), libc::F_SETLK, &lock) {
        Ok(()) => Ok(LockState::IsNotSet),
        Err(error) if is_contention(&error) => Ok(LockState::IsSet),
        Err(source) => Err(LockError::Region { offset, source }),
    }
}

/// Locks one byte, blocking until it becomes available.
///
/// Interrupted or spuriously failing calls are retried up to
/// [`LOCK_RETRIES`] times.
pub fn lock_wait<F: AsRawFd>(file: &F, offset: u64) -> Result<(), LockError> {
    let lock = region(libc::F_WRLCK as libc::c_int, offset);
    let fd = file.as_raw_fd();
    for _ in 0..LOCK_RETRIES {
        match fcntl_lock(fd, libc::F_SETLKW, &lock) {
            Ok(()) => return Ok(()),
            Err(error)
                if matches!(
                    error.raw_os_error(),
                    Some(libc::EINTR | libc::EAGAIN | libc::EDEADLK)
                ) =>
            {
                thread::sleep(LOCK_RETRY_DELAY);
            }
            Err(source) => return Err(LockError::Region { offset, source }),
        }
    }
    Err(LockError::Exhausted {
        offset,
        attempts: LOCK_RETRIES,
    })
}

/// Releases exactly one byte.
pub fn unlock<F: AsRawFd>(file: &F, offset: u64) -> Result<(), LockError> {
    let lock = region(libc::F_UNLCK as libc::c_int, offset);
    fcntl_lock(file.as_raw_fd(), libc::F_SETLK, &lock)
        .map_err(|source| LockError::Unlock { offset, source })
}

/// RAII guard that unlocks its byte when dropped.
#[derive(Debug)]
#[must_use = "the region is unlocked as soon as the guard is dropped"]
pub struct RegionGuard {
    fd: RawFd,
    offset: u64,
}

impl RegionGuard {
    /// Blocks until the byte at `offset` is held.
    pub fn acquire<F: AsRawFd>(file: &F, offset: u64) -> Result<Self, LockError> {
        lock_wait(file, offset)?;
        Ok(Self {
            fd: file.as_raw_fd(),
            offset,
        })
    }

    /// Byte offset held by this guard.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl AsRawFd for RegionGuard {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        let lock = region(libc::F_UNLCK as libc::c_int, self.offset);
        let _ = fcntl_lock(self.fd, libc::F_SETLK, &lock);
    }
}
