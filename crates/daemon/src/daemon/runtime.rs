//! The poll loop of the `fd` process.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use platform::poll::poll_readable;
use platform::{LockState, SignalSet};

use super::{Daemon, now};
use crate::config::FdConfig;
use crate::error::FdError;
use crate::fifos::{FifoEvent, FifoSet};
use crate::paths::{FD_ACTIVE_FILE, WorkDir};
use crate::worker::{ProcessSpawner, Spawner};

/// How long running workers may take to finish after a shutdown request
/// before they are killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Exclusive hold on `fifodir/FD_ACTIVE` for the lifetime of the process.
///
/// The lock is a region lock on byte 0, released by the kernel when the
/// file is closed or the process dies.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Takes the lock and records our pid in the file.
    pub fn acquire(path: &Path) -> Result<Self, FdError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| FdError::io("open", path, e))?;
        if platform::try_lock(&file, 0)? == LockState::IsSet {
            return Err(FdError::AlreadyRunning {
                pid: read_pid(&mut file).unwrap_or(0),
            });
        }
        let pid = platform::current_pid();
        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(&pid.to_ne_bytes()))
            .map_err(|e| FdError::io("write", path, e))?;
        tracing::debug!(target: "fd::daemon", path = %path.display(), pid, "instance lock taken");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRawFd for InstanceLock {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.file.as_raw_fd()
    }
}

fn read_pid(file: &mut File) -> Option<i32> {
    let mut buf = [0_u8; 4];
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_exact(&mut buf).ok()?;
    Some(i32::from_ne_bytes(buf))
}

/// Runs the distributor until a shutdown command or signal arrives.
pub fn run_daemon(config: FdConfig) -> Result<(), FdError> {
    let work = WorkDir::new(config.work_dir());
    work.create_layout()?;
    let _instance = InstanceLock::acquire(&work.fifo(FD_ACTIVE_FILE))?;
    let mut signals = SignalSet::install().map_err(FdError::Signals)?;
    let mut fifos = FifoSet::open(&work)?;
    let spawner = ProcessSpawner::new(config.worker_dir().map(Path::to_path_buf));
    let interval = config.log_check_interval();
    let mut daemon = Daemon::open(config, spawner)?;

    daemon.tick(now())?;
    let mut last_tick = Instant::now();
    while !daemon.is_shutting_down() {
        if let Some(reason) = signals.shutdown_requested() {
            tracing::info!(target: "fd::daemon", %reason, "stopping");
            daemon.request_shutdown();
            break;
        }
        let events = wait_for_input(&mut fifos, &mut signals, interval.saturating_sub(last_tick.elapsed()))?;
        daemon.step(events, now())?;
        if last_tick.elapsed() >= interval {
            daemon.tick(now())?;
            last_tick = Instant::now();
        }
    }
    drain(&mut daemon, &mut fifos, &mut signals)
}

/// Polls the input fifos and the child self-pipe once.
fn wait_for_input(
    fifos: &mut FifoSet,
    signals: &mut SignalSet,
    timeout: Duration,
) -> Result<Vec<FifoEvent>, FdError> {
    let mut fds = fifos.raw_fds();
    let inputs = fds.len();
    fds.push(signals.as_raw_fd());
    let ready = poll_readable(&fds, timeout).map_err(|e| FdError::io("poll", "input fifos", e))?;
    if ready.last().copied().unwrap_or(false) {
        signals.drain_children();
    }
    fifos.read_ready(&ready[..inputs])
}

/// Lets running workers finish for up to [`SHUTDOWN_GRACE`], then kills
/// the rest and flushes every area.
fn drain<S: Spawner>(daemon: &mut Daemon<S>, fifos: &mut FifoSet, signals: &mut SignalSet) -> Result<(), FdError> {
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while !daemon.connections().is_empty() && Instant::now() < deadline {
        let events = wait_for_input(fifos, signals, DRAIN_POLL)?;
        daemon.step(events, now())?;
    }
    let killed = daemon.stop_workers()?;
    daemon.flush()?;
    tracing::info!(target: "fd::daemon", killed, queued = daemon.queue().len(), "distributor stopped");
    Ok(())
}
