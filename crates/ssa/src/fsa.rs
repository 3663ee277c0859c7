//! File-transfer Status Area: one [`HostStatus`] row per destination host.
//!
//! The FSA is shared between the distributor and its workers. The
//! distributor owns the host-level fields; each worker owns the
//! [`JobStatus`] slot it was started for. To keep the two from clobbering
//! each other, host rows are written back with [`Fsa::update_host`], which
//! only touches the host-level prefix of the row, and job slots are read
//! and written individually.

use bitflags::bitflags;
use platform::RegionGuard;

use crate::codec::{FieldReader, FieldWriter, fixed_str, to_fixed};
use crate::error::{Result, SsaError};
use crate::generation::{Generation, StatusArea};
use crate::names::{FSA_ID_FILE, FSA_STAT_FILE};
use crate::table::{Record, Table};

/// Maximum number of parallel transfers per host.
pub const MAX_NO_PARALLEL_JOBS: usize = 5;
/// Significant length of a host alias.
pub const MAX_HOSTNAME_LENGTH: usize = 8;
/// Stored width of a host alias.
pub const HOST_ALIAS_FIELD: usize = 16;
/// Stored width of a real host name.
pub const MAX_REAL_HOSTNAME_LENGTH: usize = 72;
/// Stored width of a message name.
pub const MAX_MSG_NAME_LENGTH: usize = 128;
/// Stored width of the file name currently being transferred.
pub const MAX_FILENAME_LENGTH: usize = 256;

/// Sentinel for "no job".
pub const NO_ID: u32 = 0;

/// `host_toggle` value selecting the first real host name.
pub const HOST_ONE: u8 = 1;
/// `host_toggle` value selecting the second real host name.
pub const HOST_TWO: u8 = 2;

/// Header byte locked while `check_fsa_entries` runs.
pub const LOCK_CHECK_FSA_ENTRIES: u64 = 5;

const HOST_PART_SIZE: usize = 296;
const JOB_STATUS_SIZE: usize = 444;

/// Offset of `host_status` inside a host row.
pub const LOCK_HS: usize = 172;
/// Offset of `error_counter` inside a host row.
pub const LOCK_EC: usize = 188;
/// Offset of `total_file_counter` inside a host row.
pub const LOCK_TFC: usize = 260;

/// Named lock bytes of a host row.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostLock {
    /// Host-wide administrative lock (first byte of the row).
    Admin,
    /// Guards `host_status` and job slot acquisition/release.
    Hs,
    /// Guards `error_counter` and `error_history`.
    Ec,
    /// Guards `total_file_counter`, `total_file_size` and `active_transfers`.
    Tfc,
}

impl HostLock {
    const fn relative_offset(self) -> usize {
        match self {
            Self::Admin => 0,
            Self::Hs => LOCK_HS,
            Self::Ec => LOCK_EC,
            Self::Tfc => LOCK_TFC,
        }
    }
}

bitflags! {
    /// Bits of `HostStatus::host_status`.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct HostStatusFlags: u32 {
        /// Operator stopped transfers to this host.
        const STOP_TRANSFER = 1;
        /// Operator paused the queue for this host.
        const PAUSE_QUEUE = 1 << 1;
        /// Queue paused automatically after errors.
        const AUTO_PAUSE_QUEUE = 1 << 2;
        /// Queue paused because the host endangers the system.
        const DANGER_PAUSE_QUEUE = 1 << 3;
        /// Operator acknowledged the error state.
        const HOST_ERROR_ACKNOWLEDGED = 1 << 4;
        /// Errors on this host are treated as offline.
        const HOST_ERROR_OFFLINE = 1 << 5;
        /// Never delete data for this host.
        const DO_NOT_DELETE_DATA = 1 << 6;
        /// At least one job of this host sits in the error queue.
        const ERROR_QUEUE_SET = 1 << 7;
        /// Host disabled in the host configuration.
        const HOST_DISABLED = 1 << 8;
        /// Transfers are only simulated.
        const SIMULATE_SEND_MODE = 1 << 9;
    }
}

impl HostStatusFlags {
    /// States in which the scheduler must not dispatch.
    pub const NO_DISPATCH: Self = Self::STOP_TRANSFER
        .union(Self::PAUSE_QUEUE)
        .union(Self::AUTO_PAUSE_QUEUE)
        .union(Self::DANGER_PAUSE_QUEUE)
        .union(Self::HOST_DISABLED);
}

/// Connection state of one job slot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ConnectStatus {
    /// Slot idle.
    #[default]
    Disconnect = 0,
    /// Worker is connecting.
    Connecting = 1,
    /// Transfer in progress.
    Active = 2,
    /// Worker kept the connection open for another job.
    BurstTransferActive = 3,
    /// Worker is closing the connection.
    Closing = 4,
    /// Worker reported a failure.
    NotWorking = 5,
}

impl ConnectStatus {
    /// Converts a raw byte; unknown values read as [`ConnectStatus::NotWorking`].
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnect,
            1 => Self::Connecting,
            2 => Self::Active,
            3 => Self::BurstTransferActive,
            4 => Self::Closing,
            _ => Self::NotWorking,
        }
    }
}

/// Progress of one transfer slot of a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobStatus {
    /// Worker pid, `-1` when idle.
    pub proc_id: i32,
    /// Connection state.
    pub connect_status: ConnectStatus,
    /// Job id the worker is transferring, [`NO_ID`] when idle.
    pub job_id: u32,
    /// Files in the current job.
    pub no_of_files: i32,
    /// Files done in the current job.
    pub no_of_files_done: i32,
    /// Bytes in the current job.
    pub file_size: u64,
    /// Bytes done in the current job.
    pub file_size_done: u64,
    /// Bytes sent over this connection.
    pub bytes_send: u64,
    /// Size of the file being sent.
    pub file_size_in_use: u64,
    /// Bytes of that file already sent.
    pub file_size_in_use_done: u64,
    /// Message name of the job, or the burst rendezvous sentinels.
    pub unique_name: [u8; MAX_MSG_NAME_LENGTH],
    /// File currently being sent.
    pub file_name_in_use: String,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::idle()
    }
}

impl JobStatus {
    /// Slot state after release.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            proc_id: -1,
            connect_status: ConnectStatus::Disconnect,
            job_id: NO_ID,
            no_of_files: 0,
            no_of_files_done: 0,
            file_size: 0,
            file_size_done: 0,
            bytes_send: 0,
            file_size_in_use: 0,
            file_size_in_use_done: 0,
            unique_name: [0; MAX_MSG_NAME_LENGTH],
            file_name_in_use: String::new(),
        }
    }

    /// Returns `true` for an unused slot.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.proc_id == -1 && self.connect_status == ConnectStatus::Disconnect
    }

    /// Message name currently stored in `unique_name`.
    #[must_use]
    pub fn unique_name_str(&self) -> String {
        fixed_str(&self.unique_name)
    }

    /// Stores a message name in `unique_name`.
    pub fn set_unique_name(&mut self, name: &str) {
        self.unique_name = to_fixed(name);
    }

    /// Returns `true` while the worker waits for the distributor to hand
    /// over another job on its open connection.
    #[must_use]
    pub fn is_waiting_for_burst(&self) -> bool {
        self.unique_name[0] == 0 && self.unique_name[1] == 0 && self.unique_name[2] == 4
    }

    /// Tells a waiting worker that no further job follows.
    pub fn release_burst_wait(&mut self) {
        self.unique_name[0] = 0;
        self.unique_name[1] = 1;
    }

    fn decode_from(r: &mut FieldReader<'_>) -> Self {
        let proc_id = r.i32();
        let connect_status = ConnectStatus::from_u8(r.u8());
        r.skip(3);
        Self {
            proc_id,
            connect_status,
            job_id: r.u32(),
            no_of_files: r.i32(),
            no_of_files_done: r.i32(),
            file_size: r.u64(),
            file_size_done: r.u64(),
            bytes_send: r.u64(),
            file_size_in_use: r.u64(),
            file_size_in_use_done: r.u64(),
            unique_name: r.bytes(),
            file_name_in_use: fixed_str(&r.bytes::<MAX_FILENAME_LENGTH>()),
        }
    }

    fn encode_to(&self, w: &mut FieldWriter<'_>) {
        w.i32(self.proc_id);
        w.u8(self.connect_status as u8);
        w.zero(3);
        w.u32(self.job_id);
        w.i32(self.no_of_files);
        w.i32(self.no_of_files_done);
        w.u64(self.file_size);
        w.u64(self.file_size_done);
        w.u64(self.bytes_send);
        w.u64(self.file_size_in_use);
        w.u64(self.file_size_in_use_done);
        w.bytes(&self.unique_name);
        w.bytes(&to_fixed::<MAX_FILENAME_LENGTH>(&self.file_name_in_use));
    }
}

/// Status of one destination host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostStatus {
    /// Short alias used everywhere else to reference the host.
    pub host_alias: String,
    /// The two physical host names; `host_toggle` picks the active one.
    pub real_hostname: [String; 2],
    /// Stable hash of the alias; survives FSA rewrites.
    pub host_id: u32,
    /// [`HOST_ONE`] or [`HOST_TWO`].
    pub host_toggle: u8,
    /// Toggle position before an automatic switch, 0 if none.
    pub original_toggle_pos: u8,
    /// Automatic failover enabled.
    pub auto_toggle: bool,
    /// Protocol bitmask.
    pub protocol: u32,
    /// State bits.
    pub host_status: HostStatusFlags,
    /// Maximum parallel transfers.
    pub allowed_transfers: i32,
    /// Transfers currently running.
    pub active_transfers: i32,
    /// Errors before the host is considered faulty.
    pub max_errors: i32,
    /// Consecutive errors.
    pub error_counter: i32,
    /// Errors since start.
    pub total_errors: u32,
    /// Most recent error codes, newest first.
    pub error_history: [u8; 2],
    /// Seconds between retries.
    pub retry_interval: i32,
    /// Transfer block size.
    pub block_size: i32,
    /// Seconds before a stalled transfer is aborted.
    pub transfer_timeout: i64,
    /// Seconds a worker keeps an idle connection open.
    pub keep_connected: u32,
    /// Bytes per second for all transfers of this host, 0 = unlimited.
    pub transfer_rate_limit: u64,
    /// Current per-process share of `transfer_rate_limit`.
    pub trl_per_process: u64,
    /// Time of the last retry.
    pub last_retry_time: i64,
    /// Time of the last successful connection.
    pub last_connection: i64,
    /// Time of the first error of the current error run.
    pub first_error_time: i64,
    /// Files queued for this host.
    pub total_file_counter: i32,
    /// Bytes queued for this host.
    pub total_file_size: u64,
    /// Files transferred since start.
    pub file_counter_done: u32,
    /// Jobs currently queued.
    pub jobs_queued: u32,
    /// Bytes transferred since start.
    pub bytes_send: u64,
    /// Connections made since start.
    pub connections: u32,
    /// Per-slot progress.
    pub job_status: [JobStatus; MAX_NO_PARALLEL_JOBS],
}

impl Default for HostStatus {
    fn default() -> Self {
        Self {
            host_alias: String::new(),
            real_hostname: [String::new(), String::new()],
            host_id: 0,
            host_toggle: HOST_ONE,
            original_toggle_pos: 0,
            auto_toggle: false,
            protocol: 0,
            host_status: HostStatusFlags::empty(),
            allowed_transfers: 0,
            active_transfers: 0,
            max_errors: 0,
            error_counter: 0,
            total_errors: 0,
            error_history: [0; 2],
            retry_interval: 0,
            block_size: 0,
            transfer_timeout: 0,
            keep_connected: 0,
            transfer_rate_limit: 0,
            trl_per_process: 0,
            last_retry_time: 0,
            last_connection: 0,
            first_error_time: 0,
            total_file_counter: 0,
            total_file_size: 0,
            file_counter_done: 0,
            jobs_queued: 0,
            bytes_send: 0,
            connections: 0,
            job_status: std::array::from_fn(|_| JobStatus::idle()),
        }
    }
}

impl HostStatus {
    /// Real host name currently selected by `host_toggle`.
    #[must_use]
    pub fn active_hostname(&self) -> &str {
        if self.host_toggle == HOST_TWO {
            &self.real_hostname[1]
        } else {
            &self.real_hostname[0]
        }
    }

    /// Returns `true` when two real host names are configured.
    #[must_use]
    pub fn has_toggle(&self) -> bool {
        !self.real_hostname[1].is_empty()
    }

    /// Clears the error counter together with the error history.
    pub fn reset_errors(&mut self) {
        self.error_counter = 0;
        self.error_history = [0; 2];
    }

    /// Pushes an error code onto the front of the history.
    pub fn record_error(&mut self, code: u8) {
        self.error_history[1] = self.error_history[0];
        self.error_history[0] = code;
    }

    fn decode_host(r: &mut FieldReader<'_>) -> Self {
        let host_alias = fixed_str(&r.bytes::<HOST_ALIAS_FIELD>());
        let real_hostname = [
            fixed_str(&r.bytes::<MAX_REAL_HOSTNAME_LENGTH>()),
            fixed_str(&r.bytes::<MAX_REAL_HOSTNAME_LENGTH>()),
        ];
        let host_id = r.u32();
        let host_toggle = r.u8();
        let original_toggle_pos = r.u8();
        let auto_toggle = r.u8() != 0;
        r.skip(1);
        let protocol = r.u32();
        let host_status = HostStatusFlags::from_bits_retain(r.u32());
        let allowed_transfers = r.i32();
        let active_transfers = r.i32();
        let max_errors = r.i32();
        let error_counter = r.i32();
        let total_errors = r.u32();
        let error_history = r.bytes();
        r.skip(2);
        Self {
            host_alias,
            real_hostname,
            host_id,
            host_toggle,
            original_toggle_pos,
            auto_toggle,
            protocol,
            host_status,
            allowed_transfers,
            active_transfers,
            max_errors,
            error_counter,
            total_errors,
            error_history,
            retry_interval: r.i32(),
            block_size: r.i32(),
            transfer_timeout: r.i64(),
            keep_connected: r.u32(),
            transfer_rate_limit: r.u64(),
            trl_per_process: r.u64(),
            last_retry_time: r.i64(),
            last_connection: r.i64(),
            first_error_time: r.i64(),
            total_file_counter: r.i32(),
            total_file_size: r.u64(),
            file_counter_done: r.u32(),
            jobs_queued: r.u32(),
            bytes_send: r.u64(),
            connections: {
                let connections = r.u32();
                r.skip(4);
                connections
            },
            job_status: std::array::from_fn(|_| JobStatus::idle()),
        }
    }

    /// Writes only the host-level prefix of the row.
    fn encode_host(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(&mut buf[..HOST_PART_SIZE]);
        w.bytes(&to_fixed::<HOST_ALIAS_FIELD>(&self.host_alias));
        for name in &self.real_hostname {
            w.bytes(&to_fixed::<MAX_REAL_HOSTNAME_LENGTH>(name));
        }
        w.u32(self.host_id);
        w.u8(self.host_toggle);
        w.u8(self.original_toggle_pos);
        w.u8(u8::from(self.auto_toggle));
        w.zero(1);
        w.u32(self.protocol);
        w.u32(self.host_status.bits());
        w.i32(self.allowed_transfers);
        w.i32(self.active_transfers);
        w.i32(self.max_errors);
        w.i32(self.error_counter);
        w.u32(self.total_errors);
        w.bytes(&self.error_history);
        w.zero(2);
        w.i32(self.retry_interval);
        w.i32(self.block_size);
        w.i64(self.transfer_timeout);
        w.u32(self.keep_connected);
        w.u64(self.transfer_rate_limit);
        w.u64(self.trl_per_process);
        w.i64(self.last_retry_time);
        w.i64(self.last_connection);
        w.i64(self.first_error_time);
        w.i32(self.total_file_counter);
        w.u64(self.total_file_size);
        w.u32(self.file_counter_done);
        w.u32(self.jobs_queued);
        w.u64(self.bytes_send);
        w.u32(self.connections);
        w.zero(4);
        debug_assert_eq!(w.position(), HOST_PART_SIZE);
    }
}

const fn job_range(slot: usize) -> std::ops::Range<usize> {
    let start = HOST_PART_SIZE + slot * JOB_STATUS_SIZE;
    start..start + JOB_STATUS_SIZE
}

impl Record for HostStatus {
    const SIZE: usize = HOST_PART_SIZE + MAX_NO_PARALLEL_JOBS * JOB_STATUS_SIZE;
    const VERSION: u8 = 3;

    fn decode(buf: &[u8]) -> Self {
        let mut host = Self::decode_host(&mut FieldReader::new(&buf[..HOST_PART_SIZE]));
        for (slot, job) in host.job_status.iter_mut().enumerate() {
            *job = JobStatus::decode_from(&mut FieldReader::new(&buf[job_range(slot)]));
        }
        host
    }

    fn encode(&self, buf: &mut [u8]) {
        self.encode_host(buf);
        for (slot, job) in self.job_status.iter().enumerate() {
            job.encode_to(&mut FieldWriter::new(&mut buf[job_range(slot)]));
        }
    }
}

impl Generation for HostStatus {
    const PREFIX: &'static str = FSA_STAT_FILE;
    const ID_FILE: &'static str = FSA_ID_FILE;
}

/// The host status area.
pub type Fsa = StatusArea<HostStatus>;

impl StatusArea<HostStatus> {
    /// Writes back the host-level fields of row `index`, leaving every job
    /// slot untouched.
    pub fn update_host<R>(&mut self, index: usize, f: impl FnOnce(&mut HostStatus) -> R) -> Result<R> {
        let table = self.table_mut();
        let mut host = table.get(index)?;
        let out = f(&mut host);
        host.encode_host(table.bytes_mut(index)?);
        Ok(out)
    }

    /// Reads one job slot.
    pub fn job(&self, index: usize, slot: usize) -> Result<JobStatus> {
        check_slot(slot)?;
        let row = self.table().bytes(index)?;
        Ok(JobStatus::decode_from(&mut FieldReader::new(&row[job_range(slot)])))
    }

    /// Overwrites one job slot.
    pub fn set_job(&mut self, index: usize, slot: usize, job: &JobStatus) -> Result<()> {
        check_slot(slot)?;
        let row = self.table_mut().bytes_mut(index)?;
        job.encode_to(&mut FieldWriter::new(&mut row[job_range(slot)]));
        Ok(())
    }

    /// Reads, modifies and writes back one job slot.
    pub fn update_job<R>(
        &mut self,
        index: usize,
        slot: usize,
        f: impl FnOnce(&mut JobStatus) -> R,
    ) -> Result<R> {
        let mut job = self.job(index, slot)?;
        let out = f(&mut job);
        self.set_job(index, slot, &job)?;
        Ok(out)
    }

    /// Index of the host with `alias`.
    #[must_use]
    pub fn position_by_alias(&self, alias: &str) -> Option<usize> {
        self.table().position(|host| host.host_alias == alias)
    }

    /// Index of the host with `host_id`.
    #[must_use]
    pub fn position_by_id(&self, host_id: u32) -> Option<usize> {
        self.table().position(|host| host.host_id == host_id)
    }

    /// Absolute file offset of a named lock byte of row `index`.
    #[must_use]
    pub const fn lock_offset(index: usize, lock: HostLock) -> u64 {
        Table::<HostStatus>::record_offset(index) + lock.relative_offset() as u64
    }

    /// Blocks until the named lock byte of row `index` is held.
    pub fn lock(&self, index: usize, lock: HostLock) -> Result<RegionGuard> {
        Ok(RegionGuard::acquire(
            self.table().area().file(),
            Self::lock_offset(index, lock),
        )?)
    }

    /// Blocks until the `check_fsa_entries` byte is held.
    pub fn lock_check_entries(&self) -> Result<RegionGuard> {
        Ok(RegionGuard::acquire(
            self.table().area().file(),
            LOCK_CHECK_FSA_ENTRIES,
        )?)
    }
}

fn check_slot(slot: usize) -> Result<()> {
    if slot < MAX_NO_PARALLEL_JOBS {
        Ok(())
    } else {
        Err(SsaError::OutOfRange {
            index: slot,
            count: MAX_NO_PARALLEL_JOBS,
        })
    }
}
