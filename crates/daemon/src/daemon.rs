//! The distributor aggregate.
//!
//! [`Daemon`] owns everything FD writes: its handles on the FSA and FRA it
//! shares with workers, the message cache, the queue, the burst
//! acknowledgment queue, the global status record and the in-memory
//! connection slots. All state changes go through one `&mut Daemon`, driven
//! by [`Daemon::step`]; workers are separate processes that only see the
//! mapped files.
//!
//! The work is split by concern:
//!
//! - `ingress`: new jobs from the message fifo.
//! - `scheduler`: dispatch of pending items to workers.
//! - `supervisor`: reaping workers, classifying exits, burst hand-over and
//!   adoption of workers after a restart.
//! - `reconcile`: remapping after AMG rewrote the FSA or FRA.
//! - `check`: the periodic `check_fsa_entries` pass.
//! - `fetch`: fetch job scheduling from the FRA.
//! - `commands`: operator commands, retries, deletes and rate recalculation.
//! - `housekeeping`: stale message reaping and the timer tick.
//! - `runtime`: the poll loop of the `fd` process.

mod check;
mod commands;
mod fetch;
mod housekeeping;
mod ingress;
mod reconcile;
mod runtime;
mod scheduler;
mod supervisor;

pub use runtime::run_daemon;

use std::fs;
use std::io;
use std::path::Path;

use bandwidth::{HostLoad, RateLimit, RateShare};
use logging::{DeleteReason, DeleteRecord};
use protocol::{MsgName, parse_fetch_name};
use ssa::names::{ACK_QUE_BUF_SIZE, ACK_QUEUE_FILE, MSG_CACHE_FILE, MSG_QUEUE_FILE, STATUS_SHMID_FILE};
use ssa::{AckEntry, AfdStatus, DirStatus, Fra, Fsa, HostLock, HostStatus, JobStatus, QueueItem, Table};

use crate::archive::Archiver;
use crate::config::FdConfig;
use crate::connections::Connections;
use crate::dupcheck::DupChecker;
use crate::error::FdError;
use crate::fifos::{FifoEvent, LogSinks};
use crate::mdb::MessageCache;
use crate::paths::WorkDir;
use crate::queue::Queue;
use crate::retry::ErrorQueue;
use crate::worker::{ProcessSpawner, Spawner};

/// Name recorded as the deleting process in delete-log records.
pub(crate) const DELETED_BY: &str = "fd";

/// Current time in seconds since the epoch.
#[must_use]
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The running distributor.
#[derive(Debug)]
pub struct Daemon<S: Spawner = ProcessSpawner> {
    config: FdConfig,
    work: WorkDir,
    fsa: Fsa,
    fra: Option<Fra>,
    status: Table<AfdStatus>,
    mdb: MessageCache,
    queue: Queue,
    acks: Table<AckEntry>,
    stores: crate::stores::SharedStores,
    connections: Connections,
    errors: ErrorQueue,
    archiver: Archiver,
    dupcheck: DupChecker,
    logs: LogSinks,
    spawner: S,
    shutting_down: bool,
}

impl<S: Spawner> Daemon<S> {
    /// Attaches every area below the work directory of `config` and
    /// recovers the queue left by a previous instance.
    ///
    /// The FSA must exist; a missing FRA only disables fetching.
    pub fn open(config: FdConfig, spawner: S) -> Result<Self, FdError> {
        let work = WorkDir::new(config.work_dir());
        work.create_layout()?;
        let fifodir = work.fifodir();

        let fsa = Fsa::attach(&fifodir)?;
        let fra = match Fra::attach(&fifodir) {
            Ok(fra) => Some(fra),
            Err(error) => {
                tracing::warn!(target: "fd::daemon", %error, "no FRA, fetching disabled");
                None
            }
        };

        let now = now();
        let mut status = Table::<AfdStatus>::open_or_create(&work.fifo(STATUS_SHMID_FILE), 1)?;
        if status.is_empty() {
            status.push(&AfdStatus::default())?;
        }
        status.update(0, |s| {
            s.fd_pid = platform::current_pid();
            s.start_time = now;
            s.no_of_transfers = 0;
            s.fd_fork_counter = 0;
            s.burst2_counter = 0;
        })?;

        let mdb = MessageCache::attach(&work.fifo(MSG_CACHE_FILE), work.msg_dir(), config.default_ageing())?;
        let queue = Queue::attach(&work.fifo(MSG_QUEUE_FILE))?;
        let acks = Table::open_or_create(&work.fifo(ACK_QUEUE_FILE), ACK_QUE_BUF_SIZE)?;
        let stores = crate::stores::SharedStores::attach(&fifodir);
        let logs = LogSinks::open(&work)?;

        let mut daemon = Self {
            connections: Connections::new(config.max_connections()),
            archiver: Archiver::new(work.archive(), config.archive_step_time()),
            dupcheck: DupChecker::new(work.crc_dir(), work.store()),
            errors: ErrorQueue::new(),
            config,
            work,
            fsa,
            fra,
            status,
            mdb,
            queue,
            acks,
            stores,
            logs,
            spawner,
            shutting_down: false,
        };
        daemon.recover(now)?;
        tracing::info!(
            target: "fd::daemon",
            hosts = daemon.fsa.len(),
            dirs = daemon.fra.as_ref().map_or(0, Fra::len),
            queued = daemon.queue.len(),
            adopted = daemon.connections.len(),
            "distributor started"
        );
        Ok(daemon)
    }

    /// Distributor settings.
    pub const fn config(&self) -> &FdConfig {
        &self.config
    }

    /// Work directory layout.
    pub const fn work(&self) -> &WorkDir {
        &self.work
    }

    /// The worker launcher.
    pub const fn spawner(&self) -> &S {
        &self.spawner
    }

    /// The worker launcher, mutably.
    pub const fn spawner_mut(&mut self) -> &mut S {
        &mut self.spawner
    }

    /// Current FSA generation.
    pub const fn fsa(&self) -> &Fsa {
        &self.fsa
    }

    /// Current FRA generation, if one exists.
    pub const fn fra(&self) -> Option<&Fra> {
        self.fra.as_ref()
    }

    /// The queue.
    pub const fn queue(&self) -> &Queue {
        &self.queue
    }

    /// The message cache.
    pub const fn mdb(&self) -> &MessageCache {
        &self.mdb
    }

    /// Running workers.
    pub const fn connections(&self) -> &Connections {
        &self.connections
    }

    /// Jobs parked after persistent errors.
    pub const fn errors(&self) -> &ErrorQueue {
        &self.errors
    }

    /// Outstanding burst hand-overs.
    pub fn acks(&self) -> impl Iterator<Item = AckEntry> + '_ {
        self.acks.iter()
    }

    /// The global status record.
    pub fn status(&self) -> Result<AfdStatus, FdError> {
        Ok(self.status.get(0)?)
    }

    /// Returns `true` once a shutdown was requested.
    pub const fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Stops dispatching new workers.
    pub fn request_shutdown(&mut self) {
        if !self.shutting_down {
            tracing::info!(target: "fd::daemon", running = self.connections.len(), "shutdown requested");
        }
        self.shutting_down = true;
    }

    /// One pass of the event loop: reconcile if AMG rewrote the status
    /// areas, apply `events`, reap finished workers and dispatch.
    pub fn step(&mut self, events: Vec<FifoEvent>, now: i64) -> Result<(), FdError> {
        if self.needs_reconcile()? {
            self.reconcile(now)?;
        }
        for event in events {
            self.handle_event(event, now)?;
        }
        self.reap_workers(now)?;
        if !self.shutting_down {
            self.schedule(now)?;
        }
        self.flush()
    }

    /// Applies one fifo event.
    pub fn handle_event(&mut self, event: FifoEvent, now: i64) -> Result<(), FdError> {
        match event {
            FifoEvent::Command(command) => self.handle_command(command, now),
            FifoEvent::UnknownCommand(byte) => {
                tracing::warn!(target: "fd::commands", byte, "unknown command");
                Ok(())
            }
            FifoEvent::Completion(completion) => self.handle_completion(completion, now),
            FifoEvent::Message(record) => self.handle_message(&record, now),
            FifoEvent::WakeUp => self.check_fsa_entries(now),
            FifoEvent::Retry(fsa_pos) => self.retry_host(fsa_pos),
            FifoEvent::Delete(request) => self.handle_delete(&request),
            FifoEvent::BurstAck(msg_name) => self.acknowledge_burst(&msg_name),
            FifoEvent::TrlCalc(fsa_pos) => self.recalculate_trl(fsa_pos),
        }
    }

    /// Flushes every mapped area FD writes.
    pub fn flush(&self) -> Result<(), FdError> {
        self.fsa.flush()?;
        if let Some(fra) = &self.fra {
            fra.flush()?;
        }
        self.mdb.flush()?;
        self.queue.flush()?;
        self.acks.flush()?;
        self.status.flush()?;
        Ok(())
    }

    fn needs_reconcile(&self) -> Result<bool, FdError> {
        if self.fsa.is_stale() || self.fsa.check_id_changed()? {
            return Ok(true);
        }
        Ok(match &self.fra {
            Some(fra) => fra.is_stale() || fra.check_id_changed()?,
            None => false,
        })
    }

    fn update_status<R>(&mut self, f: impl FnOnce(&mut AfdStatus) -> R) -> Result<R, FdError> {
        Ok(self.status.update(0, f)?)
    }

    /// Publishes queue length and running worker count.
    fn publish_counts(&mut self) -> Result<(), FdError> {
        let queued = u32::try_from(self.queue.len()).unwrap_or(u32::MAX);
        let running = i32::try_from(self.connections.len()).unwrap_or(i32::MAX);
        self.update_status(|s| {
            s.jobs_in_queue = queued;
            s.max_queue_length = s.max_queue_length.max(queued);
            s.no_of_transfers = running;
        })
    }

    /// Host row `fsa_pos`, or a zeroed stub for parked positions.
    fn host(&self, fsa_pos: usize) -> HostStatus {
        self.fsa.get(fsa_pos).unwrap_or_default()
    }

    fn in_fsa(&self, fsa_pos: usize) -> bool {
        fsa_pos < self.fsa.len()
    }

    /// FRA row of a fetch item, trying the remembered position first.
    fn item_dir(&self, item: &QueueItem) -> Option<(usize, DirStatus)> {
        let fra = self.fra.as_ref()?;
        let dir_id = parse_fetch_name(&item.msg_name).ok()?;
        let pos = usize::try_from(item.pos)
            .ok()
            .filter(|&i| fra.get(i).is_ok_and(|d| d.dir_id == dir_id))
            .or_else(|| fra.position_by_id(dir_id))?;
        Some((pos, fra.get(pos).ok()?))
    }

    /// FSA row an item transfers to or fetches from.
    fn item_host(&self, item: &QueueItem) -> Option<usize> {
        if item.is_fetch() {
            let (_, dir) = self.item_dir(item)?;
            return self.fsa.position_by_alias(&dir.host_alias);
        }
        let name = MsgName::parse(&item.msg_name).ok()?;
        let index = self.mdb.resolve(item.pos, name.job_id)?;
        let entry = self.mdb.get(index).ok()?;
        usize::try_from(entry.fsa_pos).ok().filter(|&p| self.in_fsa(p))
    }

    /// Adds to the queued totals of host `fsa_pos`.
    fn adjust_host_totals(&mut self, fsa_pos: usize, files: i64, size: i64, jobs: i64) -> Result<(), FdError> {
        if !self.in_fsa(fsa_pos) {
            return Ok(());
        }
        let _tfc = self.fsa.lock(fsa_pos, HostLock::Tfc)?;
        self.fsa.update_host(fsa_pos, |h| {
            h.total_file_counter = clamp_add_i32(h.total_file_counter, files);
            h.total_file_size = clamp_add_u64(h.total_file_size, size);
            h.jobs_queued = u32::try_from((i64::from(h.jobs_queued) + jobs).max(0)).unwrap_or(u32::MAX);
        })?;
        Ok(())
    }

    /// Takes a removed item off its host's queued totals.
    fn forget_item_totals(&mut self, fsa_pos: Option<usize>, item: &QueueItem) -> Result<(), FdError> {
        match fsa_pos {
            Some(pos) if !item.is_fetch() => self.adjust_host_totals(
                pos,
                -i64::from(item.files_to_send),
                -i64::try_from(item.file_size_to_send).unwrap_or(i64::MAX),
                -1,
            ),
            _ => Ok(()),
        }
    }

    /// Per-process rate share of host `fsa_pos` with `extra` more workers.
    fn rate_share(&self, fsa_pos: usize, extra: u32) -> RateShare {
        let hosts: Vec<HostStatus> = self.fsa.iter().collect();
        let loads: Vec<HostLoad<'_>> = hosts
            .iter()
            .enumerate()
            .map(|(i, h)| HostLoad {
                alias: &h.host_alias,
                limit: RateLimit::from_bytes(h.transfer_rate_limit),
                active: u32::try_from(self.connections.active_on(i)).unwrap_or(u32::MAX)
                    + if i == fsa_pos { extra } else { 0 },
            })
            .collect();
        loads
            .get(fsa_pos)
            .map_or(RateShare::Unlimited, |host| self.config.trl_groups().share_for(host, &loads))
    }

    /// Writes the live worker count and rate share of host `fsa_pos`.
    fn publish_host_load(&mut self, fsa_pos: usize) -> Result<(), FdError> {
        if !self.in_fsa(fsa_pos) {
            return Ok(());
        }
        let active = i32::try_from(self.connections.active_on(fsa_pos)).unwrap_or(i32::MAX);
        let share = self.rate_share(fsa_pos, 0).as_fsa_value();
        let _tfc = self.fsa.lock(fsa_pos, HostLock::Tfc)?;
        self.fsa.update_host(fsa_pos, |h| {
            h.active_transfers = active;
            h.trl_per_process = share;
        })?;
        Ok(())
    }

    /// Returns job slot `job_no` of host `fsa_pos` to idle.
    fn release_job_slot(&mut self, fsa_pos: usize, job_no: usize) -> Result<(), FdError> {
        if !self.in_fsa(fsa_pos) {
            return Ok(());
        }
        let _hs = self.fsa.lock(fsa_pos, HostLock::Hs)?;
        self.fsa.set_job(fsa_pos, job_no, &JobStatus::idle())?;
        Ok(())
    }

    /// Removes the item at `index` for good: its files are deleted with
    /// `reason`, its host totals and error queue entry are dropped.
    fn drop_item(&mut self, index: usize, reason: DeleteReason) -> Result<QueueItem, FdError> {
        let item = self.queue.remove_at(index)?;
        let fsa_pos = self.item_host(&item);
        let host = fsa_pos.map(|p| self.host(p)).unwrap_or_default();
        self.forget_item_totals(fsa_pos, &item)?;
        if item.is_fetch() {
            self.forget_fetch(&item)?;
        } else {
            self.errors.remove(host.host_id, &item.msg_name);
            self.delete_job_files(&item.msg_name, &host.host_alias, reason);
        }
        self.publish_counts()?;
        Ok(item)
    }

    /// Deletes the job directory of `msg_name`, writing one delete-log
    /// record per file. Returns the number of files deleted.
    fn delete_job_files(&mut self, msg_name: &str, host_alias: &str, reason: DeleteReason) -> usize {
        let dir = self.work.job_dir(msg_name);
        let files = match list_files(&dir) {
            Ok(files) => files,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return 0,
            Err(error) => {
                tracing::warn!(target: "fd::daemon", path = %dir.display(), %error, "cannot list job directory");
                Vec::new()
            }
        };
        let name = MsgName::parse(msg_name).ok();
        for (file_name, file_size) in &files {
            self.logs
                .delete(&delete_record(reason, host_alias, name.as_ref(), file_name, *file_size));
        }
        remove_job_dir(&dir);
        files.len()
    }
}

#[cfg(test)]
impl<S: Spawner> Daemon<S> {
    pub(crate) fn fsa_mut(&mut self) -> &mut Fsa {
        &mut self.fsa
    }

    pub(crate) fn fra_mut(&mut self) -> Option<&mut Fra> {
        self.fra.as_mut()
    }

    pub(crate) fn queue_mut(&mut self) -> &mut Queue {
        &mut self.queue
    }
}

/// Delete-log record for one file of job `name`.
pub(crate) fn delete_record(
    reason: DeleteReason,
    host_alias: &str,
    name: Option<&MsgName>,
    file_name: &str,
    file_size: u64,
) -> DeleteRecord {
    DeleteRecord {
        reason,
        host_alias: host_alias.to_string(),
        file_name: file_name.to_string(),
        file_size,
        job_id: name.map_or(0, |n| n.job_id),
        dir_id: name.map_or(0, |n| n.dir_no),
        input_time: name.map_or(0, |n| n.creation_time),
        unique_number: name.map_or(0, |n| n.unique_number),
        split_job_counter: name.map_or(0, |n| n.split_job_counter),
        deleted_by: DELETED_BY.to_string(),
    }
}

/// Regular files of `dir` with their sizes, sorted by name.
pub(crate) fn list_files(dir: &Path) -> io::Result<Vec<(String, u64)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), metadata.len()));
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn remove_job_dir(dir: &Path) {
    if let Err(error) = fs::remove_dir_all(dir) {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::warn!(target: "fd::daemon", path = %dir.display(), %error, "cannot remove job directory");
        }
    }
}

fn clamp_add_i32(value: i32, delta: i64) -> i32 {
    i32::try_from((i64::from(value) + delta).max(0)).unwrap_or(i32::MAX)
}

fn clamp_add_u64(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta.unsigned_abs())
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_never_go_negative() {
        assert_eq!(clamp_add_i32(1, -5), 0);
        assert_eq!(clamp_add_i32(1, 2), 3);
        assert_eq!(clamp_add_u64(10, -20), 0);
        assert_eq!(clamp_add_u64(10, 5), 15);
    }

    #[test]
    fn delete_records_carry_the_message_name_fields() {
        let name = MsgName::parse("0/f/3/5f3a_1_0").expect("name");
        let record = delete_record(DeleteReason::AgeOutput, "h", Some(&name), "a.txt", 12);
        assert_eq!(record.job_id, 0xf);
        assert_eq!(record.dir_id, 3);
        assert_eq!(record.input_time, 0x5f3a);
        assert_eq!(record.unique_number, 1);
        assert_eq!(record.deleted_by, DELETED_BY);

        let bare = delete_record(DeleteReason::UserDel, "h", None, "x", 0);
        assert_eq!(bare.job_id, 0);
    }

    #[test]
    fn list_files_skips_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("b"), b"12").expect("b");
        fs::write(tmp.path().join("a"), b"1").expect("a");
        fs::create_dir(tmp.path().join("sub")).expect("sub");
        let files = list_files(tmp.path()).expect("list");
        assert_eq!(files, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }
}
