//! Dispatch of pending queue items to workers.

use logging::{DeleteReason, LogLine, Severity};
use protocol::{MsgName, Protocol, Url, WorkerArgs};
use ssa::fsa::MAX_NO_PARALLEL_JOBS;
use ssa::qb::{FORK_IN_PROGRESS, PENDING};
use ssa::{ConnectStatus, DirFlags, HostLock, HostStatus, HostStatusFlags, JobStatus, QueueItem, SpecialFlags};

use super::Daemon;
use crate::connections::Connection;
use crate::error::FdError;
use crate::retry::other_host;
use crate::worker::{Launch, Spawner};

/// What happened to one queue item during a pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Dispatch {
    Started,
    Skipped,
    Removed,
}

/// Real host name a job is sent to, honouring a temporary toggle.
fn target_hostname(host: &HostStatus, temp_toggle: bool) -> String {
    if temp_toggle {
        let toggle = other_host(host.host_toggle);
        host.real_hostname[usize::from(toggle.saturating_sub(1)).min(1)].clone()
    } else {
        host.active_hostname().to_string()
    }
}

impl<S: Spawner> Daemon<S> {
    /// Starts workers for due items in priority order.
    ///
    /// Stops early once `max_connections` workers run. Returns the number of
    /// workers started.
    pub(crate) fn schedule(&mut self, now: i64) -> Result<usize, FdError> {
        let mut started = 0;
        let mut index = 0;
        while index < self.queue.len() {
            if self.connections.len() >= self.config.max_connections() || self.connections.is_full() {
                tracing::debug!(target: "fd::scheduler", running = self.connections.len(), "connection limit reached");
                break;
            }
            let item = self.queue.get(index)?;
            if !item.is_pending() || item.next_retry_time > now {
                index += 1;
                continue;
            }
            let outcome = if item.is_fetch() {
                self.dispatch_fetch(index, &item, now)?
            } else {
                self.dispatch_send(index, &item, now)?
            };
            match outcome {
                Dispatch::Started => {
                    started += 1;
                    index += 1;
                }
                Dispatch::Skipped => index += 1,
                Dispatch::Removed => {}
            }
        }
        if started > 0 {
            self.publish_counts()?;
        }
        Ok(started)
    }

    /// Free job slot of host `fsa_pos` if `item` may start there now.
    fn eligible_slot(&self, fsa_pos: usize, host: &HostStatus, item: &QueueItem, now: i64) -> Option<usize> {
        if host.host_status.intersects(HostStatusFlags::NO_DISPATCH) {
            return None;
        }
        let allowed = usize::try_from(host.allowed_transfers)
            .unwrap_or(0)
            .min(MAX_NO_PARALLEL_JOBS);
        if self.connections.active_on(fsa_pos) >= allowed {
            return None;
        }
        if self.errors.is_blocked(host.host_id, &item.msg_name, now) {
            return None;
        }
        if !self.rate_share(fsa_pos, 1).allows_dispatch() {
            tracing::debug!(target: "fd::scheduler", host = %host.host_alias, "transfer rate exhausted");
            return None;
        }
        (0..allowed).find(|&slot| !self.connections.slot_in_use(fsa_pos, slot))
    }

    fn dispatch_send(&mut self, index: usize, item: &QueueItem, now: i64) -> Result<Dispatch, FdError> {
        let name = match MsgName::parse(&item.msg_name) {
            Ok(name) => name,
            Err(error) => {
                tracing::warn!(target: "fd::scheduler", msg_name = %item.msg_name, %error, "dropping queued item");
                self.drop_item(index, DeleteReason::DelQueuedFile)?;
                return Ok(Dispatch::Removed);
            }
        };
        let Some(mdb_pos) = self.mdb.resolve(item.pos, name.job_id) else {
            tracing::warn!(target: "fd::scheduler", msg_name = %item.msg_name, "job left the message cache");
            self.drop_item(index, DeleteReason::JidLookupFailureDel)?;
            return Ok(Dispatch::Removed);
        };
        let hint = i32::try_from(mdb_pos).unwrap_or(-1);
        if hint != item.pos {
            self.queue.update(index, |q| q.pos = hint)?;
        }
        let entry = self.mdb.get(mdb_pos)?;
        let Some(fsa_pos) = usize::try_from(entry.fsa_pos).ok().filter(|&p| self.in_fsa(p)) else {
            return Ok(Dispatch::Skipped);
        };
        let host = self.host(fsa_pos);
        let Some(job_no) = self.eligible_slot(fsa_pos, &host, item, now) else {
            return Ok(Dispatch::Skipped);
        };

        let descriptor = match self.mdb.descriptor(name.job_id) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                tracing::error!(target: "fd::scheduler", msg_name = %item.msg_name, %error, "message file unusable, dropping job");
                self.drop_item(index, DeleteReason::DelQueuedFile)?;
                self.mdb.unlink_message(name.job_id);
                self.mdb.remove(name.job_id)?;
                return Ok(Dispatch::Removed);
            }
        };

        let temp_toggle = !host.auto_toggle
            && host.has_toggle()
            && host.max_errors > 0
            && host.error_counter >= host.max_errors
            && item.retries > 0;
        let launch = Launch {
            config: &self.config,
            fsa_id: self.fsa.id(),
            fsa_pos,
            job_no,
            host: &host,
            item,
            temp_toggle,
        };
        let args = launch.send(&descriptor);
        let mut connection = Connection::new(fsa_pos, job_no, &item.msg_name, descriptor.destination.protocol());
        connection.job_id = name.job_id;
        connection.host_id = host.host_id;
        connection.host_alias.clone_from(&host.host_alias);
        connection.hostname = target_hostname(&host, temp_toggle);
        connection.temp_toggle = temp_toggle;
        self.start_worker(index, connection, &args, item, &host, now)
    }

    fn dispatch_fetch(&mut self, index: usize, item: &QueueItem, now: i64) -> Result<Dispatch, FdError> {
        let Some((dir_pos, dir)) = self.item_dir(item) else {
            return Ok(Dispatch::Skipped);
        };
        if dir.dir_flag.intersects(DirFlags::DIR_DISABLED | DirFlags::DIR_STOPPED) {
            return Ok(Dispatch::Skipped);
        }
        let Some(fsa_pos) = self.fsa.position_by_alias(&dir.host_alias) else {
            return Ok(Dispatch::Skipped);
        };
        let host = self.host(fsa_pos);
        let Some(job_no) = self.eligible_slot(fsa_pos, &host, item, now) else {
            return Ok(Dispatch::Skipped);
        };

        let protocol = match Url::parse(&dir.url) {
            Ok(url) => url.protocol(),
            Err(error) => {
                tracing::warn!(target: "fd::scheduler", dir = %dir.dir_alias, %error, "bad retrieve URL, dropping fetch");
                self.drop_item(index, DeleteReason::DelQueuedFile)?;
                return Ok(Dispatch::Removed);
            }
        };
        let launch = Launch {
            config: &self.config,
            fsa_id: self.fsa.id(),
            fsa_pos,
            job_no,
            host: &host,
            item,
            temp_toggle: false,
        };
        let Some(args) = launch.fetch(protocol) else {
            tracing::warn!(target: "fd::scheduler", dir = %dir.dir_alias, ?protocol, "protocol cannot retrieve, dropping fetch");
            self.drop_item(index, DeleteReason::DelQueuedFile)?;
            return Ok(Dispatch::Removed);
        };
        let hint = i32::try_from(dir_pos).unwrap_or(-1);
        if hint != item.pos {
            self.queue.update(index, |q| q.pos = hint)?;
        }

        let mut connection = Connection::new(fsa_pos, job_no, &item.msg_name, protocol);
        connection.fra_pos = Some(dir_pos);
        connection.dir_id = dir.dir_id;
        connection.dir_alias.clone_from(&dir.dir_alias);
        connection.host_id = host.host_id;
        connection.host_alias.clone_from(&host.host_alias);
        connection.hostname = host.active_hostname().to_string();
        self.start_worker(index, connection, &args, item, &host, now)
    }

    fn start_worker(
        &mut self,
        index: usize,
        connection: Connection,
        args: &WorkerArgs,
        item: &QueueItem,
        host: &HostStatus,
        now: i64,
    ) -> Result<Dispatch, FdError> {
        let (fsa_pos, job_no) = (connection.fsa_pos, connection.job_no);
        let slot_job_id = if item.is_fetch() { connection.dir_id } else { connection.job_id };
        let protocol: Protocol = connection.protocol;

        self.queue.update(index, |q| q.pid = FORK_IN_PROGRESS)?;
        let slot = match self.connections.allocate(connection) {
            Ok(slot) => slot,
            Err(error) => {
                tracing::warn!(target: "fd::scheduler", %error, "no connection slot");
                self.queue.update(index, |q| q.pid = PENDING)?;
                return Ok(Dispatch::Skipped);
            }
        };
        let pid = match self.spawner.spawn(args) {
            Ok(pid) => pid,
            Err(error) => {
                tracing::error!(
                    target: "fd::scheduler",
                    program = %args.program.display(),
                    host = %host.host_alias,
                    %error,
                    "cannot start worker"
                );
                self.connections.release(slot);
                let retry_at = now + i64::from(host.retry_interval.max(1));
                self.queue.update(index, |q| {
                    q.pid = PENDING;
                    q.next_retry_time = retry_at;
                })?;
                return Ok(Dispatch::Skipped);
            }
        };
        self.connections.set_pid(slot, pid);
        let connect_pos = i32::try_from(slot).unwrap_or(-1);
        self.queue.update(index, |q| {
            q.pid = pid;
            q.connect_pos = connect_pos;
            q.special_flag.remove(SpecialFlags::BURST_READY);
        })?;

        {
            let _hs = self.fsa.lock(fsa_pos, HostLock::Hs)?;
            self.fsa.update_job(fsa_pos, job_no, |job| {
                *job = JobStatus::idle();
                job.proc_id = pid;
                job.connect_status = ConnectStatus::Connecting;
                job.job_id = slot_job_id;
                job.set_unique_name(&item.msg_name);
                job.no_of_files = i32::try_from(item.files_to_send).unwrap_or(i32::MAX);
                job.file_size = item.file_size_to_send;
            })?;
        }
        self.publish_host_load(fsa_pos)?;
        {
            let _tfc = self.fsa.lock(fsa_pos, HostLock::Tfc)?;
            self.fsa.update_host(fsa_pos, |h| h.connections = h.connections.wrapping_add(1))?;
        }
        self.update_status(|s| s.fd_fork_counter = s.fd_fork_counter.wrapping_add(1))?;

        let text = format!("{} started for {} ({:?})", args.program.display(), item.msg_name, protocol);
        self.logs
            .debug(&LogLine::now(Severity::Debug, text).host(&host.host_alias).slot(job_no));
        tracing::debug!(
            target: "fd::scheduler",
            host = %host.host_alias,
            job_no,
            pid,
            msg_name = %item.msg_name,
            "worker started"
        );
        Ok(Dispatch::Started)
    }
}
