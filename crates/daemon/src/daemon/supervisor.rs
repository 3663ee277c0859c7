//! Reaping workers and acting on how they ended.
//!
//! A worker is finished when `waitpid` returns its status. Its exit code is
//! classified by [`WorkerExit::class`]: successful jobs are archived or
//! deleted, retryable ones go back to `PENDING` with a backoff, broken ones
//! are dropped. A worker that leaves files unsent keeps its job queued with
//! the remaining files. A worker that writes a negative pid to the finish fifo keeps
//! its connection open; its job is completed and the next pending job of
//! the same host is handed over through its job slot.

use logging::{DeleteReason, LogLine, OutputRecord, Severity};
use platform::ChildStatus;
use protocol::{Completion, ExitClass, MsgName, Protocol, Url, WorkerExit};
use ssa::fsa::MAX_NO_PARALLEL_JOBS;
use ssa::qb::PENDING;
use ssa::{AckEntry, ConnectStatus, HostLock, HostStatusFlags, QueueItem, SpecialFlags};

use super::{Daemon, delete_record, list_files, remove_job_dir};
use crate::archive::ArchiveKey;
use crate::connections::Connection;
use crate::error::FdError;
use crate::retry::{next_retry_time, record_failure, record_success};
use crate::worker::Spawner;

/// How a worker's end is treated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Ending {
    /// Exit status known.
    Exit(WorkerExit),
    /// Adopted worker vanished without a status.
    Unknown,
}

fn ending(status: Option<ChildStatus>) -> Ending {
    match status {
        Some(ChildStatus::Exited(code)) => Ending::Exit(WorkerExit::from_code(code)),
        Some(ChildStatus::Signaled(signal)) => Ending::Exit(WorkerExit::from_code(-signal)),
        None => Ending::Unknown,
    }
}

impl<S: Spawner> Daemon<S> {
    /// Adopts the still running workers of a previous instance and returns
    /// every other started item to `PENDING`.
    pub(crate) fn recover(&mut self, now: i64) -> Result<(), FdError> {
        let mut adopted = 0;
        for index in 0..self.queue.len() {
            let item = self.queue.get(index)?;
            if item.pid <= 0 || !platform::is_alive(item.pid) {
                continue;
            }
            if let Some(slot) = self.adopt(&item) {
                let connect_pos = i32::try_from(slot).unwrap_or(-1);
                self.queue.update(index, |q| q.connect_pos = connect_pos)?;
                adopted += 1;
            }
        }
        let connections = &self.connections;
        let reset = self.queue.reset_orphans(|pid| connections.by_pid(pid).is_some())?;
        let stale_acks = self.acks.retain(|a| connections.by_pid(a.pid).is_some())?.len();
        for pos in 0..self.fsa.len() {
            self.publish_host_load(pos)?;
        }
        self.publish_counts()?;
        if adopted + reset + stale_acks > 0 {
            tracing::info!(target: "fd::supervisor", adopted, reset, stale_acks, at = now, "recovered queue");
        }
        Ok(())
    }

    fn adopt(&mut self, item: &QueueItem) -> Option<usize> {
        let fsa_pos = self.item_host(item)?;
        let host = self.host(fsa_pos);
        let job_no = (0..MAX_NO_PARALLEL_JOBS)
            .find(|&s| self.fsa.job(fsa_pos, s).is_ok_and(|j| j.proc_id == item.pid))
            .or_else(|| (0..MAX_NO_PARALLEL_JOBS).find(|&s| !self.connections.slot_in_use(fsa_pos, s)))?;

        let mut connection = if item.is_fetch() {
            let (dir_pos, dir) = self.item_dir(item)?;
            let protocol = Url::parse(&dir.url).map_or(Protocol::Loc, |u| u.protocol());
            let mut c = Connection::new(fsa_pos, job_no, &item.msg_name, protocol);
            c.fra_pos = Some(dir_pos);
            c.dir_id = dir.dir_id;
            c.dir_alias = dir.dir_alias;
            c
        } else {
            let name = MsgName::parse(&item.msg_name).ok()?;
            let entry = self.mdb.get(self.mdb.resolve(item.pos, name.job_id)?).ok()?;
            let protocol = Protocol::from_code(entry.kind).unwrap_or(Protocol::Loc);
            let mut c = Connection::new(fsa_pos, job_no, &item.msg_name, protocol);
            c.job_id = name.job_id;
            c
        };
        connection.pid = item.pid;
        connection.adopted = true;
        connection.host_id = host.host_id;
        connection.host_alias = host.host_alias.clone();
        connection.hostname = host.active_hostname().to_string();
        match self.connections.allocate(connection) {
            Ok(slot) => {
                tracing::info!(target: "fd::supervisor", pid = item.pid, host = %host.host_alias, job_no, "adopted running worker");
                Some(slot)
            }
            Err(error) => {
                tracing::warn!(target: "fd::supervisor", pid = item.pid, %error, "cannot adopt worker");
                None
            }
        }
    }

    /// Reaps every finished worker. Returns how many were reaped.
    pub(crate) fn reap_workers(&mut self, now: i64) -> Result<usize, FdError> {
        let candidates: Vec<(usize, i32, bool)> = self
            .connections
            .live()
            .filter(|(_, c)| c.pid > 0)
            .map(|(slot, c)| (slot, c.pid, c.adopted))
            .collect();
        let mut reaped = 0;
        for (slot, pid, adopted) in candidates {
            let status = if adopted {
                if platform::is_alive(pid) {
                    continue;
                }
                None
            } else {
                match platform::reap(pid) {
                    Ok(Some(status)) => Some(status),
                    Ok(None) if platform::is_alive(pid) => continue,
                    Ok(None) => None,
                    Err(error) => {
                        tracing::warn!(target: "fd::supervisor", pid, %error, "waitpid failed");
                        continue;
                    }
                }
            };
            self.finish(slot, status, now)?;
            reaped += 1;
        }
        Ok(reaped)
    }

    /// Releases connection `slot` whose worker ended with `status`.
    pub(crate) fn finish(&mut self, slot: usize, status: Option<ChildStatus>, now: i64) -> Result<(), FdError> {
        let Some(connection) = self.connections.release(slot) else {
            return Ok(());
        };
        let ending = ending(status);
        let index = self.queue.position_by_pid(connection.pid);
        let unacknowledged = self.acks.iter().any(|a| a.pid == connection.pid && a.msg_name == connection.msg_name);

        match index {
            None => {}
            Some(index) if unacknowledged => {
                tracing::info!(target: "fd::supervisor", msg_name = %connection.msg_name, "worker ended before taking its burst job");
                self.requeue(index)?;
            }
            Some(index) if connection.parked => self.finish_parked(index, &connection)?,
            Some(index) => match ending {
                Ending::Unknown => self.finish_unknown(index, &connection, now)?,
                Ending::Exit(exit) => self.classify(index, &connection, exit, now)?,
            },
        }
        self.after_release(&connection)
    }

    fn classify(&mut self, index: usize, connection: &Connection, exit: WorkerExit, now: i64) -> Result<(), FdError> {
        match exit.class() {
            ExitClass::Success => self.job_done(index, connection, now),
            ExitClass::SuccessWithPending => self.job_partly_done(index, connection, now),
            class if class.is_retryable() => self.job_failed(index, connection, exit, now),
            ExitClass::Configuration => {
                tracing::error!(
                    target: "fd::supervisor",
                    msg_name = %connection.msg_name,
                    exit = %exit,
                    "job description broken, dropping job"
                );
                self.drop_item(index, DeleteReason::DelQueuedFile)?;
                if !connection.is_fetch() {
                    self.mdb.unlink_message(connection.job_id);
                    self.mdb.remove(connection.job_id)?;
                }
                Ok(())
            }
            _ => {
                tracing::error!(target: "fd::supervisor", msg_name = %connection.msg_name, exit = %exit, "job failed for good");
                self.logs.transfer(
                    &LogLine::now(Severity::Error, format!("{} dropped: {exit}", connection.msg_name))
                        .host(&connection.host_alias)
                        .slot(connection.job_no),
                );
                self.drop_item(index, DeleteReason::DelQueuedFile).map(|_| ())
            }
        }
    }

    fn finish_parked(&mut self, index: usize, connection: &Connection) -> Result<(), FdError> {
        let item = self.queue.remove_at(index)?;
        if !item.is_fetch() {
            self.delete_job_files(&item.msg_name, &connection.host_alias, DeleteReason::DeleteHostDisabled);
        }
        tracing::info!(target: "fd::supervisor", msg_name = %item.msg_name, host = %connection.host_alias, "parked worker finished");
        self.publish_counts()
    }

    /// An adopted worker vanished: its job is retried if files are left.
    fn finish_unknown(&mut self, index: usize, connection: &Connection, now: i64) -> Result<(), FdError> {
        let item = self.queue.get(index)?;
        if item.is_fetch() || self.work.job_dir(&item.msg_name).exists() {
            self.requeue(index)
        } else {
            self.job_done(index, connection, now)
        }
    }

    /// Kills every remaining worker and returns its job to the queue, so the
    /// next instance sends it again. Returns how many workers were killed.
    pub(crate) fn stop_workers(&mut self) -> Result<usize, FdError> {
        let slots: Vec<usize> = self.connections.live().map(|(slot, _)| slot).collect();
        for &slot in &slots {
            let Some(connection) = self.connections.release(slot) else {
                continue;
            };
            if let Err(error) = platform::terminate(connection.pid) {
                tracing::warn!(target: "fd::supervisor", pid = connection.pid, %error, "cannot kill worker");
            }
            if let Some(index) = self.queue.position_by_pid(connection.pid) {
                self.requeue(index)?;
            }
            tracing::info!(target: "fd::supervisor", pid = connection.pid, msg_name = %connection.msg_name, "worker killed on shutdown");
            self.after_release(&connection)?;
        }
        Ok(slots.len())
    }

    fn requeue(&mut self, index: usize) -> Result<(), FdError> {
        self.queue.update(index, |q| {
            q.pid = PENDING;
            q.connect_pos = -1;
            q.special_flag.remove(SpecialFlags::BURST_READY);
        })?;
        Ok(())
    }

    fn after_release(&mut self, connection: &Connection) -> Result<(), FdError> {
        if !connection.parked {
            self.release_job_slot(connection.fsa_pos, connection.job_no)?;
            self.publish_host_load(connection.fsa_pos)?;
        }
        let pid = connection.pid;
        self.acks.retain(|a| a.pid != pid)?;
        self.publish_counts()
    }

    /// Completes the job the worker on `connection` was running.
    fn job_done(&mut self, index: usize, connection: &Connection, now: i64) -> Result<(), FdError> {
        let item = self.queue.remove_at(index)?;
        let fsa_pos = (!connection.parked && self.in_fsa(connection.fsa_pos)).then_some(connection.fsa_pos);
        if item.is_fetch() {
            self.forget_fetch(&item)?;
            if let Some(dir_pos) = connection.fra_pos {
                self.record_fetch_result(dir_pos, true, now)?;
            }
        } else {
            self.complete_send(&item, connection, now)?;
            self.forget_item_totals(fsa_pos, &item)?;
        }

        if let Some(pos) = fsa_pos {
            let files = item.files_to_send;
            let bytes = item.file_size_to_send;
            let temp_toggle = connection.temp_toggle;
            let _ec = self.fsa.lock(pos, HostLock::Ec)?;
            self.fsa.update_host(pos, |h| {
                h.file_counter_done = h.file_counter_done.wrapping_add(files);
                h.bytes_send = h.bytes_send.wrapping_add(bytes);
                record_success(h, temp_toggle, now)
            })?;
        }
        if self.errors.remove(connection.host_id, &item.msg_name) && self.errors.len_for(connection.host_id) == 0 {
            if let Some(pos) = fsa_pos {
                let _hs = self.fsa.lock(pos, HostLock::Hs)?;
                self.fsa.update_host(pos, |h| h.host_status.remove(HostStatusFlags::ERROR_QUEUE_SET))?;
            }
        }
        self.publish_counts()
    }

    /// The worker sent part of its job and left the rest in the job
    /// directory. The item stays queued with what is left; only the files
    /// that went out are counted as done.
    fn job_partly_done(&mut self, index: usize, connection: &Connection, now: i64) -> Result<(), FdError> {
        let item = self.queue.get(index)?;
        if item.is_fetch() {
            if let Some(dir_pos) = connection.fra_pos {
                self.record_fetch_result(dir_pos, true, now)?;
            }
            return self.requeue(index);
        }
        let remaining = match list_files(&self.work.job_dir(&item.msg_name)) {
            Ok(files) if !files.is_empty() => files,
            Ok(_) => return self.job_done(index, connection, now),
            Err(error) => {
                tracing::warn!(target: "fd::supervisor", msg_name = %item.msg_name, %error, "cannot list unsent files");
                return self.job_done(index, connection, now);
            }
        };
        let files_left = u32::try_from(remaining.len()).unwrap_or(u32::MAX);
        let bytes_left: u64 = remaining.iter().map(|(_, size)| size).sum();
        let files_sent = item.files_to_send.saturating_sub(files_left);
        let bytes_sent = item.file_size_to_send.saturating_sub(bytes_left);

        self.queue.update(index, |q| {
            q.pid = PENDING;
            q.connect_pos = -1;
            q.files_to_send = files_left;
            q.file_size_to_send = bytes_left;
            q.special_flag.remove(SpecialFlags::BURST_READY);
        })?;

        let fsa_pos = (!connection.parked && self.in_fsa(connection.fsa_pos)).then_some(connection.fsa_pos);
        if let Some(pos) = fsa_pos {
            self.adjust_host_totals(
                pos,
                -i64::from(files_sent),
                -i64::try_from(bytes_sent).unwrap_or(i64::MAX),
                0,
            )?;
            let temp_toggle = connection.temp_toggle;
            let _ec = self.fsa.lock(pos, HostLock::Ec)?;
            self.fsa.update_host(pos, |h| {
                h.file_counter_done = h.file_counter_done.wrapping_add(files_sent);
                h.bytes_send = h.bytes_send.wrapping_add(bytes_sent);
                record_success(h, temp_toggle, now)
            })?;
        }
        self.logs.transfer(
            &LogLine::now(
                Severity::Info,
                format!("{files_sent} files {bytes_sent} bytes sent, {files_left} files still queued"),
            )
            .host(&connection.host_alias)
            .slot(connection.job_no),
        );
        tracing::info!(
            target: "fd::supervisor",
            msg_name = %item.msg_name,
            files_sent,
            files_left,
            "worker left files unsent, job stays queued"
        );
        self.publish_counts()
    }

    /// Archives or deletes the sent files of `item` and logs them.
    fn complete_send(&mut self, item: &QueueItem, connection: &Connection, now: i64) -> Result<(), FdError> {
        let job_dir = self.work.job_dir(&item.msg_name);
        let name = MsgName::parse(&item.msg_name).ok();
        let job_id = name.map_or(connection.job_id, |n| n.job_id);
        let descriptor = self.mdb.descriptor(job_id).ok();
        let archive_time = descriptor
            .as_ref()
            .and_then(|d| d.options.archive_time)
            .unwrap_or(0);
        let host = self.host(connection.fsa_pos);

        let (sent, archive_dir) = match name {
            Some(name) if archive_time > 0 && !self.config.disable_archive() => {
                let unique = name.unique_segment();
                let key = ArchiveKey {
                    fs_id: name.fs_id,
                    host_alias: &connection.host_alias,
                    user: descriptor.as_ref().and_then(|d| d.destination.user.as_deref()),
                    job_id,
                    unique: &unique,
                    archive_time,
                };
                let keep = self.config.respect_do_not_delete()
                    && host.host_status.contains(HostStatusFlags::DO_NOT_DELETE_DATA);
                match self.archiver.archive_job(&job_dir, &key, now, keep) {
                    Ok(report) => {
                        for skipped in report.skipped.iter().filter(|s| !s.kept) {
                            self.logs.delete(&delete_record(
                                DeleteReason::ArchiveNameTooLong,
                                &connection.host_alias,
                                Some(&name),
                                &skipped.name,
                                skipped.size,
                            ));
                        }
                        (report.archived, Some(report.dir.display().to_string()))
                    }
                    Err(error) => {
                        let files = list_files(&job_dir).unwrap_or_default();
                        tracing::warn!(
                            target: "fd::archive",
                            msg_name = %item.msg_name,
                            files = files.len(),
                            %error,
                            "archiving failed, sent files are deleted instead"
                        );
                        self.logs.transfer(
                            &LogLine::now(
                                Severity::Warn,
                                format!("{} files of {} deleted, not archived: {error}", files.len(), item.msg_name),
                            )
                            .host(&connection.host_alias)
                            .slot(connection.job_no),
                        );
                        remove_job_dir(&job_dir);
                        (files, None)
                    }
                }
            }
            _ => {
                let files = list_files(&job_dir).unwrap_or_default();
                remove_job_dir(&job_dir);
                (files, None)
            }
        };

        let protocol = connection.protocol.code();
        for (file_name, file_size) in &sent {
            self.logs.output(&OutputRecord {
                host_alias: connection.host_alias.clone(),
                protocol,
                file_name: file_name.clone(),
                file_size: *file_size,
                transfer_time: 0.0,
                job_id,
                unique_name: item.msg_name.clone(),
                archive_dir: archive_dir.clone(),
            });
        }
        if let Some(index) = self.mdb.position(job_id) {
            self.mdb.touch_transfer(index, now)?;
        }
        let bytes: u64 = sent.iter().map(|(_, size)| size).sum();
        self.logs.transfer(
            &LogLine::now(Severity::Info, format!("{} files {bytes} bytes sent", sent.len()))
                .host(&connection.host_alias)
                .slot(connection.job_no),
        );
        tracing::debug!(target: "fd::supervisor", msg_name = %item.msg_name, files = sent.len(), archived = archive_dir.is_some(), "job done");
        Ok(())
    }

    fn job_failed(&mut self, index: usize, connection: &Connection, exit: WorkerExit, now: i64) -> Result<(), FdError> {
        let class = exit.class();
        let pos = connection.fsa_pos;
        let code = u8::try_from(exit.code()).unwrap_or(u8::MAX);
        let host = if class.counts_as_host_error() && self.in_fsa(pos) {
            let _ec = self.fsa.lock(pos, HostLock::Ec)?;
            let (outcome, host) = self.fsa.update_host(pos, |h| (record_failure(h, code, now), h.clone()))?;
            if outcome.toggled {
                self.logs.transfer(
                    &LogLine::now(Severity::Warn, format!("switching to {}", host.active_hostname()))
                        .host(&host.host_alias),
                );
            }
            host
        } else {
            self.host(pos)
        };

        let retries = self.queue.update(index, |q| {
            q.retries += 1;
            q.retries
        })?;
        let max_retries = self.config.max_retries();
        if max_retries > 0 && retries >= max_retries {
            tracing::error!(target: "fd::supervisor", msg_name = %connection.msg_name, retries, "retry limit reached, dropping job");
            self.drop_item(index, DeleteReason::DelQueuedFile)?;
            return Ok(());
        }

        let next = next_retry_time(now, host.retry_interval, retries, self.config.retry_backoff_limit());
        let escalate = class == ExitClass::Persistent && host.max_errors > 0 && host.error_counter >= host.max_errors;
        self.queue.update(index, |q| {
            q.pid = PENDING;
            q.connect_pos = -1;
            q.next_retry_time = next;
            q.special_flag.insert(SpecialFlags::OLD_ERROR_JOB);
            q.special_flag.remove(SpecialFlags::BURST_READY);
            if escalate {
                q.special_flag.insert(SpecialFlags::IN_ERROR_QUEUE);
            }
        })?;
        if escalate && self.in_fsa(pos) {
            self.errors.add(host.host_id, &connection.msg_name, next);
            let _hs = self.fsa.lock(pos, HostLock::Hs)?;
            self.fsa.update_host(pos, |h| h.host_status.insert(HostStatusFlags::ERROR_QUEUE_SET))?;
            tracing::warn!(target: "fd::supervisor", host = %host.host_alias, msg_name = %connection.msg_name, "job moved to the error queue");
        }
        if let Some(dir_pos) = connection.fra_pos {
            self.record_fetch_result(dir_pos, false, now)?;
        }
        self.logs.transfer(
            &LogLine::now(Severity::Warn, format!("{} failed: {exit} ({})", connection.msg_name, exit.code()))
                .host(&connection.host_alias)
                .slot(connection.job_no),
        );
        Ok(())
    }

    /// A worker reported on the finish fifo. A burst request completes its
    /// job and hands over the next one; plain completions are handled when
    /// the worker is reaped.
    pub(crate) fn handle_completion(&mut self, completion: Completion, now: i64) -> Result<(), FdError> {
        let Some(slot) = self.connections.by_pid(completion.pid) else {
            tracing::debug!(target: "fd::supervisor", pid = completion.pid, "completion from unknown worker");
            return Ok(());
        };
        if completion.more_data {
            self.hand_over(slot, now)?;
        }
        Ok(())
    }

    fn hand_over(&mut self, slot: usize, now: i64) -> Result<(), FdError> {
        let Some(connection) = self.connections.get(slot).cloned() else {
            return Ok(());
        };
        if let Some(index) = self.queue.position_by_pid(connection.pid) {
            self.job_done(index, &connection, now)?;
        }
        let next = if connection.parked || connection.is_fetch() || connection.temp_toggle {
            None
        } else {
            self.next_burst_item(&connection, now)
        };
        let (pos, job_no) = (connection.fsa_pos, connection.job_no);

        let Some(index) = next else {
            if !connection.parked && self.in_fsa(pos) {
                let _hs = self.fsa.lock(pos, HostLock::Hs)?;
                self.fsa.update_job(pos, job_no, |j| j.release_burst_wait())?;
            }
            return Ok(());
        };

        let item = self.queue.get(index)?;
        let job_id = MsgName::parse(&item.msg_name).map_or(0, |n| n.job_id);
        let connect_pos = i32::try_from(slot).unwrap_or(-1);
        self.queue.update(index, |q| {
            q.pid = connection.pid;
            q.connect_pos = connect_pos;
            q.special_flag.insert(SpecialFlags::BURST_READY);
        })?;
        if let Some(c) = self.connections.get_mut(slot) {
            c.msg_name.clone_from(&item.msg_name);
            c.job_id = job_id;
        }
        {
            let _hs = self.fsa.lock(pos, HostLock::Hs)?;
            self.fsa.update_job(pos, job_no, |j| {
                j.set_unique_name(&item.msg_name);
                j.job_id = job_id;
                j.connect_status = ConnectStatus::BurstTransferActive;
                j.no_of_files = i32::try_from(item.files_to_send).unwrap_or(i32::MAX);
                j.no_of_files_done = 0;
                j.file_size = item.file_size_to_send;
                j.file_size_done = 0;
            })?;
        }
        self.acks.push(&AckEntry {
            msg_name: item.msg_name.clone(),
            pid: connection.pid,
            fsa_pos: i32::try_from(pos).unwrap_or(-1),
            job_no: i32::try_from(job_no).unwrap_or(-1),
            job_id,
            insert_time: now,
        })?;
        self.update_status(|s| s.burst2_counter = s.burst2_counter.wrapping_add(1))?;
        tracing::debug!(target: "fd::supervisor", pid = connection.pid, msg_name = %item.msg_name, "burst hand-over");
        Ok(())
    }

    /// Next pending item the worker on `connection` can take over.
    fn next_burst_item(&self, connection: &Connection, now: i64) -> Option<usize> {
        let protocol = connection.protocol.code();
        self.queue.iter().enumerate().find_map(|(index, item)| {
            let eligible = item.is_pending()
                && !item.is_fetch()
                && item.next_retry_time <= now
                && !self.errors.is_blocked(connection.host_id, &item.msg_name, now)
                && self.item_host(&item) == Some(connection.fsa_pos)
                && self.burst_protocol(&item) == Some(protocol);
            eligible.then_some(index)
        })
    }

    fn burst_protocol(&self, item: &QueueItem) -> Option<u8> {
        let name = MsgName::parse(&item.msg_name).ok()?;
        let index = self.mdb.resolve(item.pos, name.job_id)?;
        self.mdb.get(index).ok().map(|e| e.kind)
    }

    /// A worker confirmed the job handed over on its connection.
    pub(crate) fn acknowledge_burst(&mut self, msg_name: &str) -> Result<(), FdError> {
        let removed = self.acks.retain(|a| a.msg_name != msg_name)?;
        if removed.is_empty() {
            tracing::debug!(target: "fd::supervisor", %msg_name, "unexpected burst acknowledgment");
            return Ok(());
        }
        if let Some(index) = self.queue.position(msg_name) {
            self.queue.update(index, |q| q.special_flag.remove(SpecialFlags::BURST_READY))?;
        }
        Ok(())
    }
}
