//! Operator requests: fd commands, host retries, deletes and rate
//! recalculation.

use std::fs;

use logging::DeleteReason;
use protocol::{DeleteRequest, FdCommand, MsgName};
use ssa::{HostLock, HostStatusFlags};

use super::{Daemon, delete_record};
use crate::error::FdError;
use crate::worker::Spawner;

impl<S: Spawner> Daemon<S> {
    pub(crate) fn handle_command(&mut self, command: FdCommand, now: i64) -> Result<(), FdError> {
        tracing::debug!(target: "fd::commands", ?command, "command received");
        match command {
            FdCommand::Shutdown => self.request_shutdown(),
            FdCommand::CheckFsaEntries => self.check_fsa_entries(now)?,
            FdCommand::FlushMsgFifoDumpQueue => self.dump_queue(),
            FdCommand::ForceRemoteDirCheck => {
                self.force_remote_dir_check()?;
                self.schedule_fetches(now)?;
            }
            FdCommand::RereadLocInterfaceFile => {
                tracing::info!(target: "fd::commands", "local interface file reread requested, nothing to do");
            }
            FdCommand::IsAlive => tracing::debug!(target: "fd::commands", "alive"),
        }
        Ok(())
    }

    fn dump_queue(&self) {
        tracing::info!(target: "fd::commands", items = self.queue.len(), "queue dump");
        for (index, item) in self.queue.iter().enumerate() {
            tracing::info!(
                target: "fd::commands",
                index,
                msg_name = %item.msg_name,
                msg_number = item.msg_number,
                pid = item.pid,
                retries = item.retries,
                files = item.files_to_send,
                bytes = item.file_size_to_send,
                next_retry = item.next_retry_time,
                fetch = item.is_fetch(),
                "queued"
            );
        }
    }

    /// Makes every waiting job of host `fsa_pos` eligible right away.
    pub(crate) fn retry_host(&mut self, fsa_pos: i32) -> Result<(), FdError> {
        let Some(pos) = usize::try_from(fsa_pos).ok().filter(|&p| self.in_fsa(p)) else {
            tracing::warn!(target: "fd::commands", fsa_pos, "retry for unknown host position");
            return Ok(());
        };
        let mut cleared = 0;
        for index in 0..self.queue.len() {
            let item = self.queue.get(index)?;
            if item.is_pending() && item.next_retry_time > 0 && self.item_host(&item) == Some(pos) {
                self.queue.update(index, |q| q.next_retry_time = 0)?;
                cleared += 1;
            }
        }
        let host = self.host(pos);
        let unblocked = self.errors.clear_host(host.host_id);
        {
            let _hs = self.fsa.lock(pos, HostLock::Hs)?;
            self.fsa
                .update_host(pos, |h| h.host_status.remove(HostStatusFlags::ERROR_QUEUE_SET))?;
        }
        tracing::info!(target: "fd::commands", host = %host.host_alias, cleared, unblocked, "retrying host");
        Ok(())
    }

    /// Applies an operator delete request.
    pub(crate) fn handle_delete(&mut self, request: &DeleteRequest) -> Result<(), FdError> {
        match request {
            DeleteRequest::AllJobsFromHost { host_alias } => {
                let Some(pos) = self.fsa.position_by_alias(host_alias) else {
                    tracing::warn!(target: "fd::commands", host = %host_alias, "delete for unknown host");
                    return Ok(());
                };
                let names: Vec<String> = self
                    .queue
                    .iter()
                    .filter(|item| !item.is_fetch() && self.item_host(item) == Some(pos))
                    .map(|item| item.msg_name)
                    .collect();
                for name in &names {
                    self.delete_job(name)?;
                }
                tracing::info!(target: "fd::commands", host = %host_alias, jobs = names.len(), "deleted all jobs of host");
                Ok(())
            }
            DeleteRequest::Message { msg_name } => {
                if !self.delete_job(msg_name)? {
                    tracing::warn!(target: "fd::commands", %msg_name, "delete for unknown job");
                }
                Ok(())
            }
            DeleteRequest::SingleFile { msg_name, file_name } => self.delete_single_file(msg_name, file_name),
        }
    }

    /// Removes the job `msg_name`, killing its worker first. Returns `false`
    /// if no such job is queued.
    fn delete_job(&mut self, msg_name: &str) -> Result<bool, FdError> {
        let Some(index) = self.queue.position(msg_name) else {
            return Ok(false);
        };
        let item = self.queue.get(index)?;
        if item.pid > 0 {
            if let Some(slot) = self.connections.by_pid(item.pid) {
                self.kill_connection(slot, DeleteReason::UserDel)?;
                return Ok(true);
            }
        }
        self.drop_item(index, DeleteReason::UserDel)?;
        Ok(true)
    }

    fn delete_single_file(&mut self, msg_name: &str, file_name: &str) -> Result<(), FdError> {
        let Some(index) = self.queue.position(msg_name) else {
            tracing::warn!(target: "fd::commands", %msg_name, "delete for unknown job");
            return Ok(());
        };
        let item = self.queue.get(index)?;
        if item.is_running() {
            tracing::warn!(target: "fd::commands", %msg_name, file = %file_name, "job is being transferred, not deleting file");
            return Ok(());
        }
        if file_name.contains('/') {
            tracing::warn!(target: "fd::commands", file = %file_name, "rejecting file name with a path");
            return Ok(());
        }
        let path = self.work.job_dir(msg_name).join(file_name);
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(error) => {
                tracing::warn!(target: "fd::commands", path = %path.display(), %error, "cannot delete file");
                return Ok(());
            }
        };
        if let Err(error) = fs::remove_file(&path) {
            tracing::warn!(target: "fd::commands", path = %path.display(), %error, "cannot delete file");
            return Ok(());
        }
        let fsa_pos = self.item_host(&item);
        let host = fsa_pos.map(|p| self.host(p)).unwrap_or_default();
        let name = MsgName::parse(msg_name).ok();
        self.logs.delete(&delete_record(
            DeleteReason::UserDel,
            &host.host_alias,
            name.as_ref(),
            file_name,
            size,
        ));

        if item.files_to_send <= 1 {
            self.drop_item(index, DeleteReason::UserDel)?;
            return Ok(());
        }
        self.queue.update(index, |q| {
            q.files_to_send -= 1;
            q.file_size_to_send = q.file_size_to_send.saturating_sub(size);
        })?;
        if let Some(pos) = fsa_pos {
            self.adjust_host_totals(pos, -1, -i64::try_from(size).unwrap_or(i64::MAX), 0)?;
        }
        Ok(())
    }

    /// Republishes the rate share of host `fsa_pos` and of every host that
    /// shares a rate group with it.
    pub(crate) fn recalculate_trl(&mut self, fsa_pos: i32) -> Result<(), FdError> {
        let Some(pos) = usize::try_from(fsa_pos).ok().filter(|&p| self.in_fsa(p)) else {
            tracing::warn!(target: "fd::commands", fsa_pos, "rate recalculation for unknown host position");
            return Ok(());
        };
        let alias = self.host(pos).host_alias;
        let members: Vec<usize> = match self.config.trl_groups().group_of(&alias) {
            Some(group) => self
                .fsa
                .iter()
                .enumerate()
                .filter(|(_, h)| group.members.contains(&h.host_alias))
                .map(|(i, _)| i)
                .collect(),
            None => vec![pos],
        };
        for member in members {
            self.publish_host_load(member)?;
        }
        Ok(())
    }
}
