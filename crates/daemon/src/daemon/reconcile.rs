//! Remapping after AMG replaced the FSA or FRA.
//!
//! Positions are only valid within one generation, so every connection,
//! queue item and cache entry is looked up again by its stable id. Hosts
//! and directories that vanished are handled per [`RemovedHostPolicy`].

use std::thread;
use std::time::Duration;

use logging::DeleteReason;
use protocol::MsgName;
use ssa::{AmgJobs, ConnectStatus, Fra, Fsa, HostLock};

use super::Daemon;
use crate::config::RemovedHostPolicy;
use crate::error::FdError;
use crate::worker::Spawner;

/// Polls of the AMG reread flag before the distributor goes ahead anyway.
pub const WAIT_LOOPS: u32 = 600;

const WAIT_STEP: Duration = Duration::from_millis(100);

impl<S: Spawner> Daemon<S> {
    /// Re-attaches the status areas and remaps everything that points into
    /// them.
    pub(crate) fn reconcile(&mut self, now: i64) -> Result<(), FdError> {
        self.update_status(|s| s.amg_jobs.insert(AmgJobs::FD_WAITING))?;
        self.wait_for_amg()?;

        let fifodir = self.work.fifodir();
        if self.fsa.is_stale() || self.fsa.check_id_changed()? {
            let old_id = self.fsa.id();
            self.fsa = Fsa::attach(&fifodir)?;
            tracing::info!(target: "fd::reconcile", old_id, new_id = self.fsa.id(), hosts = self.fsa.len(), "FSA replaced");
            self.remap_hosts()?;
        }
        let fra_changed = match &self.fra {
            Some(fra) => fra.is_stale() || fra.check_id_changed()?,
            None => true,
        };
        if fra_changed {
            match Fra::attach(&fifodir) {
                Ok(fra) => self.fra = Some(fra),
                Err(error) => {
                    tracing::warn!(target: "fd::reconcile", %error, "no FRA, fetching disabled");
                    self.fra = None;
                }
            }
            self.remap_dirs();
        }

        let delisted = self.mdb.relink(&self.fsa)?;
        if !delisted.is_empty() {
            tracing::info!(target: "fd::reconcile", jobs = delisted.len(), "jobs lost their host");
        }
        self.purge_unresolvable()?;
        self.rebuild_host_totals()?;
        let removed = self.stores.remove_unreferenced()?;
        if removed.total() > 0 {
            tracing::info!(
                target: "fd::reconcile",
                dir_names = removed.dir_names,
                file_masks = removed.file_masks,
                passwords = removed.passwords,
                dir_configs = removed.dir_configs,
                "removed unreferenced store entries"
            );
        }

        self.update_status(|s| s.amg_jobs.remove(AmgJobs::FD_WAITING))?;
        self.check_fsa_entries(now)
    }

    /// Waits while AMG rewrites the configuration, releasing every worker
    /// that waits for a burst hand-over so it cannot block AMG.
    fn wait_for_amg(&mut self) -> Result<(), FdError> {
        for _ in 0..WAIT_LOOPS {
            if !self.status.get(0)?.amg_jobs.contains(AmgJobs::REREADING_DIR_CONFIG) {
                return Ok(());
            }
            self.release_burst_waits()?;
            thread::sleep(WAIT_STEP);
        }
        tracing::warn!(target: "fd::reconcile", "AMG still rereading, continuing");
        Ok(())
    }

    fn release_burst_waits(&mut self) -> Result<(), FdError> {
        let slots: Vec<(usize, usize)> = self
            .connections
            .live()
            .filter(|(_, c)| !c.parked && c.fsa_pos < self.fsa.len())
            .map(|(_, c)| (c.fsa_pos, c.job_no))
            .collect();
        for (pos, job_no) in slots {
            if self.fsa.job(pos, job_no)?.is_waiting_for_burst() {
                let _hs = self.fsa.lock(pos, HostLock::Hs)?;
                self.fsa.update_job(pos, job_no, |j| j.release_burst_wait())?;
            }
        }
        Ok(())
    }

    /// Moves every connection to the new row of its host.
    fn remap_hosts(&mut self) -> Result<(), FdError> {
        let policy = self.config.removed_host_policy();
        let parking = self.fsa.len();
        let mut doomed = Vec::new();
        for (slot, c) in self.connections.live_mut() {
            match self.fsa.position_by_id(c.host_id) {
                Some(pos) => {
                    c.fsa_pos = pos;
                    c.parked = false;
                }
                None if policy == RemovedHostPolicy::Kill => doomed.push(slot),
                None => {
                    tracing::info!(target: "fd::reconcile", host = %c.host_alias, pid = c.pid, "host removed, parking worker");
                    c.fsa_pos = parking;
                    c.parked = true;
                }
            }
        }
        for slot in doomed {
            self.kill_connection(slot, DeleteReason::DeleteHostDisabled)?;
        }

        let running: Vec<_> = self
            .connections
            .live()
            .filter(|(_, c)| !c.parked)
            .map(|(_, c)| (c.fsa_pos, c.job_no, c.pid, c.job_id, c.msg_name.clone()))
            .collect();
        for (pos, job_no, pid, job_id, msg_name) in running {
            let _hs = self.fsa.lock(pos, HostLock::Hs)?;
            self.fsa.update_job(pos, job_no, |j| {
                if j.proc_id != pid {
                    j.proc_id = pid;
                    j.connect_status = ConnectStatus::Connecting;
                    j.job_id = job_id;
                    j.set_unique_name(&msg_name);
                }
            })?;
        }
        for pos in 0..self.fsa.len() {
            self.publish_host_load(pos)?;
        }
        Ok(())
    }

    /// Moves every fetch connection to the new row of its directory.
    fn remap_dirs(&mut self) {
        let fra = self.fra.as_ref();
        let parking = fra.map_or(0, Fra::len);
        for (_, c) in self.connections.live_mut() {
            if c.fra_pos.is_none() {
                continue;
            }
            match fra.and_then(|f| f.position_by_id(c.dir_id)) {
                Some(pos) => c.fra_pos = Some(pos),
                None => {
                    tracing::info!(target: "fd::reconcile", dir = %c.dir_alias, pid = c.pid, "directory removed, parking fetch");
                    c.fra_pos = Some(parking);
                }
            }
        }
    }

    /// Drops pending items whose host or directory is gone and refreshes
    /// the remembered positions of the rest.
    fn purge_unresolvable(&mut self) -> Result<(), FdError> {
        let mut purged = 0;
        for index in (0..self.queue.len()).rev() {
            let item = self.queue.get(index)?;
            if item.is_running() {
                continue;
            }
            let resolved = if item.is_fetch() {
                self.item_dir(&item)
                    .filter(|(_, dir)| self.fsa.position_by_alias(&dir.host_alias).is_some())
                    .map(|(pos, _)| pos)
            } else {
                self.item_host(&item).and_then(|_| {
                    let name = MsgName::parse(&item.msg_name).ok()?;
                    self.mdb.resolve(item.pos, name.job_id)
                })
            };
            match resolved {
                Some(pos) => {
                    let pos = i32::try_from(pos).unwrap_or(-1);
                    self.queue.update(index, |q| q.pos = pos)?;
                }
                None => {
                    let item = self.queue.remove_at(index)?;
                    if item.is_fetch() {
                        self.forget_fetch(&item)?;
                    } else {
                        let host = MsgName::parse(&item.msg_name)
                            .ok()
                            .and_then(|n| self.mdb.position(n.job_id))
                            .and_then(|i| self.mdb.get(i).ok())
                            .map(|e| e.host_name)
                            .unwrap_or_default();
                        self.delete_job_files(&item.msg_name, &host, DeleteReason::DeleteHostDisabled);
                    }
                    purged += 1;
                }
            }
        }
        if purged > 0 {
            tracing::info!(target: "fd::reconcile", purged, "dropped jobs without host or directory");
            self.publish_counts()?;
        }
        Ok(())
    }

    /// Recomputes the queued totals of every host from the queue.
    fn rebuild_host_totals(&mut self) -> Result<(), FdError> {
        let mut totals = vec![(0_i64, 0_u64, 0_u32); self.fsa.len()];
        for item in self.queue.iter().filter(|i| !i.is_fetch()) {
            if let Some(t) = self.item_host(&item).and_then(|pos| totals.get_mut(pos)) {
                t.0 += i64::from(item.files_to_send);
                t.1 = t.1.saturating_add(item.file_size_to_send);
                t.2 += 1;
            }
        }
        for (pos, (files, size, jobs)) in totals.into_iter().enumerate() {
            let _tfc = self.fsa.lock(pos, HostLock::Tfc)?;
            self.fsa.update_host(pos, |h| {
                h.total_file_counter = i32::try_from(files).unwrap_or(i32::MAX);
                h.total_file_size = size;
                h.jobs_queued = jobs;
            })?;
        }
        Ok(())
    }

    /// Kills the worker in connection `slot` and purges its job.
    pub(crate) fn kill_connection(&mut self, slot: usize, reason: DeleteReason) -> Result<(), FdError> {
        let Some(connection) = self.connections.release(slot) else {
            return Ok(());
        };
        if connection.pid > 0 {
            if let Err(error) = platform::terminate(connection.pid) {
                tracing::warn!(target: "fd::reconcile", pid = connection.pid, %error, "cannot kill worker");
            }
        }
        tracing::info!(target: "fd::reconcile", pid = connection.pid, msg_name = %connection.msg_name, ?reason, "killed worker");
        if let Some(index) = self.queue.position(&connection.msg_name) {
            let item = self.queue.remove_at(index)?;
            if item.is_fetch() {
                self.forget_fetch(&item)?;
            } else {
                let fsa_pos = (!connection.parked && self.in_fsa(connection.fsa_pos)).then_some(connection.fsa_pos);
                self.forget_item_totals(fsa_pos, &item)?;
                self.errors.remove(connection.host_id, &item.msg_name);
                self.delete_job_files(&item.msg_name, &connection.host_alias, reason);
            }
        }
        if !connection.parked && self.in_fsa(connection.fsa_pos) {
            self.release_job_slot(connection.fsa_pos, connection.job_no)?;
            self.publish_host_load(connection.fsa_pos)?;
        }
        let pid = connection.pid;
        self.acks.retain(|a| a.pid != pid)?;
        self.publish_counts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{Fixture, announce};

    #[test]
    fn removed_host_parks_running_worker_by_default() {
        let mut fx = Fixture::new();
        fx.daemon.spawner_mut().hang_all();
        let name = fx.job(0x60, "ftp://u@h1/x", &[("a", b"1")], 0);
        announce(&mut fx, &name, 100);
        fx.daemon.schedule(100).expect("schedule");
        fx.remove_host("h1");

        fx.daemon.step(Vec::new(), 101).expect("step");
        let (_, c) = fx.daemon.connections().live().next().expect("still running");
        assert!(c.parked);
        assert_eq!(c.fsa_pos, fx.daemon.fsa().len());
        assert_eq!(fx.daemon.queue().len(), 1);

        fx.finish_all(0);
        fx.wait_idle(102);
        assert!(fx.daemon.queue().is_empty());
        assert!(!fx.daemon.work().job_dir(&name).exists());
        for host in fx.daemon.fsa().iter() {
            assert!(host.active_transfers <= host.allowed_transfers);
        }
    }

    #[test]
    fn removed_host_kills_worker_when_configured() {
        let mut fx = Fixture::with_config(|b| b.removed_host_policy(RemovedHostPolicy::Kill));
        fx.daemon.spawner_mut().hang_all();
        let name = fx.job(0x61, "ftp://u@h1/x", &[("a", b"1")], 0);
        announce(&mut fx, &name, 100);
        fx.daemon.schedule(100).expect("schedule");
        fx.remove_host("h1");

        fx.daemon.step(Vec::new(), 101).expect("step");
        assert!(fx.daemon.connections().is_empty());
        assert!(fx.daemon.queue().is_empty());
        assert!(!fx.daemon.work().job_dir(&name).exists());
        assert_eq!(fx.daemon.status().expect("status").no_of_transfers, 0);
    }

    #[test]
    fn pending_jobs_of_a_removed_host_are_purged() {
        let mut fx = Fixture::new();
        fx.set_host(0, |h| h.allowed_transfers = 0);
        let name = fx.job(0x62, "ftp://u@h1/x", &[("a", b"1")], 0);
        let kept = fx.job(0x63, "ftp://u@h2/x", &[("b", b"1")], 0);
        announce(&mut fx, &name, 100);
        announce(&mut fx, &kept, 100);
        fx.remove_host("h1");

        fx.daemon.reconcile(101).expect("reconcile");
        assert_eq!(fx.daemon.queue().len(), 1);
        assert_eq!(fx.daemon.queue().get(0).expect("kept").msg_name, kept);
        assert!(!fx.daemon.work().job_dir(&name).exists());
        let entry = fx.daemon.mdb().get(fx.daemon.mdb().position(0x62).expect("entry")).expect("get");
        assert_eq!(entry.fsa_pos, -1);
        let h2 = fx.daemon.fsa().get(0).expect("h2 moved up");
        assert_eq!(h2.host_alias, "h2");
        assert_eq!(h2.jobs_queued, 1);
    }

    #[test]
    fn reconcile_clears_the_waiting_flag() {
        let mut fx = Fixture::new();
        fx.daemon.reconcile(10).expect("reconcile");
        assert!(!fx.daemon.status().expect("status").amg_jobs.contains(AmgJobs::FD_WAITING));
    }
}
