//! The `check_fsa_entries` pass.

use ssa::fsa::MAX_NO_PARALLEL_JOBS;
use ssa::{AmgJobs, HostLock, HostStatusFlags, JobStatus};

use super::Daemon;
use crate::error::FdError;
use crate::worker::Spawner;

impl<S: Spawner> Daemon<S> {
    /// Resets the counters of hosts nothing is queued or running for and
    /// clears error-queue marks that no longer apply.
    pub(crate) fn check_fsa_entries(&mut self, now: i64) -> Result<(), FdError> {
        let mut busy = vec![false; self.fsa.len()];
        for item in self.queue.iter() {
            if let Some(flag) = self.item_host(&item).and_then(|pos| busy.get_mut(pos)) {
                *flag = true;
            }
        }
        for (_, c) in self.connections.live().filter(|(_, c)| !c.parked) {
            if let Some(flag) = busy.get_mut(c.fsa_pos) {
                *flag = true;
            }
        }

        let _check = self.fsa.lock_check_entries()?;
        let mut reset = 0;
        for (pos, busy) in busy.into_iter().enumerate() {
            let host = self.fsa.get(pos)?;
            if usize::try_from(host.allowed_transfers).is_ok_and(|a| a > MAX_NO_PARALLEL_JOBS) {
                tracing::warn!(
                    target: "fd::check",
                    host = %host.host_alias,
                    allowed = host.allowed_transfers,
                    max = MAX_NO_PARALLEL_JOBS,
                    "allowed transfers above the slot count"
                );
                self.reset_idle_slots(pos)?;
            }
            if !busy {
                {
                    let _tfc = self.fsa.lock(pos, HostLock::Tfc)?;
                    self.fsa.update_host(pos, |h| {
                        h.active_transfers = 0;
                        h.total_file_counter = 0;
                        h.total_file_size = 0;
                        h.jobs_queued = 0;
                    })?;
                }
                {
                    let _ec = self.fsa.lock(pos, HostLock::Ec)?;
                    self.fsa.update_host(pos, |h| h.reset_errors())?;
                }
                self.reset_idle_slots(pos)?;
                reset += 1;
            }
            if host.host_status.contains(HostStatusFlags::ERROR_QUEUE_SET)
                && self.errors.host_check_error_queue(host.host_id, now, host.retry_interval) == 0
            {
                let _hs = self.fsa.lock(pos, HostLock::Hs)?;
                self.fsa
                    .update_host(pos, |h| h.host_status.remove(HostStatusFlags::ERROR_QUEUE_SET))?;
                tracing::info!(target: "fd::check", host = %host.host_alias, "error queue drained");
            }
        }
        self.update_status(|s| s.amg_jobs.remove(AmgJobs::CHECK_FSA_ENTRIES))?;
        tracing::debug!(target: "fd::check", hosts = self.fsa.len(), reset, "checked FSA entries");
        Ok(())
    }

    /// Returns every slot of host `pos` without a live worker to idle.
    fn reset_idle_slots(&mut self, pos: usize) -> Result<(), FdError> {
        let _hs = self.fsa.lock(pos, HostLock::Hs)?;
        for job_no in 0..MAX_NO_PARALLEL_JOBS {
            if !self.connections.slot_in_use(pos, job_no) {
                self.fsa.set_job(pos, job_no, &JobStatus::idle())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{Fixture, announce};

    #[test]
    fn idle_host_counters_are_reset() {
        let mut fx = Fixture::new();
        fx.set_host(1, |h| {
            h.active_transfers = 3;
            h.total_file_counter = 9;
            h.total_file_size = 900;
            h.error_counter = 2;
            h.error_history = [20, 20];
            h.job_status[2].proc_id = 4242;
        });
        fx.daemon.check_fsa_entries(100).expect("check");
        let host = fx.daemon.fsa().get(1).expect("host");
        assert_eq!(host.active_transfers, 0);
        assert_eq!(host.total_file_counter, 0);
        assert_eq!(host.total_file_size, 0);
        assert_eq!(host.error_counter, 0);
        assert_eq!(host.error_history, [0, 0]);
        assert!(host.job_status.iter().all(JobStatus::is_idle));
    }

    #[test]
    fn busy_host_keeps_its_totals() {
        let mut fx = Fixture::new();
        fx.set_host(0, |h| h.allowed_transfers = 0);
        let name = fx.job(0x70, "ftp://u@h1/x", &[("a", b"12345")], 0);
        announce(&mut fx, &name, 100);
        fx.daemon.check_fsa_entries(100).expect("check");
        let host = fx.daemon.fsa().get(0).expect("host");
        assert_eq!(host.total_file_counter, 1);
        assert_eq!(host.total_file_size, 5);
    }

    #[test]
    fn drained_error_queue_clears_the_host_flag() {
        let mut fx = Fixture::new();
        fx.set_host(0, |h| h.host_status.insert(HostStatusFlags::ERROR_QUEUE_SET));
        fx.daemon.check_fsa_entries(100).expect("check");
        let host = fx.daemon.fsa().get(0).expect("host");
        assert!(!host.host_status.contains(HostStatusFlags::ERROR_QUEUE_SET));
    }

    #[test]
    fn oversized_allowed_transfers_resets_free_slots() {
        let mut fx = Fixture::new();
        fx.set_host(0, |h| {
            h.allowed_transfers = 9;
            h.job_status[4].proc_id = 77;
        });
        let name = fx.job(0x71, "ftp://u@h1/x", &[("a", b"1")], 0);
        announce(&mut fx, &name, 100);
        fx.daemon.check_fsa_entries(100).expect("check");
        assert!(fx.daemon.fsa().job(0, 4).expect("slot").is_idle());
    }
}
