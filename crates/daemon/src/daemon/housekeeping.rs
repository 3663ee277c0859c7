//! Work done on the timer rather than on fifo input.

use logging::DeleteReason;
use protocol::MsgName;
use ssa::AmgJobs;

use super::Daemon;
use crate::error::FdError;
use crate::mdb::StaleRule;
use crate::worker::Spawner;

impl<S: Spawner> Daemon<S> {
    /// One timer pass: reap stale messages, age out waiting jobs, run a
    /// requested entry check and queue due fetches.
    pub fn tick(&mut self, now: i64) -> Result<(), FdError> {
        self.reap_stale_messages(now)?;
        self.age_out_pending(now)?;
        if self.status.get(0)?.amg_jobs.contains(AmgJobs::CHECK_FSA_ENTRIES) {
            self.check_fsa_entries(now)?;
        }
        if !self.shutting_down {
            self.schedule_fetches(now)?;
        }
        self.flush()
    }

    /// Removes cache entries, message files and queued jobs of job ids
    /// whose host left the FSA and that were neither changed nor used for
    /// `message_max_age` seconds. Returns how many job ids were removed.
    pub(crate) fn reap_stale_messages(&mut self, now: i64) -> Result<usize, FdError> {
        let stale = self
            .mdb
            .stale_entries(now, self.config.message_max_age(), StaleRule::AllOf);
        for entry in &stale {
            let slots: Vec<usize> = self
                .connections
                .live()
                .filter(|(_, c)| !c.is_fetch() && c.job_id == entry.job_id)
                .map(|(slot, _)| slot)
                .collect();
            for slot in slots {
                self.kill_connection(slot, DeleteReason::ClearStaleMessages)?;
            }
            for index in (0..self.queue.len()).rev() {
                let item = self.queue.get(index)?;
                let owned = !item.is_fetch() && MsgName::parse(&item.msg_name).is_ok_and(|n| n.job_id == entry.job_id);
                if owned {
                    self.drop_item(index, DeleteReason::ClearStaleMessages)?;
                }
            }
            self.mdb.unlink_message(entry.job_id);
            self.stores.remove_unused_for(entry.job_id)?;
            self.mdb.remove(entry.job_id)?;
            tracing::info!(target: "fd::mdb", job_id = %format_args!("{:x}", entry.job_id), "removed stale message");
        }
        Ok(stale.len())
    }

    /// Deletes waiting jobs that passed their age limit while queued.
    fn age_out_pending(&mut self, now: i64) -> Result<(), FdError> {
        for index in (0..self.queue.len()).rev() {
            let item = self.queue.get(index)?;
            if !item.is_pending() || item.is_fetch() {
                continue;
            }
            let age_limit = MsgName::parse(&item.msg_name)
                .ok()
                .and_then(|n| self.mdb.resolve(item.pos, n.job_id))
                .and_then(|i| self.mdb.get(i).ok())
                .map_or(0, |e| e.age_limit);
            if age_limit > 0 && now - item.creation_time > i64::from(age_limit) {
                tracing::info!(target: "fd::housekeeping", msg_name = %item.msg_name, age_limit, "queued job exceeded its age limit");
                self.drop_item(index, DeleteReason::AgeOutput)?;
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
    fn stale_message_of_removed_host_is_reaped() {
        let mut fx = Fixture::with_config(|b| b.switch_file_time(3_600).max_output_log_files(1));
        let name = fx.job(0x90, "ftp://u@h1/x", &[("a", b"1")], 0);
        fx.backdate_message(0x90, 10);
        fx.set_host(0, |h| h.allowed_transfers = 0);
        announce(&mut fx, &name, 100);
        fx.remove_host("h1");
        fx.daemon.reconcile(100).expect("reconcile");
        assert!(fx.daemon.mdb().position(0x90).is_some());

        assert_eq!(fx.daemon.reap_stale_messages(10_000).expect("reap"), 1);
        assert!(fx.daemon.mdb().position(0x90).is_none());
        assert!(!fx.daemon.work().message_file(0x90).exists());
    }

    #[test]
    fn recently_used_message_is_kept() {
        let mut fx = Fixture::with_config(|b| b.switch_file_time(3_600).max_output_log_files(1));
        let name = fx.job(0x91, "ftp://u@h1/x", &[("a", b"1")], 0);
        fx.backdate_message(0x91, 10);
        fx.set_host(0, |h| h.allowed_transfers = 0);
        announce(&mut fx, &name, 100);
        fx.remove_host("h1");
        fx.daemon.reconcile(100).expect("reconcile");
        let index = fx.daemon.mdb().position(0x91).expect("entry");
        fx.daemon.mdb.touch_transfer(index, 9_000).expect("touch");
        assert_eq!(fx.daemon.reap_stale_messages(10_000).expect("reap"), 0);
        assert_eq!(fx.daemon.mdb().stale_entries(10_000, 3_600, StaleRule::AnyOf).len(), 1);
    }

    #[test]
    fn waiting_job_ages_out() {
        let mut fx = Fixture::new();
        fx.set_host(0, |h| h.allowed_transfers = 0);
        let name = fx.job(0x92, "ftp://u@h1/x", &[("a", b"1")], 60);
        announce(&mut fx, &name, 100);
        fx.daemon.tick(130).expect("early tick");
        assert_eq!(fx.daemon.queue().iter().filter(|i| !i.is_fetch()).count(), 1);
        fx.daemon.tick(200).expect("late tick");
        assert_eq!(fx.daemon.queue().iter().filter(|i| !i.is_fetch()).count(), 0);
        assert!(!fx.daemon.work().job_dir(&name).exists());
    }
}
