//! New jobs announced on the message fifo.

use logging::{DeleteReason, LogLine, Severity};
use protocol::{DcFlags, MsgName, MsgRecord, parse_fetch_name};
use ssa::{QueueItem, SpecialFlags};

use super::{Daemon, delete_record, remove_job_dir};
use crate::dupcheck::DupAction;
use crate::error::FdError;
use crate::queue::{Inserted, msg_number};
use crate::worker::Spawner;

impl<S: Spawner> Daemon<S> {
    /// Queues the job announced by `record`.
    ///
    /// Malformed names are logged and dropped. Jobs whose message cannot be
    /// resolved, whose host is gone or whose age limit has passed are
    /// deleted with a delete-log record per file.
    pub(crate) fn handle_message(&mut self, record: &MsgRecord, now: i64) -> Result<(), FdError> {
        let special = SpecialFlags::from_bits_truncate(record.special_flag);
        if special.contains(SpecialFlags::FETCH_JOB) {
            return self.handle_fetch_record(record, now);
        }
        let name = match MsgName::parse(&record.msg_name) {
            Ok(name) => name,
            Err(error) => {
                tracing::warn!(target: "fd::ingress", msg_name = %record.msg_name, %error, "rejecting message");
                return Ok(());
            }
        };

        let msg_dir = self.work.msg_dir();
        let stores = &self.stores;
        let lookup = self
            .mdb
            .lookup(name.job_id, &self.fsa, |job_id| stores.recreate_msg(job_id, &msg_dir))?;
        let Some(index) = lookup else {
            tracing::warn!(
                target: "fd::ingress",
                msg_name = %record.msg_name,
                job_id = %format_args!("{:x}", name.job_id),
                "unknown job id, deleting job"
            );
            self.delete_job_files(&record.msg_name, "", DeleteReason::JidLookupFailureDel);
            return Ok(());
        };
        let entry = self.mdb.get(index)?;
        let Some(fsa_pos) = usize::try_from(entry.fsa_pos).ok().filter(|&p| self.in_fsa(p)) else {
            tracing::warn!(target: "fd::ingress", host = %entry.host_name, msg_name = %record.msg_name, "host not in FSA, deleting job");
            self.delete_job_files(&record.msg_name, &entry.host_name, DeleteReason::DeleteHostDisabled);
            return Ok(());
        };

        if entry.age_limit > 0 && now - record.creation_time > i64::from(entry.age_limit) {
            let deleted = self.delete_job_files(&record.msg_name, &entry.host_name, DeleteReason::AgeOutput);
            tracing::info!(
                target: "fd::ingress",
                host = %entry.host_name,
                msg_name = %record.msg_name,
                age_limit = entry.age_limit,
                deleted,
                "job exceeded its age limit"
            );
            return Ok(());
        }

        let (mut files, mut size) = (record.files_to_send, record.file_size_to_send);
        let dup_check = self.mdb.descriptor(name.job_id).ok().and_then(|d| d.options.dup_check);
        if let Some(dup) = dup_check {
            let job_dir = self.work.job_dir(&record.msg_name);
            match self.dupcheck.check_job(name.job_id, &job_dir, &dup, now) {
                Ok(report) => {
                    for duplicate in report.duplicates.iter().filter(|d| d.action == DupAction::Deleted) {
                        self.logs.delete(&delete_record(
                            DeleteReason::DupOutput,
                            &entry.host_name,
                            Some(&name),
                            &duplicate.name,
                            duplicate.size,
                        ));
                    }
                    if dup.flags.contains(DcFlags::WARN) {
                        for duplicate in &report.duplicates {
                            let verb = match duplicate.action {
                                DupAction::Deleted => "deleted",
                                DupAction::Stored => "stored",
                                DupAction::Warned => "sent anyway",
                            };
                            self.logs.receive(
                                &LogLine::now(
                                    Severity::Warn,
                                    format!("duplicate file {} of job #{:x} {verb}", duplicate.name, name.job_id),
                                )
                                .host(&entry.host_name),
                            );
                        }
                    }
                    if !report.duplicates.is_empty() {
                        files = report.remaining_files;
                        size = report.remaining_size;
                    }
                    if report.remaining_files == 0 {
                        if report.duplicates.is_empty() {
                            tracing::warn!(target: "fd::ingress", msg_name = %record.msg_name, "job directory holds no files");
                        } else {
                            tracing::info!(
                                target: "fd::ingress",
                                msg_name = %record.msg_name,
                                duplicates = report.duplicates.len(),
                                "every file was a duplicate"
                            );
                        }
                        remove_job_dir(&job_dir);
                        return Ok(());
                    }
                }
                Err(error) => {
                    tracing::warn!(target: "fd::ingress", msg_name = %record.msg_name, %error, "duplicate check failed, sending anyway");
                }
            }
        }

        let item = QueueItem {
            msg_name: record.msg_name.clone(),
            msg_number: msg_number(record.creation_time, entry.ageing),
            creation_time: record.creation_time,
            file_size_to_send: size,
            files_to_send: files,
            pos: i32::try_from(index).unwrap_or(-1),
            special_flag: special,
            ..QueueItem::default()
        };
        self.insert_item(item, fsa_pos)
    }

    /// Inserts a send item and accounts it on host `fsa_pos`.
    pub(crate) fn insert_item(&mut self, item: QueueItem, fsa_pos: usize) -> Result<(), FdError> {
        let files = i64::from(item.files_to_send);
        let size = i64::try_from(item.file_size_to_send).unwrap_or(i64::MAX);
        match self.queue.insert(item)? {
            Inserted::New(_) => self.adjust_host_totals(fsa_pos, files, size, 1)?,
            Inserted::Merged { previous, .. } => self.adjust_host_totals(
                fsa_pos,
                files - i64::from(previous.files_to_send),
                size - i64::try_from(previous.file_size_to_send).unwrap_or(i64::MAX),
                0,
            )?,
            Inserted::Running(_) => {}
        }
        self.publish_counts()
    }

    fn handle_fetch_record(&mut self, record: &MsgRecord, now: i64) -> Result<(), FdError> {
        let dir_id = match parse_fetch_name(&record.msg_name) {
            Ok(dir_id) => dir_id,
            Err(error) => {
                tracing::warn!(target: "fd::ingress", msg_name = %record.msg_name, %error, "rejecting fetch request");
                return Ok(());
            }
        };
        let Some(dir_pos) = self.fra.as_ref().and_then(|fra| fra.position_by_id(dir_id)) else {
            tracing::warn!(target: "fd::ingress", dir_id = %format_args!("{dir_id:x}"), "fetch request for unknown directory");
            return Ok(());
        };
        self.queue_fetch(dir_pos, now).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::Fixture;

    fn record(msg_name: &str, creation_time: i64) -> MsgRecord {
        MsgRecord {
            creation_time,
            file_size_to_send: 4,
            files_to_send: 1,
            special_flag: 0,
            msg_name: msg_name.to_string(),
        }
    }

    #[test]
    fn malformed_names_are_dropped() {
        let mut fx = Fixture::new();
        fx.daemon.handle_message(&record("not a name", 10), 10).expect("ingress");
        assert!(fx.daemon.queue().is_empty());
    }

    #[test]
    fn known_job_is_queued_and_counted() {
        let mut fx = Fixture::new();
        let name = fx.job(0xf, "ftp://u@h1/x", &[("a", b"1234")], 100);
        fx.daemon.handle_message(&record(&name, 100), 100).expect("ingress");
        assert_eq!(fx.daemon.queue().len(), 1);
        let host = fx.daemon.fsa().get(0).expect("host");
        assert_eq!(host.total_file_counter, 1);
        assert_eq!(host.total_file_size, 4);
        assert_eq!(host.jobs_queued, 1);
        assert_eq!(fx.daemon.status().expect("status").jobs_in_queue, 1);
    }

    #[test]
    fn second_announcement_merges() {
        let mut fx = Fixture::new();
        let name = fx.job(0xf, "ftp://u@h1/x", &[("a", b"1234")], 100);
        fx.daemon.handle_message(&record(&name, 100), 100).expect("first");
        let mut again = record(&name, 100);
        again.files_to_send = 3;
        again.file_size_to_send = 30;
        fx.daemon.handle_message(&again, 101).expect("second");
        assert_eq!(fx.daemon.queue().len(), 1);
        let item = fx.daemon.queue().get(0).expect("item");
        assert_eq!(item.retries, 1);
        let host = fx.daemon.fsa().get(0).expect("host");
        assert_eq!(host.total_file_counter, 3);
        assert_eq!(host.total_file_size, 30);
        assert_eq!(host.jobs_queued, 1);
    }

    #[test]
    fn unknown_job_id_deletes_the_job_dir() {
        let mut fx = Fixture::new();
        let name = "0/77/0/64_0_0";
        fx.files(name, &[("a", b"x")]);
        fx.daemon.handle_message(&record(name, 100), 100).expect("ingress");
        assert!(fx.daemon.queue().is_empty());
        assert!(!fx.daemon.work().job_dir(name).exists());
    }

    #[test]
    fn job_for_unknown_host_is_deleted() {
        let mut fx = Fixture::new();
        let name = fx.job(0x5, "ftp://u@nowhere/x", &[("a", b"x")], 100);
        fx.daemon.handle_message(&record(&name, 100), 100).expect("ingress");
        assert!(fx.daemon.queue().is_empty());
        assert!(!fx.daemon.work().job_dir(&name).exists());
    }

    #[test]
    fn empty_job_dir_with_dupcheck_is_dropped() {
        let mut fx = Fixture::new();
        let name = fx.job_with_options(0x7, "ftp://u@h1/x", "dupcheck 1h delete", &[]);
        fx.daemon.handle_message(&record(&name, 100), 100).expect("ingress");
        assert!(fx.daemon.queue().is_empty());
        assert!(!fx.daemon.work().job_dir(&name).exists());
        assert_eq!(fx.daemon.fsa().get(0).expect("host").jobs_queued, 0);
    }

    #[test]
    fn age_limit_zero_never_ages_out() {
        let mut fx = Fixture::new();
        let name = fx.job(0x6, "ftp://u@h1/x", &[("a", b"x")], 0);
        fx.daemon.handle_message(&record(&name, 0), 1_000_000).expect("ingress");
        assert_eq!(fx.daemon.queue().len(), 1);
    }
}
