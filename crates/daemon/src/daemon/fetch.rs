//! Fetch jobs for remote source directories.
//!
//! A fetch item is named after the hex `dir_id` of its FRA row and carries
//! the row index in `pos`. At most one fetch per directory is queued.

use chrono::{DateTime, Datelike, Local, TimeDelta, TimeZone, Timelike};
use logging::{LogLine, Severity};
use protocol::Url;
use ssa::{DirFlags, DirStatus, QueueItem, SpecialFlags, TimeEntry};

use super::Daemon;
use crate::error::FdError;
use crate::queue::msg_number;
use crate::worker::Spawner;

/// Seconds between listings of a directory without a time schedule and
/// without its own interval.
pub const DEFAULT_REMOTE_FILE_CHECK_INTERVAL: i64 = 60;

fn day_matches<Tz: TimeZone>(entry: &TimeEntry, t: &DateTime<Tz>) -> bool {
    entry.month & (1 << (t.month() - 1)) != 0
        && entry.day_of_month & (1 << (t.day() - 1)) != 0
        && entry.day_of_week & (1 << t.weekday().num_days_from_sunday()) != 0
}

/// First whole minute after `after` matched by `entry`, looking at most a
/// year ahead.
pub fn next_match<Tz: TimeZone>(entry: &TimeEntry, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let mut t = after.with_second(0)?.with_nanosecond(0)? + TimeDelta::minutes(1);
    let limit = after.clone() + TimeDelta::days(366);
    while t <= limit {
        let minute_of_day = i64::from(t.hour() * 60 + t.minute());
        if !day_matches(entry, &t) {
            t += TimeDelta::minutes(1_440 - minute_of_day);
        } else if entry.hour & (1 << t.hour()) == 0 {
            t += TimeDelta::minutes(60 - i64::from(t.minute()));
        } else if entry.minute & (1 << t.minute()) != 0 {
            return Some(t);
        } else {
            t += TimeDelta::minutes(1);
        }
    }
    None
}

/// When directory `dir` should be listed next after `now`.
fn next_check_time(dir: &DirStatus, now: i64) -> i64 {
    let schedule = dir.schedule();
    if !schedule.is_empty() {
        if let Some(local) = Local.timestamp_opt(now, 0).single() {
            if let Some(next) = schedule.iter().filter_map(|e| next_match(e, &local)).min() {
                return next.timestamp();
            }
        }
    }
    let interval = i64::from(dir.remote_file_check_interval);
    now + if interval > 0 { interval } else { DEFAULT_REMOTE_FILE_CHECK_INTERVAL }
}

impl<S: Spawner> Daemon<S> {
    /// Queues a fetch of FRA row `dir_pos` unless one is already queued.
    ///
    /// Returns `true` if an item was added.
    pub(crate) fn queue_fetch(&mut self, dir_pos: usize, now: i64) -> Result<bool, FdError> {
        let Some(fra) = self.fra.as_ref() else {
            return Ok(false);
        };
        let dir = fra.get(dir_pos)?;
        let msg_name = format!("{:x}", dir.dir_id);
        if self.queue.position(&msg_name).is_some() {
            return Ok(false);
        }
        self.queue.insert(QueueItem {
            msg_name,
            msg_number: msg_number(now, self.config.default_ageing()),
            creation_time: now,
            pos: i32::try_from(dir_pos).unwrap_or(-1),
            special_flag: SpecialFlags::FETCH_JOB,
            ..QueueItem::default()
        })?;
        let next = next_check_time(&dir, now);
        if let Some(fra) = self.fra.as_mut() {
            fra.table_mut().update(dir_pos, |d| {
                d.queued += 1;
                d.next_check_time = next;
            })?;
        }
        self.publish_counts()?;
        tracing::debug!(target: "fd::fetch", dir = %dir.dir_alias, next_check = next, "fetch queued");
        Ok(true)
    }

    /// Queues fetches for every due directory. Returns how many were added.
    pub(crate) fn schedule_fetches(&mut self, now: i64) -> Result<usize, FdError> {
        let due: Vec<usize> = match &self.fra {
            Some(fra) => fra
                .iter()
                .enumerate()
                .filter(|(_, dir)| self.fetch_due(dir, now))
                .map(|(pos, _)| pos)
                .collect(),
            None => return Ok(0),
        };
        let mut queued = 0;
        for pos in due {
            if self.queue_fetch(pos, now)? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    fn fetch_due(&self, dir: &DirStatus, now: i64) -> bool {
        if dir.dir_flag.intersects(DirFlags::DIR_DISABLED | DirFlags::DIR_STOPPED) || dir.next_check_time > now {
            return false;
        }
        if self.fsa.position_by_alias(&dir.host_alias).is_none() {
            return false;
        }
        Url::parse(&dir.url).is_ok_and(|url| url.protocol().fetch_program().is_some())
    }

    /// Makes every directory due on the next pass.
    pub(crate) fn force_remote_dir_check(&mut self) -> Result<(), FdError> {
        if let Some(fra) = self.fra.as_mut() {
            for pos in 0..fra.len() {
                fra.table_mut().update(pos, |d| d.next_check_time = 0)?;
            }
            tracing::info!(target: "fd::fetch", dirs = fra.len(), "forced remote directory check");
        }
        Ok(())
    }

    /// Takes a fetch item that left the queue off its directory.
    pub(crate) fn forget_fetch(&mut self, item: &QueueItem) -> Result<(), FdError> {
        let Some((pos, _)) = self.item_dir(item) else {
            return Ok(());
        };
        if let Some(fra) = self.fra.as_mut() {
            fra.table_mut().update(pos, |d| d.queued = (d.queued - 1).max(0))?;
        }
        Ok(())
    }

    /// Records the outcome of a fetch of FRA row `dir_pos`.
    pub(crate) fn record_fetch_result(&mut self, dir_pos: usize, success: bool, now: i64) -> Result<(), FdError> {
        let Some(fra) = self.fra.as_mut().filter(|fra| dir_pos < fra.len()) else {
            return Ok(());
        };
        let dir = fra.table_mut().update(dir_pos, |d| {
            if success {
                d.error_counter = 0;
                d.dir_flag.remove(DirFlags::DIR_ERROR_SET);
                d.last_retrieval = now;
            } else {
                d.error_counter += 1;
                if d.max_errors > 0 && d.error_counter >= d.max_errors {
                    d.dir_flag.insert(DirFlags::DIR_ERROR_SET);
                }
            }
            d.clone()
        })?;
        let line = if success {
            LogLine::now(Severity::Info, format!("{} retrieved", dir.dir_alias))
        } else {
            LogLine::now(Severity::Warn, format!("{} retrieve failed ({} errors)", dir.dir_alias, dir.error_counter))
        };
        self.logs.receive(&line.host(&dir.host_alias));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::tests::support::Fixture;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 30).single().expect("time")
    }

    #[test]
    fn every_minute_matches_the_next_minute() {
        let next = next_match(&TimeEntry::every_minute(), &at(2024, 3, 1, 10, 15)).expect("next");
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 10, 16, 0).single().expect("t"));
    }

    #[test]
    fn hourly_entry_skips_to_the_next_hour() {
        let entry = TimeEntry {
            minute: 1,
            ..TimeEntry::every_minute()
        };
        let next = next_match(&entry, &at(2024, 3, 1, 10, 15)).expect("next");
        assert_eq!((next.hour(), next.minute()), (11, 0));
    }

    #[test]
    fn weekday_entry_skips_days() {
        // Sundays only; 2024-03-01 is a Friday.
        let entry = TimeEntry {
            minute: 1,
            hour: 1,
            day_of_week: 1,
            ..TimeEntry::every_minute()
        };
        let next = next_match(&entry, &at(2024, 3, 1, 10, 15)).expect("next");
        assert_eq!((next.day(), next.hour(), next.minute()), (3, 0, 0));
    }

    #[test]
    fn empty_entry_never_matches() {
        assert!(next_match(&TimeEntry::default(), &at(2024, 3, 1, 10, 15)).is_none());
    }

    #[test]
    fn interval_applies_without_schedule() {
        let dir = DirStatus {
            remote_file_check_interval: 300,
            ..DirStatus::default()
        };
        assert_eq!(next_check_time(&dir, 1_000), 1_300);
        let dir = DirStatus::default();
        assert_eq!(next_check_time(&dir, 1_000), 1_000 + DEFAULT_REMOTE_FILE_CHECK_INTERVAL);
    }

    #[test]
    fn due_directory_gets_exactly_one_fetch() {
        let mut fx = Fixture::new();
        assert_eq!(fx.daemon.schedule_fetches(1_000).expect("first"), 1);
        assert_eq!(fx.daemon.schedule_fetches(1_000).expect("second"), 0);
        let item = fx.daemon.queue().get(0).expect("item");
        assert!(item.is_fetch());
        assert_eq!(item.msg_name, format!("{:x}", crate::tests::support::DIR_ID));
        let dir = fx.daemon.fra().expect("fra").get(0).expect("dir");
        assert_eq!(dir.queued, 1);
        assert!(dir.next_check_time > 1_000);
    }

    #[test]
    fn stopped_directory_is_not_fetched() {
        let mut fx = Fixture::new();
        fx.set_dir(0, |d| d.dir_flag.insert(DirFlags::DIR_STOPPED));
        assert_eq!(fx.daemon.schedule_fetches(1_000).expect("schedule"), 0);
    }

    #[test]
    fn repeated_failures_set_the_dir_error() {
        let mut fx = Fixture::new();
        fx.set_dir(0, |d| d.max_errors = 2);
        fx.daemon.record_fetch_result(0, false, 10).expect("one");
        let dir = fx.daemon.fra().expect("fra").get(0).expect("dir");
        assert!(!dir.dir_flag.contains(DirFlags::DIR_ERROR_SET));
        fx.daemon.record_fetch_result(0, false, 20).expect("two");
        let dir = fx.daemon.fra().expect("fra").get(0).expect("dir");
        assert!(dir.dir_flag.contains(DirFlags::DIR_ERROR_SET));
        fx.daemon.record_fetch_result(0, true, 30).expect("ok");
        let dir = fx.daemon.fra().expect("fra").get(0).expect("dir");
        assert_eq!(dir.error_counter, 0);
        assert_eq!(dir.last_retrieval, 30);
        assert!(!dir.dir_flag.contains(DirFlags::DIR_ERROR_SET));
    }
}
