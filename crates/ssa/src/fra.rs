//! File-retrieve Status Area: one [`DirStatus`] row per source directory.

use bitflags::bitflags;

use crate::codec::{FieldReader, FieldWriter, fixed_str, to_fixed};
use crate::fsa::HOST_ALIAS_FIELD;
use crate::generation::{Generation, StatusArea};
use crate::names::{FRA_ID_FILE, FRA_STAT_FILE};
use crate::table::Record;

/// Stored width of a directory alias.
pub const MAX_DIR_ALIAS_FIELD: usize = 16;
/// Stored width of a directory URL.
pub const MAX_RECIPIENT_LENGTH: usize = 256;
/// Time schedule entries per directory.
pub const MAX_TIME_ENTRIES: usize = 4;

bitflags! {
    /// Bits of `DirStatus::dir_flag`.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct DirFlags: u32 {
        /// Retrieval from this directory is failing.
        const DIR_ERROR_SET = 1;
        /// Directory is disabled.
        const DIR_DISABLED = 1 << 1;
        /// Directory is stopped by the operator.
        const DIR_STOPPED = 1 << 2;
        /// Operator acknowledged the error.
        const DIR_ERROR_ACKN = 1 << 3;
        /// Directory is only checked on the time schedule.
        const ALL_DISABLED = 1 << 4;
    }
}

/// A cron-like schedule; every field is a bitmask of allowed values.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TimeEntry {
    /// Minutes 0..60.
    pub minute: u64,
    /// Hours 0..24.
    pub hour: u32,
    /// Days of month 1..=31, bit `d - 1`.
    pub day_of_month: u32,
    /// Months 1..=12, bit `m - 1`.
    pub month: u16,
    /// Days of week, Sunday = bit 0.
    pub day_of_week: u8,
}

impl TimeEntry {
    const SIZE: usize = 20;

    /// Entry matching every minute.
    #[must_use]
    pub const fn every_minute() -> Self {
        Self {
            minute: (1 << 60) - 1,
            hour: (1 << 24) - 1,
            day_of_month: (1 << 31) - 1,
            month: (1 << 12) - 1,
            day_of_week: (1 << 7) - 1,
        }
    }

    fn decode_from(r: &mut FieldReader<'_>) -> Self {
        let entry = Self {
            minute: r.u64(),
            hour: r.u32(),
            day_of_month: r.u32(),
            month: r.u16(),
            day_of_week: r.u8(),
        };
        r.skip(1);
        entry
    }

    fn encode_to(&self, w: &mut FieldWriter<'_>) {
        w.u64(self.minute);
        w.u32(self.hour);
        w.u32(self.day_of_month);
        w.u16(self.month);
        w.u8(self.day_of_week);
        w.zero(1);
    }
}

/// Status of one source directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirStatus {
    /// Short alias of the directory.
    pub dir_alias: String,
    /// Alias of the host the directory is fetched from.
    pub host_alias: String,
    /// Retrieve URL.
    pub url: String,
    /// Stable id; survives FRA rewrites.
    pub dir_id: u32,
    /// Index of the host in the FSA, `-1` for local directories.
    pub fsa_pos: i32,
    /// Protocol bitmask.
    pub protocol: u32,
    /// State bits.
    pub dir_flag: DirFlags,
    /// Fetch jobs queued for this directory.
    pub queued: i32,
    /// Consecutive errors.
    pub error_counter: i32,
    /// Errors before the directory is considered faulty.
    pub max_errors: i32,
    /// Seconds between remote listings when no time entry is set.
    pub remote_file_check_interval: i32,
    /// Earliest time of the next fetch.
    pub next_check_time: i64,
    /// Time of the last successful fetch.
    pub last_retrieval: i64,
    /// Files received since start.
    pub files_received: u32,
    /// Valid entries in `time_entries`.
    pub no_of_time_entries: u32,
    /// Fetch schedule.
    pub time_entries: [TimeEntry; MAX_TIME_ENTRIES],
}

impl DirStatus {
    /// Configured time entries.
    #[must_use]
    pub fn schedule(&self) -> &[TimeEntry] {
        let n = (self.no_of_time_entries as usize).min(MAX_TIME_ENTRIES);
        &self.time_entries[..n]
    }
}

impl Record for DirStatus {
    const SIZE: usize = 344 + MAX_TIME_ENTRIES * TimeEntry::SIZE;
    const VERSION: u8 = 2;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        let mut dir = Self {
            dir_alias: fixed_str(&r.bytes::<MAX_DIR_ALIAS_FIELD>()),
            host_alias: fixed_str(&r.bytes::<HOST_ALIAS_FIELD>()),
            url: fixed_str(&r.bytes::<MAX_RECIPIENT_LENGTH>()),
            dir_id: r.u32(),
            fsa_pos: r.i32(),
            protocol: r.u32(),
            dir_flag: DirFlags::from_bits_retain(r.u32()),
            queued: r.i32(),
            error_counter: r.i32(),
            max_errors: r.i32(),
            remote_file_check_interval: r.i32(),
            next_check_time: r.i64(),
            last_retrieval: r.i64(),
            files_received: r.u32(),
            no_of_time_entries: r.u32(),
            time_entries: [TimeEntry::default(); MAX_TIME_ENTRIES],
        };
        for entry in &mut dir.time_entries {
            *entry = TimeEntry::decode_from(&mut r);
        }
        dir
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.bytes(&to_fixed::<MAX_DIR_ALIAS_FIELD>(&self.dir_alias));
        w.bytes(&to_fixed::<HOST_ALIAS_FIELD>(&self.host_alias));
        w.bytes(&to_fixed::<MAX_RECIPIENT_LENGTH>(&self.url));
        w.u32(self.dir_id);
        w.i32(self.fsa_pos);
        w.u32(self.protocol);
        w.u32(self.dir_flag.bits());
        w.i32(self.queued);
        w.i32(self.error_counter);
        w.i32(self.max_errors);
        w.i32(self.remote_file_check_interval);
        w.i64(self.next_check_time);
        w.i64(self.last_retrieval);
        w.u32(self.files_received);
        w.u32(self.no_of_time_entries);
        for entry in &self.time_entries {
            entry.encode_to(&mut w);
        }
        debug_assert_eq!(w.position(), Self::SIZE);
    }
}

impl Generation for DirStatus {
    const PREFIX: &'static str = FRA_STAT_FILE;
    const ID_FILE: &'static str = FRA_ID_FILE;
}

/// The directory status area.
pub type Fra = StatusArea<DirStatus>;

impl StatusArea<DirStatus> {
    /// Index of the directory with `dir_id`.
    #[must_use]
    pub fn position_by_id(&self, dir_id: u32) -> Option<usize> {
        self.table().position(|dir| dir.dir_id == dir_id)
    }

    /// Index of the directory with `alias`.
    #[must_use]
    pub fn position_by_alias(&self, alias: &str) -> Option<usize> {
        self.table().position(|dir| dir.dir_alias == alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_inverts_encode() {
        let mut dir = DirStatus {
            dir_alias: "incoming".to_string(),
            host_alias: "remote".to_string(),
            url: "ftp://user@remote/in".to_string(),
            dir_id: 0xdead,
            fsa_pos: 2,
            dir_flag: DirFlags::DIR_ERROR_SET,
            remote_file_check_interval: 300,
            next_check_time: 1_700_000_000,
            no_of_time_entries: 1,
            ..DirStatus::default()
        };
        dir.time_entries[0] = TimeEntry::every_minute();
        let mut buf = vec![0_u8; DirStatus::SIZE];
        dir.encode(&mut buf);
        assert_eq!(DirStatus::decode(&buf), dir);
        assert_eq!(dir.schedule().len(), 1);
    }

    #[test]
    fn fra_lookup_by_id() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dirs = [
            DirStatus {
                dir_alias: "a".to_string(),
                dir_id: 10,
                ..DirStatus::default()
            },
            DirStatus {
                dir_alias: "b".to_string(),
                dir_id: 11,
                ..DirStatus::default()
            },
        ];
        let fra = Fra::create(tmp.path(), 0, &dirs).expect("create");
        assert_eq!(fra.position_by_id(11), Some(1));
        assert_eq!(fra.position_by_alias("a"), Some(0));
    }
}
