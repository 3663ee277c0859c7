//! Message cache: compiled destination descriptors keyed by job id.
//!
//! The cache is the mapped `fd_msg_cache` table. Entries are created the
//! first time ingress sees a job id and refreshed whenever the message file
//! changes on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use protocol::{JobDescriptor, MessageFileError};
use ssa::mdb::{NO, YES};
use ssa::names::MSG_CACHE_BUF_SIZE;
use ssa::{Fsa, MsgCacheEntry, SsaError, Table};

use crate::error::FdError;

/// How the message age and the last transfer combine when reaping.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StaleRule {
    /// Both the message file and the last transfer must be old.
    #[default]
    AllOf,
    /// Either being old is enough.
    AnyOf,
}

/// A cache entry chosen for removal by [`MessageCache::stale_entries`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StaleEntry {
    /// Index in the cache.
    pub index: usize,
    /// Job id of the entry.
    pub job_id: u32,
}

/// The mapped message cache together with the directory of message files.
#[derive(Debug)]
pub struct MessageCache {
    table: Table<MsgCacheEntry>,
    msg_dir: PathBuf,
    default_ageing: i32,
}

impl MessageCache {
    /// Attaches the cache at `path`, upgrading an older layout or creating
    /// an empty one.
    pub fn attach(path: &Path, msg_dir: impl Into<PathBuf>, default_ageing: i32) -> Result<Self, SsaError> {
        let table = if path.exists() {
            ssa::convert::attach_mdb(path, MSG_CACHE_BUF_SIZE, default_ageing)?
        } else {
            Table::create(path, MSG_CACHE_BUF_SIZE)?
        };
        Ok(Self {
            table,
            msg_dir: msg_dir.into(),
            default_ageing,
        })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` when the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Result<MsgCacheEntry, SsaError> {
        self.table.get(index)
    }

    /// All entries.
    pub fn iter(&self) -> impl Iterator<Item = MsgCacheEntry> + '_ {
        self.table.iter()
    }

    /// Index of the entry for `job_id`.
    #[must_use]
    pub fn position(&self, job_id: u32) -> Option<usize> {
        self.table.position(|entry| entry.job_id == job_id)
    }

    /// Index of `job_id`, trying `hint` first.
    ///
    /// Queue items remember the cache index of their job; removals shift
    /// indices, so the hint is checked before it is trusted.
    #[must_use]
    pub fn resolve(&self, hint: i32, job_id: u32) -> Option<usize> {
        usize::try_from(hint)
            .ok()
            .filter(|&i| self.table.get(i).is_ok_and(|e| e.job_id == job_id))
            .or_else(|| self.position(job_id))
    }

    /// Path of the message file of `job_id`.
    #[must_use]
    pub fn message_path(&self, job_id: u32) -> PathBuf {
        self.msg_dir.join(format!("{job_id:x}"))
    }

    /// Parses the message file of `job_id`.
    pub fn descriptor(&self, job_id: u32) -> Result<JobDescriptor, MessageFileError> {
        JobDescriptor::read(&self.message_path(job_id))
    }

    /// Finds or loads the entry for `job_id`.
    ///
    /// A known entry is reloaded when its message file changed. An unknown
    /// job is compiled from its message file; if that file is missing,
    /// `recreate` is asked once to write it again before giving up. Returns
    /// `None` when the job cannot be resolved.
    pub fn lookup(
        &mut self,
        job_id: u32,
        fsa: &Fsa,
        mut recreate: impl FnMut(u32) -> bool,
    ) -> Result<Option<usize>, FdError> {
        if let Some(index) = self.position(job_id) {
            self.refresh(index, fsa)?;
            return Ok(Some(index));
        }
        let entry = match self.load_from_message(job_id, fsa) {
            Ok(entry) => entry,
            Err(error) if error.is_not_found() && recreate(job_id) => {
                tracing::info!(target: "fd::mdb", job_id = %format_args!("{job_id:x}"), "recreated message file");
                match self.load_from_message(job_id, fsa) {
                    Ok(entry) => entry,
                    Err(error) => {
                        tracing::warn!(target: "fd::mdb", job_id = %format_args!("{job_id:x}"), %error, "message still unusable after recreation");
                        return Ok(None);
                    }
                }
            }
            Err(error) => {
                tracing::warn!(target: "fd::mdb", job_id = %format_args!("{job_id:x}"), %error, "cannot load message");
                return Ok(None);
            }
        };
        Ok(Some(self.append(&entry)?))
    }

    /// Compiles a cache entry from the message file of `job_id`.
    pub fn load_from_message(&self, job_id: u32, fsa: &Fsa) -> Result<MsgCacheEntry, MessageFileError> {
        let path = self.message_path(job_id);
        let descriptor = JobDescriptor::read(&path)?;
        let msg_time = modified(&path).unwrap_or_default();
        let url = &descriptor.destination;
        let fsa_pos = fsa.position_by_alias(&url.host);
        Ok(MsgCacheEntry {
            host_name: url.host.clone(),
            fsa_pos: fsa_pos.map_or(-1, |p| p as i32),
            port: url.effective_port().map_or(-1, i32::from),
            job_id,
            age_limit: u32::try_from(descriptor.age_limit).unwrap_or(u32::MAX),
            ageing: descriptor.ageing.map_or(self.default_ageing, i32::from),
            kind: url.protocol().code(),
            in_current_fsa: if fsa_pos.is_some() { YES } else { NO },
            msg_time,
            last_transfer_time: msg_time,
        })
    }

    fn refresh(&mut self, index: usize, fsa: &Fsa) -> Result<(), FdError> {
        let current = self.table.get(index)?;
        let Some(mtime) = modified(&self.message_path(current.job_id)) else {
            return Ok(());
        };
        if mtime == current.msg_time {
            return Ok(());
        }
        match self.load_from_message(current.job_id, fsa) {
            Ok(mut entry) => {
                entry.last_transfer_time = current.last_transfer_time;
                self.table.set(index, &entry)?;
                tracing::debug!(target: "fd::mdb", job_id = %format_args!("{:x}", current.job_id), "message changed, reloaded");
            }
            Err(error) => {
                tracing::warn!(target: "fd::mdb", job_id = %format_args!("{:x}", current.job_id), %error, "changed message cannot be parsed, keeping old entry");
            }
        }
        Ok(())
    }

    /// Appends `entry`, growing the file when needed.
    pub fn append(&mut self, entry: &MsgCacheEntry) -> Result<usize, SsaError> {
        self.table.push(entry)
    }

    /// Records a transfer of the job at `index`.
    pub fn touch_transfer(&mut self, index: usize, now: i64) -> Result<(), SsaError> {
        self.table.update(index, |e| e.last_transfer_time = now)
    }

    /// Re-resolves every entry against a new FSA.
    ///
    /// Entries whose host is gone get `fsa_pos = -1` and
    /// `in_current_fsa = NO`. Returns the job ids that lost their host.
    pub fn relink(&mut self, fsa: &Fsa) -> Result<Vec<u32>, SsaError> {
        let mut delisted = Vec::new();
        for index in 0..self.table.len() {
            let entry = self.table.get(index)?;
            let pos = fsa.position_by_alias(&entry.host_name);
            if pos.is_none() && entry.in_current_fsa == YES {
                delisted.push(entry.job_id);
            }
            self.table.update(index, |e| {
                e.fsa_pos = pos.map_or(-1, |p| p as i32);
                e.in_current_fsa = if pos.is_some() { YES } else { NO };
            })?;
        }
        Ok(delisted)
    }

    /// Entries that may be removed together with their message.
    ///
    /// Only entries whose host is no longer in the FSA qualify. The message
    /// age is the file's modification time, or the recorded `msg_time` when
    /// the file is already gone.
    #[must_use]
    pub fn stale_entries(&self, now: i64, max_age: i64, rule: StaleRule) -> Vec<StaleEntry> {
        let limit = now - max_age;
        self.table
            .iter()
            .enumerate()
            .filter(|(_, e)| e.in_current_fsa == NO)
            .filter(|(_, e)| {
                let msg_time = modified(&self.message_path(e.job_id)).unwrap_or(e.msg_time);
                let msg_old = msg_time < limit;
                let transfer_old = e.last_transfer_time < limit;
                match rule {
                    StaleRule::AllOf => msg_old && transfer_old,
                    StaleRule::AnyOf => msg_old || transfer_old,
                }
            })
            .map(|(index, e)| StaleEntry {
                index,
                job_id: e.job_id,
            })
            .collect()
    }

    /// Removes the entry for `job_id`.
    pub fn remove(&mut self, job_id: u32) -> Result<Option<MsgCacheEntry>, SsaError> {
        match self.position(job_id) {
            Some(index) => self.table.remove(index).map(Some),
            None => Ok(None),
        }
    }

    /// Removes every entry for which `keep` returns `false`.
    pub fn retain(&mut self, keep: impl FnMut(&MsgCacheEntry) -> bool) -> Result<Vec<MsgCacheEntry>, SsaError> {
        self.table.retain(keep)
    }

    /// Unlinks the message file of `job_id`; a missing file is not an error.
    pub fn unlink_message(&self, job_id: u32) {
        let path = self.message_path(job_id);
        if let Err(error) = fs::remove_file(&path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(target: "fd::mdb", path = %path.display(), %error, "failed to unlink message");
            }
        }
    }

    /// Flushes the mapping.
    pub fn flush(&self) -> Result<(), SsaError> {
        self.table.flush()
    }
}

/// Modification time of `path` in seconds since the epoch.
pub(crate) fn modified(path: &Path) -> Option<i64> {
    let mtime = fs::metadata(path).ok()?.modified().ok()?;
    let secs = mtime.duration_since(SystemTime::UNIX_EPOCH).ok()?.as_secs();
    i64::try_from(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use ssa::HostStatus;
    use ssa::mdb::DEFAULT_AGEING;

    struct Fixture {
        dir: tempfile::TempDir,
        fsa: Fsa,
        cache: MessageCache,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let fifodir = dir.path().join("fifodir");
        let msg_dir = dir.path().join("msg");
        fs::create_dir_all(&fifodir).expect("fifodir");
        fs::create_dir_all(&msg_dir).expect("msg");
        let host = HostStatus {
            host_alias: "h".to_string(),
            host_id: 7,
            allowed_transfers: 2,
            ..HostStatus::default()
        };
        let fsa = Fsa::create(&fifodir, 1, &[host]).expect("fsa");
        let cache = MessageCache::attach(&fifodir.join("fd_msg_cache"), msg_dir, DEFAULT_AGEING)
            .expect("cache");
        Fixture { dir, fsa, cache }
    }

    fn write_message(f: &Fixture, job_id: u32, text: &str) -> PathBuf {
        let path = f.cache.message_path(job_id);
        fs::write(&path, text).expect("write message");
        path
    }

    #[test]
    fn lookup_compiles_the_message_file() {
        let mut f = fixture();
        write_message(&f, 3, "DESTINATION ftp://u@h/x\nAGE_LIMIT 60\n");
        let index = f.cache.lookup(3, &f.fsa, |_| false).expect("lookup").expect("found");
        let entry = f.cache.get(index).expect("entry");
        assert_eq!(entry.host_name, "h");
        assert_eq!(entry.fsa_pos, 0);
        assert_eq!(entry.port, 21);
        assert_eq!(entry.age_limit, 60);
        assert_eq!(entry.ageing, DEFAULT_AGEING);
        assert_eq!(entry.in_current_fsa, YES);
        assert_eq!(entry.kind, protocol::Protocol::Ftp.code());
        assert_eq!(f.cache.lookup(3, &f.fsa, |_| false).expect("again"), Some(index));
        assert_eq!(f.cache.len(), 1);
    }

    #[test]
    fn unknown_host_resolves_to_minus_one() {
        let mut f = fixture();
        write_message(&f, 4, "DESTINATION sftp://elsewhere/in\nAGEING 9\n");
        let index = f.cache.lookup(4, &f.fsa, |_| false).expect("lookup").expect("found");
        let entry = f.cache.get(index).expect("entry");
        assert_eq!(entry.fsa_pos, -1);
        assert_eq!(entry.in_current_fsa, NO);
        assert_eq!(entry.ageing, 9);
    }

    #[test]
    fn missing_message_is_recreated_once() {
        let mut f = fixture();
        let path = f.cache.message_path(5);
        let mut calls = 0;
        let found = f
            .cache
            .lookup(5, &f.fsa, |_| {
                calls += 1;
                fs::write(&path, "DESTINATION loc:///tmp/out\n").is_ok()
            })
            .expect("lookup");
        assert!(found.is_some());
        assert_eq!(calls, 1);

        let mut calls = 0;
        let missing = f
            .cache
            .lookup(6, &f.fsa, |_| {
                calls += 1;
                false
            })
            .expect("lookup");
        assert_eq!(missing, None);
        assert_eq!(calls, 1);
    }

    #[test]
    fn empty_message_file_is_not_found_without_crashing() {
        let mut f = fixture();
        write_message(&f, 8, "");
        assert_eq!(f.cache.lookup(8, &f.fsa, |_| false).expect("lookup"), None);
        assert!(f.cache.is_empty());
    }

    #[test]
    fn changed_message_is_reloaded() {
        let mut f = fixture();
        let path = write_message(&f, 3, "DESTINATION ftp://u@h/x\n");
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_000, 0)).expect("mtime");
        let index = f.cache.lookup(3, &f.fsa, |_| false).expect("lookup").expect("found");
        f.cache.touch_transfer(index, 5_000).expect("touch");

        fs::write(&path, "DESTINATION ftp://u@h:2121/x\nAGEING 1\n").expect("rewrite");
        filetime::set_file_mtime(&path, FileTime::from_unix_time(2_000, 0)).expect("mtime");
        f.cache.lookup(3, &f.fsa, |_| false).expect("lookup");
        let entry = f.cache.get(index).expect("entry");
        assert_eq!(entry.port, 2121);
        assert_eq!(entry.ageing, 1);
        assert_eq!(entry.msg_time, 2_000);
        assert_eq!(entry.last_transfer_time, 5_000);
    }

    #[test]
    fn resolve_survives_index_shifts() {
        let mut f = fixture();
        write_message(&f, 1, "DESTINATION ftp://h/a\n");
        write_message(&f, 2, "DESTINATION ftp://h/b\n");
        f.cache.lookup(1, &f.fsa, |_| false).expect("1");
        let second = f.cache.lookup(2, &f.fsa, |_| false).expect("2").expect("found");
        f.cache.remove(1).expect("remove");
        assert_eq!(f.cache.resolve(second as i32, 2), Some(0));
        assert_eq!(f.cache.resolve(-1, 2), Some(0));
        assert_eq!(f.cache.resolve(0, 1), None);
    }

    #[test]
    fn relink_delists_vanished_hosts() {
        let mut f = fixture();
        write_message(&f, 3, "DESTINATION ftp://h/x\n");
        f.cache.lookup(3, &f.fsa, |_| false).expect("lookup");
        let other = HostStatus {
            host_alias: "other".to_string(),
            host_id: 9,
            ..HostStatus::default()
        };
        let next = f.fsa.replace(&[other]).expect("replace");
        assert_eq!(f.cache.relink(&next).expect("relink"), vec![3]);
        let entry = f.cache.get(0).expect("entry");
        assert_eq!(entry.fsa_pos, -1);
        assert_eq!(entry.in_current_fsa, NO);
        drop(f.dir);
    }

    #[test]
    fn stale_rules_differ_when_only_one_time_is_old() {
        let mut f = fixture();
        let path = write_message(&f, 3, "DESTINATION ftp://gone/x\n");
        filetime::set_file_mtime(&path, FileTime::from_unix_time(100, 0)).expect("mtime");
        let index = f.cache.lookup(3, &f.fsa, |_| false).expect("lookup").expect("found");
        f.cache.touch_transfer(index, 9_900).expect("touch");

        let now = 10_000;
        let max_age = 1_000;
        assert!(f.cache.stale_entries(now, max_age, StaleRule::AllOf).is_empty());
        assert_eq!(
            f.cache.stale_entries(now, max_age, StaleRule::AnyOf),
            vec![StaleEntry { index, job_id: 3 }]
        );

        f.cache.touch_transfer(index, 200).expect("touch");
        assert_eq!(f.cache.stale_entries(now, max_age, StaleRule::AllOf).len(), 1);
    }

    #[test]
    fn entries_with_a_current_host_are_never_stale() {
        let mut f = fixture();
        let path = write_message(&f, 3, "DESTINATION ftp://h/x\n");
        filetime::set_file_mtime(&path, FileTime::from_unix_time(100, 0)).expect("mtime");
        let index = f.cache.lookup(3, &f.fsa, |_| false).expect("lookup").expect("found");
        f.cache.touch_transfer(index, 100).expect("touch");
        assert!(f.cache.stale_entries(1_000_000, 10, StaleRule::AnyOf).is_empty());
    }
}
