//! Lookup tables shared with AMG: job ids, directory names, file masks,
//! passwords and DIR_CONFIG ids.
//!
//! FD only reads these, recreates lost message files from them and removes
//! entries nothing references any more. Every write holds the lock byte at
//! offset 0 of the file, which AMG honours as well.

use std::fs;
use std::path::Path;

use platform::RegionGuard;
use protocol::Url;
use rustc_hash::FxHashSet;
use ssa::names::{DC_LIST_FILE, DIR_NAME_FILE, FILE_MASK_FILE, JOB_ID_DATA_FILE, PWB_DATA_FILE, STORE_BUF_SIZE};
use ssa::{DirConfigEntry, DirNameEntry, FileMaskEntry, JobIdEntry, PasswdEntry, Record, SsaError, Table};

const LOCK_STORE: u64 = 0;

/// Counts of entries removed by one cleanup.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Removed {
    /// Directory names.
    pub dir_names: usize,
    /// File masks.
    pub file_masks: usize,
    /// Passwords.
    pub passwords: usize,
    /// DIR_CONFIG ids.
    pub dir_configs: usize,
}

impl Removed {
    /// Total number of removed entries.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.dir_names + self.file_masks + self.passwords + self.dir_configs
    }
}

/// The five shared lookup tables.
///
/// A table that cannot be attached is left out with a warning; FD works
/// without it and simply skips the operations that need it.
#[derive(Debug, Default)]
pub struct SharedStores {
    jobs: Option<Table<JobIdEntry>>,
    dir_names: Option<Table<DirNameEntry>>,
    file_masks: Option<Table<FileMaskEntry>>,
    passwords: Option<Table<PasswdEntry>>,
    dir_configs: Option<Table<DirConfigEntry>>,
}

fn passive<T: Record>(fifodir: &Path, name: &str) -> Option<Table<T>> {
    let path = fifodir.join(name);
    match Table::open_or_create(&path, STORE_BUF_SIZE) {
        Ok(table) => Some(table),
        Err(error) => {
            tracing::warn!(target: "fd::stores", path = %path.display(), %error, "cannot attach shared table");
            None
        }
    }
}

fn locked<T: Record>(table: &Table<T>) -> Result<RegionGuard, SsaError> {
    Ok(RegionGuard::acquire(table.area().file(), LOCK_STORE)?)
}

impl SharedStores {
    /// Attaches every table in `fifodir`.
    #[must_use]
    pub fn attach(fifodir: &Path) -> Self {
        Self {
            jobs: passive(fifodir, JOB_ID_DATA_FILE),
            dir_names: passive(fifodir, DIR_NAME_FILE),
            file_masks: passive(fifodir, FILE_MASK_FILE),
            passwords: passive(fifodir, PWB_DATA_FILE),
            dir_configs: passive(fifodir, DC_LIST_FILE),
        }
    }

    /// The job table entry for `job_id`.
    #[must_use]
    pub fn job(&self, job_id: u32) -> Option<JobIdEntry> {
        let jobs = self.jobs.as_ref()?;
        jobs.iter().find(|j| j.job_id == job_id)
    }

    /// Adds a job entry.
    pub fn add_job(&mut self, entry: &JobIdEntry) -> Result<(), SsaError> {
        if let Some(jobs) = self.jobs.as_mut() {
            let _guard = locked(jobs)?;
            jobs.push(entry)?;
        }
        Ok(())
    }

    /// Adds a directory name entry.
    pub fn add_dir_name(&mut self, entry: &DirNameEntry) -> Result<(), SsaError> {
        if let Some(table) = self.dir_names.as_mut() {
            let _guard = locked(table)?;
            table.push(entry)?;
        }
        Ok(())
    }

    /// Adds a file mask entry.
    pub fn add_file_mask(&mut self, entry: &FileMaskEntry) -> Result<(), SsaError> {
        if let Some(table) = self.file_masks.as_mut() {
            let _guard = locked(table)?;
            table.push(entry)?;
        }
        Ok(())
    }

    /// Adds a password entry.
    pub fn add_password(&mut self, entry: &PasswdEntry) -> Result<(), SsaError> {
        if let Some(table) = self.passwords.as_mut() {
            let _guard = locked(table)?;
            table.push(entry)?;
        }
        Ok(())
    }

    /// Adds a DIR_CONFIG entry.
    pub fn add_dir_config(&mut self, entry: &DirConfigEntry) -> Result<(), SsaError> {
        if let Some(table) = self.dir_configs.as_mut() {
            let _guard = locked(table)?;
            table.push(entry)?;
        }
        Ok(())
    }

    /// Rewrites the message file of `job_id` from the job table.
    ///
    /// Returns `true` if a file was written.
    pub fn recreate_msg(&self, job_id: u32, msg_dir: &Path) -> bool {
        let Some(job) = self.job(job_id) else {
            return false;
        };
        let mut text = format!("DESTINATION {}\n", job.recipient);
        let options: Vec<&str> = job.options.lines().filter(|l| !l.trim().is_empty()).collect();
        if !options.is_empty() {
            text.push_str("[options]\n");
            for line in options {
                text.push_str(line);
                text.push('\n');
            }
        }
        let path = msg_dir.join(format!("{job_id:x}"));
        match fs::write(&path, text) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(target: "fd::stores", path = %path.display(), %error, "cannot recreate message");
                false
            }
        }
    }

    /// Removes the job entry for `job_id` and returns it.
    pub fn remove_job(&mut self, job_id: u32) -> Result<Option<JobIdEntry>, SsaError> {
        let Some(jobs) = self.jobs.as_mut() else {
            return Ok(None);
        };
        let _guard = locked(jobs)?;
        match jobs.position(|j| j.job_id == job_id) {
            Some(index) => jobs.remove(index).map(Some),
            None => Ok(None),
        }
    }

    /// Removes directory names, file masks, passwords and DIR_CONFIG ids
    /// that no remaining job references.
    pub fn remove_unreferenced(&mut self) -> Result<Removed, SsaError> {
        let Some(jobs) = self.jobs.as_ref() else {
            return Ok(Removed::default());
        };
        let mut dir_ids = FxHashSet::default();
        let mut mask_ids = FxHashSet::default();
        let mut dc_ids = FxHashSet::default();
        let mut user_hosts = FxHashSet::default();
        for job in jobs.iter() {
            dir_ids.insert(job.dir_id);
            mask_ids.insert(job.file_mask_id);
            dc_ids.insert(job.dir_config_id);
            if let Ok(url) = Url::parse(&job.recipient) {
                user_hosts.insert(url.user_host());
            }
        }

        let mut removed = Removed::default();
        if let Some(table) = self.dir_names.as_mut() {
            let _guard = locked(table)?;
            removed.dir_names = table.retain(|e| dir_ids.contains(&e.dir_id))?.len();
        }
        if let Some(table) = self.file_masks.as_mut() {
            let _guard = locked(table)?;
            removed.file_masks = table.retain(|e| mask_ids.contains(&e.file_mask_id))?.len();
        }
        if let Some(table) = self.passwords.as_mut() {
            let _guard = locked(table)?;
            removed.passwords = table.retain(|e| user_hosts.contains(&e.uh_name))?.len();
        }
        if let Some(table) = self.dir_configs.as_mut() {
            let _guard = locked(table)?;
            removed.dir_configs = table.retain(|e| dc_ids.contains(&e.dc_id))?.len();
        }
        if removed.total() > 0 {
            tracing::info!(
                target: "fd::stores",
                dir_names = removed.dir_names,
                file_masks = removed.file_masks,
                passwords = removed.passwords,
                dir_configs = removed.dir_configs,
                "removed unreferenced shared entries"
            );
        }
        Ok(removed)
    }

    /// Removes the job `job_id` and whatever only it referenced.
    pub fn remove_unused_for(&mut self, job_id: u32) -> Result<Removed, SsaError> {
        if self.remove_job(job_id)?.is_none() {
            return Ok(Removed::default());
        }
        self.remove_unreferenced()
    }

    /// Number of directory name entries.
    #[must_use]
    pub fn dir_name_count(&self) -> usize {
        self.dir_names.as_ref().map_or(0, Table::len)
    }

    /// Number of password entries.
    #[must_use]
    pub fn password_count(&self) -> usize {
        self.passwords.as_ref().map_or(0, Table::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(job_id: u32, dir_id: u32, recipient: &str) -> JobIdEntry {
        JobIdEntry {
            job_id,
            dir_id,
            file_mask_id: dir_id * 10,
            dir_config_id: 1,
            host_alias: "h".to_string(),
            recipient: recipient.to_string(),
            ..JobIdEntry::default()
        }
    }

    fn stores() -> (tempfile::TempDir, SharedStores) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut stores = SharedStores::attach(dir.path());
        stores.add_job(&job(1, 100, "ftp://alice@h/a")).expect("job 1");
        stores.add_job(&job(2, 200, "ftp://bob@h/b")).expect("job 2");
        for dir_id in [100, 200] {
            stores
                .add_dir_name(&DirNameEntry {
                    dir_id,
                    orig_dir_name: format!("/data/{dir_id}"),
                })
                .expect("dir");
            stores
                .add_file_mask(&FileMaskEntry {
                    file_mask_id: dir_id * 10,
                    nfm: 1,
                    masks: "*".to_string(),
                })
                .expect("mask");
        }
        for user in ["alice@h", "bob@h"] {
            stores
                .add_password(&PasswdEntry {
                    uh_name: user.to_string(),
                    passwd: [1; 64],
                })
                .expect("passwd");
        }
        (dir, stores)
    }

    #[test]
    fn removing_a_job_drops_only_what_it_alone_used() {
        let (_dir, mut stores) = stores();
        let removed = stores.remove_unused_for(1).expect("remove");
        assert_eq!(removed.dir_names, 1);
        assert_eq!(removed.file_masks, 1);
        assert_eq!(removed.passwords, 1);
        assert_eq!(removed.dir_configs, 0);
        assert_eq!(stores.dir_name_count(), 1);
        assert_eq!(stores.password_count(), 1);
        assert!(stores.job(2).is_some());
    }

    #[test]
    fn removing_an_unknown_job_changes_nothing() {
        let (_dir, mut stores) = stores();
        assert_eq!(stores.remove_unused_for(99).expect("remove"), Removed::default());
        assert_eq!(stores.dir_name_count(), 2);
    }

    #[test]
    fn recreated_message_parses() {
        let (dir, mut stores) = stores();
        let mut entry = job(3, 300, "sftp://carol@h/in");
        entry.options = "archive 600\n".to_string();
        stores.add_job(&entry).expect("job 3");
        assert!(stores.recreate_msg(3, dir.path()));
        let descriptor = protocol::JobDescriptor::read(&dir.path().join("3")).expect("parse");
        assert_eq!(descriptor.destination.host, "h");
        assert_eq!(descriptor.options.archive_time, Some(600));
        assert!(!stores.recreate_msg(42, dir.path()));
    }
}
