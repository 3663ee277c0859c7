//! Duplicate detection for outgoing jobs.
//!
//! Each job with a `dupcheck` option owns a checksum file in `files/crc/`
//! holding fixed 16-byte records (`crc`, reserved, `expires`). A record with
//! `expires == 0` never expires. The file is locked exclusively while it is
//! read and rewritten so that concurrent checks of the same job serialize.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use protocol::{DcFlags, DupCheck};

const RECORD_SIZE: usize = 16;

/// A remembered checksum.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct CrcRecord {
    crc: u32,
    expires: i64,
}

impl CrcRecord {
    fn decode(bytes: &[u8]) -> Self {
        let mut crc = [0_u8; 4];
        crc.copy_from_slice(&bytes[0..4]);
        let mut expires = [0_u8; 8];
        expires.copy_from_slice(&bytes[8..16]);
        Self {
            crc: u32::from_ne_bytes(crc),
            expires: i64::from_ne_bytes(expires),
        }
    }

    fn encode(self) -> [u8; RECORD_SIZE] {
        let mut out = [0_u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.crc.to_ne_bytes());
        out[8..16].copy_from_slice(&self.expires.to_ne_bytes());
        out
    }

    const fn expired(self, now: i64) -> bool {
        self.expires != 0 && self.expires <= now
    }
}

/// What happened to a duplicate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DupAction {
    /// Unlinked.
    Deleted,
    /// Moved to the store directory.
    Stored,
    /// Only warned about; the file is still sent.
    Warned,
}

/// A file recognised as a duplicate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Duplicate {
    /// File name.
    pub name: String,
    /// Its size.
    pub size: u64,
    /// What was done with it.
    pub action: DupAction,
}

/// Result of checking one job directory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DupReport {
    /// Duplicates found.
    pub duplicates: Vec<Duplicate>,
    /// Files left in the job directory.
    pub remaining_files: u32,
    /// Bytes left in the job directory.
    pub remaining_size: u64,
}

/// Checks job directories against their checksum files.
#[derive(Clone, Debug)]
pub struct DupChecker {
    crc_dir: PathBuf,
    store_dir: PathBuf,
}

impl DupChecker {
    /// Checker using `crc_dir` for checksum files and `store_dir` for stored
    /// duplicates.
    pub fn new(crc_dir: impl Into<PathBuf>, store_dir: impl Into<PathBuf>) -> Self {
        Self {
            crc_dir: crc_dir.into(),
            store_dir: store_dir.into(),
        }
    }

    /// Checksum file of `job_id`.
    #[must_use]
    pub fn crc_file(&self, job_id: u32) -> PathBuf {
        self.crc_dir.join(format!("{job_id:x}"))
    }

    /// Store directory of `job_id`.
    #[must_use]
    pub fn store_dir(&self, job_id: u32) -> PathBuf {
        self.store_dir.join(format!("{job_id:x}"))
    }

    /// Checks every file of `job_dir` and applies the policy of `dup`.
    pub fn check_job(&self, job_id: u32, job_dir: &Path, dup: &DupCheck, now: i64) -> io::Result<DupReport> {
        let mut files = Vec::new();
        for entry in fs::read_dir(job_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let size = entry.metadata()?.len();
                files.push((entry.file_name().to_string_lossy().into_owned(), size));
            }
        }
        files.sort();

        fs::create_dir_all(&self.crc_dir)?;
        let mut crc_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.crc_file(job_id))?;
        crc_file.lock_exclusive()?;
        let result = self.check_locked(&mut crc_file, job_id, job_dir, &files, dup, now);
        let unlocked = FileExt::unlock(&crc_file);
        let report = result?;
        unlocked?;
        Ok(report)
    }

    fn check_locked(
        &self,
        crc_file: &mut File,
        job_id: u32,
        job_dir: &Path,
        files: &[(String, u64)],
        dup: &DupCheck,
        now: i64,
    ) -> io::Result<DupReport> {
        let mut bytes = Vec::new();
        crc_file.read_to_end(&mut bytes)?;
        let mut records: Vec<CrcRecord> = bytes
            .chunks_exact(RECORD_SIZE)
            .map(CrcRecord::decode)
            .filter(|r| !r.expired(now))
            .collect();

        let expires = if dup.timeout == 0 {
            0
        } else {
            now.saturating_add(i64::try_from(dup.timeout).unwrap_or(i64::MAX))
        };
        let mut report = DupReport::default();
        for (name, size) in files {
            let crc = if dup.flags.contains(DcFlags::NAME) {
                checksums::name_crc(name)
            } else {
                checksums::name_size_crc(name, *size)
            };
            if !records.iter().any(|r| r.crc == crc) {
                records.push(CrcRecord { crc, expires });
                report.remaining_files += 1;
                report.remaining_size += size;
                continue;
            }

            let source = job_dir.join(name);
            let action = if dup.flags.contains(DcFlags::DELETE) {
                fs::remove_file(&source)?;
                DupAction::Deleted
            } else if dup.flags.contains(DcFlags::STORE) {
                let store = self.store_dir(job_id);
                fs::create_dir_all(&store)?;
                fs::rename(&source, store.join(name))?;
                DupAction::Stored
            } else {
                report.remaining_files += 1;
                report.remaining_size += size;
                DupAction::Warned
            };
            if dup.flags.contains(DcFlags::WARN) {
                tracing::warn!(
                    target: "fd::dupcheck",
                    file = %name,
                    job_id = %format_args!("{job_id:x}"),
                    ?action,
                    "duplicate file"
                );
            }
            report.duplicates.push(Duplicate {
                name: name.clone(),
                size: *size,
                action,
            });
        }

        let mut out = Vec::with_capacity(records.len() * RECORD_SIZE);
        for record in &records {
            out.extend_from_slice(&record.encode());
        }
        crc_file.set_len(0)?;
        crc_file.seek(SeekFrom::Start(0))?;
        crc_file.write_all(&out)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(files: &[(&str, &[u8])]) -> (tempfile::TempDir, DupChecker, PathBuf) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let checker = DupChecker::new(tmp.path().join("crc"), tmp.path().join("store"));
        let job = tmp.path().join("job");
        fs::create_dir_all(&job).expect("job");
        for (name, data) in files {
            fs::write(job.join(name), data).expect("file");
        }
        (tmp, checker, job)
    }

    fn refill(job: &Path, name: &str, data: &[u8]) {
        fs::create_dir_all(job).expect("job");
        fs::write(job.join(name), data).expect("file");
    }

    #[test]
    fn second_upload_is_stored_and_warned() {
        let (_tmp, checker, job) = setup(&[("a.txt", b"1234")]);
        let dup = DupCheck {
            timeout: 0,
            flags: DcFlags::STORE | DcFlags::WARN | DcFlags::NAME_SIZE,
        };
        let first = checker.check_job(3, &job, &dup, 100).expect("first");
        assert!(first.duplicates.is_empty());
        assert_eq!(first.remaining_files, 1);

        let second = checker.check_job(3, &job, &dup, 200).expect("second");
        assert_eq!(second.duplicates.len(), 1);
        assert_eq!(second.duplicates[0].action, DupAction::Stored);
        assert_eq!(second.remaining_files, 0);
        assert!(checker.store_dir(3).join("a.txt").is_file());
        assert!(!job.join("a.txt").exists());
    }

    #[test]
    fn delete_policy_unlinks() {
        let (_tmp, checker, job) = setup(&[("a", b"x")]);
        let dup = DupCheck {
            timeout: 0,
            flags: DcFlags::DELETE | DcFlags::NAME,
        };
        checker.check_job(1, &job, &dup, 0).expect("first");
        let report = checker.check_job(1, &job, &dup, 1).expect("second");
        assert_eq!(report.duplicates[0].action, DupAction::Deleted);
        assert!(!job.join("a").exists());
    }

    #[test]
    fn warn_only_keeps_the_file() {
        let (_tmp, checker, job) = setup(&[("a", b"x")]);
        let dup = DupCheck {
            timeout: 0,
            flags: DcFlags::WARN | DcFlags::NAME,
        };
        checker.check_job(1, &job, &dup, 0).expect("first");
        let report = checker.check_job(1, &job, &dup, 1).expect("second");
        assert_eq!(report.duplicates[0].action, DupAction::Warned);
        assert_eq!(report.remaining_files, 1);
        assert!(job.join("a").exists());
    }

    #[test]
    fn expired_checksums_are_forgotten() {
        let (_tmp, checker, job) = setup(&[("a", b"x")]);
        let dup = DupCheck {
            timeout: 60,
            flags: DcFlags::DELETE | DcFlags::NAME,
        };
        checker.check_job(1, &job, &dup, 0).expect("first");
        let report = checker.check_job(1, &job, &dup, 61).expect("after expiry");
        assert!(report.duplicates.is_empty());
        assert_eq!(fs::metadata(checker.crc_file(1)).expect("crc").len(), 16);
    }

    #[test]
    fn size_changes_are_not_duplicates_with_name_size() {
        let (_tmp, checker, job) = setup(&[("a", b"x")]);
        let dup = DupCheck {
            timeout: 0,
            flags: DcFlags::DELETE | DcFlags::NAME_SIZE,
        };
        checker.check_job(1, &job, &dup, 0).expect("first");
        refill(&job, "a", b"longer");
        let report = checker.check_job(1, &job, &dup, 1).expect("second");
        assert!(report.duplicates.is_empty());
    }
}
