//! Archiving of sent files.
//!
//! ```text
//! archive/<fs-id>/<host>/<user|none>/<linkdir>/<bucket>_<job-id>/<unique>_<file>
//! ```
//!
//! `bucket` quantizes the expiry time to `ARCHIVE_STEP_TIME` so that jobs
//! archived close together share one directory. A link directory holds at
//! most `_PC_LINK_MAX - 2` bucket directories; the next one is opened when
//! it fills up.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Link directories tried before the archive counts as full.
pub const MAX_LINK_DIRS: u32 = 1024;

const FALLBACK_LINK_MAX: u64 = 32_000;

/// Errors while archiving.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Every link directory below `base` is full.
    #[error("archive {} is full", base.display())]
    Full {
        /// The `<fs-id>/<host>/<user>` directory.
        base: PathBuf,
    },
    /// The archive filesystem has no space left.
    #[error("no space left to archive into {}", path.display())]
    DiskFull {
        /// Path being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Any other filesystem failure.
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        /// What was attempted.
        action: &'static str,
        /// Path operated on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::StorageFull {
            Self::DiskFull {
                path: path.to_path_buf(),
                source,
            }
        } else {
            Self::Io {
                action,
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Identity of the job being archived.
#[derive(Clone, Copy, Debug)]
pub struct ArchiveKey<'a> {
    /// Filesystem id from the message name.
    pub fs_id: u32,
    /// Host alias.
    pub host_alias: &'a str,
    /// Remote user, if any.
    pub user: Option<&'a str>,
    /// Job id.
    pub job_id: u32,
    /// `<time>_<unique>_<split>` segment of the message name.
    pub unique: &'a str,
    /// Seconds the files stay archived.
    pub archive_time: u64,
}

/// A file that was not archived.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SkippedFile {
    /// File name inside the job directory.
    pub name: String,
    /// Its size.
    pub size: u64,
    /// It was left in the job directory instead of being unlinked.
    pub kept: bool,
}

/// Outcome of [`Archiver::archive_job`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ArchiveReport {
    /// Bucket directory the files went to.
    pub dir: PathBuf,
    /// Archived files with their sizes.
    pub archived: Vec<(String, u64)>,
    /// Files whose archive name was too long.
    pub skipped: Vec<SkippedFile>,
}

/// Moves sent files into the archive tree.
#[derive(Clone, Debug)]
pub struct Archiver {
    root: PathBuf,
    step: i64,
    link_max: Option<u64>,
    max_link_dirs: u32,
}

/// Expiry bucket of a job archived at `now` for `archive_time` seconds.
#[must_use]
pub fn bucket_time(now: i64, archive_time: u64, step: i64) -> i64 {
    let step = step.max(1);
    let expires = now.saturating_add(i64::try_from(archive_time).unwrap_or(i64::MAX));
    (expires / step) * step
}

impl Archiver {
    /// Archive rooted at `root` with buckets of `step` seconds.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, step: i64) -> Self {
        Self {
            root: root.into(),
            step,
            link_max: None,
            max_link_dirs: MAX_LINK_DIRS,
        }
    }

    /// Overrides the filesystem link limit and the number of link
    /// directories.
    #[must_use]
    pub const fn with_limits(mut self, link_max: u64, max_link_dirs: u32) -> Self {
        self.link_max = Some(link_max);
        self.max_link_dirs = max_link_dirs;
        self
    }

    fn link_max(&self) -> u64 {
        self.link_max.unwrap_or_else(|| {
            platform::fs::link_max(&self.root).unwrap_or(FALLBACK_LINK_MAX)
        })
    }

    fn base(&self, key: &ArchiveKey<'_>) -> PathBuf {
        self.root
            .join(format!("{:x}", key.fs_id))
            .join(key.host_alias)
            .join(key.user.unwrap_or("none"))
    }

    /// Bucket directory for `key` at `now`, created if needed.
    pub fn target_dir(&self, key: &ArchiveKey<'_>, now: i64) -> Result<PathBuf, ArchiveError> {
        let base = self.base(key);
        let bucket = format!("{:x}_{:x}", bucket_time(now, key.archive_time, self.step), key.job_id);
        let capacity = self.link_max().saturating_sub(2);
        for n in 0..self.max_link_dirs {
            let link_dir = base.join(format!("{n:x}"));
            let dir = link_dir.join(&bucket);
            if dir.is_dir() {
                return Ok(dir);
            }
            let used = match fs::read_dir(&link_dir) {
                Ok(entries) => entries.filter_map(Result::ok).count() as u64,
                Err(error) if error.kind() == io::ErrorKind::NotFound => 0,
                Err(error) => return Err(ArchiveError::io("read", &link_dir, error)),
            };
            if used < capacity {
                fs::create_dir_all(&dir).map_err(|e| ArchiveError::io("create", &dir, e))?;
                return Ok(dir);
            }
        }
        Err(ArchiveError::Full { base })
    }

    /// Moves every file of `job_dir` into the archive.
    ///
    /// A file whose archive name is too long is unlinked with a warning, or
    /// left in place when `keep_unarchivable` is set. The emptied job
    /// directory is removed.
    pub fn archive_job(
        &self,
        job_dir: &Path,
        key: &ArchiveKey<'_>,
        now: i64,
        keep_unarchivable: bool,
    ) -> Result<ArchiveReport, ArchiveError> {
        let dir = self.target_dir(key, now)?;
        let mut report = ArchiveReport {
            dir: dir.clone(),
            ..ArchiveReport::default()
        };
        let entries = fs::read_dir(job_dir).map_err(|e| ArchiveError::io("read", job_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ArchiveError::io("read", job_dir, e))?;
            let source = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let target = dir.join(format!("{}_{name}", key.unique));
            match move_file(&source, &target) {
                Ok(()) => report.archived.push((name, size)),
                Err(error) if error.kind() == io::ErrorKind::InvalidFilename => {
                    if !keep_unarchivable {
                        if let Err(e) = fs::remove_file(&source) {
                            tracing::warn!(target: "fd::archive", path = %source.display(), error = %e, "cannot remove unarchivable file");
                        }
                    }
                    tracing::warn!(
                        target: "fd::archive",
                        file = %name,
                        kept = keep_unarchivable,
                        "archive name too long, file not archived"
                    );
                    report.skipped.push(SkippedFile {
                        name,
                        size,
                        kept: keep_unarchivable,
                    });
                }
                Err(error) => return Err(ArchiveError::io("archive", &target, error)),
            }
        }
        if report.skipped.iter().all(|s| !s.kept) {
            remove_dir(job_dir);
        }
        Ok(report)
    }
}

fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Err(error) if error.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(source, target)?;
            fs::remove_file(source)
        }
        other => other,
    }
}

fn remove_dir(dir: &Path) {
    if let Err(error) = fs::remove_dir_all(dir) {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::warn!(target: "fd::archive", path = %dir.display(), %error, "cannot remove job directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(unique: &str) -> ArchiveKey<'_> {
        ArchiveKey {
            fs_id: 0,
            host_alias: "h",
            user: Some("u"),
            job_id: 0x3,
            unique,
            archive_time: 600,
        }
    }

    fn job_dir(root: &Path, files: &[&str]) -> PathBuf {
        let dir = root.join("outgoing").join("job");
        fs::create_dir_all(&dir).expect("job dir");
        for name in files {
            fs::write(dir.join(name), b"payload").expect("file");
        }
        dir
    }

    #[test]
    fn bucket_time_is_stable_within_a_step() {
        assert_eq!(bucket_time(1_000, 600, 120), 1_560);
        assert_eq!(bucket_time(1_079, 600, 120), 1_560);
        assert_eq!(bucket_time(1_080, 600, 120), 1_680);
    }

    #[test]
    fn same_bucket_yields_the_same_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let archiver = Archiver::new(tmp.path().join("archive"), 120);
        let a = archiver.target_dir(&key("1_0_0"), 1_000).expect("a");
        let b = archiver.target_dir(&key("2_0_0"), 1_050).expect("b");
        assert_eq!(a, b);
        assert_eq!(a, tmp.path().join("archive/0/h/u/0/618_3"));
    }

    #[test]
    fn full_link_directories_roll_over_until_the_archive_is_full() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let archiver = Archiver::new(tmp.path().join("archive"), 1).with_limits(3, 2);
        let first = archiver.target_dir(&key("a"), 10).expect("first");
        let second = archiver.target_dir(&key("a"), 20).expect("second");
        assert!(first.starts_with(tmp.path().join("archive/0/h/u/0")));
        assert!(second.starts_with(tmp.path().join("archive/0/h/u/1")));
        assert!(matches!(
            archiver.target_dir(&key("a"), 30),
            Err(ArchiveError::Full { .. })
        ));
    }

    #[test]
    fn archive_moves_files_and_removes_the_job_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = job_dir(tmp.path(), &["data.bin"]);
        let archiver = Archiver::new(tmp.path().join("archive"), 120);
        let report = archiver.archive_job(&dir, &key("5f3a_1_0"), 1_000, false).expect("archive");
        assert_eq!(report.archived, vec![("data.bin".to_string(), 7)]);
        assert!(report.dir.join("5f3a_1_0_data.bin").is_file());
        assert!(!dir.exists());
    }

    #[test]
    fn too_long_names_are_dropped_or_kept() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let long = "n".repeat(250);
        let dir = job_dir(tmp.path(), &[&long, "short"]);
        let archiver = Archiver::new(tmp.path().join("archive"), 120);
        let report = archiver.archive_job(&dir, &key("5f3a_1_0"), 1_000, true).expect("archive");
        assert_eq!(report.archived.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].kept);
        assert!(dir.join(&long).exists());

        let report = archiver.archive_job(&dir, &key("5f3a_1_0"), 1_000, false).expect("again");
        assert!(!report.skipped[0].kept);
        assert!(!dir.exists());
    }
}
