//! Layout of the AFD work directory.
//!
//! ```text
//! <work_dir>/fifodir/          shared areas, fifos, id files
//! <work_dir>/msg/              one message file per job id
//! <work_dir>/files/outgoing/   one directory per queued job
//! <work_dir>/files/store/      duplicates kept by `dupcheck store`
//! <work_dir>/files/crc/        duplicate-check checksum files
//! <work_dir>/files/incoming/   remote listing caches of fetch directories
//! <work_dir>/archive/          archived jobs
//! <work_dir>/etc/AFD_CONFIG    distributor settings
//! <work_dir>/log/              rotated text logs
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::FdError;

/// Operator commands, one byte each.
pub const FD_CMD_FIFO: &str = "fd_cmd.fifo";
/// Worker completions.
pub const SF_FIN_FIFO: &str = "sf_fin.fifo";
/// New jobs from AMG.
pub const MSG_FIFO: &str = "msg.fifo";
/// Wake-up nudges; content is ignored.
pub const FD_WAKE_UP_FIFO: &str = "fd_wake_up.fifo";
/// Hosts to retry immediately.
pub const RETRY_FD_FIFO: &str = "retry_fd.fifo";
/// Operator delete requests.
pub const FD_DELETE_FIFO: &str = "fd_delete.fifo";
/// Burst hand-over acknowledgments from workers.
pub const SF_BURST_ACK_FIFO: &str = "sf_burst_ack.fifo";
/// Requests to recompute a host's rate share.
pub const TRL_CALC_FIFO: &str = "trl_calc.fifo";

/// Transfer log.
pub const TRANSFER_LOG_FIFO: &str = "transfer_log.fifo";
/// Transfer debug log.
pub const TRANS_DEBUG_LOG_FIFO: &str = "trans_db_log.fifo";
/// Output log records.
pub const OUTPUT_LOG_FIFO: &str = "output_log.fifo";
/// Receive log.
pub const RECEIVE_LOG_FIFO: &str = "receive_log.fifo";
/// Delete log records.
pub const DELETE_LOG_FIFO: &str = "delete_log.fifo";
/// System log.
pub const SYSTEM_LOG_FIFO: &str = "system_log.fifo";

/// Instance lock file of the running distributor.
pub const FD_ACTIVE_FILE: &str = "FD_ACTIVE";

/// Paths below one AFD work directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Wraps a work directory path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The work directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of shared areas and fifos.
    #[must_use]
    pub fn fifodir(&self) -> PathBuf {
        self.root.join("fifodir")
    }

    /// A file inside the fifo directory.
    #[must_use]
    pub fn fifo(&self, name: &str) -> PathBuf {
        self.fifodir().join(name)
    }

    /// Directory of message files.
    #[must_use]
    pub fn msg_dir(&self) -> PathBuf {
        self.root.join("msg")
    }

    /// Message file of `job_id`.
    #[must_use]
    pub fn message_file(&self, job_id: u32) -> PathBuf {
        self.msg_dir().join(format!("{job_id:x}"))
    }

    /// Root of the queued job directories.
    #[must_use]
    pub fn outgoing(&self) -> PathBuf {
        self.root.join("files").join("outgoing")
    }

    /// Directory holding the files of one queued job.
    #[must_use]
    pub fn job_dir(&self, msg_name: &str) -> PathBuf {
        self.outgoing().join(msg_name)
    }

    /// Root of the duplicate store.
    #[must_use]
    pub fn store(&self) -> PathBuf {
        self.root.join("files").join("store")
    }

    /// Duplicate-check checksum files.
    #[must_use]
    pub fn crc_dir(&self) -> PathBuf {
        self.root.join("files").join("crc")
    }

    /// Remote listing caches of fetch directories.
    #[must_use]
    pub fn ls_data(&self) -> PathBuf {
        self.root.join("files").join("incoming").join("ls_data")
    }

    /// Archive root.
    #[must_use]
    pub fn archive(&self) -> PathBuf {
        self.root.join("archive")
    }

    /// Distributor settings file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("etc").join("AFD_CONFIG")
    }

    /// Creates every directory of the layout that does not exist yet.
    pub fn create_layout(&self) -> Result<(), FdError> {
        for dir in [
            self.fifodir(),
            self.msg_dir(),
            self.outgoing(),
            self.store(),
            self.crc_dir(),
            self.archive(),
            self.ls_data(),
            self.root.join("etc"),
            self.root.join("log"),
        ] {
            fs::create_dir_all(&dir).map_err(|e| FdError::io("create", &dir, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_in_the_work_dir() {
        let work = WorkDir::new("/var/afd");
        assert_eq!(work.fifo(MSG_FIFO), Path::new("/var/afd/fifodir/msg.fifo"));
        assert_eq!(work.message_file(0x1f), Path::new("/var/afd/msg/1f"));
        assert_eq!(
            work.job_dir("1/2a/0/5f5e1000_1_0"),
            Path::new("/var/afd/files/outgoing/1/2a/0/5f5e1000_1_0")
        );
    }

    #[test]
    fn create_layout_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let work = WorkDir::new(dir.path());
        work.create_layout().expect("first");
        work.create_layout().expect("second");
        assert!(work.outgoing().is_dir());
        assert!(work.crc_dir().is_dir());
        assert!(work.fifodir().is_dir());
    }
}
