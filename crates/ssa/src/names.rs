//! File names of the mapped areas inside `fifodir/` and the generation id
//! files that point at the current FSA and FRA.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SsaError};

/// Prefix of the host status area; the full name is `fsa_status.<id>`.
pub const FSA_STAT_FILE: &str = "fsa_status";
/// File holding the id of the current FSA generation.
pub const FSA_ID_FILE: &str = "fsa.id";
/// Prefix of the directory status area; the full name is `fra_status.<id>`.
pub const FRA_STAT_FILE: &str = "fra_status";
/// File holding the id of the current FRA generation.
pub const FRA_ID_FILE: &str = "fra.id";
/// Message cache.
pub const MSG_CACHE_FILE: &str = "fd_msg_cache";
/// Message queue.
pub const MSG_QUEUE_FILE: &str = "fd_msg_queue";
/// Burst acknowledgment queue.
pub const ACK_QUEUE_FILE: &str = "ack_queue";
/// Global daemon status.
pub const STATUS_SHMID_FILE: &str = "afd.status";
/// Job id table written by AMG.
pub const JOB_ID_DATA_FILE: &str = "job_id_data";
/// Source directory name table.
pub const DIR_NAME_FILE: &str = "directory_names";
/// Directory configuration id table.
pub const DC_LIST_FILE: &str = "dc_list";
/// Password table.
pub const PWB_DATA_FILE: &str = "pwb_data";
/// File mask table.
pub const FILE_MASK_FILE: &str = "file_mask";
/// Miscellaneous system data.
pub const SYSTEM_DATA: &str = "system_data";

/// Growth step of the message cache, in records.
pub const MSG_CACHE_BUF_SIZE: usize = 64;
/// Growth step of the message queue, in records.
pub const MSG_QUE_BUF_SIZE: usize = 128;
/// Growth step of the acknowledgment queue, in records.
pub const ACK_QUE_BUF_SIZE: usize = 16;
/// Growth step of the interned lookup tables, in records.
pub const STORE_BUF_SIZE: usize = 32;

/// Path of a generation-numbered status file, e.g. `fsa_status.3`.
#[must_use]
pub fn generation_path(fifodir: &Path, prefix: &str, id: i32) -> PathBuf {
    fifodir.join(format!("{prefix}.{id}"))
}

/// Reads a decimal generation id.
pub fn read_id(path: &Path) -> Result<i32> {
    let text = fs::read_to_string(path).map_err(|source| SsaError::io("reading", path, source))?;
    text.trim().parse().map_err(|_| SsaError::InvalidId {
        path: path.to_path_buf(),
        reason: format!("not a number: {:?}", text.trim()),
    })
}

/// Atomically replaces the generation id stored at `path`.
pub fn write_id(path: &Path, id: i32) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, format!("{id}\n")).map_err(|source| SsaError::io("writing", &tmp, source))?;
    fs::rename(&tmp, path).map_err(|source| SsaError::io("renaming", path, source))
}
