//! Error type shared by the mapped-area operations.

use std::io;
use std::path::PathBuf;

use platform::LockError;

/// Errors raised while attaching, growing or converting a mapped area.
#[derive(Debug, thiserror::Error)]
pub enum SsaError {
    /// Opening, sizing or mapping the backing file failed.
    #[error("{action} {path}: {source}")]
    Io {
        /// What was attempted.
        action: &'static str,
        /// File being operated on.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The file is shorter than its header or its advertised record count.
    #[error("{path} is truncated: {len} bytes, need at least {needed}")]
    Truncated {
        /// File being attached.
        path: PathBuf,
        /// Actual file length.
        len: u64,
        /// Minimum length implied by the header.
        needed: u64,
    },
    /// The on-disk version is neither current nor convertible.
    #[error("{path} has unknown version {found} (current is {current})")]
    UnknownVersion {
        /// File being attached.
        path: PathBuf,
        /// Version byte found in the header.
        found: u8,
        /// Version this build understands.
        current: u8,
    },
    /// The on-disk version differs from the current one.
    ///
    /// Callers that can convert catch this and run the matching converter.
    #[error("{path} has version {found}, expected {current}")]
    VersionMismatch {
        /// File being attached.
        path: PathBuf,
        /// Version byte found in the header.
        found: u8,
        /// Version this build understands.
        current: u8,
    },
    /// The area was marked stale by its producer and must be remapped.
    #[error("{path} is stale")]
    Stale {
        /// File being attached.
        path: PathBuf,
    },
    /// A record index is outside the area.
    #[error("record {index} out of range (count {count})")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Number of records present.
        count: usize,
    },
    /// The id file naming the current generation is unreadable.
    #[error("invalid id file {path}: {reason}")]
    InvalidId {
        /// Id file.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },
    /// Region locking failed for a reason other than contention.
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl SsaError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for the lock failures that must abort the daemon.
    #[must_use]
    pub const fn is_lock_failure(&self) -> bool {
        matches!(self, Self::Lock(_))
    }
}

/// Convenience alias for SSA results.
pub type Result<T> = std::result::Result<T, SsaError>;
