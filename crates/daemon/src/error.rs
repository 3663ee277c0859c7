//! Error type of the distributor and the exit status it maps to.

use std::io;
use std::path::{Path, PathBuf};

use platform::LockError;
use ssa::SsaError;

/// Exit status of the `fd` process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(i32)]
pub enum FdExitCode {
    /// Orderly shutdown.
    Ok = 0,
    /// Bad command line.
    Syntax = 1,
    /// A shared area could not be attached, mapped or grown.
    Structural = 2,
    /// A region lock failed for a reason other than contention.
    LockRegion = 3,
    /// An input fifo could not be created or opened.
    Fifo = 4,
    /// `AFD_CONFIG` is invalid.
    Config = 5,
    /// Anything else that stopped the daemon.
    Incorrect = 6,
}

impl FdExitCode {
    /// Numeric process status.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns `true` for failures of the shared state itself.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(self, Self::Structural | Self::LockRegion | Self::Fifo)
    }
}

/// Errors that stop the distributor or one of its operations.
#[derive(Debug, thiserror::Error)]
pub enum FdError {
    /// Attaching or updating a shared area failed.
    #[error(transparent)]
    Area(#[from] SsaError),
    /// Region locking failed.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// An input fifo is unusable.
    #[error("fifo {path}: {source}")]
    Fifo {
        /// Fifo path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A filesystem operation failed.
    #[error("failed to {action} {path}: {source}")]
    Io {
        /// What was attempted.
        action: &'static str,
        /// Path operated on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// `AFD_CONFIG` contains an invalid directive.
    #[error("{}: {message}", location(.path, .line))]
    Config {
        /// Configuration file, if the value came from one.
        path: Option<PathBuf>,
        /// One-based line number.
        line: Option<usize>,
        /// What is wrong.
        message: String,
    },
    /// Another distributor holds the instance lock.
    #[error("another fd is already running (pid {pid})")]
    AlreadyRunning {
        /// Pid recorded by the running instance.
        pid: i32,
    },
    /// No work directory was given on the command line or in the environment.
    #[error("no work directory: use -w or set AFD_WORK_DIR")]
    MissingWorkDir,
    /// Command-line parsing failed.
    #[error("{0}")]
    Usage(String),
    /// Signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),
}

fn location(path: &Option<PathBuf>, line: &Option<usize>) -> String {
    match (path, line) {
        (Some(path), Some(line)) => format!("{}:{line}", path.display()),
        (Some(path), None) => path.display().to_string(),
        (None, _) => "configuration".to_string(),
    }
}

impl FdError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn fifo(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Fifo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(path: Option<&Path>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.map(Path::to_path_buf),
            line,
            message: message.into(),
        }
    }

    /// Exit status the daemon terminates with when this error stops it.
    #[must_use]
    pub const fn exit_code(&self) -> FdExitCode {
        match self {
            Self::Area(SsaError::Lock(_)) | Self::Lock(_) => FdExitCode::LockRegion,
            Self::Area(_) | Self::Signals(_) => FdExitCode::Structural,
            Self::Fifo { .. } => FdExitCode::Fifo,
            Self::Config { .. } => FdExitCode::Config,
            Self::MissingWorkDir | Self::Usage(_) => FdExitCode::Syntax,
            Self::Io { .. } | Self::AlreadyRunning { .. } => FdExitCode::Incorrect,
        }
    }
}
