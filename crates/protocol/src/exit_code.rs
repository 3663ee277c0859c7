//! Worker exit codes and their classification.

use std::fmt;

/// How the distributor reacts to a worker exit.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExitClass {
    /// Job done: archive or delete the sent files.
    Success,
    /// Job done, worker keeps its connection for another job.
    SuccessWithPending,
    /// Retry later; counts against the host error counter.
    Transient,
    /// Retry is pointless until an operator acts; escalates to the error
    /// queue after `max_errors`.
    Persistent,
    /// Local resource problem; retry without blaming the host.
    LocalIo,
    /// The job description is broken; drop the job and its message file.
    Configuration,
    /// The job cannot ever succeed; drop it.
    Fatal,
}

impl ExitClass {
    /// Returns `true` for classes that keep the job queued.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Persistent | Self::LocalIo)
    }

    /// Returns `true` for classes that increment the host error counter.
    #[must_use]
    pub const fn counts_as_host_error(self) -> bool {
        matches!(self, Self::Transient | Self::Persistent)
    }
}

macro_rules! worker_exits {
    ($( $(#[$doc:meta])* $name:ident = $code:literal => $class:ident, )*) => {
        /// Exit status of a transfer worker.
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
        pub enum WorkerExit {
            $( $(#[$doc])* $name, )*
            /// A code this build does not know.
            Unknown(i32),
        }

        impl WorkerExit {
            /// Decodes an exit status.
            #[must_use]
            pub const fn from_code(code: i32) -> Self {
                match code {
                    $( $code => Self::$name, )*
                    other => Self::Unknown(other),
                }
            }

            /// The numeric exit status.
            #[must_use]
            pub const fn code(self) -> i32 {
                match self {
                    $( Self::$name => $code, )*
                    Self::Unknown(code) => code,
                }
            }

            /// Reaction class; unknown codes are treated as transient.
            #[must_use]
            pub const fn class(self) -> ExitClass {
                match self {
                    $( Self::$name => ExitClass::$class, )*
                    Self::Unknown(_) => ExitClass::Transient,
                }
            }

            /// Symbolic name for logs.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name), )*
                    Self::Unknown(_) => "Unknown",
                }
            }
        }
    };
}

worker_exits! {
    /// All files sent.
    Success = 0 => Success,
    /// Could not connect.
    ConnectError = 1 => Transient,
    /// Remote user rejected.
    UserError = 2 => Persistent,
    /// Remote password rejected.
    PasswordError = 3 => Persistent,
    /// Could not set transfer type.
    TypeError = 4 => Transient,
    /// Remote list failed.
    ListError = 5 => Transient,
    /// Mail command failed.
    MailError = 6 => Transient,
    /// Job directory missing.
    JidNumberError = 7 => Configuration,
    /// Could not open a remote file.
    OpenRemoteError = 10 => Transient,
    /// Write to remote failed.
    WriteRemoteError = 11 => Transient,
    /// Closing a remote file failed.
    CloseRemoteError = 12 => Transient,
    /// Remote move failed.
    MoveRemoteError = 13 => Transient,
    /// Remote chdir failed.
    ChdirError = 14 => Transient,
    /// Remote timed out.
    TimeoutError = 20 => Transient,
    /// Could not read a local file.
    ReadLocalError = 21 => LocalIo,
    /// Stat of a local file failed.
    StatError = 22 => LocalIo,
    /// Could not open a local file.
    OpenLocalError = 23 => LocalIo,
    /// Could not write a local file.
    WriteLocalError = 24 => LocalIo,
    /// Local rename failed.
    RenameError = 25 => LocalIo,
    /// Local move failed.
    MoveError = 26 => LocalIo,
    /// Job directory could not be opened.
    OpenFileDirError = 27 => Fatal,
    /// Memory allocation failed.
    AllocError = 28 => LocalIo,
    /// Local lock failed.
    LockError = 29 => LocalIo,
    /// Remote reply was a temporary negative.
    RemoteTemporaryError = 30 => Transient,
    /// Remote reply was a permanent negative.
    PermanentNegative = 31 => Persistent,
    /// Host name did not resolve.
    DnsError = 32 => Persistent,
    /// Authentication failed.
    AuthError = 33 => Persistent,
    /// Local disk full.
    DiskFull = 34 => LocalIo,
    /// Local permission denied.
    PermissionDenied = 35 => Fatal,
    /// A file name exceeds the filesystem limit.
    NameTooLong = 36 => Fatal,
    /// Message file syntax error.
    SyntaxError = 60 => Configuration,
    /// No files were left to send.
    NoFilesToSend = 61 => Success,
    /// Files remain; the worker asks for the next job.
    StillFilesToSend = 62 => SuccessWithPending,
    /// The message file is missing.
    NoMessageFile = 63 => Configuration,
    /// The recipient URL is malformed.
    UrlError = 64 => Configuration,
    /// Mapped-area version does not match the worker.
    VersionMismatch = 65 => Configuration,
    /// The connection was reset.
    ConnectionReset = 66 => Transient,
    /// The connection was refused.
    ConnectionRefused = 67 => Transient,
    /// Remote end hung up.
    ProtocolHangup = 68 => Transient,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_decode_to_the_same_variant() {
        for code in 0..100 {
            assert_eq!(WorkerExit::from_code(code).code(), code);
        }
    }

    #[test]
    fn classes() {
        assert_eq!(WorkerExit::from_code(0).class(), ExitClass::Success);
        assert_eq!(WorkerExit::NoFilesToSend.class(), ExitClass::Success);
        assert_eq!(WorkerExit::StillFilesToSend.class(), ExitClass::SuccessWithPending);
        assert_eq!(WorkerExit::ConnectError.class(), ExitClass::Transient);
        assert_eq!(WorkerExit::DnsError.class(), ExitClass::Persistent);
        assert_eq!(WorkerExit::DiskFull.class(), ExitClass::LocalIo);
        assert_eq!(WorkerExit::SyntaxError.class(), ExitClass::Configuration);
        assert_eq!(WorkerExit::NameTooLong.class(), ExitClass::Fatal);
        assert_eq!(WorkerExit::from_code(250).class(), ExitClass::Transient);
    }

    #[test]
    fn retry_and_error_counting() {
        assert!(ExitClass::LocalIo.is_retryable());
        assert!(!ExitClass::LocalIo.counts_as_host_error());
        assert!(ExitClass::Persistent.counts_as_host_error());
        assert!(!ExitClass::Fatal.is_retryable());
    }

    #[test]
    fn display_names_the_code() {
        assert_eq!(WorkerExit::TimeoutError.to_string(), "TimeoutError (20)");
        assert_eq!(WorkerExit::from_code(99).to_string(), "Unknown (99)");
    }
}
