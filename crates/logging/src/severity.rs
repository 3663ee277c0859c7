use std::fmt;

use tracing::Level;

/// Severity of an AFD log line, rendered as a three-character sign.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Trace output.
    Trace,
    /// Debug output.
    Debug,
    /// Normal operation.
    Info,
    /// Configuration notice.
    Config,
    /// Something is off but the job continues.
    Warn,
    /// A job or host failed.
    Error,
    /// A host went offline.
    Fatal,
}

impl Severity {
    /// The sign written into log lines, e.g. `<I>`.
    #[must_use]
    pub const fn sign(self) -> &'static str {
        match self {
            Self::Info => "<I>",
            Self::Warn => "<W>",
            Self::Error => "<E>",
            Self::Fatal => "<F>",
            Self::Debug => "<D>",
            Self::Trace => "<T>",
            Self::Config => "<C>",
        }
    }

    /// Parses a sign back into a severity.
    #[must_use]
    pub fn from_sign(sign: &str) -> Option<Self> {
        Some(match sign {
            "<I>" => Self::Info,
            "<W>" => Self::Warn,
            "<E>" => Self::Error,
            "<F>" => Self::Fatal,
            "<D>" => Self::Debug,
            "<T>" => Self::Trace,
            "<C>" => Self::Config,
            _ => return None,
        })
    }

    /// Severity matching a `tracing` level.
    #[must_use]
    pub const fn from_level(level: Level) -> Self {
        match level {
            Level::ERROR => Self::Error,
            Level::WARN => Self::Warn,
            Level::INFO => Self::Info,
            Level::DEBUG => Self::Debug,
            Level::TRACE => Self::Trace,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sign())
    }
}
