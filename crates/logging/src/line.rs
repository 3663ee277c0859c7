//! AFD log line format.
//!
//! ```text
//! 16 14:02:11 <I> alpha   [2]: 3 files 1024 bytes send #3f
//! ```
//!
//! Day of month and time, the severity sign, the host alias padded to
//! [`MAX_HOSTNAME_LENGTH`], the slot number in brackets, then the text with an
//! optional suffix.

use std::fmt::{self, Write as _};

use chrono::{DateTime, Local, TimeZone};

use crate::severity::Severity;

/// Width of the host alias column.
pub const MAX_HOSTNAME_LENGTH: usize = 8;

/// Optional trailer of a log line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Suffix {
    /// ` (<file> <line>)` source location.
    Location {
        /// Source file.
        file: String,
        /// Line number.
        line: u32,
    },
    /// ` #<job_id hex>`.
    JobId(u32),
    /// ` @<dir_id hex>`.
    DirId(u32),
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location { file, line } => write!(f, " ({file} {line})"),
            Self::JobId(id) => write!(f, " #{id:x}"),
            Self::DirId(id) => write!(f, " @{id:x}"),
        }
    }
}

/// One log line before formatting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    /// When the event happened.
    pub time: DateTime<Local>,
    /// Severity.
    pub severity: Severity,
    /// Host alias; empty for system lines.
    pub host: String,
    /// Connection slot.
    pub slot: Option<usize>,
    /// Message text.
    pub text: String,
    /// Optional trailer.
    pub suffix: Option<Suffix>,
}

impl LogLine {
    /// A line stamped with the current local time.
    #[must_use]
    pub fn now(severity: Severity, text: impl Into<String>) -> Self {
        Self::at(Local::now(), severity, text)
    }

    /// A line stamped with `time`.
    #[must_use]
    pub fn at<Tz: TimeZone>(time: DateTime<Tz>, severity: Severity, text: impl Into<String>) -> Self {
        Self {
            time: time.with_timezone(&Local),
            severity,
            host: String::new(),
            slot: None,
            text: text.into(),
            suffix: None,
        }
    }

    /// Sets the host alias.
    #[must_use]
    pub fn host(mut self, alias: impl Into<String>) -> Self {
        self.host = alias.into();
        self
    }

    /// Sets the connection slot.
    #[must_use]
    pub fn slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Sets the trailer.
    #[must_use]
    pub fn suffix(mut self, suffix: Suffix) -> Self {
        self.suffix = Some(suffix);
        self
    }

    /// Renders the line including the terminating newline.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(48 + self.text.len());
        let _ = write!(
            out,
            "{} {} {:<width$}",
            timestamp(&self.time),
            self.severity,
            self.host,
            width = MAX_HOSTNAME_LENGTH
        );
        match self.slot {
            Some(slot) => {
                let _ = write!(out, "[{slot}]: ");
            }
            None => out.push_str(": "),
        }
        out.push_str(&self.text);
        if let Some(suffix) = &self.suffix {
            let _ = write!(out, "{suffix}");
        }
        out.push('\n');
        out
    }
}

/// `dd HH:MM:SS` timestamp.
#[must_use]
pub fn timestamp<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    time.format("%d %H:%M:%S").to_string()
}
