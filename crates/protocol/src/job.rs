//! Message files.
//!
//! AMG writes one message file per job id below `msg/`. The file is line
//! oriented:
//!
//! ```text
//! DESTINATION ftp://user@host/path
//! AGE_LIMIT 600
//! AGEING 7
//! [options]
//! archive 2d
//! dupcheck 3600 store warn
//! ```
//!
//! `#` starts a comment line. Unknown header keywords and unknown options are
//! kept verbatim in [`JobOptions::extra`] so a rewrite does not lose them.

use std::fs;
use std::path::Path;

use bitflags::bitflags;

use crate::error::MessageFileError;
use crate::url::Url;

/// Lowest ageing weight.
pub const MIN_AGEING_VALUE: u8 = 0;
/// Highest ageing weight.
pub const MAX_AGEING_VALUE: u8 = 9;

bitflags! {
    /// Duplicate-check policy.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct DcFlags: u32 {
        /// Delete duplicates.
        const DELETE = 1;
        /// Move duplicates into the store directory.
        const STORE = 1 << 1;
        /// Log a warning for every duplicate.
        const WARN = 1 << 2;
        /// Checksum the file name only.
        const NAME = 1 << 3;
        /// Checksum the file name and size.
        const NAME_SIZE = 1 << 4;
    }
}

/// Duplicate-check settings of a job.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DupCheck {
    /// Seconds a checksum stays remembered.
    pub timeout: u64,
    /// Policy.
    pub flags: DcFlags,
}

/// Options from the `[options]` block.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct JobOptions {
    /// Keep sent files in the archive for this many seconds.
    pub archive_time: Option<u64>,
    /// Duplicate check.
    pub dup_check: Option<DupCheck>,
    /// Permissions of created files.
    pub mode: Option<u32>,
    /// Mail charset.
    pub charset: Option<String>,
    /// Mail reply-to address.
    pub reply_to: Option<String>,
    /// Mail relay, optionally `host:port`.
    pub smtp_server: Option<String>,
    /// HTTP proxy, optionally `host:port`.
    pub http_proxy: Option<String>,
    /// Restart partially sent files.
    pub restart: bool,
    /// De-Mail sender.
    pub de_mail_sender: Option<String>,
    /// Domain appended to group mail recipients.
    pub group_mail_domain: Option<String>,
    /// Mail sender.
    pub from: Option<String>,
    /// Seconds of idle time before the worker disconnects.
    pub disconnect: Option<u64>,
    /// Lines this parser does not interpret.
    pub extra: Vec<String>,
}

/// A parsed message file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobDescriptor {
    /// Recipient.
    pub destination: Url,
    /// Seconds after creation after which files are dropped; `0` disables.
    pub age_limit: u64,
    /// Ageing weight, if the file sets one.
    pub ageing: Option<u8>,
    /// Options block.
    pub options: JobOptions,
}

impl JobDescriptor {
    /// A descriptor with no options.
    #[must_use]
    pub fn new(destination: Url) -> Self {
        Self {
            destination,
            age_limit: 0,
            ageing: None,
            options: JobOptions::default(),
        }
    }

    /// Reads and parses a message file.
    pub fn read(path: &Path) -> Result<Self, MessageFileError> {
        let text = fs::read_to_string(path).map_err(|source| MessageFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if text.trim().is_empty() {
            return Err(MessageFileError::Empty(path.to_path_buf()));
        }
        Self::parse(&text)
    }

    /// Parses the text of a message file.
    pub fn parse(text: &str) -> Result<Self, MessageFileError> {
        let mut destination = None;
        let mut age_limit = 0;
        let mut ageing = None;
        let mut options = JobOptions::default();
        let mut in_options = false;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.eq_ignore_ascii_case("[options]") {
                in_options = true;
                continue;
            }
            let (keyword, value) = match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k, v.trim()),
                None => (line, ""),
            };
            if in_options {
                parse_option(&mut options, line_no, keyword, value)?;
                continue;
            }
            match keyword {
                "DESTINATION" => destination = Some(Url::parse(value)?),
                "AGE_LIMIT" => age_limit = number(line_no, keyword, value)?,
                "AGEING" => {
                    let weight: u8 = number(line_no, keyword, value)?;
                    ageing = Some(weight.clamp(MIN_AGEING_VALUE, MAX_AGEING_VALUE));
                }
                _ => options.extra.push(line.to_string()),
            }
        }

        Ok(Self {
            destination: destination.ok_or(MessageFileError::MissingDestination)?,
            age_limit,
            ageing,
            options,
        })
    }

    /// Renders the descriptor back into message-file text.
    ///
    /// The password is written in clear; message files are private to the
    /// work directory.
    #[must_use]
    pub fn render(&self) -> String {
        let url = &self.destination;
        let mut out = format!("DESTINATION {}://", url.protocol());
        if let Some(user) = &url.user {
            out.push_str(&escape(user));
            if let Some(password) = &url.password {
                out.push(':');
                out.push_str(&escape(password));
            }
            out.push('@');
        }
        out.push_str(&url.host);
        if let Some(port) = url.port {
            out.push_str(&format!(":{port}"));
        }
        if !url.path.is_empty() {
            out.push('/');
            out.push_str(&url.path);
        }
        if let Some(opts) = &url.options {
            out.push(';');
            out.push_str(opts);
        }
        out.push('\n');
        if self.age_limit > 0 {
            out.push_str(&format!("AGE_LIMIT {}\n", self.age_limit));
        }
        if let Some(ageing) = self.ageing {
            out.push_str(&format!("AGEING {ageing}\n"));
        }

        let o = &self.options;
        let mut lines = Vec::new();
        if let Some(t) = o.archive_time {
            lines.push(format!("archive {t}"));
        }
        if let Some(dc) = o.dup_check {
            let mut line = format!("dupcheck {}", dc.timeout);
            for (flag, word) in DC_WORDS {
                if dc.flags.contains(flag) {
                    line.push(' ');
                    line.push_str(word);
                }
            }
            lines.push(line);
        }
        if let Some(mode) = o.mode {
            lines.push(format!("mode {mode:o}"));
        }
        for (word, value) in [
            ("charset", &o.charset),
            ("reply-to", &o.reply_to),
            ("smtp-server", &o.smtp_server),
            ("http-proxy", &o.http_proxy),
            ("de-mail-sender", &o.de_mail_sender),
            ("group-mail-domain", &o.group_mail_domain),
            ("from", &o.from),
        ] {
            if let Some(value) = value {
                lines.push(format!("{word} {value}"));
            }
        }
        if o.restart {
            lines.push("restart".to_string());
        }
        if let Some(d) = o.disconnect {
            lines.push(format!("disconnect {d}"));
        }
        lines.extend(o.extra.iter().cloned());
        if !lines.is_empty() {
            out.push_str("[options]\n");
            for line in lines {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }
}

const DC_WORDS: [(DcFlags, &str); 5] = [
    (DcFlags::DELETE, "delete"),
    (DcFlags::STORE, "store"),
    (DcFlags::WARN, "warn"),
    (DcFlags::NAME, "name"),
    (DcFlags::NAME_SIZE, "namesize"),
];

fn parse_option(
    options: &mut JobOptions,
    line: usize,
    keyword: &str,
    value: &str,
) -> Result<(), MessageFileError> {
    let text = || Some(value.to_string()).filter(|v| !v.is_empty());
    match keyword {
        "archive" => options.archive_time = Some(duration(line, keyword, value)?),
        "dupcheck" => {
            let mut words = value.split_whitespace();
            let timeout = match words.next() {
                Some(t) => duration(line, keyword, t)?,
                None => 0,
            };
            let mut flags = DcFlags::empty();
            for word in words {
                let (flag, _) = DC_WORDS
                    .iter()
                    .find(|(_, w)| *w == word)
                    .ok_or_else(|| invalid(line, keyword, word))?;
                flags |= *flag;
            }
            if !flags.intersects(DcFlags::NAME | DcFlags::NAME_SIZE) {
                flags |= DcFlags::NAME_SIZE;
            }
            if !flags.intersects(DcFlags::DELETE | DcFlags::STORE | DcFlags::WARN) {
                flags |= DcFlags::DELETE;
            }
            options.dup_check = Some(DupCheck { timeout, flags });
        }
        "mode" => {
            options.mode =
                Some(u32::from_str_radix(value, 8).map_err(|_| invalid(line, keyword, value))?);
        }
        "charset" => options.charset = text(),
        "reply-to" => options.reply_to = text(),
        "smtp-server" => options.smtp_server = text(),
        "http-proxy" => options.http_proxy = text(),
        "de-mail-sender" => options.de_mail_sender = text(),
        "group-mail-domain" => options.group_mail_domain = text(),
        "from" => options.from = text(),
        "restart" => options.restart = true,
        "disconnect" => options.disconnect = Some(duration(line, keyword, value)?),
        _ => {
            if value.is_empty() {
                options.extra.push(keyword.to_string());
            } else {
                options.extra.push(format!("{keyword} {value}"));
            }
        }
    }
    Ok(())
}

fn number<T: std::str::FromStr>(line: usize, keyword: &str, value: &str) -> Result<T, MessageFileError> {
    value.parse().map_err(|_| invalid(line, keyword, value))
}

/// Seconds with an optional `s`, `m`, `h` or `d` suffix.
fn duration(line: usize, keyword: &str, value: &str) -> Result<u64, MessageFileError> {
    let (digits, unit) = match value.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&value[..i], c.to_ascii_lowercase()),
        _ => (value, 's'),
    };
    let factor = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        _ => return Err(invalid(line, keyword, value)),
    };
    let n: u64 = number(line, keyword, digits)?;
    n.checked_mul(factor).ok_or_else(|| invalid(line, keyword, value))
}

fn invalid(line: usize, keyword: &str, value: &str) -> MessageFileError {
    MessageFileError::InvalidValue {
        line,
        keyword: keyword.to_string(),
        value: value.to_string(),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        if matches!(b, b'@' | b':' | b'/' | b'%' | b';') {
            out.push_str(&format!("%{b:02X}"));
        } else {
            out.push(b as char);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::Protocol;

    #[test]
    fn parses_header_and_options() {
        let job = JobDescriptor::parse(
            "# generated\nDESTINATION ftp://u@h/x\nAGE_LIMIT 60\nAGEING 12\n[options]\narchive 2d\ndupcheck 1h store warn\nmode 644\nrestart\nlock DOT\n",
        )
        .expect("valid");
        assert_eq!(job.destination.protocol(), Protocol::Ftp);
        assert_eq!(job.age_limit, 60);
        assert_eq!(job.ageing, Some(MAX_AGEING_VALUE));
        assert_eq!(job.options.archive_time, Some(2 * 86_400));
        let dc = job.options.dup_check.expect("dupcheck");
        assert_eq!(dc.timeout, 3_600);
        assert_eq!(dc.flags, DcFlags::STORE | DcFlags::WARN | DcFlags::NAME_SIZE);
        assert_eq!(job.options.mode, Some(0o644));
        assert!(job.options.restart);
        assert_eq!(job.options.extra, vec!["lock DOT".to_string()]);
    }

    #[test]
    fn missing_destination_is_an_error() {
        assert!(matches!(
            JobDescriptor::parse("AGE_LIMIT 5\n"),
            Err(MessageFileError::MissingDestination)
        ));
    }

    #[test]
    fn bad_values_report_the_line() {
        let err = JobDescriptor::parse("DESTINATION loc:///x\nAGE_LIMIT soon\n").expect_err("invalid");
        assert!(matches!(err, MessageFileError::InvalidValue { line: 2, .. }));
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("3");
        fs::write(&path, "").expect("write");
        assert!(matches!(JobDescriptor::read(&path), Err(MessageFileError::Empty(_))));
        let missing = JobDescriptor::read(&dir.path().join("4")).expect_err("missing");
        assert!(missing.is_not_found());
    }

    #[test]
    fn render_reparses_to_the_same_job() {
        let mut job = JobDescriptor::new(Url::parse("sftp://u:p%40ss@h:2222/in").expect("url"));
        job.age_limit = 120;
        job.ageing = Some(3);
        job.options.dup_check = Some(DupCheck {
            timeout: 60,
            flags: DcFlags::DELETE | DcFlags::NAME,
        });
        job.options.from = Some("afd@example.org".to_string());
        let text = job.render();
        assert_eq!(JobDescriptor::parse(&text).expect("reparse"), job);
    }
}
