use std::io;
use std::path::PathBuf;

/// Errors raised while decoding fifo records.
#[derive(Debug, thiserror::Error, Clone, Eq, PartialEq)]
pub enum ProtocolError {
    /// A fixed-size record was shorter than its layout.
    #[error("truncated {record} record: {actual} of {expected} bytes")]
    Truncated {
        /// Record kind.
        record: &'static str,
        /// Bytes available.
        actual: usize,
        /// Bytes required.
        expected: usize,
    },
    /// The message name does not follow the
    /// `<fs>/<job>/<dir>/<time>_<unique>_<split>` grammar.
    #[error("malformed message name {name:?}: {reason}")]
    MalformedMsgName {
        /// Offending name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// A record carried a type byte this build does not know.
    #[error("unknown {record} type {code}")]
    UnknownType {
        /// Record kind.
        record: &'static str,
        /// Type byte.
        code: u8,
    },
    /// A string field was not valid UTF-8.
    #[error("{record} record carries non UTF-8 text")]
    InvalidText {
        /// Record kind.
        record: &'static str,
    },
}

/// Errors raised while parsing a recipient URL.
#[derive(Debug, thiserror::Error, Clone, Eq, PartialEq)]
pub enum UrlError {
    /// No `scheme://` prefix.
    #[error("missing scheme in {0:?}")]
    MissingScheme(String),
    /// The scheme is not one of the supported protocols.
    #[error("unsupported scheme {0:?}")]
    UnknownScheme(String),
    /// The authority has no host part.
    #[error("missing host in {0:?}")]
    MissingHost(String),
    /// The port is not a number in `1..=65535`.
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    /// A `%xx` escape is malformed.
    #[error("invalid escape in {0:?}")]
    InvalidEscape(String),
}

/// Errors raised while reading a message file.
#[derive(Debug, thiserror::Error)]
pub enum MessageFileError {
    /// Reading the file failed.
    #[error("failed to read message file {path}: {source}")]
    Io {
        /// Message file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The file is empty.
    #[error("message file {0} is empty")]
    Empty(PathBuf),
    /// No `DESTINATION` line.
    #[error("message file has no DESTINATION")]
    MissingDestination,
    /// The recipient URL is malformed.
    #[error("invalid recipient: {0}")]
    Url(#[from] UrlError),
    /// A keyword carries a value that does not parse.
    #[error("line {line}: invalid value {value:?} for {keyword}")]
    InvalidValue {
        /// One-based line number.
        line: usize,
        /// Keyword of the line.
        keyword: String,
        /// Rejected value.
        value: String,
    },
}

impl MessageFileError {
    /// Returns `true` when the file does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Errors raised while parsing a worker command line.
#[derive(Debug, thiserror::Error, Clone, Eq, PartialEq)]
pub enum WorkerCliError {
    /// Fewer positional arguments than required.
    #[error("missing positional argument <{0}>")]
    MissingArgument(&'static str),
    /// A positional or option value does not parse.
    #[error("invalid value {value:?} for {name}")]
    InvalidValue {
        /// Argument or option name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
    /// An option that needs a value was last on the line.
    #[error("option -{0} requires a value")]
    MissingOptionValue(char),
    /// An option letter this contract does not define.
    #[error("unknown option -{0}")]
    UnknownOption(char),
}
