//! Operator commands: `fd_cmd_fifo` bytes and `fd_delete_fifo` requests.

use crate::error::ProtocolError;

/// One-byte commands accepted on `fd_cmd_fifo`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum FdCommand {
    /// Stop dispatching, wait for workers, exit.
    Shutdown = 1,
    /// Run the FSA consistency check now.
    CheckFsaEntries = 2,
    /// Log the current queue.
    FlushMsgFifoDumpQueue = 3,
    /// Make every fetch directory due now.
    ForceRemoteDirCheck = 4,
    /// Reread the local interface file.
    RereadLocInterfaceFile = 5,
    /// Acknowledge that the daemon is alive.
    IsAlive = 6,
}

impl FdCommand {
    /// Decodes a command byte.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Shutdown),
            2 => Some(Self::CheckFsaEntries),
            3 => Some(Self::FlushMsgFifoDumpQueue),
            4 => Some(Self::ForceRemoteDirCheck),
            5 => Some(Self::RereadLocInterfaceFile),
            6 => Some(Self::IsAlive),
            _ => None,
        }
    }

    /// The command byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

const DELETE_ALL_JOBS_FROM_HOST: u8 = 1;
const DELETE_MESSAGE: u8 = 2;
const DELETE_SINGLE_FILE: u8 = 3;

/// An operator delete request from `fd_delete_fifo`.
///
/// Wire form: a type byte followed by NUL-terminated strings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeleteRequest {
    /// Drop every queued job of a host.
    AllJobsFromHost {
        /// Host alias.
        host_alias: String,
    },
    /// Drop one queued job.
    Message {
        /// Message name.
        msg_name: String,
    },
    /// Delete one file from a queued job.
    SingleFile {
        /// Message name.
        msg_name: String,
        /// File name inside the job directory.
        file_name: String,
    },
}

impl DeleteRequest {
    /// Encodes the request.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::AllJobsFromHost { host_alias } => {
                push_type(&mut out, DELETE_ALL_JOBS_FROM_HOST);
                push_str(&mut out, host_alias);
            }
            Self::Message { msg_name } => {
                push_type(&mut out, DELETE_MESSAGE);
                push_str(&mut out, msg_name);
            }
            Self::SingleFile {
                msg_name,
                file_name,
            } => {
                push_type(&mut out, DELETE_SINGLE_FILE);
                push_str(&mut out, msg_name);
                push_str(&mut out, file_name);
            }
        }
        out
    }

    /// Decodes the first request in `bytes`.
    ///
    /// Returns the request and the number of bytes consumed, or `Ok(None)`
    /// if `bytes` does not yet hold a complete request.
    pub fn decode(bytes: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        let Some((&kind, rest)) = bytes.split_first() else {
            return Ok(None);
        };
        let fields = match kind {
            DELETE_ALL_JOBS_FROM_HOST | DELETE_MESSAGE => 1,
            DELETE_SINGLE_FILE => 2,
            code => {
                return Err(ProtocolError::UnknownType {
                    record: "delete",
                    code,
                });
            }
        };
        let mut strings = Vec::with_capacity(fields);
        let mut offset = 0;
        for _ in 0..fields {
            let Some(end) = memchr::memchr(0, &rest[offset..]) else {
                return Ok(None);
            };
            let text = std::str::from_utf8(&rest[offset..offset + end])
                .map_err(|_| ProtocolError::InvalidText { record: "delete" })?;
            strings.push(text.to_string());
            offset += end + 1;
        }
        let mut strings = strings.into_iter();
        let mut next = || strings.next().unwrap_or_default();
        let request = match kind {
            DELETE_ALL_JOBS_FROM_HOST => Self::AllJobsFromHost { host_alias: next() },
            DELETE_MESSAGE => Self::Message { msg_name: next() },
            _ => Self::SingleFile {
                msg_name: next(),
                file_name: next(),
            },
        };
        Ok(Some((request, 1 + offset)))
    }
}

fn push_type(out: &mut Vec<u8>, kind: u8) {
    out.push(kind);
}

fn push_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}
