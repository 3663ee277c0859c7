//! Binary records for the delete and output log fifos.
//!
//! Every record is framed by a native-endian `u32` length that covers the
//! rest of the record, so a reader can split a fifo stream without knowing
//! the record layout.

use std::io;

use crate::line::MAX_HOSTNAME_LENGTH;

const HOST_FIELD: usize = MAX_HOSTNAME_LENGTH + 4;

/// Why files were deleted instead of sent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum DeleteReason {
    /// Exceeded the job's age limit in the outgoing queue.
    AgeOutput = 0,
    /// Exceeded the age limit before a job was built.
    AgeInput = 1,
    /// Deleted by an operator.
    UserDel = 2,
    /// The job's message file is gone.
    NoMessageFileDel = 4,
    /// Duplicate detected on the outgoing side.
    DupOutput = 6,
    /// The job id could not be resolved to a message.
    JidLookupFailureDel = 8,
    /// A job in the queue was dropped because its configuration is broken.
    DelQueuedFile = 10,
    /// An error job stayed too long.
    DeleteStaleErrorJobs = 12,
    /// The message of a vanished job was removed.
    ClearStaleMessages = 13,
    /// The host was removed or disabled.
    DeleteHostDisabled = 17,
    /// The archive name was too long for the filesystem.
    ArchiveNameTooLong = 25,
}

impl DeleteReason {
    /// Decodes a reason code.
    #[must_use]
    pub const fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            0 => Self::AgeOutput,
            1 => Self::AgeInput,
            2 => Self::UserDel,
            4 => Self::NoMessageFileDel,
            6 => Self::DupOutput,
            8 => Self::JidLookupFailureDel,
            10 => Self::DelQueuedFile,
            12 => Self::DeleteStaleErrorJobs,
            13 => Self::ClearStaleMessages,
            17 => Self::DeleteHostDisabled,
            25 => Self::ArchiveNameTooLong,
            _ => return None,
        })
    }

    /// Short name used in the delete log viewer.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AgeOutput => "AGE_OUTPUT",
            Self::AgeInput => "AGE_INPUT",
            Self::UserDel => "USER_DEL",
            Self::NoMessageFileDel => "NO_MESSAGE_FILE_DEL",
            Self::DupOutput => "DUP_OUTPUT",
            Self::JidLookupFailureDel => "JID_LOOKUP_FAILURE_DEL",
            Self::DelQueuedFile => "DEL_QUEUED_FILE",
            Self::DeleteStaleErrorJobs => "DELETE_STALE_ERROR_JOBS",
            Self::ClearStaleMessages => "CLEAR_STALE_MESSAGES",
            Self::DeleteHostDisabled => "DELETE_HOST_DISABLED",
            Self::ArchiveNameTooLong => "ARCHIVE_NAME_TOO_LONG",
        }
    }
}

/// One deleted file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeleteRecord {
    /// Why.
    pub reason: DeleteReason,
    /// Host alias of the job.
    pub host_alias: String,
    /// Deleted file.
    pub file_name: String,
    /// Its size.
    pub file_size: u64,
    /// Job id.
    pub job_id: u32,
    /// Source directory id.
    pub dir_id: u32,
    /// Creation time of the job.
    pub input_time: i64,
    /// Unique number of the job.
    pub unique_number: u32,
    /// Split job counter of the job.
    pub split_job_counter: u32,
    /// Process or user that deleted the file, with optional detail.
    pub deleted_by: String,
}

impl DeleteRecord {
    /// Frames the record.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64 + self.file_name.len() + self.deleted_by.len());
        body.extend_from_slice(&self.file_size.to_ne_bytes());
        body.extend_from_slice(&self.job_id.to_ne_bytes());
        body.extend_from_slice(&self.dir_id.to_ne_bytes());
        body.extend_from_slice(&self.input_time.to_ne_bytes());
        body.extend_from_slice(&self.unique_number.to_ne_bytes());
        body.extend_from_slice(&self.split_job_counter.to_ne_bytes());
        body.extend_from_slice(&(self.reason as u16).to_ne_bytes());
        body.extend_from_slice(&host_field(&self.host_alias));
        push_str(&mut body, &self.file_name);
        push_str(&mut body, &self.deleted_by);
        frame(body)
    }

    /// Decodes one framed record, returning it and the bytes consumed.
    pub fn decode(bytes: &[u8]) -> io::Result<(Self, usize)> {
        let (body, used) = unframe(bytes)?;
        let mut r = Reader { bytes: body, pos: 0 };
        let file_size = u64::from_ne_bytes(r.array()?);
        let job_id = u32::from_ne_bytes(r.array()?);
        let dir_id = u32::from_ne_bytes(r.array()?);
        let input_time = i64::from_ne_bytes(r.array()?);
        let unique_number = u32::from_ne_bytes(r.array()?);
        let split_job_counter = u32::from_ne_bytes(r.array()?);
        let code = u16::from_ne_bytes(r.array()?);
        let reason = DeleteReason::from_u16(code).ok_or_else(|| invalid("unknown delete reason"))?;
        let host_alias = r.host()?;
        let file_name = r.string()?;
        let deleted_by = r.string()?;
        Ok((
            Self {
                reason,
                host_alias,
                file_name,
                file_size,
                job_id,
                dir_id,
                input_time,
                unique_number,
                split_job_counter,
                deleted_by,
            },
            used,
        ))
    }
}

/// One successfully sent file for the output log.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputRecord {
    /// Host alias.
    pub host_alias: String,
    /// Protocol code of the transfer.
    pub protocol: u8,
    /// Sent file name.
    pub file_name: String,
    /// Size in bytes.
    pub file_size: u64,
    /// Seconds the transfer took.
    pub transfer_time: f64,
    /// Job id.
    pub job_id: u32,
    /// Message name of the job.
    pub unique_name: String,
    /// Archive directory, if the file was archived.
    pub archive_dir: Option<String>,
}

impl OutputRecord {
    /// Frames the record.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64 + self.file_name.len() + self.unique_name.len());
        body.extend_from_slice(&self.file_size.to_ne_bytes());
        body.extend_from_slice(&self.transfer_time.to_ne_bytes());
        body.extend_from_slice(&self.job_id.to_ne_bytes());
        body.push(self.protocol);
        body.extend_from_slice(&host_field(&self.host_alias));
        push_str(&mut body, &self.file_name);
        push_str(&mut body, &self.unique_name);
        push_str(&mut body, self.archive_dir.as_deref().unwrap_or_default());
        frame(body)
    }

    /// Decodes one framed record, returning it and the bytes consumed.
    pub fn decode(bytes: &[u8]) -> io::Result<(Self, usize)> {
        let (body, used) = unframe(bytes)?;
        let mut r = Reader { bytes: body, pos: 0 };
        let file_size = u64::from_ne_bytes(r.array()?);
        let transfer_time = f64::from_ne_bytes(r.array()?);
        let job_id = u32::from_ne_bytes(r.array()?);
        let [protocol] = r.array()?;
        let host_alias = r.host()?;
        let file_name = r.string()?;
        let unique_name = r.string()?;
        let archive_dir = Some(r.string()?).filter(|dir| !dir.is_empty());
        Ok((
            Self {
                host_alias,
                protocol,
                file_name,
                file_size,
                transfer_time,
                job_id,
                unique_name,
                archive_dir,
            },
            used,
        ))
    }
}

fn host_field(alias: &str) -> [u8; HOST_FIELD] {
    let mut field = [0_u8; HOST_FIELD];
    let len = alias.len().min(HOST_FIELD - 1);
    field[..len].copy_from_slice(&alias.as_bytes()[..len]);
    field
}

fn push_str(out: &mut Vec<u8>, text: &str) {
    out.extend_from_slice(text.as_bytes());
    out.push(0);
}

fn frame(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_ne_bytes());
    out.extend(body);
    out
}

fn unframe(bytes: &[u8]) -> io::Result<(&[u8], usize)> {
    let len_bytes: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(truncated)?;
    let len = u32::from_ne_bytes(len_bytes) as usize;
    let body = bytes.get(4..4 + len).ok_or_else(truncated)?;
    Ok((body, 4 + len))
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "truncated log record")
}

fn invalid(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, what.to_string())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let slice = self.bytes.get(self.pos..self.pos + N).ok_or_else(truncated)?;
        self.pos += N;
        let mut out = [0_u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn host(&mut self) -> io::Result<String> {
        let field: [u8; HOST_FIELD] = self.array()?;
        let end = field.iter().position(|&b| b == 0).unwrap_or(HOST_FIELD);
        String::from_utf8(field[..end].to_vec()).map_err(|_| invalid("host alias is not UTF-8"))
    }

    fn string(&mut self) -> io::Result<String> {
        let rest = self.bytes.get(self.pos..).ok_or_else(truncated)?;
        let end = rest.iter().position(|&b| b == 0).ok_or_else(truncated)?;
        self.pos += end + 1;
        String::from_utf8(rest[..end].to_vec()).map_err(|_| invalid("text is not UTF-8"))
    }
}
