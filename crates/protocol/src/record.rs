//! Fixed-size records read from the distributor's input fifos.
//!
//! All integers are in native byte order; producer and consumer always run
//! on the same machine.

use crate::error::ProtocolError;
use crate::msg_name::MAX_MSG_NAME_LENGTH;

/// Size of one `msg_fifo` record.
pub const MSG_RECORD_SIZE: usize = 24 + MAX_MSG_NAME_LENGTH + 1;

/// Size of one `sf_fin_fifo` record.
pub const FIN_RECORD_SIZE: usize = 4;

/// Size of one `retry_fd_fifo` record.
pub const RETRY_RECORD_SIZE: usize = 4;

/// A transfer request announced by AMG on `msg_fifo`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MsgRecord {
    /// Creation time of the job.
    pub creation_time: i64,
    /// Bytes in the job directory.
    pub file_size_to_send: u64,
    /// Files in the job directory.
    pub files_to_send: u32,
    /// Queue special flags requested by the producer.
    pub special_flag: u32,
    /// Message name of the job.
    pub msg_name: String,
}

impl MsgRecord {
    /// Encodes the record.
    #[must_use]
    pub fn encode(&self) -> [u8; MSG_RECORD_SIZE] {
        let mut buf = [0_u8; MSG_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.creation_time.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.file_size_to_send.to_ne_bytes());
        buf[16..20].copy_from_slice(&self.files_to_send.to_ne_bytes());
        buf[20..24].copy_from_slice(&self.special_flag.to_ne_bytes());
        let name = self.msg_name.as_bytes();
        let len = name.len().min(MAX_MSG_NAME_LENGTH);
        buf[24..24 + len].copy_from_slice(&name[..len]);
        buf
    }

    /// Decodes one record from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < MSG_RECORD_SIZE {
            return Err(ProtocolError::Truncated {
                record: "msg_fifo",
                actual: bytes.len(),
                expected: MSG_RECORD_SIZE,
            });
        }
        let field = &bytes[24..MSG_RECORD_SIZE];
        let end = memchr::memchr(0, field).unwrap_or(field.len());
        let msg_name = std::str::from_utf8(&field[..end])
            .map_err(|_| ProtocolError::InvalidText { record: "msg_fifo" })?
            .to_string();
        Ok(Self {
            creation_time: i64::from_ne_bytes(array(&bytes[0..8])),
            file_size_to_send: u64::from_ne_bytes(array(&bytes[8..16])),
            files_to_send: u32::from_ne_bytes(array(&bytes[16..20])),
            special_flag: u32::from_ne_bytes(array(&bytes[20..24])),
            msg_name,
        })
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    out
}

/// A worker completion read from `sf_fin_fifo`.
///
/// Workers write their pid; a negative pid means the worker still holds an
/// open connection and asks for another job (burst).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Completion {
    /// Worker pid.
    pub pid: i32,
    /// Worker wants to continue on the same connection.
    pub more_data: bool,
}

impl Completion {
    /// Decodes the signed pid record.
    #[must_use]
    pub fn decode(bytes: [u8; FIN_RECORD_SIZE]) -> Self {
        let raw = i32::from_ne_bytes(bytes);
        Self {
            pid: raw.saturating_abs(),
            more_data: raw < 0,
        }
    }

    /// Encodes the signed pid record.
    #[must_use]
    pub fn encode(&self) -> [u8; FIN_RECORD_SIZE] {
        let raw = if self.more_data { -self.pid } else { self.pid };
        raw.to_ne_bytes()
    }
}

/// Decodes a `retry_fd_fifo` record: the FSA position to retry now.
#[must_use]
pub fn decode_retry(bytes: [u8; RETRY_RECORD_SIZE]) -> i32 {
    i32::from_ne_bytes(bytes)
}

/// Reassembles fixed-size records from non-blocking fifo reads, which may
/// return partial records.
#[derive(Debug)]
pub struct FrameBuffer {
    size: usize,
    pending: Vec<u8>,
}

impl FrameBuffer {
    /// Buffer for records of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            pending: Vec::new(),
        }
    }

    /// Appends bytes read from the fifo.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete record.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.pending.len() < self.size {
            return None;
        }
        let rest = self.pending.split_off(self.size);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Bytes of an incomplete trailing record.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_record_round_trip() {
        let record = MsgRecord {
            creation_time: 1_700_000_000,
            file_size_to_send: 1024,
            files_to_send: 1,
            special_flag: 0,
            msg_name: "0/f/3/5f3a_1_0".to_string(),
        };
        let decoded = MsgRecord::decode(&record.encode()).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn short_msg_record_is_truncated() {
        assert!(matches!(
            MsgRecord::decode(&[0_u8; 10]),
            Err(ProtocolError::Truncated { actual: 10, .. })
        ));
    }

    #[test]
    fn negative_pid_requests_burst() {
        let c = Completion::decode((-1234_i32).to_ne_bytes());
        assert_eq!(c, Completion { pid: 1234, more_data: true });
        assert_eq!(Completion::decode(c.encode()), c);
        assert!(!Completion::decode(99_i32.to_ne_bytes()).more_data);
    }

    #[test]
    fn frame_buffer_reassembles_partial_reads() {
        let mut frames = FrameBuffer::new(4);
        frames.extend(&[1, 2, 3]);
        assert!(frames.next_frame().is_none());
        frames.extend(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(frames.next_frame(), Some(vec![1, 2, 3, 4]));
        assert_eq!(frames.next_frame(), Some(vec![5, 6, 7, 8]));
        assert_eq!(frames.next_frame(), None);
        assert_eq!(frames.pending_len(), 1);
    }
}
