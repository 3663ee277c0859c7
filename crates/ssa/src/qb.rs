//! Queue buffer records: one pending or running transfer request.

use bitflags::bitflags;

use crate::codec::{FieldReader, FieldWriter, fixed_str, to_fixed};
use crate::fsa::MAX_MSG_NAME_LENGTH;
use crate::table::Record;

/// `pid` of an item that waits to be scheduled.
pub const PENDING: i32 = -2;
/// `pid` of an item whose worker is being started.
pub const FORK_IN_PROGRESS: i32 = -3;
/// `pid` of an item that is about to be removed.
pub const REMOVED: i32 = -4;

bitflags! {
    /// Bits of `QueueItem::special_flag`.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct SpecialFlags: u32 {
        /// Item retrieves from an FRA directory instead of sending.
        const FETCH_JOB = 1;
        /// Item failed before and is being retried.
        const OLD_ERROR_JOB = 1 << 1;
        /// Item resends data from the archive.
        const RESEND_JOB = 1 << 2;
        /// Item was handed to a running worker on its open connection.
        const BURST_READY = 1 << 3;
        /// Item sits in the host's error queue.
        const IN_ERROR_QUEUE = 1 << 4;
    }
}

/// One queued transfer request.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueItem {
    /// Job directory name below `files/outgoing/`, or the directory id for
    /// fetch jobs.
    pub msg_name: String,
    /// Priority key; the queue is sorted ascending.
    pub msg_number: f64,
    /// Creation time of the job.
    pub creation_time: i64,
    /// Bytes to send.
    pub file_size_to_send: u64,
    /// Files to send.
    pub files_to_send: u32,
    /// Failed attempts so far.
    pub retries: u32,
    /// Worker pid or one of [`PENDING`], [`FORK_IN_PROGRESS`], [`REMOVED`].
    pub pid: i32,
    /// Index into the message cache, or into the FRA for fetch jobs.
    pub pos: i32,
    /// Index of the connection slot while running, `-1` otherwise.
    pub connect_pos: i32,
    /// Job kind bits.
    pub special_flag: SpecialFlags,
    /// Earliest time the item may be scheduled again.
    pub next_retry_time: i64,
}

impl Default for QueueItem {
    fn default() -> Self {
        Self {
            msg_name: String::new(),
            msg_number: 0.0,
            creation_time: 0,
            file_size_to_send: 0,
            files_to_send: 0,
            retries: 0,
            pid: PENDING,
            pos: -1,
            connect_pos: -1,
            special_flag: SpecialFlags::empty(),
            next_retry_time: 0,
        }
    }
}

impl QueueItem {
    /// Returns `true` when the item waits for a worker.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pid == PENDING
    }

    /// Returns `true` when a worker was started (or is being started).
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.pid > 0 || self.pid == FORK_IN_PROGRESS
    }

    /// Returns `true` for fetch jobs.
    #[must_use]
    pub const fn is_fetch(&self) -> bool {
        self.special_flag.contains(SpecialFlags::FETCH_JOB)
    }
}

impl Record for QueueItem {
    const SIZE: usize = 184;
    const VERSION: u8 = 1;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        Self {
            msg_name: fixed_str(&r.bytes::<MAX_MSG_NAME_LENGTH>()),
            msg_number: r.f64(),
            creation_time: r.i64(),
            file_size_to_send: r.u64(),
            files_to_send: r.u32(),
            retries: r.u32(),
            pid: r.i32(),
            pos: r.i32(),
            connect_pos: r.i32(),
            special_flag: SpecialFlags::from_bits_retain(r.u32()),
            next_retry_time: r.i64(),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.bytes(&to_fixed::<MAX_MSG_NAME_LENGTH>(&self.msg_name));
        w.f64(self.msg_number);
        w.i64(self.creation_time);
        w.u64(self.file_size_to_send);
        w.u32(self.files_to_send);
        w.u32(self.retries);
        w.i32(self.pid);
        w.i32(self.pos);
        w.i32(self.connect_pos);
        w.u32(self.special_flag.bits());
        w.i64(self.next_retry_time);
        debug_assert_eq!(w.position(), Self::SIZE);
    }
}
