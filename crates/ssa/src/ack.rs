//! Burst acknowledgment queue records.

use crate::codec::{FieldReader, FieldWriter, fixed_str, to_fixed};
use crate::fsa::MAX_MSG_NAME_LENGTH;
use crate::table::Record;

/// A job handed to a running worker that has not yet confirmed it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AckEntry {
    /// Message name of the handed-over job.
    pub msg_name: String,
    /// Worker the job was handed to.
    pub pid: i32,
    /// Host row of the worker.
    pub fsa_pos: i32,
    /// Job slot of the worker.
    pub job_no: i32,
    /// Job id of the handed-over job.
    pub job_id: u32,
    /// When the hand-over happened.
    pub insert_time: i64,
}

impl Record for AckEntry {
    const SIZE: usize = 152;
    const VERSION: u8 = 0;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        Self {
            msg_name: fixed_str(&r.bytes::<MAX_MSG_NAME_LENGTH>()),
            pid: r.i32(),
            fsa_pos: r.i32(),
            job_no: r.i32(),
            job_id: r.u32(),
            insert_time: r.i64(),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.bytes(&to_fixed::<MAX_MSG_NAME_LENGTH>(&self.msg_name));
        w.i32(self.pid);
        w.i32(self.fsa_pos);
        w.i32(self.job_no);
        w.u32(self.job_id);
        w.i64(self.insert_time);
    }
}
