//! Global status shared by all AFD processes.

use bitflags::bitflags;

use crate::codec::{FieldReader, FieldWriter};
use crate::table::Record;

bitflags! {
    /// Bits of `AfdStatus::amg_jobs`.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct AmgJobs: u32 {
        /// AMG is rewriting the host/directory configuration.
        const REREADING_DIR_CONFIG = 1;
        /// FD waits for AMG to finish rereading.
        const FD_WAITING = 1 << 1;
        /// AMG is writing the FSA.
        const WRITTING_JID_STRUCT = 1 << 2;
        /// FD has to check the FSA entries.
        const CHECK_FSA_ENTRIES = 1 << 3;
    }
}

/// The single record of `afd.status`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AfdStatus {
    /// Workers currently running.
    pub no_of_transfers: i32,
    /// AMG/FD coordination bits.
    pub amg_jobs: AmgJobs,
    /// Workers started since FD start.
    pub fd_fork_counter: u32,
    /// Jobs handed over on open connections since FD start.
    pub burst2_counter: u32,
    /// Longest queue seen.
    pub max_queue_length: u32,
    /// Items currently queued.
    pub jobs_in_queue: u32,
    /// FD start time.
    pub start_time: i64,
    /// Pid of the running FD.
    pub fd_pid: i32,
}

impl Record for AfdStatus {
    const SIZE: usize = 40;
    const VERSION: u8 = 1;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        Self {
            no_of_transfers: r.i32(),
            amg_jobs: AmgJobs::from_bits_retain(r.u32()),
            fd_fork_counter: r.u32(),
            burst2_counter: r.u32(),
            max_queue_length: r.u32(),
            jobs_in_queue: r.u32(),
            start_time: r.i64(),
            fd_pid: r.i32(),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.i32(self.no_of_transfers);
        w.u32(self.amg_jobs.bits());
        w.u32(self.fd_fork_counter);
        w.u32(self.burst2_counter);
        w.u32(self.max_queue_length);
        w.u32(self.jobs_in_queue);
        w.i64(self.start_time);
        w.i32(self.fd_pid);
        w.zero(4);
    }
}
