//! Message cache records: the compiled destination of one job id.

use crate::codec::{FieldReader, FieldWriter, fixed_str, to_fixed};
use crate::fsa::HOST_ALIAS_FIELD;
use crate::table::Record;

/// Smallest allowed ageing weight.
pub const MIN_AGEING_VALUE: i32 = 0;
/// Largest allowed ageing weight.
pub const MAX_AGEING_VALUE: i32 = 9;
/// Ageing weight used when a message file does not set one.
pub const DEFAULT_AGEING: i32 = 5;

/// `in_current_fsa` value: the host is present in the attached FSA.
pub const YES: u8 = 1;
/// `in_current_fsa` value: the host is not in the attached FSA.
pub const NO: u8 = 0;

/// Current message cache entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MsgCacheEntry {
    /// Host alias of the recipient.
    pub host_name: String,
    /// Index of the host in the FSA, `-1` if unresolved.
    pub fsa_pos: i32,
    /// Port from the recipient URL, `-1` for the protocol default.
    pub port: i32,
    /// Job id.
    pub job_id: u32,
    /// Seconds after which queued data is discarded, 0 = never.
    pub age_limit: u32,
    /// Scheduling weight.
    pub ageing: i32,
    /// Protocol code of the recipient.
    pub kind: u8,
    /// [`YES`] or [`NO`].
    pub in_current_fsa: u8,
    /// Modification time of the message file when it was loaded.
    pub msg_time: i64,
    /// Time of the last transfer of this job.
    pub last_transfer_time: i64,
}

impl Record for MsgCacheEntry {
    const SIZE: usize = 56;
    const VERSION: u8 = 1;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        let host_name = fixed_str(&r.bytes::<HOST_ALIAS_FIELD>());
        let fsa_pos = r.i32();
        let port = r.i32();
        let job_id = r.u32();
        let age_limit = r.u32();
        let ageing = r.i32();
        let kind = r.u8();
        let in_current_fsa = r.u8();
        r.skip(2);
        Self {
            host_name,
            fsa_pos,
            port,
            job_id,
            age_limit,
            ageing,
            kind,
            in_current_fsa,
            msg_time: r.i64(),
            last_transfer_time: r.i64(),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.bytes(&to_fixed::<HOST_ALIAS_FIELD>(&self.host_name));
        w.i32(self.fsa_pos);
        w.i32(self.port);
        w.u32(self.job_id);
        w.u32(self.age_limit);
        w.i32(self.ageing);
        w.u8(self.kind);
        w.u8(self.in_current_fsa);
        w.zero(2);
        w.i64(self.msg_time);
        w.i64(self.last_transfer_time);
        debug_assert_eq!(w.position(), Self::SIZE);
    }
}

/// Message cache entry as written before ageing existed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MsgCacheEntryV0 {
    /// Host alias of the recipient.
    pub host_name: String,
    /// Index of the host in the FSA.
    pub fsa_pos: i32,
    /// Port from the recipient URL.
    pub port: i32,
    /// Job id.
    pub job_id: u32,
    /// Seconds after which queued data is discarded.
    pub age_limit: u32,
    /// Protocol code of the recipient.
    pub kind: u8,
    /// [`YES`] or [`NO`].
    pub in_current_fsa: u8,
    /// Modification time of the message file.
    pub msg_time: i64,
    /// Time of the last transfer.
    pub last_transfer_time: i64,
}

impl Record for MsgCacheEntryV0 {
    const SIZE: usize = 52;
    const VERSION: u8 = 0;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        let host_name = fixed_str(&r.bytes::<HOST_ALIAS_FIELD>());
        let fsa_pos = r.i32();
        let port = r.i32();
        let job_id = r.u32();
        let age_limit = r.u32();
        let kind = r.u8();
        let in_current_fsa = r.u8();
        r.skip(2);
        Self {
            host_name,
            fsa_pos,
            port,
            job_id,
            age_limit,
            kind,
            in_current_fsa,
            msg_time: r.i64(),
            last_transfer_time: r.i64(),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.bytes(&to_fixed::<HOST_ALIAS_FIELD>(&self.host_name));
        w.i32(self.fsa_pos);
        w.i32(self.port);
        w.u32(self.job_id);
        w.u32(self.age_limit);
        w.u8(self.kind);
        w.u8(self.in_current_fsa);
        w.zero(2);
        w.i64(self.msg_time);
        w.i64(self.last_transfer_time);
        debug_assert_eq!(w.position(), Self::SIZE);
    }
}

impl MsgCacheEntryV0 {
    /// Converts to the current layout with the given ageing weight.
    #[must_use]
    pub fn upgrade(self, ageing: i32) -> MsgCacheEntry {
        MsgCacheEntry {
            host_name: self.host_name,
            fsa_pos: self.fsa_pos,
            port: self.port,
            job_id: self.job_id,
            age_limit: self.age_limit,
            ageing,
            kind: self.kind,
            in_current_fsa: self.in_current_fsa,
            msg_time: self.msg_time,
            last_transfer_time: self.last_transfer_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_keeps_v0_fields() {
        let old = MsgCacheEntryV0 {
            host_name: "alpha".to_string(),
            fsa_pos: 3,
            port: 21,
            job_id: 0xf,
            age_limit: 60,
            kind: 1,
            in_current_fsa: YES,
            msg_time: 100,
            last_transfer_time: 200,
        };
        let new = old.clone().upgrade(DEFAULT_AGEING);
        assert_eq!(new.host_name, old.host_name);
        assert_eq!(new.job_id, old.job_id);
        assert_eq!(new.ageing, DEFAULT_AGEING);
        assert_eq!(new.last_transfer_time, 200);

        let mut buf = [0_u8; MsgCacheEntry::SIZE];
        new.encode(&mut buf);
        assert_eq!(MsgCacheEntry::decode(&buf), new);
    }
}
