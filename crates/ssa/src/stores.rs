//! Interned lookup tables written by AMG and shared read-mostly with FD.
//!
//! FD only ever removes entries from these tables, and only when no job id
//! references them any more.

use crate::codec::{FieldReader, FieldWriter, fixed_str, to_fixed};
use crate::fsa::HOST_ALIAS_FIELD;
use crate::fra::MAX_RECIPIENT_LENGTH;
use crate::table::Record;

/// Stored width of a directory path.
pub const MAX_PATH_LENGTH: usize = 256;
/// Stored width of a `user@host` key.
pub const MAX_USER_HOST_LENGTH: usize = 128;
/// Stored width of a scrambled password.
pub const MAX_PASSWD_LENGTH: usize = 64;
/// Stored width of a job's option block.
pub const MAX_OPTION_LENGTH: usize = 256;

/// One compiled job: source directory, file masks and recipient.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobIdEntry {
    /// Job id; names the message file.
    pub job_id: u32,
    /// Source directory id.
    pub dir_id: u32,
    /// Index of the source directory in the directory name table.
    pub dir_id_pos: i32,
    /// File mask id.
    pub file_mask_id: u32,
    /// Id of the DIR_CONFIG that defined the job.
    pub dir_config_id: u32,
    /// Id of the recipient host.
    pub host_id: u32,
    /// Priority character, `'0'..='9'`.
    pub priority: u8,
    /// Host alias of the recipient.
    pub host_alias: String,
    /// Recipient URL.
    pub recipient: String,
    /// Standard options, one per line.
    pub options: String,
}

impl Record for JobIdEntry {
    const SIZE: usize = 28 + HOST_ALIAS_FIELD + MAX_RECIPIENT_LENGTH + MAX_OPTION_LENGTH;
    const VERSION: u8 = 1;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        let job_id = r.u32();
        let dir_id = r.u32();
        let dir_id_pos = r.i32();
        let file_mask_id = r.u32();
        let dir_config_id = r.u32();
        let host_id = r.u32();
        let priority = r.u8();
        r.skip(3);
        Self {
            job_id,
            dir_id,
            dir_id_pos,
            file_mask_id,
            dir_config_id,
            host_id,
            priority,
            host_alias: fixed_str(&r.bytes::<HOST_ALIAS_FIELD>()),
            recipient: fixed_str(&r.bytes::<MAX_RECIPIENT_LENGTH>()),
            options: fixed_str(&r.bytes::<MAX_OPTION_LENGTH>()),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.u32(self.job_id);
        w.u32(self.dir_id);
        w.i32(self.dir_id_pos);
        w.u32(self.file_mask_id);
        w.u32(self.dir_config_id);
        w.u32(self.host_id);
        w.u8(self.priority);
        w.zero(3);
        w.bytes(&to_fixed::<HOST_ALIAS_FIELD>(&self.host_alias));
        w.bytes(&to_fixed::<MAX_RECIPIENT_LENGTH>(&self.recipient));
        w.bytes(&to_fixed::<MAX_OPTION_LENGTH>(&self.options));
    }
}

/// A source directory path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirNameEntry {
    /// Directory id.
    pub dir_id: u32,
    /// Directory path as configured.
    pub orig_dir_name: String,
}

impl Record for DirNameEntry {
    const SIZE: usize = 4 + MAX_PATH_LENGTH;
    const VERSION: u8 = 1;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        Self {
            dir_id: r.u32(),
            orig_dir_name: fixed_str(&r.bytes::<MAX_PATH_LENGTH>()),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.u32(self.dir_id);
        w.bytes(&to_fixed::<MAX_PATH_LENGTH>(&self.orig_dir_name));
    }
}

/// A set of file masks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileMaskEntry {
    /// File mask id.
    pub file_mask_id: u32,
    /// Number of masks.
    pub nfm: i32,
    /// Masks separated by newlines.
    pub masks: String,
}

impl Record for FileMaskEntry {
    const SIZE: usize = 8 + MAX_PATH_LENGTH;
    const VERSION: u8 = 1;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        Self {
            file_mask_id: r.u32(),
            nfm: r.i32(),
            masks: fixed_str(&r.bytes::<MAX_PATH_LENGTH>()),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.u32(self.file_mask_id);
        w.i32(self.nfm);
        w.bytes(&to_fixed::<MAX_PATH_LENGTH>(&self.masks));
    }
}

/// A password keyed by `user@host`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswdEntry {
    /// `user@host` key.
    pub uh_name: String,
    /// Scrambled password bytes.
    pub passwd: [u8; MAX_PASSWD_LENGTH],
}

impl Default for PasswdEntry {
    fn default() -> Self {
        Self {
            uh_name: String::new(),
            passwd: [0; MAX_PASSWD_LENGTH],
        }
    }
}

impl Record for PasswdEntry {
    const SIZE: usize = MAX_USER_HOST_LENGTH + MAX_PASSWD_LENGTH;
    const VERSION: u8 = 1;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        Self {
            uh_name: fixed_str(&r.bytes::<MAX_USER_HOST_LENGTH>()),
            passwd: r.bytes(),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.bytes(&to_fixed::<MAX_USER_HOST_LENGTH>(&self.uh_name));
        w.bytes(&self.passwd);
    }
}

/// A DIR_CONFIG file known to AMG.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirConfigEntry {
    /// DIR_CONFIG id.
    pub dc_id: u32,
    /// Path of the DIR_CONFIG file.
    pub dir_config_file: String,
}

impl Record for DirConfigEntry {
    const SIZE: usize = 4 + MAX_PATH_LENGTH;
    const VERSION: u8 = 1;

    fn decode(buf: &[u8]) -> Self {
        let mut r = FieldReader::new(buf);
        Self {
            dc_id: r.u32(),
            dir_config_file: fixed_str(&r.bytes::<MAX_PATH_LENGTH>()),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        let mut w = FieldWriter::new(buf);
        w.u32(self.dc_id);
        w.bytes(&to_fixed::<MAX_PATH_LENGTH>(&self.dir_config_file));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_entry_round_trip() {
        let entry = JobIdEntry {
            job_id: 0xf,
            dir_id: 3,
            dir_id_pos: 0,
            file_mask_id: 7,
            dir_config_id: 1,
            host_id: 99,
            priority: b'5',
            host_alias: "alpha".to_string(),
            recipient: "ftp://u@h/x".to_string(),
            options: "archive 1\nage-limit 60".to_string(),
        };
        let mut buf = vec![0_u8; JobIdEntry::SIZE];
        entry.encode(&mut buf);
        assert_eq!(JobIdEntry::decode(&buf), entry);
    }

    #[test]
    fn passwd_entry_round_trip() {
        let mut passwd = [0_u8; MAX_PASSWD_LENGTH];
        passwd[..3].copy_from_slice(b"xyz");
        let entry = PasswdEntry {
            uh_name: "u@h".to_string(),
            passwd,
        };
        let mut buf = vec![0_u8; PasswdEntry::SIZE];
        entry.encode(&mut buf);
        assert_eq!(PasswdEntry::decode(&buf), entry);
    }

    #[test]
    fn default_passwd_entry_is_blank() {
        let entry = PasswdEntry::default();
        assert!(entry.uh_name.is_empty());
        assert_eq!(entry.passwd, [0_u8; MAX_PASSWD_LENGTH]);
        let mut buf = vec![0xff_u8; PasswdEntry::SIZE];
        entry.encode(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
