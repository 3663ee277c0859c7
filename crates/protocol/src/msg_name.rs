//! Message names.
//!
//! A message name identifies one job directory below `files/outgoing/`:
//!
//! ```text
//! <fs_id>/<job_id>/<dir_no>/<creation_time>_<unique_number>_<split_job_counter>
//! ```
//!
//! Every token is lower-case hexadecimal. The job id names the message file
//! that describes the recipient; the creation time is seconds since the
//! epoch.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Longest message name that fits the fixed-size record fields.
pub const MAX_MSG_NAME_LENGTH: usize = 127;

/// A parsed message name.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct MsgName {
    /// Filesystem id of the outgoing directory.
    pub fs_id: u32,
    /// Job id; names the message file.
    pub job_id: u32,
    /// Sub-directory number used to spread job directories.
    pub dir_no: u32,
    /// Creation time in seconds.
    pub creation_time: i64,
    /// Disambiguates jobs created in the same second.
    pub unique_number: u32,
    /// Counter for jobs split from one source burst.
    pub split_job_counter: u32,
}

fn is_hex(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_hexdigit())
}

fn hex_u32(name: &str, token: &str, what: &'static str) -> Result<u32, ProtocolError> {
    if !is_hex(token) {
        return Err(malformed(name, what));
    }
    u32::from_str_radix(token, 16).map_err(|_| malformed(name, what))
}

fn malformed(name: &str, reason: &'static str) -> ProtocolError {
    ProtocolError::MalformedMsgName {
        name: name.to_string(),
        reason,
    }
}

impl MsgName {
    /// Parses and validates a message name.
    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        if name.is_empty() {
            return Err(malformed(name, "empty"));
        }
        if name.len() > MAX_MSG_NAME_LENGTH {
            return Err(malformed(name, "too long"));
        }
        let mut parts = name.split('/');
        let fs_id = hex_u32(name, parts.next().unwrap_or_default(), "bad filesystem id")?;
        let job_id = hex_u32(
            name,
            parts.next().ok_or_else(|| malformed(name, "missing job id"))?,
            "bad job id",
        )?;
        let dir_no = hex_u32(
            name,
            parts.next().ok_or_else(|| malformed(name, "missing directory number"))?,
            "bad directory number",
        )?;
        let tail = parts
            .next()
            .ok_or_else(|| malformed(name, "missing time segment"))?;
        if parts.next().is_some() {
            return Err(malformed(name, "too many segments"));
        }

        let mut fields = tail.split('_');
        let time = fields.next().unwrap_or_default();
        let unique = fields
            .next()
            .ok_or_else(|| malformed(name, "missing unique number"))?;
        let split = fields
            .next()
            .ok_or_else(|| malformed(name, "missing split counter"))?;
        if fields.next().is_some() {
            return Err(malformed(name, "too many time fields"));
        }
        if !is_hex(time) {
            return Err(malformed(name, "bad creation time"));
        }
        let creation_time =
            i64::from_str_radix(time, 16).map_err(|_| malformed(name, "bad creation time"))?;

        Ok(Self {
            fs_id,
            job_id,
            dir_no,
            creation_time,
            unique_number: hex_u32(name, unique, "bad unique number")?,
            split_job_counter: hex_u32(name, split, "bad split counter")?,
        })
    }

    /// Name of the message file for this job (`msg/<job_id hex>`).
    #[must_use]
    pub fn message_file_name(&self) -> String {
        format!("{:x}", self.job_id)
    }

    /// The `<creation_time>_<unique_number>_<split_job_counter>` segment.
    #[must_use]
    pub fn unique_segment(&self) -> String {
        format!(
            "{:x}_{:x}_{:x}",
            self.creation_time, self.unique_number, self.split_job_counter
        )
    }
}

impl fmt::Display for MsgName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}/{:x}/{:x}/{}",
            self.fs_id,
            self.job_id,
            self.dir_no,
            self.unique_segment()
        )
    }
}

impl FromStr for MsgName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parses the message name of a fetch job, which is just the directory id.
pub fn parse_fetch_name(name: &str) -> Result<u32, ProtocolError> {
    if name.is_empty() || name.contains('/') {
        return Err(malformed(name, "fetch job name must be a bare directory id"));
    }
    hex_u32(name, name, "bad directory id")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_segments() {
        let name = MsgName::parse("0/f/3/5f3a_1_0").expect("valid");
        assert_eq!(name.fs_id, 0);
        assert_eq!(name.job_id, 0xf);
        assert_eq!(name.dir_no, 3);
        assert_eq!(name.creation_time, 0x5f3a);
        assert_eq!(name.unique_number, 1);
        assert_eq!(name.split_job_counter, 0);
        assert_eq!(name.message_file_name(), "f");
        assert_eq!(name.to_string(), "0/f/3/5f3a_1_0");
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in [
            "",
            "0/f/3",
            "0/f/3/5f3a_1",
            "0/f/3/5f3a_1_0_9",
            "0/f/3/5f3a_1_0/x",
            "0/zz/3/5f3a_1_0",
            "0/f/3/_1_0",
            "0//3/5f3a_1_0",
            "0/+f/3/5f3a_1_0",
            "0/f/3/-5f3a_1_0",
        ] {
            assert!(MsgName::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let long = format!("0/f/3/{}_1_0", "a".repeat(130));
        assert!(matches!(
            MsgName::parse(&long),
            Err(ProtocolError::MalformedMsgName { reason: "too long", .. })
        ));
    }

    #[test]
    fn fetch_names_are_directory_ids() {
        assert_eq!(parse_fetch_name("1a").expect("valid"), 0x1a);
        assert!(parse_fetch_name("0/1").is_err());
        assert!(parse_fetch_name("").is_err());
    }

    proptest::proptest! {
        #[test]
        fn display_parses_back(
            fs_id in 0u32..16,
            job_id: u32,
            dir_no in 0u32..4096,
            creation_time in 0i64..0xffff_ffff,
            unique_number: u32,
            split_job_counter in 0u32..256,
        ) {
            let name = MsgName { fs_id, job_id, dir_no, creation_time, unique_number, split_job_counter };
            proptest::prop_assert_eq!(MsgName::parse(&name.to_string()).expect("valid"), name);
        }
    }
}
