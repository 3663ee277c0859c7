//! The common header in front of every mapped area.
//!
//! Layout (native byte order, `AFD_WORD_OFFSET` bytes):
//!
//! | bytes  | field                                   |
//! |--------|-----------------------------------------|
//! | 0..4   | record count (`i32`, [`STALE`] = stale) |
//! | 4..7   | reserved, zero                          |
//! | 7      | format version (`u8`)                   |
//! | 8..12  | reserved, zero                          |
//! | 12..16 | feature flags (`u32`)                   |

use bitflags::bitflags;

/// Size of the header preceding the record array.
pub const AFD_WORD_OFFSET: usize = 16;

/// Count value signalling readers that the area was replaced.
pub const STALE: i32 = -1;

/// Byte offset of the format version.
pub const VERSION_OFFSET: usize = 7;

/// Byte offset of the feature-flag word.
pub const AFD_FEATURE_FLAG_OFFSET_START: usize = 12;

bitflags! {
    /// Feature bits stored in the FSA header.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct FeatureFlags: u32 {
        /// Workers must not archive transmitted files.
        const DISABLE_ARCHIVE = 1;
        /// Workers create missing target directories.
        const ENABLE_CREATE_TARGET_DIR = 1 << 1;
        /// Fetch scheduling is disabled.
        const DISABLE_RETRIEVE = 1 << 2;
        /// Workers only simulate sending.
        const ENABLE_SIMULATE_SEND_MODE = 1 << 3;
        /// Hardware CRC-32 may be used for duplicate detection.
        const ENABLE_HW_CRC32 = 1 << 4;
    }
}

/// Decoded header of a mapped area.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Header {
    /// Number of records, or [`STALE`].
    pub count: i32,
    /// Format version of the records.
    pub version: u8,
    /// Feature flags.
    pub features: FeatureFlags,
}

impl Header {
    /// Header for an empty area of the given version.
    #[must_use]
    pub const fn new(version: u8) -> Self {
        Self {
            count: 0,
            version,
            features: FeatureFlags::empty(),
        }
    }

    /// Returns `true` when the producer marked the area as replaced.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.count == STALE
    }

    /// Record count, treating a stale or negative count as zero.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::try_from(self.count).unwrap_or(0)
    }

    /// Returns `true` when no records are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes a header from the first [`AFD_WORD_OFFSET`] bytes of `buf`.
    ///
    /// Unknown feature bits are preserved.
    #[must_use]
    pub fn decode(buf: &[u8; AFD_WORD_OFFSET]) -> Self {
        let count = i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let features = u32::from_ne_bytes([
            buf[AFD_FEATURE_FLAG_OFFSET_START],
            buf[AFD_FEATURE_FLAG_OFFSET_START + 1],
            buf[AFD_FEATURE_FLAG_OFFSET_START + 2],
            buf[AFD_FEATURE_FLAG_OFFSET_START + 3],
        ]);
        Self {
            count,
            version: buf[VERSION_OFFSET],
            features: FeatureFlags::from_bits_retain(features),
        }
    }

    /// Encodes the header; reserved bytes are written as zero.
    #[must_use]
    pub fn encode(&self) -> [u8; AFD_WORD_OFFSET] {
        let mut buf = [0_u8; AFD_WORD_OFFSET];
        buf[0..4].copy_from_slice(&self.count.to_ne_bytes());
        buf[VERSION_OFFSET] = self.version;
        buf[AFD_FEATURE_FLAG_OFFSET_START..AFD_WORD_OFFSET]
            .copy_from_slice(&self.features.bits().to_ne_bytes());
        buf
    }
}
