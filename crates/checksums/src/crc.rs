use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUFFER: usize = 64 * 1024;

/// Returns `true` when the CPU offers the instructions `crc32fast` uses for
/// its accelerated path.
#[must_use]
pub fn hw_crc32_available() -> bool {
    hw_available_arch()
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline]
fn hw_available_arch() -> bool {
    is_x86_feature_detected!("pclmulqdq")
        && is_x86_feature_detected!("sse4.1")
}

#[cfg(target_arch = "aarch64")]
#[inline]
fn hw_available_arch() -> bool {
    is_aarch64_feature_detected!("crc")
}

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86", target_arch = "x86_64")))]
#[inline]
fn hw_available_arch() -> bool {
    false
}

/// Incremental CRC-32.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    /// Starts a new checksum.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Returns the checksum.
    #[must_use]
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32").finish_non_exhaustive()
    }
}

/// CRC-32 of a byte slice.
#[must_use]
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// CRC-32 of a file name.
#[must_use]
pub fn name_crc(name: &str) -> u32 {
    crc32(name.as_bytes())
}

/// CRC-32 of a file name followed by its size in native byte order.
#[must_use]
pub fn name_size_crc(name: &str, size: u64) -> u32 {
    let mut crc = Crc32::new();
    crc.update(name.as_bytes());
    crc.update(&size.to_ne_bytes());
    crc.finalize()
}

/// CRC-32 of a file's content.
pub fn file_crc(path: &Path) -> io::Result<u32> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0_u8; READ_BUFFER];
    let mut crc = Crc32::new();
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => crc.update(&buffer[..n]),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(crc.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut crc = Crc32::new();
        crc.update(b"1234");
        crc.update(b"56789");
        assert_eq!(crc.finalize(), crc32(b"123456789"));
    }

    #[test]
    fn name_and_size_both_matter() {
        assert_eq!(name_crc("a"), crc32(b"a"));
        assert_ne!(name_size_crc("a", 1), name_size_crc("b", 1));
        assert_ne!(name_size_crc("a", 1), name_size_crc("a", 2));
    }

    #[test]
    fn file_checksum_covers_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data");
        let content: Vec<u8> = (0..200_000_u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).expect("write");
        assert_eq!(file_crc(&path).expect("crc"), crc32(&content));
        assert!(file_crc(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn detection_does_not_panic() {
        let _ = hw_crc32_available();
    }

    proptest::proptest! {
        #[test]
        fn split_point_does_not_matter(data: Vec<u8>, split in 0usize..512) {
            let split = split.min(data.len());
            let mut crc = Crc32::new();
            crc.update(&data[..split]);
            crc.update(&data[split..]);
            proptest::prop_assert_eq!(crc.finalize(), crc32(&data));
        }
    }
}
