//! A header-prefixed file mapped read-write into this process.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use platform::RegionGuard;

use crate::error::{Result, SsaError};
use crate::header::{AFD_WORD_OFFSET, Header, STALE};

/// Header byte locked while an area is being resized.
pub const LOCK_RESIZE: u64 = 4;

/// A mapped area: the [`Header`] followed by an untyped data region.
///
/// The mapping is shared (`MAP_SHARED`), so stores are visible to every
/// process that maps the same file.
#[derive(Debug)]
pub struct MappedArea {
    path: PathBuf,
    file: File,
    map: MmapMut,
}

#[allow(unsafe_code)]
fn map_file(file: &File, path: &Path) -> Result<MmapMut> {
    // SAFETY: cooperating processes only modify the file through the
    // region-lock protocol and never truncate it below a length that is
    // still advertised by the header.
    unsafe { MmapMut::map_mut(file) }.map_err(|source| SsaError::io("mapping", path, source))
}

impl MappedArea {
    /// Creates (or truncates) `path` with `header` and `data_len` zeroed
    /// bytes of record space.
    pub fn create(path: &Path, header: Header, data_len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| SsaError::io("creating", path, source))?;
        file.set_len((AFD_WORD_OFFSET + data_len) as u64)
            .map_err(|source| SsaError::io("sizing", path, source))?;
        let mut map = map_file(&file, path)?;
        map[..AFD_WORD_OFFSET].copy_from_slice(&header.encode());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
        })
    }

    /// Maps an existing file.
    ///
    /// Fails with [`SsaError::Truncated`] when the file cannot even hold a
    /// header. Version and staleness checks are left to the typed views.
    pub fn attach(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| SsaError::io("opening", path, source))?;
        let len = file
            .metadata()
            .map_err(|source| SsaError::io("inspecting", path, source))?
            .len();
        if len < AFD_WORD_OFFSET as u64 {
            return Err(SsaError::Truncated {
                path: path.to_path_buf(),
                len,
                needed: AFD_WORD_OFFSET as u64,
            });
        }
        let map = map_file(&file, path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backing file, used as the target of region locks.
    #[must_use]
    pub const fn file(&self) -> &File {
        &self.file
    }

    /// Decodes the current header.
    #[must_use]
    pub fn header(&self) -> Header {
        let mut raw = [0_u8; AFD_WORD_OFFSET];
        raw.copy_from_slice(&self.map[..AFD_WORD_OFFSET]);
        Header::decode(&raw)
    }

    /// Overwrites the header.
    pub fn set_header(&mut self, header: Header) {
        self.map[..AFD_WORD_OFFSET].copy_from_slice(&header.encode());
    }

    /// Overwrites only the record count.
    pub fn set_count(&mut self, count: i32) {
        self.map[..4].copy_from_slice(&count.to_ne_bytes());
    }

    /// Tells every attached reader that this file has been replaced.
    pub fn mark_stale(&mut self) {
        self.set_count(STALE);
    }

    /// Length of the data region in bytes.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.map.len() - AFD_WORD_OFFSET
    }

    /// Data region following the header.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.map[AFD_WORD_OFFSET..]
    }

    /// Mutable data region following the header.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.map[AFD_WORD_OFFSET..]
    }

    /// Grows or shrinks the data region, preserving the header and the
    /// leading `min(old, new)` bytes of data.
    ///
    /// Holds the [`LOCK_RESIZE`] byte for the duration of the remap.
    pub fn resize(&mut self, data_len: usize) -> Result<()> {
        let _guard = RegionGuard::acquire(&self.file, LOCK_RESIZE)?;
        self.map
            .flush()
            .map_err(|source| SsaError::io("flushing", &self.path, source))?;
        self.file
            .set_len((AFD_WORD_OFFSET + data_len) as u64)
            .map_err(|source| SsaError::io("resizing", &self.path, source))?;
        self.map = map_file(&self.file, &self.path)?;
        tracing::trace!(path = %self.path.display(), data_len, "resized mapped area");
        Ok(())
    }

    /// Flushes dirty pages to the backing file.
    pub fn flush(&self) -> Result<()> {
        self.map
            .flush()
            .map_err(|source| SsaError::io("flushing", &self.path, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_attach_preserves_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("area");
        let mut header = Header::new(2);
        header.count = 5;
        MappedArea::create(&path, header, 64).expect("create");

        let area = MappedArea::attach(&path).expect("attach");
        assert_eq!(area.header(), header);
        assert_eq!(area.data_len(), 64);
    }

    #[test]
    fn resize_keeps_leading_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("area");
        let mut area = MappedArea::create(&path, Header::new(0), 8).expect("create");
        area.data_mut().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        area.resize(32).expect("grow");
        assert_eq!(&area.data()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(area.data()[8..].iter().all(|&b| b == 0));
        area.resize(4).expect("shrink");
        assert_eq!(area.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn zero_length_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").expect("write");
        let error = MappedArea::attach(&path).expect_err("must fail");
        assert!(matches!(error, SsaError::Truncated { len: 0, .. }));
    }

    #[test]
    fn mark_stale_is_visible_to_other_mappings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("area");
        let mut writer = MappedArea::create(&path, Header::new(1), 16).expect("create");
        let reader = MappedArea::attach(&path).expect("attach");
        writer.mark_stale();
        assert!(reader.header().is_stale());
    }
}
