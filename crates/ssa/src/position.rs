//! Mapping of a single record.
//!
//! Workers only ever touch the row of the host (or directory) they were
//! started for, so they map just that row instead of the whole area. The
//! row may shift when the producer rewrites the area; callers re-verify the
//! row's identity before trusting it.

use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};

use crate::error::{Result, SsaError};
use crate::header::{AFD_WORD_OFFSET, Header};
use crate::table::Record;

/// A read-write mapping of record `index` of a table file.
#[derive(Debug)]
pub struct PositionView<T: Record> {
    file: File,
    map: MmapMut,
    index: usize,
    _record: PhantomData<T>,
}

#[allow(unsafe_code)]
fn map_range(file: &File, path: &Path, offset: u64, len: usize) -> Result<MmapMut> {
    // SAFETY: the range lies inside the file (checked by the caller) and the
    // producer never truncates a file below a length still advertised in its
    // header.
    unsafe { MmapOptions::new().offset(offset).len(len).map_mut(file) }
        .map_err(|source| SsaError::io("mapping record of", path, source))
}

impl<T: Record> PositionView<T> {
    /// Maps record `index` of the table stored at `path`.
    pub fn attach(path: &Path, index: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| SsaError::io("opening", path, source))?;
        let header = read_header(&mut file, path)?;
        if header.is_stale() {
            return Err(SsaError::Stale {
                path: path.to_path_buf(),
            });
        }
        if index >= header.len() {
            return Err(SsaError::OutOfRange {
                index,
                count: header.len(),
            });
        }
        let offset = (AFD_WORD_OFFSET + index * T::SIZE) as u64;
        let map = map_range(&file, path, offset, T::SIZE)?;
        Ok(Self {
            file,
            map,
            index,
            _record: PhantomData,
        })
    }

    /// Index this view was attached at.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Backing file, for region locks.
    #[must_use]
    pub const fn file(&self) -> &File {
        &self.file
    }

    /// Decodes the mapped record.
    #[must_use]
    pub fn get(&self) -> T {
        T::decode(&self.map)
    }

    /// Overwrites the mapped record.
    pub fn set(&mut self, record: &T) {
        record.encode(&mut self.map);
    }
}

fn read_header(file: &mut File, path: &Path) -> Result<Header> {
    use std::io::Read;
    let mut raw = [0_u8; AFD_WORD_OFFSET];
    file.read_exact(&mut raw)
        .map_err(|source| SsaError::io("reading header of", path, source))?;
    Ok(Header::decode(&raw))
}
