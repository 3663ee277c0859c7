//! Typed fixed-stride record arrays on top of [`MappedArea`].

use std::marker::PhantomData;
use std::path::Path;

use crate::area::MappedArea;
use crate::error::{Result, SsaError};
use crate::header::{AFD_WORD_OFFSET, FeatureFlags, Header};

/// A fixed-size record stored in a mapped area.
///
/// `decode` and `encode` receive exactly [`Record::SIZE`] bytes.
pub trait Record: Sized {
    /// Stride of one record in bytes.
    const SIZE: usize;
    /// Format version written into the area header.
    const VERSION: u8;

    /// Decodes one record.
    fn decode(buf: &[u8]) -> Self;

    /// Encodes one record, overwriting every byte of `buf`.
    fn encode(&self, buf: &mut [u8]);
}

/// An array of `T` records whose length is the header count.
///
/// Capacity grows in blocks of `step` records.
#[derive(Debug)]
pub struct Table<T: Record> {
    area: MappedArea,
    step: usize,
    _record: PhantomData<T>,
}

impl<T: Record> Table<T> {
    /// Creates an empty table at `path` with room for `step` records.
    pub fn create(path: &Path, step: usize) -> Result<Self> {
        let step = step.max(1);
        let area = MappedArea::create(path, Header::new(T::VERSION), step * T::SIZE)?;
        Ok(Self {
            area,
            step,
            _record: PhantomData,
        })
    }

    /// Attaches an existing table, validating version, staleness and length.
    pub fn attach(path: &Path, step: usize) -> Result<Self> {
        Self::from_area(MappedArea::attach(path)?, step)
    }

    /// Attaches `path` if it exists, otherwise creates it.
    pub fn open_or_create(path: &Path, step: usize) -> Result<Self> {
        if path.exists() {
            Self::attach(path, step)
        } else {
            Self::create(path, step)
        }
    }

    /// Wraps an already mapped area.
    pub fn from_area(area: MappedArea, step: usize) -> Result<Self> {
        let header = area.header();
        if header.is_stale() {
            return Err(SsaError::Stale {
                path: area.path().to_path_buf(),
            });
        }
        if header.version != T::VERSION {
            return Err(SsaError::VersionMismatch {
                path: area.path().to_path_buf(),
                found: header.version,
                current: T::VERSION,
            });
        }
        let needed = header.len() * T::SIZE;
        if area.data_len() < needed {
            return Err(SsaError::Truncated {
                path: area.path().to_path_buf(),
                len: (AFD_WORD_OFFSET + area.data_len()) as u64,
                needed: (AFD_WORD_OFFSET + needed) as u64,
            });
        }
        Ok(Self {
            area,
            step: step.max(1),
            _record: PhantomData,
        })
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.area.header().len()
    }

    /// Returns `true` when the table holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records that fit without resizing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.area.data_len() / T::SIZE
    }

    /// Returns `true` when the producer marked the file as replaced.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.area.header().is_stale()
    }

    /// Header feature flags.
    #[must_use]
    pub fn features(&self) -> FeatureFlags {
        self.area.header().features
    }

    /// Replaces the header feature flags.
    pub fn set_features(&mut self, features: FeatureFlags) {
        let mut header = self.area.header();
        header.features = features;
        self.area.set_header(header);
    }

    /// Underlying mapped area.
    #[must_use]
    pub const fn area(&self) -> &MappedArea {
        &self.area
    }

    /// Mutable underlying mapped area.
    pub fn area_mut(&mut self) -> &mut MappedArea {
        &mut self.area
    }

    /// Absolute file offset of record `index`.
    #[must_use]
    pub const fn record_offset(index: usize) -> u64 {
        (AFD_WORD_OFFSET + index * T::SIZE) as u64
    }

    fn check(&self, index: usize) -> Result<()> {
        let count = self.len();
        if index < count {
            Ok(())
        } else {
            Err(SsaError::OutOfRange { index, count })
        }
    }

    pub(crate) fn bytes(&self, index: usize) -> Result<&[u8]> {
        self.check(index)?;
        let start = index * T::SIZE;
        Ok(&self.area.data()[start..start + T::SIZE])
    }

    pub(crate) fn bytes_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        self.check(index)?;
        let start = index * T::SIZE;
        Ok(&mut self.area.data_mut()[start..start + T::SIZE])
    }

    /// Decodes record `index`.
    pub fn get(&self, index: usize) -> Result<T> {
        self.bytes(index).map(T::decode)
    }

    /// Overwrites record `index`.
    pub fn set(&mut self, index: usize, record: &T) -> Result<()> {
        record.encode(self.bytes_mut(index)?);
        Ok(())
    }

    /// Decodes, modifies and re-encodes record `index`.
    pub fn update<R>(&mut self, index: usize, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut record = self.get(index)?;
        let out = f(&mut record);
        self.set(index, &record)?;
        Ok(out)
    }

    fn reserve_one(&mut self) -> Result<()> {
        let len = self.len();
        if len < self.capacity() {
            return Ok(());
        }
        let blocks = len / self.step + 1;
        self.area.resize(blocks * self.step * T::SIZE)
    }

    /// Appends a record and returns its index.
    pub fn push(&mut self, record: &T) -> Result<usize> {
        self.reserve_one()?;
        let index = self.len();
        self.area.set_count((index + 1) as i32);
        self.set(index, record)?;
        Ok(index)
    }

    /// Inserts a record at `index`, shifting later records up by one.
    pub fn insert(&mut self, index: usize, record: &T) -> Result<()> {
        let len = self.len();
        if index > len {
            return Err(SsaError::OutOfRange { index, count: len });
        }
        self.reserve_one()?;
        let data = self.area.data_mut();
        data.copy_within(index * T::SIZE..len * T::SIZE, (index + 1) * T::SIZE);
        self.area.set_count((len + 1) as i32);
        self.set(index, record)
    }

    /// Removes record `index`, shifting later records down by one.
    ///
    /// The freed tail record is zeroed.
    pub fn remove(&mut self, index: usize) -> Result<T> {
        let record = self.get(index)?;
        let len = self.len();
        let data = self.area.data_mut();
        data.copy_within((index + 1) * T::SIZE..len * T::SIZE, index * T::SIZE);
        data[(len - 1) * T::SIZE..len * T::SIZE].fill(0);
        self.area.set_count((len - 1) as i32);
        Ok(record)
    }

    /// Removes every record for which `keep` returns `false`.
    ///
    /// Returns the removed records in their original order.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> Result<Vec<T>> {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.len() {
            let record = self.get(index)?;
            if keep(&record) {
                index += 1;
            } else {
                removed.push(self.remove(index)?);
            }
        }
        Ok(removed)
    }

    /// Removes all records.
    pub fn clear(&mut self) {
        let len = self.len();
        self.area.data_mut()[..len * T::SIZE].fill(0);
        self.area.set_count(0);
    }

    /// Iterates over decoded records.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        let data = self.area.data();
        (0..self.len()).map(move |i| T::decode(&data[i * T::SIZE..(i + 1) * T::SIZE]))
    }

    /// Index of the first record matching `pred`.
    pub fn position(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.iter().position(|record| pred(&record))
    }

    /// Flushes the mapping.
    pub fn flush(&self) -> Result<()> {
        self.area.flush()
    }
}
