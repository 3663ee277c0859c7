//! Status areas that are replaced wholesale by their producer.
//!
//! AMG never edits the FSA or FRA in place when the host or directory
//! configuration changes. It writes a new `<prefix>.<id+1>` file, stores the
//! new id in the id file and sets the count of the old file to
//! [`STALE`](crate::header::STALE). Consumers notice the stale count and
//! re-attach through the id file.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::header::FeatureFlags;
use crate::names::{generation_path, read_id, write_id};
use crate::position::PositionView;
use crate::table::{Record, Table};

/// Naming of a generation-numbered area.
pub trait Generation {
    /// File name prefix of the area.
    const PREFIX: &'static str;
    /// Name of the id file.
    const ID_FILE: &'static str;
}

/// A generation-numbered table such as the FSA or FRA.
#[derive(Debug)]
pub struct StatusArea<T: Record + Generation> {
    table: Table<T>,
    id: i32,
    fifodir: PathBuf,
}

impl<T: Record + Generation> StatusArea<T> {
    /// Creates generation `id` holding `records` and points the id file at it.
    pub fn create(fifodir: &Path, id: i32, records: &[T]) -> Result<Self> {
        let path = generation_path(fifodir, T::PREFIX, id);
        let mut table = Table::create(&path, records.len().max(1))?;
        for record in records {
            table.push(record)?;
        }
        write_id(&fifodir.join(T::ID_FILE), id)?;
        Ok(Self {
            table,
            id,
            fifodir: fifodir.to_path_buf(),
        })
    }

    /// Attaches the generation named by the id file.
    pub fn attach(fifodir: &Path) -> Result<Self> {
        let id = read_id(&fifodir.join(T::ID_FILE))?;
        let path = generation_path(fifodir, T::PREFIX, id);
        let table = Table::attach(&path, 1)?;
        tracing::debug!(path = %path.display(), records = table.len(), "attached status area");
        Ok(Self {
            table,
            id,
            fifodir: fifodir.to_path_buf(),
        })
    }

    /// Writes a new generation with `records` and marks this one stale.
    ///
    /// This is what the producer does when the configuration is reread.
    pub fn replace(&mut self, records: &[T]) -> Result<Self> {
        let mut next = Self::create(&self.fifodir, self.id + 1, records)?;
        next.table.set_features(self.table.features());
        self.table.area_mut().mark_stale();
        Ok(next)
    }

    /// Maps only row `index` of the current generation.
    pub fn attach_position(fifodir: &Path, index: usize) -> Result<PositionView<T>> {
        let id = read_id(&fifodir.join(T::ID_FILE))?;
        PositionView::attach(&generation_path(fifodir, T::PREFIX, id), index)
    }

    /// Returns `true` when the id file names a different generation.
    pub fn check_id_changed(&self) -> Result<bool> {
        Ok(read_id(&self.fifodir.join(T::ID_FILE))? != self.id)
    }

    /// Generation id of the attached file.
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// Path of the attached file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.table.area().path()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns `true` when the producer replaced this generation.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.table.is_stale()
    }

    /// Header feature flags.
    #[must_use]
    pub fn features(&self) -> FeatureFlags {
        self.table.features()
    }

    /// Replaces the header feature flags.
    pub fn set_features(&mut self, features: FeatureFlags) {
        self.table.set_features(features);
    }

    /// Decodes row `index`.
    pub fn get(&self, index: usize) -> Result<T> {
        self.table.get(index)
    }

    /// Overwrites row `index`.
    pub fn set(&mut self, index: usize, record: &T) -> Result<()> {
        self.table.set(index, record)
    }

    /// Iterates over all rows.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.table.iter()
    }

    /// Underlying table.
    #[must_use]
    pub const fn table(&self) -> &Table<T> {
        &self.table
    }

    /// Mutable underlying table.
    pub fn table_mut(&mut self) -> &mut Table<T> {
        &mut self.table
    }

    /// Flushes the mapping.
    pub fn flush(&self) -> Result<()> {
        self.table.flush()
    }
}
