//! In-place upgrades of mapped areas written by older versions.
//!
//! A converter reads every record in the old layout, resizes the file for
//! the new stride, rewrites the records and finally bumps the header
//! version. Unknown versions are refused so that an operator can restore a
//! backup instead of running on garbage.

use std::path::Path;

use crate::area::MappedArea;
use crate::error::{Result, SsaError};
use crate::mdb::{MsgCacheEntry, MsgCacheEntryV0};
use crate::table::{Record, Table};

/// Attaches the message cache, upgrading older layouts first.
pub fn attach_mdb(path: &Path, step: usize, default_ageing: i32) -> Result<Table<MsgCacheEntry>> {
    match Table::attach(path, step) {
        Err(SsaError::VersionMismatch { found, .. }) if found == MsgCacheEntryV0::VERSION => {
            convert_mdb_v0(path, step, default_ageing)?;
            Table::attach(path, step)
        }
        Err(SsaError::VersionMismatch {
            path,
            found,
            current,
        }) => Err(SsaError::UnknownVersion {
            path,
            found,
            current,
        }),
        other => other,
    }
}

/// Rewrites a version 0 message cache as version 1, filling `ageing` with
/// `default_ageing`. Returns the number of converted entries.
pub fn convert_mdb_v0(path: &Path, step: usize, default_ageing: i32) -> Result<usize> {
    let mut area = MappedArea::attach(path)?;
    let mut header = area.header();
    if header.version != MsgCacheEntryV0::VERSION {
        return Err(SsaError::UnknownVersion {
            path: path.to_path_buf(),
            found: header.version,
            current: MsgCacheEntryV0::VERSION,
        });
    }
    let count = header.len();
    let needed = count * MsgCacheEntryV0::SIZE;
    if area.data_len() < needed {
        return Err(SsaError::Truncated {
            path: path.to_path_buf(),
            len: area.data_len() as u64,
            needed: needed as u64,
        });
    }

    let old: Vec<MsgCacheEntryV0> = area.data()[..needed]
        .chunks_exact(MsgCacheEntryV0::SIZE)
        .map(MsgCacheEntryV0::decode)
        .collect();

    let step = step.max(1);
    let capacity = (count / step + 1) * step;
    area.resize(capacity * MsgCacheEntry::SIZE)?;
    let data = area.data_mut();
    data.fill(0);
    for (entry, chunk) in old
        .into_iter()
        .zip(data.chunks_exact_mut(MsgCacheEntry::SIZE))
    {
        entry.upgrade(default_ageing).encode(chunk);
    }
    header.version = MsgCacheEntry::VERSION;
    area.set_header(header);
    area.flush()?;

    tracing::info!(
        path = %path.display(),
        entries = count,
        from = MsgCacheEntryV0::VERSION,
        to = MsgCacheEntry::VERSION,
        "converted message cache"
    );
    Ok(count)
}
