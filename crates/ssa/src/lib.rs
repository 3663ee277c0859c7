#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! Shared status areas of the AFD file distributor.
//!
//! Every long-lived piece of state that FD shares with its workers, with AMG
//! or with viewers is a file in `fifodir/` that all parties map into memory.
//! Each file starts with a 16-byte [`Header`] (record count, format version,
//! feature flags) followed by a fixed-stride array of records.
//!
//! # Layers
//!
//! - [`MappedArea`] maps a header-prefixed file and can resize it under the
//!   [`LOCK_RESIZE`](area::LOCK_RESIZE) region lock.
//! - [`Table`] gives typed access to the record array through the
//!   [`Record`] trait. Records are decoded and encoded field by field in
//!   native byte order; no pointer casts are involved.
//! - [`StatusArea`] adds the generation protocol used by the FSA and FRA,
//!   which AMG replaces wholesale on a configuration reread.
//! - [`PositionView`] maps a single row for processes that only need one.
//!
//! # Areas
//!
//! | File            | Record              |
//! |-----------------|---------------------|
//! | `fsa_status.N`  | [`HostStatus`]      |
//! | `fra_status.N`  | [`DirStatus`]       |
//! | `fd_msg_cache`  | [`MsgCacheEntry`]   |
//! | `fd_msg_queue`  | [`QueueItem`]       |
//! | `ack_queue`     | [`AckEntry`]        |
//! | `afd.status`    | [`AfdStatus`]       |
//! | `job_id_data`   | [`JobIdEntry`]      |
//! | `directory_names` | [`DirNameEntry`]  |
//! | `file_mask`     | [`FileMaskEntry`]   |
//! | `pwb_data`      | [`PasswdEntry`]     |
//! | `dc_list`       | [`DirConfigEntry`]  |
//!
//! Older message cache layouts are upgraded on attach by
//! [`convert::attach_mdb`].

pub mod ack;
pub mod afd_status;
pub mod area;
pub mod codec;
pub mod convert;
pub mod error;
pub mod fra;
pub mod fsa;
pub mod generation;
pub mod header;
pub mod mdb;
pub mod names;
pub mod position;
pub mod qb;
pub mod stores;
pub mod table;

pub use ack::AckEntry;
pub use afd_status::{AfdStatus, AmgJobs};
pub use area::MappedArea;
pub use error::{Result, SsaError};
pub use fra::{DirFlags, DirStatus, Fra, TimeEntry};
pub use fsa::{
    ConnectStatus, Fsa, HostLock, HostStatus, HostStatusFlags, JobStatus, MAX_NO_PARALLEL_JOBS,
};
pub use generation::{Generation, StatusArea};
pub use header::{AFD_WORD_OFFSET, FeatureFlags, Header, STALE};
pub use mdb::{MsgCacheEntry, MsgCacheEntryV0};
pub use position::PositionView;
pub use qb::{QueueItem, SpecialFlags};
pub use stores::{DirConfigEntry, DirNameEntry, FileMaskEntry, JobIdEntry, PasswdEntry};
pub use table::{Record, Table};
