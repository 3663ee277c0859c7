#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `daemon` is the AFD file distributor (`fd`). AMG announces jobs on the
//! message fifo: a directory of files below `files/outgoing` plus a message
//! file naming the destination. The distributor queues each job, hands it to
//! a transfer worker process when its host has a free slot, classifies the
//! worker's exit and either cleans up, retries later, or switches the job to
//! the host's second address.
//!
//! Everything it shares with workers and the operator tools lives in mapped
//! files below `fifodir`: the FSA (one record per host), the FRA (one record
//! per retrieve directory), the message cache, the queue and the global
//! status record. Those areas are provided by the `ssa` crate and guarded by
//! region locks from `platform`.
//!
//! # Design
//!
//! - [`run`] parses the command line, layers the configuration (defaults,
//!   `etc/AFD_CONFIG`, `AFD_*` variables, flags), installs tracing and then
//!   drives [`run_daemon`].
//! - [`Daemon`] is the single owner of all mutable state. The poll loop feeds
//!   it decoded fifo events through [`Daemon::step`] and calls
//!   [`Daemon::tick`] on the housekeeping interval.
//! - Workers are started through the [`Spawner`] trait so tests can replace
//!   the real programs with shell one-liners.
//!
//! # Invariants
//!
//! - A queue item is either pending (`pid == 0`) or owned by exactly one
//!   live connection slot.
//! - `active_transfers` of every host equals the number of slots pointing at
//!   it once a reconcile pass has run.
//! - Only one `fd` runs per work directory; `fifodir/FD_ACTIVE` holds the
//!   instance lock.
//!
//! # Errors
//!
//! Fatal conditions surface as [`FdError`]; [`FdError::exit_code`] maps them
//! to the process status. Per-job failures are logged and handled in place.
//!
//! # Examples
//!
//! ```no_run
//! let mut stdout = Vec::new();
//! let mut stderr = Vec::new();
//! let status = daemon::run(["fd", "--version"], &mut stdout, &mut stderr);
//! assert_eq!(status, 0);
//! ```

pub mod archive;
mod cli;
pub mod config;
pub mod connections;
mod daemon;
pub mod dupcheck;
pub mod error;
pub mod fifos;
pub mod mdb;
pub mod paths;
pub mod queue;
pub mod retry;
pub mod stores;
pub mod worker;

#[cfg(test)]
mod test_env;
#[cfg(test)]
mod tests;

pub use cli::{LOG_FILTER_ENV, MAX_EXIT_CODE, PROGRAM_NAME, exit_code_from, run};
pub use config::{FdConfig, FdConfigBuilder};
pub use daemon::{Daemon, now, run_daemon};
pub use error::{FdError, FdExitCode};
pub use worker::{ProcessSpawner, Spawner};
