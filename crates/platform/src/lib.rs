#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

//! Platform-specific primitives used by the file distributor.
//!
//! Every call into libc that requires `unsafe` lives in this crate so the
//! higher layers (`ssa`, `daemon`) can keep `#![deny(unsafe_code)]`. The
//! exposed API is deliberately small:
//!
//! - [`lock`] provides single-byte advisory `fcntl` region locks used to
//!   serialise updates of shared counters in the mapped status areas.
//! - [`fifo`] creates and opens the control fifos.
//! - [`poll`] waits for readability on a set of descriptors.
//! - [`process`] kills and reaps worker processes.
//! - [`signals`] installs the SIGCHLD self-pipe and the shutdown flags.
//! - [`fs`] queries filesystem limits such as `_PC_LINK_MAX`.

#[cfg(unix)]
pub mod fifo;
#[cfg(unix)]
pub mod fs;
#[cfg(unix)]
pub mod lock;
#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
pub mod process;
#[cfg(unix)]
pub mod signals;

#[cfg(unix)]
pub use lock::{LockError, LockState, RegionGuard, lock_wait, try_lock, unlock};
#[cfg(unix)]
pub use process::{ChildStatus, current_pid, is_alive, reap, reap_any, terminate};
#[cfg(unix)]
pub use signals::{ShutdownReason, SignalSet};
