#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! Log output of the AFD file distributor. Two streams exist:
//!
//! - Operational diagnostics go through `tracing`. [`init_tracing`] installs
//!   a stderr formatter with an `EnvFilter`, and a [`SystemLogLayer`] that
//!   copies warnings and errors into the system-log fifo.
//! - Domain logs (transfer, delete, output, receive, transfer-debug) are
//!   written directly as [`LogLine`]s or binary records through
//!   [`FifoSink`]s, which the AFD log processes read.
//!
//! # Line format
//!
//! ```text
//! dd HH:MM:SS <S> <host alias padded> [<slot>]: <text>[ suffix]
//! ```
//!
//! # Examples
//!
//! ```
//! use logging::{FifoSink, LogLine, Severity, Suffix};
//!
//! let mut sink = FifoSink::new(Vec::new(), "transfer_log");
//! let line = LogLine::now(Severity::Info, "1 file 1024 bytes send")
//!     .host("alpha")
//!     .slot(0)
//!     .suffix(Suffix::JobId(0xf));
//! assert!(sink.write_line(&line)?);
//!
//! let text = String::from_utf8(sink.into_inner()).unwrap();
//! assert!(text.contains("<I> alpha   [0]: 1 file 1024 bytes send #f"));
//! # Ok::<(), std::io::Error>(())
//! ```

mod hexdump;
mod line;
mod records;
mod severity;
mod sink;
mod tracing_bridge;

pub use hexdump::hex_dump;
pub use line::{LogLine, MAX_HOSTNAME_LENGTH, Suffix, timestamp};
pub use records::{DeleteReason, DeleteRecord, OutputRecord};
pub use severity::Severity;
pub use sink::{FIFO_RETRY_DELAY, FIFO_WRITE_RETRIES, FifoSink};
pub use tracing_bridge::{SharedSink, SystemLogLayer, init_tracing};
