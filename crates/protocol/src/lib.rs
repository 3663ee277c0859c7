#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

//! Wire and file formats spoken by the AFD file distributor.
//!
//! The distributor talks to AMG, to its workers and to operator tools through
//! fifos carrying fixed-size native-endian records, and reads per-job message
//! files written by AMG. This crate holds the codecs for all of them; it does
//! no I/O beyond reading a message file.
//!
//! # Examples
//!
//! Decode a completion written by a worker that wants another job on the same
//! connection:
//!
//! ```
//! use protocol::Completion;
//!
//! let completion = Completion::decode((-4242_i32).to_ne_bytes());
//! assert_eq!(completion.pid, 4242);
//! assert!(completion.more_data);
//! ```
//!
//! Parse a message file and pick the worker program:
//!
//! ```
//! use protocol::{JobDescriptor, Protocol};
//!
//! let job = JobDescriptor::parse("DESTINATION ftp://u@h/x\nAGEING 7\n").expect("valid");
//! assert_eq!(job.destination.protocol(), Protocol::Ftp);
//! assert_eq!(job.destination.protocol().program(), "sf_ftp");
//! assert_eq!(job.ageing, Some(7));
//! ```

mod command;
mod error;
mod exit_code;
mod job;
mod msg_name;
mod record;
mod url;
mod worker_cli;

pub use command::{DeleteRequest, FdCommand};
pub use error::{MessageFileError, ProtocolError, UrlError, WorkerCliError};
pub use exit_code::{ExitClass, WorkerExit};
pub use job::{
    DcFlags, DupCheck, JobDescriptor, JobOptions, MAX_AGEING_VALUE, MIN_AGEING_VALUE,
};
pub use msg_name::{MAX_MSG_NAME_LENGTH, MsgName, parse_fetch_name};
pub use record::{
    Completion, FIN_RECORD_SIZE, FrameBuffer, MSG_RECORD_SIZE, MsgRecord, RETRY_RECORD_SIZE,
    decode_retry,
};
pub use url::{Protocol, ProtocolMask, Url};
pub use worker_cli::{WorkerArgs, WorkerOptions};
