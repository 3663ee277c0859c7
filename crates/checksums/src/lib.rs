#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! CRC-32 checksums for duplicate detection.
//!
//! The distributor remembers a CRC-32 of every file it has sent for jobs with
//! a duplicate check enabled. Depending on the job the checksum covers the
//! file name, the name and size, or the content. All hashing goes through
//! `crc32fast`, which selects a carry-less-multiply implementation at run
//! time when the CPU has one.
//!
//! ```
//! use checksums::{crc32, name_size_crc};
//!
//! assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
//! assert_ne!(name_size_crc("a.txt", 10), name_size_crc("a.txt", 11));
//! ```

mod crc;

pub use crc::{Crc32, crc32, file_crc, hw_crc32_available, name_crc, name_size_crc};
