#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! Transfer-rate limits for the AFD file distributor.
//!
//! Limits are configured per host (`transfer_rate_limit` in the FSA) and per
//! rate-limit group. The distributor recomputes each host's per-process share
//! whenever a worker starts or ends and publishes it in the FSA, where the
//! workers pace themselves.
//!
//! ```
//! use bandwidth::{RateLimit, calc_trl_per_process, parse_rate_limit};
//!
//! let limit = parse_rate_limit("1M").expect("valid");
//! assert_eq!(calc_trl_per_process(limit, 4), Some(262_144));
//! assert!(parse_rate_limit("0").expect("valid").is_unlimited());
//! assert_eq!(RateLimit::from_bytes(0), RateLimit::UNLIMITED);
//! ```

mod parse;
mod share;

pub use crate::parse::{RateLimit, RateLimitParseError, parse_rate_limit};
pub use crate::share::{HostLoad, RateShare, TrlGroup, TrlGroups, calc_trl_per_process};
