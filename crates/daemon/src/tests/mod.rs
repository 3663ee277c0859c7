//! Distributor runs against stub workers in a temporary work directory.

pub(crate) mod support;

mod scenarios;
