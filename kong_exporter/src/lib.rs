//! The kong-exporter metrics relay.
//!
//! This library supports the kong-exporter binary found elsewhere in this
//! project. It fetches runtime counters from Kong's admin status endpoint on
//! demand and republishes them as Prometheus metric families. The bits and
//! pieces here are not intended to be used outside of supporting the
//! exporter, although if they are helpful in other domains that's a nice
//! surprise.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod client;
pub mod collector;
pub mod config;
pub mod retry;
