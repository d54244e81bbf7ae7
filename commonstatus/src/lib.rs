//! The `CommonStatus` exporter
//!
//! Serves `GET /probe?target=<url>`: fetch a legacy `CommonStatus` page, convert
//! each of its lines with [`commonstatus_convert`] and answer with the
//! resulting metrics in the Prometheus text exposition format. `GET /metrics`
//! exposes the exporter's own lifetime counters.

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
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod httpd;
pub mod probe;
pub mod telemetry;
