//! The `CommonStatus` conversion engine
//!
//! Legacy applications publish their health as free-text `Key: value` lines.
//! This library recognizes the handful of encodings those lines come in and
//! turns each one into zero or more Prometheus metrics. Nothing here performs
//! I/O; fetching the status page and serving the result is the job of the
//! `commonstatus` crate.

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

pub mod classify;
pub mod convert;
pub mod exposition;
pub mod metric;
pub mod number;

pub use classify::{Shape, classify};
pub use convert::{Context, Dispatcher};
pub use exposition::MetricSet;
pub use metric::{MetricRecord, ValueKind};
