//! `Key: value` lines
//!
//! The fallback shape. The key becomes the metric name, after sanitization,
//! and the value goes through the numeric normalizer. Nothing is known about
//! how the value behaves, so the metric is untyped.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    classify::{KEY, Shape},
    convert::{Context, Error},
    metric::MetricRecord,
    number,
};

static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^(?P<name>{KEY}): (?P<value>.*)$"))
        .expect("Invalid regex pattern provided")
});

pub(crate) fn convert(line: &str, _context: &Context) -> Result<Vec<MetricRecord>, Error> {
    let captures = KEY_VALUE
        .captures(line)
        .ok_or_else(|| Error::mismatch(Shape::Plain, line))?;

    let value = number::normalize(&captures["value"]).map_err(Error::number(Shape::Plain))?;
    Ok(vec![MetricRecord::untyped(&captures["name"], value)])
}
