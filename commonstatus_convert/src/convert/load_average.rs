//! `LoadAvg: <1m> <5m> <15m>` lines
//!
//! Load averages are written by the operating system, never by a locale-aware
//! formatter, so only plain decimals are accepted here. A grouped or
//! comma-decimal value means the line is not what it claims to be.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    classify::Shape,
    convert::{Context, Error},
    metric::MetricRecord,
};

const PREFIX: &str = "LoadAvg: ";

static DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("Invalid regex pattern provided"));

const WINDOWS: [(&str, &str); 3] = [
    ("load_average1", "1m load average."),
    ("load_average5", "5m load average."),
    ("load_average15", "15m load average."),
];

pub(crate) fn convert(line: &str, _context: &Context) -> Result<Vec<MetricRecord>, Error> {
    let rest = line
        .strip_prefix(PREFIX)
        .ok_or_else(|| Error::mismatch(Shape::LoadAverage, line))?;

    let tokens: Vec<&str> = rest.split(' ').collect();
    if tokens.len() != WINDOWS.len() {
        return Err(Error::mismatch(Shape::LoadAverage, line));
    }

    tokens
        .into_iter()
        .zip(WINDOWS)
        .map(|(token, (name, help))| {
            if !DECIMAL.is_match(token) {
                return Err(Error::mismatch(Shape::LoadAverage, line));
            }
            let value = token
                .parse::<f64>()
                .map_err(|_| Error::mismatch(Shape::LoadAverage, line))?;
            Ok(MetricRecord::gauge(name, help, value))
        })
        .collect()
}
