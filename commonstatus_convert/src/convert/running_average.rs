//! Running-average records
//!
//! Timing probes inside legacy applications publish one composite record per
//! measured operation:
//!
//! ```text
//! TimeSearch: count=77 averageValue=275 realMaxValue=2,784 averageEventRate=1.283 maxEventRate=3 stdDeviation=409 maxValue=684
//! ```
//!
//! The record is decomposed into four metrics. Durations are in milliseconds
//! with no unit marker on the line; they are divided by 1000 unconditionally.
//! `averageEventRate`, `maxEventRate` and `maxValue` are dropped, rates and
//! maxima over time are derived downstream from the counters.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    classify::{KEY, Shape},
    convert::{Context, Error},
    metric::MetricRecord,
    number,
};

const MILLIS_PER_SECOND: f64 = 1000.0;

static RECORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<name>{KEY}): count=(?P<count>\S+) averageValue=(?P<average>\S+) realMaxValue=(?P<real_max>\S+) averageEventRate=\S+ maxEventRate=\S+ stdDeviation=(?P<stddev>\S+) maxValue=\S+$"
    ))
    .expect("Invalid regex pattern provided")
});

pub(crate) fn convert(line: &str, _context: &Context) -> Result<Vec<MetricRecord>, Error> {
    let captures = RECORD
        .captures(line)
        .ok_or_else(|| Error::mismatch(Shape::RunningAverage, line))?;
    let field = |name: &str| {
        number::normalize(&captures[name]).map_err(Error::number(Shape::RunningAverage))
    };

    let count = field("count")?;
    let average = field("average")?;
    let real_max = field("real_max")?;
    let stddev = field("stddev")?;

    let name = &captures["name"];
    Ok(vec![
        MetricRecord::counter(
            &format!("{name}_total"),
            format!("Number of {name} events"),
            count,
        ),
        MetricRecord::counter(
            &format!("{name}_seconds_total"),
            format!("Total time spent in {name} events in seconds"),
            count * average / MILLIS_PER_SECOND,
        ),
        MetricRecord::gauge(
            &format!("{name}_max_seconds"),
            format!("Longest {name} event in seconds"),
            real_max / MILLIS_PER_SECOND,
        ),
        MetricRecord::gauge(
            &format!("{name}_stddev_seconds"),
            format!("Standard deviation of {name} event durations in seconds"),
            stddev / MILLIS_PER_SECOND,
        ),
    ])
}
