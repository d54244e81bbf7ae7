//! `StartupTime: <unix date>` lines
//!
//! The legacy page prints when the application started, in the layout of the
//! Unix `date` command: `Mon Jan 28 14:24:03 CET 2019`. That is turned into
//! `app_uptime_seconds_total`, the seconds elapsed between the start and the
//! probe.
//!
//! Zone abbreviations are ambiguous in general. The ones legacy hosts are
//! known to print are resolved through a fixed table and anything else is
//! read as UTC. The weekday is checked for syntax only.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::{
    classify::Shape,
    convert::{Context, Error},
    metric::MetricRecord,
};

const PREFIX: &str = "StartupTime: ";
const UPTIME_METRIC: &str = "app_uptime_seconds_total";
const UPTIME_HELP: &str = "Time that an application is running";

static UNIX_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:Mon|Tue|Wed|Thu|Fri|Sat|Sun) (?P<month>[A-Z][a-z]{2}) {1,2}(?P<day>\d{1,2}) (?P<hour>\d{1,2}):(?P<minute>\d{2}):(?P<second>\d{2}) (?P<zone>[A-Z]{1,5}) (?P<year>\d{4})$",
    )
    .expect("Invalid regex pattern provided")
});

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// UTC offset, in hours, of the zone abbreviations legacy hosts print
fn zone_offset_hours(abbreviation: &str) -> Option<i32> {
    let hours = match abbreviation {
        "UTC" | "GMT" | "Z" | "WET" => 0,
        "WEST" | "CET" | "BST" => 1,
        "CEST" | "EET" => 2,
        "EEST" | "MSK" => 3,
        "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" => -8,
        _ => return None,
    };
    Some(hours)
}

fn field<T: std::str::FromStr>(captures: &regex::Captures<'_>, name: &str) -> Option<T> {
    captures.name(name)?.as_str().parse().ok()
}

/// Parse a Unix `date` timestamp.
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, Error> {
    let invalid = |reason| Error::TimestampParseError {
        value: value.to_string(),
        reason,
    };

    let captures = UNIX_DATE
        .captures(value)
        .ok_or_else(|| invalid("not in the layout 'Mon Jan _2 15:04:05 MST 2006'"))?;

    let month = MONTHS
        .iter()
        .position(|m| *m == &captures["month"])
        .ok_or_else(|| invalid("unknown month"))?;
    let year: i32 = field(&captures, "year").ok_or_else(|| invalid("year out of range"))?;
    let day: u32 = field(&captures, "day").ok_or_else(|| invalid("day out of range"))?;
    let hour: u32 = field(&captures, "hour").ok_or_else(|| invalid("hour out of range"))?;
    let minute: u32 = field(&captures, "minute").ok_or_else(|| invalid("minute out of range"))?;
    let second: u32 = field(&captures, "second").ok_or_else(|| invalid("second out of range"))?;

    #[allow(clippy::cast_possible_truncation)]
    let date = NaiveDate::from_ymd_opt(year, month as u32 + 1, day)
        .ok_or_else(|| invalid("day out of range"))?;
    let time =
        NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| invalid("time out of range"))?;

    let zone = &captures["zone"];
    let hours = zone_offset_hours(zone).unwrap_or_else(|| {
        debug!("unknown time zone abbreviation {zone}, reading as UTC");
        0
    });
    let offset = FixedOffset::east_opt(hours * 3600).ok_or_else(|| invalid("bad zone offset"))?;

    offset
        .from_local_datetime(&NaiveDateTime::new(date, time))
        .single()
        .map(|started| started.with_timezone(&Utc))
        .ok_or_else(|| invalid("ambiguous local time"))
}

pub(crate) fn convert(line: &str, context: &Context) -> Result<Vec<MetricRecord>, Error> {
    let value = line
        .strip_prefix(PREFIX)
        .ok_or_else(|| Error::mismatch(Shape::StartupTime, line))?;

    let started = parse_timestamp(value)?;
    let uptime = context.now().signed_duration_since(started);
    // A start time in the future means clock skew between the hosts. Counters
    // must not go negative.
    let seconds = (uptime.num_milliseconds() as f64 / 1000.0).max(0.0);

    Ok(vec![MetricRecord::counter(
        UPTIME_METRIC,
        UPTIME_HELP,
        seconds,
    )])
}
