//! `ReleaseTag: <tag>` lines
//!
//! The release tag is not a number at all. It becomes a label on the constant
//! `commonstatus_info` gauge so that dashboards can join on it.

use crate::{
    classify::Shape,
    convert::{Context, Error},
    metric::MetricRecord,
};

const PREFIX: &str = "ReleaseTag: ";
pub(crate) const INFO_METRIC: &str = "commonstatus_info";
const INFO_HELP: &str = "commonstatus information";

pub(crate) fn convert(line: &str, _context: &Context) -> Result<Vec<MetricRecord>, Error> {
    let tag = line
        .strip_prefix(PREFIX)
        .ok_or_else(|| Error::mismatch(Shape::ReleaseTag, line))?;

    Ok(vec![
        MetricRecord::gauge(INFO_METRIC, INFO_HELP, 1.0).with_label("release_tag", tag),
    ])
}
