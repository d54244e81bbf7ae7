//! Legacy line conversion
//!
//! Each recognized [`Shape`] is bound to exactly one converter function with
//! the same contract: one line in, zero or more [`MetricRecord`]s or an
//! [`Error`] out. The [`Dispatcher`] classifies a line, runs the bound
//! converter and forwards the produced records to a probe's [`MetricSet`].

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::{
    classify::{Shape, classify},
    exposition::{self, MetricSet},
    metric::MetricRecord,
    number,
};

pub(crate) mod load_average;
pub(crate) mod plain;
pub(crate) mod release_tag;
pub(crate) mod running_average;
pub(crate) mod startup_time;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors produced by the converters
pub enum Error {
    /// The line does not have the layout the converter for `shape` expects.
    #[error("{shape} converter rejected line {line:?}")]
    PatternMismatch {
        /// The rejecting converter
        shape: Shape,
        /// The offending line
        line: String,
    },
    /// A numeric field did not survive normalization.
    #[error("{shape} converter could not read a number: {source}")]
    MalformedNumber {
        /// The rejecting converter
        shape: Shape,
        /// The normalizer's complaint
        #[source]
        source: number::Error,
    },
    /// A startup timestamp is not in the Unix `date` layout.
    #[error("startup_time converter could not parse {value:?}: {reason}")]
    TimestampParseError {
        /// The timestamp text
        value: String,
        /// What was wrong with it
        reason: &'static str,
    },
    /// No converter is bound to the line's shape.
    #[error("no converter recognizes line {0:?}")]
    Unrecognized(String),
    /// The converted records collide with metrics already collected.
    #[error("{shape} converter output refused: {source}")]
    Collision {
        /// The converter that produced the records
        shape: Shape,
        /// The sink's complaint
        #[source]
        source: exposition::Error,
    },
}

impl Error {
    pub(crate) fn mismatch(shape: Shape, line: &str) -> Self {
        Self::PatternMismatch {
            shape,
            line: line.to_string(),
        }
    }

    pub(crate) fn number(shape: Shape) -> impl FnOnce(number::Error) -> Self {
        move |source| Self::MalformedNumber { shape, source }
    }

    /// The converter that rejected the line, if any was selected
    #[must_use]
    pub fn shape(&self) -> Shape {
        match self {
            Self::PatternMismatch { shape, .. }
            | Self::MalformedNumber { shape, .. }
            | Self::Collision { shape, .. } => *shape,
            Self::TimestampParseError { .. } => Shape::StartupTime,
            Self::Unrecognized(_) => Shape::Unrecognized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Inputs shared by every converter during one probe
pub struct Context {
    now: DateTime<Utc>,
}

impl Context {
    /// Create a new [`Context`] anchored at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Wall-clock time the probe started at
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

type ConvertFn = fn(&str, &Context) -> Result<Vec<MetricRecord>, Error>;

fn converter(shape: Shape) -> Option<ConvertFn> {
    match shape {
        Shape::ReleaseTag => Some(release_tag::convert),
        Shape::LoadAverage => Some(load_average::convert),
        Shape::StartupTime => Some(startup_time::convert),
        Shape::RunningAverage => Some(running_average::convert),
        Shape::Plain => Some(plain::convert),
        Shape::Unrecognized => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Routes a line through the classifier to its converter
pub struct Dispatcher {
    context: Context,
}

impl Dispatcher {
    /// Create a new [`Dispatcher`] whose derived metrics are relative to
    /// `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            context: Context::new(now),
        }
    }

    /// Convert `line` into metric records.
    ///
    /// # Errors
    ///
    /// Returns the selected converter's error, or [`Error::Unrecognized`] if
    /// the line has no `Key: ` prefix at all.
    pub fn convert(&self, line: &str) -> Result<Vec<MetricRecord>, Error> {
        self.convert_as(classify(line), line)
    }

    fn convert_as(&self, shape: Shape, line: &str) -> Result<Vec<MetricRecord>, Error> {
        trace!("line classified as {shape}: {line}");
        let Some(convert) = converter(shape) else {
            return Err(Error::Unrecognized(line.to_string()));
        };
        convert(line, &self.context)
    }

    /// Convert `line` and append the produced records to `sink`, returning
    /// how many were appended. Nothing is appended on error.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::convert`]. Returns [`Error::Collision`] if `sink`
    /// refuses any of the records.
    pub fn dispatch(&self, line: &str, sink: &mut MetricSet) -> Result<usize, Error> {
        let shape = classify(line);
        let records = self.convert_as(shape, line)?;
        sink.push_all(records)
            .map_err(|source| Error::Collision { shape, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::ValueKind;
    use chrono::TimeZone;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Utc.timestamp_opt(1_548_681_843, 0).unwrap())
    }

    #[test]
    fn every_shape_but_unrecognized_has_a_converter() {
        for shape in Shape::PRIORITY {
            assert_eq!(converter(shape).is_some(), shape != Shape::Unrecognized);
        }
    }

    #[test]
    fn dispatch_appends_all_siblings_in_order() {
        let mut sink = MetricSet::new();
        let produced = dispatcher()
            .dispatch("LoadAvg: 1.94 3.44 5.07", &mut sink)
            .unwrap();
        assert_eq!(produced, 3);
        let names: Vec<&str> = sink.iter().map(MetricRecord::name).collect();
        assert_eq!(names, ["load_average1", "load_average5", "load_average15"]);
    }

    #[test]
    fn dispatch_failure_leaves_sink_untouched() {
        let mut sink = MetricSet::new();
        let err = dispatcher()
            .dispatch("LoadAvg: 1.94 3.44 5,07", &mut sink)
            .unwrap_err();
        assert_eq!(err.shape(), Shape::LoadAverage);
        assert!(sink.is_empty());
    }

    #[test]
    fn colliding_line_is_an_error() {
        let mut sink = MetricSet::new();
        let d = dispatcher();
        d.dispatch("LoadAvg: 1.94 3.44 5.07", &mut sink).unwrap();
        let err = d
            .dispatch("LoadAvg: 0.5 0.5 0.5", &mut sink)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Collision {
                shape: Shape::LoadAverage,
                source: exposition::Error::DuplicateSeries { .. },
            }
        ));
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.get("load_average1").unwrap().value(), 1.94);
    }

    #[test]
    fn unrecognized_line_is_an_error() {
        let err = dispatcher().convert("just some text").unwrap_err();
        assert_eq!(err, Error::Unrecognized("just some text".to_string()));
    }

    #[test]
    fn errors_name_the_rejecting_converter() {
        let d = dispatcher();
        let cases = [
            ("MemoryUsed: lots", Shape::Plain),
            ("StartupTime: yesterday", Shape::StartupTime),
            (
                "TimeSearch: count=x averageValue=1 realMaxValue=1 averageEventRate=1 maxEventRate=1 stdDeviation=1 maxValue=1",
                Shape::RunningAverage,
            ),
        ];
        for (line, shape) in cases {
            let err = d.convert(line).unwrap_err();
            assert_eq!(err.shape(), shape, "line: {line}");
            assert!(err.to_string().contains(shape.as_str()), "{err}");
        }
    }

    #[test]
    fn plain_lines_are_sanitized() {
        let records = dispatcher().convert("GC-PS-MarkSweep: 55").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name(), "GC_PS_MarkSweep");
        assert_eq!(records[0].kind(), ValueKind::Untyped);
        assert_eq!(records[0].value(), 55.0);
    }
}
