//! Legacy status line classification
//!
//! A status line is one of a small, closed set of [`Shape`]s. [`classify`]
//! tests the line against each shape's key pattern in a fixed priority order
//! and the first match wins, so a line that could satisfy more than one shape
//! is never ambiguous. Classification only looks at the key; deciding whether
//! the rest of the line is well formed is left to the shape's converter.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// Key grammar of a legacy line: anything up to the first whitespace, not
/// starting with `:`, followed by `": "`. Sanitization fixes the rest.
pub(crate) const KEY: &str = r"[^\s:]\S*";

static RELEASE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ReleaseTag: ").expect("Invalid regex pattern provided"));
static LOAD_AVERAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^LoadAvg: ").expect("Invalid regex pattern provided"));
static STARTUP_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^StartupTime: ").expect("Invalid regex pattern provided"));
static RUNNING_AVERAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^{KEY}: count=\S+ averageValue=")).expect("Invalid regex pattern provided")
});
static PLAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^{KEY}: ")).expect("Invalid regex pattern provided"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The known legacy encodings of a status line
pub enum Shape {
    /// `Key: value`
    Plain,
    /// `LoadAvg: 1.94 3.44 5.07`
    LoadAverage,
    /// `StartupTime: Mon Jan 28 14:24:03 CET 2019`
    StartupTime,
    /// `ReleaseTag: 0.0.32`
    ReleaseTag,
    /// `Name: count=.. averageValue=.. realMaxValue=.. ...`
    RunningAverage,
    /// No `Key: ` prefix at all
    Unrecognized,
}

impl Shape {
    /// Every shape in classification priority order, [`Shape::Unrecognized`]
    /// last.
    pub const PRIORITY: [Shape; 6] = [
        Shape::ReleaseTag,
        Shape::LoadAverage,
        Shape::StartupTime,
        Shape::RunningAverage,
        Shape::Plain,
        Shape::Unrecognized,
    ];

    /// Snake-case name of this shape, used in logs and errors
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Shape::Plain => "plain",
            Shape::LoadAverage => "load_average",
            Shape::StartupTime => "startup_time",
            Shape::ReleaseTag => "release_tag",
            Shape::RunningAverage => "running_average",
            Shape::Unrecognized => "unrecognized",
        }
    }

    fn pattern(self) -> Option<&'static Regex> {
        match self {
            Shape::ReleaseTag => Some(&RELEASE_TAG),
            Shape::LoadAverage => Some(&LOAD_AVERAGE),
            Shape::StartupTime => Some(&STARTUP_TIME),
            Shape::RunningAverage => Some(&RUNNING_AVERAGE),
            Shape::Plain => Some(&PLAIN),
            Shape::Unrecognized => None,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide which [`Shape`] `line` is written in.
///
/// Total and pure: every input yields exactly one shape and the same input
/// always yields the same shape.
#[must_use]
pub fn classify(line: &str) -> Shape {
    Shape::PRIORITY
        .into_iter()
        .find(|shape| shape.pattern().is_none_or(|re| re.is_match(line)))
        .unwrap_or(Shape::Unrecognized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_shapes() {
        let cases = [
            ("ReleaseTag: 0.0.32", Shape::ReleaseTag),
            ("ReleaseTag: DEV-ITD_123-bla-test", Shape::ReleaseTag),
            ("LoadAvg: 1.94 3.44 5.07", Shape::LoadAverage),
            ("LoadAvg: 1.94 3.44 5,07", Shape::LoadAverage),
            ("StartupTime: Mon Jan 28 14:24:03 CET 2019", Shape::StartupTime),
            (
                "TimeSearch: count=77 averageValue=275 realMaxValue=2,784 averageEventRate=1.283 maxEventRate=3 stdDeviation=409 maxValue=684",
                Shape::RunningAverage,
            ),
            ("MemoryUsed: 9,220,838,392", Shape::Plain),
            ("GC-PS-MarkSweep: 55", Shape::Plain),
            ("MemoryUsed: ", Shape::Plain),
        ];
        for (line, want) in cases {
            assert_eq!(classify(line), want, "line: {line}");
        }
    }

    #[test]
    fn unrecognized_lines() {
        for line in [
            "",
            "no key here",
            "MemoryUsed:5",
            "MemoryUsed:",
            ": 5",
            "Memory Used: 5",
        ] {
            assert_eq!(classify(line), Shape::Unrecognized, "line: {line:?}");
        }
    }

    #[test]
    fn priority_resolves_overlaps() {
        // Both lines also satisfy the running-average and plain templates.
        assert_eq!(
            classify("ReleaseTag: count=1 averageValue=2"),
            Shape::ReleaseTag
        );
        assert_eq!(
            classify("LoadAvg: count=1 averageValue=2"),
            Shape::LoadAverage
        );
        assert_eq!(
            classify("StartupTime: count=1 averageValue=2"),
            Shape::StartupTime
        );
    }

    #[test]
    fn keys_are_case_sensitive() {
        assert_eq!(classify("releasetag: 0.0.32"), Shape::Plain);
        assert_eq!(classify("loadavg: 1 2 3"), Shape::Plain);
    }

    proptest! {
        #[test]
        fn prop_classify_is_deterministic(line in ".*") {
            prop_assert_eq!(classify(&line), classify(&line));
        }

        #[test]
        fn prop_key_value_lines_are_never_unrecognized(
            key in "[A-Za-z_][A-Za-z0-9_.-]*",
            value in ".*",
        ) {
            prop_assert_ne!(classify(&format!("{key}: {value}")), Shape::Unrecognized);
        }
    }
}
