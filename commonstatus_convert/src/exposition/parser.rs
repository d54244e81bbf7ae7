//! Prometheus text format validator
//!
//! A strict line-at-a-time reader of the text exposition format. Lines that
//! already read as exposition samples skip legacy conversion entirely, so
//! anything short of a conforming sample is rejected: the metric name must
//! match `[a-zA-Z_:][a-zA-Z0-9_:]*`, label names `[a-zA-Z_][a-zA-Z0-9_]*`,
//! label values must be quoted with only `\\`, `\"` and `\n` escapes, and the
//! value may be followed by nothing but an integer timestamp.
//! <https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md>

use rustc_hash::FxHashMap;

use crate::metric::{LabelPairs, MetricRecord, ValueKind};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors that can occur while validating a line
pub enum ParseError {
    /// Unknown metric type in TYPE line
    #[error("unknown metric type: {0}")]
    UnknownMetricType(String),
    /// Invalid format in the line
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// Invalid value that cannot be parsed as a number
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// Missing value in metric line
    #[error("missing value")]
    MissingValue,
    /// Missing name in metric line
    #[error("missing metric name")]
    MissingName,
    /// Metric name outside `[a-zA-Z_:][a-zA-Z0-9_:]*`
    #[error("invalid metric name: {0}")]
    InvalidName(String),
    /// Invalid label format
    #[error("invalid label: {0}")]
    InvalidLabel(String),
}

#[derive(Debug, Clone, PartialEq)]
/// A sample line that passed validation
pub struct Sample {
    /// The metric name as written
    pub name: String,
    /// Help text from a preceding `# HELP` line, else empty
    pub help: String,
    /// The labels in the order written
    pub labels: LabelPairs,
    /// The sample value
    pub value: f64,
    /// Optional timestamp in milliseconds since Unix epoch
    pub timestamp: Option<i64>,
    /// Kind from a preceding `# TYPE` line, else untyped
    pub kind: ValueKind,
}

impl Sample {
    /// Turn the sample into an output record.
    ///
    /// Trailing `:` are dropped from the name, so a legacy `MemoryUsed: 5`
    /// line, which is also a conforming sample, keeps its key as name. The
    /// timestamp is dropped; exposed samples are stamped by the scraper.
    #[must_use]
    pub fn into_record(self) -> MetricRecord {
        let name = self.name.trim_end_matches(':');
        MetricRecord::new(name, self.help, self.value, self.kind).with_labels(self.labels)
    }
}

#[derive(Debug, Default)]
/// Validator for Prometheus text exposition lines
///
/// `# TYPE` and `# HELP` lines are remembered and applied to the samples of
/// the same name that follow, so one validator should see all lines of a
/// document in order.
pub struct Validator {
    typemap: FxHashMap<String, ValueKind>,
    helpmap: FxHashMap<String, String>,
}

impl Validator {
    /// Create a new validator instance
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a single line.
    ///
    /// Returns `None` for blank lines and for well-formed comment lines, which
    /// carry no sample.
    pub fn validate(&mut self, line: &str) -> Option<Result<Sample, ParseError>> {
        let line = line.trim();

        if line.is_empty() {
            return None;
        }

        if let Some(rest) = line.strip_prefix("# HELP ") {
            return match self.parse_help_line(rest) {
                Ok(()) => None,
                Err(e) => Some(Err(e)),
            };
        }

        if let Some(rest) = line.strip_prefix("# TYPE ") {
            return match self.parse_type_line(rest) {
                Ok(()) => None,
                Err(e) => Some(Err(e)),
            };
        }

        if line.starts_with('#') {
            return None;
        }

        Some(self.parse_sample(line))
    }

    fn parse_help_line(&mut self, rest: &str) -> Result<(), ParseError> {
        let (name, text) = rest.split_once(' ').unwrap_or((rest, ""));
        check_metric_name(name)?;
        self.helpmap.insert(name.to_owned(), unescape_help(text));
        Ok(())
    }

    fn parse_type_line(&mut self, rest: &str) -> Result<(), ParseError> {
        let mut parts = rest.split_ascii_whitespace();

        let name = parts.next().ok_or_else(|| {
            ParseError::InvalidFormat("Missing metric name in TYPE line".to_string())
        })?;
        check_metric_name(name)?;

        let kind = parts.next().ok_or_else(|| {
            ParseError::InvalidFormat("Missing metric type in TYPE line".to_string())
        })?;

        let kind = match kind {
            "counter" => ValueKind::Counter,
            "gauge" => ValueKind::Gauge,
            "untyped" => ValueKind::Untyped,
            "histogram" | "summary" => {
                // Samples of these families are re-exposed one by one, untyped.
                for suffix in ["_sum", "_count", "_bucket"] {
                    self.typemap
                        .insert(format!("{name}{suffix}"), ValueKind::Untyped);
                }
                ValueKind::Untyped
            }
            other => return Err(ParseError::UnknownMetricType(other.to_string())),
        };

        self.typemap.insert(name.to_owned(), kind);
        Ok(())
    }

    fn parse_sample(&self, line: &str) -> Result<Sample, ParseError> {
        let name_end = line
            .find(|c: char| c == '{' || c.is_ascii_whitespace())
            .unwrap_or(line.len());
        let name = &line[..name_end];
        if name.is_empty() {
            return Err(ParseError::MissingName);
        }
        check_metric_name(name)?;

        let rest = &line[name_end..];
        let (labels, rest) = match rest.strip_prefix('{') {
            Some(body) => parse_labels(body)?,
            None => (Vec::new(), rest),
        };

        if !rest.is_empty() && !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
            return Err(ParseError::InvalidFormat(format!(
                "Expected whitespace before value: {rest}"
            )));
        }

        let mut parts = rest.split_ascii_whitespace();
        let value = parse_value(parts.next().ok_or(ParseError::MissingValue)?)?;
        let timestamp = match parts.next() {
            Some(ts) => Some(ts.parse::<i64>().map_err(|_| {
                ParseError::InvalidFormat(format!("Invalid timestamp: {ts}"))
            })?),
            None => None,
        };
        if let Some(extra) = parts.next() {
            return Err(ParseError::InvalidFormat(format!(
                "Unexpected token after timestamp: {extra}"
            )));
        }

        Ok(Sample {
            name: name.to_string(),
            help: self.helpmap.get(name).cloned().unwrap_or_default(),
            labels,
            value,
            timestamp,
            kind: self.typemap.get(name).copied().unwrap_or(ValueKind::Untyped),
        })
    }
}

/// Whether `name` matches `[a-zA-Z_:][a-zA-Z0-9_:]*`
#[must_use]
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_' || first == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn check_metric_name(name: &str) -> Result<(), ParseError> {
    if is_valid_metric_name(name) {
        Ok(())
    } else {
        Err(ParseError::InvalidName(name.to_string()))
    }
}

fn check_label_name(name: &str) -> Result<(), ParseError> {
    if name.is_empty() {
        return Err(ParseError::InvalidLabel("Empty label key".to_string()));
    }

    // Label names starting with __ are reserved for internal use
    if name.starts_with("__") {
        return Err(ParseError::InvalidLabel(
            "Label names starting with '__' are reserved for internal use".to_string(),
        ));
    }

    let mut chars = name.chars();
    let conforming = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !conforming {
        return Err(ParseError::InvalidLabel(format!(
            "Label name outside [a-zA-Z_][a-zA-Z0-9_]*: {name}"
        )));
    }

    Ok(())
}

/// Parse the label set following `{`, returning the labels and the input after
/// the closing `}`. Quotes are honored, so `,` and `}` may appear in values.
fn parse_labels(mut rest: &str) -> Result<(LabelPairs, &str), ParseError> {
    let mut labels = Vec::new();

    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }
        if rest.is_empty() {
            return Err(ParseError::InvalidFormat(
                "Unclosed labels bracket".to_string(),
            ));
        }

        let (label_name, after_name) = rest
            .split_once('=')
            .ok_or_else(|| ParseError::InvalidLabel(format!("Label missing '=': {rest}")))?;
        let label_name = label_name.trim();
        check_label_name(label_name)?;

        let quoted = after_name.trim_start().strip_prefix('"').ok_or_else(|| {
            ParseError::InvalidLabel("Label value must be quoted".to_string())
        })?;
        let (label_value, after_value) = parse_label_value(quoted)?;
        labels.push((label_name.to_string(), label_value));

        rest = after_value.trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with('}') {
            return Err(ParseError::InvalidLabel(format!(
                "Expected ',' or '}}' after label value: {rest}"
            )));
        }
    }
}

/// Read a label value up to its closing quote, which `input` must not start
/// with. Returns the unescaped value and the input after the closing quote.
fn parse_label_value(input: &str) -> Result<(String, &str), ParseError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.char_indices();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, '\\')) => result.push('\\'),
                Some((_, '"')) => result.push('"'),
                Some((_, 'n')) => result.push('\n'),
                Some((_, c)) => {
                    return Err(ParseError::InvalidLabel(format!(
                        "Invalid escape sequence: \\{c}"
                    )));
                }
                None => {
                    return Err(ParseError::InvalidLabel(
                        "Backslash at end of label value".to_string(),
                    ));
                }
            },
            '"' => return Ok((result, &input[idx + 1..])),
            c => result.push(c),
        }
    }

    Err(ParseError::InvalidLabel(
        "Label value quotes not properly paired".to_string(),
    ))
}

fn parse_value(token: &str) -> Result<f64, ParseError> {
    match token {
        "NaN" => Ok(f64::NAN),
        "+Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => {
            // Rust also reads `inf` and `nan`, which the format does not allow.
            if !token
                .bytes()
                .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
            {
                return Err(ParseError::InvalidValue(token.to_string()));
            }
            token
                .parse::<f64>()
                .map_err(|_| ParseError::InvalidValue(token.to_string()))
        }
    }
}

fn unescape_help(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('\\') | None => result.push('\\'),
                Some(c) => {
                    result.push('\\');
                    result.push(c);
                }
            }
        } else {
            result.push(ch);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(line: &str) -> Result<Sample, ParseError> {
        Validator::new()
            .validate(line)
            .expect("line should not be skipped")
    }

    #[test]
    fn test_type_lines() {
        let mut validator = Validator::new();

        assert!(validator.validate("# TYPE http_requests_total counter").is_none());
        assert_eq!(
            validator.typemap.get("http_requests_total"),
            Some(&ValueKind::Counter)
        );

        assert!(validator.validate("# TYPE memory_usage gauge").is_none());
        assert_eq!(validator.typemap.get("memory_usage"), Some(&ValueKind::Gauge));

        assert!(
            validator
                .validate("# TYPE http_request_duration_seconds histogram")
                .is_none()
        );
        for name in [
            "http_request_duration_seconds_sum",
            "http_request_duration_seconds_count",
            "http_request_duration_seconds_bucket",
        ] {
            assert_eq!(validator.typemap.get(name), Some(&ValueKind::Untyped));
        }

        assert!(matches!(
            validator.validate("# TYPE foo meter"),
            Some(Err(ParseError::UnknownMetricType(_)))
        ));
        assert!(matches!(
            validator.validate("# TYPE foo"),
            Some(Err(ParseError::InvalidFormat(_)))
        ));
    }

    #[test]
    fn test_comments_and_blanks_are_skipped() {
        let mut validator = Validator::new();
        assert!(validator.validate("").is_none());
        assert!(validator.validate("   ").is_none());
        assert!(validator.validate("# just a comment").is_none());
        assert!(validator.validate("# HELP foo Some help.").is_none());
    }

    #[test]
    fn test_no_labels() {
        let result = sample("http_requests_total 1027").unwrap();
        assert_eq!(result.name, "http_requests_total");
        assert_eq!(result.value, 1027.0);
        assert!(result.labels.is_empty());
        assert_eq!(result.kind, ValueKind::Untyped);
    }

    #[test]
    fn test_with_labels() {
        let result = sample("http_requests_total{method=\"GET\",code=\"200\"} 1027").unwrap();
        assert_eq!(result.name, "http_requests_total");
        assert_eq!(result.value, 1027.0);
        assert_eq!(
            result.labels,
            vec![
                ("method".to_string(), "GET".to_string()),
                ("code".to_string(), "200".to_string()),
            ]
        );
    }

    #[test]
    fn test_with_timestamp() {
        let result = sample("http_requests_total 1027 1729113558073").unwrap();
        assert_eq!(result.timestamp, Some(1_729_113_558_073));

        let result = sample("http_requests_total 1027").unwrap();
        assert_eq!(result.timestamp, None);
    }

    #[test]
    fn test_type_and_help_apply_to_samples() {
        let mut validator = Validator::new();
        assert!(
            validator
                .validate("# HELP http_requests_total The total number of HTTP requests.")
                .is_none()
        );
        assert!(validator.validate("# TYPE http_requests_total counter").is_none());
        let result = validator
            .validate("http_requests_total{method=\"post\"} 3")
            .unwrap()
            .unwrap();
        assert_eq!(result.kind, ValueKind::Counter);
        assert_eq!(result.help, "The total number of HTTP requests.");
    }

    #[test]
    fn test_invalid_value() {
        for line in [
            "http_requests_total foobar",
            "http_requests_total inf",
            "http_requests_total nan",
            "ReleaseTag: 0.0.32",
            "MemoryUsed: 9,220,838,392",
        ] {
            assert!(
                matches!(sample(line), Err(ParseError::InvalidValue(_))),
                "line: {line}"
            );
        }
    }

    #[test]
    fn test_missing_value_and_name() {
        assert!(matches!(sample("metric"), Err(ParseError::MissingValue)));
        assert!(matches!(sample("metric{a=\"b\"}"), Err(ParseError::MissingValue)));
        assert!(matches!(sample("{}0"), Err(ParseError::MissingName)));
    }

    #[test]
    fn test_strict_names() {
        for line in ["GC-PS-MarkSweep: 55", "5xx 1", "fran√ßais 1"] {
            assert!(
                matches!(sample(line), Err(ParseError::InvalidName(_))),
                "line: {line}"
            );
        }
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        // value, then timestamp, then nothing else
        assert!(matches!(
            sample("LoadAvg: 1.94 3.44 5.07"),
            Err(ParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            sample("metric 1 2 3"),
            Err(ParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            sample("metric{a=\"b\"}1"),
            Err(ParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_invalid_labels() {
        for line in [
            "metric{=\"value\"} 123",
            "metric{key} 123",
            "metric{__reserved=\"value\"} 123",
            "metric{fran√ßais=\"value\"} 123",
            "metric{key=unquoted} 123",
            r#"metric{key="invalid\x"} 123"#,
            r#"metric{key="} 123"#,
            r#"metric{a="1" b="2"} 123"#,
        ] {
            assert!(
                matches!(sample(line), Err(ParseError::InvalidLabel(_))),
                "line: {line}"
            );
        }
        assert!(matches!(
            sample("metric{a=\"1\","),
            Err(ParseError::InvalidFormat(_))
        ));

        // Empty label value and trailing comma are allowed
        assert!(sample("metric{key=\"\"} 123").is_ok());
        assert!(sample("metric{key=\"v\",} 123").is_ok());
    }

    #[test]
    fn test_label_value_escaping() {
        let result = sample(r#"metric{key="value with \"quotes\""} 123"#).unwrap();
        assert_eq!(result.labels[0].1, "value with \"quotes\"");

        let result = sample(r#"metric{key="path\\to\\file"} 123"#).unwrap();
        assert_eq!(result.labels[0].1, "path\\to\\file");

        let result = sample(r#"metric{key="line1\nline2"} 123"#).unwrap();
        assert_eq!(result.labels[0].1, "line1\nline2");

        let result = sample(r#"metric{key="a,b}c",other="x"} 1"#).unwrap();
        assert_eq!(
            result.labels,
            vec![
                ("key".to_string(), "a,b}c".to_string()),
                ("other".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn test_special_float_values() {
        assert!(sample("metric NaN").unwrap().value.is_nan());
        assert_eq!(sample("metric +Inf").unwrap().value, f64::INFINITY);
        assert_eq!(sample("metric -Inf").unwrap().value, f64::NEG_INFINITY);
        assert_eq!(sample("metric 1.23e45").unwrap().value, 1.23e45);
        assert_eq!(sample("metric -42.5").unwrap().value, -42.5);
    }

    #[test]
    fn test_legacy_key_value_line_is_a_sample() {
        let result = sample("MemoryUsed: 9220838392").unwrap();
        assert_eq!(result.name, "MemoryUsed:");
        let record = result.into_record();
        assert_eq!(record.name(), "MemoryUsed");
        assert_eq!(record.value(), 9_220_838_392.0);
        assert_eq!(record.kind(), ValueKind::Untyped);
    }

    #[test]
    fn test_into_record_keeps_labels_and_kind() {
        let mut validator = Validator::new();
        assert!(validator.validate("# TYPE job:rate5m gauge").is_none());
        let record = validator
            .validate("job:rate5m{job=\"api\"} 0.25 1395066363000")
            .unwrap()
            .unwrap()
            .into_record();
        assert_eq!(record.name(), "job:rate5m");
        assert_eq!(record.kind(), ValueKind::Gauge);
        assert_eq!(record.labels(), &[("job".to_string(), "api".to_string())]);
    }

    proptest! {
        #[test]
        fn prop_validate_never_panics(line in ".*") {
            let _ = Validator::new().validate(&line);
        }

        #[test]
        fn prop_accepted_names_conform(line in "[a-zA-Z_:{}=\", .0-9-]{0,40}") {
            if let Some(Ok(sample)) = Validator::new().validate(&line) {
                prop_assert!(is_valid_metric_name(&sample.name));
            }
        }
    }
}
