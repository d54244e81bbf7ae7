//! The canonical output metric
//!
//! Every converter, and the exposition short circuit, produces
//! [`MetricRecord`] values. A record's name is sanitized on construction so
//! that it always matches `[a-zA-Z_:][a-zA-Z0-9_:]*`, no matter how loose the
//! legacy key was.

use std::fmt;

/// Ordered label pairs
pub type LabelPairs = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// How a metric value behaves over time
pub enum ValueKind {
    /// A value that can arbitrarily go up and down
    Gauge,
    /// A monotonically increasing value
    Counter,
    /// A value reported without a declared behavior
    Untyped,
}

impl ValueKind {
    /// The name of this kind in a `# TYPE` line
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
            Self::Untyped => "untyped",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A single metric sample ready for exposition
pub struct MetricRecord {
    name: String,
    help: String,
    labels: LabelPairs,
    value: f64,
    kind: ValueKind,
}

impl MetricRecord {
    /// Create a new record, sanitizing `name`.
    #[must_use]
    pub fn new(name: &str, help: impl Into<String>, value: f64, kind: ValueKind) -> Self {
        Self {
            name: sanitize_name(name),
            help: help.into(),
            labels: Vec::new(),
            value,
            kind,
        }
    }

    /// Create a gauge record.
    #[must_use]
    pub fn gauge(name: &str, help: impl Into<String>, value: f64) -> Self {
        Self::new(name, help, value, ValueKind::Gauge)
    }

    /// Create a counter record.
    #[must_use]
    pub fn counter(name: &str, help: impl Into<String>, value: f64) -> Self {
        Self::new(name, help, value, ValueKind::Counter)
    }

    /// Create an untyped record with no help text.
    #[must_use]
    pub fn untyped(name: &str, value: f64) -> Self {
        Self::new(name, String::new(), value, ValueKind::Untyped)
    }

    /// Append a label, keeping insertion order.
    #[must_use]
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((name.into(), value.into()));
        self
    }

    /// Append every label in `labels`, keeping their order.
    #[must_use]
    pub fn with_labels(mut self, labels: LabelPairs) -> Self {
        self.labels.extend(labels);
        self
    }

    /// The sanitized metric name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The help text, possibly empty
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// The labels in insertion order
    #[must_use]
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    /// The sample value
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The value kind
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

/// Replace every character outside `[a-zA-Z0-9_:]` with `_`.
///
/// A name may not start with a digit, so one is prefixed with `_`. An empty
/// name becomes `_`.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len() + 1);
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.push('_');
    }
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
            sanitized.push(c);
        } else {
            sanitized.push('_');
        }
    }
    if sanitized.is_empty() {
        sanitized.push('_');
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sanitize_replaces_dashes() {
        assert_eq!(sanitize_name("GC-PS-MarkSweep"), "GC_PS_MarkSweep");
    }

    #[test]
    fn sanitize_keeps_valid_names() {
        assert_eq!(sanitize_name("load_average1"), "load_average1");
        assert_eq!(sanitize_name("job:requests:rate5m"), "job:requests:rate5m");
    }

    #[test]
    fn sanitize_leading_digit_and_empty() {
        assert_eq!(sanitize_name("5xx.errors"), "_5xx_errors");
        assert_eq!(sanitize_name(""), "_");
    }

    #[test]
    fn sanitize_is_per_character() {
        // one underscore per character, not per byte
        assert_eq!(sanitize_name("Größe"), "Gr__e");
    }

    #[test]
    fn record_builder_keeps_label_order() {
        let record = MetricRecord::gauge("commonstatus info", "help", 1.0)
            .with_label("release_tag", "0.0.32")
            .with_label("branch", "HEAD");
        assert_eq!(record.name(), "commonstatus_info");
        assert_eq!(
            record.labels(),
            &[
                ("release_tag".to_string(), "0.0.32".to_string()),
                ("branch".to_string(), "HEAD".to_string()),
            ]
        );
        assert_eq!(record.kind(), ValueKind::Gauge);
    }

    proptest! {
        #[test]
        fn prop_sanitized_names_are_valid(name in ".*") {
            let sanitized = sanitize_name(&name);
            let mut chars = sanitized.chars();
            let first = chars.next().expect("sanitized name is never empty");
            prop_assert!(first.is_ascii_alphabetic() || first == '_' || first == ':');
            prop_assert!(chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':'));
        }
    }
}
