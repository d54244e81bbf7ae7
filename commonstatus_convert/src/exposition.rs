//! Prometheus text exposition
//!
//! [`MetricSet`] is the per-probe output sink. It keeps records in the order
//! they were produced and encodes them in the text exposition format,
//! version 0.0.4.
//! <https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md>
//!
//! The [`parser`] module recognizes lines that are already valid exposition
//! text so they can bypass conversion.

use std::fmt::{self, Write};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::metric::{LabelPairs, MetricRecord, ValueKind};

pub mod parser;

/// `Content-Type` of an encoded [`MetricSet`]
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors produced when adding to a [`MetricSet`]
pub enum Error {
    /// The family already holds samples of another kind.
    #[error("metric {name} is already a {existing}, refusing a {rejected} sample")]
    KindConflict {
        /// The family name
        name: String,
        /// Kind of the samples already held
        existing: ValueKind,
        /// Kind of the refused sample
        rejected: ValueKind,
    },
    /// A sample with the same name and label set is already held.
    #[error("metric {name} already has a sample labelled {labels:?}")]
    DuplicateSeries {
        /// The family name
        name: String,
        /// The label set, sorted by label name
        labels: LabelPairs,
    },
}

// Name and label set sorted by label name; identifies one series.
type SeriesKey = (String, LabelPairs);

fn series_key(record: &MetricRecord) -> SeriesKey {
    let mut labels = record.labels().to_vec();
    labels.sort();
    (record.name().to_string(), labels)
}

fn check_kind(record: &MetricRecord, existing: Option<ValueKind>) -> Result<(), Error> {
    match existing {
        Some(existing) if existing != record.kind() => Err(Error::KindConflict {
            name: record.name().to_string(),
            existing,
            rejected: record.kind(),
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
/// Ordered collection of the metrics produced by one probe
///
/// Every family has one kind and every series appears once. A record that
/// would break either rule is refused, so the encoded set is always a scrape
/// Prometheus accepts.
pub struct MetricSet {
    records: Vec<MetricRecord>,
    families: FxHashMap<String, ValueKind>,
    series: FxHashSet<SeriesKey>,
}

impl MetricSet {
    /// Create an empty [`MetricSet`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KindConflict`] if the record's family holds samples of
    /// another kind, or [`Error::DuplicateSeries`] if its series is already
    /// held. The set is left unchanged.
    pub fn push(&mut self, record: MetricRecord) -> Result<(), Error> {
        let key = self.check(&record)?;
        self.insert(record, key);
        Ok(())
    }

    /// Append every record of `records`, or none of them.
    ///
    /// # Errors
    ///
    /// See [`MetricSet::push`]. Records of the batch also collide with each
    /// other.
    pub fn push_all(&mut self, records: Vec<MetricRecord>) -> Result<usize, Error> {
        let mut kinds: FxHashMap<&str, ValueKind> = FxHashMap::default();
        let mut keys = Vec::with_capacity(records.len());
        for record in &records {
            if let Some(&kind) = kinds.get(record.name()) {
                check_kind(record, Some(kind))?;
            }
            let key = self.check(record)?;
            if keys.contains(&key) {
                return Err(Error::DuplicateSeries {
                    name: key.0,
                    labels: key.1,
                });
            }
            kinds.insert(record.name(), record.kind());
            keys.push(key);
        }

        let produced = records.len();
        for (record, key) in records.into_iter().zip(keys) {
            self.insert(record, key);
        }
        Ok(produced)
    }

    fn check(&self, record: &MetricRecord) -> Result<SeriesKey, Error> {
        check_kind(record, self.families.get(record.name()).copied())?;
        let key = series_key(record);
        if self.series.contains(&key) {
            return Err(Error::DuplicateSeries {
                name: key.0,
                labels: key.1,
            });
        }
        Ok(key)
    }

    fn insert(&mut self, record: MetricRecord, key: SeriesKey) {
        self.families
            .entry(record.name().to_string())
            .or_insert(record.kind());
        self.series.insert(key);
        self.records.push(record);
    }

    /// Number of records held
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate the records in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, MetricRecord> {
        self.records.iter()
    }

    /// Look up the first record named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetricRecord> {
        self.records.iter().find(|r| r.name() == name)
    }

    /// Encode the set in the text exposition format.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl From<MetricRecord> for MetricSet {
    fn from(record: MetricRecord) -> Self {
        let mut set = Self::new();
        let key = series_key(&record);
        set.insert(record, key);
        set
    }
}

impl<'a> IntoIterator for &'a MetricSet {
    type Item = &'a MetricRecord;
    type IntoIter = std::slice::Iter<'a, MetricRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for MetricSet {
    /// A family's `# HELP` and `# TYPE` lines may appear only once, so samples
    /// are grouped by name, families ordered by first appearance. The first
    /// sample of a family decides its help text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut index: FxHashMap<&str, usize> = FxHashMap::default();
        let mut families: Vec<Vec<&MetricRecord>> = Vec::new();
        for record in &self.records {
            if let Some(&i) = index.get(record.name()) {
                families[i].push(record);
            } else {
                index.insert(record.name(), families.len());
                families.push(vec![record]);
            }
        }

        for family in families {
            let head = family[0];
            let name = head.name();
            if !head.help().is_empty() {
                f.write_str("# HELP ")?;
                f.write_str(name)?;
                f.write_char(' ')?;
                write_escaped(f, head.help(), false)?;
                f.write_char('\n')?;
            }
            writeln!(f, "# TYPE {name} {}", head.kind())?;
            for record in family {
                write_sample(f, record)?;
            }
        }
        Ok(())
    }
}

fn write_sample(f: &mut impl Write, record: &MetricRecord) -> fmt::Result {
    f.write_str(record.name())?;
    if !record.labels().is_empty() {
        f.write_char('{')?;
        for (i, (name, value)) in record.labels().iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            f.write_str(name)?;
            f.write_str("=\"")?;
            write_escaped(f, value, true)?;
            f.write_char('"')?;
        }
        f.write_char('}')?;
    }
    f.write_char(' ')?;
    write_value(f, record.value())?;
    f.write_char('\n')
}

fn write_escaped(f: &mut impl Write, text: &str, quotes: bool) -> fmt::Result {
    for c in text.chars() {
        match c {
            '\\' => f.write_str(r"\\")?,
            '\n' => f.write_str(r"\n")?,
            '"' if quotes => f.write_str("\\\"")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

pub(crate) fn write_value(f: &mut impl Write, value: f64) -> fmt::Result {
    if value.is_nan() {
        f.write_str("NaN")
    } else if value.is_infinite() {
        f.write_str(if value > 0.0 { "+Inf" } else { "-Inf" })
    } else {
        write!(f, "{value}")
    }
}
