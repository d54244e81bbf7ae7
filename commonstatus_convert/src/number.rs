//! Numeric literal normalization
//!
//! Status pages print numbers with whatever digit grouping the host locale
//! prefers: `9,220,838,392`, `9.220.838.392,01` and `4,997.14` all show up in
//! the wild. No locale is declared, so the convention is inferred from the
//! shape of each literal. The first matching rule wins:
//!
//! 1. digits and `,` only: every `,` groups thousands.
//! 2. three or more `.` separated groups, no `,`: every `.` groups thousands.
//! 3. `.` groups followed by a `,` fraction: `.` groups, `,` is the decimal
//!    point.
//! 4. `,` groups followed by a `.` fraction: `,` groups, `.` is the decimal
//!    point.
//! 5. anything else is parsed as written.
//!
//! A single `.` with no `,` is therefore always a decimal point.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

static COMMA_GROUPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(,\d+)+$").expect("Invalid regex pattern provided"));
static DOT_GROUPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+){2,}$").expect("Invalid regex pattern provided"));
static DOT_GROUPED_COMMA_FRACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)+,\d+$").expect("Invalid regex pattern provided"));
static COMMA_GROUPED_DOT_FRACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(,\d+)+\.\d+$").expect("Invalid regex pattern provided"));

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors produced by [`normalize`]
pub enum Error {
    /// The literal is empty, contains characters other than digits, `,` and
    /// `.`, or is not a number under any grouping convention.
    #[error("malformed number: {0:?}")]
    MalformedNumber(String),
}

/// Resolve `literal` into a float, inferring its grouping convention.
///
/// # Errors
///
/// Returns [`Error::MalformedNumber`] if `literal` is empty, holds characters
/// other than ASCII digits, `,` and `.`, or does not parse after separators
/// are resolved.
pub fn normalize(literal: &str) -> Result<f64, Error> {
    if literal.is_empty()
        || !literal
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b',' || b == b'.')
    {
        return Err(Error::MalformedNumber(literal.to_string()));
    }

    let canonical: Cow<'_, str> = if COMMA_GROUPED.is_match(literal) {
        Cow::Owned(literal.replace(',', ""))
    } else if DOT_GROUPED.is_match(literal) {
        Cow::Owned(literal.replace('.', ""))
    } else if DOT_GROUPED_COMMA_FRACTION.is_match(literal) {
        Cow::Owned(literal.replace('.', "").replace(',', "."))
    } else if COMMA_GROUPED_DOT_FRACTION.is_match(literal) {
        Cow::Owned(literal.replace(',', ""))
    } else {
        Cow::Borrowed(literal)
    };

    canonical
        .parse::<f64>()
        .map_err(|_| Error::MalformedNumber(literal.to_string()))
}
