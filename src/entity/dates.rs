//! Year extraction for date attributes.
//!
//! Date attributes are sorted sets scored by year. A year is the first run of
//! ASCII digits in a string; strings without one are skipped, never an error.

use crate::record::Record;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref YEAR: Regex = Regex::new(r"[0-9]+").expect("valid year regex");
}

/// Fixed-length data elements field.
pub const FIXED_FIELD_TAG: &str = "008";

/// Score for a date string: its first digit run, if any.
///
/// ```
/// use rdacore::entity::dates::extract_year;
///
/// assert_eq!(extract_year("c1985."), Some(1985));
/// assert_eq!(extract_year("[19--?]"), Some(19));
/// assert_eq!(extract_year("n.d."), None);
/// ```
#[must_use]
pub fn extract_year(text: &str) -> Option<i64> {
    YEAR.find(text).and_then(|m| m.as_str().parse().ok())
}

/// The two dates of the 008 field (`008/07-10` and `008/11-14`) that carry
/// a year, each as `(year, original segment)`.
///
/// Blank segments and segments without digits are skipped.
#[must_use]
pub fn fixed_field_dates(record: &Record) -> Vec<(i64, String)> {
    let Some(value) = record.get_control_field(FIXED_FIELD_TAG) else {
        return Vec::new();
    };
    let chars: Vec<char> = value.chars().collect();
    let mut dates = Vec::with_capacity(2);
    for (start, end) in [(7, 11), (11, 15)] {
        let segment: String = chars
            .get(start..end.min(chars.len()))
            .map(|s| s.iter().collect())
            .unwrap_or_default();
        if segment.trim().is_empty() {
            continue;
        }
        match extract_year(&segment) {
            Some(year) => dates.push((year, segment)),
            None => tracing::debug!(segment = %segment, "no year in fixed-field date"),
        }
    }
    dates
}

/// Type of date code, `008/06`.
#[must_use]
pub fn date_type(record: &Record) -> Option<char> {
    record
        .get_control_field(FIXED_FIELD_TAG)
        .and_then(|v| v.chars().nth(6))
}
