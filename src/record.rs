//! MARC bibliographic record structures.
//!
//! This module provides the read-only input model consumed by ingestion:
//! - [`Record`] — one bibliographic record
//! - [`Field`] — a data field (010+) with two indicators and ordered subfields
//! - [`Subfield`] — one labelled value inside a data field
//! - [`FieldRef`] — a borrowed view over either kind of field occurrence,
//!   which is what extraction rules are evaluated against
//!
//! # Examples
//!
//! ```
//! use rdacore::{Field, Leader, Record};
//!
//! let record = Record::builder(Leader::default())
//!     .control_field_str("001", "12345")
//!     .field(
//!         Field::builder("245".to_string(), '1', '0')
//!             .subfield_str('a', "Title")
//!             .build(),
//!     )
//!     .build();
//!
//! assert_eq!(record.field_instances("245").count(), 1);
//! ```

use crate::leader::Leader;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Whether `tag` names a control field (`001`-`009`).
#[must_use]
pub fn is_control_tag(tag: &str) -> bool {
    tag.len() == 3 && tag.starts_with("00") && tag.bytes().all(|b| b.is_ascii_digit())
}

/// A MARC bibliographic record
///
/// Fields are stored in insertion order using `IndexMap`. Control fields may
/// repeat (e.g. `007`), so each tag maps to every occurrence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    /// Record leader (24 bytes)
    pub leader: Leader,
    /// Control fields (001-009) - tag -> values, preserves insertion order
    pub control_fields: IndexMap<String, Vec<String>>,
    /// Data fields (010+) - tag -> fields, preserves insertion order
    pub fields: IndexMap<String, Vec<Field>>,
}

/// A data field in a MARC record (fields 010 and higher)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field tag (3 characters)
    pub tag: String,
    /// First indicator
    pub indicator1: char,
    /// Second indicator
    pub indicator2: char,
    /// Subfields in field order
    pub subfields: SmallVec<[Subfield; 4]>,
}

/// A subfield within a data field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subfield {
    /// Subfield code (single character)
    pub code: char,
    /// Subfield value
    pub value: String,
}

/// One occurrence of a field, control or data, as seen by the rule engine.
#[derive(Debug, Clone, Copy)]
pub enum FieldRef<'a> {
    /// A control field: tag plus fixed-position value
    Control {
        /// Field tag
        tag: &'a str,
        /// Positional value
        value: &'a str,
    },
    /// A data field
    Data(&'a Field),
}

impl<'a> FieldRef<'a> {
    /// Tag of the underlying field.
    #[must_use]
    pub fn tag(&self) -> &'a str {
        match *self {
            FieldRef::Control { tag, .. } => tag,
            FieldRef::Data(field) => &field.tag,
        }
    }

    /// Indicator `which` (0 or 1) of a data field; `None` for control fields.
    #[must_use]
    pub fn indicator(&self, which: u8) -> Option<char> {
        match self {
            FieldRef::Control { .. } => None,
            FieldRef::Data(field) => Some(if which == 0 {
                field.indicator1
            } else {
                field.indicator2
            }),
        }
    }

    /// Concatenation of every `code` subfield, empty when absent or for control fields.
    #[must_use]
    pub fn joined_subfield(&self, code: char) -> String {
        match self {
            FieldRef::Control { .. } => String::new(),
            FieldRef::Data(field) => field.subfields_by_code(code).collect(),
        }
    }

    /// Character at `index` of a control field value.
    #[must_use]
    pub fn char_at(&self, index: usize) -> Option<char> {
        match *self {
            FieldRef::Control { value, .. } => value.chars().nth(index),
            FieldRef::Data(_) => None,
        }
    }
}

impl Record {
    /// Create a new MARC record with the given leader
    #[must_use]
    pub fn new(leader: Leader) -> Self {
        Record {
            leader,
            control_fields: IndexMap::new(),
            fields: IndexMap::new(),
        }
    }

    /// Create a builder for fluently constructing MARC records
    #[must_use]
    pub fn builder(leader: Leader) -> RecordBuilder {
        RecordBuilder {
            record: Record::new(leader),
        }
    }

    /// Add a control field (001-009)
    pub fn add_control_field(&mut self, tag: String, value: String) {
        self.control_fields.entry(tag).or_default().push(value);
    }

    /// Add a control field using string slices
    pub fn add_control_field_str(&mut self, tag: &str, value: &str) {
        self.add_control_field(tag.to_string(), value.to_string());
    }

    /// Get the first value of a control field
    #[must_use]
    pub fn get_control_field(&self, tag: &str) -> Option<&str> {
        self.control_fields
            .get(tag)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Add a data field
    pub fn add_field(&mut self, field: Field) {
        self.fields
            .entry(field.tag.clone())
            .or_default()
            .push(field);
    }

    /// Get first field with a given tag
    #[must_use]
    pub fn get_field(&self, tag: &str) -> Option<&Field> {
        self.fields.get(tag).and_then(|v| v.first())
    }

    /// Iterate over all data fields in insertion order
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().flat_map(|v| v.iter())
    }

    /// Iterate over data fields matching a specific tag
    pub fn fields_by_tag(&self, tag: &str) -> impl Iterator<Item = &Field> {
        self.fields.get(tag).map(|v| v.iter()).into_iter().flatten()
    }

    /// Iterate over every occurrence of `tag`, control or data.
    ///
    /// ```
    /// use rdacore::{FieldRef, Leader, Record};
    ///
    /// let mut record = Record::new(Leader::default());
    /// record.add_control_field_str("007", "vd cvaizq");
    /// record.add_control_field_str("007", "cr una---uuuuu");
    ///
    /// let values: Vec<_> = record
    ///     .field_instances("007")
    ///     .filter_map(|f| match f {
    ///         FieldRef::Control { value, .. } => Some(value),
    ///         FieldRef::Data(_) => None,
    ///     })
    ///     .collect();
    /// assert_eq!(values, vec!["vd cvaizq", "cr una---uuuuu"]);
    /// ```
    pub fn field_instances<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = FieldRef<'a>> + 'a {
        let controls = self
            .control_fields
            .get(tag)
            .into_iter()
            .flatten()
            .map(move |value| FieldRef::Control {
                tag,
                value: value.as_str(),
            });
        let data = self.fields_by_tag(tag).map(FieldRef::Data);
        controls.chain(data)
    }

    /// Get the control number (001)
    #[must_use]
    pub fn control_number(&self) -> Option<&str> {
        self.get_control_field("001")
    }

    /// Get the title proper (245 $a)
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.get_field("245").and_then(|f| f.get_subfield('a'))
    }
}

/// Builder for fluently constructing [`Record`]s
#[derive(Debug)]
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    /// Add a control field using string slices
    #[must_use]
    pub fn control_field_str(mut self, tag: &str, value: &str) -> Self {
        self.record.add_control_field_str(tag, value);
        self
    }

    /// Add a data field to the record being built
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.record.add_field(field);
        self
    }

    /// Build the record
    #[must_use]
    pub fn build(self) -> Record {
        self.record
    }
}

impl Field {
    /// Create a new data field
    #[must_use]
    pub fn new(tag: String, indicator1: char, indicator2: char) -> Self {
        Field {
            tag,
            indicator1,
            indicator2,
            subfields: SmallVec::new(),
        }
    }

    /// Create a builder for constructing fields fluently
    #[must_use]
    pub fn builder(tag: String, indicator1: char, indicator2: char) -> FieldBuilder {
        FieldBuilder {
            field: Field::new(tag, indicator1, indicator2),
        }
    }

    /// Add a subfield
    pub fn add_subfield(&mut self, code: char, value: String) {
        self.subfields.push(Subfield { code, value });
    }

    /// Add a subfield using a string slice
    pub fn add_subfield_str(&mut self, code: char, value: &str) {
        self.add_subfield(code, value.to_string());
    }

    /// Get first value for a subfield code
    #[must_use]
    pub fn get_subfield(&self, code: char) -> Option<&str> {
        self.subfields
            .iter()
            .find(|sf| sf.code == code)
            .map(|sf| sf.value.as_str())
    }

    /// Iterate over subfields with a specific code
    pub fn subfields_by_code(&self, code: char) -> impl Iterator<Item = &str> {
        self.subfields
            .iter()
            .filter(move |sf| sf.code == code)
            .map(|sf| sf.value.as_str())
    }

    /// Get all subfield values matching any of the given codes, in field order
    #[must_use]
    pub fn get_subfields(&self, codes: &[char]) -> Vec<&str> {
        self.subfields
            .iter()
            .filter(|sf| codes.contains(&sf.code))
            .map(|sf| sf.value.as_str())
            .collect()
    }
}

/// Builder for fluently constructing [`Field`]s
#[derive(Debug)]
pub struct FieldBuilder {
    field: Field,
}

impl FieldBuilder {
    /// Add a subfield using a string slice
    #[must_use]
    pub fn subfield_str(mut self, code: char, value: &str) -> Self {
        self.field.add_subfield_str(code, value);
        self
    }

    /// Build the field
    #[must_use]
    pub fn build(self) -> Field {
        self.field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let record = Record::new(Leader::default());
        assert!(record.control_fields.is_empty());
        assert!(record.fields.is_empty());
    }

    #[test]
    fn test_add_control_field() {
        let mut record = Record::new(Leader::default());
        record.add_control_field("001".to_string(), "12345".to_string());
        assert_eq!(record.get_control_field("001"), Some("12345"));
        assert_eq!(record.control_number(), Some("12345"));
    }

    #[test]
    fn test_repeated_control_field_keeps_every_value() {
        let mut record = Record::new(Leader::default());
        record.add_control_field_str("007", "vd");
        record.add_control_field_str("007", "cr");
        assert_eq!(record.get_control_field("007"), Some("vd"));
        assert_eq!(record.field_instances("007").count(), 2);
    }

    #[test]
    fn test_field_subfields_in_field_order() {
        let field = Field::builder("245".to_string(), '1', '0')
            .subfield_str('a', "Title")
            .subfield_str('c', "Author")
            .subfield_str('a', "Title continued")
            .build();

        assert_eq!(field.get_subfield('a'), Some("Title"));
        assert_eq!(
            field.subfields_by_code('a').collect::<Vec<_>>(),
            vec!["Title", "Title continued"]
        );
        assert_eq!(
            field.get_subfields(&['c', 'a']),
            vec!["Title", "Author", "Title continued"]
        );
    }

    #[test]
    fn test_field_ref_accessors() {
        let field = Field::builder("336".to_string(), ' ', '#')
            .subfield_str('a', "text")
            .subfield_str('2', "marc")
            .subfield_str('2', "content")
            .build();
        let data = FieldRef::Data(&field);
        assert_eq!(data.tag(), "336");
        assert_eq!(data.indicator(0), Some(' '));
        assert_eq!(data.indicator(1), Some('#'));
        assert_eq!(data.joined_subfield('2'), "marccontent");
        assert_eq!(data.char_at(0), None);

        let control = FieldRef::Control {
            tag: "008",
            value: "100803s2010",
        };
        assert_eq!(control.indicator(0), None);
        assert_eq!(control.char_at(6), Some('s'));
        assert_eq!(control.char_at(40), None);
        assert_eq!(control.joined_subfield('a'), "");
    }

    #[test]
    fn test_is_control_tag() {
        assert!(is_control_tag("001"));
        assert!(is_control_tag("008"));
        assert!(!is_control_tag("010"));
        assert!(!is_control_tag("245"));
        assert!(!is_control_tag("00"));
        assert!(!is_control_tag("00a"));
    }

    #[test]
    fn test_title_helper() {
        let record = Record::builder(Leader::default())
            .field(
                Field::builder("245".to_string(), '1', '0')
                    .subfield_str('a', "Main title")
                    .build(),
            )
            .build();
        assert_eq!(record.title(), Some("Main title"));
    }
}
