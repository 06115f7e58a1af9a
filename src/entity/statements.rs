//! Statement groups: edition, publication, production, manufacture and
//! copyright date.
//!
//! A statement table lists groups of elements. Each element collects
//! subfield values from `(tag, subfield)` sources and, for dated elements,
//! the 008 dates. Plain elements become sets; dated elements become sorted
//! sets scored by year. A group is only created when one of its elements
//! found something.
//!
//! ```json
//! [
//!   { "group": "editionStatement", "elements": [
//!       { "attribute": "designationOfEdition", "sources": [{ "tag": "250", "subfield": "a" }] }
//!   ] },
//!   { "elements": [
//!       { "attribute": "copyrightDate", "sorted": true,
//!         "fixed_dates": { "date_types": ["s", "t"] },
//!         "sources": [{ "tag": "542", "subfield": "g" }] }
//!   ] }
//! ]
//! ```

use crate::entity::dates::{date_type, extract_year, fixed_field_dates};
use crate::error::{IngestError, Result};
use crate::merge::AttributeStore;
use crate::record::Record;
use crate::rules::validate_attribute_name;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

/// One `(tag, subfield)` value source.
#[derive(Debug, Clone)]
pub struct Source {
    /// Data field tag
    pub tag: String,
    /// Subfield code
    pub subfield: char,
    /// Only values matching this pattern are taken
    pub pattern: Option<Regex>,
}

/// One element of a statement.
#[derive(Debug, Clone)]
pub struct StatementElement {
    /// Attribute the values are stored under
    pub attribute: String,
    /// Store as a year-scored sorted set
    pub sorted: bool,
    /// Include the 008 dates; an empty list means for every date type
    pub fixed_dates: Option<Vec<char>>,
    /// Subfield sources, in order
    pub sources: Vec<Source>,
}

/// A group of elements stored together.
#[derive(Debug, Clone)]
pub struct Statement {
    /// Group attribute; `None` stores the elements on the entity itself
    pub group: Option<String>,
    /// Elements of the group
    pub elements: Vec<StatementElement>,
}

/// Ordered list of statements.
#[derive(Debug, Clone, Default)]
pub struct StatementTable {
    statements: Vec<Statement>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStatement {
    #[serde(default)]
    group: Option<String>,
    elements: Vec<RawElement>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawElement {
    attribute: String,
    #[serde(default)]
    sorted: bool,
    #[serde(default)]
    fixed_dates: Option<RawFixedDates>,
    #[serde(default)]
    sources: Vec<RawSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFixedDates {
    #[serde(default)]
    date_types: Vec<char>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
    tag: String,
    subfield: char,
    #[serde(default)]
    matches: Option<String>,
}

impl StatementTable {
    /// Parse and validate a statement table.
    ///
    /// # Errors
    ///
    /// [`IngestError::InvalidRuleConfiguration`] for bad JSON, attribute
    /// names, tags or patterns.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: Vec<RawStatement> = serde_json::from_str(json)
            .map_err(|e| IngestError::invalid_rule("statements", e.to_string()))?;
        let statements = raw
            .into_iter()
            .map(convert_statement)
            .collect::<Result<Vec<_>>>()?;
        Ok(StatementTable { statements })
    }

    /// Read a statement table from a file.
    ///
    /// # Errors
    ///
    /// Returns an IO error or a configuration error.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Iterate statements in order.
    pub fn iter(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }
}

fn convert_statement(raw: RawStatement) -> Result<Statement> {
    if let Some(group) = &raw.group {
        validate_attribute_name(group)?;
    }
    let elements = raw
        .elements
        .into_iter()
        .map(|element| {
            validate_attribute_name(&element.attribute)?;
            let sources = element
                .sources
                .into_iter()
                .map(|source| {
                    let context = format!("{}/{}", element.attribute, source.tag);
                    if source.tag.chars().count() != 3 {
                        return Err(IngestError::invalid_rule(
                            context,
                            "tags must be three characters",
                        ));
                    }
                    let pattern = source
                        .matches
                        .as_deref()
                        .map(Regex::new)
                        .transpose()
                        .map_err(|e| IngestError::invalid_rule(&context, e.to_string()))?;
                    Ok(Source {
                        tag: source.tag,
                        subfield: source.subfield,
                        pattern,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(StatementElement {
                attribute: element.attribute,
                sorted: element.sorted,
                fixed_dates: element.fixed_dates.map(|f| f.date_types),
                sources,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Statement {
        group: raw.group,
        elements,
    })
}

enum Collected {
    Plain(Vec<String>),
    Dated(Vec<(i64, String)>),
}

impl Collected {
    fn is_empty(&self) -> bool {
        match self {
            Collected::Plain(v) => v.is_empty(),
            Collected::Dated(v) => v.is_empty(),
        }
    }
}

fn source_values<'r>(source: &Source, record: &'r Record) -> Vec<&'r str> {
    record
        .fields_by_tag(&source.tag)
        .flat_map(|field| field.subfields_by_code(source.subfield))
        .filter(|value| source.pattern.as_ref().map_or(true, |p| p.is_match(value)))
        .collect()
}

fn collect(element: &StatementElement, record: &Record) -> Collected {
    if !element.sorted {
        return Collected::Plain(
            element
                .sources
                .iter()
                .flat_map(|s| source_values(s, record))
                .map(str::to_string)
                .collect(),
        );
    }

    let mut dated = Vec::new();
    if let Some(types) = &element.fixed_dates {
        if types.is_empty() || date_type(record).is_some_and(|t| types.contains(&t)) {
            dated.extend(fixed_field_dates(record));
        }
    }
    for value in element.sources.iter().flat_map(|s| source_values(s, record)) {
        match extract_year(value) {
            Some(year) => dated.push((year, value.to_string())),
            None => tracing::debug!(attribute = %element.attribute, value, "no year in date value"),
        }
    }
    Collected::Dated(dated)
}

/// Store every statement of `table` found in `record` on `entity_key`.
/// Returns the number of groups or top-level elements written.
///
/// # Errors
///
/// Datastore errors and attribute shape conflicts.
pub fn store_statements(
    attrs: &AttributeStore<'_>,
    entity_key: &str,
    table: &StatementTable,
    record: &Record,
) -> Result<usize> {
    let mut written = 0;
    for statement in table.iter() {
        let collected: Vec<(&StatementElement, Collected)> = statement
            .elements
            .iter()
            .map(|element| (element, collect(element, record)))
            .filter(|(_, c)| !c.is_empty())
            .collect();
        if collected.is_empty() {
            continue;
        }

        let owner = match &statement.group {
            Some(group) => attrs.group(entity_key, group)?,
            None => entity_key.to_string(),
        };
        for (element, values) in collected {
            match values {
                Collected::Plain(values) => {
                    attrs.merge_set(&owner, &element.attribute, &values)?;
                },
                Collected::Dated(entries) => {
                    attrs.merge_dated(&owner, &element.attribute, &entries)?;
                },
            }
        }
        written += 1;
    }
    Ok(written)
}
