//! Declarative extraction rules.
//!
//! A rule document maps RDA attribute names to MARC tags to extraction rules:
//!
//! ```json
//! {
//!   "titleProper": { "245": { "subfields": ["a"] } },
//!   "carrierType": { "007": { "positions": { "start": 0, "end": 1 } } },
//!   "contentType": { "336": { "subfields": ["a"], "condition": "$2 == 'marccontent'" } }
//! }
//! ```
//!
//! Documents are configuration: they are validated once into a [`RuleSet`]
//! and every structural problem is reported as
//! [`IngestError::InvalidRuleConfiguration`] at load time, never while a
//! record is being ingested. Evaluation lives in [`engine`], the condition
//! grammar in [`condition`].

pub mod condition;
pub mod engine;

use crate::error::{IngestError, Result};
use crate::record::is_control_tag;
use condition::Condition;
use indexmap::IndexMap;
use serde::Deserialize;
use smallvec::SmallVec;
use std::path::Path;

pub use engine::Extracted;

/// Attribute name reserved for the per-entity shape table.
pub const RESERVED_ATTRIBUTE: &str = "shapes";

/// Map the various spellings of a blank indicator to `' '`.
#[must_use]
pub fn normalize_indicator(c: char) -> char {
    match c {
        '#' | '_' | '\\' => ' ',
        other => other,
    }
}

/// Where an extracted value's label comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    /// Fixed label
    Literal(String),
    /// Taken from the named subfield of the matched field (`"$2"`)
    FromSubfield(char),
}

/// An ordered subfield selection and the shape of its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubfieldSelection {
    /// Subfield codes to collect; values come back in field order
    pub codes: SmallVec<[char; 4]>,
    /// `true`: one concatenated string; `false`: one value per matched subfield
    pub join: bool,
    /// Label overriding the rule's own
    pub label: Option<Label>,
}

/// One indicator dispatch table: indicator value -> sub-rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorTable {
    /// 0 for the first indicator, 1 for the second
    pub which: u8,
    /// Sub-rule per normalized indicator value
    pub entries: IndexMap<char, SubfieldSelection>,
}

/// What a rule extracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Inclusive character slice of a control field
    Positions {
        /// First position (0-indexed)
        start: usize,
        /// Last position, inclusive
        end: usize,
    },
    /// Subfields of a data field
    Subfields(SubfieldSelection),
    /// Indicator-dispatched subfield selections, first indicator first
    Dispatch(Vec<IndicatorTable>),
}

/// A validated rule binding one attribute to one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Target attribute name
    pub attribute: String,
    /// MARC tag the rule applies to
    pub tag: String,
    /// Extraction to perform
    pub extraction: Extraction,
    /// Default label for extracted values
    pub label: Option<Label>,
    /// Indicator filter: every listed indicator must hold one of its values
    pub indicator_filter: Vec<(u8, Vec<char>)>,
    /// Optional predicate checked before extraction
    pub condition: Option<Condition>,
}

/// An ordered, validated set of rules for one entity kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    positions: Option<RawPositions>,
    subfields: Option<Vec<String>>,
    join: Option<bool>,
    label: Option<String>,
    indicators: Option<IndexMap<String, RawIndicator>>,
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPositions {
    start: RawNumber,
    end: RawNumber,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(usize),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawIndicator {
    Accept(Vec<String>),
    Dispatch(IndexMap<String, RawSubRule>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSubRule {
    subfields: Vec<String>,
    join: Option<bool>,
    label: Option<String>,
}

type RawDocument = IndexMap<String, IndexMap<String, RawRule>>;

impl RuleSet {
    /// Parse and validate a rule document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidRuleConfiguration`] if the document is
    /// not valid JSON of the expected shape or any rule fails validation.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawDocument = serde_json::from_str(json)
            .map_err(|e| IngestError::invalid_rule("document", e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Parse and validate a rule document from an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`RuleSet::from_json_str`].
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let raw: RawDocument = serde_json::from_value(value)
            .map_err(|e| IngestError::invalid_rule("document", e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Load and validate a rule document from a file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, otherwise the same
    /// errors as [`RuleSet::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Build a rule set from rules that were constructed in code.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidRuleConfiguration`] if a rule breaks a
    /// structural invariant.
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self> {
        for rule in &rules {
            validate_rule(rule)?;
        }
        Ok(RuleSet { rules })
    }

    fn from_raw(raw: RawDocument) -> Result<Self> {
        let mut rules = Vec::new();
        for (attribute, by_tag) in raw {
            validate_attribute_name(&attribute)?;
            for (tag, raw_rule) in by_tag {
                let rule = convert_rule(&attribute, &tag, raw_rule)?;
                validate_rule(&rule)?;
                rules.push(rule);
            }
        }
        Ok(RuleSet { rules })
    }

    /// Iterate over rules in document order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Number of (attribute, tag) rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Distinct attribute names, in document order.
    #[must_use]
    pub fn attributes(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if !seen.contains(&rule.attribute.as_str()) {
                seen.push(&rule.attribute);
            }
        }
        seen
    }

    /// Append the rules of `other` after this set's rules.
    #[must_use]
    pub fn extended(mut self, other: RuleSet) -> Self {
        self.rules.extend(other.rules);
        self
    }
}

pub(crate) fn validate_attribute_name(attribute: &str) -> Result<()> {
    if attribute.trim().is_empty() {
        return Err(IngestError::invalid_rule(
            "attribute",
            "attribute names must not be empty",
        ));
    }
    if attribute.contains(':') {
        return Err(IngestError::invalid_rule(
            attribute,
            "attribute names must not contain ':'",
        ));
    }
    if attribute == RESERVED_ATTRIBUTE {
        return Err(IngestError::invalid_rule(
            attribute,
            "attribute name is reserved",
        ));
    }
    Ok(())
}

fn validate_rule(rule: &Rule) -> Result<()> {
    let context = format!("{}/{}", rule.attribute, rule.tag);
    validate_attribute_name(&rule.attribute)?;
    if rule.tag.chars().count() != 3 {
        return Err(IngestError::invalid_rule(
            context,
            "tags must be three characters",
        ));
    }
    match &rule.extraction {
        Extraction::Positions { start, end } => {
            if start > end {
                return Err(IngestError::invalid_rule(
                    context,
                    format!("positions start {start} is after end {end}"),
                ));
            }
            if !is_control_tag(&rule.tag) {
                return Err(IngestError::invalid_rule(
                    context,
                    "positions only apply to control fields 001-009",
                ));
            }
            if !rule.indicator_filter.is_empty() {
                return Err(IngestError::invalid_rule(
                    context,
                    "control fields have no indicators",
                ));
            }
        },
        Extraction::Subfields(selection) => check_selection(&context, selection)?,
        Extraction::Dispatch(tables) => {
            if tables.is_empty() {
                return Err(IngestError::invalid_rule(context, "empty indicator dispatch"));
            }
            for table in tables {
                for selection in table.entries.values() {
                    check_selection(&context, selection)?;
                }
            }
        },
    }
    if !matches!(rule.extraction, Extraction::Positions { .. }) && is_control_tag(&rule.tag) {
        return Err(IngestError::invalid_rule(
            context,
            "control fields have no subfields; use positions",
        ));
    }
    Ok(())
}

fn check_selection(context: &str, selection: &SubfieldSelection) -> Result<()> {
    if selection.codes.is_empty() {
        return Err(IngestError::invalid_rule(
            context,
            "subfield list must not be empty",
        ));
    }
    Ok(())
}

fn convert_rule(attribute: &str, tag: &str, raw: RawRule) -> Result<Rule> {
    let context = format!("{attribute}/{tag}");

    let mut indicator_filter = Vec::new();
    let mut tables = Vec::new();
    for (position, spec) in raw.indicators.into_iter().flatten() {
        let which = match position.trim() {
            "0" => 0u8,
            "1" => 1u8,
            other => {
                return Err(IngestError::invalid_rule(
                    &context,
                    format!("indicator position must be \"0\" or \"1\", got \"{other}\""),
                ))
            },
        };
        match spec {
            RawIndicator::Accept(values) => {
                let values = values
                    .iter()
                    .map(|v| parse_indicator_value(&context, v))
                    .collect::<Result<Vec<_>>>()?;
                indicator_filter.push((which, values));
            },
            RawIndicator::Dispatch(entries) => {
                let mut table = IndexMap::new();
                for (value, sub) in entries {
                    let key = parse_indicator_value(&context, &value)?;
                    let codes = parse_codes(&context, &sub.subfields)?;
                    let join = sub.join.unwrap_or(codes.len() == 1);
                    let label = sub.label.as_deref().map(parse_label).transpose()?;
                    table.insert(key, SubfieldSelection { codes, join, label });
                }
                tables.push(IndicatorTable {
                    which,
                    entries: table,
                });
            },
        }
    }
    tables.sort_by_key(|t| t.which);

    let extraction = match (raw.positions, raw.subfields, tables.is_empty()) {
        (Some(positions), None, true) => Extraction::Positions {
            start: parse_number(&context, positions.start)?,
            end: parse_number(&context, positions.end)?,
        },
        (None, Some(subfields), true) => Extraction::Subfields(SubfieldSelection {
            codes: parse_codes(&context, &subfields)?,
            join: raw.join.unwrap_or(true),
            label: None,
        }),
        (None, None, false) => Extraction::Dispatch(tables),
        (None, None, true) => {
            return Err(IngestError::invalid_rule(
                context,
                "rule needs one of positions or subfields",
            ))
        },
        _ => {
            return Err(IngestError::invalid_rule(
                context,
                "rule must not combine positions, subfields and indicator dispatch",
            ))
        },
    };

    let condition = raw
        .condition
        .as_deref()
        .map(|text| Condition::parse(text).map_err(|e| IngestError::invalid_rule(&context, e)))
        .transpose()?;
    let label = raw.label.as_deref().map(parse_label).transpose()?;

    Ok(Rule {
        attribute: attribute.to_string(),
        tag: tag.to_string(),
        extraction,
        label,
        indicator_filter,
        condition,
    })
}

fn parse_number(context: &str, raw: RawNumber) -> Result<usize> {
    match raw {
        RawNumber::Int(n) => Ok(n),
        RawNumber::Text(text) => text.trim().parse().map_err(|_| {
            IngestError::invalid_rule(context, format!("position '{text}' is not a number"))
        }),
    }
}

fn parse_codes(context: &str, raw: &[String]) -> Result<SmallVec<[char; 4]>> {
    raw.iter()
        .map(|code| {
            let mut chars = code.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(IngestError::invalid_rule(
                    context,
                    format!("subfield code '{code}' must be one character"),
                )),
            }
        })
        .collect()
}

fn parse_indicator_value(context: &str, raw: &str) -> Result<char> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Ok(' '),
        (Some(c), None) => Ok(normalize_indicator(c)),
        _ => Err(IngestError::invalid_rule(
            context,
            format!("indicator value '{raw}' must be one character"),
        )),
    }
}

fn parse_label(raw: &str) -> Result<Label> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some('$'), Some(code), None) => Ok(Label::FromSubfield(code)),
        _ if raw.trim().is_empty() => Err(IngestError::invalid_rule(
            "label",
            "labels must not be empty",
        )),
        _ => Ok(Label::Literal(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_positions_and_subfields() {
        let rules = RuleSet::from_json_str(
            r#"{
                "carrierType": { "007": { "positions": { "start": "0", "end": 1 } } },
                "titleProper": { "245": { "subfields": ["a", "b"] } }
            }"#,
        )
        .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.attributes(), vec!["carrierType", "titleProper"]);

        let rule = rules.iter().next().unwrap();
        assert_eq!(rule.extraction, Extraction::Positions { start: 0, end: 1 });

        let rule = rules.iter().nth(1).unwrap();
        match &rule.extraction {
            Extraction::Subfields(sel) => {
                assert_eq!(sel.codes.as_slice(), &['a', 'b']);
                assert!(sel.join);
            },
            other => panic!("unexpected extraction {other:?}"),
        }
    }

    #[test]
    fn test_one_attribute_several_tags() {
        let rules = RuleSet::from_json_str(
            r#"{ "contentType": {
                    "336": { "subfields": ["a"] },
                    "130": { "subfields": ["h"] },
                    "700": { "subfields": ["h"] } } }"#,
        )
        .unwrap();
        let tags: Vec<&str> = rules.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, vec!["336", "130", "700"]);
        assert_eq!(rules.attributes(), vec!["contentType"]);
    }

    #[test]
    fn test_dispatch_tables_and_default_join() {
        let rules = RuleSet::from_json_str(
            r##"{ "standard-number": { "024": { "indicators": {
                    "1": { "#": { "subfields": ["a"] } },
                    "0": {
                        "0": { "subfields": ["a"], "label": "isrc" },
                        "7": { "subfields": ["a", "d"], "label": "$2" }
                    } } } } }"##,
        )
        .unwrap();
        let rule = rules.iter().next().unwrap();
        let Extraction::Dispatch(tables) = &rule.extraction else {
            panic!("expected dispatch");
        };
        assert_eq!(tables[0].which, 0);
        assert_eq!(tables[1].which, 1);
        assert!(tables[1].entries.contains_key(&' '));

        let isrc = &tables[0].entries[&'0'];
        assert!(isrc.join);
        assert_eq!(isrc.label, Some(Label::Literal("isrc".to_string())));
        let source = &tables[0].entries[&'7'];
        assert!(!source.join);
        assert_eq!(source.label, Some(Label::FromSubfield('2')));
    }

    #[test]
    fn test_indicator_filter() {
        let rules = RuleSet::from_json_str(
            r#"{ "author": { "100": { "subfields": ["a"], "indicators": { "0": ["0", "1"] } } } }"#,
        )
        .unwrap();
        let rule = rules.iter().next().unwrap();
        assert_eq!(rule.indicator_filter, vec![(0, vec!['0', '1'])]);
    }

    #[test]
    fn test_rejects_neither_or_both_extractions() {
        let neither = RuleSet::from_json_str(r#"{ "x": { "245": { "join": true } } }"#);
        assert!(matches!(
            neither,
            Err(IngestError::InvalidRuleConfiguration { .. })
        ));

        let both = RuleSet::from_json_str(
            r#"{ "x": { "008": { "positions": {"start": 0, "end": 1}, "subfields": ["a"] } } }"#,
        );
        assert!(both.is_err());
    }

    #[test]
    fn test_rejects_structural_mistakes() {
        let cases = [
            r#"{ "x": { "008": { "positions": {"start": 5, "end": 1} } } }"#,
            r#"{ "x": { "245": { "positions": {"start": 0, "end": 1} } } }"#,
            r#"{ "x": { "001": { "subfields": ["a"] } } }"#,
            r#"{ "x": { "245": { "subfields": [] } } }"#,
            r#"{ "x": { "245": { "subfields": ["ab"] } } }"#,
            r#"{ "x": { "24": { "subfields": ["a"] } } }"#,
            r#"{ "x:y": { "245": { "subfields": ["a"] } } }"#,
            r#"{ "shapes": { "245": { "subfields": ["a"] } } }"#,
            r#"{ "": { "245": { "subfields": ["a"] } } }"#,
            r#"{ "x": { "245": { "subfields": ["a"], "condition": "eval('1')" } } }"#,
            r#"{ "x": { "245": { "subfields": ["a"], "indicators": { "2": ["0"] } } } }"#,
            r#"{ "x": { "245": { "subfields": ["a"], "bogus": 1 } } }"#,
            r#"{ "x": { "008": { "positions": {"start": "a", "end": 1} } } }"#,
        ];
        for case in cases {
            assert!(
                matches!(
                    RuleSet::from_json_str(case),
                    Err(IngestError::InvalidRuleConfiguration { .. })
                ),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn test_error_names_attribute_and_tag() {
        let err = RuleSet::from_json_str(r#"{ "titleProper": { "245": {} } }"#).unwrap_err();
        assert!(err.to_string().contains("titleProper/245"), "{err}");
    }

    #[test]
    fn test_normalize_indicator() {
        assert_eq!(normalize_indicator('#'), ' ');
        assert_eq!(normalize_indicator('_'), ' ');
        assert_eq!(normalize_indicator(' '), ' ');
        assert_eq!(normalize_indicator('4'), '4');
    }
}
