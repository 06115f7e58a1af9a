//! Rule evaluation against field occurrences and whole records.
//!
//! [`evaluate`] is the single-field contract: it returns `None` whenever the
//! rule yields nothing for the occurrence (wrong field kind, short control
//! field, failed condition or indicator filter, no matching dispatch entry,
//! no matching subfield). None of those are errors.

use crate::record::{FieldRef, Record};
use crate::rules::{normalize_indicator, Extraction, Label, Rule, RuleSet, SubfieldSelection};
use indexmap::IndexMap;

/// Values a rule produced for one field occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Resolved label, if the rule (or its selected sub-rule) has one
    pub label: Option<String>,
    /// Extracted values, never empty
    pub values: Vec<String>,
}

/// Evaluate one rule against one field occurrence.
///
/// ```
/// use rdacore::rules::{engine, RuleSet};
/// use rdacore::FieldRef;
///
/// let rules = RuleSet::from_json_str(
///     r#"{ "carrierType": { "007": { "positions": { "start": 0, "end": 1 } } } }"#,
/// ).unwrap();
/// let rule = rules.iter().next().unwrap();
///
/// let hit = engine::evaluate(rule, FieldRef::Control { tag: "007", value: "vd cvaizq" });
/// assert_eq!(hit.unwrap().values, vec!["vd".to_string()]);
///
/// let short = engine::evaluate(rule, FieldRef::Control { tag: "007", value: "v" });
/// assert!(short.is_none());
/// ```
#[must_use]
pub fn evaluate(rule: &Rule, field: FieldRef<'_>) -> Option<Extracted> {
    if let Some(condition) = &rule.condition {
        if !condition.evaluate(field) {
            return None;
        }
    }

    match (&rule.extraction, field) {
        (Extraction::Positions { start, end }, FieldRef::Control { tag, value }) => {
            let width = end.checked_sub(*start).and_then(|w| w.checked_add(1))?;
            let slice: String = value.chars().skip(*start).take(width).collect();
            if slice.chars().count() != width {
                tracing::debug!(
                    tag,
                    attribute = %rule.attribute,
                    len = value.chars().count(),
                    "control field too short for positions rule"
                );
                return None;
            }
            Some(Extracted {
                label: resolve_label(rule.label.as_ref(), field),
                values: vec![slice],
            })
        },
        (Extraction::Subfields(selection), FieldRef::Data(_)) => {
            if !passes_filter(rule, field) {
                return None;
            }
            select(selection, rule.label.as_ref(), field)
        },
        (Extraction::Dispatch(tables), FieldRef::Data(_)) => {
            if !passes_filter(rule, field) {
                return None;
            }
            for table in tables {
                let observed = field.indicator(table.which).map(normalize_indicator)?;
                if let Some(selection) = table.entries.get(&observed) {
                    return select(selection, rule.label.as_ref(), field);
                }
            }
            tracing::debug!(
                tag = field.tag(),
                attribute = %rule.attribute,
                "no indicator dispatch entry for field"
            );
            None
        },
        _ => None,
    }
}

fn passes_filter(rule: &Rule, field: FieldRef<'_>) -> bool {
    rule.indicator_filter.iter().all(|(which, accepted)| {
        field
            .indicator(*which)
            .map(normalize_indicator)
            .is_some_and(|observed| accepted.contains(&observed))
    })
}

fn select(
    selection: &SubfieldSelection,
    rule_label: Option<&Label>,
    field: FieldRef<'_>,
) -> Option<Extracted> {
    let FieldRef::Data(data) = field else {
        return None;
    };
    let matched = data.get_subfields(&selection.codes);
    let values = if selection.join {
        let joined: String = matched.concat();
        if joined.is_empty() {
            Vec::new()
        } else {
            vec![joined]
        }
    } else {
        matched
            .into_iter()
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    };
    if values.is_empty() {
        return None;
    }
    Some(Extracted {
        label: resolve_label(selection.label.as_ref().or(rule_label), field),
        values,
    })
}

fn resolve_label(label: Option<&Label>, field: FieldRef<'_>) -> Option<String> {
    match label? {
        Label::Literal(text) => Some(text.clone()),
        Label::FromSubfield(code) => {
            let value = field.joined_subfield(*code);
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        },
    }
}

impl RuleSet {
    /// Apply every rule to every matching field occurrence of `record`,
    /// accumulating values per attribute in rule order.
    #[must_use]
    pub fn apply(&self, record: &Record) -> IndexMap<String, Vec<String>> {
        let mut results: IndexMap<String, Vec<String>> = IndexMap::new();
        for (rule, extracted) in self.extract(record) {
            results
                .entry(rule.attribute.clone())
                .or_default()
                .extend(extracted.values);
        }
        results
    }

    /// Like [`RuleSet::apply`] but keeps each occurrence's rule and label.
    #[must_use]
    pub fn extract<'r>(&'r self, record: &Record) -> Vec<(&'r Rule, Extracted)> {
        let mut out = Vec::new();
        for rule in self.iter() {
            for field in record.field_instances(&rule.tag) {
                if let Some(extracted) = evaluate(rule, field) {
                    out.push((rule, extracted));
                }
            }
        }
        out
    }
}
