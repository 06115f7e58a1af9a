//! Manifestation identifier extraction.
//!
//! The identifier table is an ordinary rule document whose attribute names
//! are default namespaces and whose labels, when present, override them:
//!
//! ```json
//! {
//!   "isbn": { "020": { "subfields": ["a", "z"], "join": false } },
//!   "unspecified-standard-number": { "024": { "indicators": {
//!       "0": { "0": { "subfields": ["a", "d", "z"], "label": "isrc" } } } } }
//! }
//! ```
//!
//! Extracted values are stored on the `identifiers` group of the entity,
//! one attribute per namespace, either as canonical interned keys or as raw
//! strings depending on the namespace's [`IdentifierPolicy`].

use crate::config::{IdentifierPolicies, IdentifierPolicy};
use crate::error::Result;
use crate::interning::{namespace_key, InterningTable};
use crate::merge::AttributeStore;
use crate::record::Record;
use crate::rules::{validate_attribute_name, RuleSet};
use indexmap::IndexMap;

/// Name of the identifier group attribute.
pub const IDENTIFIERS_GROUP: &str = "identifiers";

/// Raw identifier values per namespace, in record order.
#[must_use]
pub fn collect_identifiers(rules: &RuleSet, record: &Record) -> IndexMap<String, Vec<String>> {
    let mut found: IndexMap<String, Vec<String>> = IndexMap::new();
    for (rule, extracted) in rules.extract(record) {
        let namespace = namespace_key(extracted.label.as_deref().unwrap_or(&rule.attribute));
        if namespace.is_empty() {
            continue;
        }
        if let Err(e) = validate_attribute_name(&namespace) {
            tracing::warn!(tag = %rule.tag, namespace = %namespace, error = %e, "skipping identifier");
            continue;
        }
        found.entry(namespace).or_default().extend(extracted.values);
    }
    found
}

/// Extract identifiers from `record` and store them under
/// `{entity_key}:identifiers`. Returns the number of values stored.
///
/// # Errors
///
/// Interning and datastore errors abort; an identifier namespace whose
/// attribute already holds an incompatible shape also aborts.
pub fn store_identifiers(
    attrs: &AttributeStore<'_>,
    entity_key: &str,
    rules: &RuleSet,
    policies: &IdentifierPolicies,
    record: &Record,
) -> Result<usize> {
    let found = collect_identifiers(rules, record);
    if found.values().all(Vec::is_empty) {
        return Ok(0);
    }
    let interning = InterningTable::new(attrs.datastore());
    let group = attrs.group(entity_key, IDENTIFIERS_GROUP)?;
    let mut stored = 0;
    for (namespace, raw_values) in found {
        let values = match policies.policy_for(&namespace) {
            IdentifierPolicy::Direct => raw_values,
            IdentifierPolicy::Interned => raw_values
                .iter()
                .filter(|v| !v.trim().is_empty())
                .map(|v| interning.intern(&namespace, v))
                .collect::<Result<Vec<_>>>()?,
        };
        stored += values.len();
        attrs.merge(&group, &namespace, &values)?;
    }
    Ok(stored)
}
