//! Carrier type resolution.
//!
//! Carrier types arrive as two-character MARC codes (`007/00-01`, e.g. `vd`).
//! The code table maps the first character, then the second, to an RDA
//! carrier type label:
//!
//! ```json
//! { "v": { "d": "videodisc", "f": "videocassette" } }
//! ```
//!
//! Resolution replaces each resolvable code in place and leaves the rest
//! untouched.

use crate::error::Result;
use crate::merge::AttributeStore;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// MARC carrier code table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CarrierTable {
    codes: BTreeMap<char, BTreeMap<char, String>>,
}

impl CarrierTable {
    /// Parse a table from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IngestError::Json`] if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a table from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an IO or JSON error.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Label for a two-character code.
    #[must_use]
    pub fn label(&self, code: &str) -> Option<&str> {
        let mut chars = code.chars();
        let (Some(p0), Some(p1), None) = (chars.next(), chars.next(), chars.next()) else {
            return None;
        };
        self.codes.get(&p0)?.get(&p1).map(String::as_str)
    }

    /// Number of mapped codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.values().map(BTreeMap::len).sum()
    }

    /// Whether the table maps nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Replace resolvable codes stored in `attribute` of `entity_key` with
/// their labels. Returns how many were replaced.
///
/// # Errors
///
/// Returns a datastore error, or a conflict if the attribute is not a
/// scalar or set.
pub fn resolve_carrier_types(
    attrs: &AttributeStore<'_>,
    entity_key: &str,
    attribute: &str,
    table: &CarrierTable,
) -> Result<usize> {
    let Some(value) = attrs.load(entity_key, attribute)? else {
        return Ok(0);
    };
    let mut replaced = 0;
    for code in attrs.values(&value)? {
        match table.label(&code) {
            Some(label) => {
                if attrs.replace(entity_key, attribute, &code, label)? {
                    replaced += 1;
                }
            },
            None => tracing::debug!(entity = entity_key, code = %code, "unresolved carrier code"),
        }
    }
    Ok(replaced)
}
