//! Identifier interning.
//!
//! Within a namespace (`isbn`, `issn`, `sudoc`, ...) every distinct raw
//! identifier value gets one canonical key, `{namespace}:{n}`, forever. The
//! namespace's reverse index `{namespace}:values` maps raw value to key, the
//! key itself stores the raw value as a string, and `global:{namespace}`
//! counts allocations.
//!
//! Find-or-create runs as a single [`Datastore::hget_or_allocate`] call, so
//! two workers interning the same new value cannot mint two keys.

use crate::counters::{Counter, CounterService};
use crate::error::{IngestError, Result};
use crate::store::Datastore;

/// Normalize a namespace name into a key-safe form.
///
/// Lowercases, and replaces `:` and whitespace with `-`, so a namespace can
/// never forge another namespace's keys.
///
/// ```
/// use rdacore::interning::namespace_key;
///
/// assert_eq!(namespace_key("ISBN"), "isbn");
/// assert_eq!(namespace_key("gpo item:x"), "gpo-item-x");
/// ```
#[must_use]
pub fn namespace_key(namespace: &str) -> String {
    namespace
        .trim()
        .chars()
        .map(|c| {
            if c == ':' || c.is_whitespace() {
                '-'
            } else {
                c
            }
        })
        .flat_map(char::to_lowercase)
        .collect()
}

/// Maps raw identifier strings to canonical keys.
#[derive(Debug, Clone, Copy)]
pub struct InterningTable<'s> {
    store: &'s dyn Datastore,
}

impl<'s> InterningTable<'s> {
    /// Create a table over `store`.
    #[must_use]
    pub fn new(store: &'s dyn Datastore) -> Self {
        InterningTable { store }
    }

    /// Canonical key for `raw_value` in `namespace`, allocating one if needed.
    ///
    /// # Errors
    ///
    /// [`IngestError::InterningInconsistency`] if the key found in the index
    /// does not store `raw_value`. This is never repaired in place. Datastore
    /// failures are returned as [`IngestError::Store`].
    pub fn intern(&self, namespace: &str, raw_value: &str) -> Result<String> {
        let namespace = namespace_key(namespace);
        let counter_key =
            CounterService::new(self.store, "").key(Counter::Identifier(&namespace));
        let mint = |n: u64| format!("{namespace}:{n}");
        let allocation = self.store.hget_or_allocate(
            &format!("{namespace}:values"),
            raw_value,
            &counter_key,
            &mint,
        )?;

        if !allocation.created {
            let stored = self.store.get(&allocation.value)?;
            if stored.as_deref() != Some(raw_value) {
                let stored_value = stored.unwrap_or_default();
                tracing::error!(
                    namespace = %namespace,
                    raw_value,
                    key = %allocation.value,
                    stored_value = %stored_value,
                    "interned identifier key stores a different value"
                );
                return Err(IngestError::InterningInconsistency {
                    namespace,
                    raw_value: raw_value.to_string(),
                    expected_key: allocation.value,
                    stored_value,
                });
            }
        }
        Ok(allocation.value)
    }

    /// Canonical key for `raw_value` if it was interned before. Never allocates.
    ///
    /// # Errors
    ///
    /// Returns a datastore error if the lookup fails.
    pub fn lookup(&self, namespace: &str, raw_value: &str) -> Result<Option<String>> {
        let namespace = namespace_key(namespace);
        Ok(self.store.hget(&format!("{namespace}:values"), raw_value)?)
    }

    /// Raw value stored under a canonical key.
    ///
    /// # Errors
    ///
    /// Returns a datastore error if the lookup fails.
    pub fn resolve(&self, canonical_key: &str) -> Result<Option<String>> {
        Ok(self.store.get(canonical_key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_same_value_same_key() {
        let store = MemoryStore::new();
        let table = InterningTable::new(&store);

        let first = table.intern("isbn", "0596007973").unwrap();
        let second = table.intern("isbn", "0596007973").unwrap();
        assert_eq!(first, "isbn:1");
        assert_eq!(first, second);
        assert_eq!(store.get("global:isbn").unwrap().as_deref(), Some("1"));
        assert_eq!(table.resolve("isbn:1").unwrap().as_deref(), Some("0596007973"));
    }

    #[test]
    fn test_distinct_values_and_namespaces() {
        let store = MemoryStore::new();
        let table = InterningTable::new(&store);

        let a = table.intern("isbn", "111").unwrap();
        let b = table.intern("isbn", "222").unwrap();
        let c = table.intern("issn", "111").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(c, "issn:1");
        assert_eq!(table.lookup("ISBN", "222").unwrap(), Some(b));
        assert_eq!(table.lookup("isbn", "333").unwrap(), None);
    }

    #[test]
    fn test_inconsistency_is_reported_not_repaired() {
        let store = MemoryStore::new();
        let table = InterningTable::new(&store);

        let key = table.intern("sudoc", "Y 4.2").unwrap();
        store.set(&key, "tampered").unwrap();

        let err = table.intern("sudoc", "Y 4.2").unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, IngestError::InterningInconsistency { .. }));
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("tampered"));
    }

    #[test]
    fn test_concurrent_interning_mints_one_key() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || InterningTable::new(store.as_ref()).intern("issn", "1234-5678"))
            })
            .collect();
        let keys: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        assert!(keys.iter().all(|k| k == "issn:1"));
        assert_eq!(store.get("global:issn").unwrap().as_deref(), Some("1"));
    }
}
