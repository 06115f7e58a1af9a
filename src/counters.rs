//! Counter service.
//!
//! Every sequence number the ingester hands out comes from a named datastore
//! counter incremented atomically. The service is an explicit object passed
//! to builders; there is no process-global state.

use crate::entity::EntityKind;
use crate::error::Result;
use crate::store::Datastore;

/// A named monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter<'a> {
    /// Record Group numbers: `global:{prefix}`
    Root,
    /// Per-kind entity numbers: `global:{prefix}:{Kind}`
    Entity(EntityKind),
    /// Per-namespace identifier numbers: `global:{namespace}`
    Identifier(&'a str),
}

/// Allocates sequence numbers from datastore counters.
#[derive(Debug, Clone, Copy)]
pub struct CounterService<'s> {
    store: &'s dyn Datastore,
    prefix: &'s str,
}

impl<'s> CounterService<'s> {
    /// Create a service for keys under `prefix` (e.g. `rdaCore`).
    #[must_use]
    pub fn new(store: &'s dyn Datastore, prefix: &'s str) -> Self {
        CounterService { store, prefix }
    }

    /// The datastore holding the counters.
    #[must_use]
    pub fn datastore(&self) -> &'s dyn Datastore {
        self.store
    }

    /// Key prefix the service allocates under.
    #[must_use]
    pub fn prefix(&self) -> &'s str {
        self.prefix
    }

    /// Datastore key of a counter.
    #[must_use]
    pub fn key(&self, counter: Counter<'_>) -> String {
        match counter {
            Counter::Root => format!("global:{}", self.prefix),
            Counter::Entity(kind) => format!("global:{}:{kind}", self.prefix),
            Counter::Identifier(namespace) => format!("global:{namespace}"),
        }
    }

    /// Atomically increment a counter and return the new value (first call: 1).
    ///
    /// # Errors
    ///
    /// Returns a datastore error if the increment fails.
    pub fn next(&self, counter: Counter<'_>) -> Result<u64> {
        Ok(self.store.incr(&self.key(counter))?)
    }

    /// Allocate a new Record Group key, `{prefix}:{n}`.
    ///
    /// # Errors
    ///
    /// Returns a datastore error if the increment fails.
    pub fn next_root(&self) -> Result<String> {
        Ok(format!("{}:{}", self.prefix, self.next(Counter::Root)?))
    }

    /// Allocate a new entity key under `root_key`, `{root}:{Kind}:{m}`.
    ///
    /// # Errors
    ///
    /// Returns a datastore error if the increment fails.
    pub fn next_entity(&self, root_key: &str, kind: EntityKind) -> Result<String> {
        Ok(format!("{root_key}:{kind}:{}", self.next(Counter::Entity(kind))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_counter_keys() {
        let store = MemoryStore::new();
        let counters = CounterService::new(&store, "rdaCore");
        assert_eq!(counters.key(Counter::Root), "global:rdaCore");
        assert_eq!(
            counters.key(Counter::Entity(EntityKind::Manifestation)),
            "global:rdaCore:Manifestation"
        );
        assert_eq!(counters.key(Counter::Identifier("isbn")), "global:isbn");
    }

    #[test]
    fn test_sequences_are_independent() {
        let store = MemoryStore::new();
        let counters = CounterService::new(&store, "rdaCore");

        assert_eq!(counters.next_root().unwrap(), "rdaCore:1");
        assert_eq!(counters.next_root().unwrap(), "rdaCore:2");
        assert_eq!(
            counters.next_entity("rdaCore:2", EntityKind::Work).unwrap(),
            "rdaCore:2:Work:1"
        );
        assert_eq!(
            counters.next_entity("rdaCore:2", EntityKind::Item).unwrap(),
            "rdaCore:2:Item:1"
        );
        assert_eq!(
            counters.next_entity("rdaCore:3", EntityKind::Work).unwrap(),
            "rdaCore:3:Work:2"
        );
    }
}
