//! Identifier interning across namespaces and threads.

mod common;

use proptest::prelude::*;
use rdacore::store::Datastore;
use rdacore::{InterningTable, MemoryStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

#[test]
fn test_canonical_keys_never_shared_across_namespaces() {
    let store = MemoryStore::new();
    let table = InterningTable::new(&store);

    let isbn = table.intern("isbn", "12345").unwrap();
    let issn = table.intern("issn", "12345").unwrap();
    assert_eq!(isbn, "isbn:1");
    assert_eq!(issn, "issn:1");
    assert_eq!(store.hget("isbn:values", "12345").unwrap(), Some(isbn));
}

#[test]
fn test_namespace_names_are_normalized() {
    let store = MemoryStore::new();
    let table = InterningTable::new(&store);

    let a = table.intern("Canada Gov", "X1").unwrap();
    let b = table.intern("canada-gov", "X1").unwrap();
    assert_eq!(a, "canada-gov:1");
    assert_eq!(a, b);
}

#[test]
fn test_many_threads_many_values() {
    let store = Arc::new(MemoryStore::new());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let table = InterningTable::new(store.as_ref());
                (0..50)
                    .map(|i| {
                        let raw = format!("value-{}", (i + t * 7) % 60);
                        let key = table.intern("upc", &raw).unwrap();
                        (raw, key)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen: HashMap<String, String> = HashMap::new();
    for handle in handles {
        for (raw, key) in handle.join().unwrap() {
            let previous = seen.entry(raw).or_insert_with(|| key.clone());
            assert_eq!(previous, &key);
        }
    }
    let distinct_keys: std::collections::HashSet<&String> = seen.values().collect();
    assert_eq!(distinct_keys.len(), seen.len());
    assert_eq!(
        store.get("global:upc").unwrap(),
        Some(seen.len().to_string())
    );
}

proptest! {
    #[test]
    fn prop_interning_is_stable_and_injective(values in prop::collection::vec("[a-z0-9-]{1,8}", 1..30)) {
        let store = MemoryStore::new();
        let table = InterningTable::new(&store);
        let mut keys: HashMap<String, String> = HashMap::new();

        for raw in values.iter().chain(values.iter()) {
            let key = table.intern("isbn", raw).unwrap();
            if let Some(previous) = keys.get(raw) {
                prop_assert_eq!(previous, &key);
            }
            keys.insert(raw.clone(), key);
        }
        let mut by_key: HashMap<&String, &String> = HashMap::new();
        for (raw, key) in &keys {
            prop_assert!(by_key.insert(key, raw).is_none());
        }
    }
}
