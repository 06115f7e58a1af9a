//! Entity builders driven by profiles.

mod common;

use common::{field, sample_record, titled_record};
use rdacore::config::{IdentifierPolicies, IdentifierPolicy};
use rdacore::counters::CounterService;
use rdacore::entity::{CallNumberIngest, EntityBuilder, EntityKind, EntityProfile, Profiles};
use rdacore::merge::{AttributeStore, Journal};
use rdacore::store::Datastore;
use rdacore::{IngestError, MemoryStore, Record, RuleSet};
use std::fs;
use std::sync::Arc;

fn build(
    store: &MemoryStore,
    profiles: &Profiles,
    policies: &IdentifierPolicies,
    record: &Record,
    kind: EntityKind,
) -> rdacore::Result<String> {
    let journal = Journal::new();
    let counters = CounterService::new(store, "rdaCore");
    EntityBuilder::new(profiles, counters, &journal, policies).build(record, "rdaCore:1", kind)
}

#[test]
fn test_work_subject_and_uniform_title() {
    let store = MemoryStore::new();
    let mut record = sample_record();
    record.add_field(field("240", '1', '0', &[('a', "Walden. "), ('p', "Selections")]));
    record.add_field(field("650", ' ', '7', &[('a', "Not LCSH"), ('2', "fast")]));

    let key = build(
        &store,
        &Profiles::standard().unwrap(),
        &IdentifierPolicies::default(),
        &record,
        EntityKind::Work,
    )
    .unwrap();

    assert_eq!(key, "rdaCore:1:Work:1");
    assert_eq!(store.hget(&key, "titleOfWork").unwrap().as_deref(), Some("Walden. Selections"));
    // only second indicator 0 headings are subjects
    assert_eq!(store.hget(&key, "subject").unwrap().as_deref(), Some("Wilderness areas"));
}

#[test]
fn test_expression_content_type_condition() {
    let store = MemoryStore::new();
    let mut record = sample_record();
    record.add_field(field("336", ' ', ' ', &[('a', "spoken word"), ('2', "local")]));

    let key = build(
        &store,
        &Profiles::standard().unwrap(),
        &IdentifierPolicies::default(),
        &record,
        EntityKind::Expression,
    )
    .unwrap();

    assert_eq!(store.hget(&key, "contentType").unwrap().as_deref(), Some("text"));
    assert_eq!(store.hget(&key, "languageOfExpression").unwrap().as_deref(), Some("eng"));
}

#[test]
fn test_direct_identifier_policy() {
    let store = MemoryStore::new();
    let policies = IdentifierPolicies::uniform(IdentifierPolicy::Interned)
        .with_namespace("doi", IdentifierPolicy::Direct);

    let key = build(
        &store,
        &Profiles::standard().unwrap(),
        &policies,
        &sample_record(),
        EntityKind::Manifestation,
    )
    .unwrap();

    let identifiers = store.hgetall(&format!("{key}:identifiers")).unwrap();
    assert_eq!(identifiers["isbn"], "isbn:1");
    assert_eq!(identifiers["doi"], "10.1000/182");
    assert_eq!(store.get("global:doi").unwrap(), None);
}

#[test]
fn test_reserved_identifier_source_is_skipped() {
    let store = MemoryStore::new();
    let mut record = titled_record("Walden");
    record.add_field(field("020", ' ', ' ', &[('a', "0596007973")]));
    record.add_field(field("024", '7', ' ', &[('a', "X1"), ('z', "Y2"), ('2', "shapes")]));

    let key = build(
        &store,
        &Profiles::standard().unwrap(),
        &IdentifierPolicies::default(),
        &record,
        EntityKind::Manifestation,
    )
    .unwrap();

    let identifiers = store.hgetall(&format!("{key}:identifiers")).unwrap();
    assert_eq!(identifiers.len(), 1);
    assert_eq!(identifiers["isbn"], "isbn:1");
    assert_eq!(store.get("global:shapes").unwrap(), None);
    assert_eq!(
        store.hget(&format!("{key}:identifiers:shapes"), "isbn").unwrap().as_deref(),
        Some("scalar")
    );
}

#[test]
fn test_no_identifiers_no_group() {
    let store = MemoryStore::new();
    let key = build(
        &store,
        &Profiles::standard().unwrap(),
        &IdentifierPolicies::default(),
        &titled_record("Walden"),
        EntityKind::Manifestation,
    )
    .unwrap();

    assert_eq!(store.hget(&key, "identifiers").unwrap(), None);
    assert_eq!(store.hget(&key, "editionStatement").unwrap(), None);
}

#[test]
fn test_person_without_profile() {
    let store = MemoryStore::new();
    let err = build(
        &store,
        &Profiles::standard().unwrap(),
        &IdentifierPolicies::default(),
        &sample_record(),
        EntityKind::Person,
    )
    .unwrap_err();

    assert!(matches!(err, IngestError::UnimplementedEntityKind(EntityKind::Person)));
    assert_eq!(store.get("global:rdaCore:Person").unwrap(), None);
}

#[test]
fn test_conflicting_attribute_is_skipped() {
    let store = MemoryStore::new();
    let journal = Journal::new();
    AttributeStore::new(&store, &journal)
        .group("rdaCore:1:Manifestation:1", "titleProper")
        .unwrap();

    let key = build(
        &store,
        &Profiles::standard().unwrap(),
        &IdentifierPolicies::default(),
        &sample_record(),
        EntityKind::Manifestation,
    )
    .unwrap();

    assert_eq!(key, "rdaCore:1:Manifestation:1");
    assert_eq!(
        store.hget(&key, "titleProper").unwrap().as_deref(),
        Some("rdaCore:1:Manifestation:1:titleProper")
    );
    assert_eq!(
        store.hget(&key, "statementOfResponsibility").unwrap().as_deref(),
        Some("Henry David Thoreau.")
    );
}

#[derive(Debug)]
struct FailingCallNumbers;

impl CallNumberIngest for FailingCallNumbers {
    fn ingest(&self, _record: &Record, _store: &dyn Datastore, _entity_key: &str) -> rdacore::Result<()> {
        Err(IngestError::invalid_rule("call numbers", "service unavailable"))
    }
}

#[test]
fn test_call_number_failure_aborts_build() {
    let store = MemoryStore::new();
    let profiles = Profiles::standard()
        .unwrap()
        .with_call_numbers(Arc::new(FailingCallNumbers));

    let result = build(
        &store,
        &profiles,
        &IdentifierPolicies::default(),
        &sample_record(),
        EntityKind::Expression,
    );
    assert!(result.is_err());
}

#[test]
fn test_profiles_from_dir() {
    let dir = tempfile::tempdir().unwrap();
    for kind in ["work", "expression", "manifestation", "item"] {
        fs::write(
            dir.path().join(format!("{kind}.json")),
            r#"{ "note": { "500": { "subfields": ["a"] } } }"#,
        )
        .unwrap();
    }
    fs::write(
        dir.path().join("person.json"),
        r#"{ "preferredNameForThePerson": { "100": { "subfields": ["a"] } } }"#,
    )
    .unwrap();
    fs::write(dir.path().join("carrier-types.json"), r#"{ "v": { "d": "disc" } }"#).unwrap();

    let profiles = Profiles::from_dir(dir.path()).unwrap();
    let person = profiles.get(EntityKind::Person).unwrap();
    assert_eq!(person.rules.attributes(), vec!["preferredNameForThePerson"]);

    let store = MemoryStore::new();
    let mut record = sample_record();
    record.add_field(field("100", '1', ' ', &[('a', "Thoreau, Henry David")]));
    let key = build(
        &store,
        &profiles,
        &IdentifierPolicies::default(),
        &record,
        EntityKind::Person,
    )
    .unwrap();
    assert_eq!(
        store.hget(&key, "preferredNameForThePerson").unwrap().as_deref(),
        Some("Thoreau, Henry David")
    );
}

#[test]
fn test_profiles_from_dir_requires_rule_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("work.json"), "{}").unwrap();
    assert!(Profiles::from_dir(dir.path()).is_err());
}

#[test]
fn test_custom_profile_replaces_standard() {
    let store = MemoryStore::new();
    let profiles = Profiles::standard().unwrap().with_profile(EntityProfile::new(
        EntityKind::Item,
        RuleSet::from_json_str(r#"{ "noteOnItem": { "245": { "subfields": ["a"] } } }"#).unwrap(),
    ));

    let key = build(
        &store,
        &profiles,
        &IdentifierPolicies::default(),
        &titled_record("Walden"),
        EntityKind::Item,
    )
    .unwrap();
    assert_eq!(store.hget(&key, "noteOnItem").unwrap().as_deref(), Some("Walden"));
}
