//! Record orchestration.
//!
//! One input record becomes one Record Group: a root hash `{prefix}:{n}`
//! pointing at a Work, an Expression, a Manifestation and an Item built from
//! the same record, linked by reverse-pointer relation hashes and registered
//! in the per-kind collections.
//!
//! A record is all or nothing. Entity writes are journaled and deleted if any
//! build fails; relation edges and collection memberships are written last
//! and undone member by member if linking fails. Counters are never rolled
//! back, so an aborted record leaves gaps in the sequences and nothing else.

use crate::config::IngestConfig;
use crate::counters::CounterService;
use crate::entity::{EntityBuilder, EntityKind, Profiles};
use crate::error::{IngestError, Result};
use crate::merge::Journal;
use crate::record::{is_control_tag, Record};
use crate::store::Datastore;
use std::sync::Arc;

/// Relation hash names, each `(forward, inverse, from, to)`: the forward
/// hash maps `from` keys to `to` keys and the inverse maps back.
pub const RELATIONS: [(&str, &str, EntityKind, EntityKind); 4] = [
    (
        "WorkExpressed",
        "ExpressionOfWork",
        EntityKind::Work,
        EntityKind::Expression,
    ),
    (
        "ExpressionManifested",
        "ManifestationOfExpression",
        EntityKind::Expression,
        EntityKind::Manifestation,
    ),
    (
        "WorkManifested",
        "ManifestationOfWork",
        EntityKind::Work,
        EntityKind::Manifestation,
    ),
    (
        "ManifestationExemplified",
        "ExemplarOfManifestation",
        EntityKind::Manifestation,
        EntityKind::Item,
    ),
];

/// Keys of one ingested record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordGroup {
    /// Root key, `{prefix}:{n}`
    pub root_key: String,
    /// Work entity key
    pub work: String,
    /// Expression entity key
    pub expression: String,
    /// Manifestation entity key
    pub manifestation: String,
    /// Item entity key
    pub item: String,
}

impl RecordGroup {
    /// Entity key of `kind`; `None` for kinds outside a Record Group.
    #[must_use]
    pub fn entity(&self, kind: EntityKind) -> Option<&str> {
        match kind {
            EntityKind::Work => Some(&self.work),
            EntityKind::Expression => Some(&self.expression),
            EntityKind::Manifestation => Some(&self.manifestation),
            EntityKind::Item => Some(&self.item),
            EntityKind::Person => None,
        }
    }
}

/// A write made while linking, and how to take it back.
enum Undo {
    Hdel(String, String),
    Srem(String, String),
}

/// Turns records into Record Groups.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    store: Arc<dyn Datastore>,
    profiles: Arc<Profiles>,
    config: IngestConfig,
}

impl Orchestrator {
    /// Create an orchestrator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>, profiles: Profiles, config: IngestConfig) -> Self {
        Orchestrator {
            store,
            profiles: Arc::new(profiles),
            config,
        }
    }

    /// The datastore records are written to.
    #[must_use]
    pub fn datastore(&self) -> &dyn Datastore {
        self.store.as_ref()
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest one record.
    ///
    /// # Errors
    ///
    /// A failed root allocation is returned as is. Any later failure rolls
    /// the record back and is returned as [`IngestError::RecordAborted`].
    pub fn ingest(&self, record: &Record) -> Result<RecordGroup> {
        let counters = CounterService::new(self.store.as_ref(), &self.config.key_prefix);
        let root_key = counters.next_root()?;
        let journal = Journal::new();

        let result = self
            .build_all(record, &root_key, counters, &journal)
            .and_then(|group| self.link(record, &group, &journal).map(|()| group));

        result.map_err(|source| {
            match journal.rollback(self.store.as_ref()) {
                Ok(deleted) => tracing::warn!(
                    root = %root_key,
                    deleted,
                    error = %source,
                    "record aborted and rolled back"
                ),
                Err(e) => tracing::warn!(
                    root = %root_key,
                    error = %source,
                    rollback_error = %e,
                    "record aborted; rollback incomplete"
                ),
            }
            IngestError::RecordAborted {
                root_key,
                source: Box::new(source),
            }
        })
    }

    fn build_all(
        &self,
        record: &Record,
        root_key: &str,
        counters: CounterService<'_>,
        journal: &Journal,
    ) -> Result<RecordGroup> {
        let builder = EntityBuilder::new(
            &self.profiles,
            counters,
            journal,
            &self.config.identifier_policy,
        );
        let build = |kind| builder.build(record, root_key, kind);

        let (work, expression, manifestation, item) = if self.config.parallel_entities {
            let ((work, expression), (manifestation, item)) = rayon::join(
                || rayon::join(|| build(EntityKind::Work), || build(EntityKind::Expression)),
                || {
                    rayon::join(
                        || build(EntityKind::Manifestation),
                        || build(EntityKind::Item),
                    )
                },
            );
            (work?, expression?, manifestation?, item?)
        } else {
            let work = build(EntityKind::Work)?;
            let expression = build(EntityKind::Expression)?;
            let manifestation = build(EntityKind::Manifestation)?;
            (work, expression, manifestation, build(EntityKind::Item)?)
        };

        Ok(RecordGroup {
            root_key: root_key.to_string(),
            work,
            expression,
            manifestation,
            item,
        })
    }

    /// Write the root hash, the relation edges and the collection
    /// memberships, undoing the shared writes if any of them fails.
    fn link(&self, record: &Record, group: &RecordGroup, journal: &Journal) -> Result<()> {
        let store = self.store.as_ref();
        let prefix = &self.config.key_prefix;

        journal.record(&group.root_key);
        for kind in EntityKind::RECORD_GROUP {
            if let Some(key) = group.entity(kind) {
                store.hset(&group.root_key, kind.name(), key)?;
            }
        }
        if let Some(number) = self.control_number(record) {
            store.hset(&group.root_key, "controlNumber", &number)?;
        }

        let mut undo = Vec::new();
        let result = self.link_shared(group, prefix, &mut undo);
        if result.is_err() {
            for step in undo.into_iter().rev() {
                let undone = match &step {
                    Undo::Hdel(key, field) => store.hdel(key, field).map(|_| ()),
                    Undo::Srem(key, member) => store.srem(key, member).map(|_| ()),
                };
                if let Err(e) = undone {
                    tracing::warn!(root = %group.root_key, error = %e, "could not undo link");
                }
            }
        }
        result
    }

    fn link_shared(&self, group: &RecordGroup, prefix: &str, undo: &mut Vec<Undo>) -> Result<()> {
        let store = self.store.as_ref();
        for (forward, inverse, from, to) in RELATIONS {
            let (Some(from_key), Some(to_key)) = (group.entity(from), group.entity(to)) else {
                continue;
            };
            let forward_key = format!("{prefix}:{forward}");
            store.hset(&forward_key, from_key, to_key)?;
            undo.push(Undo::Hdel(forward_key, from_key.to_string()));
            let inverse_key = format!("{prefix}:{inverse}");
            store.hset(&inverse_key, to_key, from_key)?;
            undo.push(Undo::Hdel(inverse_key, to_key.to_string()));
        }
        for kind in EntityKind::RECORD_GROUP {
            if let Some(key) = group.entity(kind) {
                let collection = kind.collection_key(prefix);
                store.sadd(&collection, key)?;
                undo.push(Undo::Srem(collection, key.to_string()));
            }
        }
        Ok(())
    }

    fn control_number(&self, record: &Record) -> Option<String> {
        let source = self.config.control_number.as_ref()?;
        let value = if is_control_tag(&source.tag) {
            record.get_control_field(&source.tag)?.to_string()
        } else {
            let code = source.subfield?;
            record
                .fields_by_tag(&source.tag)
                .find_map(|field| field.get_subfield(code))?
                .to_string()
        };
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }
}
