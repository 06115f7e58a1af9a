//! Entity builders.
//!
//! There is one builder for every entity kind. It is parameterized by an
//! [`EntityProfile`]: the kind's rule set plus an ordered list of
//! [`PostProcess`] steps run after the generic merge pass. The standard
//! profiles ship as JSON under `data/` and can be replaced from a directory.
//!
//! | Kind | Steps |
//! |---|---|
//! | Work | none |
//! | Expression | call numbers, when a collaborator is attached |
//! | Manifestation | carrier types, identifiers, statements |
//! | Item | none |
//! | Person | no standard profile |

pub mod carrier;
pub mod dates;
pub mod identifiers;
pub mod statements;

use crate::config::IdentifierPolicies;
use crate::counters::CounterService;
use crate::error::{IngestError, Result};
use crate::merge::{AttributeStore, Journal};
use crate::record::Record;
use crate::rules::RuleSet;
use crate::store::Datastore;
use carrier::CarrierTable;
use statements::StatementTable;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

const WORK_RULES: &str = include_str!("../../data/rules/work.json");
const EXPRESSION_RULES: &str = include_str!("../../data/rules/expression.json");
const MANIFESTATION_RULES: &str = include_str!("../../data/rules/manifestation.json");
const ITEM_RULES: &str = include_str!("../../data/rules/item.json");
const IDENTIFIER_RULES: &str = include_str!("../../data/identifiers.json");
const CARRIER_TYPES: &str = include_str!("../../data/carrier-types.json");
const STATEMENTS: &str = include_str!("../../data/statements.json");

/// Attribute holding MARC carrier codes to resolve.
pub const CARRIER_TYPE_ATTRIBUTE: &str = "carrierType";

/// Kind of entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    /// Abstract content
    Work,
    /// Realization of a work
    Expression,
    /// Embodiment of an expression
    Manifestation,
    /// Single exemplar of a manifestation
    Item,
    /// A person (Group 2)
    Person,
}

impl EntityKind {
    /// The four kinds of a Record Group, in build order.
    pub const RECORD_GROUP: [EntityKind; 4] = [
        EntityKind::Work,
        EntityKind::Expression,
        EntityKind::Manifestation,
        EntityKind::Item,
    ];

    /// Name used in keys.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            EntityKind::Work => "Work",
            EntityKind::Expression => "Expression",
            EntityKind::Manifestation => "Manifestation",
            EntityKind::Item => "Item",
            EntityKind::Person => "Person",
        }
    }

    /// Key of the kind's global collection, `{prefix}:{Kind}s`.
    #[must_use]
    pub fn collection_key(self, prefix: &str) -> String {
        format!("{prefix}:{}s", self.name())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// External call-number ingestion, run for Expressions.
///
/// Implementations write wherever they like; their writes are not part of
/// the record's rollback.
pub trait CallNumberIngest: Send + Sync + fmt::Debug {
    /// Ingest the call numbers of `record` for the Expression `entity_key`.
    ///
    /// # Errors
    ///
    /// Any error aborts the record.
    fn ingest(&self, record: &Record, store: &dyn Datastore, entity_key: &str) -> Result<()>;
}

/// A post-processing step run after the generic merge pass.
#[derive(Debug, Clone)]
pub enum PostProcess {
    /// Replace carrier codes in `attribute` with labels from `table`
    CarrierTypes {
        /// Attribute holding the codes
        attribute: String,
        /// Code table
        table: Arc<CarrierTable>,
    },
    /// Extract identifiers into the `identifiers` group
    Identifiers(Arc<RuleSet>),
    /// Store statement groups
    Statements(Arc<StatementTable>),
    /// Hand the record to a call-number collaborator
    CallNumbers(Arc<dyn CallNumberIngest>),
}

/// Rule set and post-processing steps of one entity kind.
#[derive(Debug, Clone)]
pub struct EntityProfile {
    /// Kind the profile builds
    pub kind: EntityKind,
    /// Generic extraction rules
    pub rules: RuleSet,
    /// Steps run in order after the rules
    pub steps: Vec<PostProcess>,
}

impl EntityProfile {
    /// A profile with rules and no steps.
    #[must_use]
    pub fn new(kind: EntityKind, rules: RuleSet) -> Self {
        EntityProfile {
            kind,
            rules,
            steps: Vec::new(),
        }
    }

    /// Append a post-processing step.
    #[must_use]
    pub fn with_step(mut self, step: PostProcess) -> Self {
        self.steps.push(step);
        self
    }
}

/// Profiles by entity kind.
#[derive(Debug, Clone, Default)]
pub struct Profiles {
    profiles: BTreeMap<EntityKind, EntityProfile>,
}

/// Shared tables used by the Manifestation steps.
struct ManifestationTables {
    identifiers: RuleSet,
    carrier_types: CarrierTable,
    statements: StatementTable,
}

impl ManifestationTables {
    fn standard() -> Result<Self> {
        Ok(ManifestationTables {
            identifiers: RuleSet::from_json_str(IDENTIFIER_RULES)?,
            carrier_types: CarrierTable::from_json_str(CARRIER_TYPES)?,
            statements: StatementTable::from_json_str(STATEMENTS)?,
        })
    }

    fn manifestation_profile(self, rules: RuleSet) -> EntityProfile {
        EntityProfile::new(EntityKind::Manifestation, rules)
            .with_step(PostProcess::CarrierTypes {
                attribute: CARRIER_TYPE_ATTRIBUTE.to_string(),
                table: Arc::new(self.carrier_types),
            })
            .with_step(PostProcess::Identifiers(Arc::new(self.identifiers)))
            .with_step(PostProcess::Statements(Arc::new(self.statements)))
    }
}

impl Profiles {
    /// No profiles at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The bundled Work, Expression, Manifestation and Item profiles.
    ///
    /// # Errors
    ///
    /// Only if a bundled document fails validation.
    pub fn standard() -> Result<Self> {
        let tables = ManifestationTables::standard()?;
        Ok(Profiles::empty()
            .with_profile(EntityProfile::new(
                EntityKind::Work,
                RuleSet::from_json_str(WORK_RULES)?,
            ))
            .with_profile(EntityProfile::new(
                EntityKind::Expression,
                RuleSet::from_json_str(EXPRESSION_RULES)?,
            ))
            .with_profile(tables.manifestation_profile(RuleSet::from_json_str(MANIFESTATION_RULES)?))
            .with_profile(EntityProfile::new(
                EntityKind::Item,
                RuleSet::from_json_str(ITEM_RULES)?,
            )))
    }

    /// Load profiles from a directory.
    ///
    /// `work.json`, `expression.json`, `manifestation.json` and `item.json`
    /// are required; `person.json` is optional. `identifiers.json`,
    /// `carrier-types.json` and `statements.json` replace the bundled tables
    /// when present.
    ///
    /// # Errors
    ///
    /// IO errors for missing rule files, configuration errors for invalid ones.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut tables = ManifestationTables::standard()?;
        let identifiers = dir.join("identifiers.json");
        if identifiers.exists() {
            tables.identifiers = RuleSet::from_path(identifiers)?;
        }
        let carrier_types = dir.join("carrier-types.json");
        if carrier_types.exists() {
            tables.carrier_types = CarrierTable::from_path(carrier_types)?;
        }
        let statements = dir.join("statements.json");
        if statements.exists() {
            tables.statements = StatementTable::from_path(statements)?;
        }

        let rules = |name: &str| RuleSet::from_path(dir.join(name));
        let mut profiles = Profiles::empty()
            .with_profile(EntityProfile::new(EntityKind::Work, rules("work.json")?))
            .with_profile(EntityProfile::new(
                EntityKind::Expression,
                rules("expression.json")?,
            ))
            .with_profile(tables.manifestation_profile(rules("manifestation.json")?))
            .with_profile(EntityProfile::new(EntityKind::Item, rules("item.json")?));
        if dir.join("person.json").exists() {
            profiles = profiles.with_profile(EntityProfile::new(
                EntityKind::Person,
                rules("person.json")?,
            ));
        }
        Ok(profiles)
    }

    /// Register (or replace) the profile of its kind.
    #[must_use]
    pub fn with_profile(mut self, profile: EntityProfile) -> Self {
        self.profiles.insert(profile.kind, profile);
        self
    }

    /// Attach a call-number collaborator to the Expression profile.
    #[must_use]
    pub fn with_call_numbers(mut self, ingest: Arc<dyn CallNumberIngest>) -> Self {
        if let Some(profile) = self.profiles.get_mut(&EntityKind::Expression) {
            profile.steps.push(PostProcess::CallNumbers(ingest));
        }
        self
    }

    /// Profile of `kind`, if registered.
    #[must_use]
    pub fn get(&self, kind: EntityKind) -> Option<&EntityProfile> {
        self.profiles.get(&kind)
    }
}

/// Builds entities of any kind for one record.
#[derive(Debug, Clone, Copy)]
pub struct EntityBuilder<'a> {
    profiles: &'a Profiles,
    counters: CounterService<'a>,
    journal: &'a Journal,
    policies: &'a IdentifierPolicies,
}

impl<'a> EntityBuilder<'a> {
    /// Create a builder writing through `counters`' datastore and journaling
    /// into `journal`.
    #[must_use]
    pub fn new(
        profiles: &'a Profiles,
        counters: CounterService<'a>,
        journal: &'a Journal,
        policies: &'a IdentifierPolicies,
    ) -> Self {
        EntityBuilder {
            profiles,
            counters,
            journal,
            policies,
        }
    }

    /// Build one entity of `kind` from `record` under `root_key` and return
    /// its key.
    ///
    /// An attribute whose stored shape conflicts with the merge is skipped;
    /// every other error aborts the build.
    ///
    /// # Errors
    ///
    /// [`IngestError::UnimplementedEntityKind`] (before any counter moves)
    /// when `kind` has no profile, or any datastore, interning or step error.
    pub fn build(&self, record: &Record, root_key: &str, kind: EntityKind) -> Result<String> {
        let profile = self
            .profiles
            .get(kind)
            .ok_or(IngestError::UnimplementedEntityKind(kind))?;
        let entity_key = self.counters.next_entity(root_key, kind)?;
        let attrs = AttributeStore::new(self.counters.datastore(), self.journal);

        for (attribute, values) in profile.rules.apply(record) {
            match attrs.merge(&entity_key, &attribute, &values) {
                Ok(_) => {},
                Err(e @ IngestError::AttributeConflict { .. }) => {
                    tracing::warn!(entity = %entity_key, error = %e, "skipping attribute");
                },
                Err(e) => return Err(e),
            }
        }

        for step in &profile.steps {
            self.run_step(step, &attrs, &entity_key, record)?;
        }
        Ok(entity_key)
    }

    fn run_step(
        &self,
        step: &PostProcess,
        attrs: &AttributeStore<'_>,
        entity_key: &str,
        record: &Record,
    ) -> Result<()> {
        match step {
            PostProcess::CarrierTypes { attribute, table } => {
                carrier::resolve_carrier_types(attrs, entity_key, attribute, table)?;
            },
            PostProcess::Identifiers(rules) => {
                identifiers::store_identifiers(attrs, entity_key, rules, self.policies, record)?;
            },
            PostProcess::Statements(table) => {
                statements::store_statements(attrs, entity_key, table, record)?;
            },
            PostProcess::CallNumbers(ingest) => {
                ingest.ingest(record, self.counters.datastore(), entity_key)?;
            },
        }
        Ok(())
    }
}
