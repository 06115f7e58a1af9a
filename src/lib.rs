#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # rdacore: MARC to RDA Core ingestion
//!
//! Reads MARC bibliographic records and writes each one into a key-value
//! datastore as a Record Group: one Work, Expression, Manifestation and
//! Item, linked to each other and registered in per-kind collections.
//!
//! ## Quick Start
//!
//! ```
//! use rdacore::{Field, IngestConfig, Leader, MemoryStore, Orchestrator, Profiles, Record};
//! use rdacore::store::Datastore;
//! use std::sync::Arc;
//!
//! # fn main() -> rdacore::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = Orchestrator::new(store.clone(), Profiles::standard()?, IngestConfig::default());
//!
//! let record = Record::builder(Leader::default())
//!     .control_field_str("001", "ocm00012345")
//!     .field(
//!         Field::builder("245".to_string(), '1', '0')
//!             .subfield_str('a', "Walden")
//!             .build(),
//!     )
//!     .build();
//!
//! let group = orchestrator.ingest(&record)?;
//! assert_eq!(group.root_key, "rdaCore:1");
//! assert_eq!(
//!     store.hget(&group.manifestation, "titleProper").unwrap().as_deref(),
//!     Some("Walden")
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`record`], [`leader`] — MARC record model
//! - [`reader`], [`writer`] — ISO 2709 input (and output for fixtures)
//! - [`rules`] — Declarative extraction rules and their evaluator
//! - [`store`] — Datastore trait with in-memory and redb backends
//! - [`merge`] — Promote-to-set attribute storage
//! - [`counters`], [`interning`] — Sequence numbers and identifier interning
//! - [`entity`] — Per-kind entity builders and post-processing steps
//! - [`orchestrator`] — One record to one linked Record Group
//! - [`batch`] — Worker pool over a record stream
//! - [`config`] — Ingestion and batch settings
//! - [`error`] — Error types

pub mod batch;
pub mod config;
pub mod counters;
pub mod entity;
pub mod error;
pub mod interning;
pub mod leader;
pub mod merge;
pub mod orchestrator;
pub mod reader;
pub mod record;
pub mod rules;
pub mod store;
pub mod writer;

pub use batch::{BatchDriver, BatchReport, StopHandle};
pub use config::{BatchConfig, IdentifierPolicies, IdentifierPolicy, IngestConfig};
pub use entity::{EntityKind, Profiles};
pub use error::{IngestError, Result};
pub use interning::InterningTable;
pub use leader::Leader;
pub use merge::{AttributeStore, AttributeValue, MergeOutcome};
pub use orchestrator::{Orchestrator, RecordGroup};
pub use reader::{MarcReader, RecoveryMode};
pub use record::{Field, FieldBuilder, FieldRef, Record, RecordBuilder, Subfield};
pub use rules::RuleSet;
pub use store::{Datastore, MemoryStore, StoreError};
#[cfg(feature = "redb-store")]
pub use store::RedbStore;
pub use writer::MarcWriter;
