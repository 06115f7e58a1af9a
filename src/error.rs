//! Error types for ingestion operations.
//!
//! This module provides the [`IngestError`] type for every fallible operation in
//! the crate and the [`Result`] convenience type.
//!
//! Ordinary "field absent" outcomes are never errors: the rule engine returns
//! `None` for them. Errors are reserved for broken input streams, broken rule
//! documents, and datastore failures.

use crate::entity::EntityKind;
use crate::store::StoreError;
use thiserror::Error;

/// Error type for all ingestion operations.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Error indicating an invalid or malformed MARC record.
    #[error("Invalid MARC record: {0}")]
    InvalidRecord(String),

    /// Error indicating an invalid leader (24-byte header).
    #[error("Invalid leader: {0}")]
    InvalidLeader(String),

    /// Error indicating an invalid field structure.
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Error indicating a truncated or incomplete record.
    #[error("Truncated record: {0}")]
    TruncatedRecord(String),

    /// A rule document is structurally invalid. Raised at load time only.
    #[error("Invalid rule configuration at {context}: {reason}")]
    InvalidRuleConfiguration {
        /// Where in the document the problem was found (attribute, tag, ...)
        context: String,
        /// What is wrong with it
        reason: String,
    },

    /// The datastore could not be reached before any counter was touched.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A datastore call failed mid-record.
    #[error("Datastore error: {0}")]
    Store(#[from] StoreError),

    /// One raw identifier resolved to a canonical key that stores another value.
    #[error(
        "Interning inconsistency in namespace '{namespace}': '{raw_value}' maps to \
         {expected_key}, which stores '{stored_value}'"
    )]
    InterningInconsistency {
        /// Identifier namespace
        namespace: String,
        /// The raw value being interned
        raw_value: String,
        /// Canonical key found in the reverse index
        expected_key: String,
        /// Value actually stored under that canonical key
        stored_value: String,
    },

    /// No profile is registered for the requested entity kind.
    #[error("Entity kind {0} is not implemented (no profile registered)")]
    UnimplementedEntityKind(EntityKind),

    /// An attribute already holds a value of an incompatible shape.
    #[error("Attribute '{attribute}' on {owner} already holds a {found}")]
    AttributeConflict {
        /// Key of the hash owning the attribute
        owner: String,
        /// Attribute name
        attribute: String,
        /// Shape currently stored
        found: String,
    },

    /// A record was abandoned and its partial writes rolled back.
    #[error("Record {root_key} aborted: {source}")]
    RecordAborted {
        /// Root key allocated for the record
        root_key: String,
        /// The failure that caused the abort
        #[source]
        source: Box<IngestError>,
    },

    /// JSON document could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error from the underlying source/destination.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IngestError {
    /// Shorthand for [`IngestError::InvalidRuleConfiguration`].
    pub fn invalid_rule(context: impl Into<String>, reason: impl Into<String>) -> Self {
        IngestError::InvalidRuleConfiguration {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error must stop the whole batch rather than just the record.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::InterningInconsistency { .. } | IngestError::BackendUnavailable(_) => {
                true
            },
            IngestError::RecordAborted { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Whether the failure was a backend timeout, which the batch driver requeues.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            IngestError::Store(StoreError::Timeout { .. }) => true,
            IngestError::RecordAborted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Convenience type alias for [`std::result::Result`] with [`IngestError`].
pub type Result<T> = std::result::Result<T, IngestError>;
