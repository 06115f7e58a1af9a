//! Configuration for ingestion and batch runs.
//!
//! [`IngestConfig`] controls how one record becomes a Record Group;
//! [`BatchConfig`] controls how the [`crate::batch::BatchDriver`] spreads
//! records over workers. Both have sensible defaults, `with_*` builders, and
//! deserialize from JSON so an outer application can keep them in its own
//! settings files.

use crate::interning::namespace_key;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// How identifiers of one namespace are stored on a Manifestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierPolicy {
    /// Store the canonical key from the interning table (`isbn:12`)
    #[default]
    Interned,
    /// Store the raw identifier string, no cross-record deduplication
    Direct,
}

impl fmt::Display for IdentifierPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interned => write!(f, "interned"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// Identifier policy per namespace, with a default for the rest.
///
/// ```
/// use rdacore::config::{IdentifierPolicies, IdentifierPolicy};
///
/// let policies = IdentifierPolicies::default()
///     .with_namespace("stock-number", IdentifierPolicy::Direct);
/// assert_eq!(policies.policy_for("isbn"), IdentifierPolicy::Interned);
/// assert_eq!(policies.policy_for("Stock Number"), IdentifierPolicy::Direct);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IdentifierPolicies {
    /// Policy for namespaces without an override
    pub default: IdentifierPolicy,
    /// Overrides keyed by namespace
    pub namespaces: BTreeMap<String, IdentifierPolicy>,
}

impl IdentifierPolicies {
    /// Every namespace uses `policy`.
    #[must_use]
    pub fn uniform(policy: IdentifierPolicy) -> Self {
        Self {
            default: policy,
            namespaces: BTreeMap::new(),
        }
    }

    /// Override the policy of one namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: &str, policy: IdentifierPolicy) -> Self {
        self.namespaces.insert(namespace_key(namespace), policy);
        self
    }

    /// Policy in force for `namespace`.
    #[must_use]
    pub fn policy_for(&self, namespace: &str) -> IdentifierPolicy {
        let key = namespace_key(namespace);
        self.namespaces
            .get(&key)
            .or_else(|| self.namespaces.get(namespace))
            .copied()
            .unwrap_or(self.default)
    }
}

/// Where the Record Group's `controlNumber` is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlNumberSource {
    /// Field tag
    pub tag: String,
    /// Subfield code for data fields; ignored for control fields
    #[serde(default)]
    pub subfield: Option<char>,
}

impl Default for ControlNumberSource {
    fn default() -> Self {
        Self {
            tag: "001".to_string(),
            subfield: None,
        }
    }
}

/// Configuration for turning records into Record Groups.
///
/// # Examples
///
/// ```
/// use rdacore::config::IngestConfig;
///
/// let config = IngestConfig::new()
///     .with_key_prefix("catalog")
///     .with_parallel_entities(true);
/// assert_eq!(config.key_prefix, "catalog");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Prefix of every record, entity, collection and relation key.
    pub key_prefix: String,

    /// Build the four entities of a record concurrently.
    ///
    /// Linking always waits for all four builds to finish.
    pub parallel_entities: bool,

    /// Identifier storage policy for Manifestation identifiers.
    pub identifier_policy: IdentifierPolicies,

    /// Source of the Record Group's `controlNumber`; `None` disables it.
    pub control_number: Option<ControlNumberSource>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            key_prefix: "rdaCore".to_string(),
            parallel_entities: false,
            identifier_policy: IdentifierPolicies::default(),
            control_number: Some(ControlNumberSource::default()),
        }
    }
}

impl IngestConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Builds entities concurrently within a record.
    #[must_use]
    pub fn with_parallel_entities(mut self, enabled: bool) -> Self {
        self.parallel_entities = enabled;
        self
    }

    /// Sets the identifier policies.
    #[must_use]
    pub fn with_identifier_policy(mut self, policies: IdentifierPolicies) -> Self {
        self.identifier_policy = policies;
        self
    }

    /// Sets (or with `None`, disables) the control number source.
    #[must_use]
    pub fn with_control_number(mut self, source: Option<ControlNumberSource>) -> Self {
        self.control_number = source;
        self
    }
}

/// Configuration for batch runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads ingesting records.
    pub workers: usize,

    /// Capacity of the queue between the reader and the workers.
    pub channel_capacity: usize,

    /// Log progress every this many finished records (0 disables).
    pub progress_interval: usize,

    /// How many times a record that timed out is queued again.
    pub max_requeues: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            channel_capacity: 256,
            progress_interval: 1000,
            max_requeues: 1,
        }
    }
}

impl BatchConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker count (at least one).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the queue capacity (at least one).
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Sets the progress interval.
    #[must_use]
    pub const fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the requeue limit for timed-out records.
    #[must_use]
    pub const fn with_max_requeues(mut self, requeues: u32) -> Self {
        self.max_requeues = requeues;
        self
    }
}
