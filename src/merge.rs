//! Attribute merge store.
//!
//! Entity attributes live in the entity's hash. Each attribute holds an
//! [`AttributeValue`]: a scalar string, or the key of a set, sorted set or
//! nested group hash stored at `{owner}:{attribute}`. The variant tag is
//! recorded in the companion hash `{owner}:shapes`, so merging switches on
//! the stored tag instead of probing backend key types.
//!
//! Merging follows promote-to-set semantics: an attribute stays scalar until
//! a second distinct value arrives, then it becomes a set holding both, and
//! it never goes back.
//!
//! Every key written on behalf of a record is noted in a [`Journal`], which
//! the orchestrator uses to roll back a record that fails part way.

use crate::entity::dates::extract_year;
use crate::error::{IngestError, Result};
use crate::store::Datastore;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use unicode_normalization::UnicodeNormalization;

/// Suffix of the hash recording each attribute's shape.
pub const SHAPES_SUFFIX: &str = "shapes";

/// Stored shape of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Single string in the owner hash
    Scalar,
    /// Unordered set of strings
    Set,
    /// Set of (year, string) pairs ordered by year
    SortedSet,
    /// Nested hash of further attributes
    Group,
}

impl Shape {
    fn marker(self) -> &'static str {
        match self {
            Shape::Scalar => "scalar",
            Shape::Set => "set",
            Shape::SortedSet => "sorted-set",
            Shape::Group => "group",
        }
    }

    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "scalar" => Some(Shape::Scalar),
            "set" => Some(Shape::Set),
            "sorted-set" => Some(Shape::SortedSet),
            "group" => Some(Shape::Group),
            _ => None,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// The value an attribute currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// The value itself
    Scalar(String),
    /// Key of a set
    Set(String),
    /// Key of a sorted set scored by year
    SortedSet(String),
    /// Key of a nested attribute hash
    Group(String),
}

impl AttributeValue {
    /// Shape tag of this value.
    #[must_use]
    pub fn shape(&self) -> Shape {
        match self {
            AttributeValue::Scalar(_) => Shape::Scalar,
            AttributeValue::Set(_) => Shape::Set,
            AttributeValue::SortedSet(_) => Shape::SortedSet,
            AttributeValue::Group(_) => Shape::Group,
        }
    }
}

/// What a merge call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing new to store
    Unchanged,
    /// First value stored as a scalar
    StoredScalar,
    /// First values stored as a new set
    CreatedSet,
    /// A scalar was promoted to a set
    Promoted,
    /// New members were added to an existing set
    Extended,
}

/// Keys written on behalf of one record.
#[derive(Debug, Default)]
pub struct Journal {
    keys: Mutex<BTreeSet<String>>,
}

impl Journal {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that `key` was written.
    pub fn record(&self, key: &str) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if !keys.contains(key) {
            keys.insert(key.to_string());
        }
    }

    /// Every key noted so far, once each, sorted by key.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Delete every journaled key, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns the first datastore error; keys after it are left in place.
    pub fn rollback(&self, store: &dyn Datastore) -> Result<usize> {
        let mut deleted = 0;
        for key in self.keys() {
            if store.del(&key)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Promote-to-set attribute writer over a [`Datastore`].
#[derive(Debug, Clone, Copy)]
pub struct AttributeStore<'s> {
    store: &'s dyn Datastore,
    journal: &'s Journal,
}

/// Key of the shape table of `owner`.
#[must_use]
pub fn shapes_key(owner: &str) -> String {
    format!("{owner}:{SHAPES_SUFFIX}")
}

/// Key of the collection backing `attribute` of `owner`.
#[must_use]
pub fn member_key(owner: &str, attribute: &str) -> String {
    format!("{owner}:{attribute}")
}

/// Drop blank candidates, normalize to NFC and remove duplicates, keeping
/// first-seen order.
#[must_use]
pub fn clean_values<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for value in values {
        let value = value.as_ref();
        if value.trim().is_empty() {
            continue;
        }
        let normalized: String = value.nfc().collect();
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

impl<'s> AttributeStore<'s> {
    /// Create a writer that journals into `journal`.
    #[must_use]
    pub fn new(store: &'s dyn Datastore, journal: &'s Journal) -> Self {
        AttributeStore { store, journal }
    }

    /// The underlying datastore.
    #[must_use]
    pub fn datastore(&self) -> &'s dyn Datastore {
        self.store
    }

    /// Read the stored value of an attribute.
    ///
    /// # Errors
    ///
    /// Returns a datastore error if the lookup fails.
    pub fn load(&self, owner: &str, attribute: &str) -> Result<Option<AttributeValue>> {
        let Some(stored) = self.store.hget(owner, attribute)? else {
            return Ok(None);
        };
        let shape = self
            .store
            .hget(&shapes_key(owner), attribute)?
            .as_deref()
            .and_then(Shape::from_marker)
            .unwrap_or(Shape::Scalar);
        Ok(Some(match shape {
            Shape::Scalar => AttributeValue::Scalar(stored),
            Shape::Set => AttributeValue::Set(stored),
            Shape::SortedSet => AttributeValue::SortedSet(stored),
            Shape::Group => AttributeValue::Group(stored),
        }))
    }

    /// Every string an attribute holds: the scalar, set members, or sorted-set
    /// members by ascending year. Groups hold no direct values.
    ///
    /// # Errors
    ///
    /// Returns a datastore error if a read fails.
    pub fn values(&self, value: &AttributeValue) -> Result<Vec<String>> {
        Ok(match value {
            AttributeValue::Scalar(s) => vec![s.clone()],
            AttributeValue::Set(key) => self.store.smembers(key)?.into_iter().collect(),
            AttributeValue::SortedSet(key) => self
                .store
                .zrange(key)?
                .into_iter()
                .map(|(_, member)| member)
                .collect(),
            AttributeValue::Group(_) => Vec::new(),
        })
    }

    /// Merge values into an attribute with promote-to-set semantics.
    ///
    /// Blank values are discarded. One distinct value on an empty attribute
    /// is stored as a scalar; several create a set. A scalar is promoted to a
    /// set when a different value arrives. Values merged into a sorted set
    /// are scored by the year they contain. Re-merging values already stored
    /// changes nothing.
    ///
    /// # Errors
    ///
    /// [`IngestError::AttributeConflict`] if the attribute is a group, or a
    /// datastore error.
    pub fn merge<S: AsRef<str>>(
        &self,
        owner: &str,
        attribute: &str,
        values: &[S],
    ) -> Result<MergeOutcome> {
        let values = clean_values(values);
        if values.is_empty() {
            return Ok(MergeOutcome::Unchanged);
        }
        match self.load(owner, attribute)? {
            None if values.len() == 1 => {
                self.write_scalar(owner, attribute, &values[0])?;
                Ok(MergeOutcome::StoredScalar)
            },
            None => {
                self.create_set(owner, attribute, &values)?;
                Ok(MergeOutcome::CreatedSet)
            },
            Some(AttributeValue::Scalar(existing)) => {
                if values.iter().all(|v| *v == existing) {
                    return Ok(MergeOutcome::Unchanged);
                }
                let mut members = vec![existing];
                members.extend(values);
                self.create_set(owner, attribute, &members)?;
                Ok(MergeOutcome::Promoted)
            },
            Some(AttributeValue::Set(key)) => self.extend_set(&key, &values),
            Some(AttributeValue::SortedSet(key)) => {
                let dated: Vec<(i64, String)> = values
                    .into_iter()
                    .filter_map(|v| extract_year(&v).map(|year| (year, v)))
                    .collect();
                self.extend_sorted(&key, &dated)
            },
            Some(AttributeValue::Group(_)) => Err(conflict(owner, attribute, Shape::Group)),
        }
    }

    /// Merge values into an attribute that is always a set, even with one value.
    ///
    /// # Errors
    ///
    /// [`IngestError::AttributeConflict`] if the attribute holds a sorted set
    /// or group, or a datastore error.
    pub fn merge_set<S: AsRef<str>>(
        &self,
        owner: &str,
        attribute: &str,
        values: &[S],
    ) -> Result<MergeOutcome> {
        let values = clean_values(values);
        if values.is_empty() {
            return Ok(MergeOutcome::Unchanged);
        }
        match self.load(owner, attribute)? {
            None => {
                self.create_set(owner, attribute, &values)?;
                Ok(MergeOutcome::CreatedSet)
            },
            Some(AttributeValue::Scalar(_)) => self.merge(owner, attribute, &values),
            Some(AttributeValue::Set(key)) => self.extend_set(&key, &values),
            Some(other) => Err(conflict(owner, attribute, other.shape())),
        }
    }

    /// Merge `(year, value)` pairs into a sorted-set attribute.
    ///
    /// A scalar holding a year is carried into the new sorted set.
    ///
    /// # Errors
    ///
    /// [`IngestError::AttributeConflict`] if the attribute holds a set, a
    /// group, or a scalar without a year; or a datastore error.
    pub fn merge_dated(
        &self,
        owner: &str,
        attribute: &str,
        entries: &[(i64, String)],
    ) -> Result<MergeOutcome> {
        let mut seen = BTreeSet::new();
        let entries: Vec<(i64, String)> = entries
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(year, v)| (*year, v.nfc().collect::<String>()))
            .filter(|(_, v)| seen.insert(v.clone()))
            .collect();
        if entries.is_empty() {
            return Ok(MergeOutcome::Unchanged);
        }
        match self.load(owner, attribute)? {
            None => {
                let key = self.create_collection(owner, attribute, Shape::SortedSet)?;
                for (year, value) in &entries {
                    self.store.zadd(&key, *year, value)?;
                }
                Ok(MergeOutcome::CreatedSet)
            },
            Some(AttributeValue::SortedSet(key)) => self.extend_sorted(&key, &entries),
            Some(AttributeValue::Scalar(existing)) => {
                let Some(year) = extract_year(&existing) else {
                    return Err(conflict(owner, attribute, Shape::Scalar));
                };
                let key = member_key(owner, attribute);
                self.journal.record(&key);
                self.store.zadd(&key, year, &existing)?;
                for (year, value) in &entries {
                    self.store.zadd(&key, *year, value)?;
                }
                self.point_at(owner, attribute, &key, Shape::SortedSet)?;
                Ok(MergeOutcome::Promoted)
            },
            Some(other) => Err(conflict(owner, attribute, other.shape())),
        }
    }

    /// Key of the nested group hash for `attribute`, creating it if needed.
    ///
    /// # Errors
    ///
    /// [`IngestError::AttributeConflict`] if the attribute holds anything but
    /// a group, or a datastore error.
    pub fn group(&self, owner: &str, attribute: &str) -> Result<String> {
        match self.load(owner, attribute)? {
            None => self.create_collection(owner, attribute, Shape::Group),
            Some(AttributeValue::Group(key)) => Ok(key),
            Some(other) => Err(conflict(owner, attribute, other.shape())),
        }
    }

    /// Replace one stored value of a scalar or set attribute with another.
    /// Returns whether `old` was found.
    ///
    /// # Errors
    ///
    /// [`IngestError::AttributeConflict`] for sorted sets and groups, or a
    /// datastore error.
    pub fn replace(&self, owner: &str, attribute: &str, old: &str, new: &str) -> Result<bool> {
        match self.load(owner, attribute)? {
            None => Ok(false),
            Some(AttributeValue::Scalar(existing)) => {
                if existing != old {
                    return Ok(false);
                }
                self.store.hset(owner, attribute, new)?;
                Ok(true)
            },
            Some(AttributeValue::Set(key)) => {
                if !self.store.srem(&key, old)? {
                    return Ok(false);
                }
                self.store.sadd(&key, new)?;
                Ok(true)
            },
            Some(other) => Err(conflict(owner, attribute, other.shape())),
        }
    }

    fn write_scalar(&self, owner: &str, attribute: &str, value: &str) -> Result<()> {
        self.journal.record(owner);
        self.journal.record(&shapes_key(owner));
        self.store
            .hset(&shapes_key(owner), attribute, Shape::Scalar.marker())?;
        self.store.hset(owner, attribute, value)?;
        Ok(())
    }

    /// Fill the set first, then point the attribute at it.
    fn create_set(&self, owner: &str, attribute: &str, members: &[String]) -> Result<()> {
        let key = member_key(owner, attribute);
        self.journal.record(&key);
        for member in members {
            self.store.sadd(&key, member)?;
        }
        self.point_at(owner, attribute, &key, Shape::Set)
    }

    fn create_collection(&self, owner: &str, attribute: &str, shape: Shape) -> Result<String> {
        let key = member_key(owner, attribute);
        self.journal.record(&key);
        self.point_at(owner, attribute, &key, shape)?;
        Ok(key)
    }

    fn point_at(&self, owner: &str, attribute: &str, key: &str, shape: Shape) -> Result<()> {
        self.journal.record(owner);
        self.journal.record(&shapes_key(owner));
        self.store.hset(&shapes_key(owner), attribute, shape.marker())?;
        self.store.hset(owner, attribute, key)?;
        Ok(())
    }

    fn extend_set(&self, key: &str, values: &[String]) -> Result<MergeOutcome> {
        let mut added = false;
        for value in values {
            added |= self.store.sadd(key, value)?;
        }
        Ok(if added {
            MergeOutcome::Extended
        } else {
            MergeOutcome::Unchanged
        })
    }

    fn extend_sorted(&self, key: &str, entries: &[(i64, String)]) -> Result<MergeOutcome> {
        let mut added = false;
        for (year, value) in entries {
            added |= self.store.zadd(key, *year, value)?;
        }
        Ok(if added {
            MergeOutcome::Extended
        } else {
            MergeOutcome::Unchanged
        })
    }
}

fn conflict(owner: &str, attribute: &str, found: Shape) -> IngestError {
    IngestError::AttributeConflict {
        owner: owner.to_string(),
        attribute: attribute.to_string(),
        found: found.to_string(),
    }
}
