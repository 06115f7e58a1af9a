//! Key-value datastore abstraction.
//!
//! Ingestion writes through the [`Datastore`] trait, a Redis-shaped surface
//! of strings, hashes, sets, sorted sets and counters. Every method is one
//! atomic operation on the backend; [`Datastore::hget_or_allocate`] is the
//! compound find-or-create primitive used by identifier interning, and it is
//! atomic end to end as well.
//!
//! Two backends ship with the crate:
//! - [`MemoryStore`]: ordered maps behind one mutex, with a bounded lock wait
//! - [`RedbStore`]: persistent, one redb write transaction per mutating call
//!   (feature `redb-store`)

mod memory;
#[cfg(feature = "redb-store")]
mod redb_store;

pub use memory::MemoryStore;
#[cfg(feature = "redb-store")]
pub use redb_store::RedbStore;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by datastore backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend reported a failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A call could not complete within its time bound.
    #[error("{operation} timed out after {waited:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// How long it waited
        waited: Duration,
    },

    /// A previous panic left the store's lock poisoned.
    #[error("Store lock poisoned")]
    Poisoned,

    /// The key exists but holds another type of value.
    #[error("Key '{key}' holds a {found}, expected a {expected}")]
    WrongType {
        /// Offending key
        key: String,
        /// Type the operation needs
        expected: KeyType,
        /// Type actually stored
        found: KeyType,
    },
}

/// Convenience alias for backend results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type of value stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// No such key
    None,
    /// Plain string (also counters)
    String,
    /// Field -> value map
    Hash,
    /// Unordered set of strings
    Set,
    /// Set of members ordered by integer score
    SortedSet,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::None => "none",
            KeyType::String => "string",
            KeyType::Hash => "hash",
            KeyType::Set => "set",
            KeyType::SortedSet => "zset",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Datastore::hget_or_allocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Value now stored in the index for the field
    pub value: String,
    /// Whether this call allocated it
    pub created: bool,
}

/// A key-value backend with Redis-like data types.
///
/// Implementations must make each method atomic with respect to concurrent
/// callers, and must bound how long any call may block.
pub trait Datastore: Send + Sync + fmt::Debug {
    /// Check the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot serve requests.
    fn ping(&self) -> StoreResult<()>;

    /// Read a string key.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a string key.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Read one field of a hash.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Write one field of a hash; `true` if the field is new.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool>;

    /// Remove one field of a hash; `true` if it existed.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn hdel(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// Read a whole hash (empty when absent).
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>>;

    /// Add a set member; `true` if it was not already present.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove a set member; `true` if it was present.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Read every member of a set (empty when absent).
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>>;

    /// Test set membership.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Add or re-score a sorted-set member; `true` if the member is new.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn zadd(&self, key: &str, score: i64, member: &str) -> StoreResult<bool>;

    /// Every `(score, member)` pair, ascending by score then member.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn zrange(&self, key: &str) -> StoreResult<Vec<(i64, String)>>;

    /// Atomically increment a counter, returning the new value (first call: 1).
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or the key holds another type.
    fn incr(&self, key: &str) -> StoreResult<u64>;

    /// Type of the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Backend failure or timeout.
    fn key_type(&self, key: &str) -> StoreResult<KeyType>;

    /// Delete a key of any type; `true` if it existed.
    ///
    /// # Errors
    ///
    /// Backend failure or timeout.
    fn del(&self, key: &str) -> StoreResult<bool>;

    /// Atomic find-or-create on an index hash.
    ///
    /// If `index_key` already maps `field`, return that value. Otherwise
    /// increment `counter_key`, mint a value from the new count, store it in
    /// the index under `field`, store `field` as the string value of the
    /// minted key, and return it. Check, increment and both writes happen as
    /// one atomic unit.
    ///
    /// # Errors
    ///
    /// Backend failure, timeout, or a key holds another type.
    fn hget_or_allocate(
        &self,
        index_key: &str,
        field: &str,
        counter_key: &str,
        mint: &dyn Fn(u64) -> String,
    ) -> StoreResult<Allocation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_type_display() {
        assert_eq!(KeyType::SortedSet.to_string(), "zset");
        assert_eq!(KeyType::None.to_string(), "none");
    }

    #[test]
    fn test_wrong_type_message() {
        let err = StoreError::WrongType {
            key: "rdaCore:1".to_string(),
            expected: KeyType::Set,
            found: KeyType::Hash,
        };
        assert_eq!(
            err.to_string(),
            "Key 'rdaCore:1' holds a hash, expected a set"
        );
    }
}
