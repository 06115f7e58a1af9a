//! In-memory datastore.

use super::{Allocation, Datastore, KeyType, StoreError, StoreResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_micros(50);

#[derive(Debug, Clone)]
enum Value {
    String(String),
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
    SortedSet(BTreeMap<String, i64>),
}

impl Value {
    fn key_type(&self) -> KeyType {
        match self {
            Value::String(_) => KeyType::String,
            Value::Hash(_) => KeyType::Hash,
            Value::Set(_) => KeyType::Set,
            Value::SortedSet(_) => KeyType::SortedSet,
        }
    }
}

type Keyspace = BTreeMap<String, Value>;

/// A [`Datastore`] kept in process memory.
///
/// Every call runs under one mutex, so each operation (including the
/// compound [`Datastore::hget_or_allocate`]) is a single critical section.
/// Lock acquisition is bounded: a call that cannot get the lock within the
/// configured timeout fails with [`StoreError::Timeout`].
///
/// ```
/// use rdacore::store::{Datastore, MemoryStore};
///
/// let store = MemoryStore::new();
/// assert_eq!(store.incr("global:rdaCore").unwrap(), 1);
/// assert_eq!(store.incr("global:rdaCore").unwrap(), 2);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    data: Mutex<Keyspace>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with the default lock timeout (5 seconds).
    #[must_use]
    pub fn new() -> Self {
        MemoryStore {
            data: Mutex::new(BTreeMap::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Bound how long any call waits for the store lock.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Every key currently stored, in order.
    ///
    /// # Errors
    ///
    /// Timeout or poisoned lock.
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock("keys")?.keys().cloned().collect())
    }

    fn lock(&self, operation: &str) -> StoreResult<MutexGuard<'_, Keyspace>> {
        let start = Instant::now();
        loop {
            match self.data.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => return Err(StoreError::Poisoned),
                Err(TryLockError::WouldBlock) => {
                    let waited = start.elapsed();
                    if waited >= self.lock_timeout {
                        return Err(StoreError::Timeout {
                            operation: operation.to_string(),
                            waited,
                        });
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                },
            }
        }
    }
}

fn wrong_type(key: &str, expected: KeyType, found: &Value) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        found: found.key_type(),
    }
}

fn hash_mut<'a>(
    data: &'a mut Keyspace,
    key: &str,
) -> StoreResult<&'a mut BTreeMap<String, String>> {
    match data
        .entry(key.to_string())
        .or_insert_with(|| Value::Hash(BTreeMap::new()))
    {
        Value::Hash(hash) => Ok(hash),
        other => Err(wrong_type(key, KeyType::Hash, other)),
    }
}

fn set_string(data: &mut Keyspace, key: &str, value: &str) -> StoreResult<()> {
    match data.get_mut(key) {
        None => {
            data.insert(key.to_string(), Value::String(value.to_string()));
            Ok(())
        },
        Some(Value::String(existing)) => {
            *existing = value.to_string();
            Ok(())
        },
        Some(other) => Err(wrong_type(key, KeyType::String, other)),
    }
}

/// Value `incr_counter` would return, without writing it.
fn peek_counter(data: &Keyspace, key: &str) -> StoreResult<u64> {
    let current = match data.get(key) {
        None => 0,
        Some(Value::String(text)) => text.parse::<u64>().map_err(|_| {
            StoreError::Backend(format!("value at '{key}' is not an integer"))
        })?,
        Some(other) => return Err(wrong_type(key, KeyType::String, other)),
    };
    Ok(current + 1)
}

fn incr_counter(data: &mut Keyspace, key: &str) -> StoreResult<u64> {
    let next = peek_counter(data, key)?;
    data.insert(key.to_string(), Value::String(next.to_string()));
    Ok(next)
}

impl Datastore for MemoryStore {
    fn ping(&self) -> StoreResult<()> {
        self.lock("ping").map(|_| ())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.lock("get")?.get(key) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(other) => Err(wrong_type(key, KeyType::String, other)),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        set_string(&mut *self.lock("set")?, key, value)
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        match self.lock("hget")?.get(key) {
            None => Ok(None),
            Some(Value::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(other) => Err(wrong_type(key, KeyType::Hash, other)),
        }
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let mut data = self.lock("hset")?;
        let hash = hash_mut(&mut data, key)?;
        Ok(hash.insert(field.to_string(), value.to_string()).is_none())
    }

    fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        let mut data = self.lock("hdel")?;
        let (removed, now_empty) = match data.get_mut(key) {
            None => return Ok(false),
            Some(Value::Hash(hash)) => (hash.remove(field).is_some(), hash.is_empty()),
            Some(other) => return Err(wrong_type(key, KeyType::Hash, other)),
        };
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }

    fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        match self.lock("hgetall")?.get(key) {
            None => Ok(BTreeMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(other) => Err(wrong_type(key, KeyType::Hash, other)),
        }
    }

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut data = self.lock("sadd")?;
        match data
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(BTreeSet::new()))
        {
            Value::Set(set) => Ok(set.insert(member.to_string())),
            other => Err(wrong_type(key, KeyType::Set, other)),
        }
    }

    fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut data = self.lock("srem")?;
        let (removed, now_empty) = match data.get_mut(key) {
            None => return Ok(false),
            Some(Value::Set(set)) => (set.remove(member), set.is_empty()),
            Some(other) => return Err(wrong_type(key, KeyType::Set, other)),
        };
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }

    fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        match self.lock("smembers")?.get(key) {
            None => Ok(BTreeSet::new()),
            Some(Value::Set(set)) => Ok(set.clone()),
            Some(other) => Err(wrong_type(key, KeyType::Set, other)),
        }
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        match self.lock("sismember")?.get(key) {
            None => Ok(false),
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(other) => Err(wrong_type(key, KeyType::Set, other)),
        }
    }

    fn zadd(&self, key: &str, score: i64, member: &str) -> StoreResult<bool> {
        let mut data = self.lock("zadd")?;
        match data
            .entry(key.to_string())
            .or_insert_with(|| Value::SortedSet(BTreeMap::new()))
        {
            Value::SortedSet(zset) => Ok(zset.insert(member.to_string(), score).is_none()),
            other => Err(wrong_type(key, KeyType::SortedSet, other)),
        }
    }

    fn zrange(&self, key: &str) -> StoreResult<Vec<(i64, String)>> {
        match self.lock("zrange")?.get(key) {
            None => Ok(Vec::new()),
            Some(Value::SortedSet(zset)) => {
                let mut pairs: Vec<(i64, String)> =
                    zset.iter().map(|(m, s)| (*s, m.clone())).collect();
                pairs.sort();
                Ok(pairs)
            },
            Some(other) => Err(wrong_type(key, KeyType::SortedSet, other)),
        }
    }

    fn incr(&self, key: &str) -> StoreResult<u64> {
        incr_counter(&mut *self.lock("incr")?, key)
    }

    fn key_type(&self, key: &str) -> StoreResult<KeyType> {
        Ok(self
            .lock("key_type")?
            .get(key)
            .map_or(KeyType::None, Value::key_type))
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock("del")?.remove(key).is_some())
    }

    fn hget_or_allocate(
        &self,
        index_key: &str,
        field: &str,
        counter_key: &str,
        mint: &dyn Fn(u64) -> String,
    ) -> StoreResult<Allocation> {
        let mut data = self.lock("hget_or_allocate")?;
        match data.get(index_key) {
            None => {},
            Some(Value::Hash(index)) => {
                if let Some(existing) = index.get(field) {
                    return Ok(Allocation {
                        value: existing.clone(),
                        created: false,
                    });
                }
            },
            Some(other) => return Err(wrong_type(index_key, KeyType::Hash, other)),
        }
        // every check runs before the counter moves
        let value = mint(peek_counter(&data, counter_key)?);
        if let Some(other) = data.get(&value).filter(|v| !matches!(v, Value::String(_))) {
            return Err(wrong_type(&value, KeyType::String, other));
        }
        incr_counter(&mut data, counter_key)?;
        set_string(&mut data, &value, field)?;
        hash_mut(&mut data, index_key)?.insert(field.to_string(), value.clone());
        Ok(Allocation {
            value,
            created: true,
        })
    }
}
