//! Persistent datastore built on redb.
//!
//! Redis-style data types are laid out over four tables. Collection members
//! use `(key, member)` tuple keys so one key's members form a contiguous
//! range:
//!
//! - `strings`: key -> value (plain strings and counters)
//! - `hashes`: (key, field) -> value
//! - `sets`: (key, member) -> marker
//! - `zsets`: (key, member) -> score
//!
//! Every mutating call is one write transaction, so compound operations such
//! as [`Datastore::hget_or_allocate`] commit atomically or not at all, and
//! survive reopening the database.

use super::{Allocation, Datastore, KeyType, StoreError, StoreResult};
use crate::error::{IngestError, Result};
use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable, Table,
    TableDefinition, WriteTransaction,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const STRINGS: TableDefinition<&str, &str> = TableDefinition::new("strings");
const HASHES: TableDefinition<(&str, &str), &str> = TableDefinition::new("hashes");
const SETS: TableDefinition<(&str, &str), u8> = TableDefinition::new("sets");
const ZSETS: TableDefinition<(&str, &str), i64> = TableDefinition::new("zsets");

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// A [`Datastore`] persisted in a redb database file.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::BackendUnavailable`] if the database cannot be
    /// opened or its tables created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let unavailable = |e: &dyn std::fmt::Display| {
            IngestError::BackendUnavailable(format!("{}: {e}", path.as_ref().display()))
        };
        let db = Database::create(path.as_ref()).map_err(|e| unavailable(&e))?;
        {
            let txn = db.begin_write().map_err(|e| unavailable(&e))?;
            txn.open_table(STRINGS).map_err(|e| unavailable(&e))?;
            txn.open_table(HASHES).map_err(|e| unavailable(&e))?;
            txn.open_table(SETS).map_err(|e| unavailable(&e))?;
            txn.open_table(ZSETS).map_err(|e| unavailable(&e))?;
            txn.commit().map_err(|e| unavailable(&e))?;
        }
        Ok(RedbStore { db })
    }

    fn read<T>(&self, op: impl FnOnce(&ReadTables) -> StoreResult<T>) -> StoreResult<T> {
        let txn = self.db.begin_read().map_err(backend)?;
        let tables = ReadTables::open(&txn)?;
        op(&tables)
    }

    fn write<T>(&self, op: impl FnOnce(&mut WriteTables<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let txn = self.db.begin_write().map_err(backend)?;
        let result = {
            let mut tables = WriteTables::open(&txn)?;
            op(&mut tables)?
        };
        txn.commit().map_err(backend)?;
        Ok(result)
    }
}

struct ReadTables {
    strings: ReadOnlyTable<&'static str, &'static str>,
    hashes: ReadOnlyTable<(&'static str, &'static str), &'static str>,
    sets: ReadOnlyTable<(&'static str, &'static str), u8>,
    zsets: ReadOnlyTable<(&'static str, &'static str), i64>,
}

impl ReadTables {
    fn open(txn: &ReadTransaction) -> StoreResult<Self> {
        Ok(ReadTables {
            strings: txn.open_table(STRINGS).map_err(backend)?,
            hashes: txn.open_table(HASHES).map_err(backend)?,
            sets: txn.open_table(SETS).map_err(backend)?,
            zsets: txn.open_table(ZSETS).map_err(backend)?,
        })
    }

    fn expect(&self, key: &str, expected: KeyType) -> StoreResult<()> {
        let found = key_type_of(&self.strings, &self.hashes, &self.sets, &self.zsets, key)?;
        check_type(key, expected, found)
    }
}

struct WriteTables<'txn> {
    strings: Table<'txn, &'static str, &'static str>,
    hashes: Table<'txn, (&'static str, &'static str), &'static str>,
    sets: Table<'txn, (&'static str, &'static str), u8>,
    zsets: Table<'txn, (&'static str, &'static str), i64>,
}

impl<'txn> WriteTables<'txn> {
    fn open(txn: &'txn WriteTransaction) -> StoreResult<Self> {
        Ok(WriteTables {
            strings: txn.open_table(STRINGS).map_err(backend)?,
            hashes: txn.open_table(HASHES).map_err(backend)?,
            sets: txn.open_table(SETS).map_err(backend)?,
            zsets: txn.open_table(ZSETS).map_err(backend)?,
        })
    }

    fn key_type(&self, key: &str) -> StoreResult<KeyType> {
        key_type_of(&self.strings, &self.hashes, &self.sets, &self.zsets, key)
    }

    fn expect(&self, key: &str, expected: KeyType) -> StoreResult<()> {
        check_type(key, expected, self.key_type(key)?)
    }

    fn get_string(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .strings
            .get(key)
            .map_err(backend)?
            .map(|v| v.value().to_string()))
    }

    fn set_string(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.expect(key, KeyType::String)?;
        self.strings.insert(key, value).map_err(backend)?;
        Ok(())
    }

    fn incr(&mut self, key: &str) -> StoreResult<u64> {
        self.expect(key, KeyType::String)?;
        let current = match self.get_string(key)? {
            None => 0,
            Some(text) => text
                .parse::<u64>()
                .map_err(|_| StoreError::Backend(format!("value at '{key}' is not an integer")))?,
        };
        let next = current + 1;
        self.strings
            .insert(key, next.to_string().as_str())
            .map_err(backend)?;
        Ok(next)
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        self.expect(key, KeyType::Hash)?;
        Ok(self
            .hashes
            .insert((key, field), value)
            .map_err(backend)?
            .is_none())
    }
}

fn check_type(key: &str, expected: KeyType, found: KeyType) -> StoreResult<()> {
    if found == KeyType::None || found == expected {
        Ok(())
    } else {
        Err(StoreError::WrongType {
            key: key.to_string(),
            expected,
            found,
        })
    }
}

fn key_type_of(
    strings: &impl ReadableTable<&'static str, &'static str>,
    hashes: &impl ReadableTable<(&'static str, &'static str), &'static str>,
    sets: &impl ReadableTable<(&'static str, &'static str), u8>,
    zsets: &impl ReadableTable<(&'static str, &'static str), i64>,
    key: &str,
) -> StoreResult<KeyType> {
    if strings.get(key).map_err(backend)?.is_some() {
        return Ok(KeyType::String);
    }
    if !member_names(hashes, key, 1)?.is_empty() {
        return Ok(KeyType::Hash);
    }
    if !member_names(sets, key, 1)?.is_empty() {
        return Ok(KeyType::Set);
    }
    if !member_names(zsets, key, 1)?.is_empty() {
        return Ok(KeyType::SortedSet);
    }
    Ok(KeyType::None)
}

/// Up to `limit` member names stored under `key` in a tuple-keyed table.
fn member_names<V: redb::Value + 'static>(
    table: &impl ReadableTable<(&'static str, &'static str), V>,
    key: &str,
    limit: usize,
) -> StoreResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in table.range((key, "")..).map_err(backend)? {
        let (k, _) = entry.map_err(backend)?;
        let (owner, member) = k.value();
        if owner != key || names.len() == limit {
            break;
        }
        names.push(member.to_string());
    }
    Ok(names)
}

impl Datastore for RedbStore {
    fn ping(&self) -> StoreResult<()> {
        self.db.begin_read().map(|_| ()).map_err(backend)
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.read(|t| {
            t.expect(key, KeyType::String)?;
            Ok(t.strings
                .get(key)
                .map_err(backend)?
                .map(|v| v.value().to_string()))
        })
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.write(|t| t.set_string(key, value))
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.read(|t| {
            t.expect(key, KeyType::Hash)?;
            Ok(t.hashes
                .get((key, field))
                .map_err(backend)?
                .map(|v| v.value().to_string()))
        })
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        self.write(|t| t.hset(key, field, value))
    }

    fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.write(|t| {
            t.expect(key, KeyType::Hash)?;
            Ok(t.hashes.remove((key, field)).map_err(backend)?.is_some())
        })
    }

    fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        self.read(|t| {
            t.expect(key, KeyType::Hash)?;
            let mut out = BTreeMap::new();
            for entry in t.hashes.range((key, "")..).map_err(backend)? {
                let (k, v) = entry.map_err(backend)?;
                let (owner, field) = k.value();
                if owner != key {
                    break;
                }
                out.insert(field.to_string(), v.value().to_string());
            }
            Ok(out)
        })
    }

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.write(|t| {
            t.expect(key, KeyType::Set)?;
            Ok(t.sets.insert((key, member), 1u8).map_err(backend)?.is_none())
        })
    }

    fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.write(|t| {
            t.expect(key, KeyType::Set)?;
            Ok(t.sets.remove((key, member)).map_err(backend)?.is_some())
        })
    }

    fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        self.read(|t| {
            t.expect(key, KeyType::Set)?;
            Ok(member_names(&t.sets, key, usize::MAX)?.into_iter().collect())
        })
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.read(|t| {
            t.expect(key, KeyType::Set)?;
            Ok(t.sets.get((key, member)).map_err(backend)?.is_some())
        })
    }

    fn zadd(&self, key: &str, score: i64, member: &str) -> StoreResult<bool> {
        self.write(|t| {
            t.expect(key, KeyType::SortedSet)?;
            Ok(t.zsets
                .insert((key, member), score)
                .map_err(backend)?
                .is_none())
        })
    }

    fn zrange(&self, key: &str) -> StoreResult<Vec<(i64, String)>> {
        self.read(|t| {
            t.expect(key, KeyType::SortedSet)?;
            let mut pairs = Vec::new();
            for entry in t.zsets.range((key, "")..).map_err(backend)? {
                let (k, v) = entry.map_err(backend)?;
                let (owner, member) = k.value();
                if owner != key {
                    break;
                }
                pairs.push((v.value(), member.to_string()));
            }
            pairs.sort();
            Ok(pairs)
        })
    }

    fn incr(&self, key: &str) -> StoreResult<u64> {
        self.write(|t| t.incr(key))
    }

    fn key_type(&self, key: &str) -> StoreResult<KeyType> {
        self.read(|t| key_type_of(&t.strings, &t.hashes, &t.sets, &t.zsets, key))
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        self.write(|t| {
            match t.key_type(key)? {
                KeyType::None => return Ok(false),
                KeyType::String => {
                    t.strings.remove(key).map_err(backend)?;
                },
                KeyType::Hash => {
                    for field in member_names(&t.hashes, key, usize::MAX)? {
                        t.hashes.remove((key, field.as_str())).map_err(backend)?;
                    }
                },
                KeyType::Set => {
                    for member in member_names(&t.sets, key, usize::MAX)? {
                        t.sets.remove((key, member.as_str())).map_err(backend)?;
                    }
                },
                KeyType::SortedSet => {
                    for member in member_names(&t.zsets, key, usize::MAX)? {
                        t.zsets.remove((key, member.as_str())).map_err(backend)?;
                    }
                },
            }
            Ok(true)
        })
    }

    fn hget_or_allocate(
        &self,
        index_key: &str,
        field: &str,
        counter_key: &str,
        mint: &dyn Fn(u64) -> String,
    ) -> StoreResult<Allocation> {
        self.write(|t| {
            t.expect(index_key, KeyType::Hash)?;
            let existing = t
                .hashes
                .get((index_key, field))
                .map_err(backend)?
                .map(|v| v.value().to_string());
            if let Some(value) = existing {
                return Ok(Allocation {
                    value,
                    created: false,
                });
            }
            let n = t.incr(counter_key)?;
            let value = mint(n);
            t.set_string(&value, field)?;
            t.hset(index_key, field, &value)?;
            Ok(Allocation {
                value,
                created: true,
            })
        })
    }
}
