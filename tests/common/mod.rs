//! Common test helpers and fixtures shared across the integration tests.

#![allow(dead_code)]

use rdacore::store::{Allocation, Datastore, KeyType, StoreError, StoreResult};
use rdacore::{Field, Leader, MemoryStore, Record};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Builds a data field from `(code, value)` pairs.
pub fn field(tag: &str, ind1: char, ind2: char, subfields: &[(char, &str)]) -> Field {
    let mut field = Field::new(tag.to_string(), ind1, ind2);
    for (code, value) in subfields {
        field.add_subfield_str(*code, value);
    }
    field
}

/// A 008 with the given date type and dates, English language.
pub fn fixed_field(date_type: char, date1: &str, date2: &str) -> String {
    format!("{:<35}eng d", format!("850101{date_type}{date1:<4}{date2:<4}mau"))
}

/// A realistic book-on-videodisc record touching every bundled profile.
pub fn sample_record() -> Record {
    Record::builder(Leader::default())
        .control_field_str("001", "ocm01234567")
        .control_field_str("007", "vd cvaizq")
        .control_field_str("008", &fixed_field('t', "1985", "1854"))
        .field(field("020", ' ', ' ', &[('a', "0596007973")]))
        .field(field("024", '7', ' ', &[('a', "10.1000/182"), ('2', "doi")]))
        .field(field("245", '1', '0', &[('a', "Walden"), ('c', "Henry David Thoreau.")]))
        .field(field("250", ' ', ' ', &[('a', "4th ed."), ('b', "revised by X")]))
        .field(field(
            "260",
            ' ',
            ' ',
            &[('a', "Boston :"), ('b', "Ticknor and Fields,"), ('c', "c1854.")],
        ))
        .field(field("300", ' ', ' ', &[('a', "357 p."), ('c', "20 cm.")]))
        .field(field("336", ' ', ' ', &[('a', "text"), ('2', "rdacontent")]))
        .field(field("650", ' ', '0', &[('a', "Wilderness areas")]))
        .field(field("852", ' ', ' ', &[('p', "33000123")]))
        .build()
}

/// A minimal record with one title.
pub fn titled_record(title: &str) -> Record {
    Record::builder(Leader::default())
        .field(field("245", '0', '0', &[('a', title)]))
        .build()
}

/// How a [`FaultyStore`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `StoreError::Timeout`
    Timeout,
    /// `StoreError::Backend`
    Backend,
}

/// A [`MemoryStore`] that fails calls touching keys containing a pattern,
/// a limited number of times.
#[derive(Debug)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pattern: String,
    remaining: AtomicUsize,
    fault: Fault,
    reachable: bool,
}

impl FaultyStore {
    /// Never fails.
    pub fn healthy() -> Self {
        Self::failing("", 0, Fault::Backend)
    }

    /// Fails the first `times` calls on keys containing `pattern`.
    pub fn failing(pattern: &str, times: usize, fault: Fault) -> Self {
        FaultyStore {
            inner: MemoryStore::new(),
            pattern: pattern.to_string(),
            remaining: AtomicUsize::new(times),
            fault,
            reachable: true,
        }
    }

    /// Fails `ping` and everything else.
    pub fn unreachable() -> Self {
        FaultyStore {
            reachable: false,
            ..Self::failing("", usize::MAX, Fault::Backend)
        }
    }

    fn check(&self, operation: &str, key: &str) -> StoreResult<()> {
        if !key.contains(&self.pattern) {
            return Ok(());
        }
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !tripped {
            return Ok(());
        }
        Err(match self.fault {
            Fault::Timeout => StoreError::Timeout {
                operation: operation.to_string(),
                waited: Duration::from_millis(5),
            },
            Fault::Backend => StoreError::Backend(format!("injected failure on {key}")),
        })
    }
}

impl Datastore for FaultyStore {
    fn ping(&self) -> StoreResult<()> {
        if self.reachable {
            self.inner.ping()
        } else {
            Err(StoreError::Backend("connection refused".to_string()))
        }
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check("get", key)?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check("set", key)?;
        self.inner.set(key, value)
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.check("hget", key)?;
        self.inner.hget(key, field)
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        self.check("hset", key)?;
        self.inner.hset(key, field, value)
    }

    fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.inner.hdel(key, field)
    }

    fn hgetall(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        self.check("hgetall", key)?;
        self.inner.hgetall(key)
    }

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check("sadd", key)?;
        self.inner.sadd(key, member)
    }

    fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.srem(key, member)
    }

    fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        self.check("smembers", key)?;
        self.inner.smembers(key)
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check("sismember", key)?;
        self.inner.sismember(key, member)
    }

    fn zadd(&self, key: &str, score: i64, member: &str) -> StoreResult<bool> {
        self.check("zadd", key)?;
        self.inner.zadd(key, score, member)
    }

    fn zrange(&self, key: &str) -> StoreResult<Vec<(i64, String)>> {
        self.check("zrange", key)?;
        self.inner.zrange(key)
    }

    fn incr(&self, key: &str) -> StoreResult<u64> {
        self.check("incr", key)?;
        self.inner.incr(key)
    }

    fn key_type(&self, key: &str) -> StoreResult<KeyType> {
        self.inner.key_type(key)
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        self.inner.del(key)
    }

    fn hget_or_allocate(
        &self,
        index_key: &str,
        field: &str,
        counter_key: &str,
        mint: &dyn Fn(u64) -> String,
    ) -> StoreResult<Allocation> {
        self.check("hget_or_allocate", index_key)?;
        self.inner.hget_or_allocate(index_key, field, counter_key, mint)
    }
}
