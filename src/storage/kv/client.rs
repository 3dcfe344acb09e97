//! Key-value client primitives the task store is built on.
//!
//! The primitives mirror a hash + sorted-set server: every call is one
//! blocking round-trip, and `hset_unless` / `hmove` are the only multi-key
//! operations. Both are atomic on every implementation.

use crate::core::error::StorageResult;

/// One sorted-set entry. Pages are ordered by `(score, member)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScoredMember {
    pub score: i64,
    pub member: String,
}

pub trait KeyValueClient {
    fn hset(&self, key: &str, field: &str, value: &[u8]) -> StorageResult<()>;

    fn hset_multiple(&self, key: &str, fields: &[(&str, &[u8])]) -> StorageResult<()>;

    /// Sets `field` in `key` unless `field` is present in `guard_key`.
    /// Returns whether the value was written.
    fn hset_unless(
        &self,
        key: &str,
        field: &str,
        value: &[u8],
        guard_key: &str,
    ) -> StorageResult<bool>;

    fn hget(&self, key: &str, field: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Returns whether the field existed.
    fn hdel(&self, key: &str, field: &str) -> StorageResult<bool>;

    fn hlen(&self, key: &str) -> StorageResult<u64>;

    fn hkeys(&self, key: &str) -> StorageResult<Vec<String>>;

    /// Up to `count` entries with field strictly greater than `after`, field-ordered.
    fn hscan(
        &self,
        key: &str,
        after: Option<&str>,
        count: usize,
    ) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Removes `field` from `source` and sets it in `destination` as one step.
    /// Returns false, writing nothing, when `source` did not hold `field`.
    fn hmove(
        &self,
        source: &str,
        destination: &str,
        field: &str,
        value: &[u8],
    ) -> StorageResult<bool>;

    fn zadd(&self, key: &str, member: &str, score: i64) -> StorageResult<()>;

    fn zrem(&self, key: &str, member: &str) -> StorageResult<bool>;

    /// Up to `count` entries ordered after `after` by `(score, member)`.
    fn zscan(
        &self,
        key: &str,
        after: Option<&ScoredMember>,
        count: usize,
    ) -> StorageResult<Vec<ScoredMember>>;

    fn exists(&self, key: &str) -> StorageResult<bool>;

    fn delete(&self, key: &str) -> StorageResult<bool>;

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

impl<C: KeyValueClient + ?Sized> KeyValueClient for &C {
    fn hset(&self, key: &str, field: &str, value: &[u8]) -> StorageResult<()> {
        (**self).hset(key, field, value)
    }

    fn hset_multiple(&self, key: &str, fields: &[(&str, &[u8])]) -> StorageResult<()> {
        (**self).hset_multiple(key, fields)
    }

    fn hset_unless(
        &self,
        key: &str,
        field: &str,
        value: &[u8],
        guard_key: &str,
    ) -> StorageResult<bool> {
        (**self).hset_unless(key, field, value, guard_key)
    }

    fn hget(&self, key: &str, field: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).hget(key, field)
    }

    fn hdel(&self, key: &str, field: &str) -> StorageResult<bool> {
        (**self).hdel(key, field)
    }

    fn hlen(&self, key: &str) -> StorageResult<u64> {
        (**self).hlen(key)
    }

    fn hkeys(&self, key: &str) -> StorageResult<Vec<String>> {
        (**self).hkeys(key)
    }

    fn hscan(
        &self,
        key: &str,
        after: Option<&str>,
        count: usize,
    ) -> StorageResult<Vec<(String, Vec<u8>)>> {
        (**self).hscan(key, after, count)
    }

    fn hmove(
        &self,
        source: &str,
        destination: &str,
        field: &str,
        value: &[u8],
    ) -> StorageResult<bool> {
        (**self).hmove(source, destination, field, value)
    }

    fn zadd(&self, key: &str, member: &str, score: i64) -> StorageResult<()> {
        (**self).zadd(key, member, score)
    }

    fn zrem(&self, key: &str, member: &str) -> StorageResult<bool> {
        (**self).zrem(key, member)
    }

    fn zscan(
        &self,
        key: &str,
        after: Option<&ScoredMember>,
        count: usize,
    ) -> StorageResult<Vec<ScoredMember>> {
        (**self).zscan(key, after, count)
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        (**self).exists(key)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        (**self).delete(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        (**self).keys_with_prefix(prefix)
    }
}
