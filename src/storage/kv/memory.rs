//! In-process key-value client.
//!
//! Clones share one keyspace, so a clone handed to another thread behaves like
//! a second connection to the same server. Faults can be queued per
//! operation to exercise timeout and disconnect paths.

use crate::core::error::{StorageError, StorageResult};
use crate::storage::kv::client::{KeyValueClient, ScoredMember};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KvOperation {
    HSet,
    HSetMultiple,
    HSetUnless,
    HGet,
    HDel,
    HLen,
    HKeys,
    HScan,
    HMove,
    ZAdd,
    ZRem,
    ZScan,
    Exists,
    Delete,
    KeysWithPrefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    Timeout,
    Disconnected,
}

#[derive(Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(previous, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    hashes: HashMap<String, BTreeMap<String, Vec<u8>>>,
    sorted_sets: HashMap<String, SortedSet>,
    faults: HashMap<KvOperation, VecDeque<InjectedFault>>,
}

impl MemoryState {
    fn hdel(&mut self, key: &str, field: &str) -> bool {
        let Some(hash) = self.hashes.get_mut(key) else {
            return false;
        };
        let removed = hash.remove(field).is_some();
        if hash.is_empty() {
            self.hashes.remove(key);
        }
        removed
    }

    fn hset(&mut self, key: &str, field: &str, value: &[u8]) {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_vec());
    }

    fn hash_contains(&self, key: &str, field: &str) -> bool {
        self.hashes
            .get(key)
            .is_some_and(|hash| hash.contains_key(field))
    }
}

#[derive(Clone, Default)]
pub struct MemoryClient {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `operation` fail with `fault`. Queued faults fire in order.
    pub fn fail_next(&self, operation: KvOperation, fault: InjectedFault) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.entry(operation).or_default().push_back(fault);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.clear();
        }
    }

    fn begin(&self, operation: KvOperation) -> StorageResult<MutexGuard<'_, MemoryState>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StorageError::Disconnected("memory keyspace lock poisoned".to_string()))?;
        let fault = state
            .faults
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front());
        match fault {
            Some(InjectedFault::Timeout) => Err(StorageError::Timeout(format!(
                "injected timeout during {:?}",
                operation
            ))),
            Some(InjectedFault::Disconnected) => Err(StorageError::Disconnected(format!(
                "injected disconnect during {:?}",
                operation
            ))),
            None => Ok(state),
        }
    }
}

impl KeyValueClient for MemoryClient {
    fn hset(&self, key: &str, field: &str, value: &[u8]) -> StorageResult<()> {
        self.begin(KvOperation::HSet)?.hset(key, field, value);
        Ok(())
    }

    fn hset_multiple(&self, key: &str, fields: &[(&str, &[u8])]) -> StorageResult<()> {
        let mut state = self.begin(KvOperation::HSetMultiple)?;
        for (field, value) in fields {
            state.hset(key, field, value);
        }
        Ok(())
    }

    fn hset_unless(
        &self,
        key: &str,
        field: &str,
        value: &[u8],
        guard_key: &str,
    ) -> StorageResult<bool> {
        let mut state = self.begin(KvOperation::HSetUnless)?;
        if state.hash_contains(guard_key, field) {
            return Ok(false);
        }
        state.hset(key, field, value);
        Ok(true)
    }

    fn hget(&self, key: &str, field: &str) -> StorageResult<Option<Vec<u8>>> {
        let state = self.begin(KvOperation::HGet)?;
        Ok(state
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    fn hdel(&self, key: &str, field: &str) -> StorageResult<bool> {
        Ok(self.begin(KvOperation::HDel)?.hdel(key, field))
    }

    fn hlen(&self, key: &str) -> StorageResult<u64> {
        let state = self.begin(KvOperation::HLen)?;
        Ok(state.hashes.get(key).map_or(0, |hash| hash.len() as u64))
    }

    fn hkeys(&self, key: &str) -> StorageResult<Vec<String>> {
        let state = self.begin(KvOperation::HKeys)?;
        Ok(state
            .hashes
            .get(key)
            .map(|hash| hash.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn hscan(
        &self,
        key: &str,
        after: Option<&str>,
        count: usize,
    ) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let state = self.begin(KvOperation::HScan)?;
        let Some(hash) = state.hashes.get(key) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(field) => Bound::Excluded(field.to_string()),
            None => Bound::Unbounded,
        };
        Ok(hash
            .range((lower, Bound::Unbounded))
            .take(count)
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect())
    }

    fn hmove(
        &self,
        source: &str,
        destination: &str,
        field: &str,
        value: &[u8],
    ) -> StorageResult<bool> {
        let mut state = self.begin(KvOperation::HMove)?;
        if !state.hdel(source, field) {
            return Ok(false);
        }
        state.hset(destination, field, value);
        Ok(true)
    }

    fn zadd(&self, key: &str, member: &str, score: i64) -> StorageResult<()> {
        let mut state = self.begin(KvOperation::ZAdd)?;
        state
            .sorted_sets
            .entry(key.to_string())
            .or_default()
            .insert(member, score);
        Ok(())
    }

    fn zrem(&self, key: &str, member: &str) -> StorageResult<bool> {
        let mut state = self.begin(KvOperation::ZRem)?;
        let Some(set) = state.sorted_sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.scores.is_empty() {
            state.sorted_sets.remove(key);
        }
        Ok(removed)
    }

    fn zscan(
        &self,
        key: &str,
        after: Option<&ScoredMember>,
        count: usize,
    ) -> StorageResult<Vec<ScoredMember>> {
        let state = self.begin(KvOperation::ZScan)?;
        let Some(set) = state.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(entry) => Bound::Excluded((entry.score, entry.member.clone())),
            None => Bound::Unbounded,
        };
        Ok(set
            .ordered
            .range((lower, Bound::Unbounded))
            .take(count)
            .map(|(score, member)| ScoredMember {
                score: *score,
                member: member.clone(),
            })
            .collect())
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        let state = self.begin(KvOperation::Exists)?;
        Ok(state.hashes.contains_key(key) || state.sorted_sets.contains_key(key))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut state = self.begin(KvOperation::Delete)?;
        let removed_hash = state.hashes.remove(key).is_some();
        let removed_set = state.sorted_sets.remove(key).is_some();
        Ok(removed_hash || removed_set)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let state = self.begin(KvOperation::KeysWithPrefix)?;
        let keys: BTreeSet<String> = state
            .hashes
            .keys()
            .chain(state.sorted_sets.keys())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        Ok(keys.into_iter().collect())
    }
}
