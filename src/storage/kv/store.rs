//! Task store on a hash + sorted-set key-value backend.
//!
//! Key layout, all scoped by session and task identifier:
//!
//! | Key | Structure |
//! |---|---|
//! | `{session}-{task}-metadata` | hash: format_version, storage_type, serialization_format |
//! | `{session}-{task}-{container_type}` | hash: identifier -> serialized container |
//! | `{session}-{task}-sorted_event_identifier` | sorted set: identifier scored by timestamp |
//! | `{session}-finalized` | hash: task identifier -> `finalized` |
//! | `{session}-merging` | hash: task identifier -> `merging` |
//!
//! Only the finalized and merging hashes are shared between processes, and
//! every mutation of them is a single atomic client call.

use crate::core::containers::{AttributeContainer, CONTAINER_TYPE_EVENT, EventObject};
use crate::core::error::{StorageError, StorageResult};
use crate::core::identifiers::{
    Identifier, new_namespace_identifier, validate_namespace_component,
};
use crate::core::serializer::SerializationFormat;
use crate::core::session::Task;
use crate::core::time::TimeRange;
use crate::storage::interface::{
    AttributeContainerStore, ContainerIterator, DEFAULT_PAGE_SIZE, StorageType, StoreMetadata,
};
use crate::storage::kv::client::{KeyValueClient, ScoredMember};
use std::collections::{BTreeSet, VecDeque};
use std::marker::PhantomData;
use tracing::{debug, info, warn};

const EVENT_INDEX_NAME: &str = "sorted_event_identifier";
const METADATA_KEY_NAME: &str = "metadata";
const FINALIZED_KEY_NAME: &str = "finalized";
const FINALIZED_MARKER: &[u8] = b"finalized";
const MERGING_KEY_NAME: &str = "merging";
const MERGING_MARKER: &[u8] = b"merging";

pub fn finalized_key(session_identifier: &str) -> String {
    format!("{}-{}", session_identifier, FINALIZED_KEY_NAME)
}

pub fn merging_key(session_identifier: &str) -> String {
    format!("{}-{}", session_identifier, MERGING_KEY_NAME)
}

pub fn task_key_prefix(session_identifier: &str, task_identifier: &str) -> String {
    format!("{}-{}-", session_identifier, task_identifier)
}

/// Consistency of the sorted event index against the stored events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventIndexReport {
    pub number_of_events: u64,
    pub number_of_index_entries: u64,
    /// Events stored without an index entry, e.g. after a failed index insert.
    pub unindexed: Vec<Identifier>,
    /// Index entries whose event container is gone.
    pub dangling: Vec<String>,
}

impl EventIndexReport {
    pub fn is_consistent(&self) -> bool {
        self.unindexed.is_empty() && self.dangling.is_empty()
    }
}

pub struct KvStore<C: KeyValueClient> {
    session_identifier: String,
    task_identifier: String,
    serialization_format: SerializationFormat,
    page_size: usize,
    client: Option<C>,
    finalized: bool,
}

impl<C: KeyValueClient> KvStore<C> {
    /// Missing identifiers are generated. Only task storage is supported.
    pub fn new(
        storage_type: StorageType,
        session_identifier: Option<&str>,
        task_identifier: Option<&str>,
    ) -> StorageResult<Self> {
        if storage_type != StorageType::Task {
            return Err(StorageError::UnsupportedStorageType(format!(
                "key-value store only supports task storage, not {}",
                storage_type
            )));
        }
        let session_identifier = match session_identifier {
            Some(identifier) => {
                validate_namespace_component("session", identifier)?;
                identifier.to_string()
            }
            None => new_namespace_identifier(),
        };
        let task_identifier = match task_identifier {
            Some(identifier) => {
                validate_namespace_component("task", identifier)?;
                identifier.to_string()
            }
            None => new_namespace_identifier(),
        };
        Ok(Self {
            session_identifier,
            task_identifier,
            serialization_format: SerializationFormat::Json,
            page_size: DEFAULT_PAGE_SIZE,
            client: None,
            finalized: false,
        })
    }

    pub fn for_task(task: &Task) -> StorageResult<Self> {
        Self::new(
            StorageType::Task,
            Some(&task.session_identifier),
            Some(&task.identifier),
        )
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn session_identifier(&self) -> &str {
        &self.session_identifier
    }

    pub fn task_identifier(&self) -> &str {
        &self.task_identifier
    }

    pub fn client(&self) -> Option<&C> {
        self.client.as_ref()
    }

    fn generate_key(&self, subkey: &str) -> String {
        format!(
            "{}{}",
            task_key_prefix(&self.session_identifier, &self.task_identifier),
            subkey
        )
    }

    fn readable_client(&self) -> StorageResult<&C> {
        self.client
            .as_ref()
            .ok_or_else(|| StorageError::NotReadable(self.task_identifier.clone()))
    }

    fn connected_client(&self) -> StorageResult<&C> {
        self.client
            .as_ref()
            .ok_or_else(|| StorageError::NotWritable(self.task_identifier.clone()))
    }

    // Container writes are refused once the task is finalized.
    fn writable_client(&self) -> StorageResult<&C> {
        let client = self.connected_client()?;
        if self.finalized {
            return Err(StorageError::NotWritable(format!(
                "task store {} is finalized",
                self.task_identifier
            )));
        }
        Ok(client)
    }

    fn expected_metadata(&self) -> StoreMetadata {
        StoreMetadata::current(StorageType::Task, self.serialization_format)
    }

    fn write_storage_metadata(&self, client: &C) -> StorageResult<()> {
        let fields = self.expected_metadata().to_fields();
        let fields: Vec<(&str, &[u8])> = fields
            .iter()
            .map(|(name, value)| (*name, value.as_bytes()))
            .collect();
        client.hset_multiple(&self.generate_key(METADATA_KEY_NAME), &fields)
    }

    fn check_storage_metadata(&self, client: &C) -> StorageResult<()> {
        let metadata_key = self.generate_key(METADATA_KEY_NAME);
        let stored = StoreMetadata::from_fields(|field| {
            client
                .hget(&metadata_key, field)?
                .map(|bytes| {
                    String::from_utf8(bytes).map_err(|_| {
                        StorageError::IncompatibleFormat(format!(
                            "metadata field '{}' is not UTF-8",
                            field
                        ))
                    })
                })
                .transpose()
        })?;
        self.expected_metadata().check_compatible(&stored)
    }

    fn decode<T: AttributeContainer>(&self, field: &str, data: &[u8]) -> StorageResult<T> {
        let mut container: T = self.serialization_format.deserialize(data)?;
        container.set_identifier(field.parse()?);
        Ok(container)
    }

    /// Cross-checks the event hash against the sorted event index.
    pub fn verify_event_index(&self) -> StorageResult<EventIndexReport> {
        let client = self.readable_client()?;
        let events_key = self.generate_key(CONTAINER_TYPE_EVENT);
        let index_key = self.generate_key(EVENT_INDEX_NAME);

        let mut indexed = BTreeSet::new();
        let mut report = EventIndexReport::default();
        let mut cursor: Option<ScoredMember> = None;
        loop {
            let page = client.zscan(&index_key, cursor.as_ref(), self.page_size)?;
            for entry in &page {
                if client.hget(&events_key, &entry.member)?.is_none() {
                    report.dangling.push(entry.member.clone());
                }
                indexed.insert(entry.member.clone());
            }
            if page.len() < self.page_size {
                break;
            }
            cursor = page.last().cloned();
        }
        report.number_of_index_entries = indexed.len() as u64;

        let mut after: Option<String> = None;
        loop {
            let page = client.hscan(&events_key, after.as_deref(), self.page_size)?;
            for (field, _) in &page {
                report.number_of_events += 1;
                if !indexed.contains(field) {
                    report.unindexed.push(field.parse()?);
                }
            }
            if page.len() < self.page_size {
                break;
            }
            after = page.last().map(|(field, _)| field.clone());
        }
        Ok(report)
    }
}

impl<C: KeyValueClient> AttributeContainerStore for KvStore<C> {
    type Connection = C;

    fn storage_type(&self) -> StorageType {
        StorageType::Task
    }

    /// Writes the store metadata when the namespace is new, otherwise checks it.
    fn open(&mut self, client: C) -> StorageResult<()> {
        if self.client.is_some() {
            return Err(StorageError::AlreadyConnected(format!(
                "task store {} already has a client",
                self.task_identifier
            )));
        }

        let metadata_key = self.generate_key(METADATA_KEY_NAME);
        if client.exists(&metadata_key)? {
            self.check_storage_metadata(&client)?;
        } else {
            self.write_storage_metadata(&client)?;
        }
        // A claimed task sits in the merging set and stays read-only.
        let finalized = client.hget(&finalized_key(&self.session_identifier), &self.task_identifier)?;
        let merging = client.hget(&merging_key(&self.session_identifier), &self.task_identifier)?;

        self.finalized = finalized.as_deref() == Some(FINALIZED_MARKER) || merging.is_some();
        self.client = Some(client);
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        self.client = None;
        self.finalized = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    fn add_container<T: AttributeContainer>(
        &mut self,
        container: &mut T,
    ) -> StorageResult<Identifier> {
        let client = self.writable_client()?;
        let identifier = Identifier::new();
        let data = self.serialization_format.serialize(container)?;
        client.hset(
            &self.generate_key(T::CONTAINER_TYPE),
            identifier.as_str(),
            &data,
        )?;
        container.set_identifier(identifier.clone());
        Ok(identifier)
    }

    fn get_containers<T: AttributeContainer>(&self) -> StorageResult<ContainerIterator<'_, T>> {
        let client = self.readable_client()?;
        Ok(Box::new(HashContainers {
            store: self,
            client,
            key: self.generate_key(T::CONTAINER_TYPE),
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
            _marker: PhantomData,
        }))
    }

    fn get_container_by_identifier<T: AttributeContainer>(
        &self,
        identifier: &Identifier,
    ) -> StorageResult<Option<T>> {
        let client = self.readable_client()?;
        match client.hget(&self.generate_key(T::CONTAINER_TYPE), identifier.as_str())? {
            Some(data) => Ok(Some(self.decode(identifier.as_str(), &data)?)),
            None => Ok(None),
        }
    }

    fn count_containers(&self, container_type: &str) -> StorageResult<u64> {
        self.readable_client()?
            .hlen(&self.generate_key(container_type))
    }

    fn remove_container(
        &mut self,
        container_type: &str,
        identifier: &Identifier,
    ) -> StorageResult<()> {
        let client = self.writable_client()?;
        client.hdel(&self.generate_key(container_type), identifier.as_str())?;
        if container_type == CONTAINER_TYPE_EVENT {
            client.zrem(&self.generate_key(EVENT_INDEX_NAME), identifier.as_str())?;
        }
        Ok(())
    }

    // The container is stored before it is indexed; a failed index insert
    // leaves an unindexed event that verify_event_index reports.
    fn add_event(&mut self, event: &mut EventObject) -> StorageResult<Identifier> {
        let identifier = self.add_container(event)?;
        let client = self.writable_client()?;
        client.zadd(
            &self.generate_key(EVENT_INDEX_NAME),
            identifier.as_str(),
            event.timestamp,
        )?;
        Ok(identifier)
    }

    fn get_sorted_events(
        &self,
        time_range: Option<&TimeRange>,
    ) -> StorageResult<ContainerIterator<'_, EventObject>> {
        if time_range.is_some() {
            return Err(StorageError::UnsupportedOperation(
                "time range filtering of sorted events".to_string(),
            ));
        }
        let client = self.readable_client()?;
        Ok(Box::new(SortedEvents {
            store: self,
            client,
            index_key: self.generate_key(EVENT_INDEX_NAME),
            events_key: self.generate_key(CONTAINER_TYPE_EVENT),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn is_finalized(&self) -> StorageResult<bool> {
        let client = self.readable_client()?;
        let value = client.hget(&finalized_key(&self.session_identifier), &self.task_identifier)?;
        Ok(value.as_deref() == Some(FINALIZED_MARKER))
    }

    /// Idempotent. Refused once a coordinator has claimed the task for merging,
    /// so a claimed task can never re-enter the finalized set.
    fn finalize(&mut self) -> StorageResult<()> {
        let client = self.connected_client()?;
        let written = client.hset_unless(
            &finalized_key(&self.session_identifier),
            &self.task_identifier,
            FINALIZED_MARKER,
            &merging_key(&self.session_identifier),
        )?;
        if !written {
            return Err(StorageError::InvalidState(format!(
                "task {} is already being merged",
                self.task_identifier
            )));
        }
        self.finalized = true;
        info!(
            session = %self.session_identifier,
            task = %self.task_identifier,
            "finalized task store"
        );
        Ok(())
    }

    fn remove(&mut self) -> StorageResult<()> {
        let client = self.connected_client()?;
        let prefix = task_key_prefix(&self.session_identifier, &self.task_identifier);
        let keys = client.keys_with_prefix(&prefix)?;
        for key in &keys {
            client.delete(key)?;
        }
        // Membership goes last: a crash mid-removal leaves the task visible
        // in the merging set instead of orphaning its keys.
        client.hdel(&finalized_key(&self.session_identifier), &self.task_identifier)?;
        client.hdel(&merging_key(&self.session_identifier), &self.task_identifier)?;
        self.finalized = false;
        info!(
            session = %self.session_identifier,
            task = %self.task_identifier,
            keys = keys.len(),
            "removed task store"
        );
        Ok(())
    }
}

struct HashContainers<'a, C: KeyValueClient, T> {
    store: &'a KvStore<C>,
    client: &'a C,
    key: String,
    after: Option<String>,
    buffer: VecDeque<(String, Vec<u8>)>,
    exhausted: bool,
    _marker: PhantomData<T>,
}

impl<C: KeyValueClient, T: AttributeContainer> Iterator for HashContainers<'_, C, T> {
    type Item = StorageResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self
                .client
                .hscan(&self.key, self.after.as_deref(), self.store.page_size)
            {
                Ok(page) => {
                    self.exhausted = page.len() < self.store.page_size;
                    self.after = page.last().map(|(field, _)| field.clone());
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        let (field, data) = self.buffer.pop_front()?;
        Some(self.store.decode(&field, &data))
    }
}

struct SortedEvents<'a, C: KeyValueClient> {
    store: &'a KvStore<C>,
    client: &'a C,
    index_key: String,
    events_key: String,
    cursor: Option<ScoredMember>,
    buffer: VecDeque<ScoredMember>,
    exhausted: bool,
}

impl<C: KeyValueClient> SortedEvents<'_, C> {
    fn fill(&mut self) -> StorageResult<()> {
        let page = self
            .client
            .zscan(&self.index_key, self.cursor.as_ref(), self.store.page_size)?;
        self.exhausted = page.len() < self.store.page_size;
        self.cursor = page.last().cloned();
        self.buffer.extend(page);
        Ok(())
    }
}

impl<C: KeyValueClient> Iterator for SortedEvents<'_, C> {
    type Item = StorageResult<EventObject>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.buffer.is_empty() {
                if self.exhausted {
                    return None;
                }
                if let Err(e) = self.fill() {
                    self.exhausted = true;
                    return Some(Err(e));
                }
                continue;
            }
            let entry = self.buffer.pop_front()?;
            match self.client.hget(&self.events_key, &entry.member) {
                Ok(Some(data)) => return Some(self.store.decode(&entry.member, &data)),
                Ok(None) => {
                    warn!(identifier = %entry.member, "sorted event index entry without event");
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Task identifiers in the session's finalized set.
///
/// A timeout or lost connection degrades to an empty set so polling loops can
/// simply scan again.
pub fn scan_for_processed_tasks<C: KeyValueClient>(
    client: &C,
    session_identifier: &str,
) -> StorageResult<BTreeSet<String>> {
    debug!(session = %session_identifier, "starting check for processed tasks");
    match client.hkeys(&finalized_key(session_identifier)) {
        Ok(task_identifiers) => {
            debug!(count = task_identifiers.len(), "found processed tasks");
            Ok(task_identifiers.into_iter().collect())
        }
        Err(e) if e.is_transient() => {
            warn!(session = %session_identifier, error = %e, "processed task scan failed, treating as empty");
            Ok(BTreeSet::new())
        }
        Err(e) => Err(e),
    }
}

/// Task identifiers currently claimed for merging.
pub fn scan_for_merging_tasks<C: KeyValueClient>(
    client: &C,
    session_identifier: &str,
) -> StorageResult<BTreeSet<String>> {
    Ok(client
        .hkeys(&merging_key(session_identifier))?
        .into_iter()
        .collect())
}

/// Claims a finalized task for merging: one atomic move from the finalized
/// set to the merging set. Fails with `InvalidState` when the task is not
/// finalized, including when another coordinator claimed it first.
pub fn mark_task_as_merging<C: KeyValueClient>(
    client: &C,
    task_identifier: &str,
    session_identifier: &str,
) -> StorageResult<()> {
    validate_namespace_component("session", session_identifier)?;
    validate_namespace_component("task", task_identifier)?;
    let moved = client.hmove(
        &finalized_key(session_identifier),
        &merging_key(session_identifier),
        task_identifier,
        MERGING_MARKER,
    )?;
    if !moved {
        return Err(StorageError::InvalidState(format!(
            "task {} was not finalized",
            task_identifier
        )));
    }
    debug!(session = %session_identifier, task = %task_identifier, "claimed task for merging");
    Ok(())
}

/// Operator recovery for a claim abandoned by a crashed coordinator: moves
/// the task back from the merging set to the finalized set.
pub fn reset_merging_task<C: KeyValueClient>(
    client: &C,
    task_identifier: &str,
    session_identifier: &str,
) -> StorageResult<()> {
    validate_namespace_component("session", session_identifier)?;
    validate_namespace_component("task", task_identifier)?;
    let moved = client.hmove(
        &merging_key(session_identifier),
        &finalized_key(session_identifier),
        task_identifier,
        FINALIZED_MARKER,
    )?;
    if !moved {
        return Err(StorageError::InvalidState(format!(
            "task {} is not being merged",
            task_identifier
        )));
    }
    warn!(session = %session_identifier, task = %task_identifier, "returned merging task to finalized set");
    Ok(())
}

/// Task identifiers that own at least one key in the session.
pub fn list_task_namespaces<C: KeyValueClient>(
    client: &C,
    session_identifier: &str,
) -> StorageResult<BTreeSet<String>> {
    let prefix = format!("{}-", session_identifier);
    let mut task_identifiers = BTreeSet::new();
    for key in client.keys_with_prefix(&prefix)? {
        // `{session}-finalized` and `{session}-merging` carry no task component.
        if let Some((task_identifier, _)) = key[prefix.len()..].split_once('-') {
            task_identifiers.insert(task_identifier.to_string());
        }
    }
    Ok(task_identifiers)
}
