//! Attribute container store in a single SQLite file.
//!
//! Containers of every type share one table keyed by identifier; events are
//! also entered in `event_index` inside the same transaction, so the index
//! never disagrees with the stored events.
//!
//! A session file can take in a task merge as one unit: everything written
//! between `begin_task_merge` and `commit_task_merge` lands in one savepoint
//! together with a `merged_task:{task}` metadata row, and a task already
//! recorded there is never merged again.

use crate::core::containers::{AttributeContainer, CONTAINER_TYPE_EVENT, EventObject};
use crate::core::db;
use crate::core::error::{StorageError, StorageResult};
use crate::core::identifiers::Identifier;
use crate::core::schemas;
use crate::core::serializer::SerializationFormat;
use crate::core::time::{TimeRange, now_micros};
use crate::storage::interface::{
    AttributeContainerStore, ContainerIterator, DEFAULT_PAGE_SIZE, StorageType, StoreMetadata,
};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const FINALIZED_METADATA_KEY: &str = "finalized";
const MERGED_TASK_KEY_PREFIX: &str = "merged_task:";
const TASK_MERGE_SAVEPOINT: &str = "task_merge";

fn merged_task_key(task_identifier: &str) -> String {
    format!("{}{}", MERGED_TASK_KEY_PREFIX, task_identifier)
}

pub struct SqliteStore {
    storage_type: StorageType,
    serialization_format: SerializationFormat,
    page_size: usize,
    conn: Option<Connection>,
    finalized: bool,
    merge_in_progress: bool,
}

impl SqliteStore {
    pub fn new(storage_type: StorageType) -> Self {
        Self {
            storage_type,
            serialization_format: SerializationFormat::Json,
            page_size: DEFAULT_PAGE_SIZE,
            conn: None,
            finalized: false,
            merge_in_progress: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn open_path(&mut self, path: &Path, timeout: Duration) -> StorageResult<()> {
        let conn = db::db_connect(path, timeout)?;
        self.open(conn)
    }

    pub fn has_merged_task(&self, task_identifier: &str) -> StorageResult<bool> {
        let conn = self.readable_connection()?;
        Ok(Self::metadata_value(conn, &merged_task_key(task_identifier))?.is_some())
    }

    /// Returns false, without opening a savepoint, when the task was merged
    /// before.
    pub fn begin_task_merge(&mut self, task_identifier: &str) -> StorageResult<bool> {
        if self.merge_in_progress {
            return Err(StorageError::InvalidState(
                "another task merge is in progress".to_string(),
            ));
        }
        let conn = self.writable_connection()?;
        if Self::metadata_value(conn, &merged_task_key(task_identifier))?.is_some() {
            return Ok(false);
        }
        conn.execute_batch(&format!("SAVEPOINT {}", TASK_MERGE_SAVEPOINT))?;
        self.merge_in_progress = true;
        Ok(true)
    }

    pub fn commit_task_merge(&mut self, task_identifier: &str) -> StorageResult<()> {
        self.check_merge_in_progress()?;
        let conn = self.writable_connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata(key, value) VALUES(?1, ?2)",
            params![merged_task_key(task_identifier), now_micros().to_string()],
        )?;
        conn.execute_batch(&format!("RELEASE {}", TASK_MERGE_SAVEPOINT))?;
        self.merge_in_progress = false;
        Ok(())
    }

    pub fn abort_task_merge(&mut self) -> StorageResult<()> {
        self.check_merge_in_progress()?;
        let conn = self.connected()?;
        conn.execute_batch(&format!(
            "ROLLBACK TO {savepoint}; RELEASE {savepoint}",
            savepoint = TASK_MERGE_SAVEPOINT
        ))?;
        self.merge_in_progress = false;
        Ok(())
    }

    fn check_merge_in_progress(&self) -> StorageResult<()> {
        if !self.merge_in_progress {
            return Err(StorageError::InvalidState(
                "no task merge in progress".to_string(),
            ));
        }
        Ok(())
    }

    fn readable_connection(&self) -> StorageResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| StorageError::NotReadable("storage file not open".to_string()))
    }

    fn connected(&mut self) -> StorageResult<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| StorageError::NotWritable("storage file not open".to_string()))
    }

    fn writable_connection(&mut self) -> StorageResult<&mut Connection> {
        if self.conn.is_some() && self.finalized {
            return Err(StorageError::NotWritable(
                "storage file is finalized".to_string(),
            ));
        }
        self.connected()
    }

    fn metadata_value(conn: &Connection, key: &str) -> StorageResult<Option<String>> {
        Ok(conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn check_or_write_metadata(&self, conn: &Connection) -> StorageResult<()> {
        let expected = StoreMetadata::current(self.storage_type, self.serialization_format);
        if Self::metadata_value(conn, StoreMetadata::FIELD_FORMAT_VERSION)?.is_none() {
            for (key, value) in expected.to_fields() {
                conn.execute(
                    "INSERT OR IGNORE INTO metadata(key, value) VALUES(?1, ?2)",
                    params![key, value],
                )?;
            }
            return Ok(());
        }
        let stored = StoreMetadata::from_fields(|field| Self::metadata_value(conn, field))?;
        expected.check_compatible(&stored)
    }

    fn insert_container(
        conn: &Connection,
        container_type: &str,
        identifier: &Identifier,
        data: &[u8],
    ) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO attribute_containers(container_type, identifier, data) VALUES(?1, ?2, ?3)",
            params![container_type, identifier.as_str(), data],
        )?;
        Ok(())
    }

    fn decode<T: AttributeContainer>(&self, identifier: &str, data: &[u8]) -> StorageResult<T> {
        let mut container: T = self.serialization_format.deserialize(data)?;
        container.set_identifier(identifier.parse()?);
        Ok(container)
    }
}

impl AttributeContainerStore for SqliteStore {
    type Connection = Connection;

    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    fn open(&mut self, conn: Connection) -> StorageResult<()> {
        if self.conn.is_some() {
            return Err(StorageError::AlreadyConnected(
                "storage file already open".to_string(),
            ));
        }
        db::apply_schemas(&conn, schemas::STORE_DB_SCHEMAS)?;
        self.check_or_write_metadata(&conn)?;
        self.finalized = Self::metadata_value(&conn, FINALIZED_METADATA_KEY)?.is_some();
        self.conn = Some(conn);
        Ok(())
    }

    // An unfinished task merge is rolled back when the connection closes.
    fn close(&mut self) -> StorageResult<()> {
        self.finalized = false;
        self.merge_in_progress = false;
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| StorageError::from(e))?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn add_container<T: AttributeContainer>(
        &mut self,
        container: &mut T,
    ) -> StorageResult<Identifier> {
        let data = self.serialization_format.serialize(container)?;
        let conn = self.writable_connection()?;
        let identifier = Identifier::new();
        Self::insert_container(conn, T::CONTAINER_TYPE, &identifier, &data)?;
        container.set_identifier(identifier.clone());
        Ok(identifier)
    }

    fn get_containers<T: AttributeContainer>(&self) -> StorageResult<ContainerIterator<'_, T>> {
        let conn = self.readable_connection()?;
        Ok(Box::new(RowContainers {
            store: self,
            conn,
            after_row: 0,
            buffer: VecDeque::new(),
            exhausted: false,
            _marker: PhantomData,
        }))
    }

    fn get_container_by_identifier<T: AttributeContainer>(
        &self,
        identifier: &Identifier,
    ) -> StorageResult<Option<T>> {
        let conn = self.readable_connection()?;
        let data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM attribute_containers WHERE container_type = ?1 AND identifier = ?2",
                params![T::CONTAINER_TYPE, identifier.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|data| self.decode(identifier.as_str(), &data))
            .transpose()
    }

    fn count_containers(&self, container_type: &str) -> StorageResult<u64> {
        let count: i64 = self.readable_connection()?.query_row(
            "SELECT COUNT(*) FROM attribute_containers WHERE container_type = ?1",
            params![container_type],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn remove_container(
        &mut self,
        container_type: &str,
        identifier: &Identifier,
    ) -> StorageResult<()> {
        let conn = self.writable_connection()?;
        let tx = conn.savepoint()?;
        let removed = tx.execute(
            "DELETE FROM attribute_containers WHERE container_type = ?1 AND identifier = ?2",
            params![container_type, identifier.as_str()],
        )?;
        if removed > 0 && container_type == CONTAINER_TYPE_EVENT {
            tx.execute(
                "DELETE FROM event_index WHERE identifier = ?1",
                params![identifier.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn add_event(&mut self, event: &mut EventObject) -> StorageResult<Identifier> {
        let data = self.serialization_format.serialize(event)?;
        let conn = self.writable_connection()?;
        let identifier = Identifier::new();
        let tx = conn.savepoint()?;
        Self::insert_container(&tx, CONTAINER_TYPE_EVENT, &identifier, &data)?;
        tx.execute(
            "INSERT INTO event_index(identifier, timestamp) VALUES(?1, ?2)",
            params![identifier.as_str(), event.timestamp],
        )?;
        tx.commit()?;
        event.set_identifier(identifier.clone());
        Ok(identifier)
    }

    fn get_sorted_events(
        &self,
        time_range: Option<&TimeRange>,
    ) -> StorageResult<ContainerIterator<'_, EventObject>> {
        let conn = self.readable_connection()?;
        if time_range.is_some_and(|range| range.is_empty()) {
            return Ok(Box::new(std::iter::empty::<StorageResult<EventObject>>()));
        }
        Ok(Box::new(SortedEvents {
            store: self,
            conn,
            start: time_range.map(|range| range.start),
            end: time_range.map(|range| range.end),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn is_finalized(&self) -> StorageResult<bool> {
        let conn = self.readable_connection()?;
        Ok(Self::metadata_value(conn, FINALIZED_METADATA_KEY)?.is_some())
    }

    fn finalize(&mut self) -> StorageResult<()> {
        let conn = self.connected()?;
        conn.execute(
            "INSERT OR IGNORE INTO metadata(key, value) VALUES(?1, 'true')",
            params![FINALIZED_METADATA_KEY],
        )?;
        self.finalized = true;
        info!(storage_type = %self.storage_type, "finalized storage file");
        Ok(())
    }

    fn remove(&mut self) -> StorageResult<()> {
        let conn = self.connected()?;
        let tx = conn.savepoint()?;
        tx.execute("DELETE FROM event_index", [])?;
        let containers = tx.execute("DELETE FROM attribute_containers", [])?;
        tx.execute("DELETE FROM metadata", [])?;
        tx.commit()?;
        self.finalized = false;
        info!(containers, "removed storage file contents");
        Ok(())
    }
}

struct RowContainers<'a, T> {
    store: &'a SqliteStore,
    conn: &'a Connection,
    after_row: i64,
    buffer: VecDeque<(String, Vec<u8>)>,
    exhausted: bool,
    _marker: PhantomData<T>,
}

impl<T: AttributeContainer> RowContainers<'_, T> {
    fn fill(&mut self) -> StorageResult<()> {
        let mut stmt = self.conn.prepare(
            "SELECT row_id, identifier, data FROM attribute_containers
             WHERE container_type = ?1 AND row_id > ?2
             ORDER BY row_id LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![T::CONTAINER_TYPE, self.after_row, self.store.page_size as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            },
        )?;
        let mut fetched = 0;
        for row in rows {
            let (row_id, identifier, data) = row?;
            self.after_row = row_id;
            self.buffer.push_back((identifier, data));
            fetched += 1;
        }
        self.exhausted = fetched < self.store.page_size;
        Ok(())
    }
}

impl<T: AttributeContainer> Iterator for RowContainers<'_, T> {
    type Item = StorageResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let (identifier, data) = self.buffer.pop_front()?;
        Some(self.store.decode(&identifier, &data))
    }
}

struct SortedEvents<'a> {
    store: &'a SqliteStore,
    conn: &'a Connection,
    start: Option<i64>,
    end: Option<i64>,
    cursor: Option<(i64, String)>,
    buffer: VecDeque<(String, Vec<u8>)>,
    exhausted: bool,
}

impl SortedEvents<'_> {
    fn fill(&mut self) -> StorageResult<()> {
        let (after_timestamp, after_identifier) = match &self.cursor {
            Some((timestamp, identifier)) => (Some(*timestamp), Some(identifier.clone())),
            None => (None, None),
        };
        let mut stmt = self.conn.prepare(
            "SELECT e.timestamp, e.identifier, c.data
             FROM event_index e
             JOIN attribute_containers c ON c.identifier = e.identifier
             WHERE (?1 IS NULL OR e.timestamp >= ?1)
               AND (?2 IS NULL OR e.timestamp < ?2)
               AND (?3 IS NULL OR e.timestamp > ?3 OR (e.timestamp = ?3 AND e.identifier > ?4))
             ORDER BY e.timestamp, e.identifier LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            params![
                self.start,
                self.end,
                after_timestamp,
                after_identifier,
                self.store.page_size as i64
            ],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            },
        )?;
        let mut fetched = 0;
        for row in rows {
            let (timestamp, identifier, data) = row?;
            self.cursor = Some((timestamp, identifier.clone()));
            self.buffer.push_back((identifier, data));
            fetched += 1;
        }
        self.exhausted = fetched < self.store.page_size;
        Ok(())
    }
}

impl Iterator for SortedEvents<'_> {
    type Item = StorageResult<EventObject>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let (identifier, data) = self.buffer.pop_front()?;
        Some(self.store.decode(&identifier, &data))
    }
}
