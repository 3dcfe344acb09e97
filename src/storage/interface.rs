//! Backend-agnostic attribute container store interface.

use crate::core::containers::{
    AnalysisReport, AttributeContainer, CONTAINER_TYPE_ANALYSIS_REPORT, EventData, EventObject,
    EventSource, EventTag, ExtractionWarning, SessionCompletion, SessionStart, TaskCompletion,
    TaskStart,
};
use crate::core::error::{StorageError, StorageResult};
use crate::core::identifiers::Identifier;
use crate::core::serializer::SerializationFormat;
use crate::core::time::TimeRange;
use std::fmt;
use std::str::FromStr;

/// Bumped whenever the on-backend layout or encoding changes.
pub const FORMAT_VERSION: u32 = 20_260_301;

/// Containers fetched per backend round-trip by the lazy iterators.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Lazy, fallible sequence of containers. Each call to a getter starts a new pass.
pub type ContainerIterator<'a, T> = Box<dyn Iterator<Item = StorageResult<T>> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    /// Accumulation target for one whole session.
    Session,
    /// Output of one worker task.
    Task,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Session => "session",
            StorageType::Task => "task",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(StorageType::Session),
            "task" => Ok(StorageType::Task),
            other => Err(StorageError::IncompatibleFormat(format!(
                "unknown storage type: {}",
                other
            ))),
        }
    }
}

/// Written once per namespace on first open; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMetadata {
    pub format_version: u32,
    pub storage_type: StorageType,
    pub serialization_format: SerializationFormat,
}

impl StoreMetadata {
    pub const FIELD_FORMAT_VERSION: &'static str = "format_version";
    pub const FIELD_STORAGE_TYPE: &'static str = "storage_type";
    pub const FIELD_SERIALIZATION_FORMAT: &'static str = "serialization_format";

    pub fn current(storage_type: StorageType, serialization_format: SerializationFormat) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            storage_type,
            serialization_format,
        }
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (Self::FIELD_FORMAT_VERSION, self.format_version.to_string()),
            (Self::FIELD_STORAGE_TYPE, self.storage_type.to_string()),
            (
                Self::FIELD_SERIALIZATION_FORMAT,
                self.serialization_format.to_string(),
            ),
        ]
    }

    /// Rebuilds metadata from stored fields; `lookup` returns `None` for a missing field.
    pub fn from_fields<F>(mut lookup: F) -> StorageResult<Self>
    where
        F: FnMut(&str) -> StorageResult<Option<String>>,
    {
        let mut required = |field: &str| -> StorageResult<String> {
            lookup(field)?.ok_or_else(|| {
                StorageError::IncompatibleFormat(format!("metadata field '{}' missing", field))
            })
        };
        let format_version = required(Self::FIELD_FORMAT_VERSION)?;
        let format_version = format_version.parse::<u32>().map_err(|_| {
            StorageError::IncompatibleFormat(format!(
                "format version '{}' is not a number",
                format_version
            ))
        })?;
        Ok(Self {
            format_version,
            storage_type: required(Self::FIELD_STORAGE_TYPE)?.parse()?,
            serialization_format: required(Self::FIELD_SERIALIZATION_FORMAT)?.parse()?,
        })
    }

    /// Stored metadata is compatible when it names the same storage type and
    /// was not written by a newer format version.
    pub fn check_compatible(&self, stored: &StoreMetadata) -> StorageResult<()> {
        if stored.storage_type != self.storage_type {
            return Err(StorageError::IncompatibleFormat(format!(
                "storage type {} does not match expected {}",
                stored.storage_type, self.storage_type
            )));
        }
        if stored.format_version > self.format_version {
            return Err(StorageError::IncompatibleFormat(format!(
                "format version {} is newer than supported {}",
                stored.format_version, self.format_version
            )));
        }
        Ok(())
    }
}

/// Keyed, typed container persistence.
///
/// Writers take `&mut self`; readers borrow, and the lazy iterators they
/// return hold that borrow for as long as they are alive.
pub trait AttributeContainerStore {
    /// What `open` needs: connection parameters or an injected client.
    type Connection;

    fn storage_type(&self) -> StorageType;

    fn open(&mut self, connection: Self::Connection) -> StorageResult<()>;

    fn close(&mut self) -> StorageResult<()>;

    fn is_open(&self) -> bool;

    /// Stores `container` under a freshly allocated identifier and records
    /// that identifier on the container.
    fn add_container<T: AttributeContainer>(
        &mut self,
        container: &mut T,
    ) -> StorageResult<Identifier>;

    fn get_containers<T: AttributeContainer>(&self) -> StorageResult<ContainerIterator<'_, T>>;

    /// `Ok(None)` when no container of type `T` has that identifier.
    fn get_container_by_identifier<T: AttributeContainer>(
        &self,
        identifier: &Identifier,
    ) -> StorageResult<Option<T>>;

    fn count_containers(&self, container_type: &str) -> StorageResult<u64>;

    fn has_containers(&self, container_type: &str) -> StorageResult<bool> {
        Ok(self.count_containers(container_type)? > 0)
    }

    /// Removing an unknown identifier is not an error.
    fn remove_container(
        &mut self,
        container_type: &str,
        identifier: &Identifier,
    ) -> StorageResult<()>;

    /// Stores the event and enters it in the sorted event index.
    fn add_event(&mut self, event: &mut EventObject) -> StorageResult<Identifier>;

    /// Events in non-decreasing timestamp order. Backends that cannot filter
    /// by time fail with `UnsupportedOperation` when given a range.
    fn get_sorted_events(
        &self,
        time_range: Option<&TimeRange>,
    ) -> StorageResult<ContainerIterator<'_, EventObject>>;

    fn is_finalized(&self) -> StorageResult<bool>;

    fn finalize(&mut self) -> StorageResult<()>;

    /// Deletes everything the store holds. Callers only do this after a merge.
    fn remove(&mut self) -> StorageResult<()>;

    fn add_analysis_report(&mut self, report: &mut AnalysisReport) -> StorageResult<Identifier> {
        self.add_container(report)
    }

    fn add_event_data(&mut self, event_data: &mut EventData) -> StorageResult<Identifier> {
        self.add_container(event_data)
    }

    fn add_event_source(&mut self, event_source: &mut EventSource) -> StorageResult<Identifier> {
        self.add_container(event_source)
    }

    fn add_event_tag(&mut self, event_tag: &mut EventTag) -> StorageResult<Identifier> {
        self.add_container(event_tag)
    }

    fn add_warning(&mut self, warning: &mut ExtractionWarning) -> StorageResult<Identifier> {
        self.add_container(warning)
    }

    fn write_session_start(&mut self, session_start: &mut SessionStart) -> StorageResult<()> {
        self.add_container(session_start).map(|_| ())
    }

    fn write_session_completion(
        &mut self,
        session_completion: &mut SessionCompletion,
    ) -> StorageResult<()> {
        self.add_container(session_completion).map(|_| ())
    }

    fn write_task_start(&mut self, task_start: &mut TaskStart) -> StorageResult<()> {
        self.add_container(task_start).map(|_| ())
    }

    fn write_task_completion(&mut self, task_completion: &mut TaskCompletion) -> StorageResult<()> {
        self.add_container(task_completion).map(|_| ())
    }

    fn get_number_of_analysis_reports(&self) -> StorageResult<u64> {
        self.count_containers(CONTAINER_TYPE_ANALYSIS_REPORT)
    }
}
