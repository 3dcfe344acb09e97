//! Backend-agnostic reader and writer surfaces used by the pipeline.
//!
//! Each facade owns one store and forwards to it. `open` and `close` are
//! called once each, in that order; any accessor outside that window fails
//! with `NotOpen`.

use crate::core::containers::{
    AnalysisReport, AttributeContainer, EventData, EventObject, EventSource, EventTag,
    ExtractionWarning,
};
use crate::core::error::{StorageError, StorageResult};
use crate::core::identifiers::Identifier;
use crate::core::session::{Session, Task};
use crate::core::time::TimeRange;
use crate::storage::interface::{AttributeContainerStore, ContainerIterator, StorageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacadeState {
    #[default]
    New,
    Open,
    Closed,
}

impl FacadeState {
    /// Fails unless the facade has never been opened.
    pub fn check_can_open(&self) -> StorageResult<()> {
        match self {
            FacadeState::New => Ok(()),
            FacadeState::Open => Err(StorageError::AlreadyOpen(
                "storage is already open".to_string(),
            )),
            FacadeState::Closed => Err(StorageError::InvalidState(
                "storage was closed and cannot be reopened".to_string(),
            )),
        }
    }

    pub fn check_open(&self) -> StorageResult<()> {
        match self {
            FacadeState::Open => Ok(()),
            FacadeState::New => Err(StorageError::NotOpen("storage not opened".to_string())),
            FacadeState::Closed => Err(StorageError::NotOpen("storage already closed".to_string())),
        }
    }
}

pub trait StorageReader {
    type Store: AttributeContainerStore;

    fn open(&mut self) -> StorageResult<()>;

    fn close(&mut self) -> StorageResult<()>;

    /// The underlying store; `NotOpen` outside the open window.
    fn store(&self) -> StorageResult<&Self::Store>;

    fn get_containers<T: AttributeContainer>(&self) -> StorageResult<ContainerIterator<'_, T>> {
        self.store()?.get_containers()
    }

    fn get_container_by_identifier<T: AttributeContainer>(
        &self,
        identifier: &Identifier,
    ) -> StorageResult<Option<T>> {
        self.store()?.get_container_by_identifier(identifier)
    }

    fn count_containers(&self, container_type: &str) -> StorageResult<u64> {
        self.store()?.count_containers(container_type)
    }

    fn has_containers(&self, container_type: &str) -> StorageResult<bool> {
        self.store()?.has_containers(container_type)
    }

    fn get_sorted_events(
        &self,
        time_range: Option<&TimeRange>,
    ) -> StorageResult<ContainerIterator<'_, EventObject>> {
        self.store()?.get_sorted_events(time_range)
    }

    fn get_number_of_analysis_reports(&self) -> StorageResult<u64> {
        self.store()?.get_number_of_analysis_reports()
    }
}

pub trait StorageWriter {
    type Store: AttributeContainerStore;
    /// Writer handed out by `create_task_storage`.
    type TaskWriter;

    fn storage_type(&self) -> StorageType;

    fn open(&mut self) -> StorageResult<()>;

    /// Closing is the commit point: a task writer finalizes its store.
    fn close(&mut self) -> StorageResult<()>;

    fn store(&self) -> StorageResult<&Self::Store>;

    fn store_mut(&mut self) -> StorageResult<&mut Self::Store>;

    fn write_session_start(&mut self, session: &Session) -> StorageResult<()>;

    fn write_session_completion(&mut self, session: &mut Session, aborted: bool)
    -> StorageResult<()>;

    fn write_task_start(&mut self) -> StorageResult<()>;

    fn write_task_completion(&mut self, aborted: bool) -> StorageResult<()>;

    fn create_task_storage(&mut self, task: &Task) -> StorageResult<Self::TaskWriter>;

    fn finalize_task_storage(&mut self, task: &Task) -> StorageResult<()>;

    fn prepare_merge_task_storage(&mut self, task: &Task) -> StorageResult<()>;

    fn remove_processed_task_storage(&mut self, task: &Task) -> StorageResult<()>;

    /// Starts taking in one task as a single unit. Returns false when the
    /// task was merged into this writer before; nothing is started then.
    fn begin_task_merge(&mut self, task_identifier: &str) -> StorageResult<bool>;

    /// Records the task as merged and keeps everything written since
    /// `begin_task_merge`.
    fn commit_task_merge(&mut self, task_identifier: &str) -> StorageResult<()>;

    /// Drops everything written since `begin_task_merge`.
    fn abort_task_merge(&mut self) -> StorageResult<()>;

    fn add_event(&mut self, event: &mut EventObject) -> StorageResult<Identifier> {
        self.store_mut()?.add_event(event)
    }

    fn add_event_data(&mut self, event_data: &mut EventData) -> StorageResult<Identifier> {
        self.store_mut()?.add_event_data(event_data)
    }

    fn add_event_source(&mut self, event_source: &mut EventSource) -> StorageResult<Identifier> {
        self.store_mut()?.add_event_source(event_source)
    }

    fn add_event_tag(&mut self, event_tag: &mut EventTag) -> StorageResult<Identifier> {
        self.store_mut()?.add_event_tag(event_tag)
    }

    fn add_warning(&mut self, warning: &mut ExtractionWarning) -> StorageResult<Identifier> {
        self.store_mut()?.add_warning(warning)
    }

    fn add_analysis_report(&mut self, report: &mut AnalysisReport) -> StorageResult<Identifier> {
        self.store_mut()?.add_analysis_report(report)
    }

    fn remove_container(
        &mut self,
        container_type: &str,
        identifier: &Identifier,
    ) -> StorageResult<()> {
        self.store_mut()?.remove_container(container_type, identifier)
    }

    fn count_containers(&self, container_type: &str) -> StorageResult<u64> {
        self.store()?.count_containers(container_type)
    }

    fn get_number_of_analysis_reports(&self) -> StorageResult<u64> {
        self.store()?.get_number_of_analysis_reports()
    }
}
