use crate::core::error::{StorageError, StorageResult};
use crate::core::session::{Session, Task};
use crate::storage::facade::{FacadeState, StorageWriter};
use crate::storage::interface::{AttributeContainerStore, StorageType};
use crate::storage::kv::client::KeyValueClient;
use crate::storage::kv::store::KvStore;

/// Writer for one worker task. Session-level operations are not available
/// on the key-value backend.
pub struct KvStorageWriter<C: KeyValueClient> {
    state: FacadeState,
    task: Task,
    store: KvStore<C>,
    client: Option<C>,
}

impl<C: KeyValueClient> KvStorageWriter<C> {
    pub fn new(storage_type: StorageType, task: &Task, client: C) -> StorageResult<Self> {
        let store = KvStore::new(
            storage_type,
            Some(&task.session_identifier),
            Some(&task.identifier),
        )?;
        Ok(Self {
            state: FacadeState::New,
            task: task.clone(),
            store,
            client: Some(client),
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.store = self.store.with_page_size(page_size);
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    fn unsupported(operation: &str) -> StorageError {
        StorageError::UnsupportedStorageType(format!(
            "{} is not supported by key-value task storage",
            operation
        ))
    }
}

impl<C: KeyValueClient> StorageWriter for KvStorageWriter<C> {
    type Store = KvStore<C>;
    type TaskWriter = KvStorageWriter<C>;

    fn storage_type(&self) -> StorageType {
        StorageType::Task
    }

    fn open(&mut self) -> StorageResult<()> {
        self.state.check_can_open()?;
        let client = self
            .client
            .take()
            .ok_or_else(|| StorageError::NotWritable("writer has no client".to_string()))?;
        self.store.open(client)?;
        self.state = FacadeState::Open;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        self.state.check_open()?;
        let finalized = self.store.finalize();
        self.store.close()?;
        self.state = FacadeState::Closed;
        finalized
    }

    fn store(&self) -> StorageResult<&KvStore<C>> {
        self.state.check_open()?;
        Ok(&self.store)
    }

    fn store_mut(&mut self) -> StorageResult<&mut KvStore<C>> {
        self.state.check_open()?;
        Ok(&mut self.store)
    }

    fn write_session_start(&mut self, _session: &Session) -> StorageResult<()> {
        Err(Self::unsupported("writing a session start"))
    }

    fn write_session_completion(
        &mut self,
        _session: &mut Session,
        _aborted: bool,
    ) -> StorageResult<()> {
        Err(Self::unsupported("writing a session completion"))
    }

    fn write_task_start(&mut self) -> StorageResult<()> {
        self.state.check_open()?;
        let mut task_start = self.task.create_task_start();
        self.store.write_task_start(&mut task_start)
    }

    fn write_task_completion(&mut self, aborted: bool) -> StorageResult<()> {
        self.state.check_open()?;
        let mut task_completion = self.task.create_task_completion(aborted);
        self.store.write_task_completion(&mut task_completion)
    }

    fn create_task_storage(&mut self, _task: &Task) -> StorageResult<KvStorageWriter<C>> {
        Err(Self::unsupported("creating task storage"))
    }

    fn finalize_task_storage(&mut self, _task: &Task) -> StorageResult<()> {
        Err(Self::unsupported("finalizing task storage"))
    }

    // Claiming for merge happens in the shared key space, not here.
    fn prepare_merge_task_storage(&mut self, _task: &Task) -> StorageResult<()> {
        Ok(())
    }

    fn remove_processed_task_storage(&mut self, _task: &Task) -> StorageResult<()> {
        Err(Self::unsupported("removing processed task storage"))
    }

    fn begin_task_merge(&mut self, _task_identifier: &str) -> StorageResult<bool> {
        Err(Self::unsupported("merging into task storage"))
    }

    fn commit_task_merge(&mut self, _task_identifier: &str) -> StorageResult<()> {
        Err(Self::unsupported("merging into task storage"))
    }

    fn abort_task_merge(&mut self) -> StorageResult<()> {
        Err(Self::unsupported("merging into task storage"))
    }
}
