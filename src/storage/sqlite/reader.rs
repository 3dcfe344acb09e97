use crate::core::error::{StorageError, StorageResult};
use crate::core::session::Task;
use crate::storage::facade::{FacadeState, StorageReader, StorageWriter};
use crate::storage::interface::{AttributeContainerStore, StorageType};
use crate::storage::merge::{MergeSummary, merge_store_into};
use crate::storage::sqlite::store::SqliteStore;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct SqliteStorageReader {
    state: FacadeState,
    path: PathBuf,
    timeout: Duration,
    store: SqliteStore,
}

impl SqliteStorageReader {
    pub fn new(storage_type: StorageType, path: &Path, timeout: Duration) -> Self {
        Self {
            state: FacadeState::New,
            path: path.to_path_buf(),
            timeout,
            store: SqliteStore::new(storage_type),
        }
    }

    /// Folds the file of `task`, staged under `merge/`, into `writer`.
    pub fn merge_into<W: StorageWriter>(
        &self,
        task: &Task,
        writer: &mut W,
    ) -> StorageResult<MergeSummary> {
        merge_store_into(&task.identifier, self.store()?, writer)
    }
}

impl StorageReader for SqliteStorageReader {
    type Store = SqliteStore;

    fn open(&mut self) -> StorageResult<()> {
        self.state.check_can_open()?;
        if !self.path.is_file() {
            return Err(StorageError::NotReadable(format!(
                "storage file {} does not exist",
                self.path.display()
            )));
        }
        self.store.open_path(&self.path, self.timeout)?;
        self.state = FacadeState::Open;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        self.state.check_open()?;
        self.store.close()?;
        self.state = FacadeState::Closed;
        Ok(())
    }

    fn store(&self) -> StorageResult<&SqliteStore> {
        self.state.check_open()?;
        Ok(&self.store)
    }
}
