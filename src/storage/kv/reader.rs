use crate::core::error::{StorageError, StorageResult};
use crate::core::session::Task;
use crate::storage::facade::{FacadeState, StorageReader};
use crate::storage::interface::AttributeContainerStore;
use crate::storage::kv::client::KeyValueClient;
use crate::storage::kv::store::KvStore;

pub struct KvStorageReader<C: KeyValueClient> {
    state: FacadeState,
    store: KvStore<C>,
    client: Option<C>,
}

impl<C: KeyValueClient> KvStorageReader<C> {
    pub fn new(task: &Task, client: C) -> StorageResult<Self> {
        Ok(Self {
            state: FacadeState::New,
            store: KvStore::for_task(task)?,
            client: Some(client),
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.store = self.store.with_page_size(page_size);
        self
    }
}

impl<C: KeyValueClient> StorageReader for KvStorageReader<C> {
    type Store = KvStore<C>;

    fn open(&mut self) -> StorageResult<()> {
        self.state.check_can_open()?;
        let client = self
            .client
            .take()
            .ok_or_else(|| StorageError::NotReadable("reader has no client".to_string()))?;
        self.store.open(client)?;
        self.state = FacadeState::Open;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        self.state.check_open()?;
        self.store.close()?;
        self.state = FacadeState::Closed;
        Ok(())
    }

    fn store(&self) -> StorageResult<&KvStore<C>> {
        self.state.check_open()?;
        Ok(&self.store)
    }
}
