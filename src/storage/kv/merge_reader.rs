use crate::core::error::StorageResult;
use crate::core::session::Task;
use crate::storage::facade::StorageWriter;
use crate::storage::interface::AttributeContainerStore;
use crate::storage::kv::client::KeyValueClient;
use crate::storage::kv::store::KvStore;
use crate::storage::merge::{MergeSummary, merge_store_into};
use tracing::info;

/// Reads one claimed task store and folds it into a session writer.
///
/// The task store is removed once every container has been written, which
/// also drops the task from the merging set.
pub struct KvMergeReader<C: KeyValueClient> {
    task: Task,
    store: KvStore<C>,
}

impl<C: KeyValueClient> KvMergeReader<C> {
    pub fn new(task: &Task, client: C) -> StorageResult<Self> {
        let mut store = KvStore::for_task(task)?;
        store.open(client)?;
        Ok(Self {
            task: task.clone(),
            store,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.store = self.store.with_page_size(page_size);
        self
    }

    pub fn merge_into<W: StorageWriter>(mut self, writer: &mut W) -> StorageResult<MergeSummary> {
        let summary = merge_store_into(&self.task.identifier, &self.store, writer)?;
        self.store.remove()?;
        self.store.close()?;
        info!(
            session = %self.task.session_identifier,
            task = %self.task.identifier,
            events = summary.events,
            containers = summary.total(),
            "merged task store"
        );
        Ok(summary)
    }
}
