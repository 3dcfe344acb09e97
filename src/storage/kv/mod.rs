//! Task storage on a shared hash + sorted-set key-value backend.

pub mod client;
pub mod memory;
pub mod merge_reader;
pub mod reader;
pub mod sqlite;
pub mod store;
pub mod writer;

pub use client::{KeyValueClient, ScoredMember};
pub use memory::{InjectedFault, KvOperation, MemoryClient};
pub use merge_reader::KvMergeReader;
pub use reader::KvStorageReader;
pub use sqlite::SqliteKvClient;
pub use store::{
    EventIndexReport, KvStore, finalized_key, list_task_namespaces, mark_task_as_merging,
    merging_key, reset_merging_task, scan_for_merging_tasks, scan_for_processed_tasks,
};
pub use writer::KvStorageWriter;
