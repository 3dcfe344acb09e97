//! Attribute container storage: the store interface, the reader/writer
//! facades, both backends, merging and the task lifecycle.

pub mod facade;
pub mod interface;
pub mod kv;
pub mod lifecycle;
pub mod merge;
pub mod sqlite;

pub use facade::{FacadeState, StorageReader, StorageWriter};
pub use interface::{
    AttributeContainerStore, ContainerIterator, DEFAULT_PAGE_SIZE, FORMAT_VERSION, StorageType,
    StoreMetadata,
};
pub use lifecycle::{MergedTask, TaskCoordinator, TaskState};
pub use merge::{MergeSummary, merge_store_into};
