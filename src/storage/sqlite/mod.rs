//! Embedded SQLite file storage for sessions and file-backed tasks.

pub mod reader;
pub mod store;
pub mod writer;

pub use reader::SqliteStorageReader;
pub use store::SqliteStore;
pub use writer::{
    MERGE_DIRECTORY, PROCESSED_DIRECTORY, SqliteStorageWriter, merge_task_storage_file,
    processed_task_storage_file, scan_processed_task_storage, task_storage_file,
};
