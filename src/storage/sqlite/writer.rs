//! File-backed writers.
//!
//! A session writer owns the session file. With a task storage directory it
//! also hands out per-task files and moves them through the merge stages:
//!
//! ```text
//! {dir}/{task}.sqlite -> {dir}/processed/{task}.sqlite -> {dir}/merge/{task}.sqlite -> deleted
//! ```

use crate::core::error::{StorageError, StorageResult};
use crate::core::session::{Session, Task};
use crate::storage::facade::{FacadeState, StorageWriter};
use crate::storage::interface::{AttributeContainerStore, StorageType};
use crate::storage::sqlite::store::SqliteStore;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const PROCESSED_DIRECTORY: &str = "processed";
pub const MERGE_DIRECTORY: &str = "merge";
const STORAGE_FILE_EXTENSION: &str = "sqlite";
const SQLITE_SIDE_FILE_SUFFIXES: &[&str] = &["-wal", "-shm"];

pub fn task_storage_file(directory: &Path, task_identifier: &str) -> PathBuf {
    directory.join(format!("{}.{}", task_identifier, STORAGE_FILE_EXTENSION))
}

pub fn processed_task_storage_file(directory: &Path, task_identifier: &str) -> PathBuf {
    task_storage_file(&directory.join(PROCESSED_DIRECTORY), task_identifier)
}

pub fn merge_task_storage_file(directory: &Path, task_identifier: &str) -> PathBuf {
    task_storage_file(&directory.join(MERGE_DIRECTORY), task_identifier)
}

/// Task identifiers whose files sit in `processed/`, waiting to be merged.
pub fn scan_processed_task_storage(directory: &Path) -> StorageResult<BTreeSet<String>> {
    let processed = directory.join(PROCESSED_DIRECTORY);
    let mut task_identifiers = BTreeSet::new();
    if !processed.is_dir() {
        return Ok(task_identifiers);
    }
    for entry in fs::read_dir(&processed)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(STORAGE_FILE_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            task_identifiers.insert(stem.to_string());
        }
    }
    Ok(task_identifiers)
}

fn side_file(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn move_storage_file(source: &Path, destination: &Path) -> StorageResult<()> {
    if !source.exists() {
        return Err(StorageError::InvalidState(format!(
            "task storage file {} does not exist",
            source.display()
        )));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(source, destination)?;
    for suffix in SQLITE_SIDE_FILE_SUFFIXES {
        let side = side_file(source, suffix);
        if side.exists() {
            fs::rename(&side, side_file(destination, suffix))?;
        }
    }
    debug!(from = %source.display(), to = %destination.display(), "moved task storage file");
    Ok(())
}

pub struct SqliteStorageWriter {
    state: FacadeState,
    path: PathBuf,
    timeout: Duration,
    task: Option<Task>,
    task_storage_path: Option<PathBuf>,
    store: SqliteStore,
}

impl SqliteStorageWriter {
    pub fn for_session(path: &Path, timeout: Duration) -> Self {
        Self {
            state: FacadeState::New,
            path: path.to_path_buf(),
            timeout,
            task: None,
            task_storage_path: None,
            store: SqliteStore::new(StorageType::Session),
        }
    }

    pub fn for_task(task: &Task, path: &Path, timeout: Duration) -> Self {
        Self {
            state: FacadeState::New,
            path: path.to_path_buf(),
            timeout,
            task: Some(task.clone()),
            task_storage_path: None,
            store: SqliteStore::new(StorageType::Task),
        }
    }

    pub fn with_task_storage_path(mut self, directory: &Path) -> Self {
        self.task_storage_path = Some(directory.to_path_buf());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn require_storage_type(&self, storage_type: StorageType, operation: &str) -> StorageResult<()> {
        if self.store.storage_type() != storage_type {
            return Err(StorageError::UnsupportedStorageType(format!(
                "{} requires {} storage, writer holds {} storage",
                operation,
                storage_type,
                self.store.storage_type()
            )));
        }
        Ok(())
    }

    fn task_storage_directory(&self, operation: &str) -> StorageResult<&Path> {
        self.state.check_open()?;
        self.require_storage_type(StorageType::Session, operation)?;
        self.task_storage_path.as_deref().ok_or_else(|| {
            StorageError::UnsupportedStorageType(format!(
                "{} requires a task storage path",
                operation
            ))
        })
    }
}

impl StorageWriter for SqliteStorageWriter {
    type Store = SqliteStore;
    type TaskWriter = SqliteStorageWriter;

    fn storage_type(&self) -> StorageType {
        self.store.storage_type()
    }

    fn open(&mut self) -> StorageResult<()> {
        self.state.check_can_open()?;
        self.store.open_path(&self.path, self.timeout)?;
        self.state = FacadeState::Open;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        self.state.check_open()?;
        let finalized = match self.store.storage_type() {
            StorageType::Task => self.store.finalize(),
            StorageType::Session => Ok(()),
        };
        self.store.close()?;
        self.state = FacadeState::Closed;
        finalized
    }

    fn store(&self) -> StorageResult<&SqliteStore> {
        self.state.check_open()?;
        Ok(&self.store)
    }

    fn store_mut(&mut self) -> StorageResult<&mut SqliteStore> {
        self.state.check_open()?;
        Ok(&mut self.store)
    }

    fn write_session_start(&mut self, session: &Session) -> StorageResult<()> {
        self.state.check_open()?;
        self.require_storage_type(StorageType::Session, "writing a session start")?;
        self.store
            .write_session_start(&mut session.create_session_start())
    }

    fn write_session_completion(
        &mut self,
        session: &mut Session,
        aborted: bool,
    ) -> StorageResult<()> {
        self.state.check_open()?;
        self.require_storage_type(StorageType::Session, "writing a session completion")?;
        self.store
            .write_session_completion(&mut session.create_session_completion(aborted))
    }

    fn write_task_start(&mut self) -> StorageResult<()> {
        self.state.check_open()?;
        self.require_storage_type(StorageType::Task, "writing a task start")?;
        let task = self
            .task
            .as_ref()
            .ok_or_else(|| StorageError::InvalidState("task writer has no task".to_string()))?;
        self.store.write_task_start(&mut task.create_task_start())
    }

    fn write_task_completion(&mut self, aborted: bool) -> StorageResult<()> {
        self.state.check_open()?;
        self.require_storage_type(StorageType::Task, "writing a task completion")?;
        let mut task_completion = self
            .task
            .as_mut()
            .ok_or_else(|| StorageError::InvalidState("task writer has no task".to_string()))?
            .create_task_completion(aborted);
        self.store.write_task_completion(&mut task_completion)
    }

    fn create_task_storage(&mut self, task: &Task) -> StorageResult<SqliteStorageWriter> {
        let directory = self.task_storage_directory("creating task storage")?;
        fs::create_dir_all(directory)?;
        let path = task_storage_file(directory, &task.identifier);
        Ok(SqliteStorageWriter::for_task(task, &path, self.timeout))
    }

    fn finalize_task_storage(&mut self, task: &Task) -> StorageResult<()> {
        let directory = self.task_storage_directory("finalizing task storage")?;
        move_storage_file(
            &task_storage_file(directory, &task.identifier),
            &processed_task_storage_file(directory, &task.identifier),
        )
    }

    fn prepare_merge_task_storage(&mut self, task: &Task) -> StorageResult<()> {
        let directory = self.task_storage_directory("preparing task storage for merge")?;
        move_storage_file(
            &processed_task_storage_file(directory, &task.identifier),
            &merge_task_storage_file(directory, &task.identifier),
        )
    }

    fn remove_processed_task_storage(&mut self, task: &Task) -> StorageResult<()> {
        let directory = self.task_storage_directory("removing processed task storage")?;
        let path = merge_task_storage_file(directory, &task.identifier);
        if !path.exists() {
            return Err(StorageError::InvalidState(format!(
                "task storage file {} is not staged for merge",
                path.display()
            )));
        }
        fs::remove_file(&path)?;
        for suffix in SQLITE_SIDE_FILE_SUFFIXES {
            let side = side_file(&path, suffix);
            if side.exists() {
                fs::remove_file(side)?;
            }
        }
        debug!(path = %path.display(), "removed merged task storage file");
        Ok(())
    }

    fn begin_task_merge(&mut self, task_identifier: &str) -> StorageResult<bool> {
        self.state.check_open()?;
        self.require_storage_type(StorageType::Session, "merging a task")?;
        self.store.begin_task_merge(task_identifier)
    }

    fn commit_task_merge(&mut self, task_identifier: &str) -> StorageResult<()> {
        self.state.check_open()?;
        self.store.commit_task_merge(task_identifier)
    }

    fn abort_task_merge(&mut self) -> StorageResult<()> {
        self.state.check_open()?;
        self.store.abort_task_merge()
    }
}
