//! Task lifecycle as seen from the coordinator.
//!
//! ```text
//! unfinalized --finalize--> finalized --claim--> merging --merge+remove--> removed
//!                                 ^                  |
//!                                 +------reset-------+   (operator recovery)
//! ```
//!
//! Every transition that touches the shared finalized/merging sets is a
//! single atomic client call, so any number of coordinators may poll the
//! same session.

use crate::core::config::CoordinatorConfig;
use crate::core::containers::TaskStart;
use crate::core::error::{StorageError, StorageResult};
use crate::core::identifiers::validate_namespace_component;
use crate::core::session::Task;
use crate::core::time::{duration_micros, now_micros};
use crate::storage::facade::StorageWriter;
use crate::storage::interface::{AttributeContainerStore, DEFAULT_PAGE_SIZE};
use crate::storage::kv::client::KeyValueClient;
use crate::storage::kv::merge_reader::KvMergeReader;
use crate::storage::kv::store::{
    KvStore, finalized_key, list_task_namespaces, mark_task_as_merging, merging_key,
    reset_merging_task, scan_for_merging_tasks, scan_for_processed_tasks, task_key_prefix,
};
use crate::storage::merge::MergeSummary;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Unfinalized,
    Finalized,
    Merging,
    /// No trace of the task is left, or it never existed.
    Removed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Unfinalized => "unfinalized",
            TaskState::Finalized => "finalized",
            TaskState::Merging => "merging",
            TaskState::Removed => "removed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedTask {
    pub task_identifier: String,
    pub summary: MergeSummary,
}

pub struct TaskCoordinator<C: KeyValueClient> {
    client: C,
    session_identifier: String,
    poll_interval: Duration,
    stale_task_age: Duration,
    page_size: usize,
}

impl<C: KeyValueClient> TaskCoordinator<C> {
    pub fn new(client: C, session_identifier: &str) -> StorageResult<Self> {
        validate_namespace_component("session", session_identifier)?;
        let defaults = CoordinatorConfig::default();
        Ok(Self {
            client,
            session_identifier: session_identifier.to_string(),
            poll_interval: defaults.poll_interval(),
            stale_task_age: defaults.stale_task_age(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_config(mut self, config: &CoordinatorConfig) -> Self {
        self.poll_interval = config.poll_interval();
        self.stale_task_age = config.stale_task_age();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn session_identifier(&self) -> &str {
        &self.session_identifier
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn scan_for_processed_tasks(&self) -> StorageResult<BTreeSet<String>> {
        scan_for_processed_tasks(&self.client, &self.session_identifier)
    }

    pub fn scan_for_merging_tasks(&self) -> StorageResult<BTreeSet<String>> {
        scan_for_merging_tasks(&self.client, &self.session_identifier)
    }

    /// Claims the first finalized task this coordinator wins. Tasks claimed
    /// by another coordinator between scan and claim are skipped.
    pub fn claim_next_task(&self) -> StorageResult<Option<Task>> {
        for task_identifier in self.scan_for_processed_tasks()? {
            match mark_task_as_merging(&self.client, &task_identifier, &self.session_identifier) {
                Ok(()) => {
                    return Task::with_identifier(&self.session_identifier, &task_identifier)
                        .map(Some);
                }
                Err(StorageError::InvalidState(_)) => {
                    debug!(task = %task_identifier, "task claimed elsewhere, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Merges a task this coordinator has claimed, then removes its storage.
    pub fn merge_task<W: StorageWriter>(
        &self,
        task: &Task,
        writer: &mut W,
    ) -> StorageResult<MergeSummary> {
        if self.task_state(&task.identifier)? != TaskState::Merging {
            return Err(StorageError::InvalidState(format!(
                "task {} has not been claimed for merging",
                task.identifier
            )));
        }
        KvMergeReader::new(task, &self.client)?
            .with_page_size(self.page_size)
            .merge_into(writer)
    }

    /// Claims and merges finalized tasks until `max_idle_polls` consecutive
    /// scans find nothing, sleeping the poll interval between idle scans.
    pub fn merge_pending_tasks<W: StorageWriter>(
        &self,
        writer: &mut W,
        max_idle_polls: usize,
    ) -> StorageResult<Vec<MergedTask>> {
        let mut merged = Vec::new();
        let mut idle_polls = 0;
        while idle_polls < max_idle_polls {
            match self.claim_next_task()? {
                Some(task) => {
                    idle_polls = 0;
                    let summary = self.merge_task(&task, writer)?;
                    merged.push(MergedTask {
                        task_identifier: task.identifier,
                        summary,
                    });
                }
                None => {
                    idle_polls += 1;
                    if idle_polls < max_idle_polls {
                        thread::sleep(self.poll_interval);
                    }
                }
            }
        }
        info!(
            session = %self.session_identifier,
            tasks = merged.len(),
            "finished merging pending tasks"
        );
        Ok(merged)
    }

    // Finalized is checked before merging: a claim moving the task between
    // the two reads is then seen as merging rather than missed.
    pub fn task_state(&self, task_identifier: &str) -> StorageResult<TaskState> {
        validate_namespace_component("task", task_identifier)?;
        if self
            .client
            .hget(&finalized_key(&self.session_identifier), task_identifier)?
            .is_some()
        {
            return Ok(TaskState::Finalized);
        }
        if self
            .client
            .hget(&merging_key(&self.session_identifier), task_identifier)?
            .is_some()
        {
            return Ok(TaskState::Merging);
        }
        let prefix = task_key_prefix(&self.session_identifier, task_identifier);
        if self.client.keys_with_prefix(&prefix)?.is_empty() {
            Ok(TaskState::Removed)
        } else {
            Ok(TaskState::Unfinalized)
        }
    }

    /// Every task identifier with a trace in the session, with its state.
    pub fn task_states(&self) -> StorageResult<Vec<(String, TaskState)>> {
        let mut task_identifiers = list_task_namespaces(&self.client, &self.session_identifier)?;
        task_identifiers.extend(self.client.hkeys(&finalized_key(&self.session_identifier))?);
        task_identifiers.extend(self.scan_for_merging_tasks()?);
        task_identifiers
            .into_iter()
            .map(|task_identifier| -> StorageResult<(String, TaskState)> {
                let state = self.task_state(&task_identifier)?;
                Ok((task_identifier, state))
            })
            .collect()
    }

    /// Returns a task stuck in merging, e.g. after a coordinator crash, to
    /// the finalized set. Only safe once the claiming coordinator is gone.
    pub fn reset_merging_task(&self, task_identifier: &str) -> StorageResult<()> {
        reset_merging_task(&self.client, task_identifier, &self.session_identifier)
    }

    pub fn sweep_stale_tasks(&self) -> StorageResult<Vec<String>> {
        let cutoff = now_micros() - duration_micros(self.stale_task_age);
        self.sweep_tasks_started_before(cutoff)
    }

    /// Removes unfinalized task namespaces whose task start is older than
    /// `cutoff` (µs). Namespaces without a task start are left alone.
    pub fn sweep_tasks_started_before(&self, cutoff: i64) -> StorageResult<Vec<String>> {
        let mut removed = Vec::new();
        for task_identifier in list_task_namespaces(&self.client, &self.session_identifier)? {
            if self.task_state(&task_identifier)? != TaskState::Unfinalized {
                continue;
            }
            let task = Task::with_identifier(&self.session_identifier, &task_identifier)?;
            let mut store: KvStore<&C> = KvStore::for_task(&task)?;
            if let Err(e) = store.open(&self.client) {
                warn!(task = %task_identifier, error = %e, "skipping unreadable task namespace");
                continue;
            }
            let started = store
                .get_containers::<TaskStart>()?
                .next()
                .transpose()?
                .map(|task_start| task_start.timestamp);
            match started {
                Some(timestamp) if timestamp < cutoff => {
                    store.remove()?;
                    warn!(
                        session = %self.session_identifier,
                        task = %task_identifier,
                        started = timestamp,
                        "swept stale unfinalized task"
                    );
                    removed.push(task_identifier);
                }
                _ => {}
            }
            store.close()?;
        }
        Ok(removed)
    }
}
