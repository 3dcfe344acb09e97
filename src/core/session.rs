//! Session and task bookkeeping objects.
//!
//! Neither is persisted directly; both mint the start/completion marker
//! containers that the writers store.

use crate::core::containers::{SessionCompletion, SessionStart, TaskCompletion, TaskStart};
use crate::core::error::StorageResult;
use crate::core::identifiers::{new_namespace_identifier, validate_namespace_component};
use crate::core::time::now_micros;
use serde::{Deserialize, Serialize};

pub const PRODUCT_NAME: &str = env!("CARGO_PKG_NAME");
pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub identifier: String,
    pub start_time: i64,
    pub completion_time: Option<i64>,
    pub aborted: bool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            identifier: new_namespace_identifier(),
            start_time: now_micros(),
            completion_time: None,
            aborted: false,
        }
    }

    pub fn with_identifier(identifier: &str) -> StorageResult<Self> {
        validate_namespace_component("session", identifier)?;
        Ok(Self {
            identifier: identifier.to_string(),
            ..Self::new()
        })
    }

    pub fn create_session_start(&self) -> SessionStart {
        SessionStart {
            identifier: None,
            session_identifier: self.identifier.clone(),
            timestamp: self.start_time,
            product_name: PRODUCT_NAME.to_string(),
            product_version: PRODUCT_VERSION.to_string(),
        }
    }

    pub fn create_session_completion(&mut self, aborted: bool) -> SessionCompletion {
        let completion_time = now_micros();
        self.completion_time = Some(completion_time);
        self.aborted = aborted;
        SessionCompletion {
            identifier: None,
            session_identifier: self.identifier.clone(),
            timestamp: completion_time,
            aborted,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit of worker output, scoped to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub identifier: String,
    pub session_identifier: String,
    pub start_time: i64,
    pub completion_time: Option<i64>,
    pub aborted: bool,
}

impl Task {
    pub fn new(session_identifier: &str) -> StorageResult<Self> {
        validate_namespace_component("session", session_identifier)?;
        Ok(Self {
            identifier: new_namespace_identifier(),
            session_identifier: session_identifier.to_string(),
            start_time: now_micros(),
            completion_time: None,
            aborted: false,
        })
    }

    /// Rebuilds a handle for a task another process created, e.g. one found by a scan.
    pub fn with_identifier(session_identifier: &str, identifier: &str) -> StorageResult<Self> {
        validate_namespace_component("task", identifier)?;
        let mut task = Self::new(session_identifier)?;
        task.identifier = identifier.to_string();
        Ok(task)
    }

    pub fn create_task_start(&self) -> TaskStart {
        TaskStart {
            identifier: None,
            task_identifier: self.identifier.clone(),
            session_identifier: self.session_identifier.clone(),
            timestamp: self.start_time,
        }
    }

    pub fn create_task_completion(&mut self, aborted: bool) -> TaskCompletion {
        let completion_time = now_micros();
        self.completion_time = Some(completion_time);
        self.aborted = aborted;
        TaskCompletion {
            identifier: None,
            task_identifier: self.identifier.clone(),
            session_identifier: self.session_identifier.clone(),
            timestamp: completion_time,
            aborted,
        }
    }
}
