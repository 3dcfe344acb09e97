//! Timestamp helpers. Timestamps are microseconds since the Unix epoch.

use crate::core::error::{StorageError, StorageResult};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

pub fn duration_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// Half-open interval `[start, end)` of event timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> StorageResult<Self> {
        if end < start {
            return Err(StorageError::InvalidState(format!(
                "time range end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}
