//! Store configuration loaded from `evidence-store.toml`.
//!
//! Every section is optional; a missing file means defaults.

use crate::core::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "evidence-store.toml";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_STALE_TASK_AGE_SECS: u64 = 86_400;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub connection: ConnectionConfig,
    pub storage: StorageConfig,
    pub coordinator: CoordinatorConfig,
}

/// Shared key-value database every worker and coordinator connects to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("evidence-store.kv.db"),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Containers fetched per backend round-trip by lazy iterators.
    pub page_size: usize,
    pub task_storage_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            task_storage_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub poll_interval_ms: u64,
    pub stale_task_age_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            stale_task_age_secs: DEFAULT_STALE_TASK_AGE_SECS,
        }
    }
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_task_age(&self) -> Duration {
        Duration::from_secs(self.stale_task_age_secs)
    }
}

impl StoreConfig {
    pub fn from_toml_str(content: &str) -> StorageResult<Self> {
        let config: StoreConfig =
            toml::from_str(content).map_err(|e| StorageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> StorageResult<()> {
        if self.storage.page_size == 0 {
            return Err(StorageError::Config(
                "storage.page_size must be greater than zero".to_string(),
            ));
        }
        if self.connection.timeout_secs == 0 {
            return Err(StorageError::Config(
                "connection.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load the store config from `path`.
/// Accepts either the file itself or a directory holding `evidence-store.toml`.
pub fn load_store_config(path: &Path) -> StorageResult<StoreConfig> {
    let config_path = if path.is_dir() {
        path.join(CONFIG_FILE_NAME)
    } else {
        path.to_path_buf()
    };

    if !config_path.exists() {
        // No config = defaults (not an error)
        return Ok(StoreConfig::default());
    }

    let content = fs::read_to_string(&config_path).map_err(StorageError::IoError)?;
    StoreConfig::from_toml_str(&content)
}
