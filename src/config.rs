//! Configuration for data file sync

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::SyncError;

/// Directory under the base path that holds the raw data files
pub const DEFAULT_DATA_DIR: &str = "001shared/saw-rfid-project/raw_data/test";

/// Logical subfolder prefix carried by every synced record path
pub const DEFAULT_PREFIX: &str = "test/";

/// Database file used when nothing else is configured
pub const DEFAULT_DB_FILE: &str = "lab_data.db";

/// Database location relative to a shared drive base path
pub const SHARED_DB_PATH: &str = "001shared/saw-rfid-project/databases/main.db";

pub const ENV_RAW_DATA_BASE_PATH: &str = "RAW_DATA_BASE_PATH";
pub const ENV_SHARED_BASE_PATH: &str = "ONEDRIVE_BASE_PATH";
pub const ENV_DATABASE_PATH: &str = "MAIN_DATABASE_PATH";

/// Configuration for the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base path the data directory is resolved against
    pub base_path: PathBuf,

    /// Data directory relative to `base_path`
    pub data_dir: PathBuf,

    /// Prefix prepended to file names to form record paths, always ends in '/'
    pub prefix: String,

    /// SQLite database file
    pub db_path: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            prefix: DEFAULT_PREFIX.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_FILE),
        }
    }
}

impl SyncConfig {
    /// Create a config rooted at the given base path
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            ..Default::default()
        }
    }

    /// Create a config builder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// Load the config from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the config through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let shared = lookup(ENV_SHARED_BASE_PATH).filter(|v| !v.is_empty());

        if let Some(base) = lookup(ENV_RAW_DATA_BASE_PATH).filter(|v| !v.is_empty()) {
            config.base_path = PathBuf::from(base);
        } else if let Some(ref base) = shared {
            config.base_path = PathBuf::from(base);
        }

        if let Some(db) = lookup(ENV_DATABASE_PATH).filter(|v| !v.is_empty()) {
            config.db_path = PathBuf::from(db);
        } else if let Some(base) = shared {
            config.db_path = Path::new(&base).join(SHARED_DB_PATH);
        }

        config
    }

    /// Full path of the watched directory
    pub fn watched_root(&self) -> PathBuf {
        self.base_path.join(&self.data_dir)
    }

    /// Record path for a file name inside the watched directory
    pub fn relative_path_for(&self, file_name: &str) -> String {
        format!("{}{}", self.prefix, file_name)
    }

    /// Map a record path back to its location on disk
    ///
    /// Only paths carrying the prefix and staying inside the watched
    /// directory resolve.
    pub fn disk_path_for(&self, relative_path: &str) -> Result<PathBuf, SyncError> {
        let rest = relative_path.strip_prefix(&self.prefix).ok_or_else(|| {
            SyncError::invalid_input(format!(
                "{} is outside the watched folder {}",
                relative_path, self.prefix
            ))
        })?;

        let rest = Path::new(rest);
        let escapes = rest.as_os_str().is_empty()
            || rest
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(SyncError::invalid_input(format!(
                "Invalid relative path: {}",
                relative_path
            )));
        }

        Ok(self.watched_root().join(rest))
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config
    pub fn from_config(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn base_path(mut self, path: PathBuf) -> Self {
        self.config.base_path = path;
        self
    }

    pub fn data_dir(mut self, dir: PathBuf) -> Self {
        self.config.data_dir = dir;
        self
    }

    /// Set the logical prefix; a trailing '/' is added when missing
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.config.prefix = normalize_prefix(prefix);
        self
    }

    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = path;
        self
    }

    /// Build the config
    pub fn build(self) -> SyncConfig {
        self.config
    }
}
