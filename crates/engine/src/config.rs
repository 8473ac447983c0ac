//! Store configuration via `jsondb.toml`
//!
//! Every field has a default, so an empty file (or no file at all, through
//! [`StoreConfig::default`]) gives a working store.

use jsondb_core::error::{Error, Result};
use jsondb_storage::batch::DEFAULT_BATCH_THRESHOLD;
use jsondb_storage::dialect::DatabaseKind;
use jsondb_storage::pool::{PoolOptions, MEMORY_PATH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = "jsondb.toml";

/// Store configuration loaded from `jsondb.toml`.
///
/// # Example
///
/// ```toml
/// path = "data/jsondb.sqlite"
/// pool_size = 4
/// batch_threshold_bytes = 524288
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file, or `":memory:"`
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Number of pooled connections (in-memory databases always use one)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// How long to wait for a pooled connection, in milliseconds
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// How long SQLite retries a locked database, in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Use the WAL journal for file databases
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Buffered insert size that triggers a batch flush, in bytes
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold_bytes: usize,
    /// Create the documents table on open
    #[serde(default = "default_true")]
    pub create_tables: bool,
    /// Skip detection and treat the backend as this kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_kind: Option<DatabaseKind>,
}

fn default_path() -> PathBuf {
    PathBuf::from("jsondb.sqlite")
}

fn default_pool_size() -> usize {
    4
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_batch_threshold() -> usize {
    DEFAULT_BATCH_THRESHOLD
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            pool_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            wal_mode: true,
            batch_threshold_bytes: default_batch_threshold(),
            create_tables: true,
            database_kind: None,
        }
    }
}

impl StoreConfig {
    /// Config for a private in-memory database.
    pub fn in_memory() -> Self {
        Self::at(MEMORY_PATH)
    }

    /// Default config for a database file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# jsondb configuration
#
# Database file. Use ":memory:" for a throwaway in-memory database.
path = "jsondb.sqlite"

# Pooled connections (in-memory databases always use one)
pool_size = 4

# Milliseconds to wait for a free pooled connection
acquire_timeout_ms = 30000

# Milliseconds SQLite keeps retrying a locked database
busy_timeout_ms = 5000

# Write-ahead logging for file databases
wal_mode = true

# Buffered insert bytes (paths + values) before a batch is flushed (512 KiB)
batch_threshold_bytes = 524288

# Create the documents table when the store opens
create_tables = true

# Force a backend kind instead of detecting it:
# "sqlite", "postgresql", "cockroachdb" or "h2"
# database_kind = "sqlite"
"#
    }

    /// Read and parse config from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: StoreConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be at least 1".into()));
        }
        if self.batch_threshold_bytes == 0 {
            return Err(Error::Config(
                "batch_threshold_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            path: self.path.clone(),
            size: self.pool_size,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            wal_mode: self.wal_mode,
        }
    }
}
