//! The document store facade
//!
//! [`DocumentStore`] owns the connection pool, the detected [`DatabaseKind`]
//! and an optional [`ChangeBus`]. Each single-operation method runs in its
//! own transaction; [`DocumentStore::transaction`] groups several operations
//! into one.
//!
//! ## Transaction lifecycle
//!
//! 1. Acquire a pooled connection
//! 2. `BEGIN IMMEDIATE` so that the write lock is taken up front
//! 3. Run the caller's operations against a [`DocumentTxn`]
//! 4. Commit on `Ok`, roll back on `Err`
//! 5. Publish the buffered change events, only after a successful commit

use crate::bus::{ChangeBus, ChangeEvent};
use crate::config::StoreConfig;
use crate::coordinator::{TransactionCoordinator, TransactionMetrics};
use crate::txn::{self, DocumentTxn};
use jsondb_core::error::{Error, Result};
use jsondb_core::options::GetOptions;
use jsondb_core::path::JsonPath;
use jsondb_storage::dialect::DatabaseKind;
use jsondb_storage::pool::ConnectionPool;
use jsondb_storage::{rows, schema};
use rusqlite::TransactionBehavior;
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A JSON document store on a single relational table.
///
/// `DocumentStore` is `Send + Sync`; share it across threads behind an `Arc`.
///
/// # Example
///
/// ```
/// use jsondb_engine::{DocumentStore, GetOptions, StoreConfig};
///
/// let store = DocumentStore::open(StoreConfig::in_memory())?;
/// store.set("/users/ada", r#"{"name":"Ada","langs":["en","fr"]}"#)?;
///
/// let json = store.get_as_string("/users/ada/langs", &GetOptions::default())?;
/// assert_eq!(json.as_deref(), Some(r#"["en","fr"]"#));
/// # Ok::<(), jsondb_engine::Error>(())
/// ```
pub struct DocumentStore {
    pool: ConnectionPool,
    kind: DatabaseKind,
    config: StoreConfig,
    bus: Option<Arc<dyn ChangeBus>>,
    coordinator: TransactionCoordinator,
}

impl DocumentStore {
    /// Open a store: build the pool, classify the backend and, if configured,
    /// create the documents table.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let pool = ConnectionPool::open(&config.pool_options())?;

        let kind = {
            let conn = pool.acquire()?;
            let kind = match config.database_kind {
                Some(kind) => {
                    info!(target: "jsondb::store", kind = %kind, "Using configured database kind");
                    kind
                }
                None => schema::probe_kind(&conn)?,
            };
            if config.create_tables {
                schema::create_tables(&conn, kind)?;
            }
            kind
        };

        info!(
            target: "jsondb::store",
            path = %config.path.display(),
            pool_size = pool.size(),
            kind = %kind,
            "Document store opened"
        );

        Ok(DocumentStore {
            pool,
            kind,
            config,
            bus: None,
            coordinator: TransactionCoordinator::new(),
        })
    }

    /// Open a store configured by a `jsondb.toml` file.
    pub fn open_from_file(config_path: &Path) -> Result<Self> {
        Self::open(StoreConfig::load(config_path)?)
    }

    /// Publish committed changes to `bus`.
    pub fn with_bus(mut self, bus: Arc<dyn ChangeBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// The backend kind detected (or configured) at open
    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    /// The configuration the store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.coordinator.metrics()
    }

    /// Create the documents table if it is missing.
    pub fn create_tables(&self) -> Result<()> {
        let conn = self.pool.acquire()?;
        schema::create_tables(&conn, self.kind)
    }

    /// Drop the documents table and everything in it.
    pub fn drop_tables(&self) -> Result<()> {
        let conn = self.pool.acquire()?;
        schema::drop_tables(&conn)
    }

    /// Run `f` in one transaction.
    ///
    /// Commits when `f` returns `Ok` and rolls back when it returns `Err` or
    /// panics. Change events are published after the commit and never for a
    /// rolled-back transaction.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut DocumentTxn<'_>) -> Result<T>,
    {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let active = self.coordinator.begin();

        let mut doc_txn = DocumentTxn::new(tx, self.kind, self.config.batch_threshold_bytes);
        let value = match f(&mut doc_txn) {
            Ok(value) => value,
            Err(e) => {
                if let Err(rollback_err) = doc_txn.rollback() {
                    warn!(target: "jsondb::txn", error = %rollback_err, "Rollback failed");
                }
                active.abort();
                warn!(target: "jsondb::txn", error = %e, "Transaction rolled back");
                return Err(e);
            }
        };

        let events = match doc_txn.commit() {
            Ok(events) => events,
            Err(e) => {
                active.abort();
                warn!(target: "jsondb::txn", error = %e, "Commit failed");
                return Err(e);
            }
        };
        active.commit();
        debug!(target: "jsondb::txn", events = events.len(), "Transaction committed");

        self.publish(events);
        Ok(value)
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        if let Some(bus) = &self.bus {
            for event in events {
                bus.publish(event);
            }
        }
    }

    /// Replace the value at `path` with the JSON document `body`.
    pub fn set(&self, path: &str, body: impl AsRef<[u8]>) -> Result<()> {
        self.transaction(|txn| txn.set(path, body))
    }

    /// Replace the value at `path` with a JSON document read from `reader`.
    pub fn set_reader<R: Read>(&self, path: &str, reader: R) -> Result<()> {
        self.transaction(|txn| txn.set_reader(path, reader))
    }

    /// Replace the top-level fields of the JSON object `body` under `path`.
    pub fn update(&self, path: &str, body: impl AsRef<[u8]>) -> Result<()> {
        self.transaction(|txn| txn.update(path, body))
    }

    /// Remove the value at `path`. Returns whether anything was removed.
    pub fn delete(&self, path: &str) -> Result<bool> {
        self.transaction(|txn| txn.delete(path))
    }

    /// Store `body` under a fresh child key of `path` and return the key.
    pub fn push(&self, path: &str, body: impl AsRef<[u8]>) -> Result<String> {
        self.transaction(|txn| txn.push(path, body))
    }

    /// Whether any value is stored at or below `path`.
    pub fn exists(&self, path: &str) -> Result<bool> {
        let conn = self.pool.acquire()?;
        let path = JsonPath::parse(path)?;
        rows::subtree_exists(&conn, &path)
    }

    /// Stream the value at `path` as JSON into `writer`.
    ///
    /// Returns `false`, with nothing written, when no stored row matches.
    pub fn get_to_writer<W: Write>(&self, path: &str, options: &GetOptions, writer: W) -> Result<bool> {
        let conn = self.pool.acquire()?;
        txn::read_to_writer(&conn, path, options, writer)
    }

    /// The value at `path` as a JSON string, or `None` when nothing matches.
    pub fn get_as_string(&self, path: &str, options: &GetOptions) -> Result<Option<String>> {
        let conn = self.pool.acquire()?;
        txn::read_to_string(&conn, path, options)
    }

    /// The value at `path` parsed into a [`serde_json::Value`].
    ///
    /// Fails with [`Error::Format`] when `options` name a JSONP callback.
    pub fn get_as_value(&self, path: &str, options: &GetOptions) -> Result<Option<Value>> {
        if options.callback.is_some() {
            return Err(Error::Format(
                "JSONP output cannot be parsed as a JSON value".into(),
            ));
        }
        match self.get_as_string(path, options)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Paths of the members of `collection` whose `property` is stored as `value`.
    ///
    /// Members are children of `collection` whose key starts with `:`, and
    /// each is returned as its full path, e.g. `/pair/:id`. The stored text
    /// is compared whatever its kind. Fails with [`Error::Unsupported`] on
    /// backends without a regex operator.
    pub fn fetch_ids_by_property_value(
        &self,
        collection: &str,
        property: &str,
        value: &str,
    ) -> Result<BTreeSet<String>> {
        let conn = self.pool.acquire()?;
        txn::fetch_ids(&conn, self.kind, collection, property, value)
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("path", &self.pool.path())
            .field("kind", &self.kind)
            .field("pool_size", &self.pool.size())
            .field("has_bus", &self.bus.is_some())
            .finish()
    }
}
