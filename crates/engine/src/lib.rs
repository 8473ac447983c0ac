//! Document store engine for jsondb
//!
//! This crate ties the lower layers together:
//! - DocumentStore: open, single-operation methods, multi-operation transactions
//! - DocumentTxn: the operations available inside one transaction
//! - StoreConfig: `jsondb.toml` loading and defaults
//! - ChangeBus: post-commit change notification
//! - TransactionCoordinator: transaction counters
//!
//! The engine is the only component that knows about:
//! - Transaction boundaries and rollback
//! - When change events may be published
//! - Push key generation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod keys;
pub mod store;
pub mod txn;

pub use bus::{BroadcastBus, ChangeBus, ChangeEvent, ChangeKind};
pub use config::{StoreConfig, CONFIG_FILE_NAME};
pub use coordinator::{ActiveTransaction, TransactionCoordinator, TransactionMetrics};
pub use keys::push_key;
pub use store::DocumentStore;
pub use txn::DocumentTxn;

pub use jsondb_core::{Error, GetOptions, JsonPath, Order, Result};
pub use jsondb_storage::{DatabaseKind, DEFAULT_BATCH_THRESHOLD};
