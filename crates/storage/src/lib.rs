//! Storage layer for jsondb
//!
//! This crate owns everything that talks SQL:
//! - ConnectionPool: fixed-size pool of configured SQLite connections
//! - DatabaseKind: backend classification, DDL and regex dialect
//! - Schema: creation and removal of the `documents` table
//! - Rows: subtree scans, existence checks, deletes and the regex property lookup
//! - BatchWriter: threshold-batched inserts fed by the flattener
//!
//! All row functions take a plain `&rusqlite::Connection`, so they run the
//! same inside or outside a transaction.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod dialect;
pub mod pool;
pub mod rows;
pub mod schema;

pub use batch::{BatchSummary, BatchWriter, DEFAULT_BATCH_THRESHOLD};
pub use dialect::{DatabaseKind, RegexDialect};
pub use pool::{ConnectionPool, PoolOptions, PooledConnection, MEMORY_PATH};
pub use schema::TABLE;
