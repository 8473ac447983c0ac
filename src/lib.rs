//! jsondb - JSON documents stored as path-flattened rows
//!
//! Every scalar leaf of a JSON document becomes one `(path, value, kind)` row
//! in a single relational table. Paths sort in document order, so any subtree
//! is a contiguous range scan that streams straight back into JSON.
//!
//! # Quick Start
//!
//! ```
//! use jsondb::{DocumentStore, GetOptions, StoreConfig};
//!
//! let store = DocumentStore::open(StoreConfig::in_memory())?;
//! store.set("/doc", r#"{"items": [10, null, 30]}"#)?;
//!
//! let json = store.get_as_string("/doc", &GetOptions::default())?;
//! assert_eq!(json.as_deref(), Some(r#"{"items":[10,null,30]}"#));
//! # Ok::<(), jsondb::Error>(())
//! ```
//!
//! # Architecture
//!
//! - `jsondb-core`: path codec, flattener, reconstructor, error type
//! - `jsondb-storage`: SQLite pool, dialects, row operations, batched inserts
//! - `jsondb-engine`: the [`DocumentStore`] facade, transactions, config, change bus

// Re-export the public API from jsondb-engine
pub use jsondb_engine::*;

/// Lower-level building blocks
pub use jsondb_core;
pub use jsondb_storage;
