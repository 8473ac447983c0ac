//! Core types for jsondb
//!
//! This crate holds everything that does not touch the database:
//! - Error: the single error type and `Result` alias
//! - Path codec: order-preserving array index encoding, key validation, `JsonPath`
//! - Records: `JsonRecord`, `ValueKind` and the `RecordSink` trait
//! - Options: `GetOptions` for reads
//! - Flattener: JSON body to path-ordered leaf records
//! - Reconstructor: path-ordered leaf records back to JSON text

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flatten;
pub mod options;
pub mod path;
pub mod reconstruct;
pub mod record;

pub use error::{Error, Result};
pub use flatten::{flatten_fields, flatten_reader, flatten_slice, FieldSink};
pub use options::{GetOptions, KeyRange, Order};
pub use path::{JsonPath, PathSegment, MAX_KEY_LENGTH};
pub use reconstruct::{write_records, write_with, Flow, RecordWriter};
pub use record::{JsonRecord, RecordSink, ValueKind};
