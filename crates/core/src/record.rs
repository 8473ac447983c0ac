//! Leaf records
//!
//! A [`JsonRecord`] is one stored row: the full storage path of a scalar leaf,
//! its textual value and its [`ValueKind`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Kind of scalar held by a leaf record
///
/// The discriminant is the value persisted in the `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueKind {
    /// JSON string
    String = 1,
    /// JSON number, stored in its textual form
    Number = 2,
    /// `true`
    True = 3,
    /// `false`
    False = 4,
    /// `null` (stored with an empty value)
    Null = 5,
}

impl ValueKind {
    /// Column value for this kind
    pub fn code(self) -> i64 {
        self as u8 as i64
    }

    /// Decode a column value
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(ValueKind::String),
            2 => Ok(ValueKind::Number),
            3 => Ok(ValueKind::True),
            4 => Ok(ValueKind::False),
            5 => Ok(ValueKind::Null),
            other => Err(Error::Corruption(format!("unknown value kind {}", other))),
        }
    }

    /// Kind for a boolean value
    pub fn from_bool(value: bool) -> Self {
        if value {
            ValueKind::True
        } else {
            ValueKind::False
        }
    }
}

/// One stored leaf: `(path, value, kind)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRecord {
    /// Full storage path, always ending in `/`
    pub path: String,
    /// Stringified scalar; empty for null
    pub value: String,
    /// Scalar kind
    pub kind: ValueKind,
}

impl JsonRecord {
    /// Create a record
    pub fn new(path: impl Into<String>, value: impl Into<String>, kind: ValueKind) -> Self {
        JsonRecord {
            path: path.into(),
            value: value.into(),
            kind,
        }
    }

    /// Create a null record
    pub fn null(path: impl Into<String>) -> Self {
        JsonRecord::new(path, String::new(), ValueKind::Null)
    }

    /// Bytes this record contributes to an insert batch.
    pub fn batch_size(&self) -> usize {
        self.path.len() + self.value.len()
    }
}

/// Destination for records produced by the flattener.
pub trait RecordSink {
    /// Accept the next record in document order.
    fn accept(&mut self, record: JsonRecord) -> Result<()>;
}

impl RecordSink for Vec<JsonRecord> {
    fn accept(&mut self, record: JsonRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn accept(&mut self, record: JsonRecord) -> Result<()> {
        (**self).accept(record)
    }
}
