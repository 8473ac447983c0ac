//! Batched record inserts
//!
//! [`BatchWriter`] is the sink the flattener writes into during a transaction.
//! Records accumulate until their combined `path` + `value` size exceeds the
//! threshold, then go to the database in one burst through a cached prepared
//! statement. [`BatchWriter::finish`] flushes the remainder.

use crate::rows::{clear_for_write, insert_records};
use jsondb_core::error::Result;
use jsondb_core::flatten::FieldSink;
use jsondb_core::path::JsonPath;
use jsondb_core::record::{JsonRecord, RecordSink};
use rusqlite::Connection;
use tracing::debug;

/// Default flush threshold: 512 KiB of buffered paths and values
pub const DEFAULT_BATCH_THRESHOLD: usize = 512 * 1024;

/// What a [`BatchWriter`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Records inserted
    pub records: usize,
    /// Flushes performed
    pub batches: usize,
    /// Fields cleared through [`FieldSink::begin_field`], in order
    pub fields: Vec<JsonPath>,
}

/// Buffers records and inserts them in threshold-sized batches
pub struct BatchWriter<'c> {
    conn: &'c Connection,
    threshold: usize,
    pending: Vec<JsonRecord>,
    pending_bytes: usize,
    summary: BatchSummary,
}

impl<'c> BatchWriter<'c> {
    /// Writer flushing once more than `threshold` bytes are buffered
    pub fn new(conn: &'c Connection, threshold: usize) -> Self {
        BatchWriter {
            conn,
            threshold,
            pending: Vec::new(),
            pending_bytes: 0,
            summary: BatchSummary::default(),
        }
    }

    /// Bytes currently buffered
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Insert everything buffered so far.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        insert_records(self.conn, &self.pending)?;
        debug!(
            target: "jsondb::batch",
            records = self.pending.len(),
            bytes = self.pending_bytes,
            "Flushed insert batch"
        );
        self.summary.records += self.pending.len();
        self.summary.batches += 1;
        self.pending.clear();
        self.pending_bytes = 0;
        Ok(())
    }

    /// Flush the remainder and report.
    pub fn finish(mut self) -> Result<BatchSummary> {
        self.flush()?;
        Ok(self.summary)
    }
}

impl RecordSink for BatchWriter<'_> {
    fn accept(&mut self, record: JsonRecord) -> Result<()> {
        self.pending_bytes += record.batch_size();
        self.pending.push(record);
        if self.pending_bytes > self.threshold {
            self.flush()?;
        }
        Ok(())
    }
}

impl FieldSink for BatchWriter<'_> {
    /// Clear the field's old value before its new records arrive.
    ///
    /// Buffered records are flushed first so that a field repeated in the same
    /// body replaces the earlier occurrence instead of colliding with it.
    fn begin_field(&mut self, path: &JsonPath) -> Result<()> {
        self.flush()?;
        clear_for_write(self.conn, path)?;
        self.summary.fields.push(path.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DatabaseKind;
    use crate::rows::count_subtree;
    use crate::schema::create_tables;
    use jsondb_core::flatten::{flatten_fields, flatten_slice};
    use jsondb_core::record::ValueKind;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn, DatabaseKind::Sqlite).unwrap();
        conn
    }

    #[test]
    fn test_small_documents_flush_once_on_finish() {
        let conn = setup();
        let mut batch = BatchWriter::new(&conn, DEFAULT_BATCH_THRESHOLD);
        flatten_slice(&JsonPath::parse("/d").unwrap(), br#"{"a":1,"b":[true,null]}"#, &mut batch)
            .unwrap();
        assert_eq!(count_subtree(&conn, &JsonPath::root()).unwrap(), 0);

        let summary = batch.finish().unwrap();
        assert_eq!(summary.records, 3);
        assert_eq!(summary.batches, 1);
        assert_eq!(count_subtree(&conn, &JsonPath::root()).unwrap(), 3);
    }

    #[test]
    fn test_threshold_triggers_intermediate_flushes() {
        let conn = setup();
        let mut batch = BatchWriter::new(&conn, 64);
        for i in 0..10 {
            batch
                .accept(JsonRecord::new(format!("/k{i}/"), "x".repeat(20), ValueKind::String))
                .unwrap();
            assert!(batch.pending_bytes() <= 64);
        }
        let summary = batch.finish().unwrap();
        assert_eq!(summary.records, 10);
        assert!(summary.batches > 1);
        assert_eq!(count_subtree(&conn, &JsonPath::root()).unwrap(), 10);
    }

    #[test]
    fn test_fields_replace_previous_values() {
        let conn = setup();
        let mut batch = BatchWriter::new(&conn, DEFAULT_BATCH_THRESHOLD);
        flatten_slice(
            &JsonPath::parse("/p").unwrap(),
            br#"{"x":{"deep":1},"y":2,"keep":3}"#,
            &mut batch,
        )
        .unwrap();
        batch.finish().unwrap();

        let mut batch = BatchWriter::new(&conn, DEFAULT_BATCH_THRESHOLD);
        flatten_fields(&JsonPath::parse("/p").unwrap(), br#"{"x":1,"y":{"z":2},"x":5}"#, &mut batch)
            .unwrap();
        let summary = batch.finish().unwrap();
        assert_eq!(summary.fields.len(), 3);
        assert_eq!(summary.fields[0].to_string(), "/p/x");

        let mut rows: Vec<(String, String)> = Vec::new();
        let mut stmt = conn
            .prepare("SELECT path, value FROM documents ORDER BY path")
            .unwrap();
        let mapped = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        for row in mapped {
            rows.push(row.unwrap());
        }
        assert_eq!(
            rows,
            vec![
                ("/p/keep/".to_string(), "3".to_string()),
                ("/p/x/".to_string(), "5".to_string()),
                ("/p/y/z/".to_string(), "2".to_string()),
            ]
        );
    }
}
