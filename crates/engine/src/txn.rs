//! Document operations inside one database transaction
//!
//! A [`DocumentTxn`] wraps an open `BEGIN IMMEDIATE` transaction. Writes are
//! flattened straight into batched inserts; reads stream rows into the
//! reconstructor. Change events are buffered and only handed back when the
//! transaction commits.

use crate::bus::ChangeEvent;
use crate::keys::push_key;
use jsondb_core::error::{Error, Result};
use jsondb_core::flatten::{flatten_fields, flatten_reader, flatten_slice};
use jsondb_core::options::GetOptions;
use jsondb_core::path::{JsonPath, PathSegment};
use jsondb_core::reconstruct::write_with;
use jsondb_storage::batch::BatchWriter;
use jsondb_storage::dialect::DatabaseKind;
use jsondb_storage::rows;
use rusqlite::{Connection, Transaction};
use std::collections::BTreeSet;
use std::io::{Read, Write};

/// An open document transaction.
///
/// Obtained from [`DocumentStore::transaction`](crate::DocumentStore::transaction);
/// committed when the closure returns `Ok`, rolled back otherwise.
pub struct DocumentTxn<'c> {
    tx: Transaction<'c>,
    kind: DatabaseKind,
    batch_threshold: usize,
    events: Vec<ChangeEvent>,
}

impl<'c> DocumentTxn<'c> {
    pub(crate) fn new(tx: Transaction<'c>, kind: DatabaseKind, batch_threshold: usize) -> Self {
        DocumentTxn {
            tx,
            kind,
            batch_threshold,
            events: Vec::new(),
        }
    }

    /// Commit and hand back the buffered events.
    pub(crate) fn commit(self) -> Result<Vec<ChangeEvent>> {
        self.tx.commit()?;
        Ok(self.events)
    }

    /// Roll back, discarding the buffered events.
    pub(crate) fn rollback(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }

    /// Events buffered so far
    pub fn pending_events(&self) -> &[ChangeEvent] {
        &self.events
    }

    /// Replace the value at `path` with the JSON document `body`.
    pub fn set(&mut self, path: &str, body: impl AsRef<[u8]>) -> Result<()> {
        let path = JsonPath::parse(path)?;
        self.replace_subtree(&path, |base, batch| flatten_slice(base, body.as_ref(), batch))
    }

    /// Like [`set`](Self::set), reading the body from `reader`.
    pub fn set_reader<R: Read>(&mut self, path: &str, reader: R) -> Result<()> {
        let path = JsonPath::parse(path)?;
        self.replace_subtree(&path, |base, batch| flatten_reader(base, reader, batch))
    }

    /// Replace each top-level field of the JSON object `body` under `path`,
    /// leaving the other children of `path` alone.
    pub fn update(&mut self, path: &str, body: impl AsRef<[u8]>) -> Result<()> {
        let base = JsonPath::parse(path)?;
        let mut batch = BatchWriter::new(&self.tx, self.batch_threshold);
        flatten_fields(&base, body.as_ref(), &mut batch)?;
        let summary = batch.finish()?;
        self.events
            .extend(summary.fields.iter().map(ChangeEvent::updated));
        Ok(())
    }

    /// Remove the value at `path`. Returns whether anything was removed.
    pub fn delete(&mut self, path: &str) -> Result<bool> {
        let path = JsonPath::parse(path)?;
        let removed = rows::delete_subtree(&self.tx, &path)?;
        if removed > 0 {
            self.events.push(ChangeEvent::deleted(&path));
        }
        Ok(removed > 0)
    }

    /// Store `body` under a fresh child key of `path` and return the key.
    pub fn push(&mut self, path: &str, body: impl AsRef<[u8]>) -> Result<String> {
        let key = push_key();
        let target = JsonPath::parse(path)?.child(PathSegment::key(key.as_str())?);
        self.replace_subtree(&target, |base, batch| flatten_slice(base, body.as_ref(), batch))?;
        Ok(key)
    }

    /// Whether any value is stored at or below `path`.
    pub fn exists(&self, path: &str) -> Result<bool> {
        let path = JsonPath::parse(path)?;
        rows::subtree_exists(&self.tx, &path)
    }

    /// Stream the value at `path` as JSON into `writer`.
    ///
    /// Returns `false`, with nothing written, when no stored row matches.
    pub fn get_to_writer<W: Write>(&self, path: &str, options: &GetOptions, writer: W) -> Result<bool> {
        read_to_writer(&self.tx, path, options, writer)
    }

    /// The value at `path` as a JSON string, or `None` when nothing matches.
    pub fn get_as_string(&self, path: &str, options: &GetOptions) -> Result<Option<String>> {
        read_to_string(&self.tx, path, options)
    }

    /// Paths of the members of `collection` whose `property` is stored as `value`.
    pub fn fetch_ids_by_property_value(
        &self,
        collection: &str,
        property: &str,
        value: &str,
    ) -> Result<BTreeSet<String>> {
        fetch_ids(&self.tx, self.kind, collection, property, value)
    }

    fn replace_subtree<F>(&mut self, path: &JsonPath, flatten: F) -> Result<()>
    where
        F: FnOnce(&JsonPath, &mut BatchWriter<'_>) -> Result<()>,
    {
        rows::clear_for_write(&self.tx, path)?;
        let mut batch = BatchWriter::new(&self.tx, self.batch_threshold);
        flatten(path, &mut batch)?;
        batch.finish()?;
        self.events.push(ChangeEvent::updated(path));
        Ok(())
    }
}

pub(crate) fn read_to_writer<W: Write>(
    conn: &Connection,
    path: &str,
    options: &GetOptions,
    writer: W,
) -> Result<bool> {
    let base = JsonPath::parse(path)?;
    let range = options.key_range(&base)?;
    write_with(&base, options, writer, |emit| {
        rows::scan_subtree(conn, &base, &range, emit).map(|_| ())
    })
}

pub(crate) fn read_to_string(
    conn: &Connection,
    path: &str,
    options: &GetOptions,
) -> Result<Option<String>> {
    let mut out = Vec::new();
    if !read_to_writer(conn, path, options, &mut out)? {
        return Ok(None);
    }
    String::from_utf8(out)
        .map(Some)
        .map_err(|e| Error::Corruption(format!("Reconstructed JSON is not UTF-8: {}", e)))
}

pub(crate) fn fetch_ids(
    conn: &Connection,
    kind: DatabaseKind,
    collection: &str,
    property: &str,
    value: &str,
) -> Result<BTreeSet<String>> {
    let dialect = kind.regex().ok_or_else(|| {
        Error::Unsupported(format!("Property lookup needs regular expressions, which {} lacks", kind))
    })?;
    let collection = JsonPath::parse(collection)?;
    let property = JsonPath::parse(property)?;
    rows::find_ids_by_property(conn, dialect, &collection, &property, value)
}
