//! Table management and backend probing

use crate::dialect::DatabaseKind;
use jsondb_core::error::Result;
use rusqlite::Connection;
use tracing::info;

/// The single table holding every leaf record
pub const TABLE: &str = "documents";

/// Ask the connection what it is.
///
/// Only SQLite connections exist in this crate, so the probe reports the
/// SQLite product name together with `sqlite_version()`.
pub fn probe_kind(conn: &Connection) -> Result<DatabaseKind> {
    let version: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
    let kind = DatabaseKind::detect("SQLite", &version)?;
    info!(target: "jsondb::store", kind = %kind, version = %version, "Detected database");
    Ok(kind)
}

/// Create the documents table if it is missing.
pub fn create_tables(conn: &Connection, kind: DatabaseKind) -> Result<()> {
    conn.execute_batch(&kind.create_table_sql(TABLE))?;
    info!(target: "jsondb::store", table = TABLE, "Ensured documents table");
    Ok(())
}

/// Drop the documents table and everything in it.
pub fn drop_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {TABLE}"))?;
    info!(target: "jsondb::store", table = TABLE, "Dropped documents table");
    Ok(())
}
