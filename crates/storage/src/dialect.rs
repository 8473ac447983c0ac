//! Database dialects
//!
//! The backend is classified once, when the store opens, into a closed set of
//! kinds. The kind decides the DDL for the `documents` table (the `path`
//! column must sort by byte order) and which regex operator, if any, backs
//! the property lookup.

use jsondb_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relational backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// PostgreSQL
    PostgreSql,
    /// SQLite
    Sqlite,
    /// H2
    H2,
    /// CockroachDB (reports itself as PostgreSQL)
    CockroachDb,
}

impl DatabaseKind {
    /// Classify a backend from its product name and version string.
    ///
    /// CockroachDB speaks the PostgreSQL protocol and reports the PostgreSQL
    /// product name; only its version string tells it apart.
    ///
    /// ```
    /// use jsondb_storage::DatabaseKind;
    ///
    /// assert_eq!(DatabaseKind::detect("SQLite", "3.45.1").unwrap(), DatabaseKind::Sqlite);
    /// assert_eq!(
    ///     DatabaseKind::detect("PostgreSQL", "CockroachDB CCL v23.1.0").unwrap(),
    ///     DatabaseKind::CockroachDb
    /// );
    /// ```
    pub fn detect(product_name: &str, version: &str) -> Result<Self> {
        match product_name.trim().to_ascii_lowercase().as_str() {
            "postgresql" if version.trim_start().starts_with("CockroachDB") => {
                Ok(DatabaseKind::CockroachDb)
            }
            "postgresql" => Ok(DatabaseKind::PostgreSql),
            "sqlite" => Ok(DatabaseKind::Sqlite),
            "h2" => Ok(DatabaseKind::H2),
            _ => Err(Error::UnsupportedDatabase(format!(
                "{} {}",
                product_name, version
            ))),
        }
    }

    /// `CREATE TABLE` statement for the documents table.
    pub fn create_table_sql(self, table: &str) -> String {
        match self {
            DatabaseKind::PostgreSql | DatabaseKind::CockroachDb => format!(
                "CREATE TABLE IF NOT EXISTS {table} \
                 (path VARCHAR COLLATE \"C\" PRIMARY KEY, value VARCHAR, kind INTEGER NOT NULL)"
            ),
            DatabaseKind::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {table} \
                 (path TEXT COLLATE BINARY PRIMARY KEY, value TEXT, kind INTEGER NOT NULL) \
                 WITHOUT ROWID"
            ),
            DatabaseKind::H2 => format!(
                "CREATE TABLE IF NOT EXISTS {table} \
                 (path VARCHAR PRIMARY KEY, value VARCHAR, kind INTEGER NOT NULL)"
            ),
        }
    }

    /// Regex operator usable in a `WHERE` clause, if the backend has one.
    pub fn regex(self) -> Option<RegexDialect> {
        match self {
            DatabaseKind::PostgreSql => Some(RegexDialect::Tilde),
            DatabaseKind::H2 | DatabaseKind::Sqlite => Some(RegexDialect::Regexp),
            DatabaseKind::CockroachDb => None,
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatabaseKind::PostgreSql => "PostgreSQL",
            DatabaseKind::Sqlite => "SQLite",
            DatabaseKind::H2 => "H2",
            DatabaseKind::CockroachDb => "CockroachDB",
        };
        f.write_str(name)
    }
}

/// SQL spelling of "column matches regex"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexDialect {
    /// `column ~ pattern`
    Tilde,
    /// `column REGEXP pattern`
    Regexp,
}

impl RegexDialect {
    /// Predicate matching `column` against the next bound parameter.
    pub fn predicate(self, column: &str) -> String {
        match self {
            RegexDialect::Tilde => format!("{column} ~ ?"),
            RegexDialect::Regexp => format!("{column} REGEXP ?"),
        }
    }
}
