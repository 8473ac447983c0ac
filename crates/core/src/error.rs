//! Error types for jsondb
//!
//! Every layer (codec, flattener, reconstructor, storage, facade) reports
//! failures through the single [`Error`] enum defined here.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for jsondb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the document store
#[derive(Debug, Error)]
pub enum Error {
    /// A path segment contains a reserved character or is too long
    #[error("Invalid key: {reason}. Key: {key}")]
    InvalidKey {
        /// The offending key (possibly truncated for display)
        key: String,
        /// Why the key was rejected
        reason: &'static str,
    },

    /// The JSON body could not be parsed, had the wrong shape, or had trailing data
    #[error("Format error: {0}")]
    Format(String),

    /// The detected database does not support the requested operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The connection reported a database product we cannot classify
    #[error("Unsupported database: {0}")]
    UnsupportedDatabase(String),

    /// A stored row could not be decoded
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Failure reported by the relational backend
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// I/O error (output sinks, config files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No pooled connection became available in time
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(std::time::Duration),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build an [`Error::InvalidKey`], truncating very long keys for display.
    pub fn invalid_key(key: &str, reason: &'static str) -> Self {
        let key = if key.chars().count() > 64 {
            let mut short: String = key.chars().take(64).collect();
            short.push_str("...");
            short
        } else {
            key.to_string()
        };
        Error::InvalidKey { key, reason }
    }

    /// Whether this error came from rejecting caller input (as opposed to the backend).
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::InvalidKey { .. } | Error::Format(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::Io(e.into())
        } else {
            Error::Format(e.to_string())
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_key() {
        let err = Error::invalid_key("a.b", "cannot contain '.'");
        let msg = err.to_string();
        assert!(msg.contains("Invalid key"));
        assert!(msg.contains("a.b"));
    }

    #[test]
    fn test_invalid_key_truncates_long_keys() {
        let long = "x".repeat(1000);
        match Error::invalid_key(&long, "too long") {
            Error::InvalidKey { key, .. } => {
                assert_eq!(key.len(), 67);
                assert!(key.ends_with("..."));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_from_serde_json_is_format() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{oops");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Format(_)));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "sink closed");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_error_from_toml_is_config() {
        let parse: std::result::Result<toml::Table, _> = toml::from_str("pool_size = ");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_error_from_rusqlite_preserves_source() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::Storage(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
