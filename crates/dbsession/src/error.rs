//! Error types for session handler operations.

use thiserror::Error;

/// Error type for session store and handler operations.
///
/// An absent session is never an error: lookups return `Ok(None)` and
/// destroying an unknown id succeeds.
#[derive(Debug, Error)]
pub enum Error {
    /// The backing table does not exist.
    #[error(
        "session table '{table}' does not exist; provision it with `dbsession schema --table {table} | sqlite3 <database>`"
    )]
    SchemaMissing { table: String },

    /// A record with this id already exists (lost a create race).
    #[error("Duplicate session id: {0}")]
    DuplicateKey(String),

    /// The store is busy, locked or unreachable.
    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    /// Any other backend failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Table names are interpolated into SQL and must be plain identifiers.
    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),

    /// A negative lifetime passed to a sweep.
    #[error("Invalid session lifetime: {0} (must not be negative)")]
    InvalidLifetime(i64),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or otherwise unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A payload that the configured codec could not decode.
///
/// Classification treats these payloads as anonymous; the error only
/// surfaces through [`PayloadInspector::try_decode`](crate::PayloadInspector::try_decode).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed session payload at byte {offset}: {reason}")]
pub struct PayloadError {
    pub offset: usize,
    pub reason: String,
}

impl PayloadError {
    pub(crate) fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}
