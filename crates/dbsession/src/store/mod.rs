//! Record store abstraction for session persistence.
//!
//! The lifecycle policy only talks to a [`RecordStore`]; it never sees a
//! query language. Two backends ship with the crate:
//!
//! ```text
//! RecordStore (trait)       - keyed session record CRUD + bulk expiry
//!     └── SqliteRecordStore - shared database file (multi-process)
//!     └── MemoryRecordStore - in-process map for tests and single hosts
//! ```

mod memory;
mod sqlite;

use std::sync::Arc;

use crate::error::Result;

pub use memory::MemoryRecordStore;
pub use sqlite::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_TABLE, SqliteRecordStore};
pub(crate) use sqlite::validate_table_name;

/// A persisted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Session id, unique within the store.
    pub id: String,

    /// Opaque serialized session variables.
    pub data: Vec<u8>,

    /// Last write time in epoch seconds.
    pub timestamp: i64,
}

impl SessionRecord {
    /// Create a record.
    pub fn new(id: impl Into<String>, data: impl Into<Vec<u8>>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            timestamp,
        }
    }

    /// Seconds elapsed since the last write.
    pub fn age(&self, now: i64) -> i64 {
        now - self.timestamp
    }
}

/// Trait for session record backends.
///
/// Implementations must be safe to share between request threads. A
/// missing record is `Ok(None)`; a missing table is
/// [`Error::SchemaMissing`](crate::Error::SchemaMissing).
pub trait RecordStore: Send + Sync {
    /// Fetch a record by id.
    fn find(&self, id: &str) -> Result<Option<SessionRecord>>;

    /// Insert a new record.
    ///
    /// Returns [`Error::DuplicateKey`](crate::Error::DuplicateKey) if a
    /// record with the same id already exists.
    fn create(&self, record: &SessionRecord) -> Result<()>;

    /// Replace data and timestamp of an existing record.
    ///
    /// The stored timestamp never moves backwards. Returns `false` if no
    /// record with this id exists.
    fn update(&self, record: &SessionRecord) -> Result<bool>;

    /// Delete a record. Returns whether it existed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Delete a record only if its data and timestamp still equal
    /// `expected`. Returns `false` if the record is gone or was rewritten.
    fn delete_if_unchanged(&self, expected: &SessionRecord) -> Result<bool>;

    /// List every record.
    fn all(&self) -> Result<Vec<SessionRecord>>;

    /// Delete every record with `timestamp < cutoff`, returning the count.
    fn delete_before(&self, cutoff: i64) -> Result<u64>;

    /// Check that the backing table exists.
    fn validate_schema(&self) -> Result<()> {
        Ok(())
    }
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn find(&self, id: &str) -> Result<Option<SessionRecord>> {
        (**self).find(id)
    }

    fn create(&self, record: &SessionRecord) -> Result<()> {
        (**self).create(record)
    }

    fn update(&self, record: &SessionRecord) -> Result<bool> {
        (**self).update(record)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        (**self).delete(id)
    }

    fn delete_if_unchanged(&self, expected: &SessionRecord) -> Result<bool> {
        (**self).delete_if_unchanged(expected)
    }

    fn all(&self) -> Result<Vec<SessionRecord>> {
        (**self).all()
    }

    fn delete_before(&self, cutoff: i64) -> Result<u64> {
        (**self).delete_before(cutoff)
    }

    fn validate_schema(&self) -> Result<()> {
        (**self).validate_schema()
    }
}
