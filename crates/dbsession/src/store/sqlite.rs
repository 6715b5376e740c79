//! SQLite record store.
//!
//! Several server processes can open the same database file; SQLite's file
//! locking serializes their writes and the `id` primary key guarantees one
//! record per session.

use std::path::Path;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::{debug, info};

use super::{RecordStore, SessionRecord};
use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// Default table name.
pub const DEFAULT_TABLE: &str = "sessions";

/// Default time to wait on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Record store backed by a SQLite table.
///
/// Thread-safe via internal `Mutex<Connection>`.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
    table: String,
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl SqliteRecordStore {
    /// Open the database at `path` and verify that `table` exists.
    ///
    /// Fails with [`Error::SchemaMissing`] when the table has not been
    /// provisioned; the store never creates it implicitly.
    pub fn open(path: &Path, table: &str, busy_timeout: Duration) -> Result<Self> {
        validate_table_name(table)?;
        let conn = Connection::open(path).map_err(map_sqlite_error)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(map_sqlite_error)?;

        let store = Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        };
        store.validate_schema()?;
        info!(path = %path.display(), table = %table, "Opened session store");
        Ok(store)
    }

    /// Open the store described by a [`StoreConfig`].
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::open(
            &config.path,
            &config.table,
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    /// Open an in-memory database with the table already created (for testing).
    pub fn open_in_memory(table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            table: table.to_string(),
        };
        store.create_schema()?;
        Ok(store)
    }

    /// DDL that provisions `table`.
    pub fn schema_sql(table: &str) -> Result<String> {
        validate_table_name(table)?;
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    \
                 id TEXT PRIMARY KEY NOT NULL,\n    \
                 data BLOB NOT NULL,\n    \
                 timestamp INTEGER NOT NULL\n\
             );\n\
             CREATE INDEX IF NOT EXISTS {table}_timestamp_idx ON {table} (timestamp);\n"
        ))
    }

    /// Create the table if it does not exist.
    pub fn create_schema(&self) -> Result<()> {
        let sql = Self::schema_sql(&self.table)?;
        self.conn().execute_batch(&sql)?;
        debug!(table = %self.table, "Session table created");
        Ok(())
    }

    /// The table this store reads and writes.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

impl RecordStore for SqliteRecordStore {
    fn find(&self, id: &str) -> Result<Option<SessionRecord>> {
        let sql = format!("SELECT id, data, timestamp FROM {} WHERE id = ?1", self.table);
        self.conn()
            .query_row(&sql, params![id], row_to_record)
            .optional()
            .map_err(map_sqlite_error)
    }

    fn create(&self, record: &SessionRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, data, timestamp) VALUES (?1, ?2, ?3)",
            self.table
        );
        match self
            .conn()
            .execute(&sql, params![record.id, record.data, record.timestamp])
        {
            Ok(_) => Ok(()),
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                Err(Error::DuplicateKey(record.id.clone()))
            }
            Err(e) => Err(map_sqlite_error(e)),
        }
    }

    fn update(&self, record: &SessionRecord) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET data = ?2, timestamp = MAX(timestamp, ?3) WHERE id = ?1",
            self.table
        );
        let changed = self
            .conn()
            .execute(&sql, params![record.id, record.data, record.timestamp])
            .map_err(map_sqlite_error)?;
        Ok(changed > 0)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table);
        let changed = self
            .conn()
            .execute(&sql, params![id])
            .map_err(map_sqlite_error)?;
        Ok(changed > 0)
    }

    fn delete_if_unchanged(&self, expected: &SessionRecord) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE id = ?1 AND timestamp = ?2 AND data = ?3",
            self.table
        );
        let changed = self
            .conn()
            .execute(
                &sql,
                params![expected.id, expected.timestamp, expected.data],
            )
            .map_err(map_sqlite_error)?;
        Ok(changed > 0)
    }

    fn all(&self) -> Result<Vec<SessionRecord>> {
        let sql = format!("SELECT id, data, timestamp FROM {} ORDER BY id", self.table);
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
        let iter = stmt.query_map([], row_to_record).map_err(map_sqlite_error)?;

        let mut rows = Vec::new();
        for r in iter {
            rows.push(r.map_err(map_sqlite_error)?);
        }
        Ok(rows)
    }

    fn delete_before(&self, cutoff: i64) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE timestamp < ?1", self.table);
        let deleted = self
            .conn()
            .execute(&sql, params![cutoff])
            .map_err(map_sqlite_error)?;
        Ok(deleted as u64)
    }

    fn validate_schema(&self) -> Result<()> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqlite_error)?;

        match found {
            Some(_) => Ok(()),
            None => Err(Error::SchemaMissing {
                table: self.table.clone(),
            }),
        }
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        data: row.get(1)?,
        timestamp: row.get(2)?,
    })
}

/// Sort backend failures into the handler's error taxonomy.
fn map_sqlite_error(err: rusqlite::Error) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
            Error::StoreUnavailable(err.to_string())
        }
        _ => {
            if let rusqlite::Error::SqliteFailure(_, Some(msg)) = &err
                && let Some(table) = msg.strip_prefix("no such table: ")
            {
                return Error::SchemaMissing {
                    table: table.to_string(),
                };
            }
            Error::Database(err)
        }
    }
}

pub(crate) fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTableName(table.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteRecordStore {
        SqliteRecordStore::open_in_memory(DEFAULT_TABLE).unwrap()
    }

    #[test]
    fn test_find_missing_is_none() {
        assert!(store().find("nope").unwrap().is_none());
    }

    #[test]
    fn test_create_and_find() {
        let store = store();
        let record = SessionRecord::new("s1", b"a|i:1;".to_vec(), 42);
        store.create(&record).unwrap();
        assert_eq!(store.find("s1").unwrap(), Some(record));
    }

    #[test]
    fn test_create_duplicate_maps_to_duplicate_key() {
        let store = store();
        store.create(&SessionRecord::new("s1", "x", 1)).unwrap();
        let err = store.create(&SessionRecord::new("s1", "y", 2)).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(id) if id == "s1"));
    }

    #[test]
    fn test_update_keeps_newest_timestamp() {
        let store = store();
        store.create(&SessionRecord::new("s1", "x", 100)).unwrap();

        assert!(store.update(&SessionRecord::new("s1", "y", 90)).unwrap());
        let record = store.find("s1").unwrap().unwrap();
        assert_eq!(record.data, b"y");
        assert_eq!(record.timestamp, 100);

        assert!(store.update(&SessionRecord::new("s1", "z", 150)).unwrap());
        assert_eq!(store.find("s1").unwrap().unwrap().timestamp, 150);
    }

    #[test]
    fn test_update_missing_returns_false() {
        assert!(!store().update(&SessionRecord::new("s1", "x", 1)).unwrap());
    }

    #[test]
    fn test_delete_and_delete_before() {
        let store = store();
        store.create(&SessionRecord::new("a", "", 10)).unwrap();
        store.create(&SessionRecord::new("b", "", 20)).unwrap();
        store.create(&SessionRecord::new("c", "", 30)).unwrap();

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.delete_before(30).unwrap(), 1);

        let ids: Vec<_> = store.all().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn test_delete_if_unchanged_compares_data_and_timestamp() {
        let store = store();
        let scanned = SessionRecord::new("s1", "", 10);
        store.create(&scanned).unwrap();

        // Same second, new payload.
        store
            .update(&SessionRecord::new("s1", "user_id|i:7;", 10))
            .unwrap();
        assert!(!store.delete_if_unchanged(&scanned).unwrap());

        store.update(&SessionRecord::new("s1", "", 11)).unwrap();
        assert!(!store.delete_if_unchanged(&scanned).unwrap());
        assert!(store.find("s1").unwrap().is_some());

        let current = store.find("s1").unwrap().unwrap();
        assert!(store.delete_if_unchanged(&current).unwrap());
        assert!(store.find("s1").unwrap().is_none());
    }

    #[test]
    fn test_binary_payload_round_trips() {
        let store = store();
        let data = vec![0u8, 159, 146, 150, b'|', 0];
        store.create(&SessionRecord::new("bin", data.clone(), 1)).unwrap();
        assert_eq!(store.find("bin").unwrap().unwrap().data, data);
    }

    #[test]
    fn test_open_without_table_is_schema_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");

        let err = SqliteRecordStore::open(&path, "sessions", Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMissing { ref table } if table == "sessions"));
        assert!(err.to_string().contains("dbsession schema"));
    }

    #[test]
    fn test_open_with_provisioned_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(&SqliteRecordStore::schema_sql("web_sessions").unwrap())
                .unwrap();
        }

        let store =
            SqliteRecordStore::open(&path, "web_sessions", Duration::from_millis(100)).unwrap();
        store.create(&SessionRecord::new("s1", "x", 1)).unwrap();
        assert_eq!(store.table(), "web_sessions");
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_table_surfaces_schema_missing() {
        let store = store();
        store.conn().execute_batch("DROP TABLE sessions;").unwrap();

        assert!(matches!(store.find("x"), Err(Error::SchemaMissing { .. })));
        assert!(matches!(
            store.validate_schema(),
            Err(Error::SchemaMissing { .. })
        ));
    }

    #[test]
    fn test_rejects_unsafe_table_names() {
        for name in ["", "1abc", "sessions; DROP TABLE x", "a-b", "a b"] {
            assert!(
                matches!(
                    SqliteRecordStore::schema_sql(name),
                    Err(Error::InvalidTableName(_))
                ),
                "accepted {name:?}"
            );
        }
        assert!(SqliteRecordStore::schema_sql("_sessions_2").is_ok());
    }
}
