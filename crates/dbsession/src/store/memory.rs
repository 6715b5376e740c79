//! In-process record store.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use parking_lot::Mutex;

use super::{RecordStore, SessionRecord};
use crate::error::{Error, Result};

/// Record store backed by a `HashMap`.
///
/// Only shares sessions between threads of one process. Useful for tests
/// and for hosts that run a single worker.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl MemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn find(&self, id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.records.lock().get(id).cloned())
    }

    fn create(&self, record: &SessionRecord) -> Result<()> {
        match self.records.lock().entry(record.id.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateKey(record.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    fn update(&self, record: &SessionRecord) -> Result<bool> {
        let mut records = self.records.lock();
        match records.get_mut(&record.id) {
            Some(existing) => {
                existing.data = record.data.clone();
                existing.timestamp = existing.timestamp.max(record.timestamp);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.lock().remove(id).is_some())
    }

    fn delete_if_unchanged(&self, expected: &SessionRecord) -> Result<bool> {
        let mut records = self.records.lock();
        match records.get(&expected.id) {
            Some(current) if current == expected => {
                records.remove(&expected.id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn all(&self) -> Result<Vec<SessionRecord>> {
        let mut records: Vec<_> = self.records.lock().values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    fn delete_before(&self, cutoff: i64) -> Result<u64> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| r.timestamp >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_duplicate_id() {
        let store = MemoryRecordStore::new();
        store.create(&SessionRecord::new("a", "x", 1)).unwrap();

        let err = store.create(&SessionRecord::new("a", "y", 2)).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(id) if id == "a"));
        assert_eq!(store.find("a").unwrap().unwrap().data, b"x");
    }

    #[test]
    fn test_update_missing_returns_false() {
        let store = MemoryRecordStore::new();
        assert!(!store.update(&SessionRecord::new("a", "x", 1)).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_never_moves_timestamp_back() {
        let store = MemoryRecordStore::new();
        store.create(&SessionRecord::new("a", "x", 100)).unwrap();
        store.update(&SessionRecord::new("a", "y", 50)).unwrap();

        let record = store.find("a").unwrap().unwrap();
        assert_eq!(record.data, b"y");
        assert_eq!(record.timestamp, 100);
    }

    #[test]
    fn test_delete_before_is_strict() {
        let store = MemoryRecordStore::new();
        store.create(&SessionRecord::new("old", "", 9)).unwrap();
        store.create(&SessionRecord::new("edge", "", 10)).unwrap();
        store.create(&SessionRecord::new("new", "", 11)).unwrap();

        assert_eq!(store.delete_before(10).unwrap(), 1);
        let ids: Vec<_> = store.all().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["edge", "new"]);
    }

    #[test]
    fn test_delete_if_unchanged_skips_rewritten_record() {
        let store = MemoryRecordStore::new();
        let scanned = SessionRecord::new("a", "", 10);
        store.create(&scanned).unwrap();
        store.update(&SessionRecord::new("a", "user_id|i:1;", 10)).unwrap();

        assert!(!store.delete_if_unchanged(&scanned).unwrap());
        assert!(store.find("a").unwrap().is_some());

        let current = store.find("a").unwrap().unwrap();
        assert!(store.delete_if_unchanged(&current).unwrap());
        assert!(store.is_empty());
        assert!(!store.delete_if_unchanged(&current).unwrap());
    }

    #[test]
    fn test_delete_reports_existence() {
        let store = MemoryRecordStore::new();
        store.create(&SessionRecord::new("a", "", 1)).unwrap();
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
    }
}
