//! Durable entry store: a name-keyed record of all cache entries.
//!
//! Persisted as one JSON sidecar under the cache root, replaced atomically
//! (write-to-temp-then-rename) on every flush. Entries keep insertion order.
//! A record that fails to deserialize is quarantined and skipped without
//! failing the load; a sidecar that is unreadable as a whole is renamed
//! aside so the cache can start over instead of refusing to load.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::fsutil::atomic_write;

/// Durable mapping from entry name to [`CacheEntry`], loaded once at manager
/// start and flushed after every mutation.
#[derive(Debug)]
pub struct EntryStore {
    path: PathBuf,
    entries: Vec<CacheEntry>,
    quarantined: usize,
}

impl EntryStore {
    /// Load the store from its sidecar file, or start empty if none exists.
    pub fn load(path: PathBuf) -> Result<Self, CacheError> {
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    path,
                    entries: Vec::new(),
                    quarantined: 0,
                });
            }
            Err(e) => return Err(CacheError::Io(e)),
        };

        let value: serde_json::Value = match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(err) => return Self::quarantine_file(path, &err.to_string()),
        };

        let Some(items) = value.as_array() else {
            return Self::quarantine_file(path, "top-level value is not an array");
        };

        let mut entries = Vec::new();
        let mut quarantined = 0;
        let mut seen: HashSet<String> = HashSet::new();
        for item in items {
            match serde_json::from_value::<CacheEntry>(item.clone()) {
                Ok(entry) => {
                    if seen.insert(entry.name.clone()) {
                        entries.push(entry);
                    } else {
                        log::warn!(
                            "store: quarantining duplicate record for entry '{}'",
                            entry.name
                        );
                        quarantined += 1;
                    }
                }
                Err(err) => {
                    log::warn!("store: quarantining unreadable entry record: {}", err);
                    quarantined += 1;
                }
            }
        }

        Ok(Self {
            path,
            entries,
            quarantined,
        })
    }

    /// Rename an unreadable sidecar aside and start empty.
    fn quarantine_file(path: PathBuf, reason: &str) -> Result<Self, CacheError> {
        let quarantine = path.with_extension("json.corrupt");
        log::error!(
            "store: metadata file {} is corrupt ({}), moving aside to {}",
            path.display(),
            reason,
            quarantine.display()
        );
        fs::rename(&path, &quarantine).map_err(|e| {
            CacheError::Corrupt(format!(
                "metadata store {} is unreadable ({}) and could not be quarantined: {}",
                path.display(),
                reason,
                e
            ))
        })?;
        Ok(Self {
            path,
            entries: Vec::new(),
            quarantined: 1,
        })
    }

    /// Flush all entries to disk with an atomic whole-file replace.
    pub fn persist(&self) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| CacheError::Io(io::Error::other(e)))?;
        atomic_write(&self.path, &bytes)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Insert or replace an entry, preserving its original insertion slot.
    pub fn upsert(&mut self, entry: CacheEntry) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    /// Remove and return the entry with the given name.
    pub fn remove(&mut self, name: &str) -> Option<CacheEntry> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(index))
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Entry names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Update the measured size of one entry, if it exists.
    pub fn set_size(&mut self, name: &str, size_bytes: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            entry.size_bytes = size_bytes;
        }
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many records were quarantined during load.
    pub fn quarantined(&self) -> usize {
        self.quarantined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CacheStatus, CacheType};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn entry(name: &str) -> CacheEntry {
        CacheEntry {
            name: name.to_string(),
            source: format!("/src/{}", name),
            cache_type: CacheType::Local,
            cache_path: PathBuf::from(format!("/cache/mirrors/{}", name)),
            status: CacheStatus::Fresh,
            local_commit_hash: None,
            local_branch: None,
            remote_commit_hash: None,
            has_upstream_changes: false,
            upstream_changes_summary: None,
            source_fingerprint: Some("deadbeef".to_string()),
            size_bytes: 10,
            created_at: 1_700_000_000,
            last_updated: 1_700_000_000,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn load_of_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = EntryStore::load(dir.path().join("entries.json")).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.quarantined(), 0);
    }

    #[test]
    fn persist_and_reload_roundtrips_entries_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");

        let mut store = EntryStore::load(path.clone()).unwrap();
        store.upsert(entry("zeta"));
        store.upsert(entry("alpha"));
        store.upsert(entry("mid"));
        store.persist().unwrap();

        let reloaded = EntryStore::load(path).unwrap();
        let names: Vec<_> = reloaded.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(reloaded.get("alpha"), store.get("alpha"));
    }

    #[test]
    fn upsert_replaces_in_place() {
        let dir = tempdir().unwrap();
        let mut store = EntryStore::load(dir.path().join("entries.json")).unwrap();
        store.upsert(entry("a"));
        store.upsert(entry("b"));

        let mut changed = entry("a");
        changed.size_bytes = 999;
        store.upsert(changed);

        let names: Vec<_> = store.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(store.get("a").unwrap().size_bytes, 999);
    }

    #[test]
    fn remove_returns_entry_and_total_size_updates() {
        let dir = tempdir().unwrap();
        let mut store = EntryStore::load(dir.path().join("entries.json")).unwrap();
        store.upsert(entry("a"));
        store.upsert(entry("b"));
        assert_eq!(store.total_size(), 20);

        let removed = store.remove("a").unwrap();
        assert_eq!(removed.name, "a");
        assert_eq!(store.total_size(), 10);
        assert!(store.remove("a").is_none());
    }

    #[test]
    fn corrupt_record_is_quarantined_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");

        let good = serde_json::to_value(entry("good")).unwrap();
        let bad = serde_json::json!({"name": "bad", "status": 17});
        let doc = serde_json::Value::Array(vec![good, bad]);
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let store = EntryStore::load(path).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("good").is_some());
        assert_eq!(store.quarantined(), 1);
    }

    #[test]
    fn duplicate_names_keep_first_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");

        let mut first = entry("dup");
        first.size_bytes = 1;
        let mut second = entry("dup");
        second.size_bytes = 2;
        let doc = serde_json::Value::Array(vec![
            serde_json::to_value(first).unwrap(),
            serde_json::to_value(second).unwrap(),
        ]);
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let store = EntryStore::load(path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("dup").unwrap().size_bytes, 1);
        assert_eq!(store.quarantined(), 1);
    }

    #[test]
    fn unreadable_file_is_moved_aside() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.json");
        fs::write(&path, b"{not json").unwrap();

        let store = EntryStore::load(path.clone()).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.quarantined(), 1);
        assert!(!path.exists());
        assert!(dir.path().join("entries.json.corrupt").exists());
    }
}
