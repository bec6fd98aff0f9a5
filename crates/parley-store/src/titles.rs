use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info};

use parley_core::ids::ThreadId;

use crate::error::StoreError;

/// File-backed map from thread id to display title.
///
/// The whole map is rewritten on every change (temp file + rename), so a
/// crash mid-write leaves the previous file intact. Without a path the map
/// lives only in memory.
pub struct TitleStore {
    path: Option<PathBuf>,
    titles: RwLock<BTreeMap<String, String>>,
}

impl TitleStore {
    /// Load titles from `path`. A missing file is an empty map.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let titles = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                StoreError::Serialization(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(format!("{}: {e}", path.display()))),
        };
        info!(path = %path.display(), count = titles.len(), "titles loaded");
        Ok(Self {
            path: Some(path),
            titles: RwLock::new(titles),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            titles: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, thread_id: &ThreadId) -> Option<String> {
        self.titles.read().get(thread_id.as_str()).cloned()
    }

    pub fn contains(&self, thread_id: &ThreadId) -> bool {
        self.titles.read().contains_key(thread_id.as_str())
    }

    pub fn all(&self) -> BTreeMap<ThreadId, String> {
        self.titles
            .read()
            .iter()
            .map(|(k, v)| (ThreadId::from_raw(k.clone()), v.clone()))
            .collect()
    }

    pub fn set(&self, thread_id: &ThreadId, title: impl Into<String>) -> Result<(), StoreError> {
        let mut titles = self.titles.write();
        let previous = titles.insert(thread_id.as_str().to_owned(), title.into());
        if let Err(e) = self.persist(&titles) {
            match previous {
                Some(old) => titles.insert(thread_id.as_str().to_owned(), old),
                None => titles.remove(thread_id.as_str()),
            };
            return Err(e);
        }
        debug!(thread_id = %thread_id, "title saved");
        Ok(())
    }

    /// Returns whether a title existed.
    pub fn remove(&self, thread_id: &ThreadId) -> Result<bool, StoreError> {
        let mut titles = self.titles.write();
        let Some(old) = titles.remove(thread_id.as_str()) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&titles) {
            titles.insert(thread_id.as_str().to_owned(), old);
            return Err(e);
        }
        Ok(true)
    }

    fn persist(&self, titles: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let encoded = serde_json::to_string_pretty(titles)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, encoded)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TitleStore::open(dir.path().join("titles.json")).unwrap();
        assert!(store.all().is_empty());
    }

    #[test]
    fn set_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("titles.json");
        let t = ThreadId::from_raw("t1");
        {
            let store = TitleStore::open(&path).unwrap();
            store.set(&t, "Stock price lookup").unwrap();
        }
        let store = TitleStore::open(&path).unwrap();
        assert_eq!(store.get(&t).as_deref(), Some("Stock price lookup"));
        assert!(!dir.path().join("titles.json.tmp").exists());
    }

    #[test]
    fn file_is_a_plain_json_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("titles.json");
        std::fs::write(&path, r#"{"abc": "Old chat"}"#).unwrap();
        let store = TitleStore::open(&path).unwrap();
        assert_eq!(store.get(&ThreadId::from_raw("abc")).as_deref(), Some("Old chat"));

        store.set(&ThreadId::from_raw("def"), "New chat").unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"abc": "Old chat", "def": "New chat"}));
    }

    #[test]
    fn remove_title() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("titles.json");
        let store = TitleStore::open(&path).unwrap();
        let t = ThreadId::new();
        store.set(&t, "x").unwrap();
        assert!(store.remove(&t).unwrap());
        assert!(!store.remove(&t).unwrap());
        assert!(TitleStore::open(&path).unwrap().get(&t).is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("titles.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(TitleStore::open(&path), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn in_memory_store() {
        let store = TitleStore::in_memory();
        let t = ThreadId::new();
        store.set(&t, "hello").unwrap();
        assert!(store.contains(&t));
        assert!(store.path().is_none());
    }
}
