//! Client-local key/value storage.
//!
//! Holds small string values that survive restarts of the client but are
//! never authoritative: callers must be able to rebuild them from the
//! document store.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LocalStorageError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("local storage lock poisoned")]
    Poisoned,
}

pub trait LocalStorage: Send + Sync {
    /// # Errors
    ///
    /// Returns `LocalStorageError` if the backing medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, LocalStorageError>;

    /// # Errors
    ///
    /// Returns `LocalStorageError` if the value cannot be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), LocalStorageError>;

    /// Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `LocalStorageError` if the removal cannot be persisted.
    fn remove(&self, key: &str) -> Result<(), LocalStorageError>;

    /// All keys currently stored, sorted.
    ///
    /// # Errors
    ///
    /// Returns `LocalStorageError` if the backing medium cannot be read.
    fn keys(&self) -> Result<Vec<String>, LocalStorageError>;
}

type Entries = BTreeMap<String, String>;

fn lock(entries: &Mutex<Entries>) -> Result<MutexGuard<'_, Entries>, LocalStorageError> {
    entries.lock().map_err(|_| LocalStorageError::Poisoned)
}

/// Process-local storage; clones share entries.
#[derive(Clone, Default)]
pub struct InMemoryLocalStorage {
    entries: Arc<Mutex<Entries>>,
}

impl InMemoryLocalStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for InMemoryLocalStorage {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStorageError> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStorageError> {
        lock(&self.entries)?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStorageError> {
        lock(&self.entries)?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, LocalStorageError> {
        Ok(lock(&self.entries)?.keys().cloned().collect())
    }
}

/// Storage kept in a JSON object file.
///
/// The whole map is held in memory and the file is rewritten after every
/// change through a temporary file and a rename.
pub struct FileLocalStorage {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl FileLocalStorage {
    /// Open the file at `path`, starting empty when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `LocalStorageError` if the file exists but cannot be read or
    /// does not hold a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LocalStorageError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Entries::new(),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| LocalStorageError::Serialization(e.to_string()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Entries::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Entries) -> Result<(), LocalStorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|e| LocalStorageError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LocalStorage for FileLocalStorage {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStorageError> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStorageError> {
        let mut guard = lock(&self.entries)?;
        guard.insert(key.to_owned(), value.to_owned());
        self.persist(&guard)
    }

    fn remove(&self, key: &str) -> Result<(), LocalStorageError> {
        let mut guard = lock(&self.entries)?;
        if guard.remove(key).is_some() {
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, LocalStorageError> {
        Ok(lock(&self.entries)?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_set_get_remove() {
        let storage = InMemoryLocalStorage::new();
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(storage.keys().unwrap(), vec!["a", "b"]);
        storage.remove("a").unwrap();
        storage.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let storage = FileLocalStorage::open(&path).unwrap();
        storage.set("ladico:lastUser", "u1").unwrap();
        storage.set("other", "x").unwrap();
        storage.remove("other").unwrap();
        drop(storage);

        let reopened = FileLocalStorage::open(&path).unwrap();
        assert_eq!(
            reopened.get("ladico:lastUser").unwrap().as_deref(),
            Some("u1")
        );
        assert_eq!(reopened.keys().unwrap(), vec!["ladico:lastUser"]);
    }

    #[test]
    fn file_storage_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "[1, 2]").unwrap();
        let err = FileLocalStorage::open(&path).err().unwrap();
        assert!(matches!(err, LocalStorageError::Serialization(_)));
    }
}
